//! JSON-RPC transport implementing [`AccountRpc`].
//!
//! Gated behind the `client` cargo feature so crates that only need the
//! shared types and layouts do not pull in `reqwest` or a websocket stack.

mod http;
mod pubsub;

pub use http::HttpRpc;
pub use pubsub::PubsubClient;

use crate::pubkey::Pubkey;
use crate::rpc::{
    AccountFilter, AccountInfo, AccountRpc, KeyedAccount, ListenerId, NotificationSender,
    RpcError, RpcResponse,
};
use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use url::Url;

/// Errors produced by the JSON-RPC clients.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Transport-level failure (DNS, TLS, connection reset, …).
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Websocket failure.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// The server returned a non-2xx status code.
    #[error("api error: status {status}, body: {body}")]
    Api {
        status: reqwest::StatusCode,
        body: String,
    },

    /// The server returned a JSON-RPC error object.
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// Response body could not be deserialized.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Response was well-formed JSON but not the expected shape.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// No listener is registered under this id.
    #[error("listener {0} not found")]
    ListenerNotFound(ListenerId),

    /// The pubsub connection task has stopped.
    #[error("pubsub connection closed")]
    Closed,
}

impl From<ClientError> for RpcError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Rpc { code, message } => RpcError::Rpc { code, message },
            ClientError::Json(e) => RpcError::InvalidResponse(e.to_string()),
            ClientError::InvalidResponse(msg) => RpcError::InvalidResponse(msg),
            ClientError::ListenerNotFound(id) => RpcError::ListenerNotFound(id),
            ClientError::Closed => RpcError::Closed,
            other => RpcError::Transport(other.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Wire types shared by HTTP and pubsub
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub(crate) struct RpcContext {
    pub slot: u64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WithContext<T> {
    pub context: RpcContext,
    pub value: T,
}

/// Account as encoded with `"encoding": "base64"`.
#[derive(Debug, Deserialize)]
pub(crate) struct UiAccount {
    pub lamports: u64,
    pub owner: String,
    /// `[payload, "base64"]`
    pub data: (String, String),
}

#[derive(Debug, Deserialize)]
pub(crate) struct UiKeyedAccount {
    pub pubkey: String,
    pub account: UiAccount,
}

impl UiAccount {
    pub fn decode(self) -> Result<AccountInfo, ClientError> {
        let (payload, encoding) = self.data;
        if encoding != "base64" {
            return Err(ClientError::InvalidResponse(format!(
                "unexpected account encoding {encoding}"
            )));
        }
        let data = fast32::base64::RFC4648
            .decode_str(&payload)
            .map_err(|_| ClientError::InvalidResponse("invalid base64 account data".into()))?;
        Ok(AccountInfo {
            lamports: self.lamports,
            owner: parse_pubkey(&self.owner)?,
            data: Bytes::from(data),
        })
    }
}

impl UiKeyedAccount {
    pub fn decode(self) -> Result<KeyedAccount, ClientError> {
        Ok(KeyedAccount {
            address: parse_pubkey(&self.pubkey)?,
            account: self.account.decode()?,
        })
    }
}

pub(crate) fn parse_pubkey(s: &str) -> Result<Pubkey, ClientError> {
    s.parse()
        .map_err(|e| ClientError::InvalidResponse(format!("invalid pubkey {s}: {e}")))
}

/// Encode filters the way `getProgramAccounts` / `programSubscribe` expect.
pub(crate) fn encode_filters(filters: &[AccountFilter]) -> serde_json::Value {
    let encoded: Vec<serde_json::Value> = filters
        .iter()
        .map(|filter| match filter {
            AccountFilter::Memcmp { offset, bytes } => serde_json::json!({
                "memcmp": {
                    "offset": offset,
                    "bytes": bs58::encode(bytes).into_string(),
                }
            }),
            AccountFilter::DataSize(size) => serde_json::json!({ "dataSize": size }),
        })
        .collect();
    serde_json::Value::Array(encoded)
}

// ---------------------------------------------------------------------------
// Combined client
// ---------------------------------------------------------------------------

/// HTTP reads plus websocket notifications against one RPC node.
pub struct SolanaRpcClient {
    http: HttpRpc,
    pubsub: PubsubClient,
}

impl SolanaRpcClient {
    /// Create a client.
    ///
    /// * `http_url` – JSON-RPC endpoint (e.g. `https://api.mainnet-beta.solana.com`).
    /// * `ws_url` – pubsub endpoint (e.g. `wss://api.mainnet-beta.solana.com`).
    ///
    /// Must be called inside a tokio runtime; the pubsub connection task is
    /// spawned immediately.
    pub fn new(http_url: Url, ws_url: Url) -> Self {
        Self {
            http: HttpRpc::new(http_url),
            pubsub: PubsubClient::spawn(ws_url),
        }
    }

    /// Replace the default `reqwest::Client` with a custom one (e.g. to
    /// configure timeouts or a proxy).
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = self.http.with_http_client(client);
        self
    }
}

#[async_trait]
impl AccountRpc for SolanaRpcClient {
    async fn get_slot(&self) -> Result<u64, RpcError> {
        Ok(self.http.get_slot().await?)
    }

    async fn get_account_info(
        &self,
        address: &Pubkey,
    ) -> Result<RpcResponse<Option<AccountInfo>>, RpcError> {
        Ok(self.http.get_account_info(address).await?)
    }

    async fn get_multiple_accounts(
        &self,
        addresses: &[Pubkey],
    ) -> Result<RpcResponse<Vec<Option<AccountInfo>>>, RpcError> {
        Ok(self.http.get_multiple_accounts(addresses).await?)
    }

    async fn get_program_accounts(
        &self,
        program: &Pubkey,
        filters: &[AccountFilter],
    ) -> Result<RpcResponse<Vec<KeyedAccount>>, RpcError> {
        Ok(self.http.get_program_accounts(program, filters).await?)
    }

    async fn on_account_change(
        &self,
        address: &Pubkey,
        sink: NotificationSender,
    ) -> Result<ListenerId, RpcError> {
        Ok(self.pubsub.account_subscribe(*address, sink).await?)
    }

    async fn on_program_account_change(
        &self,
        program: &Pubkey,
        filters: &[AccountFilter],
        sink: NotificationSender,
    ) -> Result<ListenerId, RpcError> {
        Ok(self.pubsub.program_subscribe(*program, filters, sink).await?)
    }

    async fn remove_listener(&self, id: ListenerId) -> Result<(), RpcError> {
        Ok(self.pubsub.unsubscribe(id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ui_account_decodes_base64() {
        let json = r#"{
            "lamports": 2039280,
            "owner": "11111111111111111111111111111111",
            "data": ["AQIDBA==", "base64"],
            "executable": false,
            "rentEpoch": 18446744073709551615
        }"#;
        let account: UiAccount = serde_json::from_str(json).unwrap();
        let info = account.decode().unwrap();
        assert_eq!(info.lamports, 2_039_280);
        assert_eq!(info.data.as_ref(), &[1, 2, 3, 4]);
        assert!(info.owner.is_default());
    }

    #[test]
    fn test_filters_encode_base58_memcmp() {
        let encoded = encode_filters(&[
            AccountFilter::memcmp(0, vec![0u8, 0u8]),
            AccountFilter::DataSize(165),
        ]);
        assert_eq!(
            encoded,
            serde_json::json!([
                { "memcmp": { "offset": 0, "bytes": "11" } },
                { "dataSize": 165 }
            ])
        );
    }

    #[test]
    fn test_rpc_error_mapping() {
        let err: RpcError = ClientError::Rpc {
            code: -32602,
            message: "bad params".into(),
        }
        .into();
        assert_eq!(
            err,
            RpcError::Rpc {
                code: -32602,
                message: "bad params".into()
            }
        );
        assert_eq!(RpcError::from(ClientError::Closed), RpcError::Closed);
    }
}
