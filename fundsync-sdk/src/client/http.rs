//! Request/response JSON-RPC over HTTP.

use std::sync::atomic::{AtomicU64, Ordering};

use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use url::Url;

use super::{ClientError, UiAccount, UiKeyedAccount, WithContext, encode_filters};
use crate::pubkey::Pubkey;
use crate::rpc::{AccountFilter, AccountInfo, KeyedAccount, RpcResponse};

/// Typed HTTP client for the account-read JSON-RPC methods.
#[derive(Debug)]
pub struct HttpRpc {
    http: Client,
    url: Url,
    next_id: AtomicU64,
}

#[derive(Debug, Deserialize)]
struct JsonRpcErrorObject {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<JsonRpcErrorObject>,
}

impl HttpRpc {
    pub fn new(url: Url) -> Self {
        Self {
            http: Client::new(),
            url,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn with_http_client(mut self, client: Client) -> Self {
        self.http = client;
        self
    }

    /// `getSlot`
    pub async fn get_slot(&self) -> Result<u64, ClientError> {
        self.call("getSlot", json!([])).await
    }

    /// `getAccountInfo` with base64 encoding.
    pub async fn get_account_info(
        &self,
        address: &Pubkey,
    ) -> Result<RpcResponse<Option<AccountInfo>>, ClientError> {
        let resp: WithContext<Option<UiAccount>> = self
            .call(
                "getAccountInfo",
                json!([address.to_string(), { "encoding": "base64" }]),
            )
            .await?;
        Ok(RpcResponse {
            slot: resp.context.slot,
            value: resp.value.map(UiAccount::decode).transpose()?,
        })
    }

    /// `getMultipleAccounts` with base64 encoding.
    ///
    /// The caller is responsible for staying under the node's per-call limit.
    pub async fn get_multiple_accounts(
        &self,
        addresses: &[Pubkey],
    ) -> Result<RpcResponse<Vec<Option<AccountInfo>>>, ClientError> {
        let keys: Vec<String> = addresses.iter().map(ToString::to_string).collect();
        let resp: WithContext<Vec<Option<UiAccount>>> = self
            .call(
                "getMultipleAccounts",
                json!([keys, { "encoding": "base64" }]),
            )
            .await?;
        if resp.value.len() != addresses.len() {
            return Err(ClientError::InvalidResponse(format!(
                "requested {} accounts, got {}",
                addresses.len(),
                resp.value.len()
            )));
        }
        let value = resp
            .value
            .into_iter()
            .map(|account| account.map(UiAccount::decode).transpose())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(RpcResponse {
            slot: resp.context.slot,
            value,
        })
    }

    /// `getProgramAccounts` with base64 encoding and `withContext`.
    pub async fn get_program_accounts(
        &self,
        program: &Pubkey,
        filters: &[AccountFilter],
    ) -> Result<RpcResponse<Vec<KeyedAccount>>, ClientError> {
        let resp: WithContext<Vec<UiKeyedAccount>> = self
            .call(
                "getProgramAccounts",
                json!([
                    program.to_string(),
                    {
                        "encoding": "base64",
                        "withContext": true,
                        "filters": encode_filters(filters),
                    }
                ]),
            )
            .await?;
        let value = resp
            .value
            .into_iter()
            .map(UiKeyedAccount::decode)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(RpcResponse {
            slot: resp.context.slot,
            value,
        })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<T, ClientError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let resp = self
            .http
            .post(self.url.clone())
            .json(&body)
            .send()
            .await?;

        let parsed: JsonRpcResponse<T> = parse_response(resp).await?;
        unwrap_result(parsed)
    }
}

fn unwrap_result<T>(resp: JsonRpcResponse<T>) -> Result<T, ClientError> {
    if let Some(err) = resp.error {
        return Err(ClientError::Rpc {
            code: err.code,
            message: err.message,
        });
    }
    resp.result
        .ok_or_else(|| ClientError::InvalidResponse("missing result".into()))
}

/// Deserialize a JSON body, or return [`ClientError::Api`] on non-2xx.
async fn parse_response<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, ClientError> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(ClientError::Api { status, body });
    }
    let bytes = resp.bytes().await?;
    serde_json::from_slice(&bytes).map_err(ClientError::Json)
}
