//! The remote account source fundsync orchestrates.
//!
//! [`AccountRpc`] is the contract a transport has to fulfil: conventional
//! request/response reads plus fire-and-forget change notifications
//! delivered into a [`NotificationSender`]. fundsync never talks to the
//! network except through this trait.

use crate::pubkey::Pubkey;
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

/// Most addresses a single `getMultipleAccounts` call may carry.
pub const MAX_MULTIPLE_ACCOUNTS: usize = 99;

/// Buffer size for notification channels.
pub const NOTIFICATION_BUFFER: usize = 1024;

/// Raw account as returned by the remote source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountInfo {
    pub lamports: u64,
    pub owner: Pubkey,
    pub data: Bytes,
}

/// An account together with its address, as returned by a program scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyedAccount {
    pub address: Pubkey,
    pub account: AccountInfo,
}

/// A response value stamped with the slot it was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcResponse<T> {
    pub slot: u64,
    pub value: T,
}

/// Server-side filter for program scans and program-wide listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountFilter {
    /// Account data at `offset` must equal `bytes`.
    Memcmp { offset: usize, bytes: Vec<u8> },
    /// Account data must be exactly this long.
    DataSize(u64),
}

impl AccountFilter {
    pub fn memcmp(offset: usize, bytes: impl Into<Vec<u8>>) -> Self {
        Self::Memcmp {
            offset,
            bytes: bytes.into(),
        }
    }

    pub fn matches(&self, data: &[u8]) -> bool {
        match self {
            AccountFilter::Memcmp { offset, bytes } => data
                .get(*offset..offset.saturating_add(bytes.len()))
                .is_some_and(|window| window == bytes.as_slice()),
            AccountFilter::DataSize(size) => {
                u64::try_from(data.len()).is_ok_and(|len| len == *size)
            }
        }
    }
}

/// Handle for a registered change listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub u64);

impl std::fmt::Display for ListenerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A pushed account change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountNotification {
    /// Listener that produced this notification.
    pub listener: ListenerId,
    pub address: Pubkey,
    pub account: AccountInfo,
    pub slot: u64,
}

/// Sender half for [`AccountNotification`]s.
pub type NotificationSender = mpsc::Sender<AccountNotification>;
/// Receiver half for [`AccountNotification`]s.
pub type NotificationReceiver = mpsc::Receiver<AccountNotification>;

/// Create a notification channel.
///
/// All listeners of one subscriber share a single channel; the sender is
/// cloned into every registration.
pub fn notification_channel() -> (NotificationSender, NotificationReceiver) {
    mpsc::channel(NOTIFICATION_BUFFER)
}

/// Transport failures.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum RpcError {
    /// Connection-level failure (DNS, TLS, reset, timeout, ...).
    #[error("transport error: {0}")]
    Transport(String),

    /// The remote returned a JSON-RPC error object.
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// The response could not be understood.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// A listener id was not registered (or already removed).
    #[error("listener {0} not found")]
    ListenerNotFound(ListenerId),

    /// The notification connection is gone.
    #[error("connection closed")]
    Closed,
}

/// Remote account source.
#[async_trait]
pub trait AccountRpc: Send + Sync {
    /// Current slot of the remote source.
    async fn get_slot(&self) -> Result<u64, RpcError>;

    async fn get_account_info(
        &self,
        address: &Pubkey,
    ) -> Result<RpcResponse<Option<AccountInfo>>, RpcError>;

    /// Fetch up to [`MAX_MULTIPLE_ACCOUNTS`] accounts. The result has one
    /// entry per requested address, in request order; `None` = not found.
    async fn get_multiple_accounts(
        &self,
        addresses: &[Pubkey],
    ) -> Result<RpcResponse<Vec<Option<AccountInfo>>>, RpcError>;

    /// Scan every account owned by `program` that passes all `filters`.
    async fn get_program_accounts(
        &self,
        program: &Pubkey,
        filters: &[AccountFilter],
    ) -> Result<RpcResponse<Vec<KeyedAccount>>, RpcError>;

    /// Register a listener for changes to one account.
    async fn on_account_change(
        &self,
        address: &Pubkey,
        sink: NotificationSender,
    ) -> Result<ListenerId, RpcError>;

    /// Register a listener for changes to any account of `program` that
    /// passes all `filters`.
    async fn on_program_account_change(
        &self,
        program: &Pubkey,
        filters: &[AccountFilter],
        sink: NotificationSender,
    ) -> Result<ListenerId, RpcError>;

    async fn remove_listener(&self, id: ListenerId) -> Result<(), RpcError>;
}
