//! Event type definitions.
//!
//! Events are ephemeral. A per-kind `Account` event carries the record
//! that was just accepted; `Changed` only says that something changed, so
//! generic listeners re-read the cache for the current state.

use crate::schema::Venue;
use crate::subscriber::SubscriberError;
use fundsync_sdk::Pubkey;
use fundsync_sdk::rpc::RpcError;

/// Everything the cache publishes.
///
/// For one accepted update, `Account` is always sent before `Changed`.
#[derive(Debug, Clone)]
pub enum CacheEvent<V: Venue> {
    /// A record of `kind` was accepted at `slot`.
    Account {
        address: Pubkey,
        kind: V::Kind,
        data: V::Account,
        slot: u64,
    },
    /// The cache content changed.
    Changed,
    /// A fetch, tick or decode failed. The cache was left as it was.
    Error(SubscriberError),
}

impl<V: Venue> CacheEvent<V> {
    pub fn kind(&self) -> Option<V::Kind> {
        match self {
            CacheEvent::Account { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

/// Account data as read by the bulk loader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedAccount {
    pub address: Pubkey,
    /// Slot of the multi-get chunk this account came from.
    pub slot: u64,
    /// `None` when the account does not exist.
    pub data: Option<bytes::Bytes>,
}

/// What the bulk loader delivers to each registration per tick.
///
/// A tick is delivered whole: either every watched account of the
/// registration, or the error that stopped the tick.
#[derive(Debug, Clone)]
pub enum LoaderMessage {
    Batch(Vec<LoadedAccount>),
    Error(RpcError),
}
