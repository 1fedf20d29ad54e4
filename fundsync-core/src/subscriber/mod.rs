//! Delivery channels feeding the cache.
//!
//! Two subscribers implement the same [`AccountSubscriber`] contract:
//!
//! - [`WebSocketSubscriber`]: push notifications with a silence watchdog
//! - [`PollingSubscriber`]: periodic bulk refetch through a shared
//!   [`BulkAccountLoader`]
//!
//! Both decode through the venue's [`SchemaRegistry`] and apply to an
//! [`AccountCache`], so equivalent transitions produce identical events.

pub mod bulk_loader;
pub mod chunk;
pub mod polling;
pub mod watchdog;
pub mod websocket;

pub use bulk_loader::{BulkAccountLoader, CallbackId};
pub use polling::PollingSubscriber;
pub use websocket::WebSocketSubscriber;

use crate::cache::{AccountCache, AccountUpdate, DataAndSlot};
use crate::config::SubscriptionConfig;
use crate::events::CacheEventReceiver;
use crate::schema::{AccountKind, DecodeError, SchemaRegistry, Venue};
use async_trait::async_trait;
use bytes::Bytes;
use fundsync_sdk::Pubkey;
use fundsync_sdk::rpc::{AccountRpc, RpcError};
use std::collections::HashSet;
use std::sync::Arc;

/// Subscriber failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubscriberError {
    /// Reads and fetches need a completed `subscribe()`.
    #[error("not subscribed")]
    NotSubscribed,

    #[error("rpc error: {0}")]
    Rpc(#[from] RpcError),

    /// A tagged account could not be decoded.
    #[error("failed to decode {address}: {source}")]
    Decode {
        address: Pubkey,
        #[source]
        source: DecodeError,
    },
}

/// Common contract of the push and poll subscribers.
#[async_trait]
pub trait AccountSubscriber<V: Venue>: Send + Sync {
    /// Open channels for `config`. Initial state is loaded before this
    /// returns. A second call while subscribed is a no-op.
    async fn subscribe(&self, config: SubscriptionConfig<V::Kind>) -> Result<(), SubscriberError>;

    /// One-shot refresh of everything subscribed, without opening channels.
    async fn fetch(&self) -> Result<(), SubscriberError>;

    /// Tear down every channel and forget mirrored records. Safe to call
    /// repeatedly and before `subscribe()`.
    async fn unsubscribe(&self) -> Result<(), SubscriberError>;

    fn is_subscribed(&self) -> bool;

    fn cache(&self) -> &Arc<AccountCache<V>>;

    fn get_account(
        &self,
        address: &Pubkey,
    ) -> Result<Option<DataAndSlot<V::Account>>, SubscriberError> {
        if !self.is_subscribed() {
            return Err(SubscriberError::NotSubscribed);
        }
        Ok(self.cache().get(address))
    }

    fn get_accounts(
        &self,
        kind: V::Kind,
    ) -> Result<Vec<(Pubkey, DataAndSlot<V::Account>)>, SubscriberError> {
        if !self.is_subscribed() {
            return Err(SubscriberError::NotSubscribed);
        }
        Ok(self.cache().get_by_kind(kind))
    }

    fn events(&self) -> CacheEventReceiver<V> {
        self.cache().subscribe()
    }
}

/// Raw bytes read for a subscription, before decoding.
#[derive(Debug, Clone)]
pub(crate) struct RawAccount<K> {
    pub address: Pubkey,
    pub kind: K,
    pub slot: u64,
    pub data: Bytes,
}

/// Explicit accounts with duplicates removed, first kind wins.
pub(crate) fn unique_accounts<K: AccountKind>(config: &SubscriptionConfig<K>) -> Vec<(Pubkey, K)> {
    let mut seen = HashSet::new();
    config
        .accounts
        .iter()
        .filter(|(address, _)| seen.insert(*address))
        .copied()
        .collect()
}

pub(crate) fn unique_filters<K: AccountKind>(config: &SubscriptionConfig<K>) -> Vec<K> {
    let mut seen = HashSet::new();
    config
        .filters
        .iter()
        .filter(|kind| seen.insert(**kind))
        .copied()
        .collect()
}

/// Read the current state of everything `config` names.
///
/// Explicit accounts go through chunked multi-gets; not-found addresses are
/// dropped. Each filter costs one program scan.
pub(crate) async fn read_config<K: AccountKind>(
    rpc: &dyn AccountRpc,
    program_id: &Pubkey,
    config: &SubscriptionConfig<K>,
) -> Result<Vec<RawAccount<K>>, RpcError> {
    let accounts = unique_accounts(config);
    let addresses: Vec<Pubkey> = accounts.iter().map(|(address, _)| *address).collect();
    let loaded = chunk::get_multiple_chunked(rpc, &addresses).await?;

    let mut raw: Vec<RawAccount<K>> = loaded
        .into_iter()
        .zip(accounts)
        .filter_map(|(loaded, (_, kind))| {
            Some(RawAccount {
                address: loaded.address,
                kind,
                slot: loaded.slot,
                data: loaded.data?,
            })
        })
        .collect();

    for kind in unique_filters(config) {
        let scanned = chunk::scan_kind(rpc, program_id, kind).await?;
        raw.extend(scanned.value.into_iter().map(|keyed| RawAccount {
            address: keyed.address,
            kind,
            slot: scanned.slot,
            data: keyed.account.data,
        }));
    }
    Ok(raw)
}

/// Decode raw bytes into a cache candidate, reporting failures.
///
/// Short and unknown payloads are logged and skipped; a malformed body is
/// also published as an error event.
pub(crate) fn decode_update<V: Venue>(
    registry: &SchemaRegistry<V>,
    cache: &AccountCache<V>,
    address: Pubkey,
    expected: Option<V::Kind>,
    data: &[u8],
    slot: u64,
) -> Option<AccountUpdate<V>> {
    let decoded = match expected {
        Some(kind) => registry.decode_as(kind, data),
        None => registry.decode_tagged(data).map(|(_, account)| account),
    };
    match decoded {
        Ok(data) => Some(AccountUpdate {
            address,
            data,
            slot,
        }),
        Err(err) => {
            report_decode_failure(cache, address, err);
            None
        }
    }
}

fn report_decode_failure<V: Venue>(cache: &AccountCache<V>, address: Pubkey, err: DecodeError) {
    match &err {
        DecodeError::TooShort { len } => {
            tracing::warn!(%address, len, "account data shorter than tag, skipped");
        }
        DecodeError::UnknownDiscriminator(tag) => {
            tracing::debug!(%address, %tag, "unknown account tag, skipped");
        }
        DecodeError::DiscriminatorMismatch { .. } => {
            tracing::warn!(%address, error = %err, "account kind changed, skipped");
        }
        DecodeError::Malformed { .. } => {
            tracing::warn!(%address, error = %err, "malformed account, skipped");
            cache.emit_error(SubscriberError::Decode {
                address,
                source: err,
            });
        }
    }
}

/// Decode and apply raw accounts as one batch. Returns how many were accepted.
pub(crate) fn apply_raw<V: Venue>(
    registry: &SchemaRegistry<V>,
    cache: &AccountCache<V>,
    raw: Vec<RawAccount<V::Kind>>,
) -> usize {
    let updates: Vec<AccountUpdate<V>> = raw
        .into_iter()
        .filter_map(|r| decode_update(registry, cache, r.address, Some(r.kind), &r.data, r.slot))
        .collect();
    cache.apply_batch(updates)
}
