//! The authoritative account mirror of one subscriber.
//!
//! [`AccountCache`] serializes every mutation through one write lock and
//! emits the per-kind [`CacheEvent::Account`] followed by
//! [`CacheEvent::Changed`] before releasing it, so no listener can observe
//! the generic signal ahead of the record that caused it.

mod store;

pub use store::{CacheStore, CachedAccount, DataAndSlot};

use crate::events::{CacheEvent, CacheEventReceiver, CacheEventSender, cache_event_channel};
use crate::schema::Venue;
use crate::subscriber::SubscriberError;
use fundsync_sdk::Pubkey;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// A candidate record for the cache.
#[derive(Debug, Clone)]
pub struct AccountUpdate<V: Venue> {
    pub address: Pubkey,
    pub data: V::Account,
    pub slot: u64,
}

pub struct AccountCache<V: Venue> {
    store: RwLock<CacheStore<V>>,
    events: CacheEventSender<V>,
}

impl<V: Venue> Default for AccountCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Venue> AccountCache<V> {
    pub fn new() -> Self {
        Self {
            store: RwLock::new(CacheStore::default()),
            events: cache_event_channel(),
        }
    }

    /// Attach a new listener to the event bus.
    pub fn subscribe(&self) -> CacheEventReceiver<V> {
        self.events.subscribe()
    }

    /// Apply one candidate. Returns whether it was accepted.
    pub fn apply(&self, update: AccountUpdate<V>) -> bool {
        let mut store = self.write();
        self.apply_locked(&mut store, update)
    }

    /// Apply candidates as one unit; readers never see a partial batch.
    /// Returns how many were accepted.
    pub fn apply_batch(&self, updates: impl IntoIterator<Item = AccountUpdate<V>>) -> usize {
        let mut store = self.write();
        let mut accepted = 0;
        for update in updates {
            if self.apply_locked(&mut store, update) {
                accepted += 1;
            }
        }
        accepted
    }

    fn apply_locked(&self, store: &mut CacheStore<V>, update: AccountUpdate<V>) -> bool {
        let AccountUpdate {
            address,
            data,
            slot,
        } = update;
        let kind = V::kind_of(&data);
        if !store.apply(address, data.clone(), slot) {
            tracing::trace!(%address, slot, "stale update ignored");
            return false;
        }
        // No receivers is fine.
        let _ = self.events.send(CacheEvent::Account {
            address,
            kind,
            data,
            slot,
        });
        let _ = self.events.send(CacheEvent::Changed);
        true
    }

    /// Publish a failure. The cache itself is untouched.
    pub fn emit_error(&self, error: SubscriberError) {
        let _ = self.events.send(CacheEvent::Error(error));
    }

    pub fn get(&self, address: &Pubkey) -> Option<DataAndSlot<V::Account>> {
        self.read().get(address).map(|c| c.record.clone())
    }

    pub fn slot(&self, address: &Pubkey) -> Option<u64> {
        self.read().slot(address)
    }

    pub fn get_by_kind(&self, kind: V::Kind) -> Vec<(Pubkey, DataAndSlot<V::Account>)> {
        self.read()
            .by_kind(kind)
            .map(|(address, c)| (*address, c.record.clone()))
            .collect()
    }

    /// Run `f` against a consistent view of the whole cache.
    pub fn with_store<R>(&self, f: impl FnOnce(&CacheStore<V>) -> R) -> R {
        f(&self.read())
    }

    pub fn remove(&self, addresses: &[Pubkey]) {
        let mut store = self.write();
        for address in addresses {
            store.remove(address);
        }
    }

    pub fn clear(&self) {
        self.write().clear();
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> RwLockReadGuard<'_, CacheStore<V>> {
        self.store.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, CacheStore<V>> {
        self.store.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{DriftAccount, DriftAccountKind, DriftVaults};
    use fundsync_sdk::objects::drift::VaultDepositor;

    fn update(address: Pubkey, shares: u128, slot: u64) -> AccountUpdate<DriftVaults> {
        AccountUpdate {
            address,
            data: DriftAccount::VaultDepositor(Box::new(VaultDepositor {
                vault_shares: shares,
                ..Default::default()
            })),
            slot,
        }
    }

    #[test]
    fn test_account_event_precedes_changed() {
        let cache = AccountCache::<DriftVaults>::new();
        let mut rx = cache.subscribe();
        let address = Pubkey::new_from_array([1u8; 32]);

        assert!(cache.apply(update(address, 5, 10)));
        match rx.try_recv().unwrap() {
            CacheEvent::Account {
                address: a,
                kind,
                slot,
                ..
            } => {
                assert_eq!(a, address);
                assert_eq!(kind, DriftAccountKind::VaultDepositor);
                assert_eq!(slot, 10);
            }
            other => panic!("expected account event, got {other:?}"),
        }
        assert!(matches!(rx.try_recv().unwrap(), CacheEvent::Changed));
    }

    #[test]
    fn test_stale_update_emits_nothing() {
        let cache = AccountCache::<DriftVaults>::new();
        let address = Pubkey::new_from_array([1u8; 32]);
        cache.apply(update(address, 5, 10));

        let mut rx = cache.subscribe();
        assert!(!cache.apply(update(address, 6, 9)));
        assert!(rx.try_recv().is_err());
        assert_eq!(cache.slot(&address), Some(10));
    }

    #[test]
    fn test_batch_counts_accepted() {
        let cache = AccountCache::<DriftVaults>::new();
        let a = Pubkey::new_from_array([1u8; 32]);
        let b = Pubkey::new_from_array([2u8; 32]);
        cache.apply(update(a, 1, 50));
        let accepted = cache.apply_batch([update(a, 2, 40), update(b, 3, 40)]);
        assert_eq!(accepted, 1);
        assert_eq!(cache.get_by_kind(DriftAccountKind::VaultDepositor).len(), 2);
    }
}
