//! Address-keyed record map with the monotonic slot rule.

use crate::schema::Venue;
use fundsync_sdk::Pubkey;
use std::collections::HashMap;

/// A record together with the slot it was observed at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataAndSlot<T> {
    pub data: T,
    pub slot: u64,
}

#[derive(Debug, Clone)]
pub struct CachedAccount<V: Venue> {
    pub kind: V::Kind,
    pub record: DataAndSlot<V::Account>,
}

/// Plain storage. Locking and event emission live in
/// [`AccountCache`](super::AccountCache).
#[derive(Debug)]
pub struct CacheStore<V: Venue> {
    records: HashMap<Pubkey, CachedAccount<V>>,
}

impl<V: Venue> Default for CacheStore<V> {
    fn default() -> Self {
        Self {
            records: HashMap::new(),
        }
    }
}

impl<V: Venue> CacheStore<V> {
    /// Store `data` unless a record at the same or a later slot is held.
    ///
    /// Returns whether the candidate was accepted.
    pub fn apply(&mut self, address: Pubkey, data: V::Account, slot: u64) -> bool {
        if let Some(existing) = self.records.get(&address) {
            if existing.record.slot >= slot {
                return false;
            }
        }
        let kind = V::kind_of(&data);
        self.records.insert(
            address,
            CachedAccount {
                kind,
                record: DataAndSlot { data, slot },
            },
        );
        true
    }

    pub fn get(&self, address: &Pubkey) -> Option<&CachedAccount<V>> {
        self.records.get(address)
    }

    pub fn slot(&self, address: &Pubkey) -> Option<u64> {
        self.records.get(address).map(|c| c.record.slot)
    }

    pub fn by_kind(&self, kind: V::Kind) -> impl Iterator<Item = (&Pubkey, &CachedAccount<V>)> {
        self.records.iter().filter(move |(_, c)| c.kind == kind)
    }

    pub fn remove(&mut self, address: &Pubkey) -> Option<CachedAccount<V>> {
        self.records.remove(address)
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{DriftAccount, DriftAccountKind, DriftVaults};
    use fundsync_sdk::objects::drift::VaultDepositor;

    fn depositor(shares: u128) -> DriftAccount {
        DriftAccount::VaultDepositor(Box::new(VaultDepositor {
            vault_shares: shares,
            ..Default::default()
        }))
    }

    #[test]
    fn test_any_delivery_order_keeps_highest_slot() {
        let address = Pubkey::new_from_array([1u8; 32]);
        let orders: [[u64; 4]; 3] = [[1, 2, 3, 4], [4, 3, 2, 1], [2, 4, 1, 3]];
        for order in orders {
            let mut store = CacheStore::<DriftVaults>::default();
            for slot in order {
                store.apply(address, depositor(slot as u128 * 10), slot);
            }
            let cached = store.get(&address).unwrap();
            assert_eq!(cached.record.slot, 4);
            assert_eq!(cached.record.data, depositor(40));
        }
    }

    #[test]
    fn test_equal_slot_is_stale() {
        let address = Pubkey::new_from_array([1u8; 32]);
        let mut store = CacheStore::<DriftVaults>::default();
        assert!(store.apply(address, depositor(1), 10));
        assert!(!store.apply(address, depositor(2), 10));
        assert!(!store.apply(address, depositor(3), 9));
        assert_eq!(store.get(&address).unwrap().record.data, depositor(1));
    }

    #[test]
    fn test_by_kind() {
        let mut store = CacheStore::<DriftVaults>::default();
        store.apply(Pubkey::new_from_array([1u8; 32]), depositor(1), 1);
        store.apply(
            Pubkey::new_from_array([2u8; 32]),
            DriftAccount::Vault(Box::default()),
            1,
        );
        assert_eq!(store.by_kind(DriftAccountKind::VaultDepositor).count(), 1);
        assert_eq!(store.by_kind(DriftAccountKind::Vault).count(), 1);
        assert_eq!(store.by_kind(DriftAccountKind::VaultProtocol).count(), 0);
    }
}
