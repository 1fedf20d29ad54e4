//! Scripted in-memory [`AccountRpc`] for tests.

use async_trait::async_trait;
use bytes::Bytes;
use fundsync_sdk::Pubkey;
use fundsync_sdk::objects::AccountLayout;
use fundsync_sdk::objects::drift::{Vault, VaultDepositor};
use fundsync_sdk::rpc::{
    AccountFilter, AccountInfo, AccountNotification, AccountRpc, KeyedAccount, ListenerId,
    NotificationSender, RpcError, RpcResponse,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

pub(crate) fn key(n: u32) -> Pubkey {
    let mut bytes = [0u8; 32];
    bytes[..4].copy_from_slice(&n.to_le_bytes());
    bytes[31] = 0xEE;
    Pubkey::new_from_array(bytes)
}

pub(crate) fn depositor_data(address: &Pubkey, shares: u128) -> Vec<u8> {
    VaultDepositor {
        pubkey: *address,
        vault_shares: shares,
        ..Default::default()
    }
    .to_account_data()
    .unwrap()
}

pub(crate) fn vault_data(address: &Pubkey, total_shares: u128) -> Vec<u8> {
    Vault {
        pubkey: *address,
        total_shares,
        ..Default::default()
    }
    .to_account_data()
    .unwrap()
}

#[derive(Debug, Clone)]
enum Target {
    Account(Pubkey),
    Program(Vec<AccountFilter>),
}

#[derive(Default)]
struct MockState {
    slot: u64,
    accounts: HashMap<Pubkey, Bytes>,
    failing: HashSet<Pubkey>,
    fail_scans: bool,
    multi_calls: Vec<usize>,
    scans: usize,
    next_listener: u64,
    listeners: HashMap<ListenerId, (Target, NotificationSender)>,
    account_subscribes: usize,
    program_subscribes: usize,
    removed: Vec<ListenerId>,
}

/// Records every call; lets tests push notifications and inject failures.
#[derive(Default)]
pub(crate) struct MockRpc {
    state: Mutex<MockState>,
}

impl MockRpc {
    pub fn new() -> Arc<Self> {
        let rpc = Self::default();
        rpc.lock().slot = 1;
        Arc::new(rpc)
    }

    pub fn program_id() -> Pubkey {
        Pubkey::new_from_array([0xABu8; 32])
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_slot(&self, slot: u64) {
        self.lock().slot = slot;
    }

    pub fn put(&self, address: Pubkey, data: Vec<u8>) {
        self.lock().accounts.insert(address, Bytes::from(data));
    }

    pub fn remove(&self, address: &Pubkey) {
        self.lock().accounts.remove(address);
    }

    /// Any multi-get including `address` fails until [`clear_failures`](Self::clear_failures).
    pub fn fail_on(&self, address: Pubkey) {
        self.lock().failing.insert(address);
    }

    pub fn fail_scans(&self, fail: bool) {
        self.lock().fail_scans = fail;
    }

    pub fn clear_failures(&self) {
        self.lock().failing.clear();
    }

    pub fn multi_call_sizes(&self) -> Vec<usize> {
        self.lock().multi_calls.clone()
    }

    pub fn reset_calls(&self) {
        let mut state = self.lock();
        state.multi_calls.clear();
        state.scans = 0;
    }

    pub fn scans(&self) -> usize {
        self.lock().scans
    }

    pub fn account_subscribes(&self) -> usize {
        self.lock().account_subscribes
    }

    pub fn program_subscribes(&self) -> usize {
        self.lock().program_subscribes
    }

    pub fn active_listeners(&self) -> usize {
        self.lock().listeners.len()
    }

    pub fn removed_listeners(&self) -> Vec<ListenerId> {
        self.lock().removed.clone()
    }

    /// Push `data` for `address` at `slot` to every matching listener.
    /// Returns how many listeners it reached.
    pub fn push(&self, address: Pubkey, data: Vec<u8>, slot: u64) -> usize {
        let data = Bytes::from(data);
        let state = self.lock();
        let mut delivered = 0;
        for (id, (target, sink)) in &state.listeners {
            let matches = match target {
                Target::Account(a) => *a == address,
                Target::Program(filters) => filters.iter().all(|f| f.matches(&data)),
            };
            if !matches {
                continue;
            }
            let notification = AccountNotification {
                listener: *id,
                address,
                account: info(data.clone()),
                slot,
            };
            if sink.try_send(notification).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }
}

fn info(data: Bytes) -> AccountInfo {
    AccountInfo {
        lamports: 1,
        owner: MockRpc::program_id(),
        data,
    }
}

#[async_trait]
impl AccountRpc for MockRpc {
    async fn get_slot(&self) -> Result<u64, RpcError> {
        Ok(self.lock().slot)
    }

    async fn get_account_info(
        &self,
        address: &Pubkey,
    ) -> Result<RpcResponse<Option<AccountInfo>>, RpcError> {
        let state = self.lock();
        Ok(RpcResponse {
            slot: state.slot,
            value: state.accounts.get(address).cloned().map(info),
        })
    }

    async fn get_multiple_accounts(
        &self,
        addresses: &[Pubkey],
    ) -> Result<RpcResponse<Vec<Option<AccountInfo>>>, RpcError> {
        let mut state = self.lock();
        state.multi_calls.push(addresses.len());
        if addresses.iter().any(|a| state.failing.contains(a)) {
            return Err(RpcError::Transport("injected failure".into()));
        }
        Ok(RpcResponse {
            slot: state.slot,
            value: addresses
                .iter()
                .map(|a| state.accounts.get(a).cloned().map(info))
                .collect(),
        })
    }

    async fn get_program_accounts(
        &self,
        _program: &Pubkey,
        filters: &[AccountFilter],
    ) -> Result<RpcResponse<Vec<KeyedAccount>>, RpcError> {
        let mut state = self.lock();
        state.scans += 1;
        if state.fail_scans {
            return Err(RpcError::Transport("injected scan failure".into()));
        }
        // Ignore server-side filters so the client-side check is exercised.
        let _ = filters;
        Ok(RpcResponse {
            slot: state.slot,
            value: state
                .accounts
                .iter()
                .map(|(address, data)| KeyedAccount {
                    address: *address,
                    account: info(data.clone()),
                })
                .collect(),
        })
    }

    async fn on_account_change(
        &self,
        address: &Pubkey,
        sink: NotificationSender,
    ) -> Result<ListenerId, RpcError> {
        let mut state = self.lock();
        state.next_listener += 1;
        state.account_subscribes += 1;
        let id = ListenerId(state.next_listener);
        state.listeners.insert(id, (Target::Account(*address), sink));
        Ok(id)
    }

    async fn on_program_account_change(
        &self,
        _program: &Pubkey,
        filters: &[AccountFilter],
        sink: NotificationSender,
    ) -> Result<ListenerId, RpcError> {
        let mut state = self.lock();
        state.next_listener += 1;
        state.program_subscribes += 1;
        let id = ListenerId(state.next_listener);
        state
            .listeners
            .insert(id, (Target::Program(filters.to_vec()), sink));
        Ok(id)
    }

    async fn remove_listener(&self, id: ListenerId) -> Result<(), RpcError> {
        let mut state = self.lock();
        state.removed.push(id);
        match state.listeners.remove(&id) {
            Some(_) => Ok(()),
            None => Err(RpcError::ListenerNotFound(id)),
        }
    }
}
