//! Shared periodic bulk reader.
//!
//! The `BulkAccountLoader` is responsible for:
//! - Holding registrations, each a set of addresses plus a
//!   [`LoaderMessageSender`]
//! - Running one tick loop that multi-gets the union of all registered
//!   addresses per interval and hands each registration its own slice
//! - Reacting to interval changes through its [`ConfigStore`]
//!
//! The loop starts with the first registration and stops with the last.

use super::chunk::get_multiple_chunked;
use crate::config::{ConfigStore, PollingConfig, millis};
use crate::events::{LoadedAccount, LoaderMessage, LoaderMessageSender};
use fundsync_sdk::Pubkey;
use fundsync_sdk::rpc::{AccountRpc, RpcError};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Identifies one registration with a [`BulkAccountLoader`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CallbackId(pub u64);

impl std::fmt::Display for CallbackId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct Registration {
    addresses: Vec<Pubkey>,
    sender: LoaderMessageSender,
}

#[derive(Default)]
struct LoaderState {
    next_id: u64,
    registrations: BTreeMap<CallbackId, Registration>,
    tick: Option<JoinHandle<()>>,
}

struct LoaderInner {
    rpc: Arc<dyn AccountRpc>,
    config: ConfigStore<PollingConfig>,
    state: Mutex<LoaderState>,
}

impl Drop for LoaderInner {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(tick) = state.tick.take() {
            tick.abort();
        }
    }
}

/// Cheap to clone; clones share registrations and the tick loop.
#[derive(Clone)]
pub struct BulkAccountLoader {
    inner: Arc<LoaderInner>,
}

impl BulkAccountLoader {
    pub fn new(rpc: Arc<dyn AccountRpc>, config: PollingConfig) -> Self {
        Self::with_config_store(rpc, ConfigStore::new(config))
    }

    /// Use an existing store, e.g. one the binary updates on reload.
    pub fn with_config_store(rpc: Arc<dyn AccountRpc>, config: ConfigStore<PollingConfig>) -> Self {
        Self {
            inner: Arc::new(LoaderInner {
                rpc,
                config,
                state: Mutex::new(LoaderState::default()),
            }),
        }
    }

    pub fn config(&self) -> &ConfigStore<PollingConfig> {
        &self.inner.config
    }

    fn lock(&self) -> MutexGuard<'_, LoaderState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Watch `addresses` and deliver every tick's result to `sender`.
    pub fn register(&self, addresses: Vec<Pubkey>, sender: LoaderMessageSender) -> CallbackId {
        let mut state = self.lock();
        state.next_id += 1;
        let id = CallbackId(state.next_id);
        debug!(callback = %id, addresses = addresses.len(), "bulk loader registration added");
        state.registrations.insert(id, Registration { addresses, sender });
        if state.tick.is_none() {
            state.tick = Some(spawn_tick_loop(Arc::downgrade(&self.inner)));
            info!("bulk loader started");
        }
        id
    }

    /// Add one address to a registration. Returns `false` if the
    /// registration is gone.
    pub fn add_address(&self, id: CallbackId, address: Pubkey) -> bool {
        let mut state = self.lock();
        match state.registrations.get_mut(&id) {
            Some(registration) => {
                if !registration.addresses.contains(&address) {
                    registration.addresses.push(address);
                }
                true
            }
            None => false,
        }
    }

    pub fn unregister(&self, id: CallbackId) {
        let mut state = self.lock();
        if state.registrations.remove(&id).is_none() {
            return;
        }
        debug!(callback = %id, "bulk loader registration removed");
        if state.registrations.is_empty() {
            if let Some(tick) = state.tick.take() {
                tick.abort();
                info!("bulk loader stopped, no registrations left");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.lock().tick.is_some()
    }

    /// Every watched address, deduplicated.
    pub fn addresses(&self) -> Vec<Pubkey> {
        union(&self.lock().registrations)
    }

    /// Change the interval. The running loop picks it up at once.
    pub async fn update_polling_frequency(&self, interval: Duration) {
        self.inner.config.modify(|c| c.interval = interval).await;
        info!(interval_ms = millis(interval), "polling interval updated");
    }

    /// Run one tick now.
    pub async fn load(&self) {
        tick(&self.inner).await;
    }

    /// Read `addresses` without involving registrations.
    pub async fn load_accounts(
        &self,
        addresses: &[Pubkey],
    ) -> Result<Vec<LoadedAccount>, RpcError> {
        get_multiple_chunked(self.inner.rpc.as_ref(), addresses).await
    }

    /// Drop every registration and stop the loop.
    pub fn shutdown(&self) {
        let mut state = self.lock();
        state.registrations.clear();
        if let Some(tick) = state.tick.take() {
            tick.abort();
        }
    }
}

fn union(registrations: &BTreeMap<CallbackId, Registration>) -> Vec<Pubkey> {
    let mut seen = HashSet::new();
    registrations
        .values()
        .flat_map(|r| r.addresses.iter())
        .filter(|address| seen.insert(**address))
        .copied()
        .collect()
}

fn spawn_tick_loop(inner: Weak<LoaderInner>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut watcher = match inner.upgrade() {
            Some(inner) => inner.config.subscribe(),
            None => return,
        };
        loop {
            let interval = match inner.upgrade() {
                Some(inner) => inner.config.read().await.interval,
                None => return,
            };
            tokio::select! {
                biased;

                changed = watcher.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    debug!(interval_ms = millis(interval), "interval changed, rescheduling");
                }

                _ = tokio::time::sleep(interval) => {
                    let Some(inner) = inner.upgrade() else {
                        return;
                    };
                    tick(&inner).await;
                }
            }
        }
    })
}

/// One multi-get over every registration. Each registration receives
/// either its whole slice or the error.
async fn tick(inner: &LoaderInner) {
    let (addresses, senders) = {
        let state = inner.state.lock().unwrap_or_else(PoisonError::into_inner);
        let senders: Vec<(Vec<Pubkey>, LoaderMessageSender)> = state
            .registrations
            .values()
            .map(|r| (r.addresses.clone(), r.sender.clone()))
            .collect();
        (union(&state.registrations), senders)
    };
    if addresses.is_empty() {
        return;
    }

    match get_multiple_chunked(inner.rpc.as_ref(), &addresses).await {
        Ok(loaded) => {
            let by_address: HashMap<Pubkey, LoadedAccount> =
                loaded.into_iter().map(|a| (a.address, a)).collect();
            debug!(accounts = by_address.len(), "bulk tick loaded");
            for (watched, sender) in senders {
                let batch = watched
                    .iter()
                    .filter_map(|address| by_address.get(address).cloned())
                    .collect();
                if sender.send(LoaderMessage::Batch(batch)).await.is_err() {
                    debug!("bulk loader receiver dropped");
                }
            }
        }
        Err(e) => {
            warn!(error = %e, accounts = addresses.len(), "bulk tick failed, nothing applied");
            for (_, sender) in senders {
                let _ = sender.send(LoaderMessage::Error(e.clone())).await;
            }
        }
    }
}
