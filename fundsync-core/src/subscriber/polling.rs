//! Poll subscriber: a registration with a shared [`BulkAccountLoader`] plus
//! a pump applying each delivered tick to the cache.

use super::bulk_loader::{BulkAccountLoader, CallbackId};
use super::chunk::scan_kind;
use super::{AccountSubscriber, SubscriberError, decode_update, unique_accounts, unique_filters};
use crate::cache::{AccountCache, AccountUpdate};
use crate::config::SubscriptionConfig;
use crate::events::{LoadedAccount, LoaderMessage, LoaderMessageReceiver, loader_message_channel};
use crate::schema::{SchemaRegistry, Venue};
use async_trait::async_trait;
use fundsync_sdk::Pubkey;
use fundsync_sdk::rpc::{AccountRpc, RpcError};
use kanau::processor::Processor;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

type Kinds<K> = Arc<RwLock<HashMap<Pubkey, K>>>;

/// Applies one loader delivery as a single cache batch.
struct BatchApplier<V: Venue> {
    kinds: Kinds<V::Kind>,
    registry: Arc<SchemaRegistry<V>>,
    cache: Arc<AccountCache<V>>,
}

impl<V: Venue> Processor<LoaderMessage> for BatchApplier<V> {
    type Output = usize;
    type Error = SubscriberError;

    async fn process(&self, message: LoaderMessage) -> Result<usize, SubscriberError> {
        match message {
            LoaderMessage::Batch(batch) => Ok(self.apply(batch)),
            LoaderMessage::Error(e) => {
                let err = SubscriberError::from(e);
                self.cache.emit_error(err.clone());
                Err(err)
            }
        }
    }
}

impl<V: Venue> BatchApplier<V> {
    fn apply(&self, batch: Vec<LoadedAccount>) -> usize {
        let updates: Vec<AccountUpdate<V>> = {
            let kinds = self.kinds.read().unwrap_or_else(PoisonError::into_inner);
            batch
                .into_iter()
                .filter_map(|loaded| {
                    let data = loaded.data?;
                    let kind = kinds.get(&loaded.address).copied();
                    decode_update(
                        &self.registry,
                        &self.cache,
                        loaded.address,
                        kind,
                        &data,
                        loaded.slot,
                    )
                })
                .collect()
        };
        self.cache.apply_batch(updates)
    }
}

struct PollState<K> {
    kinds: Kinds<K>,
    registration: Option<CallbackId>,
    pump: Option<JoinHandle<()>>,
}

impl<K> Drop for PollState<K> {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}

/// Poll-based [`AccountSubscriber`].
pub struct PollingSubscriber<V: Venue> {
    rpc: Arc<dyn AccountRpc>,
    program_id: Pubkey,
    registry: Arc<SchemaRegistry<V>>,
    cache: Arc<AccountCache<V>>,
    loader: BulkAccountLoader,
    subscribed: AtomicBool,
    state: Mutex<PollState<V::Kind>>,
}

impl<V: Venue> PollingSubscriber<V> {
    pub fn new(rpc: Arc<dyn AccountRpc>, program_id: Pubkey, loader: BulkAccountLoader) -> Self {
        Self::with_cache(rpc, program_id, loader, Arc::new(AccountCache::new()))
    }

    pub fn with_cache(
        rpc: Arc<dyn AccountRpc>,
        program_id: Pubkey,
        loader: BulkAccountLoader,
        cache: Arc<AccountCache<V>>,
    ) -> Self {
        Self {
            rpc,
            program_id,
            registry: Arc::new(SchemaRegistry::new()),
            cache,
            loader,
            subscribed: AtomicBool::new(false),
            state: Mutex::new(PollState {
                kinds: Arc::new(RwLock::new(HashMap::new())),
                registration: None,
                pump: None,
            }),
        }
    }

    pub fn loader(&self) -> &BulkAccountLoader {
        &self.loader
    }

    fn applier(&self, kinds: &Kinds<V::Kind>) -> BatchApplier<V> {
        BatchApplier {
            kinds: kinds.clone(),
            registry: self.registry.clone(),
            cache: self.cache.clone(),
        }
    }

    /// Watch one more explicit address. Its current state is loaded before
    /// this returns. Already watched addresses are left alone.
    pub async fn add_account(&self, address: Pubkey, kind: V::Kind) -> Result<(), SubscriberError> {
        if !self.subscribed.load(Ordering::SeqCst) {
            return Err(SubscriberError::NotSubscribed);
        }
        let state = self.state.lock().await;
        {
            let mut kinds = state.kinds.write().unwrap_or_else(PoisonError::into_inner);
            if kinds.contains_key(&address) {
                return Ok(());
            }
            kinds.insert(address, kind);
        }
        if let Some(id) = state.registration {
            self.loader.add_address(id, address);
        }
        let loaded = self.loader.load_accounts(&[address]).await;
        self.deliver(&state.kinds, loaded).await?;
        Ok(())
    }

    /// Resolve filters to addresses with one scan per kind.
    async fn resolve(
        &self,
        config: &SubscriptionConfig<V::Kind>,
    ) -> Result<(HashMap<Pubkey, V::Kind>, Vec<LoadedAccount>), RpcError> {
        let mut kinds: HashMap<Pubkey, V::Kind> = HashMap::new();
        let mut scanned = Vec::new();
        for kind in unique_filters(config) {
            let response = scan_kind(self.rpc.as_ref(), &self.program_id, kind).await?;
            for keyed in response.value {
                kinds.entry(keyed.address).or_insert(kind);
                scanned.push(LoadedAccount {
                    address: keyed.address,
                    slot: response.slot,
                    data: Some(keyed.account.data),
                });
            }
        }

        let explicit: Vec<Pubkey> = unique_accounts(config)
            .into_iter()
            .filter(|(address, kind)| {
                let fresh = !kinds.contains_key(address);
                if fresh {
                    kinds.insert(*address, *kind);
                }
                fresh
            })
            .map(|(address, _)| address)
            .collect();
        let mut loaded = self.loader.load_accounts(&explicit).await?;
        loaded.extend(scanned);
        Ok((kinds, loaded))
    }

    async fn deliver(
        &self,
        kinds: &Kinds<V::Kind>,
        loaded: Result<Vec<LoadedAccount>, RpcError>,
    ) -> Result<usize, SubscriberError> {
        let message = match loaded {
            Ok(batch) => LoaderMessage::Batch(batch),
            Err(e) => LoaderMessage::Error(e),
        };
        self.applier(kinds).process(message).await
    }

    fn spawn_pump(&self, kinds: &Kinds<V::Kind>, mut rx: LoaderMessageReceiver) -> JoinHandle<()> {
        let applier = self.applier(kinds);
        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                match applier.process(message).await {
                    Ok(accepted) => tracing::trace!(venue = V::NAME, accepted, "poll tick applied"),
                    Err(e) => tracing::debug!(venue = V::NAME, error = %e, "poll tick dropped"),
                }
            }
        })
    }
}

#[async_trait]
impl<V: Venue> AccountSubscriber<V> for PollingSubscriber<V> {
    async fn subscribe(&self, config: SubscriptionConfig<V::Kind>) -> Result<(), SubscriberError> {
        let mut state = self.state.lock().await;
        if self.subscribed.load(Ordering::SeqCst) {
            tracing::debug!(venue = V::NAME, "already subscribed");
            return Ok(());
        }

        let (kinds, loaded) = match self.resolve(&config).await {
            Ok(resolved) => resolved,
            Err(e) => {
                let err = SubscriberError::from(e);
                self.cache.emit_error(err.clone());
                return Err(err);
            }
        };
        let addresses: Vec<Pubkey> = kinds.keys().copied().collect();
        *state.kinds.write().unwrap_or_else(PoisonError::into_inner) = kinds;
        self.deliver(&state.kinds, Ok(loaded)).await?;

        let (tx, rx) = loader_message_channel();
        let watched = addresses.len();
        state.registration = Some(self.loader.register(addresses, tx));
        let pump = self.spawn_pump(&state.kinds, rx);
        if let Some(old) = state.pump.replace(pump) {
            old.abort();
        }
        self.subscribed.store(true, Ordering::SeqCst);

        tracing::info!(venue = V::NAME, watched, "poll subscription open");
        Ok(())
    }

    async fn fetch(&self) -> Result<(), SubscriberError> {
        if !self.subscribed.load(Ordering::SeqCst) {
            return Err(SubscriberError::NotSubscribed);
        }
        let state = self.state.lock().await;
        let addresses: Vec<Pubkey> = state
            .kinds
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect();
        let loaded = self.loader.load_accounts(&addresses).await;
        self.deliver(&state.kinds, loaded).await?;
        Ok(())
    }

    async fn unsubscribe(&self) -> Result<(), SubscriberError> {
        let mut state = self.state.lock().await;
        if let Some(id) = state.registration.take() {
            self.loader.unregister(id);
        }
        if let Some(pump) = state.pump.take() {
            pump.abort();
        }
        state
            .kinds
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        if self.subscribed.swap(false, Ordering::SeqCst) {
            self.cache.clear();
            tracing::info!(venue = V::NAME, "poll subscription closed");
        }
        Ok(())
    }

    fn is_subscribed(&self) -> bool {
        self.subscribed.load(Ordering::SeqCst)
    }

    fn cache(&self) -> &Arc<AccountCache<V>> {
        &self.cache
    }
}
