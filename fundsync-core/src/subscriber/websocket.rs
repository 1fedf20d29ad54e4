//! Push subscriber.
//!
//! One listener per explicit address and one program-wide listener per
//! filtered kind, all feeding a single notification channel. A pump task
//! decodes notifications into the cache; a [`Watchdog`] tears everything
//! down and rebuilds it when the channel goes quiet.

use super::watchdog::{Heartbeat, Watchdog};
use super::{
    AccountSubscriber, SubscriberError, apply_raw, decode_update, read_config, unique_accounts,
    unique_filters,
};
use crate::cache::AccountCache;
use crate::config::{ResubOpts, SubscriptionConfig, millis};
use crate::schema::{AccountKind, SchemaRegistry, Venue};
use async_trait::async_trait;
use fundsync_sdk::rpc::{
    AccountNotification, AccountRpc, ListenerId, NotificationReceiver, notification_channel,
};
use fundsync_sdk::{DISCRIMINATOR_LEN, Pubkey};
use kanau::processor::Processor;
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy)]
enum Route<K> {
    Account { address: Pubkey, kind: K },
    Program { kind: K },
}

type Routes<K> = Arc<RwLock<HashMap<ListenerId, Route<K>>>>;

/// Push-based [`AccountSubscriber`].
pub struct WebSocketSubscriber<V: Venue> {
    inner: Arc<PushInner<V>>,
}

struct PushInner<V: Venue> {
    rpc: Arc<dyn AccountRpc>,
    program_id: Pubkey,
    registry: Arc<SchemaRegistry<V>>,
    cache: Arc<AccountCache<V>>,
    resub: ResubOpts,
    subscribed: AtomicBool,
    unsubscribing: AtomicBool,
    resubscribing: AtomicBool,
    channel: Mutex<PushChannel<V>>,
}

struct PushChannel<V: Venue> {
    config: SubscriptionConfig<V::Kind>,
    routes: Routes<V::Kind>,
    heartbeat: Heartbeat,
    pump: Option<JoinHandle<()>>,
    watchdog: Option<Watchdog>,
}

impl<V: Venue> Drop for PushChannel<V> {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}

/// Applies notifications to the cache.
struct NotificationApplier<V: Venue> {
    routes: Routes<V::Kind>,
    registry: Arc<SchemaRegistry<V>>,
    cache: Arc<AccountCache<V>>,
    heartbeat: Heartbeat,
}

impl<V: Venue> Processor<AccountNotification> for NotificationApplier<V> {
    type Output = bool;
    type Error = Infallible;

    async fn process(&self, notification: AccountNotification) -> Result<bool, Infallible> {
        self.heartbeat.beat();

        let route = self
            .routes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&notification.listener)
            .copied();
        let AccountNotification {
            listener,
            address,
            account,
            slot,
        } = notification;

        let kind = match route {
            None => {
                tracing::trace!(%listener, "notification from retired listener");
                return Ok(false);
            }
            Some(Route::Account {
                address: expected,
                kind,
            }) => {
                if expected != address {
                    tracing::warn!(
                        %listener,
                        %expected,
                        %address,
                        "notification for wrong address"
                    );
                    return Ok(false);
                }
                kind
            }
            Some(Route::Program { kind }) => {
                // Other kinds of the same program are not ours.
                if account.data.len() >= DISCRIMINATOR_LEN
                    && !kind.discriminator().matches(&account.data)
                {
                    return Ok(false);
                }
                kind
            }
        };

        let Some(update) = decode_update(
            &self.registry,
            &self.cache,
            address,
            Some(kind),
            &account.data,
            slot,
        ) else {
            return Ok(false);
        };
        Ok(self.cache.apply(update))
    }
}

impl<V: Venue> WebSocketSubscriber<V> {
    pub fn new(rpc: Arc<dyn AccountRpc>, program_id: Pubkey, resub: ResubOpts) -> Self {
        Self::with_cache(rpc, program_id, resub, Arc::new(AccountCache::new()))
    }

    /// Build on an existing cache, e.g. one shared with an aggregator.
    pub fn with_cache(
        rpc: Arc<dyn AccountRpc>,
        program_id: Pubkey,
        resub: ResubOpts,
        cache: Arc<AccountCache<V>>,
    ) -> Self {
        Self {
            inner: Arc::new(PushInner {
                rpc,
                program_id,
                registry: Arc::new(SchemaRegistry::new()),
                cache,
                resub,
                subscribed: AtomicBool::new(false),
                unsubscribing: AtomicBool::new(false),
                resubscribing: AtomicBool::new(false),
                channel: Mutex::new(PushChannel {
                    config: SubscriptionConfig::default(),
                    routes: Arc::new(RwLock::new(HashMap::new())),
                    heartbeat: Heartbeat::default(),
                    pump: None,
                    watchdog: None,
                }),
            }),
        }
    }

    /// Number of listeners currently registered with the remote.
    pub async fn listener_count(&self) -> usize {
        let channel = self.inner.channel.lock().await;
        channel
            .routes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl<V: Venue> PushInner<V> {
    /// Register listeners and load initial state. On failure everything
    /// registered so far is removed again.
    async fn connect(&self, channel: &mut PushChannel<V>) -> Result<(), SubscriberError> {
        let (sink, rx) = notification_channel();
        self.spawn_pump(channel, rx);

        if let Err(e) = self.register_listeners(channel, sink).await {
            self.teardown(channel).await;
            return Err(e);
        }

        match read_config(self.rpc.as_ref(), &self.program_id, &channel.config).await {
            Ok(raw) => {
                let accepted = apply_raw(&self.registry, &self.cache, raw);
                tracing::debug!(venue = V::NAME, accepted, "initial push state loaded");
                Ok(())
            }
            Err(e) => {
                self.teardown(channel).await;
                Err(e.into())
            }
        }
    }

    fn spawn_pump(&self, channel: &mut PushChannel<V>, mut rx: NotificationReceiver) {
        let applier = NotificationApplier {
            routes: channel.routes.clone(),
            registry: self.registry.clone(),
            cache: self.cache.clone(),
            heartbeat: channel.heartbeat.clone(),
        };
        let pump = tokio::spawn(async move {
            while let Some(notification) = rx.recv().await {
                let _ = applier.process(notification).await;
            }
        });
        if let Some(old) = channel.pump.replace(pump) {
            old.abort();
        }
    }

    async fn register_listeners(
        &self,
        channel: &mut PushChannel<V>,
        sink: fundsync_sdk::rpc::NotificationSender,
    ) -> Result<(), SubscriberError> {
        for (address, kind) in unique_accounts(&channel.config) {
            let id = self.rpc.on_account_change(&address, sink.clone()).await?;
            channel
                .routes
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(id, Route::Account { address, kind });
        }
        for kind in unique_filters(&channel.config) {
            let id = self
                .rpc
                .on_program_account_change(&self.program_id, &[kind.filter()], sink.clone())
                .await?;
            channel
                .routes
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(id, Route::Program { kind });
        }
        Ok(())
    }

    /// Remove every listener and stop the pump. Each listener id is removed
    /// once even if it served many addresses.
    async fn teardown(&self, channel: &mut PushChannel<V>) {
        channel.watchdog = None;
        let ids: Vec<ListenerId> = channel
            .routes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(id, _)| id)
            .collect();
        for id in ids {
            if let Err(e) = self.rpc.remove_listener(id).await {
                tracing::warn!(listener = %id, error = %e, "failed to remove listener");
            }
        }
        if let Some(pump) = channel.pump.take() {
            pump.abort();
        }
    }

    fn arm_watchdog(self: &Arc<Self>, channel: &mut PushChannel<V>) {
        let Some(timeout) = self.resub.resub_timeout else {
            return;
        };
        let weak: Weak<Self> = Arc::downgrade(self);
        channel.watchdog = Some(Watchdog::spawn(
            timeout,
            channel.heartbeat.clone(),
            move || {
                if let Some(inner) = weak.upgrade() {
                    tokio::spawn(async move { inner.resubscribe().await });
                }
            },
        ));
    }

    fn resubscribe_allowed(&self) -> bool {
        self.subscribed.load(Ordering::SeqCst) && !self.unsubscribing.load(Ordering::SeqCst)
    }

    /// Tear down and rebuild every listener. Cached records are kept.
    async fn resubscribe(self: Arc<Self>) {
        if !self.resubscribe_allowed() {
            return;
        }
        if self.resubscribing.swap(true, Ordering::SeqCst) {
            tracing::debug!(venue = V::NAME, "resubscribe already in flight");
            return;
        }

        let mut channel = self.channel.lock().await;
        if self.resubscribe_allowed() {
            let timeout_ms = self.resub.resub_timeout.map(millis).unwrap_or_default();
            if self.resub.log_resub_messages {
                tracing::info!(
                    venue = V::NAME,
                    timeout_ms,
                    "no push data within timeout, resubscribing"
                );
            } else {
                tracing::debug!(
                    venue = V::NAME,
                    timeout_ms,
                    "no push data within timeout, resubscribing"
                );
            }

            self.teardown(&mut channel).await;
            if let Err(e) = self.connect(&mut channel).await {
                tracing::warn!(venue = V::NAME, error = %e, "resubscribe failed, will retry");
                self.cache.emit_error(e);
            }
            self.arm_watchdog(&mut channel);
        }
        drop(channel);

        self.resubscribing.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl<V: Venue> AccountSubscriber<V> for WebSocketSubscriber<V> {
    async fn subscribe(&self, config: SubscriptionConfig<V::Kind>) -> Result<(), SubscriberError> {
        let mut channel = self.inner.channel.lock().await;
        if self.inner.subscribed.load(Ordering::SeqCst) {
            tracing::debug!(venue = V::NAME, "already subscribed");
            return Ok(());
        }
        self.inner.resub.warn_if_aggressive();

        channel.config = config;
        self.inner.connect(&mut channel).await?;
        self.inner.subscribed.store(true, Ordering::SeqCst);
        self.inner.arm_watchdog(&mut channel);

        tracing::info!(
            venue = V::NAME,
            listeners = channel.routes.read().unwrap_or_else(PoisonError::into_inner).len(),
            "push subscription open"
        );
        Ok(())
    }

    async fn fetch(&self) -> Result<(), SubscriberError> {
        if !self.inner.subscribed.load(Ordering::SeqCst) {
            return Err(SubscriberError::NotSubscribed);
        }
        let config = self.inner.channel.lock().await.config.clone();
        match read_config(self.inner.rpc.as_ref(), &self.inner.program_id, &config).await {
            Ok(raw) => {
                apply_raw(&self.inner.registry, &self.inner.cache, raw);
                Ok(())
            }
            Err(e) => {
                let err = SubscriberError::from(e);
                self.inner.cache.emit_error(err.clone());
                Err(err)
            }
        }
    }

    async fn unsubscribe(&self) -> Result<(), SubscriberError> {
        self.inner.unsubscribing.store(true, Ordering::SeqCst);
        let mut channel = self.inner.channel.lock().await;
        let was_subscribed = self.inner.subscribed.swap(false, Ordering::SeqCst);
        self.inner.teardown(&mut channel).await;
        if was_subscribed {
            self.inner.cache.clear();
            tracing::info!(venue = V::NAME, "push subscription closed");
        }
        drop(channel);
        self.inner.unsubscribing.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_subscribed(&self) -> bool {
        self.inner.subscribed.load(Ordering::SeqCst)
    }

    fn cache(&self) -> &Arc<AccountCache<V>> {
        &self.inner.cache
    }
}
