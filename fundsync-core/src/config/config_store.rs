//! Generic config store with change notification.
//!
//! `ConfigStore<T>` keeps a value behind a lock and publishes a version
//! number on a watch channel every time the value is replaced, so long
//! running loops can pick up new settings without polling.

use std::sync::Arc;
use tokio::sync::{RwLock, RwLockReadGuard, watch};

/// A shared, versioned configuration value.
pub struct ConfigStore<T> {
    inner: Arc<ConfigStoreInner<T>>,
}

struct ConfigStoreInner<T> {
    data: RwLock<T>,
    version_tx: watch::Sender<u64>,
}

/// Receives notifications when a [`ConfigStore`] is updated.
pub struct ConfigWatcher {
    version_rx: watch::Receiver<u64>,
}

/// The [`ConfigStore`] this watcher belonged to has been dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("config store dropped")]
pub struct ConfigStoreClosed;

impl<T> ConfigStore<T> {
    pub fn new(initial: T) -> Self {
        let (version_tx, _) = watch::channel(0u64);
        Self {
            inner: Arc::new(ConfigStoreInner {
                data: RwLock::new(initial),
                version_tx,
            }),
        }
    }

    /// Replace the stored value and notify all watchers.
    pub async fn update(&self, value: T) {
        self.modify(|current| *current = value).await;
    }

    /// Edit the stored value in place and notify all watchers.
    pub async fn modify(&self, f: impl FnOnce(&mut T)) {
        {
            let mut guard = self.inner.data.write().await;
            f(&mut guard);
        }
        // Guard is released before notifying so watchers can read at once.
        self.inner.version_tx.send_modify(|v| *v += 1);
    }

    pub async fn read(&self) -> RwLockReadGuard<'_, T> {
        self.inner.data.read().await
    }

    /// Number of updates applied so far.
    pub fn version(&self) -> u64 {
        *self.inner.version_tx.borrow()
    }

    pub fn subscribe(&self) -> ConfigWatcher {
        ConfigWatcher {
            version_rx: self.inner.version_tx.subscribe(),
        }
    }
}

impl<T: Clone> ConfigStore<T> {
    /// Copy out the current value.
    pub async fn snapshot(&self) -> T {
        self.inner.data.read().await.clone()
    }
}

impl<T> Clone for ConfigStore<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl ConfigWatcher {
    /// Wait for the next update and return its version.
    pub async fn changed(&mut self) -> Result<u64, ConfigStoreClosed> {
        self.version_rx
            .changed()
            .await
            .map_err(|_| ConfigStoreClosed)?;
        Ok(*self.version_rx.borrow_and_update())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_update_notifies_watcher() {
        let store = ConfigStore::new(1u32);
        let mut watcher = store.subscribe();

        store.update(5).await;
        assert_eq!(watcher.changed().await, Ok(1));
        assert_eq!(*store.read().await, 5);

        store.modify(|v| *v += 1).await;
        assert_eq!(watcher.changed().await, Ok(2));
        assert_eq!(store.snapshot().await, 6);
        assert_eq!(store.version(), 2);
    }

    #[tokio::test]
    async fn test_watcher_sees_drop() {
        let store = ConfigStore::new(());
        let mut watcher = store.subscribe();
        drop(store);
        assert_eq!(watcher.changed().await, Err(ConfigStoreClosed));
    }
}
