//! Silence detection for push channels.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// Signalled on every inbound message of a channel.
#[derive(Debug, Clone, Default)]
pub struct Heartbeat(Arc<Notify>);

impl Heartbeat {
    pub fn beat(&self) {
        self.0.notify_one();
    }
}

/// Fires `on_silence` once after `timeout` without a heartbeat, then stops.
///
/// Dropping the watchdog cancels it.
#[derive(Debug)]
pub struct Watchdog {
    handle: JoinHandle<()>,
}

impl Watchdog {
    pub fn spawn<F>(timeout: Duration, heartbeat: Heartbeat, on_silence: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = heartbeat.0.notified() => continue,
                    _ = tokio::time::sleep(timeout) => break,
                }
            }
            on_silence();
        });
        Self { handle }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
