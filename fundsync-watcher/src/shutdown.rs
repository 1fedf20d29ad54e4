//! Signal handling for graceful shutdown and config reload.

use crate::config::{ConfigLoader, LoadedConfig};
use fundsync_core::config::{ConfigStore, PollingConfig, millis};
use std::sync::Arc;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::{Notify, watch};

/// Completes when a shutdown signal is received.
///
/// Listens for SIGTERM and SIGINT (Ctrl+C).
pub async fn shutdown_signal() -> std::io::Result<()> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        }
        _ = sigint.recv() => {
            tracing::info!("Received SIGINT, initiating graceful shutdown");
        }
    }
    Ok(())
}

/// Shutdown flag shared by every long running task.
pub fn shutdown_channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

/// Spawns a task that listens for SIGHUP and reloads the configuration.
///
/// Only the polling interval is applied live; it is pushed into the
/// loader's config store. Other changed sections are reported and take
/// effect on restart. Returns a Notify that stops the handler.
pub fn spawn_config_reload_handler(
    config_loader: Arc<ConfigLoader>,
    current: LoadedConfig,
    polling_config_store: ConfigStore<PollingConfig>,
) -> std::io::Result<Arc<Notify>> {
    let shutdown_notify = Arc::new(Notify::new());
    let shutdown_notify_clone = shutdown_notify.clone();
    let mut sighup = signal(SignalKind::hangup())?;

    tokio::spawn(async move {
        let mut current = current;
        loop {
            tokio::select! {
                _ = sighup.recv() => {
                    tracing::info!("Received SIGHUP, reloading configuration");
                    match config_loader.reload() {
                        Ok(loaded_config) => {
                            apply_reload(&current, &loaded_config, &polling_config_store).await;
                            current = loaded_config;
                            tracing::info!("Configuration reloaded successfully");
                        }
                        Err(e) => {
                            tracing::error!("Failed to reload configuration: {}", e);
                        }
                    }
                }
                _ = shutdown_notify_clone.notified() => {
                    tracing::debug!("Config reload handler shutting down");
                    break;
                }
            }
        }
    });

    Ok(shutdown_notify)
}

async fn apply_reload(
    current: &LoadedConfig,
    next: &LoadedConfig,
    polling_config_store: &ConfigStore<PollingConfig>,
) {
    if next.polling != current.polling {
        tracing::info!(
            interval_ms = millis(next.polling.interval),
            "polling interval updated"
        );
        polling_config_store.update(next.polling).await;
    }
    for section in restart_only_changes(current, next) {
        tracing::warn!(section, "configuration change needs a restart to take effect");
    }
}

/// Sections that differ between `current` and `next` but cannot be applied
/// to a running mirror.
fn restart_only_changes(current: &LoadedConfig, next: &LoadedConfig) -> Vec<&'static str> {
    let mut changed = Vec::new();
    if current.rpc != next.rpc {
        changed.push("rpc");
    }
    if current.venue.name != next.venue.name
        || current.venue.program_id != next.venue.program_id
        || current.venue.vaults != next.venue.vaults
        || current.venue.markets != next.venue.markets
    {
        changed.push("venue");
    }
    if current.resub != next.resub {
        changed.push("subscription");
    }
    if current.aggregator != next.aggregator || current.report_interval != next.report_interval {
        changed.push("aggregator");
    }
    if current.equity_feed != next.equity_feed {
        changed.push("equity_feed");
    }
    if current.track != next.track {
        changed.push("track");
    }
    changed
}
