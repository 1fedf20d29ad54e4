//! Runtime configuration types.
//!
//! These are the validated settings the mirror and aggregator run with.
//! Loading them from a file is left to the binary.

mod config_store;

pub use config_store::{ConfigStore, ConfigStoreClosed, ConfigWatcher};

use fundsync_sdk::Pubkey;
use rust_decimal::Decimal;
use std::time::Duration;

/// Below this, a silence timeout resubscribes too eagerly to be useful.
pub const MIN_RESUB_TIMEOUT: Duration = Duration::from_millis(1000);

/// Default bulk polling interval.
pub const DEFAULT_POLLING_INTERVAL: Duration = Duration::from_millis(1000);

/// Whole milliseconds of `duration`, saturating at `u64::MAX`.
pub fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Liveness settings for push channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResubOpts {
    /// Silence after which all listeners are torn down and rebuilt.
    /// `None` disables the watchdog.
    pub resub_timeout: Option<Duration>,
    /// Log each resubscribe at `info` instead of `debug`.
    pub log_resub_messages: bool,
}

impl ResubOpts {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            resub_timeout: Some(timeout),
            log_resub_messages: false,
        }
    }

    /// Warn about timeouts shorter than [`MIN_RESUB_TIMEOUT`]. The value is
    /// still honoured.
    pub fn warn_if_aggressive(&self) {
        match self.resub_timeout {
            Some(timeout) if timeout < MIN_RESUB_TIMEOUT => {
                tracing::warn!(
                    timeout_ms = millis(timeout),
                    "resubscribe timeout below 1000ms, channels may churn"
                );
            }
            _ => {}
        }
    }
}

/// What a subscriber should mirror.
///
/// Explicit accounts carry their kind up front; filters expand to every
/// program account whose tag matches the kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionConfig<K> {
    pub accounts: Vec<(Pubkey, K)>,
    pub filters: Vec<K>,
}

impl<K> Default for SubscriptionConfig<K> {
    fn default() -> Self {
        Self {
            accounts: Vec::new(),
            filters: Vec::new(),
        }
    }
}

impl<K> SubscriptionConfig<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_account(mut self, address: Pubkey, kind: K) -> Self {
        self.accounts.push((address, kind));
        self
    }

    pub fn with_filter(mut self, kind: K) -> Self {
        self.filters.push(kind);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty() && self.filters.is_empty()
    }
}

/// Bulk loader settings. Held in a [`ConfigStore`] so the interval can be
/// changed while the loader runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollingConfig {
    pub interval: Duration,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLLING_INTERVAL,
        }
    }
}

/// Aggregator settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregatorConfig {
    /// Funds with less equity than this (in quote units) report no PnL
    /// percentage.
    pub dust_threshold: Decimal,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            dust_threshold: Decimal::ONE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_millis_saturates() {
        assert_eq!(millis(Duration::from_millis(1500)), 1500);
        assert_eq!(millis(Duration::MAX), u64::MAX);
    }
}
