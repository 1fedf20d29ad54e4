//! TOML file configuration structures.
//!
//! These structs directly map to the `fundsync.toml` file format.

use fundsync_sdk::Pubkey;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use url::Url;

/// Root configuration structure as read from the TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileConfig {
    pub rpc: RpcConfig,
    pub venue: VenueConfig,
    #[serde(default)]
    pub subscription: SubscriptionSection,
    #[serde(default)]
    pub aggregator: AggregatorSection,
    /// Total-equity source for margin vaults.
    #[serde(default)]
    pub equity_feed: Option<EquityFeedSection>,
    /// Authorities whose withdrawal countdowns are followed.
    #[serde(default)]
    pub track: Vec<TrackConfig>,
}

/// RPC node endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    pub http_url: Url,
    /// Pubsub endpoint. Derived from `http_url` when omitted.
    #[serde(default)]
    pub ws_url: Option<Url>,
}

/// Which vault program to mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VenueName {
    Phoenix,
    Drift,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenueConfig {
    pub name: VenueName,
    pub program_id: Pubkey,
    /// Vaults to mirror. Empty mirrors every vault of the program.
    #[serde(default)]
    pub vaults: Vec<Pubkey>,
    /// Order-book markets the vaults trade on.
    #[serde(default)]
    pub markets: Vec<Pubkey>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionSection {
    /// Silence, in milliseconds, before push channels are rebuilt.
    #[serde(default)]
    pub resub_timeout_ms: Option<u64>,
    #[serde(default)]
    pub log_resub_messages: bool,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for SubscriptionSection {
    fn default() -> Self {
        Self {
            resub_timeout_ms: None,
            log_resub_messages: false,
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    1000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatorSection {
    /// Funds below this equity report no PnL percentage.
    #[serde(default = "default_dust_threshold")]
    pub dust_threshold: Decimal,
    /// Seconds between fund reports in the log.
    #[serde(default = "default_report_interval_secs")]
    pub report_interval_secs: u64,
}

impl Default for AggregatorSection {
    fn default() -> Self {
        Self {
            dust_threshold: default_dust_threshold(),
            report_interval_secs: default_report_interval_secs(),
        }
    }
}

fn default_dust_threshold() -> Decimal {
    Decimal::ONE
}

fn default_report_interval_secs() -> u64 {
    60
}

/// Valuation service polled for margin vault equity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EquityFeedSection {
    pub url: Url,
    #[serde(default = "default_equity_refresh_secs")]
    pub refresh_secs: u64,
}

fn default_equity_refresh_secs() -> u64 {
    15
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackConfig {
    pub vault: Pubkey,
    pub authority: Pubkey,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_config_parsing() {
        let toml_str = r#"
[rpc]
http_url = "https://api.mainnet-beta.solana.com"
ws_url = "wss://api.mainnet-beta.solana.com"

[venue]
name = "phoenix"
program_id = "11111111111111111111111111111111"
vaults = ["11111111111111111111111111111111"]
markets = []

[subscription]
resub_timeout_ms = 30000
log_resub_messages = true
poll_interval_ms = 2000

[aggregator]
dust_threshold = "0.5"
report_interval_secs = 10

[equity_feed]
url = "http://127.0.0.1:9000/equity"
refresh_secs = 5

[[track]]
vault = "11111111111111111111111111111111"
authority = "11111111111111111111111111111111"
"#;
        let config: FileConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.venue.name, VenueName::Phoenix);
        assert!(config.venue.program_id.is_default());
        assert_eq!(config.venue.vaults.len(), 1);
        assert_eq!(config.subscription.resub_timeout_ms, Some(30_000));
        assert!(config.subscription.log_resub_messages);
        assert_eq!(config.subscription.poll_interval_ms, 2000);
        assert_eq!(config.aggregator.dust_threshold, Decimal::new(5, 1));
        assert_eq!(config.track.len(), 1);
        let feed = config.equity_feed.unwrap();
        assert_eq!(feed.url.as_str(), "http://127.0.0.1:9000/equity");
        assert_eq!(feed.refresh_secs, 5);
    }

    #[test]
    fn test_minimal_config_defaults() {
        let toml_str = r#"
[rpc]
http_url = "http://127.0.0.1:8899"

[venue]
name = "drift"
program_id = "11111111111111111111111111111111"
"#;
        let config: FileConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.venue.name, VenueName::Drift);
        assert!(config.rpc.ws_url.is_none());
        assert!(config.venue.vaults.is_empty());
        assert_eq!(config.subscription.resub_timeout_ms, None);
        assert_eq!(config.subscription.poll_interval_ms, 1000);
        assert_eq!(config.aggregator.dust_threshold, Decimal::ONE);
        assert!(config.track.is_empty());
        assert!(config.equity_feed.is_none());
    }
}
