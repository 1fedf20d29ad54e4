//! Configuration module for fundsync-watcher.
//!
//! Handles loading configuration from TOML files, CLI arguments,
//! and environment variables.

pub mod file;

use crate::config::file::{FileConfig, TrackConfig, VenueConfig, VenueName};
use fundsync_core::config::{AggregatorConfig, PollingConfig, ResubOpts};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("validation error: {0}")]
    ValidationError(String),
}

/// RPC node endpoints, with the pubsub url resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcEndpoints {
    pub http: Url,
    pub ws: Url,
}

/// Where margin vault equity comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EquityFeedConfig {
    pub url: Url,
    pub refresh: Duration,
}

/// Loaded configuration result containing all parts.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub rpc: RpcEndpoints,
    pub venue: VenueConfig,
    pub resub: ResubOpts,
    pub polling: PollingConfig,
    pub aggregator: AggregatorConfig,
    pub report_interval: Duration,
    pub equity_feed: Option<EquityFeedConfig>,
    pub track: Vec<TrackConfig>,
}

/// Configuration loader that handles the complete loading process.
pub struct ConfigLoader {
    config_path: PathBuf,
    rpc_override: Option<Url>,
}

impl ConfigLoader {
    /// Create a new config loader. `rpc_override` replaces the file's
    /// `rpc.http_url`.
    pub fn new(config_path: impl AsRef<Path>, rpc_override: Option<Url>) -> Self {
        Self {
            config_path: config_path.as_ref().to_path_buf(),
            rpc_override,
        }
    }

    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// Read the TOML file, apply overrides, validate and build the
    /// runtime configuration.
    pub fn load(&self) -> Result<LoadedConfig, ConfigError> {
        let config_content = std::fs::read_to_string(&self.config_path)?;
        let file_config = self.parse(&config_content)?;
        build_loaded_config(file_config)
    }

    /// Reload the configuration (used during SIGHUP).
    pub fn reload(&self) -> Result<LoadedConfig, ConfigError> {
        self.load()
    }

    fn parse(&self, content: &str) -> Result<FileConfig, ConfigError> {
        let mut file_config: FileConfig = toml::from_str(content)?;
        if let Some(url) = &self.rpc_override {
            file_config.rpc.http_url = url.clone();
            // The file's pubsub url belongs to the replaced node.
            file_config.rpc.ws_url = None;
        }
        validate(&file_config)?;
        Ok(file_config)
    }
}

fn validate(config: &FileConfig) -> Result<(), ConfigError> {
    if config.subscription.poll_interval_ms == 0 {
        return Err(ConfigError::ValidationError(
            "subscription.poll_interval_ms must be positive".into(),
        ));
    }
    if config.subscription.resub_timeout_ms == Some(0) {
        return Err(ConfigError::ValidationError(
            "subscription.resub_timeout_ms must be positive, omit it to disable".into(),
        ));
    }
    if config.aggregator.report_interval_secs == 0 {
        return Err(ConfigError::ValidationError(
            "aggregator.report_interval_secs must be positive".into(),
        ));
    }
    if config.aggregator.dust_threshold.is_sign_negative() {
        return Err(ConfigError::ValidationError(
            "aggregator.dust_threshold must not be negative".into(),
        ));
    }
    if let Some(feed) = &config.equity_feed {
        if config.venue.name != VenueName::Drift {
            return Err(ConfigError::ValidationError(
                "equity_feed only applies to the drift venue".into(),
            ));
        }
        if feed.refresh_secs == 0 {
            return Err(ConfigError::ValidationError(
                "equity_feed.refresh_secs must be positive".into(),
            ));
        }
    }
    Ok(())
}

/// `http` → `ws`, `https` → `wss`, keeping host, port and path.
fn pubsub_url(http: &Url) -> Result<Url, ConfigError> {
    let scheme = match http.scheme() {
        "http" => "ws",
        "https" => "wss",
        other => {
            return Err(ConfigError::ValidationError(format!(
                "cannot derive a pubsub url from scheme {other}, set rpc.ws_url"
            )));
        }
    };
    let mut ws = http.clone();
    ws.set_scheme(scheme).map_err(|()| {
        ConfigError::ValidationError(format!("cannot derive a pubsub url from {http}"))
    })?;
    Ok(ws)
}

fn build_loaded_config(file_config: FileConfig) -> Result<LoadedConfig, ConfigError> {
    let ws = match file_config.rpc.ws_url {
        Some(ws) => ws,
        None => pubsub_url(&file_config.rpc.http_url)?,
    };
    let subscription = file_config.subscription;

    Ok(LoadedConfig {
        rpc: RpcEndpoints {
            http: file_config.rpc.http_url,
            ws,
        },
        venue: file_config.venue,
        resub: ResubOpts {
            resub_timeout: subscription.resub_timeout_ms.map(Duration::from_millis),
            log_resub_messages: subscription.log_resub_messages,
        },
        polling: PollingConfig {
            interval: Duration::from_millis(subscription.poll_interval_ms),
        },
        aggregator: AggregatorConfig {
            dust_threshold: file_config.aggregator.dust_threshold,
        },
        report_interval: Duration::from_secs(file_config.aggregator.report_interval_secs),
        equity_feed: file_config.equity_feed.map(|feed| EquityFeedConfig {
            url: feed.url,
            refresh: Duration::from_secs(feed.refresh_secs),
        }),
        track: file_config.track,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = r#"
[rpc]
http_url = "https://rpc.example.com/key"

[venue]
name = "drift"
program_id = "11111111111111111111111111111111"

[subscription]
resub_timeout_ms = 500
poll_interval_ms = 250
"#;

    fn loader(rpc_override: Option<&str>) -> ConfigLoader {
        ConfigLoader::new(
            "fundsync.toml",
            rpc_override.map(|u| Url::parse(u).unwrap()),
        )
    }

    #[test]
    fn test_builds_runtime_config() {
        let file = loader(None).parse(BASE).unwrap();
        let loaded = build_loaded_config(file).unwrap();
        assert_eq!(loaded.rpc.ws.as_str(), "wss://rpc.example.com/key");
        assert_eq!(loaded.resub.resub_timeout, Some(Duration::from_millis(500)));
        assert!(!loaded.resub.log_resub_messages);
        assert_eq!(loaded.polling.interval, Duration::from_millis(250));
        assert_eq!(loaded.report_interval, Duration::from_secs(60));
        assert_eq!(loaded.equity_feed, None);
    }

    #[test]
    fn test_equity_feed_is_drift_only() {
        let with_feed = format!("{BASE}\n[equity_feed]\nurl = \"http://127.0.0.1:9000/equity\"\n");
        let file = loader(None).parse(&with_feed).unwrap();
        let feed = build_loaded_config(file).unwrap().equity_feed.unwrap();
        assert_eq!(feed.refresh, Duration::from_secs(15));

        let phoenix = with_feed.replace("name = \"drift\"", "name = \"phoenix\"");
        assert!(matches!(
            loader(None).parse(&phoenix),
            Err(ConfigError::ValidationError(_))
        ));

        let zero = format!("{with_feed}refresh_secs = 0\n");
        assert!(matches!(
            loader(None).parse(&zero),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_rpc_override_replaces_both_endpoints() {
        let content = BASE.replace(
            "[venue]",
            "ws_url = \"wss://other.example.com\"\n\n[venue]",
        );
        let file = loader(Some("http://127.0.0.1:8899")).parse(&content).unwrap();
        let loaded = build_loaded_config(file).unwrap();
        assert_eq!(loaded.rpc.http.as_str(), "http://127.0.0.1:8899/");
        assert_eq!(loaded.rpc.ws.as_str(), "ws://127.0.0.1:8899/");
    }

    #[test]
    fn test_rejects_zero_intervals() {
        let zero_poll = BASE.replace("poll_interval_ms = 250", "poll_interval_ms = 0");
        assert!(matches!(
            loader(None).parse(&zero_poll),
            Err(ConfigError::ValidationError(_))
        ));

        let zero_resub = BASE.replace("resub_timeout_ms = 500", "resub_timeout_ms = 0");
        assert!(matches!(
            loader(None).parse(&zero_resub),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_unknown_scheme_needs_explicit_ws() {
        let content = BASE.replace("https://rpc.example.com/key", "file:///tmp/rpc");
        let file = loader(None).parse(&content).unwrap();
        assert!(matches!(
            build_loaded_config(file),
            Err(ConfigError::ValidationError(_))
        ));
    }
}
