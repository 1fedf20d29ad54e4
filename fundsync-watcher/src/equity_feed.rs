//! Total vault equity from an external valuation service.
//!
//! Margin vaults are worth their collateral plus open positions, which
//! needs the venue's own margin engine. The feed polls a service that runs
//! it and answers `GET <url>` with a JSON object mapping vault addresses to
//! total equity in quote units:
//!
//! ```json
//! { "9Xz...": "125043.17", "4Gh...": 88.5 }
//! ```

use fundsync_core::aggregator::{Aggregator, ExternalEquity, FundVenue};
use fundsync_sdk::Pubkey;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use url::Url;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("equity feed request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("equity feed rejected a negative equity {equity} for {vault}")]
    Negative { vault: Pubkey, equity: Decimal },
}

/// Polls the valuation service into an [`ExternalEquity`] and refreshes
/// fund overviews after each successful poll.
pub struct EquityFeed<V> {
    url: Url,
    refresh: Duration,
    values: Arc<ExternalEquity<V>>,
    http_client: reqwest::Client,
}

impl<V: FundVenue> EquityFeed<V> {
    pub fn new(url: Url, refresh: Duration) -> Self {
        Self {
            url,
            refresh,
            values: Arc::new(ExternalEquity::new()),
            http_client: reqwest::Client::new(),
        }
    }

    /// The valuation to hand to the aggregator.
    pub fn valuation(&self) -> Arc<ExternalEquity<V>> {
        Arc::clone(&self.values)
    }

    /// Fetch and store the current figures. Returns how many vaults were
    /// valued.
    pub async fn refresh(&self) -> Result<usize, FeedError> {
        let response = self
            .http_client
            .get(self.url.clone())
            .send()
            .await?
            .error_for_status()?;
        let figures: HashMap<Pubkey, Decimal> = response.json().await?;
        self.apply(figures)
    }

    /// A response is applied whole or not at all.
    fn apply(&self, figures: HashMap<Pubkey, Decimal>) -> Result<usize, FeedError> {
        if let Some((vault, equity)) = figures.iter().find(|(_, e)| e.is_sign_negative()) {
            return Err(FeedError::Negative {
                vault: *vault,
                equity: *equity,
            });
        }
        let count = figures.len();
        for (vault, equity) in figures {
            self.values.set(vault, equity);
        }
        Ok(count)
    }

    /// Poll until `shutdown_rx` flips. The first poll runs at once.
    pub async fn run(self, aggregator: &Aggregator<V>, mut shutdown_rx: watch::Receiver<bool>) {
        info!(venue = V::NAME, url = %self.url, "Equity feed started");
        let mut interval = tokio::time::interval(self.refresh);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        debug!("Equity feed shutting down");
                        break;
                    }
                }

                _ = interval.tick() => match self.refresh().await {
                    Ok(valued) => {
                        let recomputed = aggregator.recompute_all().await;
                        debug!(venue = V::NAME, valued, recomputed, "Equity feed refreshed");
                    }
                    Err(e) => warn!(venue = V::NAME, error = %e, "Equity feed refresh failed"),
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fundsync_core::aggregator::EquityValuation;
    use fundsync_core::schema::{DriftAccount, DriftVaults};

    fn feed() -> EquityFeed<DriftVaults> {
        EquityFeed::new(
            Url::parse("http://127.0.0.1:9000/equity").unwrap(),
            Duration::from_secs(15),
        )
    }

    #[tokio::test]
    async fn test_figures_reach_the_valuation() {
        let vault = Pubkey::new_from_array([3u8; 32]);
        let body = format!(r#"{{"{vault}": "125043.17"}}"#);
        let figures: HashMap<Pubkey, Decimal> = serde_json::from_str(&body).unwrap();

        let feed = feed();
        let valuation = feed.valuation();
        let account = DriftAccount::Vault(Box::default());
        assert!(valuation.vault_equity(&vault, &account).await.is_err());

        assert_eq!(feed.apply(figures).unwrap(), 1);
        assert_eq!(
            valuation.vault_equity(&vault, &account).await.unwrap(),
            Decimal::new(12_504_317, 2)
        );
    }

    #[test]
    fn test_negative_figure_rejects_the_response() {
        let (a, b) = (
            Pubkey::new_from_array([1u8; 32]),
            Pubkey::new_from_array([2u8; 32]),
        );
        let feed = feed();
        let figures = HashMap::from([(a, Decimal::from(10)), (b, Decimal::from(-1))]);
        assert!(matches!(
            feed.apply(figures),
            Err(FeedError::Negative { vault, .. }) if vault == b
        ));
        assert_eq!(feed.valuation().get(&a), None);
    }
}
