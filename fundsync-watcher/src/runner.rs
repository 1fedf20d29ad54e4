//! Runs one venue's mirror until shutdown.
//!
//! A subscriber of the selected delivery model feeds the venue cache, the
//! [`Aggregator`] keeps fund overviews current and a report loop writes
//! them to the log. Everything stops when the shutdown flag flips.

use crate::config::LoadedConfig;
use crate::config::file::TrackConfig;
use crate::equity_feed::EquityFeed;
use fundsync_core::aggregator::{Aggregator, EquityValuation, FundOverview, FundVenue};
use fundsync_core::config::{ConfigStore, PollingConfig, SubscriptionConfig};
use fundsync_core::events::{CacheEvent, CacheEventReceiver};
use fundsync_core::schema::Venue;
use fundsync_core::subscriber::{
    AccountSubscriber, BulkAccountLoader, PollingSubscriber, WebSocketSubscriber,
};
use fundsync_sdk::Pubkey;
use fundsync_sdk::rpc::AccountRpc;
use kanau::processor::Processor;
use std::convert::Infallible;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// How account state reaches the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Mode {
    /// Websocket notifications with a silence watchdog.
    Push,
    /// Periodic bulk refetch.
    Poll,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Mode::Push => "push",
            Mode::Poll => "poll",
        })
    }
}

/// Everything a run needs besides the venue itself.
pub struct WatchContext {
    pub rpc: Arc<dyn AccountRpc>,
    pub config: LoadedConfig,
    pub mode: Mode,
    /// Shared with the SIGHUP handler.
    pub polling: ConfigStore<PollingConfig>,
    pub json_reports: bool,
}

fn build_subscriber<V: Venue>(ctx: &WatchContext) -> Arc<dyn AccountSubscriber<V>> {
    let program_id = ctx.config.venue.program_id;
    match ctx.mode {
        Mode::Push => {
            ctx.config.resub.warn_if_aggressive();
            Arc::new(WebSocketSubscriber::<V>::new(
                Arc::clone(&ctx.rpc),
                program_id,
                ctx.config.resub,
            ))
        }
        Mode::Poll => {
            let loader =
                BulkAccountLoader::with_config_store(Arc::clone(&ctx.rpc), ctx.polling.clone());
            Arc::new(PollingSubscriber::<V>::new(
                Arc::clone(&ctx.rpc),
                program_id,
                loader,
            ))
        }
    }
}

/// The listed vaults, or every vault of the program when none are listed,
/// plus all investors and any `extra` kinds.
pub fn subscription<V: FundVenue>(
    vaults: &[Pubkey],
    extra: &[V::Kind],
) -> SubscriptionConfig<V::Kind> {
    let mut config = SubscriptionConfig::new();
    if vaults.is_empty() {
        config = config.with_filter(V::VAULT);
    }
    for vault in vaults {
        config = config.with_account(*vault, V::VAULT);
    }
    config = config.with_filter(V::INVESTOR);
    for kind in extra {
        config = config.with_filter(*kind);
    }
    config
}

/// Mirror `V` until `shutdown_rx` flips, then tear everything down.
///
/// A `feed` keeps an externally supplied `equity` current for as long as
/// the mirror runs.
pub async fn watch_venue<V: FundVenue>(
    ctx: WatchContext,
    equity: Arc<dyn EquityValuation<V>>,
    feed: Option<EquityFeed<V>>,
    subscription: SubscriptionConfig<V::Kind>,
    shutdown_rx: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let subscriber = build_subscriber::<V>(&ctx);
    let aggregator_events = subscriber.events();
    let logged_events = subscriber.events();

    info!(
        venue = V::NAME,
        mode = %ctx.mode,
        program = %ctx.config.venue.program_id,
        accounts = subscription.accounts.len(),
        filters = subscription.filters.len(),
        "Subscribing"
    );
    subscriber.subscribe(subscription).await?;
    info!(venue = V::NAME, cached = subscriber.cache().len(), "Initial state loaded");

    let aggregator = Arc::new(Aggregator::new(
        Arc::clone(subscriber.cache()),
        equity,
        ctx.config.aggregator,
    ));

    tokio::join!(
        Arc::clone(&aggregator).run(aggregator_events, shutdown_rx.clone()),
        EventLogger::<V>::new().run(logged_events, shutdown_rx.clone()),
        report_loop(&aggregator, subscriber.as_ref(), &ctx, shutdown_rx.clone()),
        async {
            if let Some(feed) = feed {
                feed.run(&aggregator, shutdown_rx.clone()).await;
            }
        },
    );

    if let Err(e) = subscriber.unsubscribe().await {
        warn!(venue = V::NAME, error = %e, "Unsubscribe failed");
    }
    info!(venue = V::NAME, "Mirror stopped");
    Ok(())
}

async fn report_loop<V: FundVenue>(
    aggregator: &Aggregator<V>,
    subscriber: &dyn AccountSubscriber<V>,
    ctx: &WatchContext,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    for track in &ctx.config.track {
        start_tracking(aggregator, subscriber, track).await;
    }

    let period = ctx.config.report_interval;
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;

            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    debug!("Report loop shutting down");
                    break;
                }
            }

            _ = interval.tick() => {
                report_funds(aggregator, ctx);
                for track in &ctx.config.track {
                    report_tracked(aggregator, track).await;
                }
            }
        }
    }
}

async fn start_tracking<V: FundVenue>(
    aggregator: &Aggregator<V>,
    subscriber: &dyn AccountSubscriber<V>,
    track: &TrackConfig,
) {
    match aggregator
        .start_tracking(subscriber, &track.vault, &track.authority)
        .await
    {
        Ok(timer) => info!(
            vault = %track.vault,
            authority = %track.authority,
            pending = timer.is_some(),
            managed = aggregator.filter_funds(&track.authority, true, false).len(),
            invested = aggregator.filter_funds(&track.authority, false, true).len(),
            "Tracking withdrawals"
        ),
        Err(e) => warn!(
            vault = %track.vault,
            authority = %track.authority,
            error = %e,
            "Failed to start withdrawal tracking"
        ),
    }
}

fn report_funds<V: FundVenue>(aggregator: &Aggregator<V>, ctx: &WatchContext) {
    let overviews = aggregator.fund_overviews();
    info!(venue = V::NAME, funds = overviews.len(), "Fund report");
    for overview in &overviews {
        let pnl_pct = overview.pnl_pct(ctx.config.aggregator.dust_threshold);
        if ctx.json_reports {
            match serde_json::to_string(overview) {
                Ok(json) => info!(fund = %json, pnl_pct = ?pnl_pct, "Fund"),
                Err(e) => warn!(vault = %overview.vault, error = %e, "Failed to serialize fund"),
            }
        } else {
            log_overview(overview, pnl_pct);
        }
    }
}

fn log_overview(overview: &FundOverview, pnl_pct: Option<rust_decimal::Decimal>) {
    info!(
        vault = %overview.vault,
        title = %overview.title,
        manager = %overview.manager,
        born = %overview.birth.date(),
        tvl = %overview.tvl,
        investor_profit = %overview.investor_profit,
        profit_after_fees = %overview.profit_after_fees,
        pnl_pct = ?pnl_pct,
        investors = overview.investors.len(),
        "Fund"
    );
}

async fn report_tracked<V: FundVenue>(aggregator: &Aggregator<V>, track: &TrackConfig) {
    if let Some(timer) = aggregator.withdraw_timer(&track.vault, &track.authority) {
        info!(
            vault = %track.vault,
            authority = %track.authority,
            role = %timer.role,
            requested_equity = %timer.requested_equity,
            seconds_remaining = timer.seconds_remaining,
            "Withdrawal pending"
        );
    }
    match aggregator
        .investor_equity(&track.vault, &track.authority)
        .await
    {
        Ok(equity) => info!(
            vault = %track.vault,
            authority = %track.authority,
            equity = %equity,
            "Investor equity"
        ),
        Err(e) => debug!(
            vault = %track.vault,
            authority = %track.authority,
            error = %e,
            "No investor equity"
        ),
    }
}

/// Writes every cache event to the log.
pub struct EventLogger<V> {
    _venue: PhantomData<fn() -> V>,
}

impl<V: Venue> Default for EventLogger<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Venue> EventLogger<V> {
    pub fn new() -> Self {
        Self {
            _venue: PhantomData,
        }
    }

    pub async fn run(
        self,
        mut events: CacheEventReceiver<V>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }

                event = events.recv() => match event {
                    Ok(event) => {
                        let Ok(()) = self.process(event).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(venue = V::NAME, missed, "Event logger lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    }
}

impl<V: Venue> Processor<CacheEvent<V>> for EventLogger<V> {
    type Output = ();
    type Error = Infallible;

    async fn process(&self, event: CacheEvent<V>) -> Result<(), Infallible> {
        match event {
            CacheEvent::Account {
                address,
                kind,
                slot,
                ..
            } => debug!(venue = V::NAME, %address, %kind, slot, "Account updated"),
            CacheEvent::Changed => {}
            CacheEvent::Error(e) => warn!(venue = V::NAME, error = %e, "Subscriber error"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fundsync_core::schema::{DriftAccountKind, DriftVaults, PhoenixAccountKind, PhoenixVaults};

    #[test]
    fn test_listed_vaults_are_explicit() {
        let vault = Pubkey::new_from_array([1u8; 32]);
        let config = subscription::<PhoenixVaults>(&[vault], &[]);
        assert_eq!(config.accounts, vec![(vault, PhoenixAccountKind::Vault)]);
        assert_eq!(config.filters, vec![PhoenixAccountKind::Investor]);
    }

    #[test]
    fn test_no_vaults_scans_every_vault() {
        let config = subscription::<DriftVaults>(&[], &[DriftAccountKind::VaultProtocol]);
        assert!(config.accounts.is_empty());
        assert_eq!(
            config.filters,
            vec![
                DriftAccountKind::Vault,
                DriftAccountKind::VaultDepositor,
                DriftAccountKind::VaultProtocol,
            ]
        );
    }

    #[test]
    fn test_mode_display() {
        assert_eq!(Mode::Push.to_string(), "push");
        assert_eq!(Mode::Poll.to_string(), "poll");
    }
}
