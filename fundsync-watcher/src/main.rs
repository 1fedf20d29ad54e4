//! fundsync watcher
//!
//! Mirrors one vault program's accounts over a Solana RPC node and logs
//! live fund overviews and withdrawal countdowns.

mod config;
mod equity_feed;
mod runner;
mod shutdown;

use clap::Parser;
use config::ConfigLoader;
use config::file::VenueName;
use equity_feed::EquityFeed;
use fundsync_core::aggregator::{EquityValuation, OrderBookEquity, TokenBalanceEquity};
use fundsync_core::config::ConfigStore;
use fundsync_core::schema::{DriftAccountKind, DriftVaults, PhoenixVaults};
use fundsync_sdk::client::SolanaRpcClient;
use fundsync_sdk::rpc::AccountRpc;
use runner::{Mode, WatchContext, subscription, watch_venue};
use shutdown::{shutdown_channel, shutdown_signal, spawn_config_reload_handler};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use url::Url;

/// fundsync - live mirror of on-chain fund vaults
#[derive(Parser, Debug)]
#[command(name = "fundsync-watcher")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "./fundsync.toml")]
    config: PathBuf,

    /// Override the RPC http endpoint (the pubsub endpoint is derived from it)
    #[arg(long, env = "FUNDSYNC_RPC_URL")]
    rpc_url: Option<Url>,

    /// How account state is delivered
    #[arg(short, long, value_enum, default_value_t = Mode::Push)]
    mode: Mode,

    /// Emit logs and fund reports as JSON
    #[arg(long, default_value = "false")]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Initialize tracing
    init_tracing(args.json_logs);

    tracing::info!("Starting fundsync-watcher v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config_loader = Arc::new(ConfigLoader::new(&args.config, args.rpc_url.clone()));
    let loaded_config = config_loader.load().map_err(|e| {
        tracing::error!("Failed to load configuration: {}", e);
        e
    })?;
    tracing::info!("Configuration loaded from {:?}", config_loader.path());

    let rpc: Arc<dyn AccountRpc> = Arc::new(SolanaRpcClient::new(
        loaded_config.rpc.http.clone(),
        loaded_config.rpc.ws.clone(),
    ));
    tracing::info!(
        http = %loaded_config.rpc.http,
        ws = %loaded_config.rpc.ws,
        "RPC client ready"
    );

    let polling_config_store = ConfigStore::new(loaded_config.polling);

    // Spawn config reload handler (listens for SIGHUP)
    let reload_notify = spawn_config_reload_handler(
        config_loader.clone(),
        loaded_config.clone(),
        polling_config_store.clone(),
    )?;

    let (shutdown_tx, shutdown_rx) = shutdown_channel();
    tokio::spawn(async move {
        if let Err(e) = shutdown_signal().await {
            tracing::error!("Failed to listen for shutdown signals: {}", e);
        }
        let _ = shutdown_tx.send(true);
    });

    let venue = loaded_config.venue.clone();
    let equity_feed = loaded_config.equity_feed.clone();
    let ctx = WatchContext {
        rpc: Arc::clone(&rpc),
        config: loaded_config,
        mode: args.mode,
        polling: polling_config_store,
        json_reports: args.json_logs,
    };

    let result = match venue.name {
        VenueName::Phoenix => {
            let equity = Arc::new(OrderBookEquity::new(Arc::clone(&rpc), venue.markets.clone()));
            watch_venue::<PhoenixVaults>(
                ctx,
                equity,
                None,
                subscription::<PhoenixVaults>(&venue.vaults, &[]),
                shutdown_rx,
            )
            .await
        }
        VenueName::Drift => {
            if !venue.markets.is_empty() {
                tracing::warn!("venue.markets is ignored for drift vaults");
            }
            let (equity, feed) = match equity_feed {
                Some(config) => {
                    let feed = EquityFeed::new(config.url, config.refresh);
                    let valuation: Arc<dyn EquityValuation<DriftVaults>> = feed.valuation();
                    (valuation, Some(feed))
                }
                None => {
                    tracing::warn!(
                        "No equity_feed configured: drift tvl is the vault's idle token balance \
                         only, open positions are not valued"
                    );
                    let valuation: Arc<dyn EquityValuation<DriftVaults>> =
                        Arc::new(TokenBalanceEquity::new(Arc::clone(&rpc)));
                    (valuation, None)
                }
            };
            watch_venue::<DriftVaults>(
                ctx,
                equity,
                feed,
                subscription::<DriftVaults>(&venue.vaults, &[DriftAccountKind::VaultProtocol]),
                shutdown_rx,
            )
            .await
        }
    };

    // Signal the config reload handler to stop
    reload_notify.notify_one();

    tracing::info!("fundsync-watcher shutdown complete");
    result
}

/// Initialize the tracing subscriber with environment-based filtering.
fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,fundsync_core=debug"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
