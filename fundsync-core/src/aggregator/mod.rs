//! Derived fund state.
//!
//! The [`Aggregator`] listens to a venue cache's events and keeps one
//! [`FundOverview`] per vault, recomputed whenever the vault (or the
//! protocol record it points at) is accepted. It also owns the
//! [`WithdrawTimerTable`] and answers role and equity queries from the
//! cache.

pub mod equity;
pub mod fund_overview;
pub mod venue;
pub mod withdraw_timer;

pub use equity::{
    EquityError, EquityValuation, ExternalEquity, OrderBookEquity, TokenBalanceEquity,
    realized_investor_equity,
};
pub use fund_overview::FundOverview;
pub use venue::{FundVenue, InvestorView, ProtocolSource, ProtocolView, VaultView};
pub use withdraw_timer::{ActorRole, UnixClock, WithdrawTimer, WithdrawTimerTable};

use crate::cache::AccountCache;
use crate::config::AggregatorConfig;
use crate::events::{CacheEvent, CacheEventReceiver};
use crate::subscriber::{AccountSubscriber, SubscriberError};
use fundsync_sdk::Pubkey;
use kanau::processor::Processor;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum AggregatorError {
    #[error("vault {0} not cached")]
    VaultNotFound(Pubkey),

    #[error("no investor of {authority} in vault {vault}")]
    InvestorNotFound { vault: Pubkey, authority: Pubkey },

    #[error(transparent)]
    Equity(#[from] EquityError),

    #[error(transparent)]
    Subscriber(#[from] SubscriberError),
}

pub struct Aggregator<V: FundVenue> {
    cache: Arc<AccountCache<V>>,
    equity: Arc<dyn EquityValuation<V>>,
    config: AggregatorConfig,
    overviews: RwLock<HashMap<Pubkey, FundOverview>>,
    timers: WithdrawTimerTable,
}

impl<V: FundVenue> Aggregator<V> {
    pub fn new(
        cache: Arc<AccountCache<V>>,
        equity: Arc<dyn EquityValuation<V>>,
        config: AggregatorConfig,
    ) -> Self {
        Self::with_timers(cache, equity, config, WithdrawTimerTable::default())
    }

    pub fn with_timers(
        cache: Arc<AccountCache<V>>,
        equity: Arc<dyn EquityValuation<V>>,
        config: AggregatorConfig,
        timers: WithdrawTimerTable,
    ) -> Self {
        Self {
            cache,
            equity,
            config,
            overviews: RwLock::new(HashMap::new()),
            timers,
        }
    }

    pub fn timers(&self) -> &WithdrawTimerTable {
        &self.timers
    }

    fn vault(&self, vault: &Pubkey) -> Result<(VaultView, V::Account), AggregatorError> {
        let record = self
            .cache
            .get(vault)
            .ok_or(AggregatorError::VaultNotFound(*vault))?;
        let view =
            V::vault_view(vault, &record.data).ok_or(AggregatorError::VaultNotFound(*vault))?;
        Ok((view, record.data))
    }

    fn protocol(&self, vault: &VaultView) -> Option<ProtocolView> {
        match vault.protocol {
            ProtocolSource::None => None,
            ProtocolSource::Embedded(view) => Some(view),
            ProtocolSource::Account(address) => self
                .cache
                .get(&address)
                .and_then(|record| V::protocol_view(&record.data)),
        }
    }

    fn investors(&self) -> Vec<InvestorView> {
        self.cache
            .get_by_kind(V::INVESTOR)
            .iter()
            .filter_map(|(address, record)| V::investor_view(address, &record.data))
            .collect()
    }

    fn investor(&self, vault: &Pubkey, authority: &Pubkey) -> Option<InvestorView> {
        self.investors()
            .into_iter()
            .find(|i| &i.vault == vault && &i.authority == authority)
    }

    /// Rebuild the overview of `vault` from the cache.
    pub async fn recompute(&self, vault: &Pubkey) -> Result<FundOverview, AggregatorError> {
        let (view, account) = self.vault(vault)?;
        let protocol = self.protocol(&view);
        let investors = self.investors();
        let tvl = self.equity.vault_equity(vault, &account).await?;

        let overview = FundOverview::build(V::NAME, &view, protocol.as_ref(), &investors, tvl);
        debug!(
            venue = V::NAME,
            %vault,
            tvl = %overview.tvl,
            investors = overview.investors.len(),
            "fund overview recomputed"
        );
        self.overviews
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(*vault, overview.clone());
        Ok(overview)
    }

    /// Recompute every cached vault. Failures are logged and skipped.
    pub async fn recompute_all(&self) -> usize {
        let vaults: Vec<Pubkey> = self
            .cache
            .get_by_kind(V::VAULT)
            .into_iter()
            .map(|(address, _)| address)
            .collect();
        let mut done = 0;
        for vault in vaults {
            match self.recompute(&vault).await {
                Ok(_) => done += 1,
                Err(e) => {
                    warn!(venue = V::NAME, %vault, error = %e, "fund overview recompute failed")
                }
            }
        }
        done
    }

    pub fn fund_overview(&self, vault: &Pubkey) -> Option<FundOverview> {
        self.overviews
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(vault)
            .cloned()
    }

    /// All overviews, most profitable first.
    pub fn fund_overviews(&self) -> Vec<FundOverview> {
        let mut overviews: Vec<FundOverview> = self
            .overviews
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        overviews.sort_by(|a, b| b.profit().cmp(&a.profit()));
        overviews
    }

    pub fn fund_pct_pnl(&self, vault: &Pubkey) -> Option<Decimal> {
        self.fund_overview(vault)?
            .pnl_pct(self.config.dust_threshold)
    }

    /// Realized equity of `authority`'s position in `vault`.
    pub async fn investor_equity(
        &self,
        vault: &Pubkey,
        authority: &Pubkey,
    ) -> Result<Decimal, AggregatorError> {
        let (view, account) = self.vault(vault)?;
        let investor = self
            .investor(vault, authority)
            .ok_or(AggregatorError::InvestorNotFound {
                vault: *vault,
                authority: *authority,
            })?;
        let protocol = self.protocol(&view);
        let vault_equity = self.equity.vault_equity(vault, &account).await?;
        Ok(realized_investor_equity(
            &view,
            protocol.as_ref(),
            &investor,
            vault_equity,
        )?)
    }

    /// Overviews of funds `authority` manages (if `managed`) or holds
    /// shares in (if `invested`).
    pub fn filter_funds(
        &self,
        authority: &Pubkey,
        managed: bool,
        invested: bool,
    ) -> Vec<FundOverview> {
        let holdings: HashSet<Pubkey> = if invested {
            self.investors()
                .into_iter()
                .filter(|i| &i.authority == authority)
                .map(|i| i.vault)
                .collect()
        } else {
            HashSet::new()
        };
        self.fund_overviews()
            .into_iter()
            .filter(|fund| {
                (managed && &fund.manager == authority) || holdings.contains(&fund.vault)
            })
            .collect()
    }

    pub fn is_manager(&self, vault: &Pubkey, authority: &Pubkey) -> Result<bool, AggregatorError> {
        let (view, _) = self.vault(vault)?;
        Ok(&view.manager == authority)
    }

    pub fn is_protocol(&self, vault: &Pubkey, authority: &Pubkey) -> Result<bool, AggregatorError> {
        let (view, _) = self.vault(vault)?;
        Ok(self
            .protocol(&view)
            .is_some_and(|p| &p.authority == authority))
    }

    /// The role `authority` acts in on `vault`, read from the current cache.
    pub fn resolve_role(
        &self,
        vault: &Pubkey,
        authority: &Pubkey,
    ) -> Result<ActorRole, AggregatorError> {
        if self.is_manager(vault, authority)? {
            Ok(ActorRole::Manager)
        } else if self.is_protocol(vault, authority)? {
            Ok(ActorRole::Protocol)
        } else {
            Ok(ActorRole::Investor)
        }
    }

    /// Start countdowns for every role `authority` holds on `vault`, after
    /// forcing a fresh read through `subscriber`. Returns the countdown of
    /// the role resolved for `authority`, if it has a pending request.
    pub async fn start_tracking(
        &self,
        subscriber: &dyn AccountSubscriber<V>,
        vault: &Pubkey,
        authority: &Pubkey,
    ) -> Result<Option<watch::Receiver<WithdrawTimer>>, AggregatorError> {
        subscriber.fetch().await?;
        let (view, _) = self.vault(vault)?;

        if view.manager == *authority {
            self.timers.start(
                *vault,
                ActorRole::Manager,
                *authority,
                view.manager_withdraw,
                view.redeem_period,
            );
        }
        if let Some(protocol) = self.protocol(&view) {
            if protocol.authority == *authority {
                self.timers.start(
                    *vault,
                    ActorRole::Protocol,
                    *authority,
                    protocol.withdraw,
                    view.redeem_period,
                );
            }
        }
        match self.investor(vault, authority) {
            Some(investor) => {
                self.timers.start(
                    *vault,
                    ActorRole::Investor,
                    *authority,
                    investor.withdraw,
                    view.redeem_period,
                );
            }
            None => {
                self.timers.cancel(vault, ActorRole::Investor);
            }
        }

        let role = self.resolve_role(vault, authority)?;
        Ok(self.timers.watch(vault, role))
    }

    /// Current countdown for `authority` on `vault`. The role is resolved
    /// again on every call.
    pub fn withdraw_timer(&self, vault: &Pubkey, authority: &Pubkey) -> Option<WithdrawTimer> {
        let role = self.resolve_role(vault, authority).ok()?;
        self.timers.get(vault, role)
    }

    pub fn stop_tracking(&self, vault: &Pubkey) {
        self.timers.cancel_vault(vault);
    }

    fn on_vault(&self, view: &VaultView) {
        self.timers.reconcile(
            view.address,
            ActorRole::Manager,
            view.manager_withdraw,
            view.redeem_period,
        );
        if view.protocol == ProtocolSource::None {
            self.timers.cancel(&view.address, ActorRole::Protocol);
        } else if let Some(p) = self.protocol(view) {
            self.timers
                .reconcile(view.address, ActorRole::Protocol, p.withdraw, view.redeem_period);
        }
    }

    fn on_investor(&self, investor: &InvestorView) {
        if self.timers.authority(&investor.vault, ActorRole::Investor) != Some(investor.authority) {
            return;
        }
        let Some(redeem_period) = self
            .cache
            .get(&investor.vault)
            .and_then(|record| V::vault_view(&investor.vault, &record.data))
            .map(|v| v.redeem_period)
        else {
            return;
        };
        self.timers.reconcile(
            investor.vault,
            ActorRole::Investor,
            investor.withdraw,
            redeem_period,
        );
    }

    /// Vaults whose protocol figures live at `address`.
    fn vaults_with_protocol(&self, address: &Pubkey) -> Vec<VaultView> {
        self.cache
            .get_by_kind(V::VAULT)
            .iter()
            .filter_map(|(vault, record)| V::vault_view(vault, &record.data))
            .filter(|view| view.protocol == ProtocolSource::Account(*address))
            .collect()
    }

    /// Consume cache events until `shutdown_rx` fires or the cache is
    /// dropped. A lagged receiver recomputes everything.
    pub async fn run(
        self: Arc<Self>,
        mut events: CacheEventReceiver<V>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let computed = self.recompute_all().await;
        info!(venue = V::NAME, funds = computed, "aggregator started");

        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!(venue = V::NAME, "aggregator received shutdown signal");
                        break;
                    }
                }

                event = events.recv() => match event {
                    Ok(event) => {
                        if let Err(e) = self.process(event).await {
                            warn!(venue = V::NAME, error = %e, "failed to apply cache event");
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(venue = V::NAME, missed, "aggregator lagged, recomputing all funds");
                        self.recompute_all().await;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!(venue = V::NAME, "cache event bus closed");
                        break;
                    }
                },
            }
        }

        self.timers.shutdown();
        info!(venue = V::NAME, "aggregator shutdown complete");
    }
}

impl<V: FundVenue> Processor<CacheEvent<V>> for Aggregator<V> {
    type Output = ();
    type Error = AggregatorError;

    async fn process(&self, event: CacheEvent<V>) -> Result<(), AggregatorError> {
        match event {
            CacheEvent::Account {
                address,
                kind,
                data,
                ..
            } => {
                if kind == V::VAULT {
                    if let Some(view) = V::vault_view(&address, &data) {
                        self.on_vault(&view);
                        self.recompute(&address).await?;
                    }
                } else if kind == V::INVESTOR {
                    if let Some(investor) = V::investor_view(&address, &data) {
                        self.on_investor(&investor);
                    }
                } else if V::protocol_view(&data).is_some() {
                    for view in self.vaults_with_protocol(&address) {
                        self.on_vault(&view);
                        self.recompute(&view.address).await?;
                    }
                }
                Ok(())
            }
            CacheEvent::Changed => Ok(()),
            CacheEvent::Error(e) => {
                debug!(venue = V::NAME, error = %e, "subscriber reported an error");
                Ok(())
            }
        }
    }
}
