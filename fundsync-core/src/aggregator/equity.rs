//! Vault equity.
//!
//! How a vault's equity is valued differs per venue and is opaque to the
//! aggregator: it only sees an [`EquityValuation`]. Amounts are quote units.

use super::venue::{InvestorView, ProtocolView, VaultView};
use crate::schema::{DriftAccount, DriftVaults, PhoenixAccount, PhoenixVaults, Venue};
use crate::subscriber::chunk::get_multiple_chunked;
use async_trait::async_trait;
use fundsync_sdk::Pubkey;
use fundsync_sdk::objects::market::MarketState;
use fundsync_sdk::objects::token::token_amount;
use fundsync_sdk::objects::{LayoutError, PERCENTAGE_PRECISION, QUOTE_PRECISION};
use fundsync_sdk::rpc::{AccountRpc, RpcError};
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::{Arc, PoisonError, RwLock};

#[derive(Debug, thiserror::Error)]
pub enum EquityError {
    #[error("rpc error: {0}")]
    Rpc(#[from] RpcError),

    #[error("account {0} not found")]
    MissingAccount(Pubkey),

    #[error("failed to decode {address}: {source}")]
    Layout {
        address: Pubkey,
        #[source]
        source: LayoutError,
    },

    #[error("{0} is not a vault")]
    NotAVault(Pubkey),

    #[error("no equity known for {0}")]
    Unavailable(Pubkey),

    #[error("arithmetic overflow")]
    Overflow,
}

/// Values a vault in quote units.
#[async_trait]
pub trait EquityValuation<V: Venue>: Send + Sync {
    async fn vault_equity(
        &self,
        vault: &Pubkey,
        account: &V::Account,
    ) -> Result<Decimal, EquityError>;
}

/// Quote atoms to quote units.
pub fn quote_units(atoms: i128) -> Decimal {
    Decimal::from_i128_with_scale(atoms, 0) / Decimal::from(QUOTE_PRECISION)
}

fn scale(decimals: u8) -> Result<Decimal, EquityError> {
    Decimal::try_new(1, u32::from(decimals)).map_err(|_| EquityError::Overflow)
}

fn decimal(value: u128) -> Result<Decimal, EquityError> {
    Decimal::from_u128(value).ok_or(EquityError::Overflow)
}

fn product(factors: &[u64]) -> Result<u128, EquityError> {
    factors.iter().try_fold(1u128, |acc, f| {
        acc.checked_mul(u128::from(*f)).ok_or(EquityError::Overflow)
    })
}

/// Value of `trader`'s seat on `market`: quote lots at face value plus base
/// lots at the best bid. An empty bid side values the base side at zero.
pub fn trader_equity(
    market_address: &Pubkey,
    market: &MarketState,
    trader: &Pubkey,
) -> Result<Decimal, EquityError> {
    let Some(seat) = market.trader(trader) else {
        return Ok(Decimal::ZERO);
    };
    let quote_unit = scale(market.quote_decimals)?;
    let base_unit = scale(market.base_decimals)?;

    let quote_atoms = product(&[seat.quote_lots(), market.quote_lot_size])?;
    let quote = decimal(quote_atoms)?
        .checked_mul(quote_unit)
        .ok_or(EquityError::Overflow)?;

    let base_lots = seat.base_lots();
    let base = match market.best_bid() {
        Some(ticks) => {
            let base_units = decimal(product(&[base_lots, market.base_lot_size])?)?
                .checked_mul(base_unit)
                .ok_or(EquityError::Overflow)?;
            let price_atoms = product(&[
                ticks,
                market.tick_size_in_quote_lots_per_base_unit,
                market.quote_lot_size,
            ])?;
            let price = decimal(price_atoms)?
                .checked_mul(quote_unit)
                .ok_or(EquityError::Overflow)?;
            base_units.checked_mul(price).ok_or(EquityError::Overflow)?
        }
        None => {
            if base_lots != 0 {
                tracing::warn!(
                    market = %market_address,
                    %trader,
                    base_lots,
                    "no bid, base position valued at zero"
                );
            }
            Decimal::ZERO
        }
    };
    quote.checked_add(base).ok_or(EquityError::Overflow)
}

async fn token_balance(rpc: &dyn AccountRpc, account: &Pubkey) -> Result<Decimal, EquityError> {
    let info = rpc
        .get_account_info(account)
        .await?
        .value
        .ok_or(EquityError::MissingAccount(*account))?;
    let amount = token_amount(&info.data).map_err(|source| EquityError::Layout {
        address: *account,
        source,
    })?;
    Ok(quote_units(i128::from(amount)))
}

/// Order-book venue: cash in the vault's quote token account plus its seat
/// on every configured market.
pub struct OrderBookEquity {
    rpc: Arc<dyn AccountRpc>,
    markets: Vec<Pubkey>,
}

impl OrderBookEquity {
    pub fn new(rpc: Arc<dyn AccountRpc>, markets: Vec<Pubkey>) -> Self {
        Self { rpc, markets }
    }
}

#[async_trait]
impl EquityValuation<PhoenixVaults> for OrderBookEquity {
    #[tracing::instrument(skip_all, err, name = "Equity:OrderBook", fields(vault = %vault))]
    async fn vault_equity(
        &self,
        vault: &Pubkey,
        account: &PhoenixAccount,
    ) -> Result<Decimal, EquityError> {
        let record = account.as_vault().ok_or(EquityError::NotAVault(*vault))?;
        let mut equity = token_balance(self.rpc.as_ref(), &record.usdc_token_account).await?;

        for loaded in get_multiple_chunked(self.rpc.as_ref(), &self.markets).await? {
            let Some(data) = loaded.data else {
                tracing::warn!(market = %loaded.address, "market account missing, skipped");
                continue;
            };
            let market = MarketState::decode(&data).map_err(|source| EquityError::Layout {
                address: loaded.address,
                source,
            })?;
            equity = equity
                .checked_add(trader_equity(&loaded.address, &market, vault)?)
                .ok_or(EquityError::Overflow)?;
        }
        Ok(equity)
    }
}

/// Margin venue, cash only: the balance of the vault's token account.
pub struct TokenBalanceEquity {
    rpc: Arc<dyn AccountRpc>,
}

impl TokenBalanceEquity {
    pub fn new(rpc: Arc<dyn AccountRpc>) -> Self {
        Self { rpc }
    }
}

#[async_trait]
impl EquityValuation<DriftVaults> for TokenBalanceEquity {
    async fn vault_equity(
        &self,
        vault: &Pubkey,
        account: &DriftAccount,
    ) -> Result<Decimal, EquityError> {
        let record = account.as_vault().ok_or(EquityError::NotAVault(*vault))?;
        token_balance(self.rpc.as_ref(), &record.token_account).await
    }
}

/// Equity figures supplied from outside, e.g. by a margin engine.
pub struct ExternalEquity<V> {
    values: RwLock<HashMap<Pubkey, Decimal>>,
    _venue: PhantomData<fn() -> V>,
}

impl<V> Default for ExternalEquity<V> {
    fn default() -> Self {
        Self {
            values: RwLock::new(HashMap::new()),
            _venue: PhantomData,
        }
    }
}

impl<V> ExternalEquity<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, vault: Pubkey, equity: Decimal) {
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(vault, equity);
    }

    pub fn get(&self, vault: &Pubkey) -> Option<Decimal> {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(vault)
            .copied()
    }
}

#[async_trait]
impl<V: Venue> EquityValuation<V> for ExternalEquity<V> {
    async fn vault_equity(
        &self,
        vault: &Pubkey,
        _account: &V::Account,
    ) -> Result<Decimal, EquityError> {
        self.get(vault).ok_or(EquityError::Unavailable(*vault))
    }
}

/// What the investor would receive now: their share of `vault_equity`
/// minus manager and protocol profit share on any gain.
pub fn realized_investor_equity(
    vault: &VaultView,
    protocol: Option<&ProtocolView>,
    investor: &InvestorView,
    vault_equity: Decimal,
) -> Result<Decimal, EquityError> {
    if vault.total_shares == 0 {
        return Ok(Decimal::ZERO);
    }
    let amount = decimal(investor.shares)?
        .checked_mul(vault_equity)
        .and_then(|v| v.checked_div(decimal(vault.total_shares).ok()?))
        .ok_or(EquityError::Overflow)?
        .max(Decimal::ZERO);

    let basis = quote_units(
        i128::from(investor.net_deposits) + i128::from(investor.cumulative_profit_share),
    );
    let profit = amount.checked_sub(basis).ok_or(EquityError::Overflow)?;
    if profit <= Decimal::ZERO {
        return Ok(amount);
    }

    let share = u64::from(vault.profit_share)
        + protocol.map_or(0, |p| u64::from(p.profit_share));
    let fee = profit
        .checked_mul(Decimal::from(share))
        .ok_or(EquityError::Overflow)?
        / Decimal::from(PERCENTAGE_PRECISION);
    amount.checked_sub(fee).ok_or(EquityError::Overflow)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::venue::ProtocolSource;
    use fundsync_sdk::objects::WithdrawRequest;
    use fundsync_sdk::objects::market::TraderState;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn vault(total_shares: u128, profit_share: u32) -> VaultView {
        VaultView {
            address: Pubkey::new_from_array([1u8; 32]),
            manager: Pubkey::new_from_array([2u8; 32]),
            title: "fund".into(),
            init_ts: 0,
            total_shares,
            redeem_period: 0,
            profit_share,
            manager_profit: 0,
            manager_withdraw: WithdrawRequest::default(),
            protocol: ProtocolSource::None,
        }
    }

    fn investor(shares: u128, net_deposits: i64) -> InvestorView {
        InvestorView {
            address: Pubkey::new_from_array([3u8; 32]),
            vault: Pubkey::new_from_array([1u8; 32]),
            authority: Pubkey::new_from_array([4u8; 32]),
            shares,
            net_deposits,
            cumulative_profit_share: 0,
            withdraw: WithdrawRequest::default(),
        }
    }

    #[test]
    fn test_quarter_of_fund_without_gain() {
        let equity = realized_investor_equity(
            &vault(1000, 200_000),
            None,
            &investor(250, 2_500_000_000),
            dec("10000"),
        )
        .unwrap();
        assert_eq!(equity, dec("2500"));
    }

    #[test]
    fn test_profit_share_taken_from_gain() {
        let protocol = ProtocolView {
            authority: Pubkey::default(),
            total_profit_share: 0,
            profit_share: 50_000,
            withdraw: WithdrawRequest::default(),
        };
        // 2500 worth, 2000 deposited: 500 gain, 25% of it goes.
        let equity = realized_investor_equity(
            &vault(1000, 200_000),
            Some(&protocol),
            &investor(250, 2_000_000_000),
            dec("10000"),
        )
        .unwrap();
        assert_eq!(equity, dec("2375"));
    }

    #[test]
    fn test_empty_vault_is_worth_nothing() {
        let equity =
            realized_investor_equity(&vault(0, 0), None, &investor(10, 0), dec("5")).unwrap();
        assert_eq!(equity, Decimal::ZERO);
    }

    #[test]
    fn test_trader_valued_at_best_bid() {
        let trader = Pubkey::new_from_array([9u8; 32]);
        let mut market = MarketState {
            base_decimals: 9,
            quote_decimals: 6,
            base_lot_size: 1_000_000,
            quote_lot_size: 1,
            tick_size_in_quote_lots_per_base_unit: 1_000,
            best_bid_ticks: 150_000,
            best_ask_ticks: 160_000,
            traders: vec![TraderState {
                trader,
                base_lots_free: 2_000,
                quote_lots_free: 5_000_000,
                ..Default::default()
            }],
            ..Default::default()
        };
        // 2 base units at 150 plus 5 quote units.
        let address = Pubkey::default();
        assert_eq!(trader_equity(&address, &market, &trader).unwrap(), dec("305"));

        market.best_bid_ticks = 0;
        assert_eq!(trader_equity(&address, &market, &trader).unwrap(), dec("5"));
        assert_eq!(
            trader_equity(&address, &market, &Pubkey::new_from_array([7u8; 32])).unwrap(),
            Decimal::ZERO
        );
    }

    #[test]
    fn test_trader_at_lot_limits_is_an_error() {
        let trader = Pubkey::new_from_array([9u8; 32]);
        let mut market = MarketState {
            quote_lot_size: u64::MAX,
            tick_size_in_quote_lots_per_base_unit: u64::MAX,
            best_bid_ticks: u64::MAX,
            traders: vec![TraderState {
                trader,
                base_lots_free: 1,
                ..Default::default()
            }],
            ..Default::default()
        };
        let address = Pubkey::default();
        // ticks * tick size * quote lot size does not fit in u128.
        assert!(matches!(
            trader_equity(&address, &market, &trader),
            Err(EquityError::Overflow)
        ));

        // Fits in u128 but not in a Decimal.
        market.quote_lot_size = 1;
        assert!(matches!(
            trader_equity(&address, &market, &trader),
            Err(EquityError::Overflow)
        ));

        market.best_bid_ticks = 0;
        market.traders[0].base_lots_free = u64::MAX;
        market.traders[0].base_lots_locked = u64::MAX;
        market.traders[0].quote_lots_free = u64::MAX;
        market.quote_lot_size = u64::MAX;
        assert!(matches!(
            trader_equity(&address, &market, &trader),
            Err(EquityError::Overflow)
        ));
    }

    #[test]
    fn test_investor_share_limits_are_an_error() {
        assert!(matches!(
            realized_investor_equity(&vault(1, 0), None, &investor(u128::MAX, 0), dec("1")),
            Err(EquityError::Overflow)
        ));
        assert!(matches!(
            realized_investor_equity(&vault(u128::MAX, 0), None, &investor(1, 0), dec("1")),
            Err(EquityError::Overflow)
        ));
        // Shares fit in a Decimal, shares times equity does not.
        let shares = u128::from(u64::MAX) << 30;
        let equity = dec("1000000000000");
        assert!(matches!(
            realized_investor_equity(&vault(1, 0), None, &investor(shares, 0), equity),
            Err(EquityError::Overflow)
        ));
    }

    #[tokio::test]
    async fn test_external_equity_needs_a_value() {
        let external = ExternalEquity::<DriftVaults>::new();
        let vault = Pubkey::new_from_array([1u8; 32]);
        let account = DriftAccount::Vault(Box::default());
        assert!(matches!(
            external.vault_equity(&vault, &account).await,
            Err(EquityError::Unavailable(_))
        ));
        external.set(vault, dec("42.5"));
        assert_eq!(external.vault_equity(&vault, &account).await.unwrap(), dec("42.5"));
    }
}
