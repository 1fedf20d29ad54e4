use super::equity::quote_units;
use super::venue::{InvestorView, ProtocolView, VaultView};
use fundsync_sdk::Pubkey;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use time::OffsetDateTime;

/// Fund-level figures of one vault, in quote units.
///
/// Replaced wholesale on every recompute.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FundOverview {
    pub vault: Pubkey,
    pub manager: Pubkey,
    pub venue: &'static str,
    pub tvl: Decimal,
    /// Sum of every investor's cumulative profit share.
    pub investor_profit: Decimal,
    pub manager_profit: Decimal,
    pub protocol_profit: Decimal,
    pub profit_after_fees: Decimal,
    pub birth: OffsetDateTime,
    pub title: String,
    /// Investor account → cumulative profit share.
    pub investors: BTreeMap<Pubkey, Decimal>,
}

impl FundOverview {
    pub fn build(
        venue: &'static str,
        vault: &VaultView,
        protocol: Option<&ProtocolView>,
        investors: &[InvestorView],
        tvl: Decimal,
    ) -> Self {
        let investors: BTreeMap<Pubkey, Decimal> = investors
            .iter()
            .filter(|i| i.vault == vault.address)
            .map(|i| (i.address, quote_units(i128::from(i.cumulative_profit_share))))
            .collect();
        let investor_profit: Decimal = investors.values().copied().sum();
        let manager_profit = quote_units(i128::from(vault.manager_profit));
        let protocol_profit =
            protocol.map_or(Decimal::ZERO, |p| quote_units(i128::from(p.total_profit_share)));

        Self {
            vault: vault.address,
            manager: vault.manager,
            venue,
            tvl,
            investor_profit,
            manager_profit,
            protocol_profit,
            profit_after_fees: investor_profit - manager_profit - protocol_profit,
            birth: OffsetDateTime::from_unix_timestamp(vault.init_ts)
                .unwrap_or(OffsetDateTime::UNIX_EPOCH),
            title: vault.title.clone(),
            investors,
        }
    }

    /// Dollar profit, the ordering key of fund lists.
    pub fn profit(&self) -> Decimal {
        self.investor_profit
    }

    /// Profit over the capital it was made on, in percent. `None` for dust
    /// funds and when no capital remains; an empty fund has no PnL rather
    /// than a PnL of zero.
    pub fn pnl_pct(&self, dust_threshold: Decimal) -> Option<Decimal> {
        if self.tvl < dust_threshold {
            return None;
        }
        let capital = self.tvl - self.investor_profit;
        if capital <= Decimal::ZERO {
            return None;
        }
        self.investor_profit
            .checked_div(capital)?
            .checked_mul(Decimal::ONE_HUNDRED)
    }

    pub fn has_investor(&self, investor: &Pubkey) -> bool {
        self.investors.contains_key(investor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::venue::ProtocolSource;
    use fundsync_sdk::objects::WithdrawRequest;

    fn vault() -> VaultView {
        VaultView {
            address: Pubkey::new_from_array([1u8; 32]),
            manager: Pubkey::new_from_array([2u8; 32]),
            title: "Alpha".into(),
            init_ts: 1_700_000_000,
            total_shares: 1000,
            redeem_period: 86_400,
            profit_share: 100_000,
            manager_profit: 30_000_000,
            manager_withdraw: WithdrawRequest::default(),
            protocol: ProtocolSource::None,
        }
    }

    fn investor(n: u8, vault: Pubkey, profit_atoms: i64) -> InvestorView {
        InvestorView {
            address: Pubkey::new_from_array([n; 32]),
            vault,
            authority: Pubkey::new_from_array([n + 100; 32]),
            shares: 100,
            net_deposits: 0,
            cumulative_profit_share: profit_atoms,
            withdraw: WithdrawRequest::default(),
        }
    }

    #[test]
    fn test_profit_identities() {
        let v = vault();
        let protocol = ProtocolView {
            authority: Pubkey::default(),
            total_profit_share: 10_000_000,
            profit_share: 0,
            withdraw: WithdrawRequest::default(),
        };
        let investors = [
            investor(10, v.address, 150_000_000),
            investor(11, v.address, 50_000_000),
            investor(12, Pubkey::new_from_array([9u8; 32]), 999_000_000),
        ];
        let tvl = Decimal::from(10_000);
        let overview = FundOverview::build("phoenix", &v, Some(&protocol), &investors, tvl);

        assert_eq!(overview.investors.len(), 2);
        assert_eq!(overview.investor_profit, Decimal::from(200));
        assert_eq!(overview.manager_profit, Decimal::from(30));
        assert_eq!(overview.protocol_profit, Decimal::from(10));
        assert_eq!(
            overview.profit_after_fees,
            overview.investor_profit - overview.manager_profit - overview.protocol_profit
        );
        assert_eq!(overview.birth.unix_timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_pnl_pct_edges() {
        let v = vault();
        let investors = [investor(10, v.address, 1_000_000_000)];
        let overview = FundOverview::build("drift", &v, None, &investors, Decimal::from(11_000));
        assert_eq!(overview.pnl_pct(Decimal::ONE), Some(Decimal::from(10)));

        let dust = FundOverview::build("drift", &v, None, &[], Decimal::new(5, 1));
        assert_eq!(dust.pnl_pct(Decimal::ONE), None);

        let drained = FundOverview::build("drift", &v, None, &investors, Decimal::from(1_000));
        assert_eq!(drained.pnl_pct(Decimal::ONE), None);

        let empty = FundOverview::build("drift", &v, None, &[], Decimal::ZERO);
        assert_eq!(empty.pnl_pct(Decimal::ZERO), None);
    }
}
