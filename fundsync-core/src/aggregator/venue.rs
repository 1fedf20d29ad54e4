//! Venue-neutral views of vault, investor and protocol records.

use crate::schema::{
    DriftAccount, DriftAccountKind, DriftVaults, PhoenixAccount, PhoenixAccountKind,
    PhoenixVaults, Venue,
};
use fundsync_sdk::Pubkey;
use fundsync_sdk::objects::WithdrawRequest;

/// Protocol-side profit figures of a vault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolView {
    pub authority: Pubkey,
    /// Quote atoms.
    pub total_profit_share: u64,
    pub profit_share: u32,
    pub withdraw: WithdrawRequest,
}

/// Where a vault keeps its protocol figures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolSource {
    None,
    Embedded(ProtocolView),
    /// A separate record at this address.
    Account(Pubkey),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultView {
    pub address: Pubkey,
    pub manager: Pubkey,
    pub title: String,
    pub init_ts: i64,
    pub total_shares: u128,
    pub redeem_period: i64,
    pub profit_share: u32,
    /// Quote atoms.
    pub manager_profit: u64,
    pub manager_withdraw: WithdrawRequest,
    pub protocol: ProtocolSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvestorView {
    pub address: Pubkey,
    pub vault: Pubkey,
    pub authority: Pubkey,
    pub shares: u128,
    /// Quote atoms.
    pub net_deposits: i64,
    /// Quote atoms.
    pub cumulative_profit_share: i64,
    pub withdraw: WithdrawRequest,
}

/// A venue whose records describe funds.
pub trait FundVenue: Venue {
    const VAULT: Self::Kind;
    const INVESTOR: Self::Kind;

    fn vault_view(address: &Pubkey, account: &Self::Account) -> Option<VaultView>;

    fn investor_view(address: &Pubkey, account: &Self::Account) -> Option<InvestorView>;

    /// A standalone protocol record, for venues that have one.
    fn protocol_view(_account: &Self::Account) -> Option<ProtocolView> {
        None
    }
}

impl FundVenue for PhoenixVaults {
    const VAULT: PhoenixAccountKind = PhoenixAccountKind::Vault;
    const INVESTOR: PhoenixAccountKind = PhoenixAccountKind::Investor;

    fn vault_view(address: &Pubkey, account: &PhoenixAccount) -> Option<VaultView> {
        let vault = account.as_vault()?;
        Some(VaultView {
            address: *address,
            manager: vault.manager,
            title: vault.title(),
            init_ts: vault.init_ts,
            total_shares: vault.total_shares,
            redeem_period: vault.redeem_period,
            profit_share: vault.profit_share,
            manager_profit: vault.manager_total_profit_share,
            manager_withdraw: vault.last_manager_withdraw_request,
            protocol: ProtocolSource::Embedded(ProtocolView {
                authority: vault.protocol,
                total_profit_share: vault.protocol_total_profit_share,
                profit_share: vault.protocol_profit_share,
                withdraw: vault.last_protocol_withdraw_request,
            }),
        })
    }

    fn investor_view(address: &Pubkey, account: &PhoenixAccount) -> Option<InvestorView> {
        let investor = account.as_investor()?;
        Some(InvestorView {
            address: *address,
            vault: investor.vault,
            authority: investor.authority,
            shares: investor.vault_shares,
            net_deposits: investor.net_deposits,
            cumulative_profit_share: investor.cumulative_profit_share_amount,
            withdraw: investor.last_withdraw_request,
        })
    }
}

impl FundVenue for DriftVaults {
    const VAULT: DriftAccountKind = DriftAccountKind::Vault;
    const INVESTOR: DriftAccountKind = DriftAccountKind::VaultDepositor;

    fn vault_view(address: &Pubkey, account: &DriftAccount) -> Option<VaultView> {
        let vault = account.as_vault()?;
        Some(VaultView {
            address: *address,
            manager: vault.manager,
            title: vault.title(),
            init_ts: vault.init_ts,
            total_shares: vault.total_shares,
            redeem_period: vault.redeem_period,
            profit_share: vault.profit_share,
            manager_profit: vault.manager_total_profit_share,
            manager_withdraw: vault.last_manager_withdraw_request,
            protocol: vault
                .protocol_account()
                .map_or(ProtocolSource::None, ProtocolSource::Account),
        })
    }

    fn investor_view(address: &Pubkey, account: &DriftAccount) -> Option<InvestorView> {
        let depositor = account.as_depositor()?;
        Some(InvestorView {
            address: *address,
            vault: depositor.vault,
            authority: depositor.authority,
            shares: depositor.vault_shares,
            net_deposits: depositor.net_deposits,
            cumulative_profit_share: depositor.cumulative_profit_share_amount,
            withdraw: depositor.last_withdraw_request,
        })
    }

    fn protocol_view(account: &DriftAccount) -> Option<ProtocolView> {
        let protocol = account.as_protocol()?;
        Some(ProtocolView {
            authority: protocol.protocol,
            total_profit_share: protocol.protocol_total_profit_share,
            profit_share: protocol.protocol_profit_share,
            withdraw: protocol.last_protocol_withdraw_request,
        })
    }
}
