//! Accounts of the order-book venue's vault program.

use super::{AccountLayout, WithdrawRequest, decode_name};
use crate::pubkey::Pubkey;
use borsh::{BorshDeserialize, BorshSerialize};

/// A pooled fund trading on the order-book venue.
///
/// Unlike the margin venue, protocol fee bookkeeping lives on the vault
/// itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Vault {
    pub name: [u8; 32],
    pub pubkey: Pubkey,
    pub manager: Pubkey,
    pub protocol: Pubkey,
    pub delegate: Pubkey,
    /// Quote token account; its balance is the vault's cash.
    pub usdc_token_account: Pubkey,
    pub sol_token_account: Pubkey,
    pub user_shares: u128,
    pub total_shares: u128,
    pub last_fee_update_ts: i64,
    pub liquidation_start_ts: i64,
    pub redeem_period: i64,
    pub total_withdraw_requested: u64,
    pub management_fee: i64,
    pub init_ts: i64,
    pub net_deposits: i64,
    pub manager_net_deposits: i64,
    pub total_deposits: u64,
    pub total_withdraws: u64,
    pub manager_total_deposits: u64,
    pub manager_total_withdraws: u64,
    pub manager_total_fee: i64,
    pub manager_total_profit_share: u64,
    pub min_deposit_amount: u64,
    pub last_manager_withdraw_request: WithdrawRequest,
    pub shares_base: u32,
    pub profit_share: u32,
    pub hurdle_rate: u32,
    pub bump: u8,
    pub permissioned: bool,
    pub protocol_profit_and_fee_shares: u128,
    pub protocol_fee: i64,
    pub protocol_total_withdraws: u64,
    pub protocol_total_fee: i64,
    pub protocol_total_profit_share: u64,
    pub last_protocol_withdraw_request: WithdrawRequest,
    pub protocol_profit_share: u32,
}

impl AccountLayout for Vault {
    const NAME: &'static str = "Vault";
}

impl Vault {
    pub fn title(&self) -> String {
        decode_name(&self.name)
    }
}

/// One depositor's claim on a [`Vault`].
#[derive(Debug, Clone, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Investor {
    pub vault: Pubkey,
    pub pubkey: Pubkey,
    pub authority: Pubkey,
    pub vault_shares: u128,
    pub last_withdraw_request: WithdrawRequest,
    pub last_valid_ts: i64,
    pub net_deposits: i64,
    pub total_deposits: u64,
    pub total_withdraws: u64,
    pub cumulative_profit_share_amount: i64,
    pub profit_share_fee_paid: u64,
    pub vault_shares_base: u32,
}

impl AccountLayout for Investor {
    const NAME: &'static str = "Investor";
}

/// Registry of the markets vaults on this venue may trade.
#[derive(Debug, Clone, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct MarketRegistry {
    pub authority: Pubkey,
    pub sol_usdc_market: Pubkey,
    pub usdc_mint: Pubkey,
    pub sol_mint: Pubkey,
}

impl AccountLayout for MarketRegistry {
    const NAME: &'static str = "MarketRegistry";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_investor_decodes() {
        let investor = Investor {
            vault: Pubkey::new_from_array([1u8; 32]),
            authority: Pubkey::new_from_array([2u8; 32]),
            vault_shares: 250,
            ..Default::default()
        };
        let data = investor.to_account_data().unwrap();
        assert_eq!(Investor::try_from_account_data(&data).unwrap(), investor);
    }

    #[test]
    fn test_vault_tag_shared_name_differs_from_investor() {
        assert_ne!(Vault::discriminator(), Investor::discriminator());
        assert_ne!(Vault::discriminator(), MarketRegistry::discriminator());
    }
}
