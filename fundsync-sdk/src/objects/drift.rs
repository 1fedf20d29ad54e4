//! Accounts of the margin venue's vault program.

use super::{AccountLayout, WithdrawRequest, decode_name};
use crate::pubkey::Pubkey;
use borsh::{BorshDeserialize, BorshSerialize};

/// A pooled fund trading on the margin venue.
#[derive(Debug, Clone, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Vault {
    pub name: [u8; 32],
    pub pubkey: Pubkey,
    pub manager: Pubkey,
    /// Token account holding undeployed deposits.
    pub token_account: Pubkey,
    /// The venue's margin account traded by the vault.
    pub user: Pubkey,
    pub delegate: Pubkey,
    /// Companion [`VaultProtocol`] account, or the default key when the
    /// vault has no protocol fee arrangement.
    pub vault_protocol: Pubkey,
    pub user_shares: u128,
    pub total_shares: u128,
    pub last_fee_update_ts: i64,
    pub liquidation_start_ts: i64,
    /// Seconds between a withdraw request and when it may be executed.
    pub redeem_period: i64,
    pub total_withdraw_requested: u64,
    pub max_tokens: u64,
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
    pub spot_market_index: u16,
    pub bump: u8,
    pub permissioned: bool,
}

impl AccountLayout for Vault {
    const NAME: &'static str = "Vault";
}

impl Vault {
    pub fn title(&self) -> String {
        decode_name(&self.name)
    }

    pub fn protocol_account(&self) -> Option<Pubkey> {
        (!self.vault_protocol.is_default()).then_some(self.vault_protocol)
    }
}

/// One depositor's claim on a [`Vault`].
#[derive(Debug, Clone, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct VaultDepositor {
    pub vault: Pubkey,
    pub pubkey: Pubkey,
    pub authority: Pubkey,
    pub vault_shares: u128,
    pub last_withdraw_request: WithdrawRequest,
    pub last_valid_ts: i64,
    pub net_deposits: i64,
    pub total_deposits: u64,
    pub total_withdraws: u64,
    /// Profit share paid so far, in quote atoms.
    pub cumulative_profit_share_amount: i64,
    pub profit_share_fee_paid: u64,
    pub vault_shares_base: u32,
}

impl AccountLayout for VaultDepositor {
    const NAME: &'static str = "VaultDepositor";
}

/// Protocol fee arrangement attached to a [`Vault`].
#[derive(Debug, Clone, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct VaultProtocol {
    pub protocol: Pubkey,
    pub protocol_profit_and_fee_shares: u128,
    pub protocol_fee: u64,
    pub protocol_total_withdraws: u64,
    pub protocol_total_fee: u64,
    pub protocol_total_profit_share: u64,
    pub last_protocol_withdraw_request: WithdrawRequest,
    pub protocol_profit_share: u32,
    pub bump: u8,
}

impl AccountLayout for VaultProtocol {
    const NAME: &'static str = "VaultProtocol";
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::{LayoutError, encode_name};

    #[test]
    fn test_vault_decodes_with_padding() {
        let vault = Vault {
            name: encode_name("Basis Trade"),
            manager: Pubkey::new_from_array([3u8; 32]),
            total_shares: 1_000,
            redeem_period: 3_600,
            ..Default::default()
        };
        let mut data = vault.to_account_data().unwrap();
        data.extend_from_slice(&[0u8; 64]);

        let decoded = Vault::try_from_account_data(&data).unwrap();
        assert_eq!(decoded, vault);
        assert_eq!(decoded.title(), "Basis Trade");
        assert_eq!(decoded.protocol_account(), None);
    }

    #[test]
    fn test_wrong_tag_is_rejected() {
        let depositor = VaultDepositor::default().to_account_data().unwrap();
        let err = Vault::try_from_account_data(&depositor).unwrap_err();
        assert!(matches!(err, LayoutError::DiscriminatorMismatch { .. }));
    }

    #[test]
    fn test_truncated_body_is_malformed() {
        let data = Vault::default().to_account_data().unwrap();
        let err = Vault::try_from_account_data(&data[..40]).unwrap_err();
        assert!(matches!(err, LayoutError::Malformed(_)));
    }
}
