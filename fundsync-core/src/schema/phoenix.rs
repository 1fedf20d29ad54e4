//! Schema for the order-book venue's vault program.

use super::{AccountKind, Venue};
use fundsync_sdk::Discriminator;
use fundsync_sdk::objects::phoenix::{Investor, MarketRegistry, Vault};
use fundsync_sdk::objects::{AccountLayout, LayoutError};
use std::fmt;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhoenixVaults;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PhoenixAccountKind {
    Vault,
    Investor,
    MarketRegistry,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhoenixAccount {
    Vault(Box<Vault>),
    Investor(Box<Investor>),
    MarketRegistry(Box<MarketRegistry>),
}

impl PhoenixAccount {
    pub fn as_vault(&self) -> Option<&Vault> {
        match self {
            PhoenixAccount::Vault(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_investor(&self) -> Option<&Investor> {
        match self {
            PhoenixAccount::Investor(i) => Some(i),
            _ => None,
        }
    }

    pub fn as_market_registry(&self) -> Option<&MarketRegistry> {
        match self {
            PhoenixAccount::MarketRegistry(r) => Some(r),
            _ => None,
        }
    }
}

impl fmt::Display for PhoenixAccountKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PhoenixAccountKind::Vault => Vault::NAME,
            PhoenixAccountKind::Investor => Investor::NAME,
            PhoenixAccountKind::MarketRegistry => MarketRegistry::NAME,
        })
    }
}

impl AccountKind for PhoenixAccountKind {
    fn all() -> &'static [Self] {
        &[
            PhoenixAccountKind::Vault,
            PhoenixAccountKind::Investor,
            PhoenixAccountKind::MarketRegistry,
        ]
    }

    fn discriminator(self) -> Discriminator {
        match self {
            PhoenixAccountKind::Vault => Vault::discriminator(),
            PhoenixAccountKind::Investor => Investor::discriminator(),
            PhoenixAccountKind::MarketRegistry => MarketRegistry::discriminator(),
        }
    }
}

impl Venue for PhoenixVaults {
    type Kind = PhoenixAccountKind;
    type Account = PhoenixAccount;

    const NAME: &'static str = "phoenix";

    fn decode(kind: PhoenixAccountKind, data: &[u8]) -> Result<PhoenixAccount, LayoutError> {
        Ok(match kind {
            PhoenixAccountKind::Vault => {
                PhoenixAccount::Vault(Box::new(Vault::try_from_account_data(data)?))
            }
            PhoenixAccountKind::Investor => {
                PhoenixAccount::Investor(Box::new(Investor::try_from_account_data(data)?))
            }
            PhoenixAccountKind::MarketRegistry => PhoenixAccount::MarketRegistry(Box::new(
                MarketRegistry::try_from_account_data(data)?,
            )),
        })
    }

    fn kind_of(account: &PhoenixAccount) -> PhoenixAccountKind {
        match account {
            PhoenixAccount::Vault(_) => PhoenixAccountKind::Vault,
            PhoenixAccount::Investor(_) => PhoenixAccountKind::Investor,
            PhoenixAccount::MarketRegistry(_) => PhoenixAccountKind::MarketRegistry,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaRegistry;

    #[test]
    fn test_registry_knows_every_kind() {
        let registry = SchemaRegistry::<PhoenixVaults>::new();
        for kind in PhoenixAccountKind::all() {
            let mut data = kind.discriminator().as_bytes().to_vec();
            data.resize(2048, 0);
            assert_eq!(registry.resolve(&data).unwrap(), *kind);
        }
    }

    #[test]
    fn test_registry_decodes_market_registry() {
        let registry = MarketRegistry {
            sol_usdc_market: fundsync_sdk::Pubkey::new_from_array([5u8; 32]),
            ..Default::default()
        };
        let data = registry.to_account_data().unwrap();
        let (kind, account) = SchemaRegistry::<PhoenixVaults>::new()
            .decode_tagged(&data)
            .unwrap();
        assert_eq!(kind, PhoenixAccountKind::MarketRegistry);
        assert_eq!(account.as_market_registry(), Some(&registry));
    }
}
