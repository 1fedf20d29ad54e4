//! Schema for the margin venue's vault program.

use super::{AccountKind, Venue};
use fundsync_sdk::Discriminator;
use fundsync_sdk::objects::drift::{Vault, VaultDepositor, VaultProtocol};
use fundsync_sdk::objects::{AccountLayout, LayoutError};
use std::fmt;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriftVaults;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriftAccountKind {
    Vault,
    VaultDepositor,
    VaultProtocol,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriftAccount {
    Vault(Box<Vault>),
    VaultDepositor(Box<VaultDepositor>),
    VaultProtocol(Box<VaultProtocol>),
}

impl DriftAccount {
    pub fn as_vault(&self) -> Option<&Vault> {
        match self {
            DriftAccount::Vault(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_depositor(&self) -> Option<&VaultDepositor> {
        match self {
            DriftAccount::VaultDepositor(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_protocol(&self) -> Option<&VaultProtocol> {
        match self {
            DriftAccount::VaultProtocol(p) => Some(p),
            _ => None,
        }
    }
}

impl fmt::Display for DriftAccountKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DriftAccountKind::Vault => Vault::NAME,
            DriftAccountKind::VaultDepositor => VaultDepositor::NAME,
            DriftAccountKind::VaultProtocol => VaultProtocol::NAME,
        })
    }
}

impl AccountKind for DriftAccountKind {
    fn all() -> &'static [Self] {
        &[
            DriftAccountKind::Vault,
            DriftAccountKind::VaultDepositor,
            DriftAccountKind::VaultProtocol,
        ]
    }

    fn discriminator(self) -> Discriminator {
        match self {
            DriftAccountKind::Vault => Vault::discriminator(),
            DriftAccountKind::VaultDepositor => VaultDepositor::discriminator(),
            DriftAccountKind::VaultProtocol => VaultProtocol::discriminator(),
        }
    }
}

impl Venue for DriftVaults {
    type Kind = DriftAccountKind;
    type Account = DriftAccount;

    const NAME: &'static str = "drift";

    fn decode(kind: DriftAccountKind, data: &[u8]) -> Result<DriftAccount, LayoutError> {
        Ok(match kind {
            DriftAccountKind::Vault => {
                DriftAccount::Vault(Box::new(Vault::try_from_account_data(data)?))
            }
            DriftAccountKind::VaultDepositor => {
                DriftAccount::VaultDepositor(Box::new(VaultDepositor::try_from_account_data(data)?))
            }
            DriftAccountKind::VaultProtocol => {
                DriftAccount::VaultProtocol(Box::new(VaultProtocol::try_from_account_data(data)?))
            }
        })
    }

    fn kind_of(account: &DriftAccount) -> DriftAccountKind {
        match account {
            DriftAccount::Vault(_) => DriftAccountKind::Vault,
            DriftAccount::VaultDepositor(_) => DriftAccountKind::VaultDepositor,
            DriftAccount::VaultProtocol(_) => DriftAccountKind::VaultProtocol,
        }
    }
}
