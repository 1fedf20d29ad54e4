//! Binary layouts of the accounts mirrored by fundsync.
//!
//! Program accounts are borsh-encoded after their 8-byte [`Discriminator`].
//! Order-book market state and token accounts belong to other programs and
//! carry no discriminator.

pub mod drift;
pub mod market;
pub mod phoenix;
pub mod token;

use crate::discriminator::{DISCRIMINATOR_LEN, Discriminator};
use borsh::{BorshDeserialize, BorshSerialize};

/// Quote amounts are stored in atoms of a 6-decimal stablecoin.
pub const QUOTE_PRECISION: u64 = 1_000_000;

/// Profit-share and fee percentages are stored with 6 decimals (100% = 1_000_000).
pub const PERCENTAGE_PRECISION: u64 = 1_000_000;

/// Errors produced while decoding an account layout.
#[derive(Debug, thiserror::Error)]
pub enum LayoutError {
    #[error("account data too short: {len} bytes")]
    TooShort { len: usize },

    #[error("discriminator mismatch: expected {expected}, found {actual}")]
    DiscriminatorMismatch {
        expected: Discriminator,
        actual: Discriminator,
    },

    #[error("malformed account body: {0}")]
    Malformed(#[from] std::io::Error),
}

/// A program account layout identified by its discriminator.
pub trait AccountLayout: BorshDeserialize + BorshSerialize + Sized {
    /// Account type name the discriminator is derived from.
    const NAME: &'static str;

    fn discriminator() -> Discriminator {
        Discriminator::for_account(Self::NAME)
    }

    /// Decode raw account data, tag included.
    ///
    /// Trailing bytes after the layout are ignored; accounts are often
    /// allocated with padding.
    fn try_from_account_data(data: &[u8]) -> Result<Self, LayoutError> {
        let actual = Discriminator::read(data).ok_or(LayoutError::TooShort { len: data.len() })?;
        let expected = Self::discriminator();
        if actual != expected {
            return Err(LayoutError::DiscriminatorMismatch { expected, actual });
        }
        let mut body = &data[DISCRIMINATOR_LEN..];
        Ok(Self::deserialize(&mut body)?)
    }

    /// Serialize into raw account data, tag included.
    fn to_account_data(&self) -> std::io::Result<Vec<u8>> {
        let mut out = Self::discriminator().0.to_vec();
        self.serialize(&mut out)?;
        Ok(out)
    }
}

/// A pending withdrawal. `value == 0` means no request is outstanding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct WithdrawRequest {
    /// Shares requested for withdrawal.
    pub shares: u128,
    /// Quote atoms requested, fixed at request time.
    pub value: u64,
    /// Unix timestamp of the request.
    pub ts: i64,
}

impl WithdrawRequest {
    pub fn is_pending(&self) -> bool {
        self.value != 0 && self.ts != 0
    }
}

/// Decode a fixed 32-byte, zero- or space-padded vault name.
pub fn decode_name(bytes: &[u8; 32]) -> String {
    String::from_utf8_lossy(bytes)
        .trim_end_matches(['\0', ' '])
        .to_string()
}

/// Encode a vault name into the fixed 32-byte field, truncating if needed.
pub fn encode_name(name: &str) -> [u8; 32] {
    let mut out = [b' '; 32];
    for (dst, src) in out.iter_mut().zip(name.bytes()) {
        *dst = src;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_round_trip() {
        assert_eq!(decode_name(&encode_name("Momentum Fund")), "Momentum Fund");
        let mut zero_padded = [0u8; 32];
        zero_padded[..3].copy_from_slice(b"abc");
        assert_eq!(decode_name(&zero_padded), "abc");
    }

    #[test]
    fn test_withdraw_request_pending() {
        assert!(!WithdrawRequest::default().is_pending());
        let request = WithdrawRequest {
            shares: 10,
            value: 5,
            ts: 1_700_000_000,
        };
        assert!(request.is_pending());
        assert!(!WithdrawRequest { ts: 0, ..request }.is_pending());
    }
}
