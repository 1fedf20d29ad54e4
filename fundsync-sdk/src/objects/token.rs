//! SPL token account balance.

use super::LayoutError;

/// Size of a classic SPL token account.
pub const TOKEN_ACCOUNT_LEN: usize = 165;

const AMOUNT_OFFSET: usize = 64;

/// Read the raw token amount (mint and owner precede it).
pub fn token_amount(data: &[u8]) -> Result<u64, LayoutError> {
    let raw: [u8; 8] = data
        .get(AMOUNT_OFFSET..AMOUNT_OFFSET + 8)
        .and_then(|s| s.try_into().ok())
        .ok_or(LayoutError::TooShort { len: data.len() })?;
    Ok(u64::from_le_bytes(raw))
}

/// Build token account data holding `amount`, for tests and fixtures.
pub fn token_account_data(amount: u64) -> Vec<u8> {
    let mut data = vec![0u8; TOKEN_ACCOUNT_LEN];
    data[AMOUNT_OFFSET..AMOUNT_OFFSET + 8].copy_from_slice(&amount.to_le_bytes());
    data
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_amount() {
        assert_eq!(token_amount(&token_account_data(42_000_000)).unwrap(), 42_000_000);
        assert!(token_amount(&[0u8; 70]).is_err());
    }
}
