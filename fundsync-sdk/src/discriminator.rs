//! Account discriminators.
//!
//! Every account owned by the vault programs starts with an 8-byte tag,
//! `sha256("account:<Name>")[..8]`, identifying which layout follows.

use std::fmt;

/// Length of the type tag at the start of every program account.
pub const DISCRIMINATOR_LEN: usize = 8;

/// Fixed-length type tag prefixed to a serialized account.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Discriminator(pub [u8; DISCRIMINATOR_LEN]);

impl Discriminator {
    /// Compute the tag for an account type name (e.g. `"Vault"`).
    pub fn for_account(name: &str) -> Self {
        let preimage = format!("account:{name}");
        let digest = ring::digest::digest(&ring::digest::SHA256, preimage.as_bytes());
        let mut tag = [0u8; DISCRIMINATOR_LEN];
        tag.copy_from_slice(&digest.as_ref()[..DISCRIMINATOR_LEN]);
        Self(tag)
    }

    /// Read the tag from raw account data.
    ///
    /// Returns `None` when the data is shorter than the tag.
    pub fn read(data: &[u8]) -> Option<Self> {
        let head: [u8; DISCRIMINATOR_LEN] = data.get(..DISCRIMINATOR_LEN)?.try_into().ok()?;
        Some(Self(head))
    }

    /// Whether `data` begins with this tag.
    pub fn matches(&self, data: &[u8]) -> bool {
        data.starts_with(&self.0)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Discriminator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Discriminator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Discriminator({self})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distinct_names_distinct_tags() {
        let vault = Discriminator::for_account("Vault");
        let investor = Discriminator::for_account("Investor");
        assert_ne!(vault, investor);
        assert_eq!(vault, Discriminator::for_account("Vault"));
    }

    #[test]
    fn test_read_requires_full_tag() {
        assert_eq!(Discriminator::read(&[1, 2, 3, 4]), None);
        let tag = Discriminator::read(&[1, 2, 3, 4, 5, 6, 7, 8, 9]).unwrap();
        assert_eq!(tag.0, [1, 2, 3, 4, 5, 6, 7, 8]);
        assert!(tag.matches(&[1, 2, 3, 4, 5, 6, 7, 8]));
        assert_eq!(tag.to_string(), "0102030405060708");
    }
}
