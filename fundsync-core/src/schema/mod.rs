//! Per-venue schema: which account kinds exist and how to decode them.
//!
//! A [`Venue`] names a closed set of kinds and a tagged union of decoded
//! accounts. [`SchemaRegistry`] resolves a raw account's 8-byte tag to one
//! of those kinds and produces the typed record, or a [`DecodeError`].

pub mod drift;
pub mod phoenix;

use fundsync_sdk::objects::LayoutError;
use fundsync_sdk::rpc::AccountFilter;
use fundsync_sdk::{DISCRIMINATOR_LEN, Discriminator};
use std::collections::HashMap;
use std::fmt::{Debug, Display};
use std::hash::Hash;

pub use drift::{DriftAccount, DriftAccountKind, DriftVaults};
pub use phoenix::{PhoenixAccount, PhoenixAccountKind, PhoenixVaults};

/// One kind of program account within a venue.
pub trait AccountKind:
    Copy + Eq + Hash + Debug + Display + Send + Sync + 'static
{
    /// Every kind of the venue.
    fn all() -> &'static [Self];

    fn discriminator(self) -> Discriminator;

    /// Server-side filter selecting this kind in a program scan.
    fn filter(self) -> AccountFilter {
        AccountFilter::memcmp(0, self.discriminator().as_bytes().to_vec())
    }
}

/// A program whose accounts are mirrored.
pub trait Venue: Copy + Debug + Default + Send + Sync + 'static {
    type Kind: AccountKind;
    type Account: Clone + Debug + Send + Sync + 'static;

    /// Short name used in logs and fund overviews.
    const NAME: &'static str;

    /// Decode a complete account (tag included) as `kind`.
    fn decode(kind: Self::Kind, data: &[u8]) -> Result<Self::Account, LayoutError>;

    fn kind_of(account: &Self::Account) -> Self::Kind;
}

/// Why raw bytes did not become a record.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("account data too short for a tag: {len} bytes")]
    TooShort { len: usize },

    #[error("no schema registered for tag {0}")]
    UnknownDiscriminator(Discriminator),

    #[error("expected {expected} tag, found {actual}")]
    DiscriminatorMismatch {
        expected: Discriminator,
        actual: Discriminator,
    },

    #[error("malformed {kind} account: {reason}")]
    Malformed { kind: String, reason: String },
}

/// Tag lookup and decode dispatch for one venue.
#[derive(Debug, Clone)]
pub struct SchemaRegistry<V: Venue> {
    by_tag: HashMap<Discriminator, V::Kind>,
}

impl<V: Venue> Default for SchemaRegistry<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Venue> SchemaRegistry<V> {
    pub fn new() -> Self {
        let by_tag = V::Kind::all()
            .iter()
            .map(|kind| (kind.discriminator(), *kind))
            .collect();
        Self { by_tag }
    }

    /// Which kind the data is tagged as.
    pub fn resolve(&self, data: &[u8]) -> Result<V::Kind, DecodeError> {
        let tag = read_tag(data)?;
        self.by_tag
            .get(&tag)
            .copied()
            .ok_or(DecodeError::UnknownDiscriminator(tag))
    }

    /// Decode data whose kind is unknown up front.
    pub fn decode_tagged(&self, data: &[u8]) -> Result<(V::Kind, V::Account), DecodeError> {
        let kind = self.resolve(data)?;
        let account = decode_body::<V>(kind, data)?;
        Ok((kind, account))
    }

    /// Decode data expected to be `kind`. The tag must still match.
    pub fn decode_as(&self, kind: V::Kind, data: &[u8]) -> Result<V::Account, DecodeError> {
        let actual = read_tag(data)?;
        let expected = kind.discriminator();
        if actual != expected {
            return Err(DecodeError::DiscriminatorMismatch { expected, actual });
        }
        decode_body::<V>(kind, data)
    }
}

fn read_tag(data: &[u8]) -> Result<Discriminator, DecodeError> {
    if data.len() < DISCRIMINATOR_LEN {
        return Err(DecodeError::TooShort { len: data.len() });
    }
    Discriminator::read(data).ok_or(DecodeError::TooShort { len: data.len() })
}

fn decode_body<V: Venue>(kind: V::Kind, data: &[u8]) -> Result<V::Account, DecodeError> {
    V::decode(kind, data).map_err(|e| match e {
        LayoutError::TooShort { len } => DecodeError::TooShort { len },
        LayoutError::DiscriminatorMismatch { expected, actual } => {
            DecodeError::DiscriminatorMismatch { expected, actual }
        }
        LayoutError::Malformed(source) => DecodeError::Malformed {
            kind: kind.to_string(),
            reason: source.to_string(),
        },
    })
}
