//! Shared types for fundsync.
//!
//! This crate carries everything that describes the remote side of the
//! mirror: account addresses, discriminators, the binary layouts of the
//! vault programs' accounts and the [`rpc::AccountRpc`] contract a transport
//! has to fulfil. The optional `client` feature adds a JSON-RPC transport.

#![forbid(unsafe_code)]

#[cfg(feature = "client")]
pub mod client;
pub mod discriminator;
pub mod objects;
pub mod pubkey;
pub mod rpc;

pub use discriminator::{DISCRIMINATOR_LEN, Discriminator};
pub use pubkey::Pubkey;
