#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![forbid(unsafe_code)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

//! Account mirror and derived fund state.
//!
//! Raw account bytes arrive over a push or poll [`subscriber`], are decoded
//! by a venue's [`schema`], applied to the [`cache`] under a strictly
//! increasing slot rule and announced on the [`events`] bus. The
//! [`aggregator`] turns the mirrored vaults and investors into fund
//! overviews and withdrawal countdowns.

pub mod aggregator;
pub mod cache;
pub mod config;
pub mod events;
pub mod schema;
pub mod subscriber;

#[cfg(test)]
pub(crate) mod testing;
