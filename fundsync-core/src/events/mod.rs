//! Event types and channels.
//!
//! The cache publishes [`CacheEvent`]s on a broadcast bus; the bulk loader
//! hands [`LoaderMessage`]s to each poll subscriber over its own mpsc
//! channel.

mod channels;
mod types;

pub use channels::*;
pub use types::*;
