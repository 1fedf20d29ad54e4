//! Event channel factories and handles.

use super::types::{CacheEvent, LoaderMessage};
use crate::schema::Venue;
use tokio::sync::{broadcast, mpsc};

/// Default buffer size for point-to-point channels.
pub const DEFAULT_CHANNEL_BUFFER: usize = 256;

/// Buffer size for the cache event bus. Receivers that fall further behind
/// get `Lagged` and must re-read the cache.
pub const CACHE_EVENT_BUFFER: usize = 1024;

/// Sender handle for [`CacheEvent`]s.
pub type CacheEventSender<V> = broadcast::Sender<CacheEvent<V>>;
/// Receiver handle for [`CacheEvent`]s.
pub type CacheEventReceiver<V> = broadcast::Receiver<CacheEvent<V>>;

/// Sender handle for [`LoaderMessage`]s.
pub type LoaderMessageSender = mpsc::Sender<LoaderMessage>;
/// Receiver handle for [`LoaderMessage`]s.
pub type LoaderMessageReceiver = mpsc::Receiver<LoaderMessage>;

/// Create a new cache event bus.
///
/// Every subscriber of a venue owns one; consumers call `subscribe()` on
/// the sender to attach.
pub fn cache_event_channel<V: Venue>() -> CacheEventSender<V> {
    let (tx, _) = broadcast::channel(CACHE_EVENT_BUFFER);
    tx
}

/// Create a new LoaderMessage channel.
///
/// Each bulk loader registration gets its own.
pub fn loader_message_channel() -> (LoaderMessageSender, LoaderMessageReceiver) {
    mpsc::channel(DEFAULT_CHANNEL_BUFFER)
}
