//! QueueItem: a key plus its scheduling metadata.

use tokio::time::Instant;

use super::ItemState;

/// Snapshot of one key's scheduling metadata.
///
/// The queue itself keeps these facts in separate sets (pending, in flight,
/// delayed, failures); this is the assembled view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueItem<K> {
    pub key: K,
    pub state: ItemState,

    /// When the key became pending (first `add` since it was last handed out).
    pub enqueued_at: Option<Instant>,

    /// Consecutive failures recorded through `add_rate_limited`.
    pub retries: u32,

    /// Earliest time a delayed entry becomes eligible.
    pub eligible_at: Option<Instant>,
}
