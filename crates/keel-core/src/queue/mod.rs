//! Queue module: item state, backoff policy, and the in-memory work queue.

mod memory;
mod record;
mod retry;
mod state;

pub use memory::WorkQueue;
pub use record::QueueItem;
pub use retry::RetryPolicy;
pub use state::ItemState;

use std::time::Duration;

use tokio::time::Instant;

/// Stand-in for "never" when a delay does not fit into an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// `now + delay`, saturating at [`FAR_FUTURE`] instead of panicking.
pub(crate) fn deadline_after(delay: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(delay.min(FAR_FUTURE))
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}
