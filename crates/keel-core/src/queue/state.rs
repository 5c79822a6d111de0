//! Where a key currently sits inside the work queue.

use serde::{Deserialize, Serialize};

/// Item state.
///
/// State transitions:
/// - Pending -> InFlight -> (done) gone
/// - Pending -> InFlight -> InFlightDirty (add during processing) -> (done) Pending
/// - Delayed -> Pending (delay elapsed)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ItemState {
    /// Eligible, waiting for a `get`.
    Pending,

    /// Handed out by `get`, not `done` yet.
    InFlight,

    /// In flight, and re-added meanwhile. Becomes Pending on `done`.
    InFlightDirty,

    /// Scheduled by `add_after` / `add_rate_limited`, not eligible yet.
    Delayed,
}

impl ItemState {
    pub fn is_in_flight(self) -> bool {
        matches!(self, ItemState::InFlight | ItemState::InFlightDirty)
    }
}
