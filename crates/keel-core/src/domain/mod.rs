//! Domain model (keys, results, lease records, lifecycle state).

pub mod errors;
pub mod events;
pub mod key;
pub mod lease;
pub mod result;
pub mod state;

pub use self::errors::ReconcileError;
pub use self::events::{ChangeEvent, ChangeType};
pub use self::key::ResourceKey;
pub use self::lease::{HolderIdentity, LeadershipState, LeaseRecord, Term, Versioned};
pub use self::result::ReconcileResult;
pub use self::state::LoopState;
