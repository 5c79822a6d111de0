//! Ports - 抽象化レイヤー
//!
//! Traits for the external collaborators: the lease store, the change feed,
//! time, and the reconciler plugin itself.

pub mod change_source;
pub mod clock;
pub mod lease_store;
pub mod reconciler;

pub use self::change_source::ChangeSource;
pub use self::clock::{Clock, FixedClock, MonotonicClock, SkewedClock, SystemClock};
pub use self::lease_store::LeaseStore;
pub use self::reconciler::{ReconcileContext, Reconciler};
