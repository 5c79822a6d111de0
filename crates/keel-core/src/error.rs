use std::time::Duration;

use thiserror::Error;

use crate::domain::LoopState;

#[derive(Debug, Error)]
pub enum KeelError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error(transparent)]
    Build(#[from] crate::app::BuildError),
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid resource key {0:?}, expected `name` or `namespace/name`")]
pub struct KeyParseError(pub String);

/// Errors from the lease store port.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The optimistic-concurrency precondition did not hold.
    #[error("lease {name} was modified concurrently")]
    Conflict { name: String },

    #[error("lease store unavailable: {0}")]
    Unavailable(String),

    #[error("lease record is corrupt: {0}")]
    Corrupt(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SourceError {
    #[error("change source unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("worker_count must be at least 1")]
    NoWorkers,

    #[error("lease_duration ({lease_duration:?}) must be greater than renew_deadline ({renew_deadline:?})")]
    LeaseShorterThanDeadline {
        lease_duration: Duration,
        renew_deadline: Duration,
    },

    #[error("renew_deadline ({renew_deadline:?}) must be greater than the jittered retry_period ({retry_period:?})")]
    DeadlineShorterThanRetry {
        renew_deadline: Duration,
        retry_period: Duration,
    },

    #[error("{field} must be non-zero")]
    ZeroDuration { field: &'static str },

    #[error("{field} ({value:?}) exceeds the maximum of {max:?}")]
    DurationTooLong {
        field: &'static str,
        value: Duration,
        max: Duration,
    },

    #[error("lease name must not be empty")]
    EmptyLeaseName,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("invalid lifecycle transition {from:?} -> {to:?}")]
    InvalidTransition { from: LoopState, to: LoopState },
}
