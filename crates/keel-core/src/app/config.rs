//! Controller configuration and its validation.

use std::time::Duration;

use crate::domain::HolderIdentity;
use crate::error::ConfigError;
use crate::queue::RetryPolicy;

/// Upper bound of the random extra wait added to each election round,
/// as a fraction of `retry_period`.
pub const RETRY_JITTER: f64 = 0.2;

/// Upper bound for `reconcile_timeout` and `shutdown_grace_period`.
pub const MAX_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone)]
pub struct LeaderElectionConfig {
    /// When false every replica assumes sole ownership.
    pub enabled: bool,

    /// Name of the lease object in the store.
    pub lease_name: String,

    pub identity: HolderIdentity,

    /// How long a lease stays valid for other replicas after they last saw
    /// it change.
    pub lease_duration: Duration,

    /// How long the leader keeps acting without a successful renewal.
    pub renew_deadline: Duration,

    /// Interval between acquire/renew attempts.
    pub retry_period: Duration,
}

impl Default for LeaderElectionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            lease_name: "keel-controller-leader".to_string(),
            identity: HolderIdentity::generate("keel"),
            lease_duration: Duration::from_secs(15),
            renew_deadline: Duration::from_secs(10),
            retry_period: Duration::from_secs(2),
        }
    }
}

impl LeaderElectionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.enabled {
            return Ok(());
        }
        if self.lease_name.trim().is_empty() {
            return Err(ConfigError::EmptyLeaseName);
        }
        if self.retry_period.is_zero() {
            return Err(ConfigError::ZeroDuration {
                field: "retry_period",
            });
        }
        if self.lease_duration <= self.renew_deadline {
            return Err(ConfigError::LeaseShorterThanDeadline {
                lease_duration: self.lease_duration,
                renew_deadline: self.renew_deadline,
            });
        }
        if self.renew_deadline <= self.retry_period.mul_f64(1.0 + RETRY_JITTER) {
            return Err(ConfigError::DeadlineShorterThanRetry {
                renew_deadline: self.renew_deadline,
                retry_period: self.retry_period,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Size of the reconcile worker pool.
    pub worker_count: usize,

    pub leader_election: LeaderElectionConfig,

    /// Default `RequeueAfter` interval offered to reconcilers.
    pub requeue_period: Duration,

    /// Upper bound for one reconcile call.
    pub reconcile_timeout: Duration,

    /// Pause before a non-leader re-checks leadership.
    pub not_leader_backoff: Duration,

    /// How long shutdown waits for in-flight reconciles.
    pub shutdown_grace_period: Duration,

    /// Backoff for `Error` results.
    pub retry_policy: RetryPolicy,

    /// Backoff between change-source reconnect attempts.
    pub source_backoff: RetryPolicy,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            worker_count: 1,
            leader_election: LeaderElectionConfig::default(),
            requeue_period: Duration::from_secs(60),
            reconcile_timeout: Duration::from_secs(300),
            not_leader_backoff: Duration::from_millis(500),
            shutdown_grace_period: Duration::from_secs(30),
            retry_policy: RetryPolicy::default(),
            source_backoff: RetryPolicy::new(Duration::from_millis(500), 2.0, Duration::from_secs(30)),
        }
    }
}

impl ControllerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_count == 0 {
            return Err(ConfigError::NoWorkers);
        }
        for (field, value) in [
            ("requeue_period", self.requeue_period),
            ("reconcile_timeout", self.reconcile_timeout),
            ("not_leader_backoff", self.not_leader_backoff),
        ] {
            if value.is_zero() {
                return Err(ConfigError::ZeroDuration { field });
            }
        }
        for (field, value) in [
            ("reconcile_timeout", self.reconcile_timeout),
            ("shutdown_grace_period", self.shutdown_grace_period),
        ] {
            if value > MAX_TIMEOUT {
                return Err(ConfigError::DurationTooLong {
                    field,
                    value,
                    max: MAX_TIMEOUT,
                });
            }
        }
        self.leader_election.validate()
    }
}
