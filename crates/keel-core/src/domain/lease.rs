//! Lease record and leadership state.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Identity of one replica taking part in the election.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HolderIdentity(String);

impl HolderIdentity {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// `prefix-<ulid>`, unique per process start.
    pub fn generate(prefix: &str) -> Self {
        Self(format!("{prefix}-{}", Ulid::new().to_string().to_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HolderIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fencing token. Incremented every time the lease changes hands.
pub type Term = u64;

/// The shared lease record.
///
/// Only ever written through `LeaseStore::conditional_write`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseRecord {
    /// `None` once the holder released the lease.
    pub holder: Option<HolderIdentity>,
    pub term: Term,
    pub acquired_at: DateTime<Utc>,
    pub renewed_at: DateTime<Utc>,
    pub lease_duration: Duration,
}

impl LeaseRecord {
    pub fn acquired(holder: HolderIdentity, term: Term, now: DateTime<Utc>, lease_duration: Duration) -> Self {
        Self {
            holder: Some(holder),
            term,
            acquired_at: now,
            renewed_at: now,
            lease_duration,
        }
    }

    /// Renewal deadline as written by the holder (holder's clock).
    pub fn renew_deadline(&self) -> DateTime<Utc> {
        add_std(self.renewed_at, self.lease_duration)
    }

    pub fn is_held_by(&self, identity: &HolderIdentity) -> bool {
        self.holder.as_ref() == Some(identity)
    }

    /// Copy with the holder cleared, keeping the term.
    pub fn released(&self, now: DateTime<Utc>) -> Self {
        Self {
            holder: None,
            term: self.term,
            acquired_at: self.acquired_at,
            renewed_at: now,
            lease_duration: self.lease_duration,
        }
    }
}

/// `at + d`, saturating at the end of time.
pub(crate) fn add_std(at: DateTime<Utc>, d: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(d)
        .ok()
        .and_then(|d| at.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// A value plus the store-assigned version used as write precondition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Versioned<T> {
    pub version: u64,
    pub value: T,
}

/// What this replica currently believes about leadership.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeadershipState {
    /// Leader election disabled: this replica owns everything.
    Standalone,
    /// Not resolved yet (startup, store errors, or just lost the lease).
    Electing,
    Leader { term: Term },
    Follower { leader: Option<HolderIdentity> },
}

impl LeadershipState {
    pub fn is_leader(&self) -> bool {
        matches!(self, LeadershipState::Standalone | LeadershipState::Leader { .. })
    }

    /// Readiness: leadership is known, not mid-election.
    pub fn is_resolved(&self) -> bool {
        !matches!(self, LeadershipState::Electing)
    }

    pub fn label(&self) -> &'static str {
        match self {
            LeadershipState::Standalone => "standalone",
            LeadershipState::Electing => "electing",
            LeadershipState::Leader { .. } => "leader",
            LeadershipState::Follower { .. } => "follower",
        }
    }

    pub fn term(&self) -> Option<Term> {
        match self {
            LeadershipState::Leader { term } => Some(*term),
            _ => None,
        }
    }
}
