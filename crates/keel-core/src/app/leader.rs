//! LeaderGate - lease-based leader election with fencing.
//!
//! Safety rests on two clocks never being compared with each other:
//! - a follower treats another holder's lease as valid until
//!   `lease_duration` has passed on its *own* clock since it last saw the
//!   record change,
//! - the leader stops acting once `renew_deadline` has passed on its own
//!   clock since its last successful write (measured from before the read).
//!
//! With `renew_deadline < lease_duration` the old leader has stopped before
//! any follower may take over, whatever the wall-clock offsets between
//! replicas are.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::config::{LeaderElectionConfig, RETRY_JITTER};
use crate::domain::lease::add_std;
use crate::domain::{HolderIdentity, LeadershipState, LeaseRecord, Term};
use crate::error::{ConfigError, StoreError};
use crate::ports::{Clock, LeaseStore};

/// The last version of the record this replica has seen.
#[derive(Debug, Clone)]
struct Observed {
    version: u64,
    record: LeaseRecord,
    /// Local time the change was first seen.
    observed_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct GateInner {
    observed: Option<Observed>,
    /// Local time (taken before the read) of our last successful write.
    last_renew: Option<DateTime<Utc>>,
}

enum Plan {
    Follow(Option<HolderIdentity>),
    Write {
        expected: Option<u64>,
        record: LeaseRecord,
    },
}

pub struct LeaderGate {
    config: LeaderElectionConfig,
    store: Option<Arc<dyn LeaseStore>>,
    clock: Arc<dyn Clock>,
    inner: Mutex<GateInner>,
    /// Serializes election rounds and release.
    round: tokio::sync::Mutex<()>,
    state_tx: watch::Sender<LeadershipState>,
}

impl LeaderGate {
    /// Elected gate backed by `store`.
    pub fn new(
        config: LeaderElectionConfig,
        store: Arc<dyn LeaseStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let (state_tx, _) = watch::channel(LeadershipState::Electing);
        Ok(Self {
            config,
            store: Some(store),
            clock,
            inner: Mutex::new(GateInner::default()),
            round: tokio::sync::Mutex::new(()),
            state_tx,
        })
    }

    /// Gate for `leader-elect=false`: always leader, no store traffic.
    pub fn standalone(identity: HolderIdentity) -> Self {
        let (state_tx, _) = watch::channel(LeadershipState::Standalone);
        Self {
            config: LeaderElectionConfig {
                enabled: false,
                identity,
                ..LeaderElectionConfig::default()
            },
            store: None,
            clock: Arc::new(crate::ports::MonotonicClock::new()),
            inner: Mutex::new(GateInner::default()),
            round: tokio::sync::Mutex::new(()),
            state_tx,
        }
    }

    pub fn identity(&self) -> &HolderIdentity {
        &self.config.identity
    }

    pub fn is_standalone(&self) -> bool {
        self.store.is_none()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, GateInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Local time after which this replica must stop acting as leader.
    fn leader_deadline(&self) -> Option<DateTime<Utc>> {
        self.lock()
            .last_renew
            .map(|at| add_std(at, self.config.renew_deadline))
    }

    /// Effective leadership state.
    ///
    /// A published `Leader` whose renew deadline has passed without a
    /// successful renewal is reported as `Electing` right away, without
    /// waiting for the election task to notice.
    pub fn state(&self) -> LeadershipState {
        let published = self.state_tx.borrow().clone();
        match published {
            LeadershipState::Leader { .. } => match self.leader_deadline() {
                Some(deadline) if self.clock.now() < deadline => published,
                _ => LeadershipState::Electing,
            },
            other => other,
        }
    }

    pub fn is_leader(&self) -> bool {
        self.state().is_leader()
    }

    /// Fencing term while leader.
    pub fn current_term(&self) -> Option<Term> {
        self.state().term()
    }

    pub fn subscribe(&self) -> watch::Receiver<LeadershipState> {
        self.state_tx.subscribe()
    }

    /// Time left before the renew deadline, while leader.
    fn until_deadline(&self) -> Option<Duration> {
        let published_leader = matches!(*self.state_tx.borrow(), LeadershipState::Leader { .. });
        if !published_leader {
            return None;
        }
        let deadline = self.leader_deadline()?;
        Some((deadline - self.clock.now()).to_std().unwrap_or(Duration::ZERO))
    }

    fn publish(&self, next: LeadershipState) {
        self.state_tx.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            match (&*current, &next) {
                (_, LeadershipState::Leader { term }) => {
                    info!(identity = %self.config.identity, term, "acquired leadership");
                }
                (LeadershipState::Leader { term }, _) => {
                    warn!(identity = %self.config.identity, term, next = ?next, "lost leadership");
                }
                _ => {
                    debug!(identity = %self.config.identity, next = ?next, "leadership state changed");
                }
            }
            *current = next;
            true
        });
    }

    /// Publish `Electing` if our renew deadline passed. Returns true if it did.
    fn expire_if_overdue(&self) -> bool {
        let published_leader = matches!(*self.state_tx.borrow(), LeadershipState::Leader { .. });
        if published_leader && !self.is_leader() {
            self.lock().last_renew = None;
            self.publish(LeadershipState::Electing);
            return true;
        }
        false
    }

    /// One election round: read the lease, then write it back under the read
    /// version if we may hold it.
    ///
    /// Returns whether this replica is leader afterwards. A concurrent write
    /// by another replica is not an error, just `Ok(false)`.
    pub async fn try_acquire_or_renew(&self) -> Result<bool, StoreError> {
        let _round = self.round.lock().await;
        let Some(store) = &self.store else {
            return Ok(true);
        };
        let name = self.config.lease_name.as_str();

        // taken before the read: the leader side of the deadline must be conservative
        let started = self.clock.now();
        let current = match store.read(name).await {
            Ok(current) => current,
            Err(e) => {
                self.round_failed();
                return Err(e);
            }
        };
        let seen = self.clock.now();

        let plan = {
            let mut inner = self.lock();
            match current {
                None => {
                    inner.observed = None;
                    let term = 1;
                    Plan::Write {
                        expected: None,
                        record: LeaseRecord::acquired(
                            self.config.identity.clone(),
                            term,
                            started,
                            self.config.lease_duration,
                        ),
                    }
                }
                Some(current) => {
                    let changed = inner
                        .observed
                        .as_ref()
                        .is_none_or(|o| o.version != current.version);
                    if changed {
                        inner.observed = Some(Observed {
                            version: current.version,
                            record: current.value.clone(),
                            observed_at: seen,
                        });
                    }
                    let observed_at = inner.observed.as_ref().map_or(seen, |o| o.observed_at);
                    let record = current.value;

                    if record.is_held_by(&self.config.identity) {
                        let mut renewed = record;
                        renewed.renewed_at = started;
                        renewed.lease_duration = self.config.lease_duration;
                        Plan::Write {
                            expected: Some(current.version),
                            record: renewed,
                        }
                    } else if record.holder.is_some()
                        && seen < add_std(observed_at, record.lease_duration)
                    {
                        Plan::Follow(record.holder)
                    } else {
                        Plan::Write {
                            expected: Some(current.version),
                            record: LeaseRecord::acquired(
                                self.config.identity.clone(),
                                record.term.saturating_add(1),
                                started,
                                self.config.lease_duration,
                            ),
                        }
                    }
                }
            }
        };

        let (expected, record) = match plan {
            Plan::Follow(leader) => {
                self.lock().last_renew = None;
                self.publish(LeadershipState::Follower { leader });
                return Ok(false);
            }
            Plan::Write { expected, record } => (expected, record),
        };

        match store.conditional_write(name, expected, &record).await {
            Ok(version) => {
                let term = record.term;
                {
                    let mut inner = self.lock();
                    inner.observed = Some(Observed {
                        version,
                        record,
                        observed_at: self.clock.now(),
                    });
                    inner.last_renew = Some(started);
                }
                debug!(term, version, "lease written");
                self.publish(LeadershipState::Leader { term });
                Ok(true)
            }
            Err(StoreError::Conflict { .. }) => {
                debug!("lease written concurrently by another replica");
                self.lock().last_renew = None;
                self.publish(LeadershipState::Follower { leader: None });
                Ok(false)
            }
            Err(e) => {
                self.round_failed();
                Err(e)
            }
        }
    }

    /// The store could not be reached: a leader keeps its lease until the
    /// deadline, anyone else is back to unresolved.
    fn round_failed(&self) {
        if self.expire_if_overdue() {
            return;
        }
        if !self.is_leader() {
            self.publish(LeadershipState::Electing);
        }
    }

    /// Election task: acquire, then keep renewing, until `shutdown`.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        if self.is_standalone() {
            info!(identity = %self.config.identity, "leader election disabled, running standalone");
            let _ = shutdown.wait_for(|stop| *stop).await;
            return;
        }
        info!(
            identity = %self.config.identity,
            lease = %self.config.lease_name,
            "starting leader election"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            // a renewal that hangs past the deadline must not keep us leader
            let until = self.until_deadline();
            tokio::select! {
                result = self.try_acquire_or_renew() => {
                    if let Err(e) = result {
                        warn!(error = %e, "leader election round failed");
                    }
                }
                _ = tokio::time::sleep(until.unwrap_or(Duration::ZERO)), if until.is_some() => {
                    warn!("lease renewal stalled past renew deadline");
                }
                _ = shutdown.changed() => break,
            }
            self.expire_if_overdue();

            let mut wait = jittered(self.config.retry_period);
            if let Some(until) = self.until_deadline() {
                wait = wait.min(until);
            }
            tokio::select! {
                _ = tokio::time::sleep(wait) => {},
                _ = shutdown.changed() => break,
            }
            self.expire_if_overdue();
        }
        debug!("leader election stopped");
    }

    /// Resolves when the effective leadership ends. Never resolves when
    /// standalone.
    pub async fn leadership_lost(&self) {
        if self.is_standalone() {
            return std::future::pending().await;
        }
        let mut rx = self.subscribe();
        loop {
            if !self.is_leader() {
                return;
            }
            let until = self.until_deadline().unwrap_or(Duration::ZERO);
            tokio::select! {
                changed = rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
                _ = tokio::time::sleep(until) => {},
            }
        }
    }

    /// Resolves once this replica is the effective leader.
    pub async fn wait_for_leadership(&self) {
        let mut rx = self.subscribe();
        loop {
            if self.is_leader() {
                return;
            }
            if rx.changed().await.is_err() {
                return std::future::pending().await;
            }
        }
    }

    /// Hand the lease back so a successor need not wait for expiry.
    ///
    /// Returns true if a release was written.
    pub async fn release(&self) -> Result<bool, StoreError> {
        let _round = self.round.lock().await;
        let Some(store) = &self.store else {
            return Ok(false);
        };
        if !self.is_leader() {
            return Ok(false);
        }
        let Some(observed) = self.lock().observed.clone() else {
            return Ok(false);
        };
        if !observed.record.is_held_by(&self.config.identity) {
            return Ok(false);
        }
        let released = observed.record.released(self.clock.now());
        let result = store
            .conditional_write(&self.config.lease_name, Some(observed.version), &released)
            .await;
        // whatever the outcome, stop acting
        self.lock().last_renew = None;
        self.publish(LeadershipState::Follower { leader: None });
        result.map(|_| {
            info!(identity = %self.config.identity, term = observed.record.term, "lease released");
            true
        })
    }
}

fn jittered(base: Duration) -> Duration {
    base.mul_f64(1.0 + rand::random::<f64>() * RETRY_JITTER)
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::impls::InMemoryLeaseStore;
    use crate::ports::{FixedClock, SystemClock};

    fn config(id: &str) -> LeaderElectionConfig {
        LeaderElectionConfig {
            enabled: true,
            lease_name: "test-lease".to_string(),
            identity: HolderIdentity::new(id),
            lease_duration: Duration::from_secs(15),
            renew_deadline: Duration::from_secs(10),
            retry_period: Duration::from_secs(2),
        }
    }

    fn gate(id: &str, store: &Arc<InMemoryLeaseStore>, clock: &Arc<FixedClock>) -> LeaderGate {
        LeaderGate::new(config(id), store.clone(), clock.clone()).unwrap()
    }

    #[tokio::test]
    async fn first_replica_acquires_with_term_one() {
        let store = Arc::new(InMemoryLeaseStore::new());
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let a = gate("a", &store, &clock);

        assert_eq!(a.state(), LeadershipState::Electing);
        assert!(a.try_acquire_or_renew().await.unwrap());
        assert_eq!(a.state(), LeadershipState::Leader { term: 1 });
        assert_eq!(a.current_term(), Some(1));
    }

    #[tokio::test]
    async fn wall_clock_gate_renews_and_releases() {
        let store = Arc::new(InMemoryLeaseStore::new());
        let a = LeaderGate::new(config("a"), store.clone(), Arc::new(SystemClock)).unwrap();

        assert!(a.try_acquire_or_renew().await.unwrap());
        assert!(a.try_acquire_or_renew().await.unwrap());
        assert_eq!(a.current_term(), Some(1));
        assert!(a.release().await.unwrap());
        assert!(!a.is_leader());
    }

    #[tokio::test]
    async fn second_replica_follows_valid_lease() {
        let store = Arc::new(InMemoryLeaseStore::new());
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let a = gate("a", &store, &clock);
        let b = gate("b", &store, &clock);

        assert!(a.try_acquire_or_renew().await.unwrap());
        assert!(!b.try_acquire_or_renew().await.unwrap());
        assert_eq!(
            b.state(),
            LeadershipState::Follower {
                leader: Some(HolderIdentity::new("a"))
            }
        );
    }

    #[tokio::test]
    async fn expired_lease_is_taken_over_with_next_term() {
        let store = Arc::new(InMemoryLeaseStore::new());
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let a = gate("a", &store, &clock);
        let b = gate("b", &store, &clock);

        assert!(a.try_acquire_or_renew().await.unwrap());
        assert!(!b.try_acquire_or_renew().await.unwrap());

        // a stalls; its own deadline passes first
        clock.advance(Duration::from_secs(11));
        assert!(!a.is_leader());
        assert!(!b.try_acquire_or_renew().await.unwrap());

        clock.advance(Duration::from_secs(5));
        assert!(b.try_acquire_or_renew().await.unwrap());
        assert_eq!(b.current_term(), Some(2));

        // the old leader cannot come back while b renews
        assert!(!a.try_acquire_or_renew().await.unwrap());
        assert!(!a.is_leader());
    }

    #[tokio::test]
    async fn renewal_keeps_term() {
        let store = Arc::new(InMemoryLeaseStore::new());
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let a = gate("a", &store, &clock);
        assert!(a.try_acquire_or_renew().await.unwrap());
        for _ in 0..5 {
            clock.advance(Duration::from_secs(2));
            assert!(a.try_acquire_or_renew().await.unwrap());
        }
        assert_eq!(a.current_term(), Some(1));
        clock.advance(Duration::from_secs(9));
        assert!(a.is_leader());
    }

    #[tokio::test]
    async fn store_outage_costs_leadership_only_after_deadline() {
        let store = Arc::new(InMemoryLeaseStore::new());
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let a = gate("a", &store, &clock);
        assert!(a.try_acquire_or_renew().await.unwrap());

        store.set_available(false);
        clock.advance(Duration::from_secs(4));
        assert!(a.try_acquire_or_renew().await.is_err());
        assert!(a.is_leader());

        clock.advance(Duration::from_secs(7));
        assert!(a.try_acquire_or_renew().await.is_err());
        assert_eq!(a.state(), LeadershipState::Electing);
        assert_eq!(*a.subscribe().borrow(), LeadershipState::Electing);
    }

    #[tokio::test]
    async fn release_lets_successor_acquire_immediately() {
        let store = Arc::new(InMemoryLeaseStore::new());
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let a = gate("a", &store, &clock);
        let b = gate("b", &store, &clock);

        assert!(a.try_acquire_or_renew().await.unwrap());
        assert!(!b.try_acquire_or_renew().await.unwrap());
        assert!(a.release().await.unwrap());
        assert!(!a.is_leader());

        assert!(b.try_acquire_or_renew().await.unwrap());
        assert_eq!(b.current_term(), Some(2));
    }

    #[tokio::test]
    async fn standalone_is_always_leader() {
        let gate = LeaderGate::standalone(HolderIdentity::new("solo"));
        assert!(gate.is_leader());
        assert!(gate.try_acquire_or_renew().await.unwrap());
        assert_eq!(gate.current_term(), None);
        assert!(!gate.release().await.unwrap());
    }

    #[test]
    fn invalid_timing_rejected() {
        let mut cfg = config("a");
        cfg.renew_deadline = Duration::from_secs(20);
        let store: Arc<dyn LeaseStore> = Arc::new(InMemoryLeaseStore::new());
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(Utc::now()));
        assert!(LeaderGate::new(cfg, store, clock).is_err());
    }

    #[test]
    fn jitter_stays_in_bounds() {
        let base = Duration::from_secs(2);
        for _ in 0..100 {
            let d = jittered(base);
            assert!(d >= base);
            assert!(d <= base.mul_f64(1.0 + RETRY_JITTER));
        }
    }
}
