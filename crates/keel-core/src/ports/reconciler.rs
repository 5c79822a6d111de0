//! Reconciler port - the caller-supplied convergence step.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::domain::{ResourceKey, ReconcileResult, Term};

/// One idempotent convergence step.
///
/// Must be safe to call any number of times for the same key with no new
/// information: read the current full state, do not apply a diff from the
/// triggering event.
#[async_trait]
pub trait Reconciler: Send + Sync {
    async fn reconcile(&self, ctx: &ReconcileContext, key: &ResourceKey) -> ReconcileResult;
}

/// Per-invocation context handed to the reconciler.
///
/// Cancellation fires on process shutdown or loss of leadership. It is a
/// request: the reconciler should check it before committing side effects.
#[derive(Debug, Clone)]
pub struct ReconcileContext {
    worker_id: usize,
    term: Option<Term>,
    requeue_period: Duration,
    deadline: Instant,
    cancel: watch::Receiver<bool>,
}

impl ReconcileContext {
    pub fn new(
        worker_id: usize,
        term: Option<Term>,
        requeue_period: Duration,
        deadline: Instant,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        Self {
            worker_id,
            term,
            requeue_period,
            deadline,
            cancel,
        }
    }

    pub fn worker_id(&self) -> usize {
        self.worker_id
    }

    /// Fencing term of the lease this call runs under; `None` when leader
    /// election is disabled. Writers can attach it so a store can reject
    /// writes from a stale leader.
    pub fn fencing_term(&self) -> Option<Term> {
        self.term
    }

    /// Configured default for `ReconcileResult::RequeueAfter`.
    pub fn requeue_period(&self) -> Duration {
        self.requeue_period
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Resolves once cancellation was requested.
    pub async fn cancelled(&self) {
        let mut rx = self.cancel.clone();
        // sender dropped also counts as cancelled
        let _ = rx.wait_for(|c| *c).await;
    }
}
