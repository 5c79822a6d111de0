use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: usize,
    pub in_flight: usize,
    pub delayed: usize,
    /// Keys with a non-zero failure count.
    pub failing: usize,
    pub shutting_down: bool,
}

/// Counters shared by all reconcile workers.
#[derive(Debug, Default)]
pub struct LoopStats {
    reconciles: AtomicU64,
    errors: AtomicU64,
    requeues: AtomicU64,
    skipped_not_leader: AtomicU64,
    source_reconnects: AtomicU64,
}

impl LoopStats {
    pub fn record_reconcile(&self) {
        self.reconciles.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_requeue(&self) {
        self.requeues.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skipped(&self) {
        self.skipped_not_leader.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconnect(&self) {
        self.source_reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> LoopStatsSnapshot {
        LoopStatsSnapshot {
            reconciles: self.reconciles.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            requeues: self.requeues.load(Ordering::Relaxed),
            skipped_not_leader: self.skipped_not_leader.load(Ordering::Relaxed),
            source_reconnects: self.source_reconnects.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopStatsSnapshot {
    /// Reconciler invocations (any result).
    pub reconciles: u64,
    pub errors: u64,
    /// Deliberate `RequeueAfter` results.
    pub requeues: u64,
    pub skipped_not_leader: u64,
    pub source_reconnects: u64,
}
