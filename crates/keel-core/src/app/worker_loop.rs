//! WorkerLoop - reconcile 実行ループ
//!
//! Each worker: get -> leadership check -> reconcile -> requeue decision.
//!
//! ```text
//! Idle --(key available, leader)--> Executing --(result)--> Idle
//! Idle --(key available, not leader)--> requeue unconsumed, back off
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use super::config::ControllerConfig;
use super::health::WorkerLiveness;
use super::leader::LeaderGate;
use crate::domain::{ReconcileResult, ResourceKey};
use crate::observability::LoopStats;
use crate::ports::{ReconcileContext, Reconciler};
use crate::queue::{WorkQueue, deadline_after};

#[derive(Debug, Clone)]
pub struct LoopOptions {
    pub reconcile_timeout: Duration,
    pub requeue_period: Duration,
    pub not_leader_backoff: Duration,
}

impl From<&ControllerConfig> for LoopOptions {
    fn from(config: &ControllerConfig) -> Self {
        Self {
            reconcile_timeout: config.reconcile_timeout,
            requeue_period: config.requeue_period,
            not_leader_backoff: config.not_leader_backoff,
        }
    }
}

/// What one iteration did with a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Processed {
    /// Not leader: requeued without invoking the reconciler.
    NotLeader,
    Done,
    Requeued(Duration),
    Failed { failures: u32 },
}

pub struct ReconcileLoop {
    worker_id: usize,
    queue: Arc<WorkQueue>,
    gate: Arc<LeaderGate>,
    reconciler: Arc<dyn Reconciler>,
    stats: Arc<LoopStats>,
    options: LoopOptions,
}

impl ReconcileLoop {
    pub fn new(
        worker_id: usize,
        queue: Arc<WorkQueue>,
        gate: Arc<LeaderGate>,
        reconciler: Arc<dyn Reconciler>,
        stats: Arc<LoopStats>,
        options: LoopOptions,
    ) -> Self {
        Self {
            worker_id,
            queue,
            gate,
            reconciler,
            stats,
            options,
        }
    }

    /// Run until the queue shuts down or `shutdown` fires.
    #[instrument(skip_all, fields(worker_id = self.worker_id))]
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        debug!("reconcile worker started");
        loop {
            if *shutdown.borrow() {
                break;
            }

            // get() は待つ可能性があるので shutdown と競合させる
            let key = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                key = self.queue.get() => key,
            };
            let Some(key) = key else {
                break;
            };

            self.process(key, &shutdown).await;
        }
        debug!("reconcile worker stopped");
    }

    /// Handle one key taken from the queue. The key must be in flight.
    pub async fn process(&self, key: ResourceKey, shutdown: &watch::Receiver<bool>) -> Processed {
        if !self.gate.is_leader() {
            self.requeue_unconsumed(key, shutdown).await;
            return Processed::NotLeader;
        }

        let result = self.invoke(&key, shutdown).await;

        match result {
            ReconcileResult::Done => {
                self.queue.forget(&key).await;
                self.queue.done(&key).await;
                debug!(key = %key, "reconciled");
                Processed::Done
            }
            ReconcileResult::RequeueAfter(delay) => {
                self.queue.forget(&key).await;
                self.queue.done(&key).await;
                self.queue.add_after(key.clone(), delay).await;
                self.stats.record_requeue();
                debug!(key = %key, requeue_after = ?delay, "reconciled, requeue scheduled");
                Processed::Requeued(delay)
            }
            ReconcileResult::Error(cause) => {
                self.queue.done(&key).await;
                let retry_in = self.queue.add_rate_limited(key.clone()).await;
                let failures = self.queue.num_requeues(&key).await;
                self.stats.record_error();
                warn!(
                    key = %key,
                    error = %cause,
                    failures,
                    retry_in = ?retry_in,
                    "reconcile failed, will retry"
                );
                Processed::Failed { failures }
            }
        }
    }

    /// Call the reconciler with a bounded context. Shutdown or loss of
    /// leadership fires the context's cancellation; the call itself is
    /// awaited until it returns or the timeout hits.
    async fn invoke(&self, key: &ResourceKey, shutdown: &watch::Receiver<bool>) -> ReconcileResult {
        let timeout = self.options.reconcile_timeout;
        let deadline = deadline_after(timeout);
        let (cancel_tx, cancel_rx) = watch::channel(*shutdown.borrow());
        let ctx = ReconcileContext::new(
            self.worker_id,
            self.gate.current_term(),
            self.options.requeue_period,
            deadline,
            cancel_rx,
        );

        self.stats.record_reconcile();
        let reconcile = self.reconciler.reconcile(&ctx, key);
        tokio::pin!(reconcile);
        let lost = self.gate.leadership_lost();
        tokio::pin!(lost);
        let expired = tokio::time::sleep_until(deadline);
        tokio::pin!(expired);
        let mut shutdown = shutdown.clone();
        let mut cancelled = *cancel_tx.borrow();

        loop {
            tokio::select! {
                result = &mut reconcile => return result,
                _ = &mut expired => {
                    return ReconcileResult::error(format!("reconcile timed out after {timeout:?}"));
                }
                _ = &mut lost, if !cancelled => {
                    cancelled = true;
                    warn!(key = %key, "leadership lost, cancelling in-flight reconcile");
                    let _ = cancel_tx.send(true);
                }
                _ = shutdown.changed(), if !cancelled => {
                    cancelled = true;
                    debug!(key = %key, "shutdown requested, cancelling in-flight reconcile");
                    let _ = cancel_tx.send(true);
                }
            }
        }
    }

    /// Hold the key until leadership may have changed, then put it back
    /// without touching its failure count.
    async fn requeue_unconsumed(&self, key: ResourceKey, shutdown: &watch::Receiver<bool>) {
        self.stats.record_skipped();
        debug!(key = %key, "not leader, requeueing without reconciling");
        let mut shutdown = shutdown.clone();
        tokio::select! {
            _ = self.gate.wait_for_leadership() => {},
            _ = tokio::time::sleep(self.options.not_leader_backoff) => {},
            _ = shutdown.changed() => {},
        }
        self.queue.done(&key).await;
        self.queue.add(key).await;
    }
}

/// Worker group handle.
/// - `join()` で全ワーカーの終了を待てる（grace period 付き）
pub struct WorkerGroup {
    joins: Vec<JoinHandle<()>>,
}

impl WorkerGroup {
    /// Spawn one task per loop.
    pub fn spawn(
        loops: Vec<ReconcileLoop>,
        shutdown: watch::Receiver<bool>,
        liveness: Arc<WorkerLiveness>,
    ) -> Self {
        let joins = loops
            .into_iter()
            .map(|worker| {
                let rx = shutdown.clone();
                let guard = liveness.enter();
                tokio::spawn(async move {
                    let _guard = guard;
                    worker.run(rx).await;
                })
            })
            .collect();
        Self { joins }
    }

    pub fn len(&self) -> usize {
        self.joins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joins.is_empty()
    }

    /// Wait for every worker up to `grace`; stragglers are aborted.
    ///
    /// Returns the number of aborted workers.
    pub async fn join(self, grace: Duration) -> usize {
        let deadline = deadline_after(grace);
        let mut aborted = 0;
        for mut join in self.joins {
            match tokio::time::timeout_at(deadline, &mut join).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "reconcile worker panicked"),
                Err(_) => {
                    join.abort();
                    aborted += 1;
                }
            }
        }
        if aborted > 0 {
            warn!(aborted, "reconcile workers did not stop within the grace period");
        } else {
            info!("all reconcile workers stopped");
        }
        aborted
    }
}
