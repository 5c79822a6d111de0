use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use keel_core::{ReconcileContext, ReconcileResult, Reconciler, ResourceKey};
use tracing::info;

/// Placeholder business logic: observes the key and asks to be called again
/// after the configured requeue period.
#[derive(Debug, Default)]
pub struct LoggingReconciler {
    passes: AtomicU64,
}

#[async_trait]
impl Reconciler for LoggingReconciler {
    async fn reconcile(&self, ctx: &ReconcileContext, key: &ResourceKey) -> ReconcileResult {
        let pass = self.passes.fetch_add(1, Ordering::Relaxed) + 1;
        info!(
            key = %key,
            worker_id = ctx.worker_id(),
            term = ?ctx.fencing_term(),
            pass,
            "reconciling"
        );
        ReconcileResult::RequeueAfter(ctx.requeue_period())
    }
}
