//! ReconcileResult - outcome of one reconcile invocation.

use std::time::Duration;

use super::ReconcileError;

/// Produced once per `Reconciler::reconcile` call and consumed immediately by
/// the loop to pick the next queue transition.
#[derive(Debug)]
pub enum ReconcileResult {
    /// Converged. Failure history is forgotten.
    Done,
    /// Converged for now, look again after the delay (level-triggered polling).
    RequeueAfter(Duration),
    /// Transient failure, retried with backoff.
    Error(ReconcileError),
}

impl ReconcileResult {
    pub fn error(message: impl Into<String>) -> Self {
        ReconcileResult::Error(ReconcileError::new(message))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ReconcileResult::Error(_))
    }
}

impl<E> From<Result<Option<Duration>, E>> for ReconcileResult
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// `Ok(None)` is Done, `Ok(Some(d))` is RequeueAfter, `Err` is Error.
    fn from(result: Result<Option<Duration>, E>) -> Self {
        match result {
            Ok(None) => ReconcileResult::Done,
            Ok(Some(delay)) => ReconcileResult::RequeueAfter(delay),
            Err(e) => ReconcileResult::Error(ReconcileError::from_source("reconcile failed", e)),
        }
    }
}
