//! SourcePump - change feed から WorkQueue への供給
//!
//! ```text
//! Disconnected --(watch + list ok)--> Connected --(stream closed)--> Disconnected
//! ```
//!
//! Every connect is followed by a full resync: all listed keys are added,
//! so events missed while disconnected cannot leave a key stale.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, instrument, warn};

use crate::domain::{ChangeEvent, ChangeType};
use crate::error::SourceError;
use crate::observability::LoopStats;
use crate::ports::ChangeSource;
use crate::queue::{RetryPolicy, WorkQueue};

pub struct SourcePump {
    source: Arc<dyn ChangeSource>,
    queue: Arc<WorkQueue>,
    connected: Arc<AtomicBool>,
    stats: Arc<LoopStats>,
    backoff: RetryPolicy,
}

impl SourcePump {
    pub fn new(
        source: Arc<dyn ChangeSource>,
        queue: Arc<WorkQueue>,
        connected: Arc<AtomicBool>,
        stats: Arc<LoopStats>,
        backoff: RetryPolicy,
    ) -> Self {
        Self {
            source,
            queue,
            connected,
            stats,
            backoff,
        }
    }

    /// Feed the queue until `shutdown` fires.
    #[instrument(name = "source_pump", skip_all)]
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut failures: u32 = 0;
        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.connect().await {
                Ok(mut events) => {
                    failures = 0;
                    self.connected.store(true, Ordering::SeqCst);
                    loop {
                        tokio::select! {
                            event = events.recv() => match event {
                                Some(event) => self.enqueue(event).await,
                                None => break,
                            },
                            _ = shutdown.changed() => {
                                self.connected.store(false, Ordering::SeqCst);
                                return;
                            }
                        }
                    }
                    self.connected.store(false, Ordering::SeqCst);
                    self.stats.record_reconnect();
                    warn!("change source subscription lost, reconnecting");
                }
                Err(e) => {
                    self.connected.store(false, Ordering::SeqCst);
                    failures = failures.saturating_add(1);
                    warn!(error = %e, failures, "change source unavailable");
                }
            }

            let wait = self.backoff.next_delay(failures.max(1));
            tokio::select! {
                _ = tokio::time::sleep(wait) => {},
                _ = shutdown.changed() => break,
            }
        }
        self.connected.store(false, Ordering::SeqCst);
        debug!("source pump stopped");
    }

    /// Subscribe, then list. Subscribing first means a change landing between
    /// the two calls shows up at least once.
    async fn connect(&self) -> Result<mpsc::Receiver<ChangeEvent>, SourceError> {
        let events = self.source.watch().await?;
        let keys = self.source.list().await?;
        let count = keys.len();
        for key in keys {
            self.enqueue(ChangeEvent::new(key, ChangeType::Resync)).await;
        }
        info!(keys = count, "change source resynced");
        Ok(events)
    }

    /// Only the key matters: the reconciler re-reads current state.
    async fn enqueue(&self, event: ChangeEvent) {
        if event.change_type == ChangeType::Deleted {
            // 削除も reconcile させる（finalizer 等は reconciler の責務）
            debug!(key = %event.key, "resource deleted");
        }
        self.queue.add(event.key).await;
    }
}
