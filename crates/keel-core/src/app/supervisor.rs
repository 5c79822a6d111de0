//! LifecycleSupervisor - 全コンポーネントの起動と停止
//!
//! Start order: election, change feed, workers. Stop order is the reverse,
//! with the lease released last so no successor reconciles while our
//! workers are still draining.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use tokio::sync::watch;
use tracing::{info, warn};

use super::config::ControllerConfig;
use super::context::LifecycleContext;
use super::health::{HealthProbe, WorkerLiveness};
use super::leader::LeaderGate;
use super::source_pump::SourcePump;
use super::worker_loop::{LoopOptions, ReconcileLoop, WorkerGroup};
use crate::domain::LoopState;
use crate::error::KeelError;
use crate::observability::LoopStats;
use crate::ports::{ChangeSource, Reconciler};
use crate::queue::WorkQueue;

pub struct LifecycleSupervisor {
    config: ControllerConfig,
    context: Arc<LifecycleContext>,
    queue: Arc<WorkQueue>,
    gate: Arc<LeaderGate>,
    reconciler: Arc<dyn Reconciler>,
    source: Arc<dyn ChangeSource>,
    stats: Arc<LoopStats>,
    liveness: Arc<WorkerLiveness>,
    source_connected: Arc<AtomicBool>,
}

impl LifecycleSupervisor {
    /// Use `ControllerBuilder` unless the gate is built by hand.
    pub fn new(
        config: ControllerConfig,
        gate: Arc<LeaderGate>,
        reconciler: Arc<dyn Reconciler>,
        source: Arc<dyn ChangeSource>,
    ) -> Self {
        let queue = Arc::new(WorkQueue::new(config.retry_policy.clone()));
        Self {
            config,
            context: Arc::new(LifecycleContext::new()),
            queue,
            gate,
            reconciler,
            source,
            stats: Arc::new(LoopStats::default()),
            liveness: Arc::new(WorkerLiveness::default()),
            source_connected: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn health(&self) -> HealthProbe {
        HealthProbe::new(
            self.context.clone(),
            self.gate.clone(),
            self.liveness.clone(),
            self.source_connected.clone(),
            self.config.worker_count,
        )
    }

    pub fn context(&self) -> &Arc<LifecycleContext> {
        &self.context
    }

    pub fn queue(&self) -> &Arc<WorkQueue> {
        &self.queue
    }

    pub fn gate(&self) -> &Arc<LeaderGate> {
        &self.gate
    }

    pub fn stats(&self) -> &Arc<LoopStats> {
        &self.stats
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Run until `shutdown_signal` resolves, then drain and stop.
    ///
    /// Can only be called once per supervisor: a second call fails with a
    /// lifecycle error.
    pub async fn run<F>(&self, shutdown_signal: F) -> Result<(), KeelError>
    where
        F: Future<Output = ()>,
    {
        self.context.transition(LoopState::Starting)?;
        info!(
            workers = self.config.worker_count,
            leader_elect = !self.gate.is_standalone(),
            identity = %self.gate.identity(),
            "starting controller"
        );

        let (gate_stop, gate_rx) = watch::channel(false);
        let gate_task = tokio::spawn({
            let gate = self.gate.clone();
            async move { gate.run(gate_rx).await }
        });

        let (pump_stop, pump_rx) = watch::channel(false);
        let pump = SourcePump::new(
            self.source.clone(),
            self.queue.clone(),
            self.source_connected.clone(),
            self.stats.clone(),
            self.config.source_backoff.clone(),
        );
        let pump_task = tokio::spawn(pump.run(pump_rx));

        let (workers_stop, workers_rx) = watch::channel(false);
        let options = LoopOptions::from(&self.config);
        let loops = (0..self.config.worker_count)
            .map(|worker_id| {
                ReconcileLoop::new(
                    worker_id,
                    self.queue.clone(),
                    self.gate.clone(),
                    self.reconciler.clone(),
                    self.stats.clone(),
                    options.clone(),
                )
            })
            .collect();
        let workers = WorkerGroup::spawn(loops, workers_rx, self.liveness.clone());

        self.context.transition(LoopState::Running)?;
        info!("controller running");

        shutdown_signal.await;

        self.context.transition(LoopState::Draining)?;
        info!("shutdown requested, draining");

        let _ = pump_stop.send(true);
        if let Err(e) = pump_task.await {
            warn!(error = %e, "source pump task failed");
        }

        self.queue.shut_down().await;
        let _ = workers_stop.send(true);
        let aborted = workers.join(self.config.shutdown_grace_period).await;
        if aborted > 0 {
            warn!(
                aborted,
                grace = ?self.config.shutdown_grace_period,
                "in-flight reconciles abandoned"
            );
        }

        let _ = gate_stop.send(true);
        if let Err(e) = gate_task.await {
            warn!(error = %e, "leader election task failed");
        }
        match self.gate.release().await {
            Ok(_) => {}
            Err(e) => warn!(error = %e, "failed to release lease, successor will wait for expiry"),
        }

        self.context.transition(LoopState::Stopped)?;
        info!(stats = ?self.stats.snapshot(), "controller stopped");
        Ok(())
    }
}
