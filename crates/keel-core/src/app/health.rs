//! Liveness and readiness predicates for the external health-check endpoints.
//!
//! Degraded states (leadership unresolved, change source disconnected)
//! make the process not ready, never not alive.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use serde::Serialize;

use super::context::LifecycleContext;
use super::leader::LeaderGate;
use crate::domain::LoopState;

/// Count of worker tasks currently running.
#[derive(Debug, Default)]
pub struct WorkerLiveness {
    live: AtomicUsize,
}

impl WorkerLiveness {
    /// Register one running worker; dropping the guard (including on panic)
    /// unregisters it.
    pub fn enter(self: &Arc<Self>) -> LiveGuard {
        self.live.fetch_add(1, Ordering::SeqCst);
        LiveGuard(Arc::clone(self))
    }

    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

pub struct LiveGuard(Arc<WorkerLiveness>);

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.live.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Clone)]
pub struct HealthProbe {
    context: Arc<LifecycleContext>,
    gate: Arc<LeaderGate>,
    workers: Arc<WorkerLiveness>,
    source_connected: Arc<AtomicBool>,
    expected_workers: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub alive: bool,
    pub ready: bool,
    pub loop_state: LoopState,
    pub leadership: &'static str,
    pub source_connected: bool,
    pub live_workers: usize,
    pub expected_workers: usize,
}

impl HealthProbe {
    pub fn new(
        context: Arc<LifecycleContext>,
        gate: Arc<LeaderGate>,
        workers: Arc<WorkerLiveness>,
        source_connected: Arc<AtomicBool>,
        expected_workers: usize,
    ) -> Self {
        Self {
            context,
            gate,
            workers,
            source_connected,
            expected_workers,
        }
    }

    /// Process is responsive: not stopped, and while running every worker
    /// loop is still alive.
    pub fn is_alive(&self) -> bool {
        match self.context.state() {
            state if state.is_terminal() => false,
            LoopState::Running => self.workers.live() >= self.expected_workers,
            _ => true,
        }
    }

    /// Running, fed by the change source, and leadership resolved.
    pub fn is_ready(&self) -> bool {
        self.context.state() == LoopState::Running
            && self.source_connected.load(Ordering::SeqCst)
            && self.gate.state().is_resolved()
    }

    pub fn report(&self) -> HealthReport {
        HealthReport {
            alive: self.is_alive(),
            ready: self.is_ready(),
            loop_state: self.context.state(),
            leadership: self.gate.state().label(),
            source_connected: self.source_connected.load(Ordering::SeqCst),
            live_workers: self.workers.live(),
            expected_workers: self.expected_workers,
        }
    }
}
