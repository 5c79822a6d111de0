//! ControllerBuilder - コントローラの構築とワイヤリング
//!
//! Fail-fast: every missing collaborator and every invalid timing is
//! reported by `build()`, before anything is spawned.

use std::sync::Arc;

use super::config::ControllerConfig;
use super::leader::LeaderGate;
use super::supervisor::LifecycleSupervisor;
use crate::error::ConfigError;
use crate::ports::{ChangeSource, Clock, LeaseStore, MonotonicClock, Reconciler};

/// # 使用例
/// ```ignore
/// let supervisor = ControllerBuilder::new(config)
///     .reconciler(MyReconciler)
///     .change_source(source)
///     .lease_store(store)
///     .build()?;
/// supervisor.run(shutdown_signal()).await?;
/// ```
pub struct ControllerBuilder {
    config: ControllerConfig,
    reconciler: Option<Arc<dyn Reconciler>>,
    change_source: Option<Arc<dyn ChangeSource>>,
    lease_store: Option<Arc<dyn LeaseStore>>,
    clock: Option<Arc<dyn Clock>>,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("no reconciler registered")]
    MissingReconciler,

    #[error("no change source registered")]
    MissingChangeSource,

    #[error("leader election is enabled but no lease store was registered")]
    MissingLeaseStore,

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ControllerBuilder {
    pub fn new(config: ControllerConfig) -> Self {
        Self {
            config,
            reconciler: None,
            change_source: None,
            lease_store: None,
            clock: None,
        }
    }

    pub fn reconciler(mut self, reconciler: impl Reconciler + 'static) -> Self {
        self.reconciler = Some(Arc::new(reconciler));
        self
    }

    pub fn shared_reconciler(mut self, reconciler: Arc<dyn Reconciler>) -> Self {
        self.reconciler = Some(reconciler);
        self
    }

    pub fn change_source(mut self, source: Arc<dyn ChangeSource>) -> Self {
        self.change_source = Some(source);
        self
    }

    /// Only consulted when leader election is enabled.
    pub fn lease_store(mut self, store: Arc<dyn LeaseStore>) -> Self {
        self.lease_store = Some(store);
        self
    }

    /// Clock for lease timing. Defaults to `MonotonicClock`.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> Result<LifecycleSupervisor, BuildError> {
        self.config.validate()?;
        let reconciler = self.reconciler.ok_or(BuildError::MissingReconciler)?;
        let source = self.change_source.ok_or(BuildError::MissingChangeSource)?;

        let election = &self.config.leader_election;
        let gate = if election.enabled {
            let store = self.lease_store.ok_or(BuildError::MissingLeaseStore)?;
            let clock = self
                .clock
                .unwrap_or_else(|| Arc::new(MonotonicClock::new()));
            LeaderGate::new(election.clone(), store, clock)?
        } else {
            LeaderGate::standalone(election.identity.clone())
        };

        Ok(LifecycleSupervisor::new(
            self.config,
            Arc::new(gate),
            reconciler,
            source,
        ))
    }
}
