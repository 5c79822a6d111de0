//! App - アプリケーション層
//!
//! Combines the ports into the running controller.
//!
//! # 主要コンポーネント
//! - **ControllerBuilder**: 構築とワイヤリング（fail-fast 検証）
//! - **LeaderGate**: lease による leader election
//! - **ReconcileLoop / WorkerGroup**: get→leader check→reconcile→requeue
//! - **SourcePump**: change feed → WorkQueue
//! - **LifecycleSupervisor**: 起動・停止順序と health probe

pub mod builder;
pub mod config;
pub mod context;
pub mod health;
pub mod leader;
pub mod source_pump;
pub mod supervisor;
pub mod worker_loop;

pub use self::builder::{BuildError, ControllerBuilder};
pub use self::config::{ControllerConfig, LeaderElectionConfig, MAX_TIMEOUT, RETRY_JITTER};
pub use self::context::LifecycleContext;
pub use self::health::{HealthProbe, HealthReport, WorkerLiveness};
pub use self::leader::LeaderGate;
pub use self::source_pump::SourcePump;
pub use self::supervisor::LifecycleSupervisor;
pub use self::worker_loop::{LoopOptions, Processed, ReconcileLoop, WorkerGroup};
