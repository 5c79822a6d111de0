//! keel-core
//!
//! Building blocks for a level-triggered reconciliation controller.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ResourceKey, ReconcileResult, LeaseRecord, LoopState, events）
//! - **ports**: 抽象化レイヤー（LeaseStore, ChangeSource, Reconciler, Clock）
//! - **queue**: 重複排除・遅延・backoff 付き WorkQueue
//! - **app**: LeaderGate, ReconcileLoop, LifecycleSupervisor, builder
//! - **impls**: 開発用 in-memory 実装
//! - **observability**: queue / loop の統計
//! - **error**: エラー型

pub mod app;
pub mod domain;
pub mod error;
pub mod impls;
pub mod observability;
pub mod ports;
pub mod queue;

pub use self::app::{ControllerBuilder, ControllerConfig, LeaderElectionConfig, LifecycleSupervisor};
pub use self::domain::{ReconcileResult, ResourceKey};
pub use self::error::KeelError;
pub use self::ports::{ReconcileContext, Reconciler};
