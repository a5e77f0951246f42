// src/treeger/mod.rs
//! Orchestration engine
//!
//! - **Orchestrator**: the [`Treeger`] façade (mount, activate, relay, shutdown)
//! - **Reaper**: background release of exited workers
//! - **Types**: node, scene and pool reports

pub mod orchestrator;
pub mod reaper;
pub mod types;

pub use orchestrator::Treeger;
pub use reaper::ReapWorker;
pub use types::{NodeInfo, NodeStatus, PoolStatus, SceneNodeMeta, SceneNodeSummary, WorkerStatus};
