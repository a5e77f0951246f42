// src/treeger/types.rs
//! Query results returned by the orchestrator

use crate::runtime::AllocatorUsage;
use serde::{Deserialize, Serialize};

/// Scene node plus its live address, if any
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub node_key: String,
    pub scenario_node_name: String,
    pub parent_key: Option<String>,

    /// Address of the running worker; `None` when inactive
    pub server_address: Option<String>,
}

/// Structural view of a scene node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneNodeMeta {
    pub node_key: String,

    /// Last segment of the node key
    pub node_name: String,

    /// Number of children of the scenario node it instantiates
    pub node_degree: usize,

    /// Direct children only
    pub children: Vec<SceneNodeSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneNodeSummary {
    pub node_key: String,
    pub node_name: String,
    pub node_degree: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Running,
    Stopped,
}

/// One pool entry in a status report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeStatus {
    pub node_key: String,
    pub status: WorkerStatus,
    pub address: String,

    /// Scenario template the worker was launched from
    pub template: String,

    pub uptime_secs: f64,
    pub pid: Option<u32>,
}

/// Process pool report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolStatus {
    #[serde(flatten)]
    pub ports: AllocatorUsage,

    pub active_nodes: usize,
    pub nodes: Vec<NodeStatus>,
}
