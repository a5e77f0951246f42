// src/control.rs
//! Control plane
//!
//! Exposes the orchestrator operations as JSON messages carried in `CALL`
//! frames of the worker protocol, so the control address is served by an
//! ordinary [`WorkerServer`](crate::transport::WorkerServer).
//!
//! ```json
//! {"op": "mount", "scenario_name": "topo", "node_key": "root/topo", "start_immediately": true}
//! {"op": "pool_status"}
//! ```
//!
//! Failures travel back as `ERR` frames carrying the error text.

use crate::runtime::ReuseAction;
use crate::scene::{deserialize_optional_launch_params, LaunchParams};
use crate::transport::{RequestHandler, Transport};
use crate::treeger::{NodeInfo, PoolStatus, SceneNodeMeta, Treeger};
use crate::utils::errors::Result;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Operation requested by a control client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ControlRequest {
    Mount {
        scenario_name: String,
        node_key: String,
        #[serde(default, deserialize_with = "deserialize_optional_launch_params")]
        launch_params: Option<LaunchParams>,
        #[serde(default)]
        start_immediately: bool,
        #[serde(default)]
        reuse: ReuseAction,
    },
    Unmount {
        node_key: String,
    },
    Activate {
        node_key: String,
        #[serde(default)]
        reuse: ReuseAction,
    },
    Deactivate {
        node_key: String,
    },
    NodeInfo {
        node_key: String,
    },
    PoolStatus,
    SceneNodeInfo {
        node_key: String,
    },
    /// Forward raw bytes to the node's worker
    Relay {
        node_key: String,
        payload: Vec<u8>,
    },
}

/// Successful answer to a [`ControlRequest`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ControlResponse {
    Done(bool),
    Address(String),
    NodeInfo(Option<NodeInfo>),
    PoolStatus(PoolStatus),
    SceneNodeInfo(Option<SceneNodeMeta>),
    Relayed(Vec<u8>),
}

/// Request handler backed by an orchestrator
pub struct ControlService {
    treeger: Arc<Treeger>,
}

impl ControlService {
    pub fn new(treeger: Arc<Treeger>) -> Self {
        Self { treeger }
    }

    pub async fn dispatch(&self, request: ControlRequest) -> Result<ControlResponse> {
        debug!(?request, "Control request");

        let response = match request {
            ControlRequest::Mount {
                scenario_name,
                node_key,
                launch_params,
                start_immediately,
                reuse,
            } => ControlResponse::Done(
                self.treeger
                    .mount(&scenario_name, &node_key, launch_params, start_immediately, reuse)
                    .await?,
            ),
            ControlRequest::Unmount { node_key } => {
                ControlResponse::Done(self.treeger.unmount(&node_key).await?)
            }
            ControlRequest::Activate { node_key, reuse } => {
                ControlResponse::Address(self.treeger.activate(&node_key, reuse).await?)
            }
            ControlRequest::Deactivate { node_key } => {
                ControlResponse::Done(self.treeger.deactivate(&node_key).await?)
            }
            ControlRequest::NodeInfo { node_key } => {
                ControlResponse::NodeInfo(self.treeger.node_info(&node_key).await)
            }
            ControlRequest::PoolStatus => ControlResponse::PoolStatus(self.treeger.pool_status().await),
            ControlRequest::SceneNodeInfo { node_key } => {
                ControlResponse::SceneNodeInfo(self.treeger.scene_node_info(&node_key).await)
            }
            ControlRequest::Relay { node_key, payload } => {
                let reply = self.treeger.relay(&node_key, Bytes::from(payload)).await?;
                ControlResponse::Relayed(reply.to_vec())
            }
        };

        Ok(response)
    }
}

#[async_trait]
impl RequestHandler for ControlService {
    async fn handle(&self, payload: Bytes) -> Result<Bytes> {
        let request: ControlRequest = serde_json::from_slice(&payload)?;
        let response = self.dispatch(request).await?;
        Ok(Bytes::from(serde_json::to_vec(&response)?))
    }
}

/// Send one control request to `address` and decode the answer
pub async fn call(
    transport: &dyn Transport,
    address: &str,
    request: &ControlRequest,
    timeout: Duration,
) -> Result<ControlResponse> {
    let payload = Bytes::from(serde_json::to_vec(request)?);
    let reply = transport.relay(address, payload, timeout).await?;
    Ok(serde_json::from_slice(&reply)?)
}
