// src/utils/errors.rs
//! Error types shared across the orchestrator
//!
//! Variants follow the caller-visible taxonomy: configuration, mount,
//! activation, deactivation and relay failures, plus the plumbing errors
//! (I/O, serialization, transport) they are built from.

use std::time::Duration;
use thiserror::Error;

/// Orchestrator error
#[derive(Debug, Error)]
pub enum TreegerError {
    /// Malformed scenario/CRM configuration or orchestrator settings
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Unknown scenario name, missing parent, or invalid node key
    #[error("Mount error: {0}")]
    MountError(String),

    /// Node key is not part of the scene
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    /// Node cannot be activated (no CRM, readiness failure, ...)
    #[error("Activation error: {0}")]
    ActivationError(String),

    /// Capacity wait in the address allocator ran past its deadline
    #[error("Timed out after {0:?} waiting for a free address slot")]
    AllocationTimeout(Duration),

    /// No port in the configured range could be bound
    #[error("No available ports in range {start}-{end}")]
    PortsExhausted { start: u16, end: u16 },

    /// Worker process could not be started
    #[error("Failed to spawn worker: {0}")]
    ProcessSpawnFailed(String),

    /// Remote worker did not acknowledge shutdown
    #[error("Deactivation error: {0}")]
    DeactivationError(String),

    /// Target node is not active or the relay itself failed
    #[error("Relay error: {0}")]
    RelayError(String),

    /// Low-level transport failure (connect, framing, remote error reply)
    #[error("Transport error: {0}")]
    TransportError(String),

    /// Scene state could not be read or written
    #[error("Persistence error: {0}")]
    PersistenceError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Settings error: {0}")]
    Settings(#[from] config::ConfigError),
}

impl TreegerError {
    /// True for failures raised while resolving an address for a new worker
    pub fn is_allocation_failure(&self) -> bool {
        matches!(
            self,
            TreegerError::AllocationTimeout(_) | TreegerError::PortsExhausted { .. }
        )
    }
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, TreegerError>;
