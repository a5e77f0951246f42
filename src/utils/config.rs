// src/utils/config.rs
//! Orchestrator settings
//!
//! Layered with the `config` crate: built-in defaults, then an optional
//! `treeger.{toml,yaml,json}` file in the working directory, then
//! `TREEGER__SECTION__KEY` environment variables.

use crate::transport::AddressScheme;
use crate::utils::errors::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TreegerConfig {
    pub server: ServerConfig,
    pub runtime: RuntimeConfig,
    pub observability: ObservabilityConfig,
}

/// Control-plane settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the control plane listens on
    pub address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "tcp://127.0.0.1:9100".to_string(),
        }
    }
}

/// Orchestration engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Scenario meta file (YAML)
    pub meta_path: PathBuf,

    /// Base directory for relative scene and launcher paths
    pub root_dir: PathBuf,

    /// Scheme used when a CRM entry does not pick one
    pub address_scheme: AddressScheme,

    /// Directory holding `memory://` sockets
    pub socket_dir: PathBuf,

    /// How long activation may wait for a free port slot
    pub acquire_timeout_secs: u64,

    /// Backoff between capacity polls
    pub acquire_poll_interval_ms: u64,

    /// Bound on the remote shutdown request
    pub shutdown_timeout_secs: u64,

    /// Bound on a relayed call
    pub relay_timeout_secs: u64,

    /// Readiness ping window after spawn (0 disables)
    pub ready_timeout_secs: u64,

    /// Background reap period
    pub reap_interval_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            meta_path: PathBuf::from("scenario.meta.yaml"),
            root_dir: PathBuf::from("."),
            address_scheme: AddressScheme::Memory,
            socket_dir: std::env::temp_dir().join("treeger"),
            acquire_timeout_secs: 30,
            acquire_poll_interval_ms: 1000,
            shutdown_timeout_secs: 60,
            relay_timeout_secs: 60,
            ready_timeout_secs: 0,
            reap_interval_secs: 5,
        }
    }
}

impl RuntimeConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }

    pub fn acquire_poll_interval(&self) -> Duration {
        Duration::from_millis(self.acquire_poll_interval_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn relay_timeout(&self) -> Duration {
        Duration::from_secs(self.relay_timeout_secs)
    }

    pub fn ready_timeout(&self) -> Option<Duration> {
        (self.ready_timeout_secs > 0).then(|| Duration::from_secs(self.ready_timeout_secs))
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_secs.max(1))
    }

    /// Resolve a path against `root_dir` unless it is already absolute
    pub fn resolve(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root_dir.join(path)
        }
    }
}

/// Logging and metrics settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Default filter when `RUST_LOG` is unset
    pub log_level: String,

    /// Emit JSON log lines
    pub json_logs: bool,

    /// Prometheus exporter port (disabled when unset)
    pub metrics_port: Option<u16>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics_port: None,
        }
    }
}

impl TreegerConfig {
    /// Load from `treeger.*` in the working directory and the environment
    pub fn load() -> Result<Self> {
        Self::load_from("treeger")
    }

    /// Load with an explicit settings file stem or path
    pub fn load_from(file: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(file).required(false))
            .add_source(
                config::Environment::with_prefix("TREEGER")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}
