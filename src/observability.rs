// src/observability.rs
//! Tracing and metrics setup
//!
//! `init_tracing` installs the global fmt subscriber (`RUST_LOG` wins over the
//! configured level); `init_metrics` starts the Prometheus exporter when a
//! port is configured. Metric names used by the orchestrator live here.

use crate::utils::config::ObservabilityConfig;
use crate::utils::errors::{Result, TreegerError};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::{Ipv4Addr, SocketAddr};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Workers currently registered in the pool (gauge)
pub const WORKERS_ACTIVE: &str = "treeger_workers_active";
/// Distinct templates with at least one running worker (gauge)
pub const TEMPLATES_ACTIVE: &str = "treeger_templates_active";
/// Ports currently reserved (gauge)
pub const PORTS_ALLOCATED: &str = "treeger_ports_allocated";
/// Workers launched (counter)
pub const ACTIVATIONS_TOTAL: &str = "treeger_activations_total";
/// Activations that failed (counter, label: reason)
pub const ACTIVATION_FAILURES_TOTAL: &str = "treeger_activation_failures_total";
/// Workers deactivated on request (counter)
pub const DEACTIVATIONS_TOTAL: &str = "treeger_deactivations_total";
/// Dead workers removed by reaping (counter)
pub const REAPED_TOTAL: &str = "treeger_reaped_total";

/// Install the global tracing subscriber
pub fn init_tracing(config: &ObservabilityConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .map_err(|e| TreegerError::ConfigError(format!("Invalid log level: {}", e)))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let installed = if config.json_logs {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    installed.map_err(|e| TreegerError::ConfigError(format!("Failed to install tracing: {}", e)))
}

/// Start the Prometheus exporter on `0.0.0.0:<port>`; no-op without a port
pub fn init_metrics(port: Option<u16>) -> Result<()> {
    let Some(port) = port else {
        return Ok(());
    };

    let listen = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    PrometheusBuilder::new()
        .with_http_listener(listen)
        .install()
        .map_err(|e| TreegerError::ConfigError(format!("Failed to install metrics exporter: {}", e)))?;

    info!(%listen, "Prometheus exporter listening");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_disabled_without_port() {
        assert!(init_metrics(None).is_ok());
    }
}
