// src/main.rs
//! Treeger orchestrator daemon
//!
//! Opens the scene described by the configured meta file, serves the control
//! plane, and persists the scene on Ctrl+C or a remote shutdown request.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{error, info};
use treeger::control::ControlService;
use treeger::observability::{init_metrics, init_tracing};
use treeger::transport::WorkerServer;
use treeger::{FramedTransport, ProcessManager, ReapWorker, Treeger, TreegerConfig};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = TreegerConfig::load().context("Failed to load configuration")?;

    // Initialize observability (tracing, metrics)
    init_tracing(&config.observability)?;
    init_metrics(config.observability.metrics_port)?;

    info!("Starting Treeger v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {:?}", config);

    let launcher = Arc::new(ProcessManager::new());
    let transport = Arc::new(FramedTransport::new(&config.runtime.socket_dir));
    let treeger = Arc::new(
        Treeger::open(config.runtime.clone(), launcher, transport)
            .await
            .context("Failed to open scene")?,
    );

    // Background reaping of crashed workers
    let reaper = Arc::new(ReapWorker::new(treeger.clone(), config.runtime.reap_interval()));
    let reaper_shutdown = reaper.shutdown_handle();
    let reaper_task = {
        let reaper = reaper.clone();
        tokio::spawn(async move { reaper.run().await })
    };

    // Control plane
    let server = WorkerServer::bind(&config.server.address, &config.runtime.socket_dir)
        .await
        .with_context(|| format!("Failed to bind control address {}", config.server.address))?;
    info!("Control plane listening on {}", server.local_address());
    let server_shutdown = server.shutdown_handle();
    let mut server_task = tokio::spawn(server.serve(Arc::new(ControlService::new(treeger.clone()))));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal, cleaning up...");
            server_shutdown.notify_one();
            if let Err(e) = (&mut server_task).await {
                error!("Control plane task failed: {}", e);
            }
        }
        served = &mut server_task => {
            match served {
                Ok(Ok(())) => info!("Control plane received remote shutdown"),
                Ok(Err(e)) => error!("Control plane error: {}", e),
                Err(e) => error!("Control plane task failed: {}", e),
            }
        }
    }

    reaper_shutdown.notify_one();
    let _ = reaper_task.await;

    match treeger.shutdown().await {
        Ok(()) => {
            info!("Treeger stopped gracefully");
            Ok(())
        }
        Err(e) => {
            error!("Shutdown error: {}", e);
            Err(e.into())
        }
    }
}
