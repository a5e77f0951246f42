// src/treeger/reaper.rs
//! Background reaping of exited workers
//!
//! Status queries already reap, but nothing guarantees they happen. This
//! worker calls [`Treeger::reap`] on a fixed period so crashed workers give
//! their ports back promptly.

use crate::treeger::orchestrator::Treeger;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, info};

/// Periodic reaper
pub struct ReapWorker {
    treeger: Arc<Treeger>,
    interval: Duration,
    shutdown: Arc<Notify>,
}

impl ReapWorker {
    pub fn new(treeger: Arc<Treeger>, interval: Duration) -> Self {
        Self {
            treeger,
            interval,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle that can be used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Reap until the shutdown handle is notified
    pub async fn run(&self) {
        info!(interval_ms = self.interval.as_millis() as u64, "Reap worker started");

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Reap worker received shutdown signal");
                    break;
                }

                _ = tokio::time::sleep(self.interval) => {
                    let reaped = self.treeger.reap().await;
                    if !reaped.is_empty() {
                        debug!(count = reaped.len(), nodes = ?reaped, "Reaped workers");
                    }
                }
            }
        }

        info!("Reap worker stopped");
    }
}
