// src/lib.rs
//! Treeger scene/process orchestrator
//!
//! A central runtime that keeps a tree of named resource nodes, launches one
//! worker process per node on demand, routes calls to the right worker by
//! address, and reclaims ports and processes when workers stop.
//!
//! # Architecture
//!
//! The crate is structured into several key modules:
//!
//! - **scenario**: static template tree and CRM launch recipes (meta file)
//! - **scene**: mounted instance tree and its on-disk persistence
//! - **runtime**: worker launching, port allocation, process pool, reuse policy
//! - **transport**: framed worker protocol (client, server, addresses)
//! - **treeger**: the orchestrator façade and background reaper
//! - **control**: JSON control plane served over the worker protocol
//! - **observability**: tracing subscriber and Prometheus metrics
//! - **utils**: configuration and error types

// Public module exports
pub mod control;
pub mod observability;
pub mod runtime;
pub mod scenario;
pub mod scene;
pub mod transport;
pub mod treeger;
pub mod utils;

// Re-export commonly used types
pub use runtime::{ProcessManager, ReuseAction, WorkerLauncher};
pub use transport::{FramedTransport, Transport};
pub use treeger::{ReapWorker, Treeger};
pub use utils::config::TreegerConfig;
pub use utils::errors::{Result, TreegerError};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
