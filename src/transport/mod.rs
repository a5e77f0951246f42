// src/transport/mod.rs
//! RPC transport boundary
//!
//! The orchestrator never interprets worker traffic. It only needs to:
//!
//! - **ping** an address to see whether a worker answers
//! - ask an address to **shut down**
//! - **relay** an opaque payload and hand back the raw reply
//!
//! [`FramedTransport`] implements this over length-delimited frames on TCP
//! or Unix sockets, [`WorkerServer`] is the matching server side, and
//! [`MockTransport`] stands in for both in tests.

pub mod address;
pub mod client;
pub mod codec;
pub mod mock;
pub mod server;

pub use address::{Address, AddressScheme};
pub use client::FramedTransport;
pub use mock::MockTransport;
pub use server::{RequestHandler, WorkerServer};

use crate::utils::errors::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

/// Client side of the worker protocol
#[async_trait]
pub trait Transport: Send + Sync {
    /// Liveness probe of a worker presumed started
    async fn ping(&self, address: &str, timeout: Duration) -> bool;

    /// Graceful remote stop; `true` once the worker acknowledged
    async fn shutdown(&self, address: &str, timeout: Duration) -> bool;

    /// Forward `payload` verbatim and return the reply bytes unmodified
    async fn relay(&self, address: &str, payload: Bytes, timeout: Duration) -> Result<Bytes>;
}
