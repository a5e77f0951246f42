// src/transport/mock.rs
//! Mock transport for testing
//!
//! Records every request and answers from configurable switches instead of
//! talking to real workers. Relayed payloads are echoed back.

use crate::transport::Transport;
use crate::utils::errors::{Result, TreegerError};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::time::Duration;

#[derive(Debug, Default)]
struct MockState {
    shutdown_fails: bool,
    unreachable: HashSet<String>,
    pings: Vec<String>,
    shutdowns: Vec<String>,
    relays: Vec<(String, Bytes)>,
}

/// Mock transport
#[derive(Debug, Default)]
pub struct MockTransport {
    state: Mutex<MockState>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport whose shutdown requests are never acknowledged
    pub fn unresponsive() -> Self {
        let transport = Self::new();
        transport.state.lock().shutdown_fails = true;
        transport
    }

    /// Make one address stop answering pings, shutdowns and relays
    pub fn set_unreachable(&self, address: &str) {
        self.state.lock().unreachable.insert(address.to_string());
    }

    /// Addresses that received a shutdown request, in order
    pub fn shutdowns(&self) -> Vec<String> {
        self.state.lock().shutdowns.clone()
    }

    pub fn pings(&self) -> Vec<String> {
        self.state.lock().pings.clone()
    }

    /// `(address, payload)` pairs that were relayed
    pub fn relays(&self) -> Vec<(String, Bytes)> {
        self.state.lock().relays.clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn ping(&self, address: &str, _timeout: Duration) -> bool {
        let mut state = self.state.lock();
        state.pings.push(address.to_string());
        !state.unreachable.contains(address)
    }

    async fn shutdown(&self, address: &str, _timeout: Duration) -> bool {
        let mut state = self.state.lock();
        state.shutdowns.push(address.to_string());
        !state.shutdown_fails && !state.unreachable.contains(address)
    }

    async fn relay(&self, address: &str, payload: Bytes, _timeout: Duration) -> Result<Bytes> {
        let mut state = self.state.lock();
        if state.unreachable.contains(address) {
            return Err(TreegerError::RelayError(format!("{} is unreachable", address)));
        }
        state.relays.push((address.to_string(), payload.clone()));
        Ok(payload)
    }
}
