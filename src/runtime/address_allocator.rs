// src/runtime/address_allocator.rs
//! Port allocation for TCP workers
//!
//! Provides a bounded pool of local ports:
//! - At most `max_ports` ports reserved at once
//! - First-fit search over `port_range`, probing each candidate by binding it
//! - Ownership tracking so a stale reservation cannot be released twice
//!
//! Waiting for capacity is the orchestrator's job (it has to reap dead workers
//! between polls); the allocator itself never blocks.

use crate::scenario::TreeConfiguration;
use crate::utils::errors::{Result, TreegerError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::{Ipv4Addr, TcpListener};
use tracing::{debug, warn};

/// Allocator usage snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocatorUsage {
    pub used_ports: usize,
    pub max_ports: usize,
    pub available_slots: usize,
    pub port_range: (u16, u16),
}

/// Bounded first-fit port allocator
#[derive(Debug)]
pub struct AddressAllocator {
    /// Inclusive range searched for free ports
    port_range: (u16, u16),

    /// Maximum number of simultaneously reserved ports
    max_ports: usize,

    /// Reserved port -> owning node key
    allocated: BTreeMap<u16, String>,
}

impl AddressAllocator {
    pub fn new(port_range: (u16, u16), max_ports: usize) -> Self {
        Self {
            port_range,
            max_ports,
            allocated: BTreeMap::new(),
        }
    }

    pub fn from_configuration(configuration: &TreeConfiguration) -> Self {
        Self::new(configuration.port_range, configuration.max_ports)
    }

    /// True when no further port may be reserved
    pub fn is_full(&self) -> bool {
        self.allocated.len() >= self.max_ports
    }

    /// Reserve a port for `node_key`
    ///
    /// Prefers a port that is neither reserved nor in use. If every free slot in
    /// the range is occupied by a foreign process, a reserved port that turns
    /// out to be bindable is taken over and its previous owner forgotten.
    pub fn allocate(&mut self, node_key: &str) -> Result<u16> {
        let (start, end) = self.port_range;
        // Binding port 0 yields an ephemeral port, so it never names an endpoint.
        let first = start.max(1);

        if let Some(port) =
            (first..=end).find(|port| !self.allocated.contains_key(port) && is_port_bindable(*port))
        {
            self.allocated.insert(port, node_key.to_string());
            debug!(node_key, port, used = self.allocated.len(), "Port allocated");
            return Ok(port);
        }

        if let Some(port) = (first..=end).find(|port| is_port_bindable(*port)) {
            if let Some(stale) = self.allocated.insert(port, node_key.to_string()) {
                warn!(port, stale_owner = %stale, node_key, "Reclaimed stale port reservation");
            }
            return Ok(port);
        }

        Err(TreegerError::PortsExhausted { start, end })
    }

    /// Release `port` if it is still reserved by `node_key`
    pub fn release(&mut self, port: u16, node_key: &str) -> bool {
        match self.owner(port) {
            Some(owner) if owner == node_key => {
                self.allocated.remove(&port);
                debug!(node_key, port, "Port released");
                true
            }
            Some(owner) => {
                debug!(node_key, port, owner = %owner, "Port now owned by another node, not released");
                false
            }
            None => false,
        }
    }

    /// Node currently holding `port`
    pub fn owner(&self, port: u16) -> Option<&str> {
        self.allocated.get(&port).map(String::as_str)
    }

    pub fn used(&self) -> usize {
        self.allocated.len()
    }

    pub fn usage(&self) -> AllocatorUsage {
        AllocatorUsage {
            used_ports: self.allocated.len(),
            max_ports: self.max_ports,
            available_slots: self.max_ports.saturating_sub(self.allocated.len()),
            port_range: self.port_range,
        }
    }
}

/// Probe a port by opening and closing a listening socket on loopback
pub fn is_port_bindable(port: u16) -> bool {
    TcpListener::bind((Ipv4Addr::LOCALHOST, port)).is_ok()
}
