// src/transport/address.rs
//! Worker addresses
//!
//! Two schemes are supported:
//!
//! - `tcp://host:port`: a real network endpoint, port taken from the allocator
//! - `memory://name`: a local channel (Unix socket under the socket directory),
//!   derived deterministically from the node key with no port allocation

use crate::utils::errors::{Result, TreegerError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

const TCP_PREFIX: &str = "tcp://";
const MEMORY_PREFIX: &str = "memory://";

/// How a fresh worker gets its address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressScheme {
    Tcp,
    Memory,
}

/// Parsed worker address
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Address {
    Tcp { host: String, port: u16 },
    Memory(String),
}

impl Address {
    /// Loopback TCP address for an allocated port
    pub fn tcp_loopback(port: u16) -> Self {
        Address::Tcp {
            host: "127.0.0.1".to_string(),
            port,
        }
    }

    /// Deterministic local address for a scene node
    ///
    /// `/` becomes `_`; literal `_` and `%` are percent-escaped so distinct
    /// keys never share a name (`root/a_b` is `root_a%5Fb`).
    pub fn memory_for_node(node_key: &str) -> Self {
        let mut name = String::with_capacity(node_key.len());
        for c in node_key.chars() {
            match c {
                '/' => name.push('_'),
                '_' => name.push_str("%5F"),
                '%' => name.push_str("%25"),
                c => name.push(c),
            }
        }
        Address::Memory(name)
    }

    pub fn scheme(&self) -> AddressScheme {
        match self {
            Address::Tcp { .. } => AddressScheme::Tcp,
            Address::Memory(_) => AddressScheme::Memory,
        }
    }

    pub fn port(&self) -> Option<u16> {
        match self {
            Address::Tcp { port, .. } => Some(*port),
            Address::Memory(_) => None,
        }
    }

    /// Socket file backing a `memory://` address
    pub fn socket_path(&self, socket_dir: &Path) -> Option<PathBuf> {
        match self {
            Address::Memory(name) => Some(socket_dir.join(format!("{}.sock", name))),
            Address::Tcp { .. } => None,
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Tcp { host, port } => write!(f, "{}{}:{}", TCP_PREFIX, host, port),
            Address::Memory(name) => write!(f, "{}{}", MEMORY_PREFIX, name),
        }
    }
}

impl FromStr for Address {
    type Err = TreegerError;

    fn from_str(s: &str) -> Result<Self> {
        if let Some(rest) = s.strip_prefix(TCP_PREFIX) {
            let (host, port) = rest
                .rsplit_once(':')
                .ok_or_else(|| TreegerError::TransportError(format!("Missing port in '{}'", s)))?;
            let port = port
                .parse()
                .map_err(|_| TreegerError::TransportError(format!("Invalid port in '{}'", s)))?;
            if host.is_empty() {
                return Err(TreegerError::TransportError(format!("Missing host in '{}'", s)));
            }
            return Ok(Address::Tcp {
                host: host.to_string(),
                port,
            });
        }

        if let Some(name) = s.strip_prefix(MEMORY_PREFIX) {
            if name.is_empty() || name.contains('/') {
                return Err(TreegerError::TransportError(format!(
                    "Invalid memory address '{}'",
                    s
                )));
            }
            return Ok(Address::Memory(name.to_string()));
        }

        Err(TreegerError::TransportError(format!(
            "Unsupported address scheme in '{}'",
            s
        )))
    }
}
