// src/runtime/process_pool.rs
//! Live worker registry
//!
//! Holds one [`ProcessInfo`] per activated scene node, plus the in-flight
//! index that groups active node keys by scenario template.
//!
//! # Layout
//!
//! ```text
//! ProcessPool
//! ├─ entries:   node_key -> ProcessInfo
//! └─ in_flight: scenario_node_name -> {node_key, ...}
//! ```
//!
//! Every key in `entries` appears in exactly one in-flight set and every
//! in-flight key has an entry. Both maps are only touched through
//! [`ProcessPool::register`] and [`ProcessPool::remove`].

use crate::runtime::process_manager::WorkerHandle;
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};

/// An activated worker
#[derive(Debug)]
pub struct ProcessInfo {
    pub node_key: String,

    /// Address the worker serves on
    pub address: String,

    /// Reserved port, for TCP addresses
    pub port: Option<u16>,

    pub started_at: DateTime<Utc>,

    /// Scenario template the worker was launched from
    pub scenario_node_name: String,

    /// Owning process handle
    pub handle: Box<dyn WorkerHandle>,
}

impl ProcessInfo {
    /// Seconds since the worker was registered
    pub fn uptime_secs(&self) -> f64 {
        let elapsed = Utc::now() - self.started_at;
        elapsed.num_milliseconds().max(0) as f64 / 1000.0
    }
}

/// Pool of active workers
#[derive(Debug, Default)]
pub struct ProcessPool {
    entries: HashMap<String, ProcessInfo>,
    in_flight: HashMap<String, BTreeSet<String>>,
}

impl ProcessPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a worker; returns the entry it displaced, if any
    pub fn register(&mut self, info: ProcessInfo) -> Option<ProcessInfo> {
        let previous = self.remove(&info.node_key);

        self.in_flight
            .entry(info.scenario_node_name.clone())
            .or_default()
            .insert(info.node_key.clone());
        self.entries.insert(info.node_key.clone(), info);

        previous
    }

    /// Remove a worker and its in-flight membership
    pub fn remove(&mut self, node_key: &str) -> Option<ProcessInfo> {
        let info = self.entries.remove(node_key)?;

        if let Some(siblings) = self.in_flight.get_mut(&info.scenario_node_name) {
            siblings.remove(node_key);
            if siblings.is_empty() {
                self.in_flight.remove(&info.scenario_node_name);
            }
        }

        Some(info)
    }

    pub fn get(&self, node_key: &str) -> Option<&ProcessInfo> {
        self.entries.get(node_key)
    }

    pub fn get_mut(&mut self, node_key: &str) -> Option<&mut ProcessInfo> {
        self.entries.get_mut(node_key)
    }

    pub fn contains(&self, node_key: &str) -> bool {
        self.entries.contains_key(node_key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Active node keys, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Active node keys launched from `scenario_node_name`
    pub fn siblings(&self, scenario_node_name: &str) -> impl Iterator<Item = &str> {
        self.in_flight
            .get(scenario_node_name)
            .into_iter()
            .flat_map(|keys| keys.iter().map(String::as_str))
    }

    /// First sibling in key order
    pub fn first_sibling(&self, scenario_node_name: &str) -> Option<&str> {
        self.siblings(scenario_node_name).next()
    }

    /// Poll every handle and return the keys whose worker has exited
    pub fn dead_entries(&mut self) -> Vec<String> {
        let mut dead: Vec<String> = self
            .entries
            .iter_mut()
            .filter_map(|(key, info)| (!info.handle.is_alive()).then(|| key.clone()))
            .collect();
        dead.sort();
        dead
    }

    /// Pool and in-flight index describe the same set of workers
    pub fn is_consistent(&self) -> bool {
        let indexed: usize = self.in_flight.values().map(BTreeSet::len).sum();
        indexed == self.entries.len()
            && self.in_flight.iter().all(|(template, keys)| {
                keys.iter().all(|key| {
                    self.entries
                        .get(key)
                        .map_or(false, |info| &info.scenario_node_name == template)
                })
            })
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            active_workers: self.entries.len(),
            templates: self.in_flight.len(),
        }
    }
}

/// Pool statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStats {
    pub active_workers: usize,
    pub templates: usize,
}
