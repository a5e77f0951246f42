// src/runtime/reuse.rs
//! Reuse policy for sibling workers
//!
//! When a node is activated while another node built from the same scenario
//! template is already running, the requested [`ReuseAction`] decides whether
//! the sibling is shared, replaced, or left alone next to a fresh worker.

use crate::runtime::process_pool::ProcessPool;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Requested handling of a live sibling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReuseAction {
    /// Share the sibling's address
    Keep = 0,

    /// Launch alongside the sibling
    Fork = 1,

    /// Stop the sibling, then launch
    #[default]
    Replace = 2,
}

impl fmt::Display for ReuseAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReuseAction::Keep => write!(f, "KEEP"),
            ReuseAction::Fork => write!(f, "FORK"),
            ReuseAction::Replace => write!(f, "REPLACE"),
        }
    }
}

/// Outcome of reuse resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReuseDecision {
    /// Answer with the sibling's address; nothing is launched
    Keep { sibling: String, address: String },

    /// Deactivate `sibling`, then launch
    Replace { sibling: String },

    /// Launch a fresh worker
    Launch,
}

/// Decide what to do for `scenario_node_name` given the live pool
pub fn resolve(pool: &ProcessPool, scenario_node_name: &str, action: ReuseAction) -> ReuseDecision {
    let sibling = match pool.first_sibling(scenario_node_name) {
        Some(sibling) => sibling,
        None => return ReuseDecision::Launch,
    };

    match action {
        ReuseAction::Keep => match pool.get(sibling) {
            Some(info) => ReuseDecision::Keep {
                sibling: sibling.to_string(),
                address: info.address.clone(),
            },
            None => ReuseDecision::Launch,
        },
        ReuseAction::Replace => ReuseDecision::Replace {
            sibling: sibling.to_string(),
        },
        ReuseAction::Fork => ReuseDecision::Launch,
    }
}
