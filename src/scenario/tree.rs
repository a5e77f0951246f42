// src/scenario/tree.rs
//! Static scenario tree
//!
//! Nodes live in a flat table keyed by name; parent and child links are
//! stored as names. The tree is built once from the meta file and never
//! mutated afterwards, so node types are classified a single time.

use crate::scenario::meta::{CrmEntry, ScenarioDecl, TreeMeta};
use crate::utils::errors::{Result, TreegerError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// Structural class of a scenario node, derived from its child count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScenarioNodeType {
    /// No children
    Resource,
    /// Exactly one child
    Conception,
    /// Two or more children
    Aggregation,
}

impl ScenarioNodeType {
    fn from_child_count(count: usize) -> Self {
        match count {
            0 => ScenarioNodeType::Resource,
            1 => ScenarioNodeType::Conception,
            _ => ScenarioNodeType::Aggregation,
        }
    }
}

/// One template node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioNode {
    pub name: String,

    /// Capability launched for instances of this node; `None` for grouping nodes
    pub crm: Option<String>,

    pub semantic_path: String,
    pub node_type: ScenarioNodeType,
    pub parent: Option<String>,
    pub children: Vec<String>,
}

impl ScenarioNode {
    pub fn is_launchable(&self) -> bool {
        self.crm.is_some()
    }
}

/// Immutable scenario tree plus the CRM lookup
#[derive(Debug, Clone)]
pub struct ScenarioTree {
    root: String,
    nodes: HashMap<String, ScenarioNode>,
    crm_entries: HashMap<String, CrmEntry>,
}

impl ScenarioTree {
    /// Build the tree from a parsed meta file
    pub fn load(meta: &TreeMeta) -> Result<Self> {
        let root = meta
            .scenario
            .as_ref()
            .ok_or_else(|| TreegerError::ConfigError("Scenario tree is empty".into()))?;

        let mut crm_entries = HashMap::with_capacity(meta.crm_entries.len());
        for entry in &meta.crm_entries {
            if crm_entries.insert(entry.name.clone(), entry.clone()).is_some() {
                return Err(TreegerError::ConfigError(format!(
                    "Duplicate CRM entry '{}'",
                    entry.name
                )));
            }
        }

        let mut nodes = HashMap::new();
        let mut stack: Vec<(&ScenarioDecl, Option<&str>)> = vec![(root, None)];

        while let Some((decl, parent)) = stack.pop() {
            let semantic_path = match parent {
                Some(parent) => format!("{}/{}", nodes_path(&nodes, parent), decl.name),
                None => decl.name.clone(),
            };

            if let Some(crm) = &decl.crm {
                if !crm_entries.contains_key(crm) {
                    return Err(TreegerError::ConfigError(format!(
                        "CRM '{}' referenced by scenario node '{}' is not declared",
                        crm, decl.name
                    )));
                }
            }

            let node = ScenarioNode {
                name: decl.name.clone(),
                crm: decl.crm.clone(),
                semantic_path,
                node_type: ScenarioNodeType::from_child_count(decl.children.len()),
                parent: parent.map(str::to_string),
                children: decl.children.iter().map(|c| c.name.clone()).collect(),
            };

            debug!("Scenario node {} ({:?})", node.semantic_path, node.node_type);

            if nodes.insert(decl.name.clone(), node).is_some() {
                return Err(TreegerError::ConfigError(format!(
                    "Duplicate scenario node name '{}'",
                    decl.name
                )));
            }

            for child in decl.children.iter().rev() {
                stack.push((child, Some(decl.name.as_str())));
            }
        }

        Ok(Self {
            root: root.name.clone(),
            nodes,
            crm_entries,
        })
    }

    pub fn root(&self) -> &ScenarioNode {
        &self.nodes[&self.root]
    }

    /// Find any node (leaf or branch) by name
    pub fn find_by_name(&self, name: &str) -> Option<&ScenarioNode> {
        self.nodes.get(name)
    }

    pub fn crm_entry(&self, name: &str) -> Option<&CrmEntry> {
        self.crm_entries.get(name)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

// Parents are always inserted before their children.
fn nodes_path<'a>(nodes: &'a HashMap<String, ScenarioNode>, name: &'a str) -> &'a str {
    nodes
        .get(name)
        .map(|n| n.semantic_path.as_str())
        .unwrap_or(name)
}
