// src/scene/tree.rs
//! Dynamic scene tree
//!
//! Scene nodes are instances of scenario nodes. Many scene nodes may share
//! one template; each carries its own launch parameters. Storage is a flat
//! table keyed by node key with parent/children kept as keys, which keeps
//! persistence a straight dump of the table.

use crate::scenario::ScenarioTree;
use crate::scene::persistence::SceneRecord;
use crate::utils::errors::{Result, TreegerError};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, info, warn};

/// Key of the distinguished root scene node
pub const ROOT_KEY: &str = "root";

/// Opaque worker launch parameters, forwarded as `--key value` flags
pub type LaunchParams = BTreeMap<String, String>;

/// Deserialize launch parameters from a map of scalars
///
/// Strings are kept verbatim; numbers and booleans are rendered as text so
/// `{"level": 3}` and `level: 3` both reach the worker as `--level 3`. A
/// null map is empty.
pub fn deserialize_launch_params<'de, D>(
    deserializer: D,
) -> std::result::Result<LaunchParams, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<BTreeMap<String, Value>>::deserialize(deserializer)?;
    raw.unwrap_or_default()
        .into_iter()
        .map(|(key, value)| {
            let text = match value {
                Value::String(text) => text,
                Value::Number(number) => number.to_string(),
                Value::Bool(flag) => flag.to_string(),
                other => {
                    return Err(D::Error::custom(format!(
                        "launch parameter '{}' must be a string, number or boolean, got {}",
                        key, other
                    )))
                }
            };
            Ok((key, text))
        })
        .collect()
}

/// [`deserialize_launch_params`] for optional fields
pub fn deserialize_optional_launch_params<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<LaunchParams>, D::Error>
where
    D: Deserializer<'de>,
{
    deserialize_launch_params(deserializer).map(Some)
}

/// Parent key of a node key (everything before the last `/`)
pub fn parent_key_of(node_key: &str) -> Option<&str> {
    node_key.rsplit_once('/').map(|(parent, _)| parent)
}

/// Last segment of a node key
pub fn node_name_of(node_key: &str) -> &str {
    node_key.rsplit_once('/').map(|(_, name)| name).unwrap_or(node_key)
}

/// One mounted instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SceneNode {
    pub node_key: String,
    pub scenario_node_name: String,
    pub launch_params: LaunchParams,
    pub parent: Option<String>,
    pub children: Vec<String>,
}

/// Result of a mount request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountOutcome {
    Mounted,
    AlreadyMounted,
}

/// Scene tree
#[derive(Debug, Clone)]
pub struct SceneTree {
    root: String,
    nodes: HashMap<String, SceneNode>,
}

impl SceneTree {
    /// Fresh scene holding only the root, bound to the scenario root
    pub fn with_root(scenarios: &ScenarioTree, launch_params: LaunchParams) -> Self {
        let root = SceneNode {
            node_key: ROOT_KEY.to_string(),
            scenario_node_name: scenarios.root().name.clone(),
            launch_params,
            parent: None,
            children: Vec::new(),
        };

        let mut nodes = HashMap::new();
        nodes.insert(ROOT_KEY.to_string(), root);

        Self {
            root: ROOT_KEY.to_string(),
            nodes,
        }
    }

    pub fn root_key(&self) -> &str {
        &self.root
    }

    pub fn get(&self, node_key: &str) -> Option<&SceneNode> {
        self.nodes.get(node_key)
    }

    pub fn contains(&self, node_key: &str) -> bool {
        self.nodes.contains_key(node_key)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Mount `node_key` as an instance of `scenario_name`
    ///
    /// The parent is the node key minus its last segment and must already be
    /// mounted. Mounting an existing key is a logged no-op.
    pub fn mount(
        &mut self,
        scenarios: &ScenarioTree,
        scenario_name: &str,
        node_key: &str,
        launch_params: Option<LaunchParams>,
    ) -> Result<MountOutcome> {
        if self.nodes.contains_key(node_key) {
            warn!(node_key, "Node already mounted, skipping");
            return Ok(MountOutcome::AlreadyMounted);
        }

        let scenario = scenarios.find_by_name(scenario_name).ok_or_else(|| {
            TreegerError::MountError(format!(
                "Scenario node '{}' not found in tree meta",
                scenario_name
            ))
        })?;

        let mut launch_params = launch_params.unwrap_or_default();
        if !scenario.is_launchable() && !launch_params.is_empty() {
            warn!(
                scenario = scenario_name,
                ?launch_params,
                "Launch parameters given for a node without a CRM, ignoring them"
            );
            launch_params.clear();
        }

        let parent_key = parent_key_of(node_key).ok_or_else(|| {
            TreegerError::MountError(format!("Node key '{}' has no parent path", node_key))
        })?;

        let parent = self.nodes.get_mut(parent_key).ok_or_else(|| {
            TreegerError::MountError(format!(
                "Parent node '{}' not found in scene for node '{}'",
                parent_key, node_key
            ))
        })?;
        parent.children.push(node_key.to_string());

        self.nodes.insert(
            node_key.to_string(),
            SceneNode {
                node_key: node_key.to_string(),
                scenario_node_name: scenario_name.to_string(),
                launch_params,
                parent: Some(parent_key.to_string()),
                children: Vec::new(),
            },
        );

        info!(node_key, scenario = scenario_name, "Mounted node");
        Ok(MountOutcome::Mounted)
    }

    /// Keys of the subtree under `node_key`, children before parents
    pub fn subtree_post_order(&self, node_key: &str) -> Vec<String> {
        let mut order = Vec::new();
        if !self.nodes.contains_key(node_key) {
            return order;
        }

        // (key, children already expanded)
        let mut stack = vec![(node_key.to_string(), false)];
        while let Some((key, expanded)) = stack.pop() {
            if expanded {
                order.push(key);
                continue;
            }
            stack.push((key.clone(), true));
            if let Some(node) = self.nodes.get(&key) {
                for child in node.children.iter().rev() {
                    stack.push((child.clone(), false));
                }
            }
        }
        order
    }

    /// Detach a node from its parent and drop it
    ///
    /// Children must already be gone; use `subtree_post_order` to remove a
    /// whole branch.
    pub fn remove(&mut self, node_key: &str) -> Option<SceneNode> {
        let node = self.nodes.remove(node_key)?;
        if !node.children.is_empty() {
            warn!(node_key, children = node.children.len(), "Removed node still had children");
        }
        if let Some(parent) = node.parent.as_ref().and_then(|p| self.nodes.get_mut(p)) {
            parent.children.retain(|c| c != node_key);
        }
        debug!(node_key, "Removed scene node");
        Some(node)
    }

    /// One record per node, parents listed before their children
    pub fn serialize(&self) -> Vec<SceneRecord> {
        self.pre_order()
            .into_iter()
            .filter_map(|key| self.nodes.get(&key))
            .map(|node| SceneRecord {
                node_key: node.node_key.clone(),
                scenario_node_name: node.scenario_node_name.clone(),
                launch_params: node.launch_params.clone(),
                parent_key: node.parent.clone(),
            })
            .collect()
    }

    /// Rebuild a scene from persisted records
    ///
    /// Every node is instantiated first (an unknown scenario name fails the
    /// whole load), then linked to its parent. Nodes that cannot be reached
    /// from the root afterwards are dropped.
    pub fn deserialize(records: &[SceneRecord], scenarios: &ScenarioTree) -> Result<Self> {
        let mut nodes = HashMap::with_capacity(records.len());

        for record in records {
            if scenarios.find_by_name(&record.scenario_node_name).is_none() {
                return Err(TreegerError::PersistenceError(format!(
                    "Scene node '{}' references unknown scenario node '{}'",
                    record.node_key, record.scenario_node_name
                )));
            }

            let node = SceneNode {
                node_key: record.node_key.clone(),
                scenario_node_name: record.scenario_node_name.clone(),
                launch_params: record.launch_params.clone(),
                parent: None,
                children: Vec::new(),
            };
            if nodes.insert(record.node_key.clone(), node).is_some() {
                return Err(TreegerError::PersistenceError(format!(
                    "Duplicate scene node '{}'",
                    record.node_key
                )));
            }
        }

        if !nodes.contains_key(ROOT_KEY) {
            return Err(TreegerError::PersistenceError(format!(
                "Persisted scene has no '{}' node",
                ROOT_KEY
            )));
        }

        for record in records {
            let Some(parent_key) = record.parent_key.as_deref() else {
                continue;
            };
            if record.node_key == ROOT_KEY {
                warn!(parent_key, "Ignoring parent recorded for the scene root");
                continue;
            }
            if !nodes.contains_key(parent_key) {
                continue;
            }
            if let Some(node) = nodes.get_mut(&record.node_key) {
                node.parent = Some(parent_key.to_string());
            }
            if let Some(parent) = nodes.get_mut(parent_key) {
                parent.children.push(record.node_key.clone());
            }
        }

        let mut tree = Self {
            root: ROOT_KEY.to_string(),
            nodes,
        };
        tree.drop_unreachable();

        info!(nodes = tree.len(), "Scene restored");
        Ok(tree)
    }

    fn pre_order(&self) -> Vec<String> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut seen = HashSet::new();
        let mut stack = vec![self.root.clone()];

        while let Some(key) = stack.pop() {
            if !seen.insert(key.clone()) {
                continue;
            }
            if let Some(node) = self.nodes.get(&key) {
                for child in node.children.iter().rev() {
                    stack.push(child.clone());
                }
                order.push(key);
            }
        }
        order
    }

    fn drop_unreachable(&mut self) {
        let reachable: HashSet<String> = self.pre_order().into_iter().collect();
        let orphans: Vec<String> = self
            .nodes
            .keys()
            .filter(|k| !reachable.contains(*k))
            .cloned()
            .collect();

        for key in orphans {
            warn!(node_key = %key, "Dropping scene node unreachable from the root");
            self.nodes.remove(&key);
        }

        for node in self.nodes.values_mut() {
            node.children.retain(|c| reachable.contains(c));
        }
    }
}
