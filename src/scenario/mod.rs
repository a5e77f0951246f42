// src/scenario/mod.rs
//! Scenario model: the static template tree
//!
//! - **Meta**: YAML schema for scenario declarations, CRM entries and tree settings
//! - **Tree**: name-indexed template tree with semantic paths and node types

pub mod meta;
pub mod tree;

pub use meta::{CrmEntry, ScenarioDecl, TreeConfiguration, TreeMeta};
pub use tree::{ScenarioNode, ScenarioNodeType, ScenarioTree};
