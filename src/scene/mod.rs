// src/scene/mod.rs
//! Scene model: mounted instances of scenario nodes
//!
//! - **Tree**: key-indexed scene tree with mount, post-order removal and
//!   record (de)serialization
//! - **Persistence**: YAML scene store with atomic replace

pub mod persistence;
pub mod tree;

pub use persistence::{SceneRecord, SceneStore};
pub use tree::{
    deserialize_launch_params, deserialize_optional_launch_params, node_name_of, parent_key_of,
    LaunchParams, MountOutcome, SceneNode, SceneTree, ROOT_KEY,
};
