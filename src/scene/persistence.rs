// src/scene/persistence.rs
//! Scene persistence
//!
//! The scene is stored as a YAML list of records, one per node. Writes go to
//! a sibling temp file which is then renamed over the target.

use crate::scene::tree::{deserialize_launch_params, LaunchParams};
use crate::utils::errors::{Result, TreegerError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

/// Durable form of one scene node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneRecord {
    pub node_key: String,
    pub scenario_node_name: String,

    #[serde(default, deserialize_with = "deserialize_launch_params")]
    pub launch_params: LaunchParams,

    #[serde(default)]
    pub parent_key: Option<String>,
}

/// File-backed scene store
#[derive(Debug, Clone)]
pub struct SceneStore {
    path: PathBuf,
}

impl SceneStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read persisted records; `None` means there is no prior state
    pub async fn load(&self) -> Result<Option<Vec<SceneRecord>>> {
        let text = match fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = ?self.path, "Scene file does not exist, starting a new scene");
                return Ok(None);
            }
            Err(e) => {
                return Err(TreegerError::PersistenceError(format!(
                    "Failed to read scene file {:?}: {}",
                    self.path, e
                )))
            }
        };

        if text.trim().is_empty() {
            warn!(path = ?self.path, "Scene file is empty, starting a new scene");
            return Ok(None);
        }

        let records: Vec<SceneRecord> = serde_yaml::from_str(&text).map_err(|e| {
            TreegerError::PersistenceError(format!("Invalid scene file {:?}: {}", self.path, e))
        })?;

        info!(path = ?self.path, nodes = records.len(), "Loaded scene");
        Ok(Some(records))
    }

    /// Atomically replace the stored scene
    pub async fn save(&self, records: &[SceneRecord]) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await.map_err(|e| {
                TreegerError::PersistenceError(format!("Failed to create directory: {}", e))
            })?;
        }

        let text = serde_yaml::to_string(records)?;
        let tmp = self.temp_path();

        fs::write(&tmp, text).await.map_err(|e| {
            TreegerError::PersistenceError(format!("Failed to write {:?}: {}", tmp, e))
        })?;
        fs::rename(&tmp, &self.path).await.map_err(|e| {
            TreegerError::PersistenceError(format!("Failed to replace {:?}: {}", self.path, e))
        })?;

        debug!(path = ?self.path, nodes = records.len(), "Scene written");
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "scene".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(key: &str, parent: Option<&str>) -> SceneRecord {
        SceneRecord {
            node_key: key.to_string(),
            scenario_node_name: "topo".to_string(),
            launch_params: [("grid".to_string(), "a.arrow".to_string())].into(),
            parent_key: parent.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_missing_file_is_fresh_start() {
        let dir = tempfile::tempdir().unwrap();
        let store = SceneStore::new(dir.path().join("scene.yaml"));
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = SceneStore::new(dir.path().join("nested/scene.yaml"));
        let records = vec![record("root", None), record("root/topo", Some("root"))];

        store.save(&records).await.unwrap();
        assert!(!dir.path().join("nested/scene.yaml.tmp").exists());

        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded, records);
    }

    #[tokio::test]
    async fn test_null_params_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scene.yaml");
        std::fs::write(
            &path,
            "- node_key: root\n  scenario_node_name: root\n  launch_params: null\n  parent_key: null\n",
        )
        .unwrap();

        let loaded = SceneStore::new(&path).load().await.unwrap().unwrap();
        assert!(loaded[0].launch_params.is_empty());
        assert!(loaded[0].parent_key.is_none());
    }

    #[tokio::test]
    async fn test_scalar_params_become_text() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scene.yaml");
        std::fs::write(
            &path,
            "- node_key: root\n  scenario_node_name: root\n  launch_params:\n    level: 3\n    ratio: 0.5\n    verbose: true\n    name: p1\n",
        )
        .unwrap();

        let loaded = SceneStore::new(&path).load().await.unwrap().unwrap();
        let params = &loaded[0].launch_params;
        assert_eq!(params.get("level").map(String::as_str), Some("3"));
        assert_eq!(params.get("ratio").map(String::as_str), Some("0.5"));
        assert_eq!(params.get("verbose").map(String::as_str), Some("true"));
        assert_eq!(params.get("name").map(String::as_str), Some("p1"));
    }

    #[tokio::test]
    async fn test_nested_param_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scene.yaml");
        std::fs::write(
            &path,
            "- node_key: root\n  scenario_node_name: root\n  launch_params:\n    grid: [1, 2]\n",
        )
        .unwrap();

        assert!(matches!(
            SceneStore::new(&path).load().await,
            Err(TreegerError::PersistenceError(_))
        ));
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scene.yaml");
        std::fs::write(&path, "{not: [a, list").unwrap();

        assert!(matches!(
            SceneStore::new(&path).load().await,
            Err(TreegerError::PersistenceError(_))
        ));
    }
}
