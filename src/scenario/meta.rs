// src/scenario/meta.rs
//! Scenario meta file schema
//!
//! ```yaml
//! meta:
//!   configuration:
//!     scene_path: resource/scene.yaml
//!     max_ports: 8
//!     port_range: [5556, 5656]
//!   crm_entries:
//!     - name: topo
//!       icrm: ITopo
//!       crm_launcher: scripts/topo.crm.py
//!       interpreter: python3
//!   scenario:
//!     name: root
//!     children:
//!       - name: topo
//!         crm: topo
//! ```

use crate::transport::AddressScheme;
use crate::utils::errors::{Result, TreegerError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Launch recipe for one worker capability
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrmEntry {
    /// Key referenced by `ScenarioDecl::crm`
    pub name: String,

    /// Interface the worker implements
    #[serde(default)]
    pub icrm: String,

    /// Program or script started for each instance
    pub crm_launcher: String,

    /// Interpreter that runs `crm_launcher` (e.g. `python3`)
    #[serde(default)]
    pub interpreter: Option<String>,

    /// Per-capability override of the default address scheme
    #[serde(default)]
    pub address_scheme: Option<AddressScheme>,
}

/// Nested scenario declaration as written in the meta file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioDecl {
    pub name: String,

    #[serde(default)]
    pub crm: Option<String>,

    #[serde(default)]
    pub children: Vec<ScenarioDecl>,
}

/// Tree-level settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeConfiguration {
    /// Where the scene is persisted
    pub scene_path: PathBuf,

    /// Upper bound on simultaneously reserved ports
    pub max_ports: usize,

    /// Inclusive port range scanned by the allocator
    pub port_range: (u16, u16),
}

/// Parsed `meta` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeMeta {
    pub scenario: Option<ScenarioDecl>,

    #[serde(default)]
    pub crm_entries: Vec<CrmEntry>,

    pub configuration: TreeConfiguration,
}

#[derive(Debug, Deserialize)]
struct MetaFile {
    meta: TreeMeta,
}

impl TreeMeta {
    /// Parse meta YAML text
    pub fn from_yaml(text: &str) -> Result<Self> {
        let file: MetaFile = serde_yaml::from_str(text)
            .map_err(|e| TreegerError::ConfigError(format!("Invalid meta file: {}", e)))?;
        file.meta.validate()?;
        Ok(file.meta)
    }

    /// Read and parse a meta file
    pub async fn load(path: &Path) -> Result<Self> {
        let text = tokio::fs::read_to_string(path).await.map_err(|e| {
            TreegerError::ConfigError(format!("Failed to read meta file {:?}: {}", path, e))
        })?;
        Self::from_yaml(&text)
    }

    fn validate(&self) -> Result<()> {
        if self.configuration.max_ports == 0 {
            return Err(TreegerError::ConfigError(
                "max_ports must be at least 1".to_string(),
            ));
        }

        let (start, end) = self.configuration.port_range;
        if start == 0 {
            return Err(TreegerError::ConfigError(
                "Port range must not include port 0".to_string(),
            ));
        }
        if start > end {
            return Err(TreegerError::ConfigError(format!(
                "Port range start {} is greater than end {}",
                start, end
            )));
        }
        Ok(())
    }
}
