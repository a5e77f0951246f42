// src/treeger/orchestrator.rs
//! Scene/process orchestrator
//!
//! [`Treeger`] owns the scenario tree, the scene, the process pool and the
//! port allocator behind one coarse async lock. Every mutation (mount,
//! unmount, activation, deactivation, reaping, persistence) runs under that
//! lock; only `relay` drops it before talking to a worker.
//!
//! # Activation
//!
//! ```text
//! Mounted ──activate──► reuse check ──► address (port or memory://)
//!    ▲                                        │
//!    │                                   launch worker
//!    │                                        │
//!    └──deactivate / reap◄── Active ◄── register in pool
//! ```

use crate::observability::{
    ACTIVATIONS_TOTAL, ACTIVATION_FAILURES_TOTAL, DEACTIVATIONS_TOTAL, PORTS_ALLOCATED,
    REAPED_TOTAL, TEMPLATES_ACTIVE, WORKERS_ACTIVE,
};
use crate::runtime::reuse::{self, ReuseAction, ReuseDecision};
use crate::runtime::{
    AddressAllocator, LaunchSpec, ProcessInfo, ProcessPool, WorkerLauncher,
};
use crate::scenario::{ScenarioTree, TreeMeta};
use crate::scene::{node_name_of, LaunchParams, SceneStore, SceneTree};
use crate::transport::{Address, AddressScheme, Transport};
use crate::treeger::types::{
    NodeInfo, NodeStatus, PoolStatus, SceneNodeMeta, SceneNodeSummary, WorkerStatus,
};
use crate::utils::config::RuntimeConfig;
use crate::utils::errors::{Result, TreegerError};
use bytes::Bytes;
use chrono::Utc;
use metrics::{counter, gauge};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Interval between readiness pings
const READY_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Everything guarded by the coarse lock
struct TreegerState {
    scenarios: ScenarioTree,
    scene: SceneTree,
    pool: ProcessPool,
    allocator: AddressAllocator,
    store: SceneStore,
}

/// Orchestrator
pub struct Treeger {
    state: Mutex<TreegerState>,
    launcher: Arc<dyn WorkerLauncher>,
    transport: Arc<dyn Transport>,
    config: RuntimeConfig,
}

impl Treeger {
    /// Load the meta file and restore (or bootstrap) the scene
    pub async fn open(
        config: RuntimeConfig,
        launcher: Arc<dyn WorkerLauncher>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        let meta_path = config.resolve(&config.meta_path);
        let meta = TreeMeta::load(&meta_path).await?;
        let scenarios = ScenarioTree::load(&meta)?;

        let store = SceneStore::new(config.resolve(&meta.configuration.scene_path));
        let scene = match store.load().await? {
            Some(records) => {
                let scene = SceneTree::deserialize(&records, &scenarios)?;
                info!(nodes = scene.len(), path = ?store.path(), "Restored scene");
                scene
            }
            None => {
                let mut params = LaunchParams::new();
                params.insert("meta_path".to_string(), meta_path.display().to_string());
                info!(path = ?store.path(), "No persisted scene, starting fresh");
                SceneTree::with_root(&scenarios, params)
            }
        };

        info!(
            scenario_nodes = scenarios.len(),
            max_ports = meta.configuration.max_ports,
            port_range = ?meta.configuration.port_range,
            launcher = launcher.launcher_type(),
            "Treeger ready"
        );

        Ok(Self {
            state: Mutex::new(TreegerState {
                allocator: AddressAllocator::from_configuration(&meta.configuration),
                scenarios,
                scene,
                pool: ProcessPool::new(),
                store,
            }),
            launcher,
            transport,
            config,
        })
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Mount `node_key` as an instance of `scenario_name`
    ///
    /// Returns `false` only when `start_immediately` was requested and the
    /// activation failed; the node stays mounted in that case.
    pub async fn mount(
        &self,
        scenario_name: &str,
        node_key: &str,
        launch_params: Option<LaunchParams>,
        start_immediately: bool,
        reuse: ReuseAction,
    ) -> Result<bool> {
        let mut state = self.state.lock().await;
        let state = &mut *state;

        state
            .scene
            .mount(&state.scenarios, scenario_name, node_key, launch_params)?;

        if !start_immediately {
            return Ok(true);
        }

        let launchable = state
            .scenarios
            .find_by_name(scenario_name)
            .map_or(false, |node| node.is_launchable());
        if !launchable {
            debug!(node_key, "Node has no CRM, nothing to start");
            return Ok(true);
        }

        match self.activate_locked(state, node_key, reuse).await {
            Ok(address) => {
                info!(node_key, %address, "Mounted and activated");
                Ok(true)
            }
            Err(e) => {
                error!(node_key, error = %e, "Mounted but activation failed");
                Ok(false)
            }
        }
    }

    /// Remove a subtree, deactivating workers children-first
    pub async fn unmount(&self, node_key: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        let state = &mut *state;

        if node_key == state.scene.root_key() {
            return Err(TreegerError::MountError("The scene root cannot be unmounted".into()));
        }
        if !state.scene.contains(node_key) {
            debug!(node_key, "Unmount of unknown node");
            return Ok(false);
        }

        for key in state.scene.subtree_post_order(node_key) {
            if state.pool.contains(&key) {
                if let Err(e) = self.deactivate_locked(state, &key).await {
                    warn!(node_key = %key, error = %e, "Deactivation during unmount failed");
                }
            }
            state.scene.remove(&key);
        }

        info!(node_key, "Unmounted subtree");
        Ok(true)
    }

    /// Resolve `node_key` to a live address, launching a worker if needed
    pub async fn activate(&self, node_key: &str, reuse: ReuseAction) -> Result<String> {
        let mut state = self.state.lock().await;
        self.activate_locked(&mut state, node_key, reuse).await
    }

    async fn activate_locked(
        &self,
        state: &mut TreegerState,
        node_key: &str,
        reuse: ReuseAction,
    ) -> Result<String> {
        let node = state
            .scene
            .get(node_key)
            .ok_or_else(|| TreegerError::NodeNotFound(node_key.to_string()))?;
        let template = node.scenario_node_name.clone();
        let launch_params = node.launch_params.clone();

        let crm = state
            .scenarios
            .find_by_name(&template)
            .and_then(|scenario| scenario.crm.clone())
            .ok_or_else(|| {
                TreegerError::ActivationError(format!(
                    "Scenario node '{}' of '{}' has no CRM",
                    template, node_key
                ))
            })?;
        let entry = state.scenarios.crm_entry(&crm).cloned().ok_or_else(|| {
            TreegerError::ActivationError(format!("CRM entry '{}' not found", crm))
        })?;

        self.reap_locked(state);

        if let Some(info) = state.pool.get(node_key) {
            debug!(node_key, address = %info.address, "Already active");
            return Ok(info.address.clone());
        }

        match reuse::resolve(&state.pool, &template, reuse) {
            ReuseDecision::Keep { sibling, address } => {
                info!(node_key, %sibling, %address, "Reusing sibling worker");
                return Ok(address);
            }
            ReuseDecision::Replace { sibling } => {
                info!(node_key, %sibling, "Replacing sibling worker");
                if let Err(e) = self.deactivate_locked(state, &sibling).await {
                    warn!(%sibling, error = %e, "Sibling did not stop cleanly");
                }
            }
            ReuseDecision::Launch => {}
        }

        let scheme = entry.address_scheme.unwrap_or(self.config.address_scheme);
        let (address, port) = match scheme {
            AddressScheme::Tcp => match self.acquire_port(state, node_key).await {
                Ok(port) => (Address::tcp_loopback(port), Some(port)),
                Err(e) => {
                    counter!(ACTIVATION_FAILURES_TOTAL, "reason" => "allocation").increment(1);
                    return Err(e);
                }
            },
            AddressScheme::Memory => (Address::memory_for_node(node_key), None),
        };
        let address = address.to_string();

        let spec = LaunchSpec::for_worker(
            node_key,
            &entry,
            &address,
            &launch_params,
            &self.config.root_dir,
        );

        let mut handle = match self.launcher.launch(&spec).await {
            Ok(handle) => handle,
            Err(e) => {
                self.release_port(state, port, node_key);
                counter!(ACTIVATION_FAILURES_TOTAL, "reason" => "spawn").increment(1);
                error!(node_key, error = %e, "Worker launch failed");
                return Err(e);
            }
        };

        if let Some(timeout) = self.config.ready_timeout() {
            if !self.wait_ready(&address, timeout).await {
                if let Err(e) = handle.kill() {
                    warn!(node_key, error = %e, "Failed to kill unready worker");
                }
                self.release_port(state, port, node_key);
                counter!(ACTIVATION_FAILURES_TOTAL, "reason" => "not_ready").increment(1);
                return Err(TreegerError::ActivationError(format!(
                    "Worker for '{}' did not answer on {} within {:?}",
                    node_key, address, timeout
                )));
            }
        }

        state.pool.register(ProcessInfo {
            node_key: node_key.to_string(),
            address: address.clone(),
            port,
            started_at: Utc::now(),
            scenario_node_name: template,
            handle,
        });

        counter!(ACTIVATIONS_TOTAL).increment(1);
        record_gauges(state);
        info!(node_key, %address, pid = ?state.pool.get(node_key).and_then(|i| i.handle.pid()), "Worker activated");

        Ok(address)
    }

    /// Reserve a port, waiting while the allocator is at capacity
    async fn acquire_port(&self, state: &mut TreegerState, node_key: &str) -> Result<u16> {
        let timeout = self.config.acquire_timeout();
        let deadline = Instant::now() + timeout;

        while state.allocator.is_full() {
            let now = Instant::now();
            if now >= deadline {
                warn!(node_key, ?timeout, "No address slot freed in time");
                return Err(TreegerError::AllocationTimeout(timeout));
            }

            debug!(node_key, used = state.allocator.used(), "Address pool full, waiting");
            tokio::time::sleep(self.config.acquire_poll_interval().min(deadline - now)).await;
            self.reap_locked(state);
        }

        let port = state.allocator.allocate(node_key)?;
        gauge!(PORTS_ALLOCATED).set(state.allocator.used() as f64);
        Ok(port)
    }

    fn release_port(&self, state: &mut TreegerState, port: Option<u16>, node_key: &str) {
        if let Some(port) = port {
            state.allocator.release(port, node_key);
            gauge!(PORTS_ALLOCATED).set(state.allocator.used() as f64);
        }
    }

    async fn wait_ready(&self, address: &str, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            if self.transport.ping(address, deadline - now).await {
                return true;
            }
            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }
    }

    /// Drop a worker from the pool and free its port
    fn release_locked(&self, state: &mut TreegerState, node_key: &str) -> Option<ProcessInfo> {
        let info = state.pool.remove(node_key)?;
        self.release_port(state, info.port, node_key);
        record_gauges(state);
        Some(info)
    }

    /// Stop the worker of `node_key`; the scene entry stays
    ///
    /// Returns `false` when the node was not active. Bookkeeping is released
    /// even when the worker does not acknowledge the shutdown request.
    pub async fn deactivate(&self, node_key: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        self.deactivate_locked(&mut state, node_key).await
    }

    async fn deactivate_locked(&self, state: &mut TreegerState, node_key: &str) -> Result<bool> {
        let Some(mut info) = self.release_locked(state, node_key) else {
            return Ok(false);
        };

        counter!(DEACTIVATIONS_TOTAL).increment(1);
        let timeout = self.config.shutdown_timeout();

        if self.transport.shutdown(&info.address, timeout).await {
            info!(node_key, address = %info.address, "Worker deactivated");
            return Ok(true);
        }

        if let Err(e) = info.handle.kill() {
            warn!(node_key, error = %e, "Failed to kill worker after refused shutdown");
        }
        Err(TreegerError::DeactivationError(format!(
            "Worker for '{}' at {} did not acknowledge shutdown within {:?}",
            node_key, info.address, timeout
        )))
    }

    /// Release every worker whose process has exited; returns their keys
    pub async fn reap(&self) -> Vec<String> {
        let mut state = self.state.lock().await;
        self.reap_locked(&mut state)
    }

    fn reap_locked(&self, state: &mut TreegerState) -> Vec<String> {
        let dead = state.pool.dead_entries();
        for node_key in &dead {
            if let Some(info) = self.release_locked(state, node_key) {
                info!(%node_key, address = %info.address, "Reaped exited worker");
                counter!(REAPED_TOTAL).increment(1);
            }
        }
        dead
    }

    /// Keys of registered workers, as last reaped (no liveness poll)
    pub async fn active_nodes(&self) -> Vec<String> {
        self.state.lock().await.pool.keys()
    }

    pub async fn node_info(&self, node_key: &str) -> Option<NodeInfo> {
        let mut state = self.state.lock().await;
        let state = &mut *state;

        let node = state.scene.get(node_key)?;
        let mut info = NodeInfo {
            node_key: node.node_key.clone(),
            scenario_node_name: node.scenario_node_name.clone(),
            parent_key: node.parent.clone(),
            server_address: None,
        };

        let alive = state
            .pool
            .get_mut(node_key)
            .map(|entry| entry.handle.is_alive());
        match alive {
            Some(true) => {
                info.server_address = state.pool.get(node_key).map(|entry| entry.address.clone());
            }
            Some(false) => {
                info!(node_key, "Reaping exited worker on lookup");
                self.release_locked(state, node_key);
                counter!(REAPED_TOTAL).increment(1);
            }
            None => {}
        }

        Some(info)
    }

    /// Allocator usage plus one entry per live worker
    pub async fn pool_status(&self) -> PoolStatus {
        let mut state = self.state.lock().await;
        let state = &mut *state;

        self.reap_locked(state);

        let mut nodes = Vec::with_capacity(state.pool.len());
        for key in state.pool.keys() {
            if let Some(entry) = state.pool.get_mut(&key) {
                let status = if entry.handle.is_alive() {
                    WorkerStatus::Running
                } else {
                    WorkerStatus::Stopped
                };
                nodes.push(NodeStatus {
                    node_key: key,
                    status,
                    address: entry.address.clone(),
                    template: entry.scenario_node_name.clone(),
                    uptime_secs: entry.uptime_secs(),
                    pid: entry.handle.pid(),
                });
            }
        }

        PoolStatus {
            ports: state.allocator.usage(),
            active_nodes: nodes.len(),
            nodes,
        }
    }

    pub async fn scene_node_info(&self, node_key: &str) -> Option<SceneNodeMeta> {
        let state = self.state.lock().await;
        let node = state.scene.get(node_key)?;

        let degree = |template: &str| {
            state
                .scenarios
                .find_by_name(template)
                .map_or(0, |scenario| scenario.children.len())
        };

        let children = node
            .children
            .iter()
            .filter_map(|key| state.scene.get(key))
            .map(|child| SceneNodeSummary {
                node_key: child.node_key.clone(),
                node_name: node_name_of(&child.node_key).to_string(),
                node_degree: degree(&child.scenario_node_name),
            })
            .collect();

        Some(SceneNodeMeta {
            node_key: node.node_key.clone(),
            node_name: node_name_of(&node.node_key).to_string(),
            node_degree: degree(&node.scenario_node_name),
            children,
        })
    }

    /// Forward `payload` to the worker of `node_key` and return its reply
    pub async fn relay(&self, node_key: &str, payload: Bytes) -> Result<Bytes> {
        let address = {
            let mut state = self.state.lock().await;
            let alive = state
                .pool
                .get_mut(node_key)
                .map(|entry| entry.handle.is_alive());
            match alive {
                Some(true) => state.pool.get(node_key).map(|entry| entry.address.clone()),
                Some(false) => {
                    self.release_locked(&mut state, node_key);
                    None
                }
                None => None,
            }
        };

        let address = address.ok_or_else(|| {
            TreegerError::RelayError(format!("Node '{}' is not active", node_key))
        })?;

        debug!(node_key, %address, bytes = payload.len(), "Relaying call");
        self.transport
            .relay(&address, payload, self.config.relay_timeout())
            .await
    }

    /// Stop every worker, then persist the scene
    ///
    /// Worker failures are logged; only a failed save is an error.
    pub async fn shutdown(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        let state = &mut *state;

        let keys = state.pool.keys();
        info!(workers = keys.len(), "Shutting down Treeger");

        for key in keys {
            if let Err(e) = self.deactivate_locked(state, &key).await {
                warn!(node_key = %key, error = %e, "Worker did not stop cleanly");
            }
        }

        let records = state.scene.serialize();
        state.store.save(&records).await.map_err(|e| {
            error!(path = ?state.store.path(), error = %e, "Failed to persist scene");
            e
        })?;

        info!(nodes = records.len(), path = ?state.store.path(), "Scene persisted");
        Ok(())
    }
}

fn record_gauges(state: &TreegerState) {
    let stats = state.pool.stats();
    gauge!(WORKERS_ACTIVE).set(stats.active_workers as f64);
    gauge!(TEMPLATES_ACTIVE).set(stats.templates as f64);
    gauge!(PORTS_ALLOCATED).set(state.allocator.used() as f64);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::MockLauncher;
    use crate::scene::SceneRecord;
    use crate::transport::MockTransport;
    use std::collections::HashSet;
    use std::path::Path;
    use tempfile::TempDir;

    const META: &str = r#"
meta:
  configuration:
    scene_path: state/scene.yaml
    max_ports: MAX_PORTS
    port_range: [47600, 47660]
  crm_entries:
    - name: topo
      icrm: ITopo
      crm_launcher: topo.crm
    - name: features
      icrm: IFeatures
      crm_launcher: features.crm
      interpreter: python3
      address_scheme: tcp
  scenario:
    name: root
    children:
      - name: topo
        crm: topo
      - name: features
        crm: features
      - name: projects
        children:
          - name: project
            children:
              - name: patch
                crm: features
"#;

    struct Fixture {
        dir: TempDir,
        launcher: Arc<MockLauncher>,
        transport: Arc<MockTransport>,
        treeger: Treeger,
    }

    fn runtime_config(dir: &Path) -> RuntimeConfig {
        RuntimeConfig {
            meta_path: "meta.yaml".into(),
            root_dir: dir.to_path_buf(),
            socket_dir: dir.join("sockets"),
            acquire_timeout_secs: 1,
            acquire_poll_interval_ms: 50,
            ..Default::default()
        }
    }

    async fn fixture_with(max_ports: usize, transport: MockTransport) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("meta.yaml"),
            META.replace("MAX_PORTS", &max_ports.to_string()),
        )
        .unwrap();

        let launcher = Arc::new(MockLauncher::new());
        let transport = Arc::new(transport);
        let treeger = Treeger::open(runtime_config(dir.path()), launcher.clone(), transport.clone())
            .await
            .unwrap();

        Fixture {
            dir,
            launcher,
            transport,
            treeger,
        }
    }

    async fn fixture() -> Fixture {
        fixture_with(4, MockTransport::new()).await
    }

    fn params(pairs: &[(&str, &str)]) -> Option<LaunchParams> {
        Some(pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect())
    }

    async fn assert_consistent(treeger: &Treeger) {
        let state = treeger.state.lock().await;
        assert!(state.pool.is_consistent());
        assert!(state.allocator.used() <= state.allocator.usage().max_ports);
    }

    #[tokio::test]
    async fn test_fresh_scene_has_bootstrap_root() {
        let f = fixture().await;

        let root = f.treeger.node_info("root").await.unwrap();
        assert_eq!(root.scenario_node_name, "root");
        assert_eq!(root.parent_key, None);
        assert_eq!(root.server_address, None);

        let state = f.treeger.state.lock().await;
        let root = state.scene.get("root").unwrap();
        let meta_path = f.dir.path().join("meta.yaml").display().to_string();
        assert_eq!(root.launch_params.get("meta_path"), Some(&meta_path));
    }

    #[tokio::test]
    async fn test_mount_and_activate() {
        let f = fixture().await;

        assert!(f
            .treeger
            .mount("topo", "root/topo", params(&[("grid", "g.arrow")]), false, ReuseAction::Replace)
            .await
            .unwrap());
        assert_eq!(f.launcher.launch_count(), 0);

        let address = f.treeger.activate("root/topo", ReuseAction::Replace).await.unwrap();
        assert_eq!(address, "memory://root_topo");

        let launched = f.launcher.launched();
        let spec = &launched[0];
        assert_eq!(spec.program, "topo.crm");
        assert_eq!(
            spec.args,
            vec!["--server_address", "memory://root_topo", "--grid", "g.arrow"]
        );
        assert_eq!(spec.work_dir.as_deref(), Some(f.dir.path()));

        let status = f.treeger.pool_status().await;
        assert_eq!(status.active_nodes, 1);
        assert_eq!(status.nodes[0].template, "topo");
        assert_eq!(status.nodes[0].status, WorkerStatus::Running);
        assert_eq!(status.ports.used_ports, 0);

        let info = f.treeger.node_info("root/topo").await.unwrap();
        assert_eq!(info.server_address.as_deref(), Some("memory://root_topo"));
        assert_eq!(info.parent_key.as_deref(), Some("root"));
    }

    #[tokio::test]
    async fn test_tcp_activation_reserves_port() {
        let f = fixture().await;
        f.treeger
            .mount("features", "root/features", None, false, ReuseAction::Replace)
            .await
            .unwrap();

        let address = f.treeger.activate("root/features", ReuseAction::Replace).await.unwrap();
        assert!(address.starts_with("tcp://127.0.0.1:"));

        let launched = f.launcher.launched();
        let spec = &launched[0];
        assert_eq!(spec.program, "python3");
        assert_eq!(spec.args[0], "features.crm");

        let status = f.treeger.pool_status().await;
        assert_eq!(status.ports.used_ports, 1);
        assert_eq!(status.ports.available_slots, 3);

        assert!(f.treeger.deactivate("root/features").await.unwrap());
        assert_eq!(f.transport.shutdowns(), vec![address]);
        assert_eq!(f.treeger.pool_status().await.ports.used_ports, 0);
    }

    #[tokio::test]
    async fn test_mount_and_deactivate_are_idempotent() {
        let f = fixture().await;
        for _ in 0..2 {
            assert!(f
                .treeger
                .mount("topo", "root/topo", None, false, ReuseAction::Replace)
                .await
                .unwrap());
        }
        assert_eq!(f.treeger.state.lock().await.scene.len(), 2);

        assert!(!f.treeger.deactivate("root/topo").await.unwrap());
        assert!(!f.treeger.deactivate("root/topo").await.unwrap());
        assert!(f.transport.shutdowns().is_empty());
    }

    #[tokio::test]
    async fn test_mount_errors_leave_scene_unchanged() {
        let f = fixture().await;

        let unknown = f
            .treeger
            .mount("nope", "root/nope", None, false, ReuseAction::Replace)
            .await;
        assert!(matches!(unknown, Err(TreegerError::MountError(_))));

        let orphan = f
            .treeger
            .mount("project", "root/projects/p1", None, false, ReuseAction::Replace)
            .await;
        assert!(matches!(orphan, Err(TreegerError::MountError(_))));

        assert_eq!(f.treeger.state.lock().await.scene.len(), 1);
    }

    #[tokio::test]
    async fn test_activate_errors() {
        let f = fixture().await;
        f.treeger
            .mount("projects", "root/projects", None, false, ReuseAction::Replace)
            .await
            .unwrap();

        assert!(matches!(
            f.treeger.activate("root/missing", ReuseAction::Replace).await,
            Err(TreegerError::NodeNotFound(_))
        ));
        assert!(matches!(
            f.treeger.activate("root/projects", ReuseAction::Replace).await,
            Err(TreegerError::ActivationError(_))
        ));
        assert_eq!(f.launcher.launch_count(), 0);
    }

    #[tokio::test]
    async fn test_activate_twice_returns_same_address() {
        let f = fixture().await;
        f.treeger
            .mount("topo", "root/topo", None, false, ReuseAction::Replace)
            .await
            .unwrap();

        let first = f.treeger.activate("root/topo", ReuseAction::Replace).await.unwrap();
        let second = f.treeger.activate("root/topo", ReuseAction::Replace).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(f.launcher.launch_count(), 1);
        assert!(f.transport.shutdowns().is_empty());
    }

    async fn two_topos(f: &Fixture) -> String {
        for key in ["root/topo", "root/topo2"] {
            f.treeger
                .mount("topo", key, None, false, ReuseAction::Replace)
                .await
                .unwrap();
        }
        f.treeger.activate("root/topo", ReuseAction::Replace).await.unwrap()
    }

    #[tokio::test]
    async fn test_keep_shares_sibling() {
        let f = fixture().await;
        let first = two_topos(&f).await;

        let address = f.treeger.activate("root/topo2", ReuseAction::Keep).await.unwrap();
        assert_eq!(address, first);
        assert_eq!(f.treeger.active_nodes().await, vec!["root/topo"]);
        assert_eq!(f.launcher.launch_count(), 1);
        assert_consistent(&f.treeger).await;
    }

    #[tokio::test]
    async fn test_replace_stops_sibling() {
        let f = fixture().await;
        let first = two_topos(&f).await;

        let address = f.treeger.activate("root/topo2", ReuseAction::Replace).await.unwrap();
        assert_eq!(address, "memory://root_topo2");
        assert_eq!(f.treeger.active_nodes().await, vec!["root/topo2"]);
        assert_eq!(f.transport.shutdowns(), vec![first]);
        assert_consistent(&f.treeger).await;
    }

    #[tokio::test]
    async fn test_fork_runs_alongside() {
        let f = fixture().await;
        two_topos(&f).await;

        f.treeger.activate("root/topo2", ReuseAction::Fork).await.unwrap();
        assert_eq!(f.treeger.active_nodes().await, vec!["root/topo", "root/topo2"]);
        assert_eq!(f.launcher.launch_count(), 2);
        assert_consistent(&f.treeger).await;
    }

    #[tokio::test]
    async fn test_memory_addresses_do_not_collide() {
        let f = fixture().await;
        f.treeger
            .mount("projects", "root/a", None, false, ReuseAction::Replace)
            .await
            .unwrap();
        for key in ["root/a/topo", "root/a_topo"] {
            f.treeger
                .mount("topo", key, None, false, ReuseAction::Replace)
                .await
                .unwrap();
        }

        let nested = f.treeger.activate("root/a/topo", ReuseAction::Fork).await.unwrap();
        let flat = f.treeger.activate("root/a_topo", ReuseAction::Fork).await.unwrap();
        assert_eq!(nested, "memory://root_a_topo");
        assert_eq!(flat, "memory://root_a%5Ftopo");
        assert_eq!(f.treeger.active_nodes().await, vec!["root/a/topo", "root/a_topo"]);
    }

    #[tokio::test]
    async fn test_single_port_times_out() {
        let f = fixture_with(1, MockTransport::new()).await;
        for key in ["root/f1", "root/f2"] {
            f.treeger
                .mount("features", key, None, false, ReuseAction::Fork)
                .await
                .unwrap();
        }
        f.treeger.activate("root/f1", ReuseAction::Fork).await.unwrap();

        let started = std::time::Instant::now();
        let err = f.treeger.activate("root/f2", ReuseAction::Fork).await.unwrap_err();
        assert!(err.is_allocation_failure());
        assert!(started.elapsed() < Duration::from_secs(5));

        assert_eq!(f.treeger.active_nodes().await, vec!["root/f1"]);
        assert_eq!(f.launcher.launch_count(), 1);
        assert_consistent(&f.treeger).await;
    }

    #[tokio::test]
    async fn test_capacity_wait_picks_up_exited_worker() {
        let f = fixture_with(1, MockTransport::new()).await;
        for key in ["root/f1", "root/f2"] {
            f.treeger
                .mount("features", key, None, false, ReuseAction::Fork)
                .await
                .unwrap();
        }
        f.treeger.activate("root/f1", ReuseAction::Fork).await.unwrap();
        f.launcher.exit_worker("root/f1");

        f.treeger.activate("root/f2", ReuseAction::Fork).await.unwrap();
        assert_eq!(f.treeger.active_nodes().await, vec!["root/f2"]);
    }

    #[tokio::test]
    async fn test_status_reaps_dead_worker() {
        let f = fixture().await;
        f.treeger
            .mount("features", "root/features", None, false, ReuseAction::Replace)
            .await
            .unwrap();
        f.treeger.activate("root/features", ReuseAction::Replace).await.unwrap();
        f.launcher.exit_worker("root/features");

        let status = f.treeger.pool_status().await;
        assert!(status.nodes.is_empty());
        assert_eq!(status.ports.used_ports, 0);
        assert!(f.transport.shutdowns().is_empty());

        f.treeger.activate("root/features", ReuseAction::Replace).await.unwrap();
        assert_eq!(f.treeger.pool_status().await.ports.used_ports, 1);
    }

    #[tokio::test]
    async fn test_node_info_reaps_dead_worker() {
        let f = fixture().await;
        f.treeger
            .mount("topo", "root/topo", None, true, ReuseAction::Replace)
            .await
            .unwrap();
        f.launcher.exit_worker("root/topo");

        let info = f.treeger.node_info("root/topo").await.unwrap();
        assert_eq!(info.server_address, None);
        assert!(f.treeger.active_nodes().await.is_empty());
    }

    #[tokio::test]
    async fn test_unmount_deactivates_children_first() {
        let f = fixture().await;
        f.treeger
            .mount("projects", "root/projects", None, false, ReuseAction::Fork)
            .await
            .unwrap();
        f.treeger
            .mount("project", "root/projects/p1", None, false, ReuseAction::Fork)
            .await
            .unwrap();
        for key in ["root/projects/p1/a", "root/projects/p1/b"] {
            assert!(f
                .treeger
                .mount("patch", key, params(&[("level", "1")]), true, ReuseAction::Fork)
                .await
                .unwrap());
        }
        assert_eq!(f.treeger.pool_status().await.ports.used_ports, 2);

        assert!(f.treeger.unmount("root/projects").await.unwrap());

        assert_eq!(f.transport.shutdowns().len(), 2);
        let status = f.treeger.pool_status().await;
        assert_eq!(status.ports.used_ports, 0);
        assert!(status.nodes.is_empty());

        for key in ["root/projects", "root/projects/p1", "root/projects/p1/a"] {
            assert!(f.treeger.node_info(key).await.is_none());
        }
        assert!(f.treeger.scene_node_info("root").await.unwrap().children.is_empty());
    }

    #[tokio::test]
    async fn test_unmount_root_and_missing() {
        let f = fixture().await;
        assert!(matches!(
            f.treeger.unmount("root").await,
            Err(TreegerError::MountError(_))
        ));
        assert!(!f.treeger.unmount("root/nothing").await.unwrap());
    }

    #[tokio::test]
    async fn test_spawn_failure_leaves_no_state() {
        let f = fixture().await;
        f.treeger
            .mount("features", "root/features", None, false, ReuseAction::Replace)
            .await
            .unwrap();
        f.launcher.set_failing(true);

        assert!(matches!(
            f.treeger.activate("root/features", ReuseAction::Replace).await,
            Err(TreegerError::ProcessSpawnFailed(_))
        ));

        let status = f.treeger.pool_status().await;
        assert_eq!(status.ports.used_ports, 0);
        assert!(status.nodes.is_empty());
    }

    #[tokio::test]
    async fn test_start_immediately_failure_keeps_mount() {
        let f = fixture().await;
        f.launcher.set_failing(true);

        assert!(!f
            .treeger
            .mount("topo", "root/topo", None, true, ReuseAction::Replace)
            .await
            .unwrap());
        assert!(f.treeger.node_info("root/topo").await.is_some());
        assert!(f.treeger.active_nodes().await.is_empty());
    }

    #[tokio::test]
    async fn test_refused_shutdown_still_releases() {
        let f = fixture_with(4, MockTransport::unresponsive()).await;
        f.treeger
            .mount("features", "root/features", None, true, ReuseAction::Replace)
            .await
            .unwrap();

        assert!(matches!(
            f.treeger.deactivate("root/features").await,
            Err(TreegerError::DeactivationError(_))
        ));
        assert!(f.launcher.handle("root/features").unwrap().was_killed());

        let status = f.treeger.pool_status().await;
        assert!(status.nodes.is_empty());
        assert_eq!(status.ports.used_ports, 0);
    }

    #[tokio::test]
    async fn test_unready_worker_is_killed() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("meta.yaml"), META.replace("MAX_PORTS", "4")).unwrap();

        let launcher = Arc::new(MockLauncher::new());
        let transport = Arc::new(MockTransport::new());
        transport.set_unreachable("memory://root_topo");

        let config = RuntimeConfig {
            ready_timeout_secs: 1,
            ..runtime_config(dir.path())
        };
        let treeger = Treeger::open(config, launcher.clone(), transport.clone())
            .await
            .unwrap();
        treeger
            .mount("topo", "root/topo", None, false, ReuseAction::Replace)
            .await
            .unwrap();

        assert!(matches!(
            treeger.activate("root/topo", ReuseAction::Replace).await,
            Err(TreegerError::ActivationError(_))
        ));
        assert!(launcher.handle("root/topo").unwrap().was_killed());
        assert!(treeger.active_nodes().await.is_empty());
        assert!(!transport.pings().is_empty());
    }

    #[tokio::test]
    async fn test_relay() {
        let f = fixture().await;
        f.treeger
            .mount("topo", "root/topo", None, true, ReuseAction::Replace)
            .await
            .unwrap();

        let reply = f
            .treeger
            .relay("root/topo", Bytes::from_static(b"\x01\x02call"))
            .await
            .unwrap();
        assert_eq!(&reply[..], b"\x01\x02call");
        assert_eq!(f.transport.relays()[0].0, "memory://root_topo");

        assert!(matches!(
            f.treeger.relay("root", Bytes::new()).await,
            Err(TreegerError::RelayError(_))
        ));
    }

    #[tokio::test]
    async fn test_scene_node_info() {
        let f = fixture().await;
        f.treeger
            .mount("projects", "root/projects", None, false, ReuseAction::Replace)
            .await
            .unwrap();
        f.treeger
            .mount("topo", "root/topo", None, false, ReuseAction::Replace)
            .await
            .unwrap();

        let root = f.treeger.scene_node_info("root").await.unwrap();
        assert_eq!(root.node_name, "root");
        assert_eq!(root.node_degree, 3);
        assert_eq!(root.children.len(), 2);

        let projects = root
            .children
            .iter()
            .find(|child| child.node_key == "root/projects")
            .unwrap();
        assert_eq!(projects.node_name, "projects");
        assert_eq!(projects.node_degree, 1);

        assert!(f.treeger.scene_node_info("root/none").await.is_none());
    }

    #[tokio::test]
    async fn test_shutdown_persists_and_restores() {
        let f = fixture().await;
        f.treeger
            .mount("projects", "root/projects", None, false, ReuseAction::Replace)
            .await
            .unwrap();
        f.treeger
            .mount("project", "root/projects/p1", None, false, ReuseAction::Replace)
            .await
            .unwrap();
        f.treeger
            .mount("patch", "root/projects/p1/a", params(&[("grid", "a.arrow")]), true, ReuseAction::Fork)
            .await
            .unwrap();
        f.treeger
            .mount("topo", "root/topo", None, true, ReuseAction::Replace)
            .await
            .unwrap();

        let before: HashSet<SceneRecordKey> =
            record_keys(&f.treeger.state.lock().await.scene.serialize());

        f.treeger.shutdown().await.unwrap();
        assert_eq!(f.transport.shutdowns().len(), 2);
        assert!(f.dir.path().join("state/scene.yaml").exists());

        let reopened = Treeger::open(
            runtime_config(f.dir.path()),
            f.launcher.clone(),
            f.transport.clone(),
        )
        .await
        .unwrap();

        let after = record_keys(&reopened.state.lock().await.scene.serialize());
        assert_eq!(before, after);
        assert!(reopened.active_nodes().await.is_empty());

        let patch = reopened.node_info("root/projects/p1/a").await.unwrap();
        assert_eq!(patch.parent_key.as_deref(), Some("root/projects/p1"));
    }

    #[tokio::test]
    async fn test_shutdown_survives_workers_that_refuse_to_stop() {
        let f = fixture_with(4, MockTransport::unresponsive()).await;
        for (scenario, key) in [("features", "root/features"), ("topo", "root/topo")] {
            assert!(f
                .treeger
                .mount(scenario, key, None, true, ReuseAction::Replace)
                .await
                .unwrap());
        }
        assert_eq!(f.treeger.active_nodes().await.len(), 2);

        f.treeger.shutdown().await.unwrap();

        assert!(f.treeger.active_nodes().await.is_empty());
        let status = f.treeger.pool_status().await;
        assert!(status.nodes.is_empty());
        assert_eq!(status.ports.used_ports, 0);
        for key in ["root/features", "root/topo"] {
            assert!(f.launcher.handle(key).unwrap().was_killed());
        }

        let saved = SceneStore::new(f.dir.path().join("state/scene.yaml"))
            .load()
            .await
            .unwrap()
            .unwrap();
        let keys: HashSet<String> = saved.into_iter().map(|r| r.node_key).collect();
        assert_eq!(
            keys,
            HashSet::from(["root".to_string(), "root/features".to_string(), "root/topo".to_string()])
        );
    }

    type SceneRecordKey = (String, String, Vec<(String, String)>, Option<String>);

    fn record_keys(records: &[SceneRecord]) -> HashSet<SceneRecordKey> {
        records
            .iter()
            .map(|r| {
                (
                    r.node_key.clone(),
                    r.scenario_node_name.clone(),
                    r.launch_params.clone().into_iter().collect(),
                    r.parent_key.clone(),
                )
            })
            .collect()
    }
}
