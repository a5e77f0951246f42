// src/runtime/mock.rs
//! Mock launcher for testing
//!
//! Records launch specs instead of spawning processes and hands out handles
//! whose liveness tests can flip at will.

use crate::runtime::process_manager::{LaunchSpec, WorkerHandle, WorkerLauncher};
use crate::utils::errors::{Result, TreegerError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Handle to a pretend worker; clones share liveness
#[derive(Debug, Clone)]
pub struct MockHandle {
    alive: Arc<AtomicBool>,
    killed: Arc<AtomicBool>,
}

impl MockHandle {
    pub fn new() -> Self {
        Self {
            alive: Arc::new(AtomicBool::new(true)),
            killed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Simulate the worker exiting on its own
    pub fn exit(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    pub fn was_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }
}

impl Default for MockHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerHandle for MockHandle {
    fn pid(&self) -> Option<u32> {
        None
    }

    fn is_alive(&mut self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn kill(&mut self) -> Result<()> {
        self.killed.store(true, Ordering::SeqCst);
        self.alive.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct MockLauncherState {
    fail: bool,
    launched: Vec<LaunchSpec>,
    handles: HashMap<String, MockHandle>,
}

/// Mock launcher
#[derive(Debug, Default)]
pub struct MockLauncher {
    state: Mutex<MockLauncherState>,
}

impl MockLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Launcher whose every launch fails
    pub fn failing() -> Self {
        let launcher = Self::new();
        launcher.set_failing(true);
        launcher
    }

    pub fn set_failing(&self, fail: bool) {
        self.state.lock().fail = fail;
    }

    /// Every spec passed to `launch`, in order
    pub fn launched(&self) -> Vec<LaunchSpec> {
        self.state.lock().launched.clone()
    }

    pub fn launch_count(&self) -> usize {
        self.state.lock().launched.len()
    }

    /// Most recent handle handed out for `node_key`
    pub fn handle(&self, node_key: &str) -> Option<MockHandle> {
        self.state.lock().handles.get(node_key).cloned()
    }

    /// Make the worker of `node_key` exit; false if it was never launched
    pub fn exit_worker(&self, node_key: &str) -> bool {
        match self.state.lock().handles.get(node_key) {
            Some(handle) => {
                handle.exit();
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl WorkerLauncher for MockLauncher {
    fn launcher_type(&self) -> &'static str {
        "mock"
    }

    async fn launch(&self, spec: &LaunchSpec) -> Result<Box<dyn WorkerHandle>> {
        let mut state = self.state.lock();
        state.launched.push(spec.clone());

        if state.fail {
            return Err(TreegerError::ProcessSpawnFailed(format!(
                "mock launch of {} failed",
                spec.node_key
            )));
        }

        let handle = MockHandle::new();
        state.handles.insert(spec.node_key.clone(), handle.clone());
        Ok(Box::new(handle))
    }
}
