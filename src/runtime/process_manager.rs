// src/runtime/process_manager.rs
//! Worker process launching
//!
//! A worker is started from its CRM entry as
//! `[interpreter] <crm_launcher> --server_address <address> [--key value ...]`
//! in its own process group, so signals aimed at the orchestrator do not
//! reach workers unless relayed explicitly.

use crate::scenario::CrmEntry;
use crate::scene::LaunchParams;
use crate::utils::errors::{Result, TreegerError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// Fully assembled worker command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    /// Scene node the worker serves
    pub node_key: String,

    /// Program name or path; bare names are looked up on `PATH`
    pub program: String,

    pub args: Vec<String>,

    /// Working directory (also the base for relative program paths)
    pub work_dir: Option<PathBuf>,
}

impl LaunchSpec {
    pub fn for_worker(
        node_key: &str,
        entry: &CrmEntry,
        address: &str,
        params: &LaunchParams,
        root_dir: &Path,
    ) -> Self {
        let mut args = Vec::with_capacity(3 + params.len() * 2);

        let program = match &entry.interpreter {
            Some(interpreter) => {
                args.push(entry.crm_launcher.clone());
                interpreter.clone()
            }
            None => entry.crm_launcher.clone(),
        };

        args.push("--server_address".to_string());
        args.push(address.to_string());
        for (key, value) in params {
            args.push(format!("--{}", key));
            args.push(value.clone());
        }

        Self {
            node_key: node_key.to_string(),
            program,
            args,
            work_dir: Some(root_dir.to_path_buf()),
        }
    }
}

/// Owning handle to a launched worker
pub trait WorkerHandle: Send + fmt::Debug {
    fn pid(&self) -> Option<u32>;

    /// Non-blocking liveness poll
    fn is_alive(&mut self) -> bool;

    /// Force-stop the worker (and its process group, where supported)
    fn kill(&mut self) -> Result<()>;
}

/// Capability that turns a launch spec into a running, addressable worker
#[async_trait]
pub trait WorkerLauncher: Send + Sync {
    /// Launcher identifier (e.g. "process", "mock")
    fn launcher_type(&self) -> &'static str;

    async fn launch(&self, spec: &LaunchSpec) -> Result<Box<dyn WorkerHandle>>;
}

/// Launches workers as detached OS processes
pub struct ProcessManager {
    /// Paths to executables (cached)
    executable_paths: Mutex<HashMap<String, PathBuf>>,
}

impl ProcessManager {
    pub fn new() -> Self {
        Self {
            executable_paths: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve a program to an executable path
    fn find_executable(&self, program: &str, work_dir: Option<&Path>) -> Result<PathBuf> {
        let path = Path::new(program);
        if path.components().count() > 1 || path.is_absolute() {
            return Ok(match work_dir {
                Some(dir) if path.is_relative() => dir.join(path),
                _ => path.to_path_buf(),
            });
        }

        if let Some(path) = self.executable_paths.lock().get(program) {
            return Ok(path.clone());
        }

        match which::which(program) {
            Ok(path) => {
                info!("Found {} at {:?}", program, path);
                self.executable_paths
                    .lock()
                    .insert(program.to_string(), path.clone());
                Ok(path)
            }
            Err(e) => Err(TreegerError::ProcessSpawnFailed(format!(
                "Executable '{}' not found in PATH: {}",
                program, e
            ))),
        }
    }
}

impl Default for ProcessManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkerLauncher for ProcessManager {
    fn launcher_type(&self) -> &'static str {
        "process"
    }

    async fn launch(&self, spec: &LaunchSpec) -> Result<Box<dyn WorkerHandle>> {
        let executable = self.find_executable(&spec.program, spec.work_dir.as_deref())?;

        debug!(node_key = %spec.node_key, ?executable, args = ?spec.args, "Spawning worker");

        let mut command = Command::new(&executable);
        command.args(&spec.args);

        if let Some(work_dir) = &spec.work_dir {
            command.current_dir(work_dir);
        }

        // Own process group: orchestrator signals must not cascade.
        #[cfg(unix)]
        command.process_group(0);

        command
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(false);

        let child = command.spawn().map_err(|e| {
            TreegerError::ProcessSpawnFailed(format!("Failed to spawn {:?}: {}", executable, e))
        })?;

        let pid = child.id();
        debug!(node_key = %spec.node_key, ?pid, "Worker spawned");

        Ok(Box::new(ProcessHandle { child, pid }))
    }
}

/// Handle to a worker OS process
#[derive(Debug)]
pub struct ProcessHandle {
    child: Child,
    pid: Option<u32>,
}

impl WorkerHandle for ProcessHandle {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn is_alive(&mut self) -> bool {
        match self.child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                debug!(pid = ?self.pid, %status, "Worker exited");
                false
            }
            Err(e) => {
                warn!(pid = ?self.pid, error = %e, "Failed to poll worker");
                false
            }
        }
    }

    fn kill(&mut self) -> Result<()> {
        // Once reaped, the pid may already belong to another process group.
        if let Ok(Some(status)) = self.child.try_wait() {
            debug!(pid = ?self.pid, %status, "Worker already exited, nothing to kill");
            return Ok(());
        }

        #[cfg(unix)]
        if let Some(pid) = self.pid {
            use nix::errno::Errno;
            use nix::sys::signal::{killpg, Signal};
            use nix::unistd::Pid;

            debug!("Sending SIGKILL to process group {}", pid);
            return match killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
                Ok(()) | Err(Errno::ESRCH) => Ok(()),
                Err(e) => Err(TreegerError::ProcessSpawnFailed(format!(
                    "Failed to send SIGKILL: {}",
                    e
                ))),
            };
        }

        self.child.start_kill().map_err(TreegerError::from)
    }
}
