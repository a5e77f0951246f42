// src/runtime/mod.rs
//! Worker runtime
//!
//! This module provides the pieces the orchestrator drives workers with:
//!
//! - **Process Manager**: launch workers as detached process groups
//! - **Address Allocator**: bounded first-fit port reservation
//! - **Process Pool**: live workers indexed by node key and by template
//! - **Reuse**: KEEP / FORK / REPLACE resolution against live siblings
//! - **Mock**: in-memory launcher for tests
//!
//! # Architecture
//!
//! ```text
//!            activate(node_key)
//!                   │
//!          reuse::resolve(pool) ──► KEEP: sibling address
//!                   │
//!     AddressAllocator (tcp) / memory://<key>
//!                   │
//!         WorkerLauncher::launch
//!                   │
//!        ProcessPool::register(ProcessInfo)
//! ```

pub mod address_allocator;
pub mod mock;
pub mod process_manager;
pub mod process_pool;
pub mod reuse;

// Re-export commonly used types
pub use address_allocator::{AddressAllocator, AllocatorUsage};
pub use mock::{MockHandle, MockLauncher};
pub use process_manager::{LaunchSpec, ProcessHandle, ProcessManager, WorkerHandle, WorkerLauncher};
pub use process_pool::{PoolStats, ProcessInfo, ProcessPool};
pub use reuse::{ReuseAction, ReuseDecision};
