// src/utils/mod.rs
//! Shared configuration and error types

pub mod config;
pub mod errors;

pub use config::{ObservabilityConfig, RuntimeConfig, ServerConfig, TreegerConfig};
pub use errors::{Result, TreegerError};
