//! Shared library for the anime API workspace.
//!
//! This crate provides common functionality used by every binary crate:
//! - Configuration management
//! - Logging infrastructure

pub mod config;
pub mod logging;

// Re-export commonly used types
pub use config::{ApiConfig, CacheConfig, Config};
pub use logging::LogConfig;

/// Common result type using anyhow::Error
pub type Result<T> = anyhow::Result<T>;
