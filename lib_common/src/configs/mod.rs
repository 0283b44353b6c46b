//! # Configuration Modules
//!
//! This module aggregates the configuration providers of the service.

/// Dotenv-file plus environment configuration of the synchronizer.
pub mod config_sync;

pub use config_sync::{ConfigError, PostgresConfig, SyncConfig};
