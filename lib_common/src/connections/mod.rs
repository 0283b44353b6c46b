//! # Connections Module
//!
//! This module handles persistent connections to external services,
//! currently the PostgreSQL database holding the location table.

/// Module for PostgreSQL database connection pooling and management.
pub mod db_postgres;

pub use db_postgres::{Database, DbError};
