//! # Tracing Setup
//!
//! Installs the process-wide `tracing` subscriber: an ANSI console layer for
//! operators and a JSON file layer, rotated daily, for log shipping.

use std::io;
use std::path::Path;

use tracing::info;
use tracing_appender::{non_blocking, non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// # Setup Logging
///
/// # Arguments
/// * `log_dir` - Directory of the rotated JSON files, created if missing.
/// * `file_prefix` - File name prefix; the date is appended by the appender.
/// * `level` - Filter used when `RUST_LOG` is not set (e.g. "info" or
///   "lib_common=debug,info").
///
/// # Returns
/// The appender's `WorkerGuard`. Keep it alive for the lifetime of the process;
/// dropping it flushes and stops the file writer.
///
/// # Errors
/// Fails if the directory cannot be created, the filter does not parse, or a
/// global subscriber is already installed.
pub fn setup_logging(log_dir: &Path, file_prefix: &str, level: &str) -> io::Result<WorkerGuard> {
    // Create log directory if it doesn't exist
    std::fs::create_dir_all(log_dir)?;

    // Configure file appender for rotating log files daily
    let file_appender = rolling::daily(log_dir, file_prefix);
    let (non_blocking_appender, guard) = non_blocking(file_appender);

    // Create console layer for stdout
    let console_layer = fmt::layer().with_target(true).with_ansi(true);

    // Create JSON-formatted file layer
    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_writer(non_blocking_appender)
        .json();

    // RUST_LOG wins over the configured level
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(io::Error::other)?;

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(io::Error::other)?;

    info!(
        "Logging initialized with level: {} (files in {})",
        level,
        log_dir.display()
    );
    Ok(guard)
}
