//! # Location Sync Server
//!
//! Long-running service that keeps the `location_data` table in line with the
//! upstream location identifier API.
//!
//! ## Startup:
//! 1.  Load the dotenv configuration (path from the command line, `.env` by default).
//! 2.  Install console + rotating JSON file logging.
//! 3.  Build the PostgreSQL pool and make sure the table exists.
//! 4.  Wire the HTTP fetcher, the store, the notification bus and its loggers
//!     into a `Synchronizer`.
//! 5.  Drive it from the cron scheduler until SIGINT or SIGTERM. A tick in
//!     flight at that moment is allowed to finish.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use lib_common::configs::SyncConfig;
use lib_common::connections::Database;
use lib_common::core::{EventBus, SyncScheduler};
use lib_common::locations::{
    EventLogger, HttpLocationFetcher, PgLocationStore, SyncOptions, Synchronizer,
};
use lib_common::loggers::setup_logging;

/// # Command-Line Arguments
#[derive(Parser, Debug)]
#[command(author, version, about = "Synchronizes location identifiers into PostgreSQL")]
struct Args {
    /// Path to the dotenv configuration file.
    #[arg(default_value = ".env")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = SyncConfig::load(&args.config)
        .with_context(|| format!("loading configuration from {}", args.config.display()))?;
    let _log_guard = setup_logging(&config.log_dir, "server_locsync", &config.log_level)
        .context("initializing logging")?;
    info!("{}", config);

    // --- Storage ---
    let database = Database::new(&config.postgres).context("creating the database pool")?;
    let store = PgLocationStore::new(database.pool());
    store
        .ensure_schema()
        .await
        .with_context(|| format!("preparing {}", config.postgres.redacted_url()))?;

    // --- Upstream ---
    // FETCH_TIMEOUT_SECS bounds the whole fetch, retries included
    let fetcher = HttpLocationFetcher::within_budget(
        config.endpoint_url.as_str(),
        &config.auth_login,
        &config.auth_password,
        config.fetch_timeout,
    )
    .context("creating the upstream client")?;

    // --- Notifications ---
    let bus = Arc::new(EventBus::new());
    EventLogger::attach(&bus).context("attaching event loggers")?;

    let synchronizer = Arc::new(Synchronizer::new(
        Arc::new(fetcher),
        Arc::new(store),
        bus,
        SyncOptions {
            fetch_timeout: config.fetch_timeout,
            persist_timeout: config.persist_timeout,
            allow_empty_snapshot: config.allow_empty_snapshot,
        },
    ));

    let scheduler = SyncScheduler::new(&config.schedule, synchronizer)
        .await
        .context("creating the scheduler")?;
    info!("Synchronizing on schedule '{}'", scheduler.expression());

    let token = CancellationToken::new();
    tokio::spawn(cancel_on_signal(token.clone()));

    scheduler.run_until(token).await.context("running the scheduler")?;

    info!("Shutdown complete.");
    Ok(())
}

/// Cancels `token` on Ctrl-C or SIGTERM.
async fn cancel_on_signal(token: CancellationToken) {
    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Ctrl-C received, initiating shutdown.");
        }
        _ = terminate() => {
            info!("SIGTERM received, initiating shutdown.");
        }
    }
    token.cancel();
}

#[cfg(unix)]
async fn terminate() {
    match signal::unix::signal(signal::unix::SignalKind::terminate()) {
        Ok(mut term_signal) => {
            term_signal.recv().await;
        }
        Err(e) => {
            warn!("Cannot listen for SIGTERM: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    // On non-unix platforms, just wait forever.
    std::future::pending::<()>().await;
}
