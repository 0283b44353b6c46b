//! # Cron Tick Scheduler
//!
//! Drives a recurring unit of work (a "tick") from a cron expression using
//! `tokio-cron-scheduler`, with two guarantees on top of the raw job scheduler:
//!
//! - **Single flight**: at most one tick runs at a time. A firing that arrives
//!   while the previous tick is still in flight is *skipped* (never queued), so
//!   a slow tick cannot build up a backlog. The skip is reported through
//!   `Tick::tick_skipped`.
//! - **Survivable failures**: a failed tick is logged and forgotten; the next
//!   firing is the retry.
//!
//! Shutdown is explicit. `shutdown` stops new firings and then waits for the
//! in-flight tick, if any, to finish. `run_until` ties that to a
//! `CancellationToken` so the caller decides when the process stops.

#![forbid(unsafe_code)]

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Fires at second zero of every minute.
pub const DEFAULT_SCHEDULE: &str = "* * * * *";

/// Errors raised while configuring or driving the scheduler. All of them are
/// startup-time problems; a running scheduler never returns one for a tick.
#[derive(Debug, Error)]
pub enum SchedulingError {
    #[error("invalid schedule '{expression}': {reason}")]
    InvalidSchedule { expression: String, reason: String },

    #[error("job scheduler failure: {0}")]
    Scheduler(String),
}

/// One unit of recurring work.
#[async_trait]
pub trait Tick: Send + Sync + 'static {
    /// Summary of a successful tick, logged by the scheduler.
    type Report: fmt::Debug + Send;
    /// Failure of a tick, logged by the scheduler.
    type Error: fmt::Display + Send;

    /// Runs the work once.
    async fn run_tick(&self) -> Result<Self::Report, Self::Error>;

    /// Called when a firing is dropped because the previous tick is still running.
    fn tick_skipped(&self) {}
}

/// What happened to a single firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireOutcome {
    Completed,
    Failed,
    Skipped,
}

/// # Tick Guard
///
/// Wraps a `Tick` with the single-flight lock. Every firing, whether it comes
/// from the cron job or from `SyncScheduler::trigger`, goes through `fire`.
pub struct TickGuard<T: Tick> {
    tick: Arc<T>,
    in_flight: Mutex<()>,
}

impl<T: Tick> TickGuard<T> {
    pub fn new(tick: Arc<T>) -> Self {
        Self {
            tick,
            in_flight: Mutex::new(()),
        }
    }

    /// Runs one tick unless another one is already in flight.
    pub async fn fire(&self) -> FireOutcome {
        let Ok(_permit) = self.in_flight.try_lock() else {
            warn!("Previous tick is still running. Skipping this firing.");
            self.tick.tick_skipped();
            return FireOutcome::Skipped;
        };

        match self.tick.run_tick().await {
            Ok(report) => {
                info!(?report, "Tick completed");
                FireOutcome::Completed
            }
            Err(e) => {
                error!("Tick failed: {}", e);
                FireOutcome::Failed
            }
        }
    }

    /// Resolves once no tick is in flight.
    pub async fn wait_idle(&self) {
        let _permit = self.in_flight.lock().await;
    }
}

/// # Sync Scheduler
///
/// Owns the cron job that fires a `Tick`. Build it with `new`, then either
/// `start` + `shutdown` manually or hand control to `run_until`.
pub struct SyncScheduler<T: Tick> {
    guard: Arc<TickGuard<T>>,
    scheduler: JobScheduler,
    expression: String,
}

impl<T: Tick> SyncScheduler<T> {
    /// Creates the scheduler and registers the cron job.
    ///
    /// # Arguments
    /// * `schedule` - A cron expression with 5 fields (minute first, the job fires
    ///   at second zero) or 6 fields (seconds first).
    /// * `tick` - The work to run on every firing.
    ///
    /// # Errors
    /// `SchedulingError::InvalidSchedule` if the expression cannot be parsed, and
    /// `SchedulingError::Scheduler` if the job scheduler cannot be created.
    pub async fn new(schedule: &str, tick: Arc<T>) -> Result<Self, SchedulingError> {
        let expression = normalize_cron(schedule)?;
        let guard = Arc::new(TickGuard::new(tick));

        let job_guard = Arc::clone(&guard);
        let job = Job::new_async_tz(expression.as_str(), Utc, move |_uuid, _lock| {
            let guard = Arc::clone(&job_guard);
            Box::pin(async move {
                guard.fire().await;
            })
        })
        .map_err(|e| SchedulingError::InvalidSchedule {
            expression: schedule.to_string(),
            reason: format!("{e:?}"),
        })?;

        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| SchedulingError::Scheduler(format!("{e:?}")))?;
        scheduler
            .add(job)
            .await
            .map_err(|e| SchedulingError::Scheduler(format!("{e:?}")))?;

        Ok(Self {
            guard,
            scheduler,
            expression,
        })
    }

    /// The normalized (6-field) cron expression in use.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Starts firing on schedule.
    pub async fn start(&self) -> Result<(), SchedulingError> {
        self.scheduler
            .start()
            .await
            .map_err(|e| SchedulingError::Scheduler(format!("{e:?}")))?;
        info!("Scheduler started with schedule '{}'", self.expression);
        Ok(())
    }

    /// Runs one tick immediately, under the same single-flight rule as the cron job.
    pub async fn trigger(&self) -> FireOutcome {
        self.guard.fire().await
    }

    /// Stops new firings, then waits for the in-flight tick to finish.
    pub async fn shutdown(&self) -> Result<(), SchedulingError> {
        let mut scheduler = self.scheduler.clone();
        scheduler
            .shutdown()
            .await
            .map_err(|e| SchedulingError::Scheduler(format!("{e:?}")))?;
        info!("Scheduler stopped. Waiting for the in-flight tick, if any.");
        self.guard.wait_idle().await;
        Ok(())
    }

    /// Starts the scheduler and keeps it running until `token` is cancelled.
    pub async fn run_until(&self, token: CancellationToken) -> Result<(), SchedulingError> {
        self.start().await?;
        token.cancelled().await;
        self.shutdown().await
    }
}

/// Validates the field count of a cron expression and returns its 6-field form.
pub fn normalize_cron(expression: &str) -> Result<String, SchedulingError> {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    match fields.len() {
        5 => Ok(format!("0 {}", fields.join(" "))),
        6 => Ok(fields.join(" ")),
        n => Err(SchedulingError::InvalidSchedule {
            expression: expression.to_string(),
            reason: format!("expected 5 or 6 fields, found {n}"),
        }),
    }
}
