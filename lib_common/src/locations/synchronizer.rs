//! # Location Synchronizer
//!
//! The orchestrator of one reconciliation tick. It pulls the upstream snapshot
//! and the stored snapshot, validates, diffs, persists the difference in one
//! transaction and then tells the bus what happened.
//!
//! ## Tick Lifecycle:
//!
//! `Fetching -> Diffing -> Persisting -> Publishing -> Done`, with `Failed`
//! reachable from every step.
//!
//! 1.  **Fetching**: the fetch gateway and the store snapshot are read
//!     concurrently, both under the fetch timeout. Upstream records failing
//!     validation are dropped (and later published on `record_rejected`).
//!     Stored rows failing validation are left out of the baseline.
//! 2.  **Empty-snapshot guard**: an empty validated upstream set against a
//!     non-empty store skips the tick unless `allow_empty_snapshot` is set.
//! 3.  **Diffing**: `diff(actual, existing)`.
//! 4.  **Persisting**: the plan is applied by the store in one transaction,
//!     under the persist timeout. An empty plan never reaches the store.
//! 5.  **Publishing**: `record_rejected` per rejected record, then
//!     `fetch_location_data_api`, then `sync_db`.
//!
//! A failed tick is published on `tick_failed` and returned to the caller. The
//! store is only ever mutated by a committed apply, so every failure before
//! `Publishing` leaves it exactly as it was.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::core::events::{BusError, EventBus};
use crate::core::scheduler::Tick;

use super::diff::diff;
use super::fetch::{FetchError, FetchGateway};
use super::model::{LocationIdentifier, RawLocationRecord, ValidationError};
use super::store::{AppliedBatch, NewRow, PersistedRow, PersistenceError, StoreGateway};

/// Summary of a fetch: how many records came in and what validation made of them.
pub const EVENT_FETCHED: &str = "fetch_location_data_api";
/// One upstream record failed validation.
pub const EVENT_RECORD_REJECTED: &str = "record_rejected";
/// The store has been brought in line with upstream.
pub const EVENT_SYNCED: &str = "sync_db";
/// A tick did not run or stopped before touching the store on purpose.
pub const EVENT_TICK_SKIPPED: &str = "tick_skipped";
/// A tick failed.
pub const EVENT_TICK_FAILED: &str = "tick_failed";

/// Every event the synchronizer publishes.
pub const SYNC_EVENTS: [&str; 5] = [
    EVENT_FETCHED,
    EVENT_RECORD_REJECTED,
    EVENT_SYNCED,
    EVENT_TICK_SKIPPED,
    EVENT_TICK_FAILED,
];

/// Declares the synchronizer's events on `bus`.
pub fn register_events(bus: &EventBus<SyncEvent>) {
    for name in SYNC_EVENTS {
        bus.register(name);
    }
}

/// Step of a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickPhase {
    Fetching,
    Diffing,
    Persisting,
    Publishing,
    Done,
    Failed,
}

impl fmt::Display for TickPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TickPhase::Fetching => "fetching",
            TickPhase::Diffing => "diffing",
            TickPhase::Persisting => "persisting",
            TickPhase::Publishing => "publishing",
            TickPhase::Done => "done",
            TickPhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Why a tick did not reconcile anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The previous tick was still running when the schedule fired.
    Busy,
    /// Upstream returned no valid record while the store holds `stored` rows.
    EmptySnapshot { stored: usize },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Busy => write!(f, "previous tick still in flight"),
            SkipReason::EmptySnapshot { stored } => write!(
                f,
                "upstream snapshot is empty while the store holds {stored} rows"
            ),
        }
    }
}

/// Payload of every synchronizer event.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    Fetched {
        received: usize,
        accepted: usize,
        rejected: usize,
    },
    RecordRejected {
        record: RawLocationRecord,
        error: ValidationError,
    },
    Synced {
        inserted: Vec<LocationIdentifier>,
        deleted: Vec<LocationIdentifier>,
    },
    TickSkipped {
        reason: SkipReason,
    },
    TickFailed {
        phase: TickPhase,
        error: String,
    },
}

/// Tick-level failure, tagged with the step it happened in.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("fetching the upstream snapshot failed: {0}")]
    Fetch(#[source] FetchError),

    #[error("reading the stored snapshot failed: {0}")]
    StoreRead(#[source] PersistenceError),

    #[error("persisting the changes failed: {0}")]
    Persist(#[source] PersistenceError),

    #[error("{phase} step timed out after {after:?}")]
    Timeout { phase: TickPhase, after: Duration },

    #[error("publishing '{event}' failed: {source}")]
    Notification {
        event: &'static str,
        #[source]
        source: BusError,
    },
}

impl SyncError {
    /// The step the tick was in when it failed.
    pub fn phase(&self) -> TickPhase {
        match self {
            SyncError::Fetch(_) | SyncError::StoreRead(_) => TickPhase::Fetching,
            SyncError::Persist(_) => TickPhase::Persisting,
            SyncError::Timeout { phase, .. } => *phase,
            SyncError::Notification { .. } => TickPhase::Publishing,
        }
    }
}

/// What one tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub started_at: DateTime<Utc>,
    pub received: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub inserted: usize,
    pub deleted: usize,
    /// Set when the tick stopped before the store was touched on purpose.
    pub skipped: Option<SkipReason>,
}

/// Knobs of the synchronizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOptions {
    /// Bound on the concurrent fetch + snapshot read.
    pub fetch_timeout: Duration,
    /// Bound on the transactional apply.
    pub persist_timeout: Duration,
    /// Let an empty upstream snapshot wipe a non-empty store.
    pub allow_empty_snapshot: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(30),
            persist_timeout: Duration::from_secs(120),
            allow_empty_snapshot: false,
        }
    }
}

/// # Synchronizer
///
/// Holds the two gateways and the bus. Cheap to share behind an `Arc`; the
/// scheduler guarantees that `run_once` is never entered twice at a time.
pub struct Synchronizer {
    fetcher: Arc<dyn FetchGateway>,
    store: Arc<dyn StoreGateway>,
    bus: Arc<EventBus<SyncEvent>>,
    options: SyncOptions,
}

impl Synchronizer {
    /// Builds a synchronizer. The synchronizer's events are registered on `bus`
    /// if that has not happened yet.
    pub fn new(
        fetcher: Arc<dyn FetchGateway>,
        store: Arc<dyn StoreGateway>,
        bus: Arc<EventBus<SyncEvent>>,
        options: SyncOptions,
    ) -> Self {
        register_events(&bus);
        Self {
            fetcher,
            store,
            bus,
            options,
        }
    }

    pub fn bus(&self) -> &Arc<EventBus<SyncEvent>> {
        &self.bus
    }

    /// # Run Once
    ///
    /// Executes one full tick.
    ///
    /// # Returns
    /// A `TickReport`, which may describe a skipped tick.
    ///
    /// # Errors
    /// A `SyncError` naming the failed step. The failure has already been
    /// published on `tick_failed` when this returns.
    pub async fn run_once(&self) -> Result<TickReport, SyncError> {
        let started_at = Utc::now();
        match self.tick(started_at).await {
            Ok(report) => {
                debug!(phase = %TickPhase::Done, "Tick finished");
                Ok(report)
            }
            Err(err) => {
                let phase = err.phase();
                warn!(phase = %TickPhase::Failed, "Tick failed while {}: {}", phase, err);
                let event = SyncEvent::TickFailed {
                    phase,
                    error: err.to_string(),
                };
                if let Err(bus_err) = self.bus.publish(EVENT_TICK_FAILED, &event) {
                    warn!("Could not publish the tick failure: {}", bus_err);
                }
                Err(err)
            }
        }
    }

    async fn tick(&self, started_at: DateTime<Utc>) -> Result<TickReport, SyncError> {
        // --- Phase 1: Fetching ---
        debug!(phase = %TickPhase::Fetching, "Reading upstream and stored snapshots");
        let (raw, stored) = self.read_snapshots().await?;

        let received = raw.len();
        let mut actual = Vec::with_capacity(received);
        let mut rejected = Vec::new();
        for record in raw {
            match LocationIdentifier::try_from(record) {
                Ok(identifier) => actual.push(identifier),
                Err(error) => rejected.push((record, error)),
            }
        }
        let existing = baseline(&stored);

        let mut report = TickReport {
            started_at,
            received,
            accepted: actual.len(),
            rejected: rejected.len(),
            inserted: 0,
            deleted: 0,
            skipped: None,
        };

        if actual.is_empty() && !existing.is_empty() && !self.options.allow_empty_snapshot {
            let reason = SkipReason::EmptySnapshot {
                stored: existing.len(),
            };
            warn!("Skipping tick: {}", reason);
            self.publish_fetch(&report, rejected)?;
            self.publish(EVENT_TICK_SKIPPED, &SyncEvent::TickSkipped { reason })?;
            report.skipped = Some(reason);
            return Ok(report);
        }

        // --- Phase 2: Diffing ---
        let plan = diff(&actual, &existing);
        debug!(
            phase = %TickPhase::Diffing,
            "Plan: {} to insert, {} to delete",
            plan.to_insert.len(),
            plan.to_delete.len()
        );

        // --- Phase 3: Persisting ---
        let applied = if plan.is_empty() {
            AppliedBatch::default()
        } else {
            let inserts: Vec<NewRow> = plan
                .to_insert
                .iter()
                .map(LocationIdentifier::to_new_row)
                .collect();
            let deletes: Vec<i32> = plan
                .to_delete
                .iter()
                .filter_map(LocationIdentifier::id)
                .collect();
            self.persist(inserts, deletes).await?
        };
        report.inserted = applied.inserted.len();
        report.deleted = applied.deleted.len();

        // --- Phase 4: Publishing ---
        debug!(phase = %TickPhase::Publishing, "Publishing tick notifications");
        self.publish_fetch(&report, rejected)?;
        self.publish(
            EVENT_SYNCED,
            &SyncEvent::Synced {
                inserted: identifiers(&applied.inserted),
                deleted: identifiers(&applied.deleted),
            },
        )?;

        info!(
            "Sync completed: {} received, {} rejected, {} inserted, {} deleted",
            report.received, report.rejected, report.inserted, report.deleted
        );
        Ok(report)
    }

    async fn read_snapshots(
        &self,
    ) -> Result<(Vec<RawLocationRecord>, Vec<PersistedRow>), SyncError> {
        let after = self.options.fetch_timeout;
        let reads = async {
            tokio::try_join!(
                async { self.fetcher.fetch().await.map_err(SyncError::Fetch) },
                async { self.store.read_all().await.map_err(SyncError::StoreRead) },
            )
        };
        timeout(after, reads).await.map_err(|_| SyncError::Timeout {
            phase: TickPhase::Fetching,
            after,
        })?
    }

    async fn persist(
        &self,
        inserts: Vec<NewRow>,
        deletes: Vec<i32>,
    ) -> Result<AppliedBatch, SyncError> {
        let after = self.options.persist_timeout;
        // Dropping the apply future on timeout drops its transaction uncommitted.
        timeout(after, self.store.apply_batch(inserts, deletes))
            .await
            .map_err(|_| SyncError::Timeout {
                phase: TickPhase::Persisting,
                after,
            })?
            .map_err(SyncError::Persist)
    }

    fn publish_fetch(
        &self,
        report: &TickReport,
        rejected: Vec<(RawLocationRecord, ValidationError)>,
    ) -> Result<(), SyncError> {
        for (record, error) in rejected {
            self.publish(
                EVENT_RECORD_REJECTED,
                &SyncEvent::RecordRejected { record, error },
            )?;
        }
        self.publish(
            EVENT_FETCHED,
            &SyncEvent::Fetched {
                received: report.received,
                accepted: report.accepted,
                rejected: report.rejected,
            },
        )
    }

    fn publish(&self, event: &'static str, payload: &SyncEvent) -> Result<(), SyncError> {
        self.bus
            .publish(event, payload)
            .map_err(|source| SyncError::Notification { event, source })
    }
}

#[async_trait]
impl Tick for Synchronizer {
    type Report = TickReport;
    type Error = SyncError;

    async fn run_tick(&self) -> Result<TickReport, SyncError> {
        self.run_once().await
    }

    fn tick_skipped(&self) {
        let event = SyncEvent::TickSkipped {
            reason: SkipReason::Busy,
        };
        if let Err(e) = self.bus.publish(EVENT_TICK_SKIPPED, &event) {
            warn!("Could not publish the skipped tick: {}", e);
        }
    }
}

/// Stored rows as identifiers. Rows that fail validation stay in the table but
/// take no part in the diff.
fn baseline(stored: &[PersistedRow]) -> Vec<LocationIdentifier> {
    let mut existing = Vec::with_capacity(stored.len());
    for row in stored {
        match LocationIdentifier::try_from(row) {
            Ok(identifier) => existing.push(identifier),
            Err(e) => warn!("Ignoring stored row id={} that fails validation: {}", row.id, e),
        }
    }
    existing
}

fn identifiers(rows: &[PersistedRow]) -> Vec<LocationIdentifier> {
    rows.iter()
        .filter_map(|row| LocationIdentifier::try_from(row).ok())
        .collect()
}
