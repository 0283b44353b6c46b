//! # Location Identifier Synchronization
//!
//! Keeps the `location_data` table equal to the set of valid location
//! identifiers published by an upstream HTTP service.
//!
//! ## Contained Modules:
//!
//! - **`model`**: `LocationIdentifier` and its validation rules.
//! - **`diff`**: Set difference between the upstream and the stored snapshot.
//! - **`fetch`**: The `FetchGateway` seam and its HTTP implementation.
//! - **`store`**: The `StoreGateway` seam and the shared batching loop.
//! - **`store_pg`** / **`store_memory`**: PostgreSQL and in-process backends.
//! - **`synchronizer`**: The per-tick orchestrator and its events.
//! - **`event_logger`**: Logging subscribers for those events.

#![forbid(unsafe_code)]

pub mod diff;
pub mod event_logger;
pub mod fetch;
pub mod model;
pub mod store;
pub mod store_memory;
pub mod store_pg;
pub mod synchronizer;

// --- Public API Re-exports ---
pub use diff::{diff, SyncPlan};
pub use event_logger::EventLogger;
pub use fetch::{FetchError, FetchGateway, HttpLocationFetcher, StaticFetcher};
pub use model::{IdentityTriple, LocationIdentifier, RawLocationRecord, ValidationError};
pub use store::{
    AppliedBatch, BatchWriter, NewRow, PersistedRow, PersistenceError, StoreGateway, BATCH_SIZE,
};
pub use store_memory::{MemoryLocationStore, StoreFaults};
pub use store_pg::{PgLocationStore, LOCATION_DATA_DDL};
pub use synchronizer::{
    register_events, SkipReason, SyncError, SyncEvent, SyncOptions, Synchronizer, TickPhase,
    TickReport, EVENT_FETCHED, EVENT_RECORD_REJECTED, EVENT_SYNCED, EVENT_TICK_FAILED,
    EVENT_TICK_SKIPPED, SYNC_EVENTS,
};
