//! # Core Engine Module
//!
//! Generic building blocks the synchronizer is assembled from. Nothing in here
//! knows about location identifiers.
//!
//! ## Core Components:
//!
//! - **`events`**: The notification bus. Components publish named events and
//!   subscribers (loggers, auditors) react without the publisher knowing them.
//!
//! - **`scheduler`**: The cron driver. It fires a `Tick` on schedule, enforces
//!   that at most one tick is in flight, and supports a graceful shutdown that
//!   lets the running tick finish.

#![forbid(unsafe_code)]

/// Synchronous publish/subscribe registry.
pub mod events;
/// Cron-driven, single-flight tick scheduler.
pub mod scheduler;

// --- Public API Re-exports ---
pub use events::{BusError, EventBus, Handler};
pub use scheduler::{FireOutcome, SchedulingError, SyncScheduler, Tick, TickGuard, DEFAULT_SCHEDULE};
