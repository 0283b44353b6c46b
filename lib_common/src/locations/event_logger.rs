//! # Event Logger
//!
//! Bus subscribers that turn synchronizer events into log lines. Summaries go
//! out at `info`, one line per changed or rejected record at `debug`.

use tracing::{debug, error, info, warn};

use crate::core::events::{BusError, EventBus};

use super::synchronizer::{
    register_events, SyncEvent, EVENT_FETCHED, EVENT_RECORD_REJECTED, EVENT_SYNCED,
    EVENT_TICK_FAILED, EVENT_TICK_SKIPPED,
};

/// Attaches the logging handlers to a bus.
pub struct EventLogger;

impl EventLogger {
    /// Subscribes one logging handler to every synchronizer event, registering
    /// the events first if needed.
    pub fn attach(bus: &EventBus<SyncEvent>) -> Result<(), BusError> {
        register_events(bus);
        for name in [
            EVENT_FETCHED,
            EVENT_RECORD_REJECTED,
            EVENT_SYNCED,
            EVENT_TICK_SKIPPED,
            EVENT_TICK_FAILED,
        ] {
            bus.subscribe(name, move |event| {
                log_event(name, event);
                Ok(())
            })?;
        }
        Ok(())
    }
}

fn log_event(name: &str, event: &SyncEvent) {
    match event {
        SyncEvent::Fetched {
            received,
            accepted,
            rejected,
        } => info!(
            topic = name,
            "Fetched {} records ({} accepted, {} rejected)", received, accepted, rejected
        ),
        SyncEvent::RecordRejected { record, error } => debug!(
            topic = name,
            "Rejected lac={:?} cellid={:?} eci={:?}: {}",
            record.lac,
            record.cellid,
            record.eci,
            error
        ),
        SyncEvent::Synced { inserted, deleted } => {
            for identifier in inserted {
                debug!(topic = name, "INSERT {}", identifier);
            }
            for identifier in deleted {
                debug!(topic = name, "DELETE {}", identifier);
            }
            info!(
                topic = name,
                "Store in sync: {} inserted, {} deleted",
                inserted.len(),
                deleted.len()
            );
        }
        SyncEvent::TickSkipped { reason } => warn!(topic = name, "Tick skipped: {}", reason),
        SyncEvent::TickFailed { phase, error } => {
            error!(topic = name, "Tick failed while {}: {}", phase, error)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locations::synchronizer::{SkipReason, SYNC_EVENTS};

    #[test]
    fn attaches_to_every_event_on_a_fresh_bus() {
        let bus = EventBus::new();
        EventLogger::attach(&bus).unwrap();

        for name in SYNC_EVENTS {
            assert_eq!(bus.subscriber_count(name), 1, "{name}");
        }
        bus.publish(
            EVENT_TICK_SKIPPED,
            &SyncEvent::TickSkipped {
                reason: SkipReason::Busy,
            },
        )
        .unwrap();
    }
}
