//! # Notification Bus
//!
//! A small, synchronous publish/subscribe registry used to keep side effects
//! (logging, auditing, metrics) out of the reconciliation path. Business code
//! calls `publish` right after the operation it describes has succeeded; the
//! bus hands the payload to every subscriber of that event, in the order the
//! subscribers were attached.
//!
//! ## Core Design Principles:
//!
//! 1.  **Explicit Instance**: There is no process-global registry. One `EventBus`
//!     is built at startup, wrapped in an `Arc`, and passed to every component
//!     that publishes or subscribes.
//!
//! 2.  **Declared Events**: An event name must be `register`ed before anyone can
//!     subscribe to it or publish it. A typo in an event name therefore surfaces
//!     as `BusError::UnknownEvent` instead of silently dropping notifications.
//!
//! 3.  **Synchronous Delivery**: `publish` runs the handlers inline. A failing
//!     handler stops delivery to the handlers after it and its error is returned
//!     to the publisher. Anything the publisher already committed stays committed.
//!
//! 4.  **Read-Mostly Registry**: Registration and subscription happen during
//!     startup. The handler list is cloned out of the lock before delivery, so a
//!     handler may safely touch the bus itself.

#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use thiserror::Error;

/// The callable stored for each subscriber.
pub type Handler<P> = Arc<dyn Fn(&P) -> anyhow::Result<()> + Send + Sync>;

/// Errors raised by the notification bus.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("event '{0}' is not registered")]
    UnknownEvent(String),

    #[error("handler #{index} for event '{event}' failed: {source}")]
    Handler {
        event: String,
        index: usize,
        #[source]
        source: anyhow::Error,
    },
}

/// # Event Bus
///
/// Maps an event name to the ordered list of its subscribers. The payload type
/// `P` is shared by every event published on one bus; callers typically use an
/// enum with one variant per kind of notification.
pub struct EventBus<P> {
    events: RwLock<HashMap<String, Vec<Handler<P>>>>,
}

impl<P> Default for EventBus<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> fmt::Debug for EventBus<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let events = self.events.read().unwrap_or_else(|e| e.into_inner());
        let mut map = f.debug_map();
        for (name, handlers) in events.iter() {
            map.entry(name, &handlers.len());
        }
        map.finish()
    }
}

impl<P> EventBus<P> {
    /// Creates an empty bus with no registered events.
    pub fn new() -> Self {
        Self {
            events: RwLock::new(HashMap::new()),
        }
    }

    /// # Register
    ///
    /// Declares that an event named `name` exists. Registering the same name
    /// twice is a no-op and keeps the existing subscribers.
    pub fn register(&self, name: &str) {
        let mut events = self.events.write().unwrap_or_else(|e| e.into_inner());
        events.entry(name.to_string()).or_default();
    }

    /// Returns `true` if `name` has been registered.
    pub fn is_registered(&self, name: &str) -> bool {
        let events = self.events.read().unwrap_or_else(|e| e.into_inner());
        events.contains_key(name)
    }

    /// # Subscribe
    ///
    /// Appends `handler` to the subscribers of `name`. Handlers run in the order
    /// they were subscribed.
    ///
    /// # Errors
    /// Returns `BusError::UnknownEvent` if `name` was never registered.
    pub fn subscribe<F>(&self, name: &str, handler: F) -> Result<(), BusError>
    where
        F: Fn(&P) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let mut events = self.events.write().unwrap_or_else(|e| e.into_inner());
        let handlers = events
            .get_mut(name)
            .ok_or_else(|| BusError::UnknownEvent(name.to_string()))?;
        handlers.push(Arc::new(handler));
        Ok(())
    }

    /// Number of handlers currently subscribed to `name` (zero if unknown).
    pub fn subscriber_count(&self, name: &str) -> usize {
        let events = self.events.read().unwrap_or_else(|e| e.into_inner());
        events.get(name).map_or(0, Vec::len)
    }

    /// # Publish
    ///
    /// Invokes every handler subscribed to `name` with `payload`, synchronously
    /// and in subscription order. A registered event without subscribers is a
    /// no-op.
    ///
    /// # Errors
    /// - `BusError::UnknownEvent` if `name` was never registered.
    /// - `BusError::Handler` carrying the first handler failure; handlers after
    ///   the failing one are not invoked.
    pub fn publish(&self, name: &str, payload: &P) -> Result<(), BusError> {
        // Snapshot the handler list so the lock is not held while user code runs.
        let handlers: Vec<Handler<P>> = {
            let events = self.events.read().unwrap_or_else(|e| e.into_inner());
            events
                .get(name)
                .ok_or_else(|| BusError::UnknownEvent(name.to_string()))?
                .clone()
        };

        for (index, handler) in handlers.iter().enumerate() {
            handler(payload).map_err(|source| BusError::Handler {
                event: name.to_string(),
                index,
                source,
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn handlers_run_in_subscription_order_exactly_once() {
        let bus: EventBus<u32> = EventBus::new();
        bus.register("tick");

        let seen = Arc::new(Mutex::new(Vec::new()));
        let h1 = Arc::clone(&seen);
        bus.subscribe("tick", move |p| {
            h1.lock().unwrap().push(("h1", *p));
            Ok(())
        })
        .unwrap();
        let h2 = Arc::clone(&seen);
        bus.subscribe("tick", move |p| {
            h2.lock().unwrap().push(("h2", *p));
            Ok(())
        })
        .unwrap();

        bus.publish("tick", &7).unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![("h1", 7), ("h2", 7)]);
    }

    #[test]
    fn unknown_event_is_rejected() {
        let bus: EventBus<()> = EventBus::new();
        assert!(matches!(
            bus.subscribe("missing", |_| Ok(())),
            Err(BusError::UnknownEvent(name)) if name == "missing"
        ));
        assert!(matches!(bus.publish("missing", &()), Err(BusError::UnknownEvent(_))));
    }

    #[test]
    fn registered_event_without_subscribers_is_a_noop() {
        let bus: EventBus<()> = EventBus::new();
        bus.register("quiet");
        assert!(bus.publish("quiet", &()).is_ok());
        assert_eq!(bus.subscriber_count("quiet"), 0);
    }

    #[test]
    fn failing_handler_stops_delivery_and_propagates() {
        let bus: EventBus<()> = EventBus::new();
        bus.register("tick");

        let calls = Arc::new(Mutex::new(0));
        let c1 = Arc::clone(&calls);
        bus.subscribe("tick", move |_| {
            *c1.lock().unwrap() += 1;
            Ok(())
        })
        .unwrap();
        bus.subscribe("tick", |_| Err(anyhow::anyhow!("sink unavailable")))
            .unwrap();
        let c3 = Arc::clone(&calls);
        bus.subscribe("tick", move |_| {
            *c3.lock().unwrap() += 1;
            Ok(())
        })
        .unwrap();

        let err = bus.publish("tick", &()).unwrap_err();
        match err {
            BusError::Handler { event, index, .. } => {
                assert_eq!(event, "tick");
                assert_eq!(index, 1);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[test]
    fn registering_twice_keeps_subscribers() {
        let bus: EventBus<()> = EventBus::new();
        bus.register("tick");
        bus.subscribe("tick", |_| Ok(())).unwrap();
        bus.register("tick");
        assert_eq!(bus.subscriber_count("tick"), 1);
        assert!(bus.is_registered("tick"));
    }
}
