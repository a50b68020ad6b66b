use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::classify::Classified;

/// Broadcast channel capacity for the event tap.
const BROADCAST_CAPACITY: usize = 1024;

/// Inbound message body, decoded as far as the wire allows.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub enum Payload {
    /// A JSON document
    Json(serde_json::Value),
    /// Raw text that did not parse as JSON
    Text(String),
}

/// Everything the connection announces to the application.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub enum Event {
    /// The connection reached the open state
    Connected,
    /// The connection was closed for good by an explicit disconnect
    Disconnected,
    /// A retry timer was armed
    Reconnecting {
        /// Zero-based attempt number the armed retry corresponds to
        attempt: u32,
        /// Delay until the retry fires
        delay: Duration,
    },
    /// A transport failure was observed and classified
    Errored {
        /// The classification
        error: Classified,
    },
    /// The reconnect attempt budget ran out
    Exhausted {
        /// How many retries were attempted
        attempts: u32,
        /// The classification of the final failure, when one was recorded
        last_error: Option<Classified>,
    },
    /// An inbound payload arrived
    MessageReceived {
        /// The decoded payload
        payload: Payload,
    },
    /// An inbound message could not be parsed as JSON
    ParseError {
        /// The raw text as received
        raw: String,
        /// Parser diagnostic
        detail: String,
    },
    /// A bounded queue dropped its oldest entries to make room
    QueueOverflow {
        /// Number of entries dropped
        dropped: usize,
    },
}

/// Coarse subscription channels.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum_macros::Display)]
#[strum(serialize_all = "lowercase")]
pub enum EventKind {
    /// Lifecycle events: connected, disconnected, reconnecting, errored, exhausted
    Connection,
    /// Inbound payloads and per-message parse failures
    Message,
    /// Outbound queue warnings
    Queue,
}

impl Event {
    /// The channel this event is delivered on.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::Connected
            | Self::Disconnected
            | Self::Reconnecting { .. }
            | Self::Errored { .. }
            | Self::Exhausted { .. } => EventKind::Connection,
            Self::MessageReceived { .. } | Self::ParseError { .. } => EventKind::Message,
            Self::QueueOverflow { .. } => EventKind::Queue,
        }
    }
}

type Callback = Arc<dyn Fn(&Event) + Send + Sync + 'static>;

struct Subscriber {
    kind: EventKind,
    callback: Callback,
}

/// Synchronous fan-out of [`Event`]s to registered callbacks, plus a broadcast
/// tap for stream-based consumers.
///
/// A panicking callback is caught and logged; delivery to the remaining
/// subscribers continues.
pub struct EventBus {
    subscribers: DashMap<Uuid, Subscriber>,
    tap: broadcast::Sender<Event>,
    closed: AtomicBool,
}

impl EventBus {
    pub(crate) fn new() -> Self {
        let (tap, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            subscribers: DashMap::new(),
            tap,
            closed: AtomicBool::new(false),
        }
    }

    /// Register `callback` for events of `kind`.
    ///
    /// The returned handle removes the subscription via
    /// [`SubscriptionHandle::unsubscribe`]; dropping the handle without calling
    /// it leaves the subscription active.
    pub fn on<F>(self: &Arc<Self>, kind: EventKind, callback: F) -> SubscriptionHandle
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let id = Uuid::new_v4();
        self.subscribers.insert(
            id,
            Subscriber {
                kind,
                callback: Arc::new(callback),
            },
        );
        SubscriptionHandle {
            id,
            bus: Arc::downgrade(self),
        }
    }

    /// Remove the subscription with the given id. Unknown ids are a no-op.
    pub fn off(&self, id: Uuid) {
        self.subscribers.remove(&id);
    }

    /// Fan an event out to every current subscriber of its kind.
    ///
    /// Does nothing once the bus is closed.
    pub(crate) fn emit(&self, event: &Event) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }

        drop(self.tap.send(event.clone()));

        let kind = event.kind();
        // Snapshot the matching callbacks so a subscriber may register or
        // remove subscriptions from inside its own callback.
        let callbacks: Vec<Callback> = self
            .subscribers
            .iter()
            .filter(|entry| entry.value().kind == kind)
            .map(|entry| Arc::clone(&entry.value().callback))
            .collect();

        for callback in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
                #[cfg(feature = "tracing")]
                tracing::error!(%kind, "Event subscriber panicked; continuing delivery");
            }
        }
    }

    /// Permanently silence the bus. Emissions after this call are dropped.
    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Subscribe to the raw event tap.
    pub(crate) fn watch(&self) -> broadcast::Receiver<Event> {
        self.tap.subscribe()
    }
}

/// Handle for a registered event subscription.
#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    id: Uuid,
    bus: Weak<EventBus>,
}

impl SubscriptionHandle {
    /// The id of the underlying subscription.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Remove the subscription. Safe to call after the bus is gone.
    pub fn unsubscribe(self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.off(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    fn recorded(bus: &Arc<EventBus>, kind: EventKind) -> (Arc<Mutex<Vec<Event>>>, SubscriptionHandle) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handle = bus.on(kind, move |event| {
            sink.lock().expect("subscriber lock").push(event.clone());
        });
        (seen, handle)
    }

    #[test]
    fn routes_by_kind() {
        let bus = Arc::new(EventBus::new());
        let (connection_seen, _h1) = recorded(&bus, EventKind::Connection);
        let (message_seen, _h2) = recorded(&bus, EventKind::Message);

        bus.emit(&Event::Connected);

        assert_eq!(connection_seen.lock().expect("lock").len(), 1);
        assert!(message_seen.lock().expect("lock").is_empty());
    }

    #[test]
    fn panicking_subscriber_does_not_stop_delivery() {
        let bus = Arc::new(EventBus::new());
        let _bomb = bus.on(EventKind::Connection, |_event| panic!("subscriber bug"));
        let (seen, _handle) = recorded(&bus, EventKind::Connection);

        bus.emit(&Event::Connected);
        bus.emit(&Event::Disconnected);

        assert_eq!(seen.lock().expect("lock").len(), 2);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus = Arc::new(EventBus::new());
        let (seen, handle) = recorded(&bus, EventKind::Connection);

        bus.emit(&Event::Connected);
        handle.unsubscribe();
        bus.emit(&Event::Disconnected);

        assert_eq!(seen.lock().expect("lock").len(), 1);
    }

    #[test]
    fn closed_bus_is_silent() {
        let bus = Arc::new(EventBus::new());
        let (seen, _handle) = recorded(&bus, EventKind::Connection);

        bus.close();
        bus.emit(&Event::Connected);

        assert!(seen.lock().expect("lock").is_empty());
    }

    #[test]
    fn off_with_unknown_id_is_noop() {
        let bus = Arc::new(EventBus::new());
        let (seen, _handle) = recorded(&bus, EventKind::Connection);

        bus.off(Uuid::new_v4());
        bus.emit(&Event::Connected);

        assert_eq!(seen.lock().expect("lock").len(), 1);
    }
}
