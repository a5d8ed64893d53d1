//! Roaster events and listener dispatch.
//!
//! Listeners are held by weak reference: the driver never keeps a listener
//! alive and never tears one down. A listener that panics is logged and
//! skipped; the remaining listeners still receive the event.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use tracing::{error, trace};

use crate::ble::connection::ConnectionState;
use crate::ble::gatt::LinkState;
use crate::data::ReadingSnapshot;
use crate::error::Error;

/// A bean temperature reading pushed by the roaster.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RoasterEvent {
    /// Bean temperature in degrees Celsius.
    pub temperature_celsius: f64,
    /// Last known heater duty cycle in percent.
    pub duty_cycle_percent: f64,
    /// When the event was produced.
    pub observed_at: DateTime<Utc>,
}

impl RoasterEvent {
    /// Build an event from the current cache contents.
    pub fn from_snapshot(snapshot: &ReadingSnapshot) -> Self {
        Self {
            temperature_celsius: snapshot.temperature_celsius,
            duty_cycle_percent: snapshot.duty_cycle_percent,
            observed_at: Utc::now(),
        }
    }
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DisconnectReason {
    /// The link dropped without being asked to.
    LinkLost,
    /// `disconnect()` was called.
    Requested,
    /// The link request failed before a link was established.
    ConnectFailed,
    /// Service discovery failed or could not be started.
    DiscoveryFailed,
    /// The device does not expose the coffee roaster service.
    ServiceNotFound,
}

/// A connection transition.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ConnectionEvent {
    /// Link state as reported by the platform.
    pub link_state: LinkState,
    /// Driver state after the transition.
    pub state: ConnectionState,
    /// Set when the transition ends the session.
    pub reason: Option<DisconnectReason>,
    /// When the transition happened.
    pub observed_at: DateTime<Utc>,
}

impl ConnectionEvent {
    /// Create an event stamped with the current time.
    pub fn new(
        link_state: LinkState,
        state: ConnectionState,
        reason: Option<DisconnectReason>,
    ) -> Self {
        Self {
            link_state,
            state,
            reason,
            observed_at: Utc::now(),
        }
    }

    /// The platform's numeric state code.
    pub fn state_code(&self) -> u8 {
        self.link_state.code()
    }
}

/// Receives roaster readings.
pub trait RoasterEventListener: Send + Sync {
    /// Called for every temperature notification.
    fn on_roaster_event(&self, event: &RoasterEvent);
}

impl<F> RoasterEventListener for F
where
    F: Fn(&RoasterEvent) + Send + Sync,
{
    fn on_roaster_event(&self, event: &RoasterEvent) {
        self(event)
    }
}

/// Receives connection transitions.
pub trait ConnectionListener: Send + Sync {
    /// Called when the connection state changes.
    fn on_connection_state_changed(&self, event: &ConnectionEvent);
}

impl<F> ConnectionListener for F
where
    F: Fn(&ConnectionEvent) + Send + Sync,
{
    fn on_connection_state_changed(&self, event: &ConnectionEvent) {
        self(event)
    }
}

/// Fans events out to registered listeners in registration order.
#[derive(Default)]
pub struct EventDispatcher {
    event_listeners: RwLock<Vec<Weak<dyn RoasterEventListener>>>,
    connection_listeners: RwLock<Vec<Weak<dyn ConnectionListener>>>,
}

impl EventDispatcher {
    /// Create a dispatcher with no listeners.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a reading listener. Duplicates are allowed.
    pub fn subscribe<L>(&self, listener: &Arc<L>)
    where
        L: RoasterEventListener + 'static,
    {
        let weak = Arc::downgrade(listener) as Weak<dyn RoasterEventListener>;
        self.event_listeners.write().push(weak);
    }

    /// Register a connection listener. Duplicates are allowed.
    pub fn add_connection_listener<L>(&self, listener: &Arc<L>)
    where
        L: ConnectionListener + 'static,
    {
        let weak = Arc::downgrade(listener) as Weak<dyn ConnectionListener>;
        self.connection_listeners.write().push(weak);
    }

    /// Number of registered reading listeners, including dropped ones.
    pub fn event_listener_count(&self) -> usize {
        self.event_listeners.read().len()
    }

    /// Number of registered connection listeners, including dropped ones.
    pub fn connection_listener_count(&self) -> usize {
        self.connection_listeners.read().len()
    }

    /// Deliver a reading to every live listener.
    ///
    /// Returns how many listeners handled the event without panicking.
    pub fn dispatch_reading(&self, event: &RoasterEvent) -> usize {
        // Snapshot so listeners may register more listeners re-entrantly.
        let listeners = self.event_listeners.read().clone();
        deliver(&listeners, "roaster event", |l| l.on_roaster_event(event))
    }

    /// Deliver a connection transition to every live listener.
    pub fn dispatch_connection(&self, event: &ConnectionEvent) -> usize {
        let listeners = self.connection_listeners.read().clone();
        deliver(&listeners, "connection event", |l| {
            l.on_connection_state_changed(event)
        })
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("event_listeners", &self.event_listener_count())
            .field("connection_listeners", &self.connection_listener_count())
            .finish()
    }
}

fn deliver<T: ?Sized>(listeners: &[Weak<T>], kind: &str, call: impl Fn(&T)) -> usize {
    let mut delivered = 0;

    for (index, weak) in listeners.iter().enumerate() {
        let Some(listener) = weak.upgrade() else {
            trace!("Skipping dropped listener #{} for {}", index, kind);
            continue;
        };

        match panic::catch_unwind(AssertUnwindSafe(|| call(&*listener))) {
            Ok(()) => delivered += 1,
            Err(payload) => {
                let fault = Error::ListenerFault {
                    message: panic_message(payload.as_ref()),
                };
                error!("Listener #{} failed handling {}: {}", index, kind, fault);
            }
        }
    }

    delivered
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
