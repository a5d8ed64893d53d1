//! Roaster struct and methods.
//!
//! Represents a single coffee roaster reachable over BLE.

use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, error, info, warn};

use crate::ble::connection::{ConnectionState, ConnectionStateMachine, DriverContext};
use crate::ble::gatt::{GattAdapter, SignalSender};
use crate::ble::platform::BtleplugAdapter;
use crate::ble::uuids::*;
use crate::config::RoasterConfig;
use crate::data::ReadingSnapshot;
use crate::error::{Error, Result};
use crate::events::{ConnectionListener, RoasterEventListener};
use crate::protocol::{decode_temperature, encode_duty_cycle, truncate_duty_cycle};

/// A coffee roaster exposing bean temperature and heater duty cycle.
///
/// Readings survive disconnects: while the roaster is unreachable the
/// getters return the last values observed.
pub struct Roaster {
    /// Platform adapter used to open links.
    adapter: Arc<dyn GattAdapter>,
    /// Configuration, cache, listeners and state, shared with sessions.
    context: Arc<DriverContext>,
    /// The current session, if `connect()` was ever accepted.
    session: RwLock<Option<ConnectionStateMachine>>,
    /// Serializes `connect()` calls.
    connect_lock: Mutex<()>,
}

impl Roaster {
    /// Create a roaster driver on top of a platform adapter.
    pub fn new(config: RoasterConfig, adapter: Arc<dyn GattAdapter>) -> Self {
        Self {
            adapter,
            context: Arc::new(DriverContext::new(config)),
            session: RwLock::new(None),
            connect_lock: Mutex::new(()),
        }
    }

    /// Create a roaster driver using the system Bluetooth adapter.
    ///
    /// # Errors
    ///
    /// Returns an error if Bluetooth is not available.
    pub async fn with_platform_adapter(config: RoasterConfig) -> Result<Self> {
        let adapter = BtleplugAdapter::new().await?;
        Ok(Self::new(config, Arc::new(adapter)))
    }

    /// The driver configuration.
    pub fn config(&self) -> &RoasterConfig {
        &self.context.config
    }

    // === Connection ===

    /// Request a connection to the roaster.
    ///
    /// Returns `true` once the link request has been dispatched, or if a
    /// session is already active. Returns `false` if the address cannot be
    /// resolved or the adapter rejects the request. Progress is reported
    /// through connection listeners and [`Roaster::watch_state`].
    ///
    /// If a disconnect is still in progress, waits for that session to end
    /// (at most the configured teardown timeout) before opening a new link.
    pub async fn connect(&self) -> bool {
        let _guard = self.connect_lock.lock().await;

        let closing = match self.session.read().as_ref() {
            Some(session) if session.state() != ConnectionState::Disconnected => {
                if !session.is_closing() {
                    debug!("Connect ignored, session already {}", session.state());
                    return true;
                }
                true
            }
            _ => false,
        };

        if closing {
            debug!("Waiting for the previous session to end");
            let mut state = self.context.state.subscribe();
            let ended = state
                .wait_for(|s| *s == ConnectionState::Disconnected)
                .await
                .is_ok();
            if !ended {
                error!("Connection state channel closed");
                return false;
            }
        }

        let address = &self.context.config.address;
        info!("Connecting to roaster {}", address);

        let (events, queue) = mpsc::unbounded_channel();
        match self
            .adapter
            .open(address, SignalSender::new(events.clone()))
            .await
        {
            Ok(link) => {
                *self.context.fault.lock() = None;
                let session =
                    ConnectionStateMachine::start(link, events, queue, self.context.clone());
                *self.session.write() = Some(session);
                true
            }
            Err(e @ (Error::InvalidAddress { .. } | Error::AddressResolution { .. })) => {
                error!("Unable to connect: {}", e);
                false
            }
            Err(e) => {
                error!("Connect request to {} failed: {}", address, e);
                false
            }
        }
    }

    /// Request a disconnect. Fire-and-forget; a no-op when disconnected.
    pub fn disconnect(&self) {
        if let Some(session) = self.session.read().as_ref() {
            if session.state() != ConnectionState::Disconnected {
                session.request_disconnect();
            }
        }
    }

    /// Get the current connection state.
    pub fn connection_state(&self) -> ConnectionState {
        self.context.state()
    }

    /// Check if reads and writes currently reach the roaster.
    pub fn is_connected(&self) -> bool {
        self.session
            .read()
            .as_ref()
            .map(|session| session.is_ready())
            .unwrap_or(false)
    }

    /// Watch connection state changes.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.context.state.subscribe()
    }

    /// Whether temperature notifications were armed for the current session.
    pub fn notifications_armed(&self) -> bool {
        self.session
            .read()
            .as_ref()
            .map(|session| session.notifications_armed())
            .unwrap_or(false)
    }

    /// Take the fault that ended the last session, if it was fatal.
    ///
    /// Currently only [`Error::ServiceNotFound`] ends a session this way.
    pub fn take_fault(&self) -> Option<Error> {
        self.context.fault.lock().take()
    }

    // === Readings ===

    /// Get the bean temperature in degrees Celsius.
    ///
    /// When connected this issues a live read and returns the value the
    /// stack holds for the characteristic. The cache is only updated by
    /// notifications. Falls back to the cached value when disconnected or
    /// when the read cannot be dispatched.
    pub fn bean_temperature_celsius(&self) -> f64 {
        let cached = self.context.cache.temperature_celsius();

        let session = self.session.read();
        let Some(session) = session.as_ref().filter(|s| s.is_ready()) else {
            debug!(
                "bean_temperature_celsius: returned latest value ({})",
                Error::NotConnected
            );
            return cached;
        };

        if session.characteristics().temperature.is_none() {
            return cached;
        }

        let live = session.with_link(|link| -> Result<f64> {
            link.read_characteristic(BEAN_TEMPERATURE_CHARACTERISTIC_UUID)?;
            let value = link
                .characteristic_value(BEAN_TEMPERATURE_CHARACTERISTIC_UUID)
                .ok_or_else(|| Error::InvalidData {
                    context: "No bean temperature value held by the stack".to_string(),
                })?;
            decode_temperature(&value)
        });

        match live {
            Some(Ok(temperature)) => {
                debug!("bean_temperature_celsius: read value");
                temperature
            }
            Some(Err(e)) => {
                debug!("bean_temperature_celsius: returned latest value ({})", e);
                cached
            }
            None => cached,
        }
    }

    /// Get the heater duty cycle in percent.
    ///
    /// When connected this also requests a live read, but always returns the
    /// cached value; the read result reaches the cache asynchronously.
    pub fn duty_cycle(&self) -> f64 {
        let session = self.session.read();
        if let Some(session) = session.as_ref().filter(|s| s.is_ready()) {
            if session.characteristics().duty_cycle.is_some() {
                match session
                    .with_link(|link| link.read_characteristic(DUTY_CYCLE_CHARACTERISTIC_UUID))
                {
                    Some(Ok(())) => debug!("duty_cycle: read requested"),
                    Some(Err(e)) => debug!("duty_cycle: read not dispatched ({})", e),
                    None => {}
                }
            }
        }

        self.context.cache.duty_cycle_percent()
    }

    /// Set the heater duty cycle in percent.
    ///
    /// Only the integer part is applied. Returns `false` without touching the
    /// link if the value is outside `[0, 100]` or the roaster is not
    /// connected. The cache is updated only once the write was dispatched.
    pub fn set_duty_cycle(&self, percent: f64) -> bool {
        let payload = match encode_duty_cycle(percent) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Rejected duty cycle: {}", e);
                return false;
            }
        };

        let session = self.session.read();
        let Some(session) = session.as_ref().filter(|s| s.is_ready()) else {
            debug!("set_duty_cycle: {}", Error::NotConnected);
            return false;
        };

        if session.characteristics().duty_cycle.is_none() {
            warn!(
                "set_duty_cycle: {}",
                Error::CharacteristicNotFound {
                    uuid: DUTY_CYCLE_CHARACTERISTIC_UUID.to_string(),
                }
            );
            return false;
        }

        let dispatched = session
            .with_link(|link| link.write_characteristic(DUTY_CYCLE_CHARACTERISTIC_UUID, payload));

        match dispatched {
            Some(Ok(())) => {
                let applied = truncate_duty_cycle(percent);
                match self.context.cache.set_duty_cycle(applied) {
                    Ok(_) => {
                        debug!("set_duty_cycle: updated duty cycle to {}", applied);
                        true
                    }
                    Err(_) => false,
                }
            }
            Some(Err(e)) => {
                warn!("set_duty_cycle: write not dispatched ({})", e);
                false
            }
            None => false,
        }
    }

    /// Copy of the cached readings.
    pub fn snapshot(&self) -> ReadingSnapshot {
        self.context.cache.snapshot()
    }

    // === Listeners ===

    /// Register a listener for temperature readings.
    ///
    /// The roaster keeps only a weak reference; keep the `Arc` alive for as
    /// long as events should be delivered.
    pub fn subscribe<L>(&self, listener: &Arc<L>)
    where
        L: RoasterEventListener + 'static,
    {
        self.context.dispatcher.subscribe(listener);
    }

    /// Register a listener for connection transitions.
    ///
    /// Held by weak reference, like [`Roaster::subscribe`].
    pub fn add_connection_listener<L>(&self, listener: &Arc<L>)
    where
        L: ConnectionListener + 'static,
    {
        self.context.dispatcher.add_connection_listener(listener);
    }
}

impl std::fmt::Debug for Roaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Roaster")
            .field("address", &self.context.config.address)
            .field("state", &self.connection_state())
            .field("snapshot", &self.snapshot())
            .finish()
    }
}
