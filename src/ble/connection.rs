//! BLE connection management.
//!
//! A session drives one link through
//! `Disconnected → Connecting → ServicesDiscovering → Ready` and back to
//! `Disconnected`. Platform completions, timers and disconnect requests are
//! queued and handled one at a time by a single task that owns the session.

use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::ble::gatt::{
    CharacteristicLayout, GattLink, GattSignal, GattStatus, LinkState, SessionEvent,
};
use crate::ble::notifications::NotificationSubscriber;
use crate::ble::uuids::*;
use crate::config::RoasterConfig;
use crate::data::ValueCache;
use crate::error::{Error, Result};
use crate::events::{ConnectionEvent, DisconnectReason, EventDispatcher, RoasterEvent};
use crate::protocol::{decode_duty_cycle, decode_temperature};

/// Connection state of the roaster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ConnectionState {
    /// No link.
    #[default]
    Disconnected,
    /// Link requested, waiting for it to come up.
    Connecting,
    /// Link up, services not yet located.
    ServicesDiscovering,
    /// Services located; reads and writes go to the device.
    Ready,
}

impl ConnectionState {
    /// Check if reads and writes can reach the device.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Ready)
    }

    /// Check if in a transitional state.
    pub fn is_transitioning(&self) -> bool {
        matches!(self, Self::Connecting | Self::ServicesDiscovering)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::ServicesDiscovering => write!(f, "ServicesDiscovering"),
            Self::Ready => write!(f, "Ready"),
        }
    }
}

/// State that outlives individual sessions.
pub(crate) struct DriverContext {
    pub(crate) config: RoasterConfig,
    pub(crate) cache: Arc<ValueCache>,
    pub(crate) dispatcher: Arc<EventDispatcher>,
    pub(crate) state: watch::Sender<ConnectionState>,
    pub(crate) fault: Mutex<Option<Error>>,
}

impl DriverContext {
    pub(crate) fn new(config: RoasterConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            config,
            cache: Arc::new(ValueCache::new()),
            dispatcher: Arc::new(EventDispatcher::new()),
            state,
            fault: Mutex::new(None),
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }
}

/// Exclusive owner of an open link.
struct ConnectionHandle {
    link: Box<dyn GattLink>,
}

impl ConnectionHandle {
    fn release(self) {
        self.link.close();
        debug!("Connection handle released");
    }
}

/// Roaster characteristics located during discovery.
#[derive(Debug, Clone, Default)]
pub(crate) struct DiscoveredCharacteristics {
    pub(crate) temperature: Option<CharacteristicLayout>,
    pub(crate) duty_cycle: Option<CharacteristicLayout>,
}

/// Per-session state shared between the session task and callers.
struct Session {
    handle: RwLock<Option<ConnectionHandle>>,
    characteristics: RwLock<DiscoveredCharacteristics>,
    notifications_armed: AtomicBool,
    closing: AtomicBool,
}

impl Session {
    fn with_link<R>(&self, f: impl FnOnce(&dyn GattLink) -> R) -> Option<R> {
        self.handle.read().as_ref().map(|handle| f(handle.link.as_ref()))
    }
}

/// One connection session with the roaster.
///
/// Dropping the state machine requests a disconnect.
pub struct ConnectionStateMachine {
    session: Arc<Session>,
    context: Arc<DriverContext>,
    events: mpsc::UnboundedSender<SessionEvent>,
    task: JoinHandle<()>,
}

impl ConnectionStateMachine {
    /// Take ownership of a freshly requested link and start the session task.
    pub(crate) fn start(
        link: Box<dyn GattLink>,
        events: mpsc::UnboundedSender<SessionEvent>,
        queue: mpsc::UnboundedReceiver<SessionEvent>,
        context: Arc<DriverContext>,
    ) -> Self {
        let session = Arc::new(Session {
            handle: RwLock::new(Some(ConnectionHandle { link })),
            characteristics: RwLock::new(DiscoveredCharacteristics::default()),
            notifications_armed: AtomicBool::new(false),
            closing: AtomicBool::new(false),
        });

        context.state.send_replace(ConnectionState::Connecting);
        debug!("Connection state changed: Disconnected -> Connecting");

        let actor = SessionActor {
            session: session.clone(),
            context: context.clone(),
            events: events.clone(),
            teardown_pending: false,
        };
        let task = tokio::spawn(actor.run(queue));

        Self {
            session,
            context,
            events,
            task,
        }
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.context.state()
    }

    /// Whether reads and writes may be sent to the device.
    pub(crate) fn is_ready(&self) -> bool {
        self.state().is_connected() && !self.session.closing.load(Ordering::SeqCst)
    }

    /// Whether notifications were successfully armed for this session.
    pub fn notifications_armed(&self) -> bool {
        self.session.notifications_armed.load(Ordering::SeqCst)
    }

    pub(crate) fn characteristics(&self) -> DiscoveredCharacteristics {
        self.session.characteristics.read().clone()
    }

    /// Run `f` against the open link, if there still is one.
    pub(crate) fn with_link<R>(&self, f: impl FnOnce(&dyn GattLink) -> R) -> Option<R> {
        self.session.with_link(f)
    }

    /// Whether teardown has been requested for this session.
    pub fn is_closing(&self) -> bool {
        self.session.closing.load(Ordering::SeqCst)
    }

    /// Request teardown. Fire-and-forget; a no-op once the session ended.
    ///
    /// The session refuses reads and writes from this call on.
    pub fn request_disconnect(&self) {
        self.session.closing.store(true, Ordering::SeqCst);
        if self.events.send(SessionEvent::DisconnectRequested).is_err() {
            trace!("Disconnect requested for an ended session");
        }
    }

    /// Whether the session task has ended.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for ConnectionStateMachine {
    fn drop(&mut self) {
        self.request_disconnect();
    }
}

enum Flow {
    Continue,
    Finished,
}

/// The single consumer of a session's event queue.
struct SessionActor {
    session: Arc<Session>,
    context: Arc<DriverContext>,
    events: mpsc::UnboundedSender<SessionEvent>,
    teardown_pending: bool,
}

impl SessionActor {
    async fn run(mut self, mut queue: mpsc::UnboundedReceiver<SessionEvent>) {
        debug!("Session task started");

        while let Some(event) = queue.recv().await {
            if let Flow::Finished = self.handle_event(event) {
                break;
            }
        }

        debug!("Session task ended");
    }

    fn handle_event(&mut self, event: SessionEvent) -> Flow {
        match event {
            SessionEvent::Signal(signal) => self.handle_signal(signal),
            SessionEvent::DiscoveryDue => self.start_discovery(),
            SessionEvent::DisconnectRequested => self.begin_teardown(),
            SessionEvent::TeardownDue => {
                if !self.teardown_pending {
                    return Flow::Continue;
                }
                warn!(
                    "Link teardown not confirmed within {:?}, releasing connection",
                    self.context.config.teardown_timeout
                );
                self.finish(DisconnectReason::Requested)
            }
        }
    }

    fn handle_signal(&mut self, signal: GattSignal) -> Flow {
        match signal {
            GattSignal::LinkStateChanged { status, state } => self.on_link_state(status, state),
            GattSignal::ServicesDiscovered { status } => self.on_services_discovered(status),
            GattSignal::CharacteristicChanged { uuid, value } => {
                self.on_characteristic_changed(uuid, &value);
                Flow::Continue
            }
            GattSignal::CharacteristicRead {
                uuid,
                status,
                value,
            } => {
                self.on_characteristic_read(uuid, status, &value);
                Flow::Continue
            }
            GattSignal::CharacteristicWritten { uuid, status } => {
                if status.is_success() {
                    debug!("Write to {} confirmed", uuid);
                } else {
                    warn!("Write to {} failed: {:?}", uuid, status);
                }
                Flow::Continue
            }
            GattSignal::DescriptorWritten {
                characteristic,
                descriptor,
                status,
            } => {
                if status.is_success() {
                    debug!("Descriptor {} of {} written", descriptor, characteristic);
                } else {
                    warn!(
                        "Descriptor {} of {} write failed: {:?}",
                        descriptor, characteristic, status
                    );
                }
                Flow::Continue
            }
        }
    }

    fn on_link_state(&mut self, status: GattStatus, link_state: LinkState) -> Flow {
        let current = self.context.state();
        debug!(
            "Link state {} (status {:?}) while {}",
            link_state, status, current
        );

        match link_state {
            LinkState::Connected => {
                if current != ConnectionState::Connecting || self.teardown_pending {
                    debug!("Ignoring link-up while {}", current);
                    return Flow::Continue;
                }

                info!("Link established");
                self.set_state(ConnectionState::ServicesDiscovering);
                self.emit(LinkState::Connected, ConnectionState::ServicesDiscovering, None);
                self.schedule(
                    SessionEvent::DiscoveryDue,
                    self.context.config.discovery_delay,
                );
                Flow::Continue
            }
            LinkState::Disconnected => {
                let reason = if self.teardown_pending {
                    info!("Link teardown confirmed");
                    DisconnectReason::Requested
                } else if current == ConnectionState::Connecting {
                    warn!("Link request failed (status {:?})", status);
                    DisconnectReason::ConnectFailed
                } else {
                    warn!("Link lost (status {:?})", status);
                    DisconnectReason::LinkLost
                };
                self.finish(reason)
            }
            LinkState::Connecting | LinkState::Disconnecting => Flow::Continue,
        }
    }

    fn start_discovery(&mut self) -> Flow {
        let current = self.context.state();
        if current != ConnectionState::ServicesDiscovering || self.teardown_pending {
            debug!("Discovery timer fired while {}, skipping", current);
            return Flow::Continue;
        }

        match self.session.with_link(|link| link.discover_services()) {
            Some(Ok(())) => {
                debug!("Discover services started");
                Flow::Continue
            }
            Some(Err(e)) => {
                error!("Could not start service discovery: {}", e);
                self.abort(DisconnectReason::DiscoveryFailed)
            }
            None => Flow::Continue,
        }
    }

    fn on_services_discovered(&mut self, status: GattStatus) -> Flow {
        let current = self.context.state();
        if current != ConnectionState::ServicesDiscovering {
            debug!("Ignoring discovery result while {}", current);
            return Flow::Continue;
        }

        if !status.is_success() {
            error!("Service discovery failed: {:?}", status);
            return self.abort(DisconnectReason::DiscoveryFailed);
        }

        match self.locate_characteristics() {
            Ok(()) => Flow::Continue,
            Err(e) => {
                error!("{}; ending session", e);
                *self.context.fault.lock() = Some(e);
                self.abort(DisconnectReason::ServiceNotFound)
            }
        }
    }

    /// Find the roaster service and arm temperature notifications.
    fn locate_characteristics(&mut self) -> Result<()> {
        let services = self
            .session
            .with_link(|link| link.services())
            .unwrap_or_default();

        for service in &services {
            debug!("Service: {}", service.uuid);
            for characteristic in &service.characteristics {
                debug!("\tCharacteristic: {}", characteristic.uuid);
            }
        }

        let service = services
            .iter()
            .find(|s| s.uuid == COFFEE_ROASTER_SERVICE_UUID)
            .ok_or_else(|| Error::ServiceNotFound {
                uuid: COFFEE_ROASTER_SERVICE_UUID.to_string(),
            })?;

        let discovered = DiscoveredCharacteristics {
            temperature: service
                .characteristic(&BEAN_TEMPERATURE_CHARACTERISTIC_UUID)
                .cloned(),
            duty_cycle: service
                .characteristic(&DUTY_CYCLE_CHARACTERISTIC_UUID)
                .cloned(),
        };

        match &discovered.temperature {
            Some(characteristic) => {
                let armed = self
                    .session
                    .with_link(|link| NotificationSubscriber::arm(link, characteristic))
                    .unwrap_or(false);
                if armed {
                    info!("Bean temperature notification activated");
                } else {
                    warn!("Bean temperature notification could not be activated");
                }
                self.session
                    .notifications_armed
                    .store(armed, Ordering::SeqCst);
            }
            None => warn!(
                "{}; continuing without temperature notifications",
                Error::CharacteristicNotFound {
                    uuid: BEAN_TEMPERATURE_CHARACTERISTIC_UUID.to_string(),
                }
            ),
        }

        if discovered.duty_cycle.is_none() {
            warn!(
                "{}; duty cycle reads and writes disabled",
                Error::CharacteristicNotFound {
                    uuid: DUTY_CYCLE_CHARACTERISTIC_UUID.to_string(),
                }
            );
        }

        *self.session.characteristics.write() = discovered;
        self.set_state(ConnectionState::Ready);
        self.emit(LinkState::Connected, ConnectionState::Ready, None);
        info!("Roaster ready");

        Ok(())
    }

    fn on_characteristic_changed(&self, uuid: uuid::Uuid, value: &[u8]) {
        if uuid != BEAN_TEMPERATURE_CHARACTERISTIC_UUID {
            trace!("Characteristic changed: {}", uuid);
            return;
        }

        trace!("Bean temperature payload: {:02X?}", value);

        let temperature = match decode_temperature(value) {
            Ok(temperature) => temperature,
            Err(e) => {
                warn!("Dropping bean temperature notification: {}", e);
                return;
            }
        };

        let snapshot = self.context.cache.set_temperature(temperature);

        if self.context.config.refresh_duty_cycle_on_notify {
            self.refresh_duty_cycle();
        }

        let event = RoasterEvent::from_snapshot(&snapshot);
        let delivered = self.context.dispatcher.dispatch_reading(&event);
        debug!(
            "Bean temperature {:.0}°C delivered to {} listener(s)",
            event.temperature_celsius, delivered
        );
    }

    fn refresh_duty_cycle(&self) {
        if self.session.characteristics.read().duty_cycle.is_none() {
            return;
        }

        if let Some(Err(e)) = self
            .session
            .with_link(|link| link.read_characteristic(DUTY_CYCLE_CHARACTERISTIC_UUID))
        {
            debug!("Duty cycle refresh not dispatched: {}", e);
        }
    }

    fn on_characteristic_read(&self, uuid: uuid::Uuid, status: GattStatus, value: &[u8]) {
        if uuid != DUTY_CYCLE_CHARACTERISTIC_UUID {
            trace!(
                "Read of {} completed (roaster characteristic: {})",
                uuid,
                is_roaster_characteristic(&uuid)
            );
            return;
        }

        if !status.is_success() {
            debug!("Duty cycle read failed: {:?}", status);
            return;
        }

        match decode_duty_cycle(value) {
            Ok(percent) => {
                if self.context.cache.set_duty_cycle(percent).is_ok() {
                    debug!("Duty cycle read: {}%", percent);
                }
            }
            Err(e) => warn!("Duty cycle left unchanged: {}", e),
        }
    }

    fn begin_teardown(&mut self) -> Flow {
        if self.teardown_pending {
            return Flow::Continue;
        }
        self.teardown_pending = true;
        self.session.closing.store(true, Ordering::SeqCst);

        let current = self.context.state();
        info!("Disconnect requested while {}", current);

        if self.session.notifications_armed.swap(false, Ordering::SeqCst) {
            let temperature = self.session.characteristics.read().temperature.clone();
            if let Some(characteristic) = temperature {
                self.session
                    .with_link(|link| NotificationSubscriber::disarm(link, &characteristic));
            }
        }

        match self.session.with_link(|link| link.disconnect()) {
            Some(Ok(())) if current != ConnectionState::Connecting => {
                self.schedule(
                    SessionEvent::TeardownDue,
                    self.context.config.teardown_timeout,
                );
                Flow::Continue
            }
            Some(Ok(())) | None => self.finish(DisconnectReason::Requested),
            Some(Err(e)) => {
                warn!("Disconnect request failed: {}", e);
                self.finish(DisconnectReason::Requested)
            }
        }
    }

    /// End the session on a link that may still be up.
    fn abort(&mut self, reason: DisconnectReason) -> Flow {
        if let Some(Err(e)) = self.session.with_link(|link| link.disconnect()) {
            debug!("Disconnect request failed: {}", e);
        }
        self.finish(reason)
    }

    /// Release the link, publish `Disconnected` and stop the session.
    fn finish(&mut self, reason: DisconnectReason) -> Flow {
        if let Some(handle) = self.session.handle.write().take() {
            handle.release();
        }
        *self.session.characteristics.write() = DiscoveredCharacteristics::default();
        self.session
            .notifications_armed
            .store(false, Ordering::SeqCst);
        self.teardown_pending = false;

        self.set_state(ConnectionState::Disconnected);
        info!("Disconnected ({:?})", reason);
        self.emit(
            LinkState::Disconnected,
            ConnectionState::Disconnected,
            Some(reason),
        );

        Flow::Finished
    }

    fn set_state(&self, new_state: ConnectionState) {
        let old_state = self.context.state.send_replace(new_state);
        if old_state != new_state {
            debug!("Connection state changed: {} -> {}", old_state, new_state);
        }
    }

    fn emit(
        &self,
        link_state: LinkState,
        state: ConnectionState,
        reason: Option<DisconnectReason>,
    ) {
        let event = ConnectionEvent::new(link_state, state, reason);
        self.context.dispatcher.dispatch_connection(&event);
    }

    fn schedule(&self, event: SessionEvent, delay: Duration) {
        let events = self.events.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // The session may have ended in the meantime.
            let _ = events.send(event);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_state() {
        assert!(!ConnectionState::Disconnected.is_connected());
        assert!(ConnectionState::Ready.is_connected());
        assert!(!ConnectionState::ServicesDiscovering.is_connected());

        assert!(ConnectionState::Connecting.is_transitioning());
        assert!(ConnectionState::ServicesDiscovering.is_transitioning());
        assert!(!ConnectionState::Ready.is_transitioning());
        assert!(!ConnectionState::Disconnected.is_transitioning());
    }

    #[test]
    fn test_connection_state_display() {
        assert_eq!(format!("{}", ConnectionState::Ready), "Ready");
        assert_eq!(
            format!("{}", ConnectionState::ServicesDiscovering),
            "ServicesDiscovering"
        );
        assert_eq!(format!("{}", ConnectionState::Disconnected), "Disconnected");
    }

    #[test]
    fn test_driver_context_starts_disconnected() {
        let context = DriverContext::new(RoasterConfig::default());
        assert_eq!(context.state(), ConnectionState::Disconnected);
        assert!(context.fault.lock().is_none());
    }
}
