//! Fake platform adapter for driving a `Roaster` without hardware.
//!
//! The fake records every request the driver dispatches and lets tests play
//! the platform's part by injecting completion signals.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use roaster_ble::ble::uuids::*;
use roaster_ble::ble::{CharacteristicLayout, ServiceLayout};
use roaster_ble::{
    ConnectionEvent, ConnectionState, DeviceAddress, Error, GattAdapter, GattLink, GattSignal,
    GattStatus, LinkState, Result, Roaster, RoasterConfig, RoasterEvent, SignalSender,
};

/// A request the driver sent to the platform.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkCall {
    Open(String),
    DiscoverServices,
    Read(Uuid),
    Write(Uuid, Vec<u8>),
    Routing(Uuid, bool),
    WriteDescriptor(Uuid, Uuid, Vec<u8>),
    Disconnect,
    Close,
}

#[derive(Default)]
struct FakeState {
    calls: Mutex<Vec<LinkCall>>,
    signals: Mutex<Option<SignalSender>>,
    services: Mutex<Vec<ServiceLayout>>,
    values: Mutex<HashMap<Uuid, Vec<u8>>>,
    unresolvable: AtomicBool,
    reject_reads: AtomicBool,
    reject_writes: AtomicBool,
    reject_discovery: AtomicBool,
    reject_routing: AtomicBool,
    reject_descriptors: AtomicBool,
}

impl FakeState {
    fn record(&self, call: LinkCall) {
        self.calls.lock().push(call);
    }
}

/// Test double for the platform adapter.
#[derive(Clone, Default)]
pub struct FakeAdapter {
    state: Arc<FakeState>,
}

impl FakeAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fake whose device exposes the full roaster service.
    pub fn with_roaster_service() -> Self {
        let fake = Self::new();
        fake.set_services(vec![roaster_service(true, true)]);
        fake
    }

    pub fn set_services(&self, services: Vec<ServiceLayout>) {
        *self.state.services.lock() = services;
    }

    pub fn set_value(&self, uuid: Uuid, value: Vec<u8>) {
        self.state.values.lock().insert(uuid, value);
    }

    pub fn set_unresolvable(&self, unresolvable: bool) {
        self.state.unresolvable.store(unresolvable, Ordering::SeqCst);
    }

    pub fn reject_reads(&self, reject: bool) {
        self.state.reject_reads.store(reject, Ordering::SeqCst);
    }

    pub fn reject_writes(&self, reject: bool) {
        self.state.reject_writes.store(reject, Ordering::SeqCst);
    }

    pub fn reject_discovery(&self, reject: bool) {
        self.state.reject_discovery.store(reject, Ordering::SeqCst);
    }

    pub fn reject_routing(&self, reject: bool) {
        self.state.reject_routing.store(reject, Ordering::SeqCst);
    }

    pub fn reject_descriptors(&self, reject: bool) {
        self.state.reject_descriptors.store(reject, Ordering::SeqCst);
    }

    /// Deliver a platform signal to the most recently opened link.
    pub fn emit(&self, signal: GattSignal) -> bool {
        match self.state.signals.lock().as_ref() {
            Some(signals) => signals.send(signal),
            None => false,
        }
    }

    pub fn link_up(&self) -> bool {
        self.emit(GattSignal::LinkStateChanged {
            status: GattStatus::Success,
            state: LinkState::Connected,
        })
    }

    pub fn link_down(&self) -> bool {
        self.emit(GattSignal::LinkStateChanged {
            status: GattStatus::Success,
            state: LinkState::Disconnected,
        })
    }

    pub fn discovery_complete(&self, status: GattStatus) -> bool {
        self.emit(GattSignal::ServicesDiscovered { status })
    }

    pub fn notify_temperature(&self, celsius: u8) -> bool {
        self.emit(GattSignal::CharacteristicChanged {
            uuid: BEAN_TEMPERATURE_CHARACTERISTIC_UUID,
            value: vec![celsius],
        })
    }

    pub fn calls(&self) -> Vec<LinkCall> {
        self.state.calls.lock().clone()
    }

    pub fn count(&self, predicate: impl Fn(&LinkCall) -> bool) -> usize {
        self.state.calls.lock().iter().filter(|c| predicate(c)).count()
    }

    pub fn clear_calls(&self) {
        self.state.calls.lock().clear();
    }

    pub fn adapter(&self) -> Arc<dyn GattAdapter> {
        Arc::new(self.clone())
    }
}

#[async_trait]
impl GattAdapter for FakeAdapter {
    async fn open(
        &self,
        address: &DeviceAddress,
        signals: SignalSender,
    ) -> Result<Box<dyn GattLink>> {
        if self.state.unresolvable.load(Ordering::SeqCst) {
            return Err(Error::AddressResolution {
                address: address.to_string(),
            });
        }

        self.state.record(LinkCall::Open(address.to_string()));
        *self.state.signals.lock() = Some(signals);

        Ok(Box::new(FakeLink {
            state: self.state.clone(),
        }))
    }
}

struct FakeLink {
    state: Arc<FakeState>,
}

impl GattLink for FakeLink {
    fn discover_services(&self) -> Result<()> {
        self.state.record(LinkCall::DiscoverServices);
        if self.state.reject_discovery.load(Ordering::SeqCst) {
            return Err(Error::dispatch("discover services", "rejected by fake"));
        }
        Ok(())
    }

    fn services(&self) -> Vec<ServiceLayout> {
        self.state.services.lock().clone()
    }

    fn read_characteristic(&self, uuid: Uuid) -> Result<()> {
        self.state.record(LinkCall::Read(uuid));
        if self.state.reject_reads.load(Ordering::SeqCst) {
            return Err(Error::dispatch("read", "rejected by fake"));
        }
        Ok(())
    }

    fn characteristic_value(&self, uuid: Uuid) -> Option<Vec<u8>> {
        self.state.values.lock().get(&uuid).cloned()
    }

    fn write_characteristic(&self, uuid: Uuid, value: Vec<u8>) -> Result<()> {
        self.state.record(LinkCall::Write(uuid, value));
        if self.state.reject_writes.load(Ordering::SeqCst) {
            return Err(Error::dispatch("write", "rejected by fake"));
        }
        Ok(())
    }

    fn set_notification_routing(&self, uuid: Uuid, enable: bool) -> Result<()> {
        self.state.record(LinkCall::Routing(uuid, enable));
        if self.state.reject_routing.load(Ordering::SeqCst) {
            return Err(Error::dispatch("notification routing", "rejected by fake"));
        }
        Ok(())
    }

    fn write_descriptor(&self, characteristic: Uuid, descriptor: Uuid, value: Vec<u8>) -> Result<()> {
        self.state
            .record(LinkCall::WriteDescriptor(characteristic, descriptor, value));
        if self.state.reject_descriptors.load(Ordering::SeqCst) {
            return Err(Error::dispatch("descriptor write", "rejected by fake"));
        }
        Ok(())
    }

    fn disconnect(&self) -> Result<()> {
        self.state.record(LinkCall::Disconnect);
        Ok(())
    }

    fn close(&self) {
        self.state.record(LinkCall::Close);
    }
}

/// The roaster service layout, optionally missing characteristics.
pub fn roaster_service(with_temperature: bool, with_duty_cycle: bool) -> ServiceLayout {
    let mut characteristics = Vec::new();
    if with_temperature {
        characteristics.push(CharacteristicLayout::new(
            BEAN_TEMPERATURE_CHARACTERISTIC_UUID,
            vec![CLIENT_CHARACTERISTIC_CONFIG_UUID],
        ));
    }
    if with_duty_cycle {
        characteristics.push(CharacteristicLayout::new(
            DUTY_CYCLE_CHARACTERISTIC_UUID,
            vec![],
        ));
    }
    ServiceLayout::new(COFFEE_ROASTER_SERVICE_UUID, characteristics)
}

pub fn test_config() -> RoasterConfig {
    RoasterConfig::new("AA:BB:CC:DD:EE:FF").expect("valid address")
}

/// Wait until the roaster reaches `state`.
pub async fn wait_for_state(roaster: &Roaster, state: ConnectionState) {
    let mut rx = roaster.watch_state();
    tokio::time::timeout(Duration::from_secs(30), rx.wait_for(|s| *s == state))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {}", state))
        .expect("state channel closed");
}

/// Let the session task drain its queue.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

/// Connect and drive the fake through link-up and successful discovery.
pub async fn connect_ready(roaster: &Roaster, fake: &FakeAdapter) {
    assert!(roaster.connect().await);
    assert!(fake.link_up());
    assert!(fake.discovery_complete(GattStatus::Success));
    wait_for_state(roaster, ConnectionState::Ready).await;
}

/// Listener that records readings.
#[derive(Default)]
pub struct ReadingRecorder {
    pub events: Mutex<Vec<RoasterEvent>>,
}

impl roaster_ble::RoasterEventListener for ReadingRecorder {
    fn on_roaster_event(&self, event: &RoasterEvent) {
        self.events.lock().push(event.clone());
    }
}

/// Listener that records connection transitions.
#[derive(Default)]
pub struct ConnectionRecorder {
    pub events: Mutex<Vec<ConnectionEvent>>,
}

impl roaster_ble::ConnectionListener for ConnectionRecorder {
    fn on_connection_state_changed(&self, event: &ConnectionEvent) {
        self.events.lock().push(event.clone());
    }
}

impl ConnectionRecorder {
    pub fn disconnects(&self) -> Vec<ConnectionEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.link_state == LinkState::Disconnected)
            .cloned()
            .collect()
    }
}
