//! btleplug-backed platform adapter.
//!
//! Every GATT request is dispatched as a task on the runtime that opened the
//! link; its outcome is reported back as a [`GattSignal`].

use async_trait::async_trait;
use btleplug::api::{
    BDAddr, Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter,
    WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::stream::StreamExt;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::ble::gatt::{
    CharacteristicLayout, GattAdapter, GattLink, GattSignal, GattStatus, LinkState,
    ServiceLayout, SignalSender,
};
use crate::ble::uuids::CLIENT_CHARACTERISTIC_CONFIG_UUID;
use crate::config::DeviceAddress;
use crate::error::{Error, Result};

/// How long to scan for a peripheral the adapter has not seen yet.
pub const DEFAULT_RESOLVE_TIMEOUT: Duration = Duration::from_secs(5);

const RESOLVE_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Generic failure status reported for btleplug errors.
const GATT_FAILURE: u16 = 0x0101;

/// Platform adapter backed by the system Bluetooth stack.
pub struct BtleplugAdapter {
    adapter: Adapter,
    resolve_timeout: Duration,
}

impl BtleplugAdapter {
    /// Use the first Bluetooth adapter on the system.
    ///
    /// # Errors
    ///
    /// Returns an error if Bluetooth is not available.
    pub async fn new() -> Result<Self> {
        let manager = Manager::new()
            .await
            .map_err(|_e| Error::BluetoothUnavailable)?;

        let adapters = manager.adapters().await.map_err(Error::Bluetooth)?;

        let adapter = adapters
            .into_iter()
            .next()
            .ok_or(Error::BluetoothUnavailable)?;

        info!(
            "Using Bluetooth adapter: {:?}",
            adapter.adapter_info().await.ok()
        );

        Ok(Self::with_adapter(adapter))
    }

    /// Use a specific adapter.
    pub fn with_adapter(adapter: Adapter) -> Self {
        Self {
            adapter,
            resolve_timeout: DEFAULT_RESOLVE_TIMEOUT,
        }
    }

    /// Override how long `open()` scans for an unknown address.
    pub fn with_resolve_timeout(mut self, timeout: Duration) -> Self {
        self.resolve_timeout = timeout;
        self
    }

    async fn known_peripheral(&self, address: BDAddr) -> Result<Option<Peripheral>> {
        let peripherals = self.adapter.peripherals().await?;
        Ok(peripherals.into_iter().find(|p| p.address() == address))
    }

    /// Find the peripheral, scanning for it if the adapter does not know it.
    async fn find_peripheral(&self, address: BDAddr) -> Result<Option<Peripheral>> {
        if let Some(peripheral) = self.known_peripheral(address).await? {
            return Ok(Some(peripheral));
        }

        debug!("Scanning up to {:?} for {}", self.resolve_timeout, address);
        self.adapter.start_scan(ScanFilter::default()).await?;

        let found = tokio::time::timeout(self.resolve_timeout, async {
            loop {
                if let Some(peripheral) = self.known_peripheral(address).await? {
                    return Ok::<Peripheral, Error>(peripheral);
                }
                tokio::time::sleep(RESOLVE_POLL_INTERVAL).await;
            }
        })
        .await;

        if let Err(e) = self.adapter.stop_scan().await {
            debug!("Failed to stop scan: {}", e);
        }

        match found {
            Ok(Ok(peripheral)) => Ok(Some(peripheral)),
            Ok(Err(e)) => Err(e),
            Err(_elapsed) => Ok(None),
        }
    }
}

#[async_trait]
impl GattAdapter for BtleplugAdapter {
    async fn open(
        &self,
        address: &DeviceAddress,
        signals: SignalSender,
    ) -> Result<Box<dyn GattLink>> {
        let bd_addr = BDAddr::from_str(address.as_str()).map_err(|_| Error::InvalidAddress {
            address: address.to_string(),
        })?;

        let peripheral = self
            .find_peripheral(bd_addr)
            .await?
            .ok_or_else(|| Error::AddressResolution {
                address: address.to_string(),
            })?;

        debug!("Resolved {} as {:?}", address, peripheral.id());

        let link = BtleplugLink::new(peripheral, signals);
        link.forward_disconnects(&self.adapter).await?;
        link.request_connect();

        Ok(Box::new(link))
    }
}

/// An open link to a btleplug peripheral.
pub struct BtleplugLink {
    peripheral: Peripheral,
    signals: SignalSender,
    runtime: Handle,
    characteristics: Arc<RwLock<HashMap<Uuid, Characteristic>>>,
    values: Arc<RwLock<HashMap<Uuid, Vec<u8>>>>,
    routed: Arc<RwLock<HashSet<Uuid>>>,
    notification_pump: Mutex<Option<JoinHandle<()>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl BtleplugLink {
    fn new(peripheral: Peripheral, signals: SignalSender) -> Self {
        Self {
            peripheral,
            signals,
            runtime: Handle::current(),
            characteristics: Arc::new(RwLock::new(HashMap::new())),
            values: Arc::new(RwLock::new(HashMap::new())),
            routed: Arc::new(RwLock::new(HashSet::new())),
            notification_pump: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
        }
    }

    fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = self.runtime.spawn(future);
        let mut tasks = self.tasks.lock();
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
    }

    fn request_connect(&self) {
        let peripheral = self.peripheral.clone();
        let signals = self.signals.clone();

        self.spawn(async move {
            let (status, state) = match peripheral.connect().await {
                Ok(()) => (GattStatus::Success, LinkState::Connected),
                Err(e) => {
                    warn!("Link request failed: {}", e);
                    (GattStatus::Failure(GATT_FAILURE), LinkState::Disconnected)
                }
            };
            signals.send(GattSignal::LinkStateChanged { status, state });
        });
    }

    /// Report adapter-level disconnects of this peripheral as link signals.
    async fn forward_disconnects(&self, adapter: &Adapter) -> Result<()> {
        let mut events = adapter.events().await?;
        let id = self.peripheral.id();
        let signals = self.signals.clone();

        self.spawn(async move {
            while let Some(event) = events.next().await {
                if let CentralEvent::DeviceDisconnected(disconnected) = event {
                    if disconnected == id {
                        debug!("Adapter reported disconnect of {:?}", id);
                        signals.send(GattSignal::LinkStateChanged {
                            status: GattStatus::Success,
                            state: LinkState::Disconnected,
                        });
                    }
                }
                if signals.is_closed() {
                    break;
                }
            }
        });

        Ok(())
    }

    fn refresh_characteristics(
        peripheral: &Peripheral,
        cache: &RwLock<HashMap<Uuid, Characteristic>>,
    ) {
        let mut cache = cache.write();
        for characteristic in peripheral.characteristics() {
            cache.insert(characteristic.uuid, characteristic);
        }
    }

    fn characteristic(&self, uuid: Uuid) -> Result<Characteristic> {
        if let Some(characteristic) = self.characteristics.read().get(&uuid).cloned() {
            return Ok(characteristic);
        }

        Self::refresh_characteristics(&self.peripheral, &self.characteristics);

        self.characteristics
            .read()
            .get(&uuid)
            .cloned()
            .ok_or_else(|| Error::CharacteristicNotFound {
                uuid: uuid.to_string(),
            })
    }

    fn ensure_notification_pump(&self) {
        let mut pump = self.notification_pump.lock();
        if pump.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }

        let peripheral = self.peripheral.clone();
        let signals = self.signals.clone();
        let values = self.values.clone();
        let routed = self.routed.clone();

        *pump = Some(self.runtime.spawn(async move {
            let mut notifications = match peripheral.notifications().await {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("Failed to get notifications stream: {}", e);
                    return;
                }
            };

            while let Some(notification) = notifications.next().await {
                trace!(
                    "Notification from {}: {:02X?}",
                    notification.uuid,
                    notification.value
                );
                values
                    .write()
                    .insert(notification.uuid, notification.value.clone());

                if !routed.read().contains(&notification.uuid) {
                    continue;
                }

                let delivered = signals.send(GattSignal::CharacteristicChanged {
                    uuid: notification.uuid,
                    value: notification.value,
                });
                if !delivered {
                    break;
                }
            }

            debug!("Notification pump stopped");
        }));
    }
}

impl GattLink for BtleplugLink {
    fn discover_services(&self) -> Result<()> {
        let peripheral = self.peripheral.clone();
        let signals = self.signals.clone();
        let characteristics = self.characteristics.clone();

        self.spawn(async move {
            let status = match peripheral.discover_services().await {
                Ok(()) => {
                    Self::refresh_characteristics(&peripheral, &characteristics);
                    GattStatus::Success
                }
                Err(e) => {
                    warn!("Failed to discover services: {}", e);
                    GattStatus::Failure(GATT_FAILURE)
                }
            };
            signals.send(GattSignal::ServicesDiscovered { status });
        });

        Ok(())
    }

    fn services(&self) -> Vec<ServiceLayout> {
        self.peripheral
            .services()
            .iter()
            .map(|service| {
                let characteristics = service
                    .characteristics
                    .iter()
                    .map(|c| {
                        CharacteristicLayout::new(
                            c.uuid,
                            c.descriptors.iter().map(|d| d.uuid).collect(),
                        )
                    })
                    .collect();
                ServiceLayout::new(service.uuid, characteristics)
            })
            .collect()
    }

    fn read_characteristic(&self, uuid: Uuid) -> Result<()> {
        let characteristic = self.characteristic(uuid)?;
        let peripheral = self.peripheral.clone();
        let signals = self.signals.clone();
        let values = self.values.clone();

        self.spawn(async move {
            let (status, value) = match peripheral.read(&characteristic).await {
                Ok(value) => {
                    values.write().insert(uuid, value.clone());
                    (GattStatus::Success, value)
                }
                Err(e) => {
                    debug!("Read of {} failed: {}", uuid, e);
                    (GattStatus::Failure(GATT_FAILURE), Vec::new())
                }
            };
            signals.send(GattSignal::CharacteristicRead {
                uuid,
                status,
                value,
            });
        });

        Ok(())
    }

    fn characteristic_value(&self, uuid: Uuid) -> Option<Vec<u8>> {
        self.values.read().get(&uuid).cloned()
    }

    fn write_characteristic(&self, uuid: Uuid, value: Vec<u8>) -> Result<()> {
        let characteristic = self.characteristic(uuid)?;
        let peripheral = self.peripheral.clone();
        let signals = self.signals.clone();

        self.spawn(async move {
            let status = match peripheral
                .write(&characteristic, &value, WriteType::WithResponse)
                .await
            {
                Ok(()) => GattStatus::Success,
                Err(e) => {
                    warn!("Write to {} failed: {}", uuid, e);
                    GattStatus::Failure(GATT_FAILURE)
                }
            };
            signals.send(GattSignal::CharacteristicWritten { uuid, status });
        });

        Ok(())
    }

    fn set_notification_routing(&self, uuid: Uuid, enable: bool) -> Result<()> {
        self.characteristic(uuid)?;

        if enable {
            self.routed.write().insert(uuid);
            self.ensure_notification_pump();
        } else {
            self.routed.write().remove(&uuid);
        }

        Ok(())
    }

    fn write_descriptor(
        &self,
        characteristic: Uuid,
        descriptor: Uuid,
        value: Vec<u8>,
    ) -> Result<()> {
        let owner = self.characteristic(characteristic)?;
        let peripheral = self.peripheral.clone();
        let signals = self.signals.clone();

        // btleplug owns the client configuration descriptor through
        // subscribe/unsubscribe.
        if descriptor == CLIENT_CHARACTERISTIC_CONFIG_UUID {
            let enable = value.first().is_some_and(|flags| flags & 0x03 != 0);
            self.spawn(async move {
                let result = if enable {
                    peripheral.subscribe(&owner).await
                } else {
                    peripheral.unsubscribe(&owner).await
                };
                let status = match result {
                    Ok(()) => GattStatus::Success,
                    Err(e) => {
                        warn!(
                            "Client configuration write for {} failed: {}",
                            characteristic, e
                        );
                        GattStatus::Failure(GATT_FAILURE)
                    }
                };
                signals.send(GattSignal::DescriptorWritten {
                    characteristic,
                    descriptor,
                    status,
                });
            });
            return Ok(());
        }

        let target = owner
            .descriptors
            .iter()
            .find(|d| d.uuid == descriptor)
            .cloned()
            .ok_or_else(|| Error::DescriptorNotFound {
                uuid: characteristic.to_string(),
            })?;

        self.spawn(async move {
            let status = match peripheral.write_descriptor(&target, &value).await {
                Ok(()) => GattStatus::Success,
                Err(e) => {
                    warn!("Descriptor write {} failed: {}", descriptor, e);
                    GattStatus::Failure(GATT_FAILURE)
                }
            };
            signals.send(GattSignal::DescriptorWritten {
                characteristic,
                descriptor,
                status,
            });
        });

        Ok(())
    }

    fn disconnect(&self) -> Result<()> {
        let peripheral = self.peripheral.clone();
        let signals = self.signals.clone();

        // Not tracked: the request must survive close().
        self.runtime.spawn(async move {
            match peripheral.disconnect().await {
                Ok(()) => {
                    signals.send(GattSignal::LinkStateChanged {
                        status: GattStatus::Success,
                        state: LinkState::Disconnected,
                    });
                }
                Err(e) => warn!("Failed to disconnect: {}", e),
            }
        });

        Ok(())
    }

    fn close(&self) {
        let mut tasks = self.tasks.lock();
        for task in tasks.drain(..) {
            if task.is_finished() {
                continue;
            }
            task.abort();
        }
        if let Some(pump) = self.notification_pump.lock().take() {
            pump.abort();
        }
        self.routed.write().clear();
        debug!("Link to {:?} closed", self.peripheral.id());
    }
}

impl Drop for BtleplugLink {
    fn drop(&mut self) {
        self.close();
    }
}
