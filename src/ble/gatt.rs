//! Platform GATT abstraction.
//!
//! BLE stacks expose GATT as request/completion pairs: a request is either
//! accepted for dispatch or rejected on the spot, and its outcome arrives
//! later on a stack-owned callback thread. [`GattLink`] models the request
//! half and [`GattSignal`] the completion half. Completions are pushed into
//! the owning session's queue through a [`SignalSender`].

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::config::DeviceAddress;
use crate::error::Result;

/// Link state codes as used by the platform BLE profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum LinkState {
    /// No link.
    Disconnected,
    /// Link being established.
    Connecting,
    /// Link up.
    Connected,
    /// Link being torn down.
    Disconnecting,
}

impl LinkState {
    /// Numeric profile state code (0-3).
    pub fn code(&self) -> u8 {
        match self {
            Self::Disconnected => 0,
            Self::Connecting => 1,
            Self::Connected => 2,
            Self::Disconnecting => 3,
        }
    }

    /// Parse a numeric profile state code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Disconnected),
            1 => Some(Self::Connecting),
            2 => Some(Self::Connected),
            3 => Some(Self::Disconnecting),
            _ => None,
        }
    }
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Disconnecting => write!(f, "Disconnecting"),
        }
    }
}

/// Outcome of a completed GATT operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GattStatus {
    /// The operation succeeded.
    Success,
    /// The operation failed with a stack-specific code.
    Failure(u16),
}

impl GattStatus {
    /// Check if the operation succeeded.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Asynchronous completions delivered by the platform.
#[derive(Debug, Clone, PartialEq)]
pub enum GattSignal {
    /// The link state changed.
    LinkStateChanged {
        /// Status of the operation that caused the change.
        status: GattStatus,
        /// The new link state.
        state: LinkState,
    },
    /// Service discovery finished.
    ServicesDiscovered {
        /// Whether discovery succeeded.
        status: GattStatus,
    },
    /// The peripheral pushed a new characteristic value.
    CharacteristicChanged {
        /// Characteristic that changed.
        uuid: Uuid,
        /// New value.
        value: Vec<u8>,
    },
    /// A characteristic read finished.
    CharacteristicRead {
        /// Characteristic that was read.
        uuid: Uuid,
        /// Outcome of the read.
        status: GattStatus,
        /// Value read, empty on failure.
        value: Vec<u8>,
    },
    /// A characteristic write finished.
    CharacteristicWritten {
        /// Characteristic that was written.
        uuid: Uuid,
        /// Outcome of the write.
        status: GattStatus,
    },
    /// A descriptor write finished.
    DescriptorWritten {
        /// Characteristic owning the descriptor.
        characteristic: Uuid,
        /// Descriptor that was written.
        descriptor: Uuid,
        /// Outcome of the write.
        status: GattStatus,
    },
}

/// Characteristic as laid out on the connected device.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CharacteristicLayout {
    /// Characteristic UUID.
    pub uuid: Uuid,
    /// Descriptor UUIDs, in the order the stack reported them.
    pub descriptors: Vec<Uuid>,
}

impl CharacteristicLayout {
    /// Create a characteristic layout.
    pub fn new(uuid: Uuid, descriptors: Vec<Uuid>) -> Self {
        Self { uuid, descriptors }
    }
}

/// Service as laid out on the connected device.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceLayout {
    /// Service UUID.
    pub uuid: Uuid,
    /// Characteristics of the service.
    pub characteristics: Vec<CharacteristicLayout>,
}

impl ServiceLayout {
    /// Create a service layout.
    pub fn new(uuid: Uuid, characteristics: Vec<CharacteristicLayout>) -> Self {
        Self {
            uuid,
            characteristics,
        }
    }

    /// Find a characteristic by UUID.
    pub fn characteristic(&self, uuid: &Uuid) -> Option<&CharacteristicLayout> {
        self.characteristics.iter().find(|c| c.uuid == *uuid)
    }
}

/// Internal queue item for a session.
#[derive(Debug)]
pub(crate) enum SessionEvent {
    Signal(GattSignal),
    DiscoveryDue,
    DisconnectRequested,
    TeardownDue,
}

/// Hands platform completions to a session.
///
/// Once the session has ended, sends are dropped.
#[derive(Debug, Clone)]
pub struct SignalSender {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl SignalSender {
    pub(crate) fn new(tx: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self { tx }
    }

    /// Deliver a signal. Returns `false` if the session is gone.
    pub fn send(&self, signal: GattSignal) -> bool {
        self.tx.send(SessionEvent::Signal(signal)).is_ok()
    }

    /// Whether the receiving session has ended.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// An open GATT link to one peripheral.
///
/// Every method only dispatches: `Ok(())` means the stack accepted the
/// request, not that it completed. Completions arrive as [`GattSignal`]s.
#[cfg_attr(test, mockall::automock)]
pub trait GattLink: Send + Sync {
    /// Request service discovery.
    fn discover_services(&self) -> Result<()>;

    /// Services known after discovery.
    fn services(&self) -> Vec<ServiceLayout>;

    /// Request a characteristic read.
    fn read_characteristic(&self, uuid: Uuid) -> Result<()>;

    /// The value the stack currently holds for a characteristic.
    fn characteristic_value(&self, uuid: Uuid) -> Option<Vec<u8>>;

    /// Request a characteristic write (with response).
    fn write_characteristic(&self, uuid: Uuid, value: Vec<u8>) -> Result<()>;

    /// Locally route value-changed signals for a characteristic on or off.
    fn set_notification_routing(&self, uuid: Uuid, enable: bool) -> Result<()>;

    /// Request a descriptor write.
    fn write_descriptor(&self, characteristic: Uuid, descriptor: Uuid, value: Vec<u8>)
        -> Result<()>;

    /// Request link teardown. Confirmation arrives as a link state signal.
    fn disconnect(&self) -> Result<()>;

    /// Release all platform resources held by the link.
    fn close(&self);
}

/// Platform Bluetooth adapter.
#[async_trait]
pub trait GattAdapter: Send + Sync {
    /// Resolve an address and request a link to it.
    ///
    /// Returns once the link request has been dispatched; the outcome is
    /// reported through `signals` as a [`GattSignal::LinkStateChanged`].
    ///
    /// # Errors
    ///
    /// [`Error::InvalidAddress`](crate::Error::InvalidAddress) or
    /// [`Error::AddressResolution`](crate::Error::AddressResolution) if the
    /// address cannot be turned into a device, or any adapter error that
    /// prevents the request from being dispatched.
    async fn open(
        &self,
        address: &DeviceAddress,
        signals: SignalSender,
    ) -> Result<Box<dyn GattLink>>;
}
