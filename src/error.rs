//! Error types for the roaster-ble crate.

use thiserror::Error;

/// The main error type for this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// Bluetooth-related error from the underlying BLE library.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Bluetooth is not available or is disabled on this system.
    #[error("Bluetooth not available or disabled")]
    BluetoothUnavailable,

    /// The driver was configured with values it cannot work with.
    #[error("Invalid configuration: {reason}")]
    InvalidConfiguration {
        /// What was wrong with the configuration.
        reason: String,
    },

    /// The device address is not a well-formed hardware address.
    #[error("Invalid device address: {address}")]
    InvalidAddress {
        /// The address as configured.
        address: String,
    },

    /// The platform could not find a peripheral with the configured address.
    #[error("Device not found with address {address}")]
    AddressResolution {
        /// The address that could not be resolved.
        address: String,
    },

    /// Operation requires a connection but the roaster is not connected.
    #[error("Roaster not connected")]
    NotConnected,

    /// The connected device does not expose the coffee roaster service.
    #[error("Coffee roaster service not found: {uuid}")]
    ServiceNotFound {
        /// The UUID of the service that was not found.
        uuid: String,
    },

    /// Characteristic not found on the device.
    #[error("Characteristic not found: {uuid}")]
    CharacteristicNotFound {
        /// The UUID of the characteristic that was not found.
        uuid: String,
    },

    /// Descriptor not found on a characteristic.
    #[error("Descriptor not found on characteristic {uuid}")]
    DescriptorNotFound {
        /// The UUID of the characteristic that has no usable descriptor.
        uuid: String,
    },

    /// Invalid data was received from the roaster.
    #[error("Invalid data received: {context}")]
    InvalidData {
        /// Description of what was invalid about the data.
        context: String,
    },

    /// The platform stack refused to start a GATT request.
    #[error("Failed to dispatch {operation}: {reason}")]
    DispatchFailed {
        /// The request that was rejected.
        operation: String,
        /// Why the stack rejected it.
        reason: String,
    },

    /// An invalid parameter was provided.
    #[error("Invalid parameter: {name} = {value}")]
    InvalidParameter {
        /// The name of the parameter.
        name: String,
        /// The invalid value that was provided.
        value: String,
    },

    /// A registered listener panicked while handling an event.
    #[error("Listener fault: {message}")]
    ListenerFault {
        /// The panic message, if one could be recovered.
        message: String,
    },
}

impl Error {
    /// Shorthand for a [`Error::DispatchFailed`].
    pub fn dispatch(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::DispatchFailed {
            operation: operation.into(),
            reason: reason.into(),
        }
    }
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
