//! BLE communication module.
//!
//! This module provides the GATT plumbing for the roaster: the platform
//! abstraction, the connection state machine, notification arming and the
//! btleplug-backed adapter.

pub mod connection;
pub mod gatt;
pub mod notifications;
pub mod platform;
pub mod uuids;

pub use connection::{ConnectionState, ConnectionStateMachine};
pub use gatt::{
    CharacteristicLayout, GattAdapter, GattLink, GattSignal, GattStatus, LinkState,
    ServiceLayout, SignalSender,
};
pub use notifications::NotificationSubscriber;
pub use platform::{BtleplugAdapter, BtleplugLink};
pub use uuids::*;
