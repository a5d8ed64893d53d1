//! # roaster-ble
//!
//! A Rust driver for ESP32-based coffee roasters reachable over Bluetooth
//! Low Energy.
//!
//! The roaster exposes one custom GATT service with two characteristics:
//! bean temperature (read, notify) and heater duty cycle (read, write).
//! This crate manages the connection lifecycle, arms temperature
//! notifications, and keeps the last known readings so that reads still
//! answer while the roaster is out of reach.
//!
//! ## Features
//!
//! - **Connection lifecycle**: link, delayed service discovery and readiness,
//!   driven by a single session task
//! - **Push updates**: bean temperature notifications fanned out to listeners
//! - **Cached readings**: last known temperature and duty cycle survive
//!   disconnects
//! - **Duty cycle control**: range-checked writes with optimistic caching
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use roaster_ble::{Roaster, RoasterConfig, RoasterEvent, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let roaster = Roaster::with_platform_adapter(RoasterConfig::default()).await?;
//!
//!     let listener = Arc::new(|event: &RoasterEvent| {
//!         println!("Bean temperature: {:.0}°C", event.temperature_celsius);
//!     });
//!     roaster.subscribe(&listener);
//!
//!     if roaster.connect().await {
//!         tokio::time::sleep(std::time::Duration::from_secs(5)).await;
//!         roaster.set_duty_cycle(60.0);
//!     }
//!
//!     roaster.disconnect();
//!     Ok(())
//! }
//! ```
//!
//! ## Platform Notes
//!
//! ### macOS
//! Requires Bluetooth permission. Add `NSBluetoothAlwaysUsageDescription`
//! to your Info.plist for bundled apps.
//!
//! ### Linux
//! Requires BlueZ. User may need to be in the `bluetooth` group.
//!
//! ### Windows
//! Requires Windows 10 or later with Bluetooth LE support.
//!
//! ## Feature Flags
//!
//! - `serde`: Enable serialization/deserialization for events and snapshots

// Public modules
pub mod ble;
pub mod config;
pub mod data;
pub mod error;
pub mod events;
pub mod protocol;
pub mod roaster;

// Re-exports for convenience
pub use config::{DeviceAddress, RoasterConfig, DEFAULT_DEVICE_ADDRESS};
pub use error::{Error, Result};
pub use roaster::Roaster;

pub use ble::connection::ConnectionState;
pub use ble::gatt::{GattAdapter, GattLink, GattSignal, GattStatus, LinkState, SignalSender};
pub use ble::platform::BtleplugAdapter;
pub use data::{ReadingSnapshot, ValueCache};
pub use events::{
    ConnectionEvent, ConnectionListener, DisconnectReason, EventDispatcher, RoasterEvent,
    RoasterEventListener,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_exports() {
        // Verify that key types are exported
        let _ = std::any::TypeId::of::<Roaster>();
        let _ = std::any::TypeId::of::<RoasterConfig>();
        let _ = std::any::TypeId::of::<Error>();
        let _ = std::any::TypeId::of::<RoasterEvent>();
        let _ = std::any::TypeId::of::<ConnectionEvent>();
        let _ = std::any::TypeId::of::<ReadingSnapshot>();
    }
}
