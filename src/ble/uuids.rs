//! BLE Service and Characteristic UUIDs.
//!
//! Contains all UUID constants used for coffee roaster communication.

use uuid::Uuid;

// Coffee Roaster Service (ESP32 firmware, custom)
/// Coffee roaster GATT service UUID.
pub const COFFEE_ROASTER_SERVICE_UUID: Uuid =
    Uuid::from_u128(0x91bad492_b950_4226_aa2b_4ede9fa42f59);
/// Bean temperature characteristic UUID (Read, Notify).
pub const BEAN_TEMPERATURE_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0xcba1d466_344c_4be3_ab3f_189f80dd7518);
/// Heater duty cycle characteristic UUID (Read, Write).
pub const DUTY_CYCLE_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0xca73b3ba_39f6_4ab3_91ae_186dc9577d99);

// Standard descriptors
/// Client Characteristic Configuration Descriptor UUID (0x2902).
pub const CLIENT_CHARACTERISTIC_CONFIG_UUID: Uuid =
    Uuid::from_u128(0x0000_2902_0000_1000_8000_00805f9b34fb);

/// Check if a characteristic UUID belongs to the coffee roaster service.
pub fn is_roaster_characteristic(uuid: &Uuid) -> bool {
    *uuid == BEAN_TEMPERATURE_CHARACTERISTIC_UUID || *uuid == DUTY_CYCLE_CHARACTERISTIC_UUID
}
