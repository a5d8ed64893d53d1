//! Characteristic notification arming.
//!
//! Enabling push updates takes two steps: route value-changed signals for
//! the characteristic locally, then write the enable marker to the
//! characteristic's client configuration descriptor on the peripheral. The
//! descriptor write completes asynchronously and is not awaited here.

use tracing::{debug, warn};

use crate::ble::gatt::{CharacteristicLayout, GattLink};
use crate::ble::uuids::CLIENT_CHARACTERISTIC_CONFIG_UUID;
use crate::error::{Error, Result};

/// Client configuration value enabling notifications.
pub const ENABLE_NOTIFICATION_VALUE: [u8; 2] = [0x01, 0x00];
/// Client configuration value disabling notifications and indications.
pub const DISABLE_NOTIFICATION_VALUE: [u8; 2] = [0x00, 0x00];

/// Arms and disarms characteristic notifications.
pub struct NotificationSubscriber;

impl NotificationSubscriber {
    /// Enable notifications. See [`NotificationSubscriber::set_notification`].
    pub fn arm(link: &dyn GattLink, characteristic: &CharacteristicLayout) -> bool {
        Self::set_notification(link, characteristic, true)
    }

    /// Disable notifications. See [`NotificationSubscriber::set_notification`].
    pub fn disarm(link: &dyn GattLink, characteristic: &CharacteristicLayout) -> bool {
        Self::set_notification(link, characteristic, false)
    }

    /// Enable or disable notifications for a characteristic.
    ///
    /// Returns `true` if both the local routing change and the descriptor
    /// write were accepted by the stack. This does not mean the peripheral
    /// acknowledged the descriptor write.
    pub fn set_notification(
        link: &dyn GattLink,
        characteristic: &CharacteristicLayout,
        enable: bool,
    ) -> bool {
        debug!(
            "set_notification({}) for characteristic {}",
            enable, characteristic.uuid
        );

        match Self::try_set_notification(link, characteristic, enable) {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    "Could not {} notifications for {}: {}",
                    if enable { "enable" } else { "disable" },
                    characteristic.uuid,
                    e
                );
                false
            }
        }
    }

    fn try_set_notification(
        link: &dyn GattLink,
        characteristic: &CharacteristicLayout,
        enable: bool,
    ) -> Result<()> {
        link.set_notification_routing(characteristic.uuid, enable)?;

        let descriptor = Self::config_descriptor(characteristic)?;
        let value = if enable {
            ENABLE_NOTIFICATION_VALUE
        } else {
            DISABLE_NOTIFICATION_VALUE
        };

        link.write_descriptor(characteristic.uuid, descriptor, value.to_vec())
    }

    /// The client configuration descriptor, or the first descriptor if the
    /// firmware does not advertise the standard one.
    fn config_descriptor(characteristic: &CharacteristicLayout) -> Result<uuid::Uuid> {
        characteristic
            .descriptors
            .iter()
            .find(|d| **d == CLIENT_CHARACTERISTIC_CONFIG_UUID)
            .or_else(|| characteristic.descriptors.first())
            .copied()
            .ok_or_else(|| Error::DescriptorNotFound {
                uuid: characteristic.uuid.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::gatt::MockGattLink;
    use crate::ble::uuids::BEAN_TEMPERATURE_CHARACTERISTIC_UUID;
    use mockall::predicate::eq;
    use uuid::Uuid;

    fn temperature_characteristic(descriptors: Vec<Uuid>) -> CharacteristicLayout {
        CharacteristicLayout::new(BEAN_TEMPERATURE_CHARACTERISTIC_UUID, descriptors)
    }

    #[test]
    fn test_arm_routes_then_writes_enable_marker() {
        let mut link = MockGattLink::new();
        let mut seq = mockall::Sequence::new();

        link.expect_set_notification_routing()
            .with(eq(BEAN_TEMPERATURE_CHARACTERISTIC_UUID), eq(true))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        link.expect_write_descriptor()
            .with(
                eq(BEAN_TEMPERATURE_CHARACTERISTIC_UUID),
                eq(CLIENT_CHARACTERISTIC_CONFIG_UUID),
                eq(vec![0x01, 0x00]),
            )
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(()));

        let characteristic = temperature_characteristic(vec![CLIENT_CHARACTERISTIC_CONFIG_UUID]);
        assert!(NotificationSubscriber::arm(&link, &characteristic));
    }

    #[test]
    fn test_disarm_writes_disable_marker() {
        let mut link = MockGattLink::new();
        link.expect_set_notification_routing()
            .with(eq(BEAN_TEMPERATURE_CHARACTERISTIC_UUID), eq(false))
            .returning(|_, _| Ok(()));
        link.expect_write_descriptor()
            .withf(|_, _, value| value == &vec![0x00, 0x00])
            .times(1)
            .returning(|_, _, _| Ok(()));

        let characteristic = temperature_characteristic(vec![CLIENT_CHARACTERISTIC_CONFIG_UUID]);
        assert!(NotificationSubscriber::disarm(&link, &characteristic));
    }

    #[test]
    fn test_falls_back_to_first_descriptor() {
        let custom = Uuid::from_u128(0xabcd);
        let mut link = MockGattLink::new();
        link.expect_set_notification_routing()
            .returning(|_, _| Ok(()));
        link.expect_write_descriptor()
            .with(
                eq(BEAN_TEMPERATURE_CHARACTERISTIC_UUID),
                eq(custom),
                eq(vec![0x01, 0x00]),
            )
            .times(1)
            .returning(|_, _, _| Ok(()));

        let characteristic = temperature_characteristic(vec![custom]);
        assert!(NotificationSubscriber::arm(&link, &characteristic));
    }

    #[test]
    fn test_routing_failure_skips_descriptor_write() {
        let mut link = MockGattLink::new();
        link.expect_set_notification_routing()
            .returning(|_, _| Err(Error::dispatch("notification routing", "rejected")));
        link.expect_write_descriptor().never();

        let characteristic = temperature_characteristic(vec![CLIENT_CHARACTERISTIC_CONFIG_UUID]);
        assert!(!NotificationSubscriber::arm(&link, &characteristic));
    }

    #[test]
    fn test_descriptor_dispatch_failure() {
        let mut link = MockGattLink::new();
        link.expect_set_notification_routing()
            .returning(|_, _| Ok(()));
        link.expect_write_descriptor()
            .returning(|_, _, _| Err(Error::dispatch("descriptor write", "busy")));

        let characteristic = temperature_characteristic(vec![CLIENT_CHARACTERISTIC_CONFIG_UUID]);
        assert!(!NotificationSubscriber::arm(&link, &characteristic));
    }

    #[test]
    fn test_missing_descriptor() {
        let mut link = MockGattLink::new();
        link.expect_set_notification_routing()
            .returning(|_, _| Ok(()));
        link.expect_write_descriptor().never();

        let characteristic = temperature_characteristic(vec![]);
        assert!(!NotificationSubscriber::arm(&link, &characteristic));
    }
}
