//! Driver configuration.
//!
//! The device address identifies the roaster; the timing values tune the
//! connection lifecycle around platform quirks.

use std::fmt;
use std::time::Duration;

use crate::error::{Error, Result};

/// Hardware address of the reference ESP32 roaster board.
pub const DEFAULT_DEVICE_ADDRESS: &str = "3C:61:05:16:C8:36";

/// Delay between link establishment and the service discovery request.
///
/// Some BLE stacks silently drop the discovery completion if discovery is
/// requested straight from the link-established callback.
pub const DEFAULT_DISCOVERY_DELAY: Duration = Duration::from_secs(1);

/// How long an explicit disconnect waits for link teardown confirmation.
pub const DEFAULT_TEARDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Immutable hardware address of the target peripheral. Never empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceAddress(String);

impl DeviceAddress {
    /// Create a device address.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfiguration`] if the address is empty or
    /// only whitespace. Whether the platform can resolve the address is only
    /// known at connect time.
    pub fn new(address: impl Into<String>) -> Result<Self> {
        let address = address.into();
        let trimmed = address.trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidConfiguration {
                reason: "device address must not be empty".to_string(),
            });
        }
        Ok(Self(trimmed.to_string()))
    }

    /// The address as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for DeviceAddress {
    fn default() -> Self {
        Self(DEFAULT_DEVICE_ADDRESS.to_string())
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Configuration for a [`Roaster`](crate::Roaster).
#[derive(Debug, Clone)]
pub struct RoasterConfig {
    /// Target peripheral.
    pub address: DeviceAddress,
    /// Delay after link establishment before requesting service discovery.
    pub discovery_delay: Duration,
    /// Grace period for teardown confirmation after an explicit disconnect.
    pub teardown_timeout: Duration,
    /// Request a duty cycle read whenever a temperature notification arrives.
    pub refresh_duty_cycle_on_notify: bool,
}

impl RoasterConfig {
    /// Create a configuration for the given address with default timings.
    pub fn new(address: impl Into<String>) -> Result<Self> {
        Ok(Self {
            address: DeviceAddress::new(address)?,
            ..Self::default()
        })
    }

    /// Override the post-connect discovery delay.
    pub fn with_discovery_delay(mut self, delay: Duration) -> Self {
        self.discovery_delay = delay;
        self
    }

    /// Override the teardown confirmation timeout.
    pub fn with_teardown_timeout(mut self, timeout: Duration) -> Self {
        self.teardown_timeout = timeout;
        self
    }

    /// Enable or disable the duty cycle refresh on temperature notifications.
    pub fn with_duty_cycle_refresh(mut self, enabled: bool) -> Self {
        self.refresh_duty_cycle_on_notify = enabled;
        self
    }
}

impl Default for RoasterConfig {
    fn default() -> Self {
        Self {
            address: DeviceAddress::default(),
            discovery_delay: DEFAULT_DISCOVERY_DELAY,
            teardown_timeout: DEFAULT_TEARDOWN_TIMEOUT,
            refresh_duty_cycle_on_notify: true,
        }
    }
}
