//! Last-known roaster readings.
//!
//! The cache outlives individual connections so that reads made while the
//! roaster is unreachable still return the most recent real values.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::{trace, warn};

use crate::error::{Error, Result};
use crate::protocol::is_valid_duty_cycle;

/// A copy of the cached readings.
///
/// Values are `0.0` until the first reading of each kind is observed; the
/// `*_observed_at` fields tell the two cases apart.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ReadingSnapshot {
    /// Bean temperature in degrees Celsius.
    pub temperature_celsius: f64,
    /// Heater duty cycle in percent, always within `[0, 100]`.
    pub duty_cycle_percent: f64,
    /// When the temperature was last observed.
    pub temperature_observed_at: Option<DateTime<Utc>>,
    /// When the duty cycle was last observed or confirmed.
    pub duty_cycle_observed_at: Option<DateTime<Utc>>,
}

impl ReadingSnapshot {
    /// Whether a bean temperature has ever been observed.
    pub fn has_temperature(&self) -> bool {
        self.temperature_observed_at.is_some()
    }

    /// Whether a duty cycle has ever been observed.
    pub fn has_duty_cycle(&self) -> bool {
        self.duty_cycle_observed_at.is_some()
    }
}

/// Thread-safe store for the last valid readings.
#[derive(Debug, Default)]
pub struct ValueCache {
    snapshot: RwLock<ReadingSnapshot>,
}

impl ValueCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the current readings.
    pub fn snapshot(&self) -> ReadingSnapshot {
        *self.snapshot.read()
    }

    /// Last known bean temperature.
    pub fn temperature_celsius(&self) -> f64 {
        self.snapshot.read().temperature_celsius
    }

    /// Last known duty cycle.
    pub fn duty_cycle_percent(&self) -> f64 {
        self.snapshot.read().duty_cycle_percent
    }

    /// Record a bean temperature and return the updated snapshot.
    pub fn set_temperature(&self, celsius: f64) -> ReadingSnapshot {
        let mut snapshot = self.snapshot.write();
        snapshot.temperature_celsius = celsius;
        snapshot.temperature_observed_at = Some(Utc::now());
        trace!("Cached bean temperature {:.1}°C", celsius);
        *snapshot
    }

    /// Record a duty cycle.
    ///
    /// # Errors
    ///
    /// Values outside `[0, 100]` are rejected and leave the cache untouched.
    pub fn set_duty_cycle(&self, percent: f64) -> Result<ReadingSnapshot> {
        if !is_valid_duty_cycle(percent) {
            warn!("Ignoring out-of-range duty cycle {}", percent);
            return Err(Error::InvalidParameter {
                name: "duty_cycle".to_string(),
                value: percent.to_string(),
            });
        }

        let mut snapshot = self.snapshot.write();
        snapshot.duty_cycle_percent = percent;
        snapshot.duty_cycle_observed_at = Some(Utc::now());
        trace!("Cached duty cycle {}%", percent);
        Ok(*snapshot)
    }
}
