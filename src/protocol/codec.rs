//! Characteristic payload encoding and decoding.
//!
//! The roaster firmware uses two wire formats:
//! - Bean temperature: a single unsigned byte, whole degrees Celsius.
//! - Duty cycle: an ASCII decimal string in `[0, 100]`. Writes only carry the
//!   integer part.

use crate::error::{Error, Result};

/// Lowest accepted duty cycle, in percent.
pub const DUTY_CYCLE_MIN: f64 = 0.0;
/// Highest accepted duty cycle, in percent.
pub const DUTY_CYCLE_MAX: f64 = 100.0;

/// Check whether a duty cycle lies in `[0, 100]`. NaN is never valid.
#[inline]
pub fn is_valid_duty_cycle(percent: f64) -> bool {
    (DUTY_CYCLE_MIN..=DUTY_CYCLE_MAX).contains(&percent)
}

/// The value a duty cycle write actually applies: the integer part.
#[inline]
pub fn truncate_duty_cycle(percent: f64) -> f64 {
    percent.trunc()
}

/// Decode a bean temperature payload.
///
/// Only the first byte is significant; it is read as an unsigned 8-bit
/// integer with no calibration applied.
///
/// # Example
///
/// ```
/// use roaster_ble::protocol::decode_temperature;
///
/// assert_eq!(decode_temperature(&[200]).unwrap(), 200.0);
/// ```
pub fn decode_temperature(payload: &[u8]) -> Result<f64> {
    payload
        .first()
        .map(|&raw| f64::from(raw))
        .ok_or_else(|| Error::InvalidData {
            context: "Empty bean temperature payload".to_string(),
        })
}

/// Decode a duty cycle payload (UTF-8 decimal string).
///
/// Surrounding whitespace and NUL padding are ignored. Range is not checked
/// here.
pub fn decode_duty_cycle(payload: &[u8]) -> Result<f64> {
    let text = std::str::from_utf8(payload).map_err(|_| Error::InvalidData {
        context: format!("Duty cycle payload is not UTF-8: {:02X?}", payload),
    })?;

    let text = text.trim_matches(|c: char| c.is_whitespace() || c == '\0');

    text.parse::<f64>().map_err(|_| Error::InvalidData {
        context: format!("Cannot parse duty cycle from {:?}", text),
    })
}

/// Encode a duty cycle for writing.
///
/// The fractional part is discarded: `57.9` is sent as `"57"`.
///
/// # Errors
///
/// Returns [`Error::InvalidParameter`] if the value is outside `[0, 100]`.
///
/// # Example
///
/// ```
/// use roaster_ble::protocol::encode_duty_cycle;
///
/// assert_eq!(encode_duty_cycle(57.9).unwrap(), b"57".to_vec());
/// assert!(encode_duty_cycle(150.0).is_err());
/// ```
pub fn encode_duty_cycle(percent: f64) -> Result<Vec<u8>> {
    if !is_valid_duty_cycle(percent) {
        return Err(Error::InvalidParameter {
            name: "duty_cycle".to_string(),
            value: percent.to_string(),
        });
    }

    Ok((truncate_duty_cycle(percent) as u8).to_string().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_decode_temperature_uses_first_byte() {
        assert_eq!(decode_temperature(&[0]).unwrap(), 0.0);
        assert_eq!(decode_temperature(&[255]).unwrap(), 255.0);
        assert_eq!(decode_temperature(&[180, 0x7F, 0x01]).unwrap(), 180.0);
    }

    #[test]
    fn test_decode_temperature_empty() {
        assert!(matches!(
            decode_temperature(&[]),
            Err(Error::InvalidData { .. })
        ));
    }

    #[test]
    fn test_decode_duty_cycle() {
        assert_eq!(decode_duty_cycle(b"57").unwrap(), 57.0);
        assert_eq!(decode_duty_cycle(b"42.5").unwrap(), 42.5);
        assert_eq!(decode_duty_cycle(b" 100\0").unwrap(), 100.0);
    }

    #[test]
    fn test_decode_duty_cycle_failures() {
        assert!(decode_duty_cycle(b"").is_err());
        assert!(decode_duty_cycle(b"abc").is_err());
        assert!(decode_duty_cycle(&[0xFF, 0xFE]).is_err());
    }

    #[test]
    fn test_encode_duty_cycle_bounds() {
        assert_eq!(encode_duty_cycle(0.0).unwrap(), b"0".to_vec());
        assert_eq!(encode_duty_cycle(100.0).unwrap(), b"100".to_vec());
        assert!(encode_duty_cycle(-0.1).is_err());
        assert!(encode_duty_cycle(100.01).is_err());
        assert!(encode_duty_cycle(f64::NAN).is_err());
    }

    proptest! {
        #[test]
        fn prop_temperature_is_first_byte(bytes in proptest::collection::vec(any::<u8>(), 1..8)) {
            prop_assert_eq!(decode_temperature(&bytes).unwrap(), f64::from(bytes[0]));
        }

        #[test]
        fn prop_encode_truncates(percent in 0.0f64..=100.0) {
            let encoded = encode_duty_cycle(percent).unwrap();
            let decoded = decode_duty_cycle(&encoded).unwrap();
            prop_assert_eq!(decoded, percent.floor());
        }

        #[test]
        fn prop_encode_rejects_out_of_range(percent in prop_oneof![-1.0e6f64..-0.0001, 100.0001f64..1.0e6]) {
            prop_assert!(encode_duty_cycle(percent).is_err());
        }
    }
}
