//! Protocol module for characteristic payloads.
//!
//! This module contains the wire format conversions for the roaster's
//! bean temperature and duty cycle characteristics.

pub mod codec;

pub use codec::{
    decode_duty_cycle, decode_temperature, encode_duty_cycle, is_valid_duty_cycle,
    truncate_duty_cycle, DUTY_CYCLE_MAX, DUTY_CYCLE_MIN,
};
