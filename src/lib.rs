//! # PWM controller for the BCM283x
//!
//! Drives the PWM block of the BCM2835/6/7 (Raspberry Pi 1 to 3): the PWM
//! clock divider, the range and data registers of both outputs and the pin
//! multiplexer. A channel produces one of three kinds of output:
//!
//! - `pwm`: free duty cycle and frequency, derived from a maximum common
//!   frequency (mcf) the clock is divided down to,
//! - `servo`: 20 ms pulses whose width follows a servo position,
//! - `audio`: the pin is only routed to the PWM block for an audio driver.
//!
//! Every parameter can be read and written through the [`Controller`], either
//! typed or as text attributes. All operations share one lock, so hardware
//! reprogramming is never interleaved.
//!
//! # Usage
//!
//! ```
//! use bcm283x_pwm::pwm::{pwm_range_data, servo_range_data};
//! use bcm283x_pwm::clock::{compute_clock, REFERENCE_CLOCK};
//! use bcm283x_pwm::prelude::*;
//!
//! let clock = compute_clock(REFERENCE_CLOCK, 16_000_u32.Hz()).unwrap();
//! assert_eq!(clock.divisor, 1200);
//!
//! let pwm = pwm_range_data(16_000_u32.Hz(), 50_u32.Hz(), 50).unwrap();
//! assert_eq!((pwm.range, pwm.data), (320, 160));
//!
//! let servo = servo_range_data(16, 32).unwrap();
//! assert_eq!((servo.range, servo.data), (320, 24));
//! ```
//!
//! On bare metal the registers are reached through
//! [`registers::IdentityMapper`]; hosted environments implement
//! [`registers::Mapper`] over their own memory mapping.
//!
//! The `critical-section-impl` feature (default) provides the single-core
//! critical section of `cortex-m`. Disable it when the application supplies
//! its own implementation.

#![cfg_attr(not(test), no_std)]

#[macro_use]
mod fmt;

pub mod attribute;
pub mod channel;
pub mod clock;
pub mod controller;
pub mod delay;
pub mod error;
pub mod gpio;
pub mod pwm;
pub mod registers;

pub use controller::{Controller, ControllerConfig};
pub use error::{Error, Result};

/// Crate prelude
pub mod prelude {
    pub use crate::attribute::Attribute;
    pub use crate::channel::{ChannelConfig, ChannelSettings, Policy};
    pub use crate::pwm::{Mode, PwmOutput};
    pub use embedded_time::rate::Extensions;
}
