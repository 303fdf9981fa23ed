//! Pulse Width Modulation
//!
//! Register values for the three output disciplines, and the control-register
//! sequence that stops and starts an output.
//!
//! An output is programmed with two registers: the range (period length in
//! PWM clock ticks) and the data (high time in ticks). Mark-space mode (MSEN)
//! is always used, so the output is high for `data` ticks out of every
//! `range`.
//!
//! ```
//! use bcm283x_pwm::pwm::{pwm_range_data, RangeData};
//! use bcm283x_pwm::prelude::*;
//!
//! let regs = pwm_range_data(16_000_u32.Hz(), 50_u32.Hz(), 50).unwrap();
//! assert_eq!(regs, RangeData { range: 320, data: 160 });
//! ```

use core::fmt;

use embedded_hal::delay::DelayNs;
use embedded_time::rate::Hertz;

use crate::{
    delay::SettleDelay,
    error::Bound,
    registers::{self, RegisterWindow, Registers, Window},
    Error, Result,
};

/// Fixed clock used for servo pulses: 320 ticks of 62.5 us per 20 ms period
pub const SERVO_MCF: Hertz = Hertz(16_000);
/// Fixed servo pulse repetition rate
pub const SERVO_FREQUENCY: Hertz = Hertz(50);

/// Output discipline of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Mode {
    /// Free duty cycle and frequency
    Pwm,
    /// 20 ms period, pulse width set by an angle
    Servo,
    /// Pin routed to the PWM block for audio playback; no register programming
    Audio,
}

impl Mode {
    pub const ALL: [Mode; 3] = [Mode::Pwm, Mode::Servo, Mode::Audio];

    pub const fn as_str(self) -> &'static str {
        match self {
            Mode::Pwm => "pwm",
            Mode::Servo => "servo",
            Mode::Audio => "audio",
        }
    }

    /// Looks a mode up by its exact name
    pub fn from_name(name: &str) -> Result<Mode> {
        Mode::ALL
            .iter()
            .copied()
            .find(|mode| mode.as_str() == name)
            .ok_or(Error::NotFound)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Range and data register pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeData {
    pub range: u32,
    pub data: u32,
}

impl RangeData {
    fn checked(range: u64, data: u64) -> Result<Self> {
        if range < 1 {
            log_error!("RNG is out of range: {}<1", range);
            return Err(Error::OutOfRange(Bound::Range));
        }
        if data < 1 {
            log_error!("DAT is out of range: {}<1", data);
            return Err(Error::OutOfRange(Bound::Data));
        }
        Ok(RangeData {
            range: u32::try_from(range).map_err(|_| Error::OutOfRange(Bound::Range))?,
            data: u32::try_from(data).map_err(|_| Error::OutOfRange(Bound::Data))?,
        })
    }
}

/// Range and data for PWM mode
///
/// `range = mcf / frequency` and `data = range * duty / 100`, both truncated.
/// A zero frequency is rejected before dividing.
pub fn pwm_range_data(mcf: Hertz, frequency: Hertz, duty: u32) -> Result<RangeData> {
    if frequency.0 == 0 {
        log_error!("frequency is 0");
        return Err(Error::OutOfRange(Bound::Frequency));
    }
    let range = u64::from(mcf.0 / frequency.0);
    let data = range * u64::from(duty) / 100;
    RangeData::checked(range, data)
}

/// Range and data for servo mode
///
/// The servo clock is fixed at [`SERVO_MCF`] / [`SERVO_FREQUENCY`], whatever
/// the channel's own mcf and frequency. The pulse width runs linearly from
/// `range / 40` ticks at `value = 0` to `range / 40 + range / 10` at
/// `value = max`, evaluated left to right in integer arithmetic.
pub fn servo_range_data(value: u32, max: u32) -> Result<RangeData> {
    if max == 0 {
        return Err(Error::OutOfRange(Bound::ServoMax));
    }
    let mcf = u64::from(SERVO_MCF.0);
    let frequency = u64::from(SERVO_FREQUENCY.0);

    let range = mcf / frequency;
    let data =
        (mcf * 2 * u64::from(value) / u64::from(max) / frequency / 20) + (mcf / frequency / 40);
    RangeData::checked(range, data)
}

/// PWM control register: enable output 1
const CTL_PWEN1: u32 = 1 << 0;
/// PWM control register: mark-space mode for output 1
const CTL_MSEN1: u32 = 1 << 7;
/// PWM control register: enable output 2
const CTL_PWEN2: u32 = 1 << 8;
/// PWM control register: mark-space mode for output 2
const CTL_MSEN2: u32 = 1 << 15;

macro_rules! per_output {
    ( $($output:literal),* ) => { paste::paste! {
        /// Hardware output of the PWM block
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        #[cfg_attr(feature = "defmt", derive(defmt::Format))]
        pub enum PwmOutput {
            $(
                [<Pwm $output>],
            )*
        }

        impl PwmOutput {
            pub const ALL: [PwmOutput; 2] = [$(PwmOutput:: [<Pwm $output>]),*];

            /// Zero-based position of the output in the PWM block
            pub const fn index(self) -> usize {
                match self {$(
                    PwmOutput:: [<Pwm $output>] => $output - 1,
                )*}
            }

            /// Offset of the output's range register
            pub const fn range_offset(self) -> usize {
                match self {$(
                    PwmOutput:: [<Pwm $output>] => registers:: [<PWM_RNG $output>],
                )*}
            }

            /// Offset of the output's data register
            pub const fn data_offset(self) -> usize {
                match self {$(
                    PwmOutput:: [<Pwm $output>] => registers:: [<PWM_DAT $output>],
                )*}
            }

            /// Control bits that enable the output in mark-space mode
            pub const fn enable_bits(self) -> u32 {
                match self {$(
                    PwmOutput:: [<Pwm $output>] => [<CTL_PWEN $output>] | [<CTL_MSEN $output>],
                )*}
            }
        }
    }}
}

per_output!(1, 2);

impl PwmOutput {
    /// Clears the output's control bits and waits for the block to stop
    ///
    /// The PWM block hangs if it is reprogrammed without this wait.
    pub fn disable<W, D>(self, registers: &mut Registers<W>, delay: &mut SettleDelay<D>)
    where
        W: RegisterWindow,
        D: DelayNs,
    {
        registers.modify_register(Window::Pwm, registers::PWM_CTL, self.enable_bits(), 0);
        delay.settle();
    }

    /// Loads range and data, then starts the output in mark-space mode
    pub fn start<W: RegisterWindow>(self, registers: &mut Registers<W>, values: &RangeData) {
        registers.write_register(Window::Pwm, self.range_offset(), values.range);
        registers.write_register(Window::Pwm, self.data_offset(), values.data);
        let bits = self.enable_bits();
        registers.modify_register(Window::Pwm, registers::PWM_CTL, bits, bits);
    }
}
