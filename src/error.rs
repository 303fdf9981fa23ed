//! Error type shared by every controller operation

use derive_more::Display;

/// Quantity whose domain bound was violated
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Bound {
    /// Clock divisor outside `1..=4096`
    #[display("divisor")]
    Divisor,
    /// Range register value below 1
    #[display("RNG")]
    Range,
    /// Data register value below 1
    #[display("DAT")]
    Data,
    /// Duty cycle outside `(0, 100)`
    #[display("duty")]
    Duty,
    /// Negative or unrepresentable frequency
    #[display("frequency")]
    Frequency,
    /// Maximum common frequency outside `(1, 100_000_000)`
    #[display("mcf")]
    Mcf,
    /// Servo value above the servo maximum
    #[display("servo")]
    ServoValue,
    /// Servo maximum of zero
    #[display("servo_max")]
    ServoMax,
    /// GPIO number the pin multiplexer does not have
    #[display("pin")]
    Pin,
}

/// Controller error
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// The value could not be parsed
    #[display("invalid argument")]
    InvalidArgument,
    /// The value violates a domain bound
    #[display("{_0} out of range")]
    OutOfRange(Bound),
    /// Unknown mode or attribute name
    #[display("not found")]
    NotFound,
    /// No channel with this id exists
    #[display("no channel {_0}")]
    UnknownChannel(u8),
    /// A register window could not be mapped
    #[display("register window unavailable")]
    ResourceUnavailable,
}

impl core::error::Error for Error {}

/// Result with the controller [`Error`]
pub type Result<T> = core::result::Result<T, Error>;
