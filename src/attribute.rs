//! Textual attribute interface
//!
//! Every channel parameter is exposed as a named attribute that can be read
//! as text and written from text. Writing is split in two steps: a pure
//! [`Attribute::parse`] that turns the text into a typed [`Setting`], and
//! [`Controller::apply`](crate::controller::Controller::apply) that validates
//! it against the channel and applies it under the lock.
//!
//! ```
//! use bcm283x_pwm::attribute::{Attribute, Setting};
//!
//! let attribute = Attribute::from_name("duty").unwrap();
//! assert_eq!(attribute.parse("25\n"), Ok(Setting::Duty(25)));
//! ```

use core::fmt::Write;

use embedded_time::rate::Hertz;

use crate::{
    channel::{Channel, Policy},
    error::Bound,
    pwm::Mode,
    Error, Result,
};

/// Rendered attribute value, newline terminated
pub type AttributeText = heapless::String<32>;

/// Named channel attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Attribute {
    Mode,
    Duty,
    Frequency,
    Mcf,
    Servo,
    ServoMax,
    /// Frequency produced after clock rounding; read only
    RealFrequency,
    Active,
    /// Update policy, answered as `immediate` or `delayed`
    Immediate,
}

/// Typed value of an attribute write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Setting {
    Mode(Mode),
    Duty(u32),
    Frequency(Hertz),
    Mcf(Hertz),
    Servo(u32),
    ServoMax(u32),
    Active(bool),
    Policy(Policy),
}

impl Attribute {
    pub const ALL: [Attribute; 9] = [
        Attribute::Mode,
        Attribute::Duty,
        Attribute::Frequency,
        Attribute::Mcf,
        Attribute::Servo,
        Attribute::ServoMax,
        Attribute::RealFrequency,
        Attribute::Active,
        Attribute::Immediate,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            Attribute::Mode => "mode",
            Attribute::Duty => "duty",
            Attribute::Frequency => "frequency",
            Attribute::Mcf => "mcf",
            Attribute::Servo => "servo",
            Attribute::ServoMax => "servo_max",
            Attribute::RealFrequency => "real_frequency",
            Attribute::Active => "active",
            Attribute::Immediate => "immediate",
        }
    }

    pub const fn is_writable(self) -> bool {
        !matches!(self, Attribute::RealFrequency)
    }

    /// Looks an attribute up by name
    ///
    /// `delayed` is accepted as another name for [`Attribute::Immediate`].
    pub fn from_name(name: &str) -> Result<Self> {
        if name == "delayed" {
            return Ok(Attribute::Immediate);
        }
        Attribute::ALL
            .iter()
            .copied()
            .find(|attribute| attribute.name() == name)
            .ok_or(Error::NotFound)
    }

    /// Parses written text into a typed setting
    ///
    /// Numbers that cannot be represented by the target field are reported as
    /// out of range; text that is not a number at all is an invalid argument.
    /// Writing a read-only attribute is an invalid argument.
    pub fn parse(self, text: &str) -> Result<Setting> {
        match self {
            Attribute::Mode => parse_mode(text).map(Setting::Mode),
            Attribute::Duty => parse_u32(text, Bound::Duty).map(Setting::Duty),
            Attribute::Frequency => {
                parse_u32(text, Bound::Frequency).map(|hz| Setting::Frequency(Hertz(hz)))
            }
            Attribute::Mcf => parse_u32(text, Bound::Mcf).map(|hz| Setting::Mcf(Hertz(hz))),
            Attribute::Servo => parse_u32(text, Bound::ServoValue).map(Setting::Servo),
            Attribute::ServoMax => parse_u32(text, Bound::ServoMax).map(Setting::ServoMax),
            Attribute::Active => parse_integer(text).map(|value| Setting::Active(value != 0)),
            Attribute::Immediate => parse_policy(text).map(Setting::Policy),
            Attribute::RealFrequency => Err(Error::InvalidArgument),
        }
    }

    /// Renders the attribute of `channel`
    ///
    /// Only [`Attribute::RealFrequency`] can fail, when the channel has no
    /// usable frequency.
    pub fn render(self, channel: &Channel, reference: Hertz) -> Result<AttributeText> {
        let mut text = AttributeText::new();
        let written = match self {
            Attribute::Mode => write_modes(&mut text, channel.mode()),
            Attribute::Duty => writeln!(text, "{}%", channel.duty()),
            Attribute::Frequency => writeln!(text, "{}", channel.frequency().0),
            Attribute::Mcf => writeln!(text, "{}", channel.mcf().0),
            Attribute::Servo => writeln!(text, "{}", channel.servo_value()),
            Attribute::ServoMax => writeln!(text, "{}", channel.servo_max()),
            Attribute::RealFrequency => writeln!(text, "{}", channel.real_frequency(reference)?.0),
            Attribute::Active => writeln!(text, "{}", u8::from(channel.is_active())),
            Attribute::Immediate => writeln!(text, "{}", channel.policy()),
        };
        written.map_err(|_| Error::InvalidArgument)?;
        Ok(text)
    }
}

/// `[pwm] servo audio`, current mode in brackets
fn write_modes(text: &mut AttributeText, current: Mode) -> core::fmt::Result {
    for (i, mode) in Mode::ALL.iter().enumerate() {
        if i > 0 {
            text.push(' ').map_err(|_| core::fmt::Error)?;
        }
        if *mode == current {
            write!(text, "[{}]", mode)?;
        } else {
            text.push_str(mode.as_str()).map_err(|_| core::fmt::Error)?;
        }
    }
    text.push('\n').map_err(|_| core::fmt::Error)
}

/// Parses a signed integer the way the Linux `kstrtol` does with base 0
///
/// Accepts an optional sign followed by `0x`-prefixed hexadecimal,
/// `0`-prefixed octal or decimal digits. Surrounding whitespace is ignored.
pub fn parse_integer(text: &str) -> Result<i64> {
    let text = text.trim();
    let (negative, digits) = match text.as_bytes().first() {
        Some(b'-') => (true, &text[1..]),
        Some(b'+') => (false, &text[1..]),
        _ => (false, text),
    };

    let hex = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X"));
    let (radix, digits) = if let Some(hex) = hex {
        (16, hex)
    } else if digits.len() > 1 && digits.starts_with('0') {
        (8, &digits[1..])
    } else {
        (10, digits)
    };

    // from_str_radix would accept a second sign
    if !digits.bytes().next().is_some_and(|b| b.is_ascii_alphanumeric()) {
        return Err(Error::InvalidArgument);
    }
    let magnitude = u64::from_str_radix(digits, radix).map_err(|_| Error::InvalidArgument)?;

    if negative {
        0_i64.checked_sub_unsigned(magnitude).ok_or(Error::InvalidArgument)
    } else {
        i64::try_from(magnitude).map_err(|_| Error::InvalidArgument)
    }
}

/// Parses an integer that must fit an unsigned 32-bit field
///
/// Negative or too large numbers violate `bound`.
fn parse_u32(text: &str, bound: Bound) -> Result<u32> {
    let value = parse_integer(text)?;
    u32::try_from(value).map_err(|_| Error::OutOfRange(bound))
}

/// Parses a mode name; the name must match exactly
pub fn parse_mode(text: &str) -> Result<Mode> {
    Mode::from_name(text.trim())
}

/// Parses the update policy
///
/// `immediate` or `0` select [`Policy::Immediate`]; `delayed` or `1` select
/// [`Policy::Delayed`]. Case is ignored.
pub fn parse_policy(text: &str) -> Result<Policy> {
    let text = text.trim();
    if text.eq_ignore_ascii_case("immediate") || text == "0" {
        Ok(Policy::Immediate)
    } else if text.eq_ignore_ascii_case("delayed") || text == "1" {
        Ok(Policy::Delayed)
    } else {
        Err(Error::InvalidArgument)
    }
}
