//! Channel state machine
//!
//! A [`Channel`] holds the configuration of one PWM output and knows how to
//! bring it up and down. Activation always reprograms everything from the
//! current state, in this order:
//!
//! 1. route the pin to the PWM block,
//! 2. stop the output and wait,
//! 3. stop the clock and wait,
//! 4. compute the divisor and the range/data pair,
//! 5. load the divisor and start the clock,
//! 6. load range and data and start the output.
//!
//! If step 4 fails nothing more is written, so the output is left stopped.
//! Audio mode only performs step 1.
//!
//! Both outputs share the PWM clock. When one output reprograms it, the other
//! is told through [`Channel::clock_reprogrammed`] and stops unless the clock
//! still runs at its divisor.

use core::fmt;

use embedded_hal::delay::DelayNs;
use embedded_time::rate::Hertz;

use crate::{
    clock::{self, compute_clock, ClockDivisor},
    delay::SettleDelay,
    error::Bound,
    gpio::{Pin, PinFunction},
    pwm::{pwm_range_data, servo_range_data, Mode, PwmOutput, RangeData, SERVO_MCF},
    registers::{RegisterWindow, Registers},
    Error, Result,
};

/// Exclusive upper bound of the maximum common frequency
pub const MCF_LIMIT: u32 = 100_000_000;

/// Maximum common frequency a channel starts with
pub const DEFAULT_MCF: Hertz = Hertz(16_000);

/// Whether parameter writes reprogram the hardware straight away
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Policy {
    /// Every accepted write re-activates the channel
    Immediate,
    /// Writes are only staged until the next explicit activation
    Delayed,
}

impl Policy {
    pub const fn as_str(self) -> &'static str {
        match self {
            Policy::Immediate => "immediate",
            Policy::Delayed => "delayed",
        }
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters a channel starts with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelSettings {
    pub mode: Mode,
    /// Duty cycle in percent
    pub duty: u32,
    /// Output frequency in PWM mode; zero until set
    pub frequency: Hertz,
    /// Maximum common frequency the clock divisor is derived from
    pub mcf: Hertz,
    pub servo_value: u32,
    /// Servo resolution: `servo_value == servo_max` is full deflection
    pub servo_max: u32,
    pub policy: Policy,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        ChannelSettings {
            mode: Mode::Pwm,
            duty: 50,
            frequency: Hertz(0),
            mcf: DEFAULT_MCF,
            servo_value: 0,
            servo_max: 32,
            policy: Policy::Immediate,
        }
    }
}

impl ChannelSettings {
    /// Checks every field against the bounds enforced on writes
    pub fn validate(&self) -> Result<()> {
        check_duty(self.duty)?;
        check_mcf(self.mcf)?;
        check_servo_max(self.servo_max)?;
        check_servo_value(self.servo_value, self.servo_max)
    }
}

/// Static description of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelConfig {
    pub output: PwmOutput,
    /// GPIO number the output is routed to
    pub pin: u8,
    /// Pin function that connects the pin to `output`
    pub function: PinFunction,
    pub settings: ChannelSettings,
}

impl ChannelConfig {
    /// Configuration for `output` on its usual header pin (GPIO 18 or 19, ALT5)
    pub fn new(output: PwmOutput) -> Self {
        let pin = match output {
            PwmOutput::Pwm1 => 18,
            PwmOutput::Pwm2 => 19,
        };
        ChannelConfig {
            output,
            pin,
            function: PinFunction::Alt5,
            settings: ChannelSettings::default(),
        }
    }

    /// Routes the output to another pin
    pub fn pin(mut self, pin: u8, function: PinFunction) -> Self {
        self.pin = pin;
        self.function = function;
        self
    }

    pub fn settings(mut self, settings: ChannelSettings) -> Self {
        self.settings = settings;
        self
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self::new(PwmOutput::Pwm1)
    }
}

/// One PWM output and its configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Channel {
    id: u8,
    output: PwmOutput,
    pin: Pin,
    function: PinFunction,
    settings: ChannelSettings,
    active: bool,
    clock: Option<ClockDivisor>,
}

impl Channel {
    /// Creates an inactive channel, rejecting out-of-bounds initial settings
    pub fn new(id: u8, config: &ChannelConfig) -> Result<Self> {
        config.settings.validate()?;
        Ok(Channel {
            id,
            output: config.output,
            pin: Pin::new(config.pin)?,
            function: config.function,
            settings: config.settings,
            active: false,
            clock: None,
        })
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    pub fn output(&self) -> PwmOutput {
        self.output
    }

    pub fn pin(&self) -> Pin {
        self.pin
    }

    pub fn mode(&self) -> Mode {
        self.settings.mode
    }

    pub fn duty(&self) -> u32 {
        self.settings.duty
    }

    pub fn frequency(&self) -> Hertz {
        self.settings.frequency
    }

    pub fn mcf(&self) -> Hertz {
        self.settings.mcf
    }

    pub fn servo_value(&self) -> u32 {
        self.settings.servo_value
    }

    pub fn servo_max(&self) -> u32 {
        self.settings.servo_max
    }

    pub fn policy(&self) -> Policy {
        self.settings.policy
    }

    pub fn is_immediate(&self) -> bool {
        self.settings.policy == Policy::Immediate
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Divisor and achieved frequency of the last clock programming
    pub fn clock(&self) -> Option<ClockDivisor> {
        self.clock
    }

    /// Selects the output discipline
    ///
    /// Takes effect on the next activation. Selecting audio also switches the
    /// channel to [`Policy::Delayed`], so later parameter writes cannot
    /// disturb playback.
    pub fn set_mode(&mut self, mode: Mode) {
        self.settings.mode = mode;
        if mode == Mode::Audio && self.is_immediate() {
            log_info!("pwm{}: audio selected, switching to delayed updates", self.id);
            self.settings.policy = Policy::Delayed;
        }
    }

    /// Sets the duty cycle, exclusive range `(0, 100)`, and selects PWM mode
    pub fn set_duty(&mut self, duty: u32) -> Result<()> {
        check_duty(duty)?;
        self.settings.duty = duty;
        self.settings.mode = Mode::Pwm;
        Ok(())
    }

    /// Sets the output frequency and selects PWM mode
    pub fn set_frequency(&mut self, frequency: Hertz) {
        self.settings.frequency = frequency;
        self.settings.mode = Mode::Pwm;
    }

    /// Sets the maximum common frequency, exclusive range `(1, 100 MHz)`, and selects PWM mode
    pub fn set_mcf(&mut self, mcf: Hertz) -> Result<()> {
        check_mcf(mcf)?;
        self.settings.mcf = mcf;
        self.settings.mode = Mode::Pwm;
        Ok(())
    }

    /// Sets the servo position, `0..=servo_max`, and selects servo mode
    pub fn set_servo_value(&mut self, value: u32) -> Result<()> {
        check_servo_value(value, self.settings.servo_max)?;
        self.settings.servo_value = value;
        self.settings.mode = Mode::Servo;
        Ok(())
    }

    /// Changes the servo resolution and selects servo mode
    ///
    /// The position is rescaled to keep the same angle:
    /// `value = value * max / old_max`, truncated.
    pub fn set_servo_max(&mut self, max: u32) -> Result<()> {
        check_servo_max(max)?;
        let scaled = u64::from(self.settings.servo_value) * u64::from(max)
            / u64::from(self.settings.servo_max);
        // scaled <= max because value <= old_max
        self.settings.servo_value = u32::try_from(scaled).unwrap_or(max);
        self.settings.servo_max = max;
        self.settings.mode = Mode::Servo;
        Ok(())
    }

    pub fn set_policy(&mut self, policy: Policy) {
        self.settings.policy = policy;
    }

    /// Frequency actually produced in PWM mode
    ///
    /// Derived from the rounded clock and the range, without touching the
    /// hardware.
    pub fn real_frequency(&self, reference: Hertz) -> Result<Hertz> {
        let Hertz(frequency) = self.settings.frequency;
        if frequency == 0 {
            return Err(Error::InvalidArgument);
        }
        let range = self.settings.mcf.0 / frequency;
        if range < 1 {
            return Err(Error::InvalidArgument);
        }
        let clock = compute_clock(reference, self.settings.mcf)?;
        Ok(Hertz(clock.achieved.0 / range))
    }

    /// Programs the hardware from the current state and starts the output
    ///
    /// On failure the channel is left inactive with its output stopped.
    pub fn activate<W, D>(
        &mut self,
        registers: &mut Registers<W>,
        delay: &mut SettleDelay<D>,
        reference: Hertz,
    ) -> Result<()>
    where
        W: RegisterWindow,
        D: DelayNs,
    {
        self.active = false;
        self.pin.set_function(registers, self.function);

        let mcf = match self.settings.mode {
            Mode::Pwm => self.settings.mcf,
            Mode::Servo => SERVO_MCF,
            Mode::Audio => {
                log_debug!("pwm{}: activated for audio", self.id);
                self.active = true;
                return Ok(());
            }
        };

        self.output.disable(registers, delay);
        clock::stop(registers, delay);

        let (clock, values) = self.plan(reference, mcf)?;
        clock::start(registers, &clock);
        self.output.start(registers, &values);

        log_debug!(
            "pwm{}: {} active, divisor {}, RNG {}, DAT {}",
            self.id,
            self.settings.mode.as_str(),
            clock.divisor,
            values.range,
            values.data
        );
        self.clock = Some(clock);
        self.active = true;
        Ok(())
    }

    fn plan(&self, reference: Hertz, mcf: Hertz) -> Result<(ClockDivisor, RangeData)> {
        let clock = compute_clock(reference, mcf)?;
        let values = match self.settings.mode {
            Mode::Servo => servo_range_data(self.settings.servo_value, self.settings.servo_max)?,
            _ => pwm_range_data(mcf, self.settings.frequency, self.settings.duty)?,
        };
        Ok((clock, values))
    }

    /// Stops the output and disconnects the pin; cannot fail
    pub fn deactivate<W, D>(&mut self, registers: &mut Registers<W>, delay: &mut SettleDelay<D>)
    where
        W: RegisterWindow,
        D: DelayNs,
    {
        if self.settings.mode == Mode::Audio {
            delay.settle();
        } else {
            self.output.disable(registers, delay);
        }
        self.pin.set_function(registers, PinFunction::Input);
        delay.settle();
        self.active = false;
        log_debug!("pwm{}: deactivated", self.id);
    }

    /// Reacts to another output reprogramming the shared PWM clock
    ///
    /// `running` is the clock the other output left running, `None` when it
    /// was left stopped. An active output whose divisor no longer matches is
    /// stopped and marked inactive.
    pub fn clock_reprogrammed<W, D>(
        &mut self,
        running: Option<ClockDivisor>,
        registers: &mut Registers<W>,
        delay: &mut SettleDelay<D>,
    ) where
        W: RegisterWindow,
        D: DelayNs,
    {
        if !self.active || self.settings.mode == Mode::Audio {
            return;
        }
        if running.is_some() && running == self.clock {
            return;
        }
        log_warn!("pwm{}: shared clock reprogrammed, output stopped", self.id);
        self.output.disable(registers, delay);
        self.active = false;
    }
}

fn check_duty(duty: u32) -> Result<()> {
    if duty > 0 && duty < 100 {
        Ok(())
    } else {
        Err(Error::OutOfRange(Bound::Duty))
    }
}

fn check_mcf(mcf: Hertz) -> Result<()> {
    if mcf.0 > 1 && mcf.0 < MCF_LIMIT {
        Ok(())
    } else {
        Err(Error::OutOfRange(Bound::Mcf))
    }
}

fn check_servo_value(value: u32, max: u32) -> Result<()> {
    if value <= max {
        Ok(())
    } else {
        Err(Error::OutOfRange(Bound::ServoValue))
    }
}

fn check_servo_max(max: u32) -> Result<()> {
    if max > 0 {
        Ok(())
    } else {
        Err(Error::OutOfRange(Bound::ServoMax))
    }
}
