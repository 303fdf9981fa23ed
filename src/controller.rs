/*!
  # Controller
  The controller owns the register windows, the settle delay and every
  channel. All of it sits behind a single lock: each read or write, and any
  reprogramming it triggers, runs to completion before the next one starts,
  whichever channel it targets. Two register sequences therefore never
  interleave.

  Writes follow one pattern. The value is checked against its bounds and
  rejected without touching anything if it is out of range. Otherwise it is
  stored, the mode it implies is selected (PWM for `duty`, `frequency` and
  `mcf`; servo for `servo` and `servo_max`) and, under the immediate policy,
  the channel is activated straight away.

  ## Example
  ```no_run
    use bcm283x_pwm::controller::{Controller, ControllerConfig};
    use bcm283x_pwm::registers::IdentityMapper;
    use bcm283x_pwm::prelude::*;
    # struct Spin;
    # impl embedded_hal::delay::DelayNs for Spin {
    #     fn delay_ns(&mut self, _ns: u32) {}
    # }

    let mut mapper = unsafe { IdentityMapper::new() };
    let pwm = Controller::new(ControllerConfig::default(), &mut mapper, Spin).unwrap();

    pwm.set_policy(0, Policy::Delayed).unwrap();
    pwm.set_frequency(0, 50_u32.Hz()).unwrap();
    pwm.set_duty(0, 25).unwrap();
    pwm.activate(0).unwrap();
  ```
*/

use core::cell::RefCell;

use critical_section::Mutex;
use embedded_hal::delay::DelayNs;
use embedded_time::rate::Hertz;

use crate::{
    attribute::{Attribute, AttributeText, Setting},
    channel::{Channel, ChannelConfig, Policy},
    clock::REFERENCE_CLOCK,
    delay::{SettleDelay, DEFAULT_SETTLE_US},
    pwm::{Mode, PwmOutput},
    registers::{Mapper, RegisterLayout, RegisterWindow, Registers},
    Error, Result,
};

/// Number of hardware outputs, and so of channels
pub const MAX_CHANNELS: usize = PwmOutput::ALL.len();

/// Controller configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerConfig {
    pub layout: RegisterLayout,
    /// Oscillator feeding the PWM clock
    pub reference: Hertz,
    pub settle_us: u32,
    /// Channel per hardware output, indexed by [`PwmOutput::index`]
    pub channels: [Option<ChannelConfig>; MAX_CHANNELS],
}

impl Default for ControllerConfig {
    fn default() -> Self {
        ControllerConfig {
            layout: RegisterLayout::default(),
            reference: REFERENCE_CLOCK,
            settle_us: DEFAULT_SETTLE_US,
            channels: [Some(ChannelConfig::new(PwmOutput::Pwm1)), None],
        }
    }
}

impl ControllerConfig {
    pub fn layout(mut self, layout: RegisterLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn reference(mut self, reference: Hertz) -> Self {
        self.reference = reference;
        self
    }

    pub fn settle_us(mut self, us: u32) -> Self {
        self.settle_us = us;
        self
    }

    /// Sets the channel of `config.output`, replacing any previous one
    pub fn channel(mut self, config: ChannelConfig) -> Self {
        self.channels[config.output.index()] = Some(config);
        self
    }

    /// Leaves `output` without a channel
    pub fn without(mut self, output: PwmOutput) -> Self {
        self.channels[output.index()] = None;
        self
    }
}

struct Hardware<W, D> {
    registers: Registers<W>,
    delay: SettleDelay<D>,
    reference: Hertz,
}

struct Engine<W, D> {
    hardware: Hardware<W, D>,
    channels: heapless::Vec<Channel, MAX_CHANNELS>,
}

impl<W: RegisterWindow, D: DelayNs> Engine<W, D> {
    fn channel(&self, id: u8) -> Result<&Channel> {
        self.channels.get(usize::from(id)).ok_or(Error::UnknownChannel(id))
    }

    fn channel_mut(&mut self, id: u8) -> Result<&mut Channel> {
        self.channels
            .get_mut(usize::from(id))
            .ok_or(Error::UnknownChannel(id))
    }

    /// Activates a channel and settles the other outputs on the shared clock
    fn activate(&mut self, id: u8) -> Result<()> {
        let Hardware { registers, delay, reference } = &mut self.hardware;
        let channel = self
            .channels
            .get_mut(usize::from(id))
            .ok_or(Error::UnknownChannel(id))?;

        let result = channel.activate(registers, delay, *reference);
        if channel.mode() == Mode::Audio {
            return result;
        }
        let running = if result.is_ok() { channel.clock() } else { None };

        for sibling in self.channels.iter_mut().filter(|sibling| sibling.id() != id) {
            sibling.clock_reprogrammed(running, registers, delay);
        }
        result
    }

    fn deactivate(&mut self, id: u8) -> Result<()> {
        let Hardware { registers, delay, .. } = &mut self.hardware;
        let channel = self
            .channels
            .get_mut(usize::from(id))
            .ok_or(Error::UnknownChannel(id))?;
        channel.deactivate(registers, delay);
        Ok(())
    }

    fn shutdown(&mut self) {
        let Hardware { registers, delay, .. } = &mut self.hardware;
        for channel in self.channels.iter_mut() {
            channel.deactivate(registers, delay);
        }
    }
}

/// PWM controller
///
/// Dropping the controller deactivates every channel, then releases the
/// register windows.
pub struct Controller<W: RegisterWindow, D: DelayNs> {
    // `None` once released
    inner: Mutex<RefCell<Option<Engine<W, D>>>>,
}

impl<W: RegisterWindow, D: DelayNs> Controller<W, D> {
    /// Maps the register windows and creates the configured channels
    ///
    /// Channels get ids `0..` in hardware output order. No channel is
    /// activated.
    pub fn new<M>(config: ControllerConfig, mapper: &mut M, delay: D) -> Result<Self>
    where
        M: Mapper<Window = W>,
    {
        let mut channels = heapless::Vec::new();
        for channel in config.channels.iter().flatten() {
            let id = channels.len() as u8;
            channels
                .push(Channel::new(id, channel)?)
                .map_err(|_| Error::UnknownChannel(id))?;
        }

        let registers = Registers::map(mapper, &config.layout)?;
        log_info!(
            "bcm283x-pwm {} started with {} channel(s)",
            env!("CARGO_PKG_VERSION"),
            channels.len()
        );

        let engine = Engine {
            hardware: Hardware {
                registers,
                delay: SettleDelay::new(delay, config.settle_us),
                reference: config.reference,
            },
            channels,
        };
        Ok(Controller {
            inner: Mutex::new(RefCell::new(Some(engine))),
        })
    }

    fn lock<R>(&self, f: impl FnOnce(&mut Engine<W, D>) -> Result<R>) -> Result<R> {
        critical_section::with(|cs| {
            let mut engine = self.inner.borrow_ref_mut(cs);
            let engine = engine.as_mut().ok_or(Error::ResourceUnavailable)?;
            f(engine)
        })
    }

    fn read<R>(&self, id: u8, f: impl FnOnce(&Channel, Hertz) -> R) -> Result<R> {
        self.lock(|engine| Ok(f(engine.channel(id)?, engine.hardware.reference)))
    }

    /// Applies `f` and, under the immediate policy, activates the channel
    fn update(&self, id: u8, f: impl FnOnce(&mut Channel) -> Result<()>) -> Result<()> {
        self.lock(|engine| {
            let channel = engine.channel_mut(id)?;
            f(channel)?;
            if channel.is_immediate() {
                engine.activate(id)?;
            }
            Ok(())
        })
    }

    /// Ids of all channels, in ascending order
    pub fn channel_ids(&self) -> heapless::Vec<u8, MAX_CHANNELS> {
        critical_section::with(|cs| {
            self.inner
                .borrow_ref(cs)
                .as_ref()
                .map(|engine| engine.channels.iter().map(Channel::id).collect())
                .unwrap_or_default()
        })
    }

    /// Consistent copy of a channel's whole state
    pub fn snapshot(&self, id: u8) -> Result<Channel> {
        self.read(id, |channel, _| *channel)
    }

    pub fn mode(&self, id: u8) -> Result<Mode> {
        self.read(id, |channel, _| channel.mode())
    }

    /// Selects the mode without activating
    pub fn set_mode(&self, id: u8, mode: Mode) -> Result<()> {
        self.lock(|engine| {
            engine.channel_mut(id)?.set_mode(mode);
            Ok(())
        })
    }

    pub fn duty(&self, id: u8) -> Result<u32> {
        self.read(id, |channel, _| channel.duty())
    }

    pub fn set_duty(&self, id: u8, duty: u32) -> Result<()> {
        self.update(id, |channel| channel.set_duty(duty))
    }

    pub fn frequency(&self, id: u8) -> Result<Hertz> {
        self.read(id, |channel, _| channel.frequency())
    }

    pub fn set_frequency(&self, id: u8, frequency: Hertz) -> Result<()> {
        self.update(id, |channel| {
            channel.set_frequency(frequency);
            Ok(())
        })
    }

    pub fn mcf(&self, id: u8) -> Result<Hertz> {
        self.read(id, |channel, _| channel.mcf())
    }

    pub fn set_mcf(&self, id: u8, mcf: Hertz) -> Result<()> {
        self.update(id, |channel| channel.set_mcf(mcf))
    }

    pub fn servo_value(&self, id: u8) -> Result<u32> {
        self.read(id, |channel, _| channel.servo_value())
    }

    pub fn set_servo_value(&self, id: u8, value: u32) -> Result<()> {
        self.update(id, |channel| channel.set_servo_value(value))
    }

    pub fn servo_max(&self, id: u8) -> Result<u32> {
        self.read(id, |channel, _| channel.servo_max())
    }

    /// Changes the servo resolution, rescaling the servo value in the same step
    pub fn set_servo_max(&self, id: u8, max: u32) -> Result<()> {
        self.update(id, |channel| channel.set_servo_max(max))
    }

    /// Frequency the output produces after clock rounding
    pub fn real_frequency(&self, id: u8) -> Result<Hertz> {
        self.read(id, |channel, reference| channel.real_frequency(reference))?
    }

    pub fn is_active(&self, id: u8) -> Result<bool> {
        self.read(id, |channel, _| channel.is_active())
    }

    /// Activates or deactivates the channel
    pub fn set_active(&self, id: u8, active: bool) -> Result<()> {
        if active {
            self.activate(id)
        } else {
            self.deactivate(id)
        }
    }

    /// Reprograms the hardware from the channel's current state
    ///
    /// Both outputs share the PWM clock. An active output on the other side
    /// that no longer has its clock, because this activation failed or
    /// picked another divisor, is stopped and reported inactive.
    pub fn activate(&self, id: u8) -> Result<()> {
        self.lock(|engine| engine.activate(id))
    }

    pub fn deactivate(&self, id: u8) -> Result<()> {
        self.lock(|engine| engine.deactivate(id))
    }

    pub fn policy(&self, id: u8) -> Result<Policy> {
        self.read(id, |channel, _| channel.policy())
    }

    pub fn set_policy(&self, id: u8, policy: Policy) -> Result<()> {
        self.lock(|engine| {
            engine.channel_mut(id)?.set_policy(policy);
            Ok(())
        })
    }

    /// Applies a parsed attribute write
    pub fn apply(&self, id: u8, setting: Setting) -> Result<()> {
        match setting {
            Setting::Mode(mode) => self.set_mode(id, mode),
            Setting::Duty(duty) => self.set_duty(id, duty),
            Setting::Frequency(frequency) => self.set_frequency(id, frequency),
            Setting::Mcf(mcf) => self.set_mcf(id, mcf),
            Setting::Servo(value) => self.set_servo_value(id, value),
            Setting::ServoMax(max) => self.set_servo_max(id, max),
            Setting::Active(active) => self.set_active(id, active),
            Setting::Policy(policy) => self.set_policy(id, policy),
        }
    }

    /// Renders an attribute as text
    pub fn show(&self, id: u8, attribute: Attribute) -> Result<AttributeText> {
        self.read(id, |channel, reference| attribute.render(channel, reference))?
    }

    /// Parses `text` and applies it to an attribute
    ///
    /// Nothing is changed when the text does not parse.
    pub fn store(&self, id: u8, attribute: Attribute, text: &str) -> Result<()> {
        let setting = attribute.parse(text).inspect_err(|_| {
            log_warn!("pwm{}: rejected write to {}", id, attribute.name());
        })?;
        self.apply(id, setting)
    }

    /// Deactivates every channel, releases the register windows and returns
    /// the delay provider
    pub fn release(mut self) -> Result<D> {
        let mut engine = self
            .inner
            .get_mut()
            .get_mut()
            .take()
            .ok_or(Error::ResourceUnavailable)?;
        engine.shutdown();
        Ok(engine.hardware.delay.free())
    }
}

impl<W: RegisterWindow, D: DelayNs> Drop for Controller<W, D> {
    fn drop(&mut self) {
        if let Some(mut engine) = self.inner.get_mut().get_mut().take() {
            engine.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::Bound,
        registers::{
            mock::{writes, Access, MockDelay, MockMapper, MockWindow},
            Window,
        },
    };
    use embedded_time::rate::Extensions;

    fn controller(config: ControllerConfig) -> (Controller<MockWindow, MockDelay>, MockMapper) {
        let mut mapper = MockMapper::default();
        let delay = MockDelay(mapper.log.clone());
        let controller = Controller::new(config, &mut mapper, delay).unwrap();
        (controller, mapper)
    }

    fn both_outputs() -> ControllerConfig {
        ControllerConfig::default().channel(ChannelConfig::new(PwmOutput::Pwm2))
    }

    #[test]
    fn ids_follow_output_order() {
        let (pwm, _) = controller(both_outputs());
        assert_eq!(pwm.channel_ids(), [0, 1]);
        assert_eq!(pwm.snapshot(1).unwrap().output(), PwmOutput::Pwm2);
        assert_eq!(pwm.duty(2), Err(Error::UnknownChannel(2)));

        let config = ControllerConfig::default()
            .without(PwmOutput::Pwm1)
            .channel(ChannelConfig::new(PwmOutput::Pwm2));
        let (pwm, _) = controller(config);
        assert_eq!(pwm.channel_ids(), [0]);
        assert_eq!(pwm.snapshot(0).unwrap().pin().number(), 19);
    }

    #[test]
    fn startup_does_not_touch_registers() {
        let (_pwm, mapper) = controller(ControllerConfig::default());
        assert!(writes(&mapper.log).is_empty());
    }

    #[test]
    fn mapping_failure_aborts_startup() {
        let mut mapper = MockMapper { fail_on: Some(Window::Pwm), ..Default::default() };
        let delay = MockDelay(mapper.log.clone());
        let result = Controller::new(ControllerConfig::default(), &mut mapper, delay);
        assert_eq!(result.err(), Some(Error::ResourceUnavailable));
        assert_eq!(mapper.mapped.len(), 1);
    }

    #[test]
    fn invalid_channel_config_aborts_startup() {
        let settings = crate::channel::ChannelSettings { duty: 100, ..Default::default() };
        let config =
            ControllerConfig::default().channel(ChannelConfig::default().settings(settings));
        let mut mapper = MockMapper::default();
        let delay = MockDelay(mapper.log.clone());
        let result = Controller::new(config, &mut mapper, delay);
        assert!(matches!(result, Err(Error::OutOfRange(Bound::Duty))));
        assert!(mapper.mapped.is_empty());
    }

    #[test]
    fn immediate_write_activates() {
        let (pwm, mapper) = controller(ControllerConfig::default());
        pwm.set_frequency(0, 50_u32.Hz()).unwrap();
        assert!(pwm.is_active(0).unwrap());
        assert!(writes(&mapper.log).contains(&Access::Write(Window::Pwm, 0x14, 160)));
    }

    #[test]
    fn activation_error_is_reported_and_value_kept() {
        let (pwm, _) = controller(ControllerConfig::default());
        // frequency is still zero
        assert_eq!(pwm.set_duty(0, 30), Err(Error::OutOfRange(Bound::Frequency)));
        assert_eq!(pwm.duty(0), Ok(30));
        assert_eq!(pwm.is_active(0), Ok(false));
    }

    #[test]
    fn delayed_write_only_stages() {
        let (pwm, mapper) = controller(ControllerConfig::default());
        pwm.set_policy(0, Policy::Delayed).unwrap();
        pwm.set_frequency(0, 50_u32.Hz()).unwrap();
        pwm.set_servo_value(0, 3).unwrap();
        assert!(writes(&mapper.log).is_empty());
        assert_eq!(pwm.mode(0), Ok(Mode::Servo));

        pwm.set_active(0, true).unwrap();
        assert!(pwm.is_active(0).unwrap());
    }

    #[test]
    fn mode_write_never_activates() {
        let (pwm, mapper) = controller(ControllerConfig::default());
        pwm.set_mode(0, Mode::Servo).unwrap();
        assert!(writes(&mapper.log).is_empty());
        assert_eq!(pwm.policy(0), Ok(Policy::Immediate));
    }

    #[test]
    fn release_deactivates_and_returns_delay() {
        let (pwm, mapper) = controller(ControllerConfig::default());
        pwm.set_frequency(0, 50_u32.Hz()).unwrap();
        mapper.log.lock().unwrap().clear();

        let MockDelay(log) = pwm.release().unwrap();
        assert_eq!(
            writes(&log),
            [
                Access::Write(Window::Pwm, 0x00, 0),
                Access::DelayUs(10),
                Access::Write(Window::Gpio, 0x04, 0),
                Access::DelayUs(10),
            ]
        );
    }

    #[test]
    fn taken_engine_shuts_down_once() {
        let (mut pwm, mapper) = controller(ControllerConfig::default());
        pwm.set_frequency(0, 50_u32.Hz()).unwrap();
        let engine = pwm.inner.get_mut().get_mut().take();
        drop(engine);
        mapper.log.lock().unwrap().clear();

        assert_eq!(pwm.duty(0), Err(Error::ResourceUnavailable));
        assert_eq!(pwm.activate(0), Err(Error::ResourceUnavailable));
        assert!(pwm.channel_ids().is_empty());
        drop(pwm);
        assert!(writes(&mapper.log).is_empty());
    }

    #[test]
    fn settle_time_is_configurable() {
        let (pwm, mapper) = controller(ControllerConfig::default().settle_us(25));
        pwm.deactivate(0).unwrap();
        assert_eq!(writes(&mapper.log)[1], Access::DelayUs(25));
    }

    #[test]
    fn text_interface() {
        let (pwm, _) = controller(ControllerConfig::default());
        pwm.store(0, Attribute::Immediate, "delayed\n").unwrap();
        pwm.store(0, Attribute::Frequency, "50\n").unwrap();
        assert_eq!(pwm.show(0, Attribute::RealFrequency).unwrap(), "50\n");
        assert_eq!(pwm.store(0, Attribute::Duty, "abc"), Err(Error::InvalidArgument));
        assert_eq!(pwm.store(0, Attribute::Duty, "150"), Err(Error::OutOfRange(Bound::Duty)));
        assert_eq!(pwm.store(0, Attribute::Mode, "square"), Err(Error::NotFound));
        assert_eq!(pwm.show(0, Attribute::Duty).unwrap(), "50%\n");

        pwm.store(0, Attribute::Active, "1").unwrap();
        assert_eq!(pwm.show(0, Attribute::Active).unwrap(), "1\n");
    }
}
