/*!
  # Register surface
  The PWM engine touches three independent memory-mapped windows: the GPIO
  function-select block, the PWM control block and the clock manager. Each
  window is mapped once when the controller starts and released when it is
  dropped.

  Mapping goes through a [`Mapper`]. On bare metal, where the peripheral
  addresses are identity mapped, [`IdentityMapper`] hands out volatile
  [`MmioWindow`]s. Hosted environments provide their own mapper (for example
  over `/dev/mem`), and tests provide an in-memory one.

  ## Example
  ```no_run
    use bcm283x_pwm::registers::{IdentityMapper, Registers, RegisterLayout};

    let mut mapper = unsafe { IdentityMapper::new() };
    let registers = Registers::map(&mut mapper, &RegisterLayout::bcm2837()).unwrap();
  ```
*/

use core::ptr::NonNull;

use crate::{Error, Result};

macro_rules! register_block {
    ($block:ident { $( $(#[$meta:meta])* $name:ident = $offset:literal ),* $(,)? }) => {
        paste::paste! {
            $(
                $(#[$meta])*
                pub const [<$block _ $name>]: usize = $offset;
            )*
        }
    };
}

register_block!(PWM {
    /// Control register, shared by both outputs
    CTL = 0x00,
    /// Status register
    STA = 0x04,
    /// Range of output 1
    RNG1 = 0x10,
    /// Data of output 1
    DAT1 = 0x14,
    /// Range of output 2
    RNG2 = 0x20,
    /// Data of output 2
    DAT2 = 0x24,
});

register_block!(CM {
    /// PWM clock control
    PWMCTL = 0xA0,
    /// PWM clock divisor
    PWMDIV = 0xA4,
});

register_block!(GPIO {
    /// First function select register; the next five follow at 4 byte steps
    FSEL0 = 0x00,
});

/// One of the three register windows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Window {
    /// GPIO function select
    Gpio,
    /// PWM control block
    Pwm,
    /// Clock manager
    Clock,
}

/// Physical placement of the register windows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterLayout {
    pub gpio_base: usize,
    pub pwm_base: usize,
    pub clock_base: usize,
    /// Length of every window in bytes
    pub window_len: usize,
}

impl RegisterLayout {
    /// Layout for a given peripheral base address
    pub const fn from_peripheral_base(base: usize) -> Self {
        RegisterLayout {
            gpio_base: base + 0x20_0000,
            pwm_base: base + 0x20_C000,
            clock_base: base + 0x10_1000,
            window_len: 1024,
        }
    }

    /// BCM2835 (Raspberry Pi 1 and Zero)
    pub const fn bcm2835() -> Self {
        Self::from_peripheral_base(0x2000_0000)
    }

    /// BCM2836 and BCM2837 (Raspberry Pi 2 and 3)
    pub const fn bcm2837() -> Self {
        Self::from_peripheral_base(0x3F00_0000)
    }

    const fn base(&self, window: Window) -> usize {
        match window {
            Window::Gpio => self.gpio_base,
            Window::Pwm => self.pwm_base,
            Window::Clock => self.clock_base,
        }
    }
}

impl Default for RegisterLayout {
    fn default() -> Self {
        Self::bcm2837()
    }
}

/// A mapped range of 32-bit registers
///
/// Offsets are in bytes. Values are written as given; callers validate them.
/// Implementations release the mapping when dropped.
pub trait RegisterWindow {
    /// Reads the register at `offset`
    fn read(&self, offset: usize) -> u32;

    /// Writes `value` to the register at `offset`
    fn write(&mut self, offset: usize, value: u32);
}

/// Maps register windows into the address space
pub trait Mapper {
    type Window: RegisterWindow;

    /// Maps `len` bytes of registers starting at physical address `base`
    ///
    /// Returns `None` when the range cannot be mapped.
    fn map(&mut self, window: Window, base: usize, len: usize) -> Option<Self::Window>;
}

/// The three register windows used by the PWM engine
///
/// Dropping the surface releases the windows in reverse mapping order.
pub struct Registers<W> {
    gpio: W,
    pwm: W,
    clock: W,
}

impl<W: RegisterWindow> Registers<W> {
    /// Maps the clock, PWM and GPIO windows, in that order
    ///
    /// If any window fails to map, the ones already mapped are released in
    /// reverse order and [`Error::ResourceUnavailable`] is returned.
    pub fn map<M>(mapper: &mut M, layout: &RegisterLayout) -> Result<Self>
    where
        M: Mapper<Window = W>,
    {
        let clock = map_one(mapper, layout, Window::Clock)?;
        let pwm = map_one(mapper, layout, Window::Pwm)?;
        let gpio = map_one(mapper, layout, Window::Gpio)?;
        Ok(Registers { gpio, pwm, clock })
    }

    /// Builds the surface from windows that are already mapped
    pub fn from_windows(gpio: W, pwm: W, clock: W) -> Self {
        Registers { gpio, pwm, clock }
    }

    #[inline(always)]
    pub fn read_register(&self, window: Window, offset: usize) -> u32 {
        self.window(window).read(offset)
    }

    #[inline(always)]
    pub fn write_register(&mut self, window: Window, offset: usize, value: u32) {
        self.window_mut(window).write(offset, value)
    }

    /// Read-modify-write of the bits selected by `mask`
    pub fn modify_register(&mut self, window: Window, offset: usize, mask: u32, bits: u32) {
        let value = (self.read_register(window, offset) & !mask) | (bits & mask);
        self.write_register(window, offset, value);
    }

    fn window(&self, window: Window) -> &W {
        match window {
            Window::Gpio => &self.gpio,
            Window::Pwm => &self.pwm,
            Window::Clock => &self.clock,
        }
    }

    fn window_mut(&mut self, window: Window) -> &mut W {
        match window {
            Window::Gpio => &mut self.gpio,
            Window::Pwm => &mut self.pwm,
            Window::Clock => &mut self.clock,
        }
    }
}

fn map_one<M: Mapper>(
    mapper: &mut M,
    layout: &RegisterLayout,
    window: Window,
) -> Result<M::Window> {
    let base = layout.base(window);
    mapper.map(window, base, layout.window_len).ok_or_else(|| {
        log_error!("unable to map register window at {:#x}", base);
        Error::ResourceUnavailable
    })
}

/// Volatile access to identity-mapped registers
pub struct MmioWindow {
    base: NonNull<u32>,
    len: usize,
}

// The window is plain device memory; exclusive access is enforced by the
// controller lock.
unsafe impl Send for MmioWindow {}

impl MmioWindow {
    /// Creates a window over `len` bytes at address `base`
    ///
    /// # Safety
    ///
    /// `base` must be the address of `len` bytes of device registers that stay
    /// valid for the life of the window and are not accessed through any other
    /// path.
    pub unsafe fn new(base: usize, len: usize) -> Option<Self> {
        NonNull::new(base as *mut u32).map(|base| MmioWindow { base, len })
    }
}

impl RegisterWindow for MmioWindow {
    #[inline(always)]
    fn read(&self, offset: usize) -> u32 {
        debug_assert!(offset + 4 <= self.len);
        unsafe { self.base.as_ptr().add(offset / 4).read_volatile() }
    }

    #[inline(always)]
    fn write(&mut self, offset: usize, value: u32) {
        debug_assert!(offset + 4 <= self.len);
        unsafe { self.base.as_ptr().add(offset / 4).write_volatile(value) }
    }
}

/// Mapper for bare-metal targets where physical and virtual addresses agree
pub struct IdentityMapper {
    _private: (),
}

impl IdentityMapper {
    /// # Safety
    ///
    /// The caller must be running with the peripheral block identity mapped
    /// and must not create a second mapper for the same registers.
    pub unsafe fn new() -> Self {
        IdentityMapper { _private: () }
    }
}

impl Mapper for IdentityMapper {
    type Window = MmioWindow;

    fn map(&mut self, _window: Window, base: usize, len: usize) -> Option<MmioWindow> {
        unsafe { MmioWindow::new(base, len) }
    }
}

#[cfg(test)]
pub(crate) mod mock {
    //! In-memory register windows that log every access in order

    use super::{Mapper, RegisterWindow, Window};
    use std::{
        collections::HashMap,
        sync::{Arc, Mutex},
        vec::Vec,
    };

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Access {
        Write(Window, usize, u32),
        DelayUs(u32),
    }

    pub type Log = Arc<Mutex<Vec<Access>>>;

    pub struct MockWindow {
        window: Window,
        values: HashMap<usize, u32>,
        log: Log,
    }

    impl RegisterWindow for MockWindow {
        fn read(&self, offset: usize) -> u32 {
            self.values.get(&offset).copied().unwrap_or(0)
        }

        fn write(&mut self, offset: usize, value: u32) {
            self.values.insert(offset, value);
            self.log.lock().unwrap().push(Access::Write(self.window, offset, value));
        }
    }

    #[derive(Default)]
    pub struct MockMapper {
        pub log: Log,
        pub fail_on: Option<Window>,
        pub mapped: Vec<(Window, usize, usize)>,
    }

    impl Mapper for MockMapper {
        type Window = MockWindow;

        fn map(&mut self, window: Window, base: usize, len: usize) -> Option<MockWindow> {
            if self.fail_on == Some(window) {
                return None;
            }
            self.mapped.push((window, base, len));
            Some(MockWindow { window, values: HashMap::new(), log: self.log.clone() })
        }
    }

    pub struct MockDelay(pub Log);

    impl embedded_hal::delay::DelayNs for MockDelay {
        fn delay_ns(&mut self, ns: u32) {
            self.0.lock().unwrap().push(Access::DelayUs(ns / 1_000));
        }

        fn delay_us(&mut self, us: u32) {
            self.0.lock().unwrap().push(Access::DelayUs(us));
        }
    }

    pub fn writes(log: &Log) -> Vec<Access> {
        log.lock().unwrap().clone()
    }
}
