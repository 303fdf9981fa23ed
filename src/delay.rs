//! Delays
//!
//! The PWM block and its clock need a short settle time after being stopped
//! before they can be reprogrammed. [`SettleDelay`] wraps any `DelayNs`
//! provider with that fixed wait.

use embedded_hal::delay::DelayNs;

/// Settle time the PWM block and clock need after being stopped
pub const DEFAULT_SETTLE_US: u32 = 10;

/// Busy-wait of a fixed number of microseconds
pub struct SettleDelay<D> {
    delay: D,
    us: u32,
}

impl<D: DelayNs> SettleDelay<D> {
    pub fn new(delay: D, us: u32) -> Self {
        SettleDelay { delay, us }
    }

    /// Blocks for the configured settle time
    #[inline]
    pub fn settle(&mut self) {
        self.delay.delay_us(self.us);
    }

    pub fn settle_us(&self) -> u32 {
        self.us
    }

    /// Releases the wrapped delay provider
    pub fn free(self) -> D {
        self.delay
    }
}

/// Core cycle counting busy-wait for the ARM cores of the BCM283x
#[cfg(target_arch = "arm")]
#[derive(Copy, Clone)]
pub struct CycleDelay {
    core_frequency: u32,
}

#[cfg(target_arch = "arm")]
impl CycleDelay {
    /// Constructs the delay provider based on provided core clock frequency
    pub fn new(freq: u32) -> Self {
        Self {
            core_frequency: freq,
        }
    }

    /// perform a busy-wait loop until the number of cycles requested has elapsed
    #[inline]
    pub fn delay_cycles(cycle_count: u32) {
        cortex_m::asm::delay(cycle_count);
    }
}

#[cfg(target_arch = "arm")]
impl DelayNs for CycleDelay {
    fn delay_ns(&mut self, ns: u32) {
        let cycles = (u64::from(ns) * u64::from(self.core_frequency)) / 1_000_000_000;
        Self::delay_cycles(u32::try_from(cycles).unwrap_or(u32::MAX));
    }

    fn delay_us(&mut self, us: u32) {
        let cycles = (u64::from(us) * u64::from(self.core_frequency)) / 1_000_000;
        Self::delay_cycles(u32::try_from(cycles).unwrap_or(u32::MAX));
    }
}
