//! PWM clock configuration
//
// The PWM block is fed by the clock manager's PWM clock, an integer division
// of the 19.2 MHz oscillator. The fractional divider (DIVF) is left at zero;
// it drops clock cycles to hit the output frequency, which makes servo pulses
// jitter.
//
// Reprogramming a running clock divisor is undefined, and waiting for the
// BUSY flag after clearing ENAB does not work, so the clock is killed, given
// time to settle, and only then given a new divisor and re-enabled.

use embedded_hal::delay::DelayNs;
use embedded_time::rate::Hertz;

use crate::{
    delay::SettleDelay,
    error::Bound,
    registers::{RegisterWindow, Registers, Window, CM_PWMCTL, CM_PWMDIV},
    Error, Result,
};

/// Oscillator frequency feeding the PWM clock
pub const REFERENCE_CLOCK: Hertz = Hertz(19_200_000);

/// Largest integer divisor accepted by the clock manager
pub const MAX_DIVISOR: u32 = 0x1000;

/// Clock manager password, required in the top byte of every write
const CM_PASSWD: u32 = 0x5A00_0000;
/// Stop the clock generator immediately
const CM_KILL: u32 = 1 << 5;
/// Enable the clock generator
const CM_ENAB: u32 = 1 << 4;
/// Clock source: oscillator
const CM_SRC_OSC: u32 = 1;
/// Position of the integer divisor in the divisor register
const CM_DIVI_SHIFT: u32 = 12;

/// Value written to the clock control register to stop the clock
pub const fn kill_pattern() -> u32 {
    CM_PASSWD | CM_KILL
}

/// Value written to the clock control register to start the clock
pub const fn enable_pattern() -> u32 {
    CM_PASSWD | CM_ENAB | CM_SRC_OSC
}

/// Value written to the divisor register for `divisor`
pub const fn divisor_pattern(divisor: u32) -> u32 {
    CM_PASSWD | (divisor << CM_DIVI_SHIFT)
}

/// Result of a divisor computation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockDivisor {
    /// Integer divisor in `1..=4096`
    pub divisor: u32,
    /// Real clock frequency after rounding the divisor down
    pub achieved: Hertz,
}

/// Computes the divisor bringing `reference` down to `mcf`
///
/// The divisor is `reference / mcf`, rounded down, and must lie in
/// `1..=4096`; it is never clamped. The achieved frequency is
/// `reference / divisor`, also rounded down, so it generally differs from the
/// requested `mcf`.
pub fn compute_clock(reference: Hertz, mcf: Hertz) -> Result<ClockDivisor> {
    if mcf.0 == 0 {
        log_error!("no MCF specified");
        return Err(Error::InvalidArgument);
    }

    let divisor = reference.0 / mcf.0;
    if !(1..=MAX_DIVISOR).contains(&divisor) {
        log_error!("divisor out of range: {:#x}", divisor);
        return Err(Error::OutOfRange(Bound::Divisor));
    }

    Ok(ClockDivisor {
        divisor,
        achieved: Hertz(reference.0 / divisor),
    })
}

/// Stops the PWM clock and waits for it to settle
pub fn stop<W, D>(registers: &mut Registers<W>, delay: &mut SettleDelay<D>)
where
    W: RegisterWindow,
    D: DelayNs,
{
    registers.write_register(Window::Clock, CM_PWMCTL, kill_pattern());
    delay.settle();
}

/// Loads a new divisor into the stopped clock and starts it
pub fn start<W: RegisterWindow>(registers: &mut Registers<W>, clock: &ClockDivisor) {
    registers.write_register(Window::Clock, CM_PWMDIV, divisor_pattern(clock.divisor));
    registers.write_register(Window::Clock, CM_PWMCTL, enable_pattern());
}
