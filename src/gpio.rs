//! General Purpose Input/Output (GPIO) function selection
//!
//! Every pin has a 3-bit function field. Ten pins share one function select
//! register, so selecting a function is a read-modify-write of that register.

use crate::{
    error::Bound,
    registers::{RegisterWindow, Registers, Window, GPIO_FSEL0},
    Error, Result,
};

/// Highest GPIO number of the BCM283x
pub const MAX_PIN: u8 = 53;

/// Pin function
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinFunction {
    Input,
    Output,
    /// Alternate function 0
    Alt0,
    /// Alternate function 1
    Alt1,
    /// Alternate function 2
    Alt2,
    /// Alternate function 3
    Alt3,
    /// Alternate function 4
    Alt4,
    /// Alternate function 5 (PWM on GPIO 18 and 19)
    Alt5,
}

impl PinFunction {
    /// Field value written to the function select register
    pub const fn fsel_bits(self) -> u32 {
        match self {
            PinFunction::Input => 0b000,
            PinFunction::Output => 0b001,
            PinFunction::Alt0 => 0b100,
            PinFunction::Alt1 => 0b101,
            PinFunction::Alt2 => 0b110,
            PinFunction::Alt3 => 0b111,
            PinFunction::Alt4 => 0b011,
            PinFunction::Alt5 => 0b010,
        }
    }
}

/// A GPIO pin number, checked against [`MAX_PIN`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pin(u8);

impl Pin {
    pub const fn new(number: u8) -> Result<Self> {
        if number > MAX_PIN {
            return Err(Error::OutOfRange(Bound::Pin));
        }
        Ok(Pin(number))
    }

    pub const fn number(self) -> u8 {
        self.0
    }

    /// Offset of the function select register holding this pin
    pub const fn fsel_offset(self) -> usize {
        GPIO_FSEL0 + (self.0 as usize / 10) * 4
    }

    /// Bit position of this pin's field inside its register
    pub const fn fsel_shift(self) -> u32 {
        (self.0 as u32 % 10) * 3
    }

    /// Switches the pin to `function`, leaving the other pins of the register alone
    pub fn set_function<W: RegisterWindow>(
        self,
        registers: &mut Registers<W>,
        function: PinFunction,
    ) {
        let shift = self.fsel_shift();
        registers.modify_register(
            Window::Gpio,
            self.fsel_offset(),
            0b111 << shift,
            function.fsel_bits() << shift,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registers::{mock::MockMapper, RegisterLayout};

    #[test]
    fn pin_18_lives_in_fsel1() {
        let pin = Pin::new(18).unwrap();
        assert_eq!(pin.fsel_offset(), 0x04);
        assert_eq!(pin.fsel_shift(), 24);
    }

    #[test]
    fn rejects_pins_past_53() {
        assert_eq!(Pin::new(54), Err(Error::OutOfRange(Bound::Pin)));
        assert!(Pin::new(53).is_ok());
    }

    #[test]
    fn select_keeps_neighbouring_fields() {
        let mut mapper = MockMapper::default();
        let mut registers = Registers::map(&mut mapper, &RegisterLayout::default()).unwrap();
        registers.write_register(Window::Gpio, 0x04, 0x3FFF_FFFF);

        let pin = Pin::new(18).unwrap();
        pin.set_function(&mut registers, PinFunction::Alt5);
        assert_eq!(registers.read_register(Window::Gpio, 0x04), 0x3AFF_FFFF);

        pin.set_function(&mut registers, PinFunction::Input);
        assert_eq!(registers.read_register(Window::Gpio, 0x04), 0x38FF_FFFF);
    }
}
