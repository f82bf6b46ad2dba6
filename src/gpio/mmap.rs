// Copyright (c) 2017-2021 Rene van der Meer
//
// Permission is hereby granted, free of charge, to any person obtaining a
// copy of this software and associated documentation files (the "Software"),
// to deal in the Software without restriction, including without limitation
// the rights to use, copy, modify, merge, publish, distribute, sublicense,
// and/or sell copies of the Software, and to permit persons to whom the
// Software is furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in
// all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL
// THE AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
// FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
// DEALINGS IN THE SOFTWARE.

use std::fmt;
use std::thread;
use std::time::Duration;

use log::info;

use super::mem::{GpioMem, Registers};
use super::registers::{Access, Field, Group, GPIO_LINES, GPPUD, GPPUD_MASK};
use super::{Direction, Error, Function, FunctionalGpio, Gpio, Level, PullUpDown, Result};

// Minimum time between clearing an event detect status bit and writing 0 to
// the entire GPEDS register. Shorter delays leave the event asserted on the
// hardware.
const EVENT_CLEAR_DELAY: Duration = Duration::from_nanos(500);

// Set-up and hold time for the GPPUD control signal while it's being clocked
// into a pin through GPPUDCLK.
const PUD_SETUP_DELAY: Duration = Duration::from_nanos(250);
const PUD_HOLD_DELAY: Duration = Duration::from_nanos(250);

/// GPIO backend that manipulates the controller's registers directly.
///
/// `MmapGpio` doesn't perform any locking. Read-modify-write cycles aren't
/// atomic, so concurrent access has to be serialized by the caller.
#[derive(Debug)]
pub struct MmapGpio {
    regs: Box<dyn Registers>,
}

impl MmapGpio {
    /// Constructs a new `MmapGpio` by mapping the register block with [`GpioMem::open`].
    ///
    /// [`GpioMem::open`]: struct.GpioMem.html#method.open
    pub fn new() -> Result<MmapGpio> {
        Ok(MmapGpio::with_registers(GpioMem::open()?))
    }

    /// Constructs a new `MmapGpio` on top of an existing register block.
    pub fn with_registers<R: Registers + 'static>(regs: R) -> MmapGpio {
        MmapGpio {
            regs: Box::new(regs),
        }
    }

    fn field(&self, group: Group, pin: u8) -> Result<Field> {
        if pin >= GPIO_LINES {
            return Err(Error::InvalidPin(pin));
        }

        let field = Field::new(group, pin);
        debug_assert!(field.offset < self.regs.word_count());

        Ok(field)
    }

    #[inline]
    fn read_field(&self, field: Field) -> u32 {
        field.get(self.regs.read(field.offset))
    }

    fn modify_field(&mut self, field: Field, value: u32) {
        debug_assert_eq!(field.group.access(), Access::ReadWrite);

        let reg_value = self.regs.read(field.offset);
        self.regs.write(field.offset, field.set(reg_value, value));
    }

    // Set, clear and clock registers ignore 0 bits, so the field's bits are
    // written as is.
    fn assert_field(&mut self, field: Field) {
        debug_assert_eq!(field.group.access(), Access::WriteOnly);

        self.regs.write(field.offset, field.bits());
    }

    /// Drives the pin's output high through GPSET.
    pub fn set_output(&mut self, pin: u8) -> Result<()> {
        let field = self.field(Group::Set, pin)?;
        self.assert_field(field);

        Ok(())
    }

    /// Drives the pin's output low through GPCLR.
    pub fn clear_output(&mut self, pin: u8) -> Result<()> {
        let field = self.field(Group::Clear, pin)?;
        self.assert_field(field);

        Ok(())
    }

    /// Returns `true` if an event was detected on the pin.
    ///
    /// A detected event is cleared with [`clear_event_detect`] before
    /// returning, so each event is only reported once.
    ///
    /// [`clear_event_detect`]: #method.clear_event_detect
    pub fn event_detected(&mut self, pin: u8) -> Result<bool> {
        let field = self.field(Group::EventStatus, pin)?;

        if self.read_field(field) != 0 {
            self.clear_event_detect(pin)?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Clears the pin's event detect status.
    ///
    /// Writing a 1 clears the pin's status bit. After waiting for at least
    /// 500 ns, the entire register is set to 0. Both steps and the delay are
    /// required by the hardware.
    pub fn clear_event_detect(&mut self, pin: u8) -> Result<()> {
        let field = self.field(Group::EventStatus, pin)?;
        debug_assert_eq!(field.group.access(), Access::ClearOnWrite);

        self.regs.write(field.offset, field.bits());
        thread::sleep(EVENT_CLEAR_DELAY);
        self.regs.write(field.offset, 0);

        Ok(())
    }

    fn set_detect(&mut self, group: Group, pin: u8, enabled: bool) -> Result<()> {
        let field = self.field(group, pin)?;
        self.modify_field(field, u32::from(enabled));

        Ok(())
    }

    /// Enables or disables synchronous rising edge detection.
    pub fn set_rising_edge_detect(&mut self, pin: u8, enabled: bool) -> Result<()> {
        self.set_detect(Group::RisingEdgeEnable, pin, enabled)
    }

    /// Enables or disables synchronous falling edge detection.
    pub fn set_falling_edge_detect(&mut self, pin: u8, enabled: bool) -> Result<()> {
        self.set_detect(Group::FallingEdgeEnable, pin, enabled)
    }

    /// Enables or disables high level detection.
    pub fn set_high_detect(&mut self, pin: u8, enabled: bool) -> Result<()> {
        self.set_detect(Group::HighEnable, pin, enabled)
    }

    /// Enables or disables low level detection.
    pub fn set_low_detect(&mut self, pin: u8, enabled: bool) -> Result<()> {
        self.set_detect(Group::LowEnable, pin, enabled)
    }

    /// Enables or disables asynchronous rising edge detection.
    pub fn set_async_rising_edge_detect(&mut self, pin: u8, enabled: bool) -> Result<()> {
        self.set_detect(Group::AsyncRisingEnable, pin, enabled)
    }

    /// Enables or disables asynchronous falling edge detection.
    pub fn set_async_falling_edge_detect(&mut self, pin: u8, enabled: bool) -> Result<()> {
        self.set_detect(Group::AsyncFallingEnable, pin, enabled)
    }

    /// Captures the function select and level registers, and logs them.
    pub fn dump(&self) -> RegisterDump {
        let mut dump = RegisterDump {
            word_count: self.regs.word_count(),
            function_select: [0; 6],
            level: [0; 2],
        };

        for (index, word) in dump.function_select.iter_mut().enumerate() {
            *word = self.regs.read(Group::FunctionSelect.base() + index);
        }

        for (index, word) in dump.level.iter_mut().enumerate() {
            *word = self.regs.read(Group::Level.base() + index);
        }

        for line in dump.to_string().lines() {
            info!("{}", line);
        }

        dump
    }
}

impl Gpio for MmapGpio {
    fn set_direction(&mut self, pin: u8, direction: Direction) -> Result<()> {
        self.set_function(pin, Function::from(direction))
    }

    fn value(&mut self, pin: u8) -> Result<Level> {
        let field = self.field(Group::Level, pin)?;

        Ok(Level::from(self.read_field(field) as u8))
    }

    fn set_value(&mut self, pin: u8, level: Level) -> Result<()> {
        match level {
            Level::High => self.set_output(pin),
            Level::Low => self.clear_output(pin),
        }
    }

    /// Removes the register block's memory mapping.
    fn close(mut self) -> Result<()> {
        self.regs.release()
    }
}

impl FunctionalGpio for MmapGpio {
    fn set_function(&mut self, pin: u8, function: Function) -> Result<()> {
        let field = self.field(Group::FunctionSelect, pin)?;
        self.modify_field(field, u32::from(function.bits()));

        Ok(())
    }

    fn function(&self, pin: u8) -> Result<Function> {
        let field = self.field(Group::FunctionSelect, pin)?;

        Ok(Function::from_bits(self.read_field(field) as u8))
    }

    /// Configures the pin's built-in pull-up/pull-down resistors.
    ///
    /// The control signal in GPPUD has to be clocked into the pin through
    /// GPPUDCLK, with a set-up and hold time of at least 250 ns each. Both
    /// registers are reset afterwards, so GPPUD always reads back as `Off`.
    fn set_pullupdown(&mut self, pin: u8, pud: PullUpDown) -> Result<()> {
        let clock = self.field(Group::PullClock, pin)?;

        // Set the control signal in GPPUD.
        let reg_value = self.regs.read(GPPUD);
        self.regs
            .write(GPPUD, (reg_value & !GPPUD_MASK) | (pud as u32 & GPPUD_MASK));

        // Set-up time for the control signal.
        thread::sleep(PUD_SETUP_DELAY);

        // Clock the control signal into the selected pin.
        self.assert_field(clock);

        // Hold time for the control signal.
        thread::sleep(PUD_HOLD_DELAY);

        // Remove the control signal and clock.
        let reg_value = self.regs.read(GPPUD);
        self.regs.write(
            GPPUD,
            (reg_value & !GPPUD_MASK) | (PullUpDown::Off as u32 & GPPUD_MASK),
        );
        self.regs.write(clock.offset, 0);

        Ok(())
    }
}

/// Snapshot of the function select and level registers.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub struct RegisterDump {
    /// Number of 32-bit words in the register block.
    pub word_count: usize,
    /// GPFSEL0-5
    pub function_select: [u32; 6],
    /// GPLEV0-1
    pub level: [u32; 2],
}

impl fmt::Display for RegisterDump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Register block length: {}", self.word_count)?;
        writeln!(f, "{:9}10987654321098765432109876543210", "")?;

        for (index, word) in self.function_select.iter().enumerate() {
            let label = format!("{}{}:", Group::FunctionSelect, index);
            writeln!(f, "{:9}{:032b}", label, word)?;
        }

        for (index, word) in self.level.iter().enumerate() {
            let label = format!("{}{}:", Group::Level, index);
            writeln!(f, "{:9}{:032b}", label, word)?;
        }

        Ok(())
    }
}
