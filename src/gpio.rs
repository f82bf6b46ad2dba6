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

//! Interface for the GPIO peripheral.
//!
//! Pins are addressed by their BCM GPIO numbers, rather than their physical
//! location on the header.
//!
//! ## Backends
//!
//! [`MmapGpio`] maps the controller's register block into the process through
//! `/dev/gpiomem` (or `/dev/mem` as a fallback) and manipulates the registers
//! directly. It implements both [`Gpio`] and [`FunctionalGpio`], and adds access
//! to the hardware event detector through [`MmapGpio::event_detected`] and the
//! various edge/level detect enable setters.
//!
//! [`SysfsGpio`] uses the kernel's `/sys/class/gpio` interface. Pins are exported
//! the first time they're used, and unexported when [`SysfsGpio::close`] is called
//! or the backend goes out of scope. It only implements [`Gpio`].
//!
//! Both backends expect a single owner. Neither performs any locking, so concurrent
//! access from multiple threads has to be serialized by the caller, for instance
//! by wrapping the backend in a `Mutex`. A pin shouldn't be driven through both
//! backends at the same time.
//!
//! ## Pin change notifications
//!
//! A [`PinWatcher`] exports a single pin through sysfs, configures it to report
//! both rising and falling edges, and waits for changes on a background thread.
//! Every change is delivered as a [`PinEvent`] through a bounded queue available
//! from [`PinWatcher::events`].
//!
//! ## Permission denied
//!
//! `/dev/gpiomem` is accessible to members of the `gpio` group on a typical
//! Raspberry Pi OS installation, while `/dev/mem` requires superuser privileges.
//! The sysfs `export` and `unexport` attributes are writable by members of the
//! `gpio` group.
//!
//! [`MmapGpio`]: struct.MmapGpio.html
//! [`MmapGpio::event_detected`]: struct.MmapGpio.html#method.event_detected
//! [`SysfsGpio`]: struct.SysfsGpio.html
//! [`SysfsGpio::close`]: struct.SysfsGpio.html#method.close
//! [`PinWatcher`]: struct.PinWatcher.html
//! [`PinWatcher::events`]: struct.PinWatcher.html#method.events
//! [`PinEvent`]: struct.PinEvent.html
//! [`Gpio`]: trait.Gpio.html
//! [`FunctionalGpio`]: trait.FunctionalGpio.html

use std::error;
use std::fmt;
use std::io;
use std::ops::{BitOr, BitOrAssign, Not};
use std::result;

mod epoll;
pub mod mem;
mod mmap;
pub mod registers;
mod sysfs;
mod watcher;

pub use self::mem::{GpioMem, Registers};
// Test double for the register block, used by the integration tests.
#[doc(hidden)]
pub use self::mem::MockRegisters;
pub use self::mmap::{MmapGpio, RegisterDump};
pub use self::sysfs::SysfsGpio;
pub use self::watcher::{PinWatcher, State};

/// Errors that can occur when accessing the GPIO peripheral.
#[derive(Debug)]
pub enum Error {
    /// Invalid pin number.
    ///
    /// The register block only contains fields for BCM GPIO pins 0-53.
    InvalidPin(u8),
    /// Permission denied when opening `/dev/gpiomem`, `/dev/mem` or one of the
    /// sysfs GPIO attributes.
    ///
    /// More information on possible causes for this error can be found [here].
    ///
    /// [here]: index.html#permission-denied
    PermissionDenied(String),
    /// I/O error.
    Io(io::Error),
    /// Watcher thread panicked.
    ThreadPanic,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Error::InvalidPin(pin) => write!(f, "Invalid pin number: {}", pin),
            Error::PermissionDenied(ref path) => write!(f, "Permission denied: {}", path),
            Error::Io(ref err) => write!(f, "I/O error: {}", err),
            Error::ThreadPanic => write!(f, "Thread panicked"),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match *self {
            Error::Io(ref err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::Io(err)
    }
}

/// Result type returned from methods that can have `pigo::gpio::Error`s.
pub type Result<T> = result::Result<T, Error>;

/// Pin logic levels.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
#[repr(u8)]
pub enum Level {
    Low = 0,
    High = 1,
}

impl Level {
    /// Alias for [`Level::Low`].
    pub const OFF: Level = Level::Low;
    /// Alias for [`Level::High`].
    pub const ON: Level = Level::High;
}

impl From<bool> for Level {
    fn from(e: bool) -> Level {
        if e {
            Level::High
        } else {
            Level::Low
        }
    }
}

impl From<u8> for Level {
    fn from(value: u8) -> Self {
        if value == 0 {
            Level::Low
        } else {
            Level::High
        }
    }
}

impl Not for Level {
    type Output = Level;

    fn not(self) -> Level {
        match self {
            Level::Low => Level::High,
            Level::High => Level::Low,
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Level::Low => write!(f, "Low"),
            Level::High => write!(f, "High"),
        }
    }
}

/// Pin directions.
///
/// A direction is the input/output subset of [`Function`].
///
/// [`Function`]: enum.Function.html
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
#[repr(u8)]
pub enum Direction {
    Input = 0b000,
    Output = 0b001,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Direction::Input => write!(f, "In"),
            Direction::Output => write!(f, "Out"),
        }
    }
}

/// Pin functions.
///
/// The discriminants are the 3-bit function select codes used by the
/// hardware. The alternate functions aren't numbered in ascending order.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
#[repr(u8)]
pub enum Function {
    Input = 0b000,
    Output = 0b001,
    Alt0 = 0b100,
    Alt1 = 0b101,
    Alt2 = 0b110,
    Alt3 = 0b111,
    Alt4 = 0b011,
    Alt5 = 0b010,
}

impl Function {
    /// Decodes a function select field. Only the lowest 3 bits are used.
    pub fn from_bits(bits: u8) -> Function {
        match bits & 0b111 {
            0b000 => Function::Input,
            0b001 => Function::Output,
            0b100 => Function::Alt0,
            0b101 => Function::Alt1,
            0b110 => Function::Alt2,
            0b111 => Function::Alt3,
            0b011 => Function::Alt4,
            _ => Function::Alt5,
        }
    }

    /// Returns the 3-bit function select code.
    pub fn bits(self) -> u8 {
        self as u8
    }
}

impl From<Direction> for Function {
    fn from(direction: Direction) -> Function {
        match direction {
            Direction::Input => Function::Input,
            Direction::Output => Function::Output,
        }
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Function::Input => write!(f, "In"),
            Function::Output => write!(f, "Out"),
            Function::Alt0 => write!(f, "Alt0"),
            Function::Alt1 => write!(f, "Alt1"),
            Function::Alt2 => write!(f, "Alt2"),
            Function::Alt3 => write!(f, "Alt3"),
            Function::Alt4 => write!(f, "Alt4"),
            Function::Alt5 => write!(f, "Alt5"),
        }
    }
}

/// Built-in pull-up/pull-down resistor states.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
#[repr(u8)]
pub enum PullUpDown {
    Off = 0b00,
    PullDown = 0b01,
    PullUp = 0b10,
}

impl fmt::Display for PullUpDown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            PullUpDown::Off => write!(f, "Off"),
            PullUpDown::PullDown => write!(f, "PullDown"),
            PullUpDown::PullUp => write!(f, "PullUp"),
        }
    }
}

/// Bitmask of the conditions that caused a [`PinEvent`].
///
/// [`PinEvent`]: struct.PinEvent.html
#[derive(Debug, Default, PartialEq, Eq, Copy, Clone)]
pub struct EventType(u8);

impl EventType {
    pub const RISING_EDGE: EventType = EventType(0x01);
    pub const FALLING_EDGE: EventType = EventType(0x02);
    pub const HIGH: EventType = EventType(0x04);
    pub const LOW: EventType = EventType(0x08);
    pub const ASYNC_RISING: EventType = EventType(0x10);
    pub const ASYNC_FALLING: EventType = EventType(0x20);

    /// Returns the raw bitmask.
    pub fn bits(self) -> u8 {
        self.0
    }

    /// Returns `true` if every bit set in `other` is also set in `self`.
    pub fn contains(self, other: EventType) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for EventType {
    type Output = EventType;

    fn bitor(self, rhs: EventType) -> EventType {
        EventType(self.0 | rhs.0)
    }
}

impl BitOrAssign for EventType {
    fn bitor_assign(&mut self, rhs: EventType) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(EventType, &str); 6] = [
            (EventType::RISING_EDGE, "RisingEdge"),
            (EventType::FALLING_EDGE, "FallingEdge"),
            (EventType::HIGH, "High"),
            (EventType::LOW, "Low"),
            (EventType::ASYNC_RISING, "AsyncRising"),
            (EventType::ASYNC_FALLING, "AsyncFalling"),
        ];

        if self.is_empty() {
            return write!(f, "None");
        }

        let mut first = true;
        for (flag, name) in NAMES.iter() {
            if self.contains(*flag) {
                if !first {
                    write!(f, "|")?;
                }
                write!(f, "{}", name)?;
                first = false;
            }
        }

        Ok(())
    }
}

/// A pin change reported by a [`PinWatcher`].
///
/// [`PinWatcher`]: struct.PinWatcher.html
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub struct PinEvent {
    /// BCM GPIO pin number.
    pub pin: u8,
    /// Logic level read after the change.
    pub level: Level,
    /// Trigger conditions armed for the pin when the change was reported.
    pub types: EventType,
}

/// Basic pin control shared by every backend.
pub trait Gpio {
    /// Configures the pin as an input or output.
    fn set_direction(&mut self, pin: u8, direction: Direction) -> Result<()>;

    /// Reads the pin's logic level.
    fn value(&mut self, pin: u8) -> Result<Level>;

    /// Sets the pin's output level.
    fn set_value(&mut self, pin: u8, level: Level) -> Result<()>;

    /// Releases every resource held by the backend.
    fn close(self) -> Result<()>
    where
        Self: Sized;
}

/// Pin control for backends with access to the function select and
/// pull-up/pull-down registers.
pub trait FunctionalGpio: Gpio {
    /// Selects the pin's function.
    fn set_function(&mut self, pin: u8, function: Function) -> Result<()>;

    /// Returns the pin's currently selected function.
    fn function(&self, pin: u8) -> Result<Function>;

    /// Configures the pin's built-in pull-up/pull-down resistors.
    fn set_pullupdown(&mut self, pin: u8, pud: PullUpDown) -> Result<()>;
}
