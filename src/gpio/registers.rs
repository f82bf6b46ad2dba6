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

//! Register layout of the BCM283x GPIO controller.
//!
//! Everything in this module is pure bit math. Offsets are expressed in 32-bit
//! words relative to the start of the register block (datasheet @ 6.1).

use std::fmt;

/// Number of GPIO lines controlled by the register block.
pub const GPIO_LINES: u8 = 54;

/// Number of 32-bit words in the register block, GPFSEL0 up to and including GPPUDCLK1.
pub const REGISTER_COUNT: usize = 40;

/// Pull-up/down control register (GPPUD).
pub const GPPUD: usize = 37;

/// Mask of the 2-bit control signal in GPPUD.
pub const GPPUD_MASK: u32 = 0b11;

/// How a register group behaves when it's written to.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum Access {
    /// Fields are updated with a read-modify-write cycle.
    ReadWrite,
    /// Writing a 1 asserts the corresponding bit. Writing a 0 has no effect.
    WriteOnly,
    /// Writing a 1 clears the corresponding bit. Writing a 0 has no effect.
    ClearOnWrite,
    /// Writes are ignored.
    ReadOnly,
}

/// A named group of per-pin registers.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum Group {
    /// GPFSEL0-5
    FunctionSelect,
    /// GPSET0-1
    Set,
    /// GPCLR0-1
    Clear,
    /// GPLEV0-1
    Level,
    /// GPEDS0-1
    EventStatus,
    /// GPREN0-1
    RisingEdgeEnable,
    /// GPFEN0-1
    FallingEdgeEnable,
    /// GPHEN0-1
    HighEnable,
    /// GPLEN0-1
    LowEnable,
    /// GPAREN0-1
    AsyncRisingEnable,
    /// GPAFEN0-1
    AsyncFallingEnable,
    /// GPPUDCLK0-1
    PullClock,
}

impl Group {
    pub const ALL: [Group; 12] = [
        Group::FunctionSelect,
        Group::Set,
        Group::Clear,
        Group::Level,
        Group::EventStatus,
        Group::RisingEdgeEnable,
        Group::FallingEdgeEnable,
        Group::HighEnable,
        Group::LowEnable,
        Group::AsyncRisingEnable,
        Group::AsyncFallingEnable,
        Group::PullClock,
    ];

    /// Offset of the group's first register.
    pub fn base(self) -> usize {
        match self {
            Group::FunctionSelect => 0,
            Group::Set => 7,
            Group::Clear => 10,
            Group::Level => 13,
            Group::EventStatus => 16,
            Group::RisingEdgeEnable => 19,
            Group::FallingEdgeEnable => 22,
            Group::HighEnable => 25,
            Group::LowEnable => 28,
            Group::AsyncRisingEnable => 31,
            Group::AsyncFallingEnable => 34,
            Group::PullClock => 38,
        }
    }

    /// Number of registers in the group.
    pub fn size(self) -> usize {
        match self {
            Group::FunctionSelect => 6,
            _ => 2,
        }
    }

    /// Number of bits used per pin.
    pub fn width(self) -> u32 {
        match self {
            Group::FunctionSelect => 3,
            _ => 1,
        }
    }

    /// Number of pins sharing a single register.
    pub fn pins_per_register(self) -> u8 {
        match self {
            Group::FunctionSelect => 10,
            _ => 32,
        }
    }

    pub fn access(self) -> Access {
        match self {
            Group::Set | Group::Clear | Group::PullClock => Access::WriteOnly,
            Group::EventStatus => Access::ClearOnWrite,
            Group::Level => Access::ReadOnly,
            _ => Access::ReadWrite,
        }
    }

    /// Returns `true` if `offset` belongs to this group.
    pub fn contains(self, offset: usize) -> bool {
        offset >= self.base() && offset < self.base() + self.size()
    }

    /// Returns the group `offset` belongs to, if any.
    pub fn at(offset: usize) -> Option<Group> {
        Group::ALL.iter().copied().find(|group| group.contains(offset))
    }

    fn name(self) -> &'static str {
        match self {
            Group::FunctionSelect => "GPFSEL",
            Group::Set => "GPSET",
            Group::Clear => "GPCLR",
            Group::Level => "GPLEV",
            Group::EventStatus => "GPEDS",
            Group::RisingEdgeEnable => "GPREN",
            Group::FallingEdgeEnable => "GPFEN",
            Group::HighEnable => "GPHEN",
            Group::LowEnable => "GPLEN",
            Group::AsyncRisingEnable => "GPAREN",
            Group::AsyncFallingEnable => "GPAFEN",
            Group::PullClock => "GPPUDCLK",
        }
    }
}

impl fmt::Display for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Location of a single pin's field within a register group.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub struct Field {
    pub group: Group,
    /// Register index within the group.
    pub index: usize,
    /// Offset of the register within the register block.
    pub offset: usize,
    pub shift: u32,
    pub mask: u32,
}

impl Field {
    /// Computes the field for `pin` in `group`.
    ///
    /// The pin number isn't checked against the number of available lines.
    pub fn new(group: Group, pin: u8) -> Field {
        let per_register = group.pins_per_register();
        let index = (pin / per_register) as usize;
        let shift = u32::from(pin % per_register) * group.width();
        let mask = ((1 << group.width()) - 1) << shift;

        Field {
            group,
            index,
            offset: group.base() + index,
            shift,
            mask,
        }
    }

    /// Extracts the field's value from a register value.
    pub fn get(&self, reg_value: u32) -> u32 {
        (reg_value & self.mask) >> self.shift
    }

    /// Replaces the field's value in a register value, leaving all other bits intact.
    pub fn set(&self, reg_value: u32, value: u32) -> u32 {
        (reg_value & !self.mask) | ((value << self.shift) & self.mask)
    }

    /// Register value with only this field's bits set.
    ///
    /// Used for write-only and clear-on-write registers, where a 0 bit is ignored.
    pub fn bits(&self) -> u32 {
        self.mask
    }
}
