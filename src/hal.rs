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

//! `embedded-hal` trait implementations.
//!
//! [`HalPin`] exposes a single pin of any [`Gpio`] backend through the
//! `embedded-hal` v1 digital traits, so it can be handed to platform-agnostic
//! drivers.
//!
//! [`HalPin`]: struct.HalPin.html
//! [`Gpio`]: ../gpio/trait.Gpio.html

use embedded_hal::digital::{self, ErrorKind, ErrorType, InputPin, OutputPin, StatefulOutputPin};

use crate::gpio::{Error, Gpio, Level};

impl digital::Error for Error {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

/// A single pin borrowed from a [`Gpio`] backend.
///
/// The pin's direction isn't changed. Configure it through the backend first.
///
/// [`Gpio`]: ../gpio/trait.Gpio.html
#[derive(Debug)]
pub struct HalPin<'a, G: Gpio + ?Sized> {
    gpio: &'a mut G,
    pin: u8,
}

impl<'a, G: Gpio + ?Sized> HalPin<'a, G> {
    /// Constructs a new `HalPin` for the specified BCM GPIO number.
    pub fn new(gpio: &'a mut G, pin: u8) -> HalPin<'a, G> {
        HalPin { gpio, pin }
    }

    /// Returns the BCM GPIO pin number.
    pub fn pin(&self) -> u8 {
        self.pin
    }
}

impl<G: Gpio + ?Sized> ErrorType for HalPin<'_, G> {
    type Error = Error;
}

impl<G: Gpio + ?Sized> InputPin for HalPin<'_, G> {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        Ok(self.gpio.value(self.pin)? == Level::High)
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        Ok(self.gpio.value(self.pin)? == Level::Low)
    }
}

impl<G: Gpio + ?Sized> OutputPin for HalPin<'_, G> {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.gpio.set_value(self.pin, Level::Low)
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.gpio.set_value(self.pin, Level::High)
    }
}

// The output state is read back from the pin's level.
impl<G: Gpio + ?Sized> StatefulOutputPin for HalPin<'_, G> {
    fn is_set_high(&mut self) -> Result<bool, Self::Error> {
        InputPin::is_high(self)
    }

    fn is_set_low(&mut self) -> Result<bool, Self::Error> {
        InputPin::is_low(self)
    }
}
