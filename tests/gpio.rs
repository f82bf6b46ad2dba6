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

use pigo::gpio::{
    Direction, Function, FunctionalGpio, Gpio, Level, MmapGpio, MockRegisters, PullUpDown,
};

#[test]
fn output_and_input_pins() {
    let regs = MockRegisters::new();
    let mut gpio = MmapGpio::with_registers(regs.clone());

    gpio.set_direction(17, Direction::Output).unwrap();
    gpio.set_value(17, Level::High).unwrap();

    assert_eq!(gpio.function(17).unwrap(), Function::Output);
    assert_eq!(gpio.value(17).unwrap(), Level::High);

    gpio.set_direction(4, Direction::Input).unwrap();
    gpio.set_pullupdown(4, PullUpDown::PullDown).unwrap();

    assert_eq!(gpio.function(4).unwrap(), Function::Input);
    assert_eq!(regs.pull(4), PullUpDown::PullDown);

    // Configuring pin 4 didn't touch pin 17
    assert_eq!(gpio.function(17).unwrap(), Function::Output);
    assert_eq!(gpio.value(17).unwrap(), Level::High);

    gpio.close().unwrap();
}

#[test]
fn backends_are_interchangeable() {
    fn blink<G: Gpio>(gpio: &mut G, pin: u8) -> pigo::gpio::Result<Level> {
        gpio.set_direction(pin, Direction::Output)?;
        gpio.set_value(pin, Level::ON)?;
        gpio.set_value(pin, Level::OFF)?;
        gpio.value(pin)
    }

    let mut gpio = MmapGpio::with_registers(MockRegisters::new());
    assert_eq!(blink(&mut gpio, 27).unwrap(), Level::Low);
}

#[test]
fn alternate_functions_round_trip() {
    let mut gpio = MmapGpio::with_registers(MockRegisters::new());

    gpio.set_function(14, Function::Alt0).unwrap();
    gpio.set_function(15, Function::Alt5).unwrap();

    assert_eq!(gpio.function(14).unwrap(), Function::Alt0);
    assert_eq!(gpio.function(15).unwrap(), Function::Alt5);
    assert_eq!(gpio.function(16).unwrap(), Function::Input);
}
