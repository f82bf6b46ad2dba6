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

// gpio_status.rs - Retrieves the function and logic level for each of the
// GPIO pins on the header, and logs the raw register contents.
//
// Set RUST_LOG=info to see the register dump.

use std::error::Error;

use pigo::gpio::{FunctionalGpio, Gpio, MmapGpio};

// GPIO pins 0-27 are available on the 40-pin header.
const HEADER_GPIOS: u8 = 28;

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let mut gpio = MmapGpio::new()?;

    println!("+--------+-------+-------+");
    println!("|  GPIO  | Func  | Level |");
    println!("+--------+-------+-------+");

    for pin in 0..HEADER_GPIOS {
        println!(
            "| GPIO{:<2} | {:<5} | {:<5} |",
            pin,
            gpio.function(pin)?.to_string(),
            gpio.value(pin)?.to_string()
        );
    }

    println!("+--------+-------+-------+");

    gpio.dump();
    gpio.close()?;

    Ok(())
}
