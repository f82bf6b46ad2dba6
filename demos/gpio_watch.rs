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

// gpio_watch.rs - Prints every level change on a GPIO pin until a SIGINT
// (Ctrl-C) or SIGTERM signal is caught.
//
// Usage: gpio_watch [BCM GPIO number]

use std::env;
use std::error::Error;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use simple_signal::{self, Signal};

use pigo::gpio::PinWatcher;

const GPIO_BUTTON: u8 = 17;

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let pin = match env::args().nth(1) {
        Some(arg) => arg.parse()?,
        None => GPIO_BUTTON,
    };

    let mut watcher = PinWatcher::new(pin)?;

    let running = Arc::new(AtomicBool::new(true));

    // When a SIGINT (Ctrl-C) or SIGTERM signal is caught, atomically set running to false.
    simple_signal::set_handler(&[Signal::Int, Signal::Term], {
        let running = running.clone();
        move |_| {
            running.store(false, Ordering::SeqCst);
        }
    });

    println!("Watching GPIO {}. Press Ctrl-C to stop.", pin);

    while running.load(Ordering::SeqCst) {
        if let Ok(event) = watcher.events().recv_timeout(Duration::from_millis(250)) {
            println!("GPIO {} is {} ({})", event.pin, event.level, event.types);
        }
    }

    // Waits until the watcher thread has stopped and the pin is unexported.
    watcher.close()?;

    Ok(())
}
