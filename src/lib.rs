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

//! Pigo provides pin-level control of the Raspberry Pi's BCM283x GPIO controller.
//!
//! Two interchangeable backends implement the same capability traits:
//!
//! * [`MmapGpio`] drives the controller's register block directly, mapped
//!   through `/dev/gpiomem` or `/dev/mem`. Besides reading and writing pins it
//!   supports function selection, pull-up/pull-down configuration and the
//!   hardware edge/level event detector.
//! * [`SysfsGpio`] uses the kernel's `/sys/class/gpio` interface, exporting
//!   pins on first use and unexporting them again when it's closed.
//!
//! A [`PinWatcher`] reports pin changes from a background thread without
//! busy-polling, by waiting on the pin's sysfs `value` attribute with epoll.
//!
//! Pigo logs through the [`log`] facade and never installs a logger itself.
//!
//! [`MmapGpio`]: gpio/struct.MmapGpio.html
//! [`SysfsGpio`]: gpio/struct.SysfsGpio.html
//! [`PinWatcher`]: gpio/struct.PinWatcher.html
//! [`log`]: https://docs.rs/log

#[macro_use]
mod macros;

pub mod gpio;
#[cfg(feature = "hal")]
pub mod hal;
