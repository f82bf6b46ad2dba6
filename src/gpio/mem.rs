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

//! Access to the GPIO register block.

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::ptr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use libc::{self, c_void, off_t, size_t, MAP_FAILED, MAP_SHARED, O_SYNC, PROT_READ, PROT_WRITE};
use log::debug;

use super::registers::{Access, Field, Group, GPIO_LINES, GPPUD, GPPUD_MASK, REGISTER_COUNT};
use super::{Error, Level, PullUpDown, Result};

const PATH_DEV_GPIOMEM: &str = "/dev/gpiomem";
const PATH_DEV_MEM: &str = "/dev/mem";
const PATH_BASE_COMPATIBLE: &str = "/sys/firmware/devicetree/base/compatible";

const PERIPHERAL_BASE_BCM2835: u64 = 0x2000_0000;
const PERIPHERAL_BASE_BCM2836: u64 = 0x3f00_0000;
const PERIPHERAL_BASE_BCM2711: u64 = 0xfe00_0000;
const GPIO_OFFSET: u64 = 0x20_0000;

/// Physical address of the GPIO register block on the BCM2835.
pub const GPIO_BASE_BCM2835: u64 = PERIPHERAL_BASE_BCM2835 + GPIO_OFFSET;

// Looks up the GPIO base address for the SoC named in a devicetree
// `compatible` property, which holds NUL-separated strings.
fn gpio_base_from_compatible(compatible: &str) -> Option<u64> {
    compatible.split('\0').find_map(|comp_id| {
        let peripheral_base = match comp_id {
            "brcm,bcm2835" => PERIPHERAL_BASE_BCM2835,
            "brcm,bcm2836" | "brcm,bcm2837" => PERIPHERAL_BASE_BCM2836,
            "brcm,bcm2711" => PERIPHERAL_BASE_BCM2711,
            _ => return None,
        };

        Some(peripheral_base + GPIO_OFFSET)
    })
}

/// Returns the physical address of the GPIO register block for the SoC this
/// process runs on.
///
/// The SoC is identified through `/sys/firmware/devicetree/base/compatible`.
/// If it can't be identified, the BCM2835's address is returned.
pub fn gpio_base() -> u64 {
    match fs::read_to_string(PATH_BASE_COMPATIBLE) {
        Ok(compatible) => gpio_base_from_compatible(&compatible).unwrap_or_else(|| {
            debug!("Unknown SoC, using the BCM2835 GPIO base address");
            GPIO_BASE_BCM2835
        }),
        Err(_) => GPIO_BASE_BCM2835,
    }
}

const GPIO_MEM_SIZE: usize = REGISTER_COUNT * std::mem::size_of::<u32>();

/// A block of 32-bit GPIO registers.
///
/// Offsets are expressed in 32-bit words. Implementations panic when an offset
/// lies outside of the block.
pub trait Registers: fmt::Debug + Send {
    /// Number of 32-bit words in the block.
    fn word_count(&self) -> usize;

    fn read(&self, offset: usize) -> u32;

    fn write(&mut self, offset: usize, value: u32);

    /// Releases the block. Reads and writes aren't allowed afterwards.
    fn release(&mut self) -> Result<()> {
        Ok(())
    }
}

/// The GPIO register block, memory-mapped through `/dev/gpiomem` or `/dev/mem`.
///
/// The mapping is removed when `GpioMem` goes out of scope, or when
/// [`release`] is called.
///
/// [`release`]: trait.Registers.html#method.release
pub struct GpioMem {
    mem_ptr: *mut u32,
}

impl fmt::Debug for GpioMem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GpioMem")
            .field("mem_ptr", &self.mem_ptr)
            .finish()
    }
}

impl GpioMem {
    /// Maps the register block through `/dev/gpiomem`, falling back to
    /// `/dev/mem` at the address returned by [`gpio_base`].
    ///
    /// [`gpio_base`]: fn.gpio_base.html
    pub fn open() -> Result<GpioMem> {
        // Try /dev/gpiomem first. If that fails, try /dev/mem instead. If neither works,
        // report back the error that's the most relevant.
        match Self::open_path(PATH_DEV_GPIOMEM, 0) {
            Ok(mem) => Ok(mem),
            Err(gpiomem_err) => match Self::open_path(PATH_DEV_MEM, gpio_base()) {
                Ok(mem) => Ok(mem),
                Err(Error::PermissionDenied(devmem_path)) => match gpiomem_err {
                    // Solving /dev/gpiomem issues (add user to the gpio group) should be
                    // preferred over /dev/mem (run as root).
                    Error::PermissionDenied(_) => Err(gpiomem_err),
                    _ => Err(Error::PermissionDenied(devmem_path)),
                },
                Err(_) => Err(gpiomem_err),
            },
        }
    }

    /// Maps the register block from `path`, starting at byte `offset`.
    ///
    /// `offset` has to be a multiple of the page size.
    pub fn open_path<P: AsRef<Path>>(path: P, offset: u64) -> Result<GpioMem> {
        let path = path.as_ref();

        let mem_file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(O_SYNC)
            .open(path)
            .map_err(|e| match e.kind() {
                io::ErrorKind::PermissionDenied => {
                    Error::PermissionDenied(path.display().to_string())
                }
                _ => Error::Io(e),
            })?;

        let mem_ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                GPIO_MEM_SIZE,
                PROT_READ | PROT_WRITE,
                MAP_SHARED,
                mem_file.as_raw_fd(),
                offset as off_t,
            )
        };

        if mem_ptr == MAP_FAILED {
            return Err(Error::Io(io::Error::last_os_error()));
        }

        debug!("Mapped {} bytes of {} at {:#x}", GPIO_MEM_SIZE, path.display(), offset);

        // The mapping stays valid after mem_file is closed.
        Ok(GpioMem {
            mem_ptr: mem_ptr as *mut u32,
        })
    }

    #[inline(always)]
    fn word_ptr(&self, offset: usize) -> *mut u32 {
        assert!(!self.mem_ptr.is_null(), "GPIO register block was released");
        assert!(
            offset < REGISTER_COUNT,
            "register offset {} out of bounds",
            offset
        );

        unsafe { self.mem_ptr.add(offset) }
    }
}

impl Registers for GpioMem {
    fn word_count(&self) -> usize {
        REGISTER_COUNT
    }

    #[inline(always)]
    fn read(&self, offset: usize) -> u32 {
        unsafe { ptr::read_volatile(self.word_ptr(offset)) }
    }

    #[inline(always)]
    fn write(&mut self, offset: usize, value: u32) {
        unsafe { ptr::write_volatile(self.word_ptr(offset), value) }
    }

    fn release(&mut self) -> Result<()> {
        if self.mem_ptr.is_null() {
            return Ok(());
        }

        parse_retval!(unsafe {
            libc::munmap(self.mem_ptr as *mut c_void, GPIO_MEM_SIZE as size_t)
        })?;
        self.mem_ptr = ptr::null_mut();

        debug!("Unmapped GPIO register block");

        Ok(())
    }
}

impl Drop for GpioMem {
    fn drop(&mut self) {
        if !self.mem_ptr.is_null() {
            unsafe {
                libc::munmap(self.mem_ptr as *mut c_void, GPIO_MEM_SIZE as size_t);
            }
        }
    }
}

// Required because of the raw pointer to our memory-mapped file
unsafe impl Send for GpioMem {}

#[derive(Debug)]
struct MockState {
    words: Vec<u32>,
    writes: Vec<(usize, u32)>,
    pulls: Vec<PullUpDown>,
}

/// An in-memory register block that behaves like the GPIO controller.
///
/// Writes to the set and clear registers drive the level register, the event
/// detect status register is cleared by writing 1s, and clocking a pin through
/// the pull-up/down clock registers latches the current control signal for that
/// pin. Rising and falling edge detection is emulated for levels driven with
/// [`drive_input`].
///
/// Clones share the same registers, so a clone can be kept to inspect the
/// state after handing the original to a backend.
///
/// [`drive_input`]: #method.drive_input
#[doc(hidden)]
#[derive(Debug, Clone)]
pub struct MockRegisters {
    state: Arc<Mutex<MockState>>,
}

impl Default for MockRegisters {
    fn default() -> MockRegisters {
        MockRegisters::new()
    }
}

impl MockRegisters {
    /// Constructs a register block with every register set to 0.
    pub fn new() -> MockRegisters {
        MockRegisters {
            state: Arc::new(Mutex::new(MockState {
                words: vec![0; REGISTER_COUNT],
                writes: Vec::new(),
                pulls: vec![PullUpDown::Off; GPIO_LINES as usize],
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the current value of the register at `offset`.
    pub fn word(&self, offset: usize) -> u32 {
        self.state().words[offset]
    }

    /// Returns every write since construction or the last call to `clear_writes`,
    /// as `(offset, value)` pairs.
    pub fn writes(&self) -> Vec<(usize, u32)> {
        self.state().writes.clone()
    }

    pub fn clear_writes(&self) {
        self.state().writes.clear();
    }

    /// Returns the pull-up/down state last clocked into `pin`.
    pub fn pull(&self, pin: u8) -> PullUpDown {
        self.state().pulls[pin as usize]
    }

    /// Changes the level seen on `pin` as if it were driven externally, and
    /// latches an event when the matching edge detection is enabled.
    pub fn drive_input(&self, pin: u8, level: Level) {
        let mut state = self.state();

        let lev = Field::new(Group::Level, pin);
        let old = Level::from(lev.get(state.words[lev.offset]) as u8);
        state.words[lev.offset] = lev.set(state.words[lev.offset], level as u32);

        let detect = match (old, level) {
            (Level::Low, Level::High) => Some(Group::RisingEdgeEnable),
            (Level::High, Level::Low) => Some(Group::FallingEdgeEnable),
            _ => None,
        };

        if let Some(group) = detect {
            let enable = Field::new(group, pin);
            if enable.get(state.words[enable.offset]) != 0 {
                let eds = Field::new(Group::EventStatus, pin);
                state.words[eds.offset] |= eds.bits();
            }
        }
    }
}

impl Registers for MockRegisters {
    fn word_count(&self) -> usize {
        REGISTER_COUNT
    }

    fn read(&self, offset: usize) -> u32 {
        let state = self.state();
        match Group::at(offset).map(Group::access) {
            Some(Access::WriteOnly) if !Group::PullClock.contains(offset) => 0,
            _ => state.words[offset],
        }
    }

    fn write(&mut self, offset: usize, value: u32) {
        let mut state = self.state();
        assert!(offset < state.words.len(), "register offset {} out of bounds", offset);

        state.writes.push((offset, value));

        match Group::at(offset) {
            Some(Group::Set) => {
                let lev = Group::Level.base() + (offset - Group::Set.base());
                state.words[lev] |= value;
            }
            Some(Group::Clear) => {
                let lev = Group::Level.base() + (offset - Group::Clear.base());
                state.words[lev] &= !value;
            }
            Some(Group::EventStatus) => state.words[offset] &= !value,
            Some(Group::Level) => {}
            Some(Group::PullClock) => {
                let first_pin = (offset - Group::PullClock.base()) * 32;
                let control = match state.words[GPPUD] & GPPUD_MASK {
                    0b01 => PullUpDown::PullDown,
                    0b10 => PullUpDown::PullUp,
                    _ => PullUpDown::Off,
                };

                for bit in 0..32 {
                    let pin = first_pin + bit;
                    if value & (1 << bit) != 0 && pin < state.pulls.len() {
                        state.pulls[pin] = control;
                    }
                }

                state.words[offset] = value;
            }
            _ => state.words[offset] = value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_set_and_clear_drive_level() {
        let mut regs = MockRegisters::new();
        let lev = Field::new(Group::Level, 40);

        regs.write(Field::new(Group::Set, 40).offset, lev.bits());
        assert_eq!(regs.read(lev.offset), lev.bits());
        assert_eq!(regs.read(Field::new(Group::Set, 40).offset), 0);

        regs.write(Field::new(Group::Clear, 40).offset, lev.bits());
        assert_eq!(regs.read(lev.offset), 0);
    }

    #[test]
    fn mock_event_status_clears_on_write() {
        let mut regs = MockRegisters::new();
        let enable = Field::new(Group::RisingEdgeEnable, 3);
        let eds = Field::new(Group::EventStatus, 3);

        regs.write(enable.offset, enable.bits());
        regs.drive_input(3, Level::High);
        assert_eq!(regs.read(eds.offset), eds.bits());

        // Writing 0s leaves the event in place
        regs.write(eds.offset, 0);
        assert_eq!(regs.read(eds.offset), eds.bits());

        regs.write(eds.offset, eds.bits());
        assert_eq!(regs.read(eds.offset), 0);
    }

    #[test]
    fn mock_clones_share_state() {
        let regs = MockRegisters::new();
        let mut clone = regs.clone();

        clone.write(2, 0x1234);
        assert_eq!(regs.word(2), 0x1234);
        assert_eq!(regs.writes(), vec![(2, 0x1234)]);

        regs.clear_writes();
        assert!(clone.writes().is_empty());
    }

    #[test]
    fn gpio_base_depends_on_soc() {
        let pi1 = "raspberrypi,model-b-plus\0brcm,bcm2835\0";
        let pi3 = "raspberrypi,3-model-b\0brcm,bcm2837\0";
        let pi4 = "raspberrypi,4-model-b\0brcm,bcm2711\0";

        assert_eq!(gpio_base_from_compatible(pi1), Some(0x2020_0000));
        assert_eq!(gpio_base_from_compatible(pi3), Some(0x3f20_0000));
        assert_eq!(gpio_base_from_compatible(pi4), Some(0xfe20_0000));
        assert_eq!(gpio_base_from_compatible("acme,board\0"), None);
    }

    #[test]
    #[should_panic]
    fn mock_rejects_out_of_bounds_offsets() {
        let mut regs = MockRegisters::new();
        regs.write(REGISTER_COUNT, 1);
    }
}
