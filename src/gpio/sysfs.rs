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

use std::collections::HashMap;
use std::ffi::CString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::os::linux::fs::MetadataExt;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use libc::{O_NONBLOCK, O_SYNC};
use log::{debug, warn};

use super::{Direction, Error, Gpio, Level, Result};

pub(crate) const PATH_SYSFS_GPIO: &str = "/sys/class/gpio";

const GROUP_GPIO: &str = "gpio";
const GROUP_POLL_ATTEMPTS: u32 = 20;
const GROUP_POLL_INTERVAL: Duration = Duration::from_millis(50);

// Find group ID for specified group name
fn group_name_to_gid(name: &str) -> Option<u32> {
    let name_cstr = CString::new(name).ok()?;

    unsafe {
        let group_ptr = libc::getgrnam(name_cstr.as_ptr());

        if group_ptr.is_null() {
            None
        } else {
            Some((*group_ptr).gr_gid)
        }
    }
}

// Polls `dir` until it's owned by `gid`, or the attempts run out. Running out
// isn't an error. The next attribute access reports any permission problem.
fn wait_for_group(dir: &Path, gid: u32, attempts: u32, interval: Duration) -> Result<()> {
    for _ in 0..attempts {
        if fs::metadata(dir)?.st_gid() == gid {
            return Ok(());
        }

        thread::sleep(interval);
    }

    debug!("{} isn't owned by group {} yet", dir.display(), gid);

    Ok(())
}

/// Waits for udev to hand a freshly exported pin over to the `gpio` group.
///
/// The pin's directory starts off owned by root:root. Non-root users can only
/// write its attributes after the group changes, which takes a moment. If this
/// never happens, check the udev rules (`/etc/udev/rules.d/99-com.rules`).
/// Systems without a `gpio` group don't wait.
pub(crate) fn wait_for_gpio_group(root: &Path, pin: u8) -> Result<()> {
    match group_name_to_gid(GROUP_GPIO) {
        Some(gid) => wait_for_group(
            &pin_dir(root, pin),
            gid,
            GROUP_POLL_ATTEMPTS,
            GROUP_POLL_INTERVAL,
        ),
        None => Ok(()),
    }
}

fn open_error(path: &Path, err: io::Error) -> Error {
    match err.kind() {
        io::ErrorKind::PermissionDenied => Error::PermissionDenied(path.display().to_string()),
        _ => Error::Io(err),
    }
}

/// Returns the directory the kernel creates for an exported pin.
pub(crate) fn pin_dir(root: &Path, pin: u8) -> PathBuf {
    root.join(format!("gpio{}", pin))
}

fn open_control(path: &Path) -> Result<File> {
    OpenOptions::new()
        .write(true)
        .custom_flags(O_SYNC)
        .open(path)
        .map_err(|e| open_error(path, e))
}

/// Replaces the contents of a sysfs attribute.
pub(crate) fn write_attr(path: &Path, contents: &[u8]) -> Result<()> {
    OpenOptions::new()
        .write(true)
        .truncate(true)
        .custom_flags(O_SYNC)
        .open(path)
        .map_err(|e| open_error(path, e))?
        .write_all(contents)?;

    Ok(())
}

pub(crate) fn export(root: &Path, pin: u8) -> Result<()> {
    open_control(&root.join("export"))?.write_all(pin.to_string().as_bytes())?;
    debug!("Exported GPIO {}", pin);

    Ok(())
}

pub(crate) fn unexport(root: &Path, pin: u8) -> Result<()> {
    open_control(&root.join("unexport"))?.write_all(pin.to_string().as_bytes())?;
    debug!("Unexported GPIO {}", pin);

    Ok(())
}

/// Opens the pin's `value` attribute for non-blocking reads.
pub(crate) fn open_value_nonblocking(root: &Path, pin: u8) -> Result<File> {
    let path = pin_dir(root, pin).join("value");

    OpenOptions::new()
        .read(true)
        .custom_flags(O_NONBLOCK)
        .open(&path)
        .map_err(|e| open_error(&path, e))
}

/// GPIO backend that uses the kernel's sysfs interface.
///
/// Pins are exported the first time they're used. Every exported pin is
/// unexported again when [`close`] is called, or when `SysfsGpio` goes out of
/// scope.
///
/// Only pins exported by this instance are unexported. Sharing a pin with other
/// `SysfsGpio` instances or a [`PinWatcher`] isn't supported.
///
/// [`close`]: #method.close
/// [`PinWatcher`]: struct.PinWatcher.html
#[derive(Debug)]
pub struct SysfsGpio {
    export: File,
    unexport: File,
    root: PathBuf,
    exported: HashMap<u8, PathBuf>,
}

impl SysfsGpio {
    /// Constructs a new `SysfsGpio` using `/sys/class/gpio`.
    pub fn new() -> Result<SysfsGpio> {
        SysfsGpio::with_root(PATH_SYSFS_GPIO)
    }

    /// Constructs a new `SysfsGpio` using a directory laid out like `/sys/class/gpio`.
    ///
    /// The `export` and `unexport` attributes are opened here and kept open
    /// until the backend is closed.
    pub fn with_root<P: AsRef<Path>>(root: P) -> Result<SysfsGpio> {
        let root = root.as_ref().to_path_buf();

        Ok(SysfsGpio {
            export: open_control(&root.join("export"))?,
            unexport: open_control(&root.join("unexport"))?,
            root,
            exported: HashMap::new(),
        })
    }

    /// Returns the pins exported by this instance, in ascending order.
    pub fn exported_pins(&self) -> Vec<u8> {
        let mut pins: Vec<u8> = self.exported.keys().copied().collect();
        pins.sort_unstable();

        pins
    }

    // Returns the pin's attribute directory, exporting the pin if this is the
    // first time it's used.
    fn pin_path(&mut self, pin: u8) -> Result<&Path> {
        if !self.exported.contains_key(&pin) {
            write_control(&mut self.export, pin)?;
            debug!("Exported GPIO {}", pin);

            self.exported.insert(pin, pin_dir(&self.root, pin));
            wait_for_gpio_group(&self.root, pin)?;
        }

        Ok(&self.exported[&pin])
    }

    fn unexport_all(&mut self) {
        let mut pins: Vec<u8> = self.exported.drain().map(|(pin, _)| pin).collect();
        pins.sort_unstable();

        for pin in pins {
            match write_control(&mut self.unexport, pin) {
                Ok(()) => debug!("Unexported GPIO {}", pin),
                Err(e) => warn!("Failed to unexport GPIO {}: {}", pin, e),
            }
        }
    }
}

// The control handles are reused, so the offset is reset after every write.
fn write_control(file: &mut File, pin: u8) -> io::Result<()> {
    file.write_all(pin.to_string().as_bytes())?;
    file.flush()?;
    file.seek(SeekFrom::Start(0))?;

    Ok(())
}

impl Gpio for SysfsGpio {
    fn set_direction(&mut self, pin: u8, direction: Direction) -> Result<()> {
        let path = self.pin_path(pin)?.join("direction");

        let contents: &[u8] = match direction {
            Direction::Input => b"in",
            Direction::Output => b"out",
        };

        write_attr(&path, contents)
    }

    /// Reads the pin's logic level.
    ///
    /// Only a `0` is read as [`Level::Low`]. Anything else, including an empty
    /// attribute, is read as [`Level::High`].
    ///
    /// [`Level::Low`]: enum.Level.html#variant.Low
    /// [`Level::High`]: enum.Level.html#variant.High
    fn value(&mut self, pin: u8) -> Result<Level> {
        let path = self.pin_path(pin)?.join("value");

        let mut buffer = [0; 1];
        let len = File::open(&path)
            .map_err(|e| open_error(&path, e))?
            .read(&mut buffer)?;

        match &buffer[..len] {
            b"0" => Ok(Level::Low),
            _ => Ok(Level::High),
        }
    }

    fn set_value(&mut self, pin: u8, level: Level) -> Result<()> {
        let path = self.pin_path(pin)?.join("value");

        let contents: &[u8] = match level {
            Level::Low => b"0",
            Level::High => b"1",
        };

        write_attr(&path, contents)
    }

    /// Unexports every pin exported by this instance.
    ///
    /// Unexporting is best-effort. Failures are logged, and `close` always
    /// returns `Ok(())`.
    fn close(mut self) -> Result<()> {
        self.unexport_all();

        Ok(())
    }
}

impl Drop for SysfsGpio {
    fn drop(&mut self) {
        self.unexport_all();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    use std::fs;
    use std::process;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    /// Temporary directory laid out like `/sys/class/gpio`, removed on drop.
    pub(crate) struct FakeSysfs {
        pub(crate) root: PathBuf,
    }

    impl FakeSysfs {
        pub(crate) fn new(pins: &[u8]) -> FakeSysfs {
            static COUNTER: AtomicUsize = AtomicUsize::new(0);

            let root = std::env::temp_dir().join(format!(
                "pigo-sysfs-{}-{}",
                process::id(),
                COUNTER.fetch_add(1, Ordering::SeqCst)
            ));

            fs::create_dir_all(&root).unwrap();
            fs::write(root.join("export"), b"").unwrap();
            fs::write(root.join("unexport"), b"").unwrap();

            for pin in pins {
                let dir = pin_dir(&root, *pin);
                fs::create_dir_all(&dir).unwrap();
                fs::write(dir.join("direction"), b"in").unwrap();
                fs::write(dir.join("value"), b"0\n").unwrap();
                fs::write(dir.join("edge"), b"none").unwrap();
            }

            FakeSysfs { root }
        }

        pub(crate) fn read(&self, attr: &str) -> String {
            fs::read_to_string(self.root.join(attr)).unwrap()
        }
    }

    impl Drop for FakeSysfs {
        fn drop(&mut self) {
            fs::remove_dir_all(&self.root).ok();
        }
    }

    #[test]
    fn missing_control_files_fail_construction() {
        let sysfs = FakeSysfs::new(&[]);
        fs::remove_file(sysfs.root.join("unexport")).unwrap();

        assert!(matches!(SysfsGpio::with_root(&sysfs.root), Err(Error::Io(_))));
    }

    #[test]
    fn pins_are_exported_once() {
        let sysfs = FakeSysfs::new(&[4, 17]);
        let mut gpio = SysfsGpio::with_root(&sysfs.root).unwrap();

        gpio.set_direction(17, Direction::Output).unwrap();
        assert_eq!(sysfs.read("export"), "17");

        // The export handle is rewound, so the next pin overwrites the start
        gpio.set_direction(4, Direction::Input).unwrap();
        assert_eq!(sysfs.read("export"), "47");

        gpio.set_value(17, Level::High).unwrap();
        gpio.value(17).unwrap();
        assert_eq!(sysfs.read("export"), "47");

        assert_eq!(gpio.exported_pins(), vec![4, 17]);
    }

    #[test]
    fn direction_and_value_attributes() {
        let sysfs = FakeSysfs::new(&[17]);
        let mut gpio = SysfsGpio::with_root(&sysfs.root).unwrap();

        gpio.set_direction(17, Direction::Output).unwrap();
        assert_eq!(sysfs.read("gpio17/direction"), "out");

        gpio.set_direction(17, Direction::Input).unwrap();
        assert_eq!(sysfs.read("gpio17/direction"), "in");

        gpio.set_value(17, Level::High).unwrap();
        assert_eq!(sysfs.read("gpio17/value"), "1");
        assert_eq!(gpio.value(17).unwrap(), Level::High);

        gpio.set_value(17, Level::Low).unwrap();
        assert_eq!(sysfs.read("gpio17/value"), "0");
        assert_eq!(gpio.value(17).unwrap(), Level::Low);
    }

    #[test]
    fn value_reads_are_permissive() {
        let sysfs = FakeSysfs::new(&[5]);
        let mut gpio = SysfsGpio::with_root(&sysfs.root).unwrap();

        assert_eq!(gpio.value(5).unwrap(), Level::Low);

        fs::write(sysfs.root.join("gpio5/value"), b"x").unwrap();
        assert_eq!(gpio.value(5).unwrap(), Level::High);

        fs::write(sysfs.root.join("gpio5/value"), b"").unwrap();
        assert_eq!(gpio.value(5).unwrap(), Level::High);
    }

    #[test]
    fn missing_pin_directory_is_an_error() {
        let sysfs = FakeSysfs::new(&[]);
        let mut gpio = SysfsGpio::with_root(&sysfs.root).unwrap();

        assert!(matches!(gpio.value(9), Err(Error::Io(_))));
        assert!(matches!(gpio.set_direction(9, Direction::Output), Err(Error::Io(_))));
    }

    #[test]
    fn close_unexports_every_pin() {
        let sysfs = FakeSysfs::new(&[2, 3]);
        let mut gpio = SysfsGpio::with_root(&sysfs.root).unwrap();

        gpio.set_value(3, Level::High).unwrap();
        gpio.set_value(2, Level::High).unwrap();
        gpio.close().unwrap();

        // Unexported in ascending order through a rewound handle
        assert_eq!(sysfs.read("unexport"), "3");
    }

    #[test]
    fn drop_unexports_every_pin() {
        let sysfs = FakeSysfs::new(&[21]);

        {
            let mut gpio = SysfsGpio::with_root(&sysfs.root).unwrap();
            gpio.set_direction(21, Direction::Input).unwrap();
        }

        assert_eq!(sysfs.read("unexport"), "21");
    }

    #[test]
    fn group_wait_returns_once_the_group_matches() {
        let sysfs = FakeSysfs::new(&[8]);
        let dir = pin_dir(&sysfs.root, 8);
        let gid = fs::metadata(&dir).unwrap().st_gid();

        let start = Instant::now();
        wait_for_group(&dir, gid, 20, Duration::from_secs(1)).unwrap();
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn group_wait_gives_up_without_an_error() {
        let sysfs = FakeSysfs::new(&[8]);
        let dir = pin_dir(&sysfs.root, 8);
        let other_gid = fs::metadata(&dir).unwrap().st_gid().wrapping_add(1);

        let start = Instant::now();
        wait_for_group(&dir, other_gid, 3, Duration::from_millis(10)).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn group_wait_needs_the_pin_directory() {
        let sysfs = FakeSysfs::new(&[]);

        assert!(matches!(
            wait_for_group(&pin_dir(&sysfs.root, 8), 0, 3, Duration::from_millis(1)),
            Err(Error::Io(_))
        ));
    }

    #[test]
    fn close_without_exports_writes_nothing() {
        let sysfs = FakeSysfs::new(&[]);
        let gpio = SysfsGpio::with_root(&sysfs.root).unwrap();

        gpio.close().unwrap();
        assert_eq!(sysfs.read("unexport"), "");
    }
}
