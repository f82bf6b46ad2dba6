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
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, trace, warn};

use super::epoll::{epoll_event, Epoll, EventFd, EPOLLERR, EPOLLET, EPOLLIN, EPOLLPRI};
use super::sysfs::{self, PATH_SYSFS_GPIO};
use super::{Error, EventType, Level, PinEvent, Result};

/// Maximum time the watcher thread blocks before checking whether it should stop.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(4);

/// Number of events that can be queued before new events are dropped.
pub const DEFAULT_CAPACITY: usize = 5;

const ID_SHUTDOWN: u64 = 0;
const ID_VALUE: u64 = 1;

// The watcher always arms both edges.
const EDGE_BOTH: &[u8] = b"both";

/// Lifecycle of a [`PinWatcher`].
///
/// [`PinWatcher`]: struct.PinWatcher.html
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
#[repr(u8)]
pub enum State {
    /// The pin is being exported and configured.
    Starting,
    /// The watcher thread is waiting for pin changes.
    Running,
    /// The watcher thread was asked to stop, and is releasing its resources.
    ShuttingDown,
    /// The watcher thread has exited, and the pin is unexported.
    Stopped,
}

impl State {
    fn from_u8(value: u8) -> State {
        match value {
            0 => State::Starting,
            1 => State::Running,
            2 => State::ShuttingDown,
            _ => State::Stopped,
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            State::Starting => write!(f, "Starting"),
            State::Running => write!(f, "Running"),
            State::ShuttingDown => write!(f, "ShuttingDown"),
            State::Stopped => write!(f, "Stopped"),
        }
    }
}

#[derive(Debug)]
struct Shared {
    state: AtomicU8,
    shutdown: AtomicBool,
}

impl Shared {
    fn set_state(&self, state: State) {
        self.state.store(state as u8, Ordering::SeqCst);
    }
}

/// Watches a single pin for changes through the sysfs interface.
///
/// The pin is exported and configured to trigger on both rising and falling
/// edges. A background thread waits for changes using epoll, and queues a
/// [`PinEvent`] for every change. Events are dropped while the queue is full.
///
/// The watcher thread is stopped with [`close`], or when the `PinWatcher`
/// goes out of scope. The pin is unexported afterwards.
///
/// [`PinEvent`]: struct.PinEvent.html
/// [`close`]: #method.close
pub struct PinWatcher {
    pin: u8,
    shared: Arc<Shared>,
    shutdown: EventFd,
    events: Receiver<PinEvent>,
    poll_thread: Option<thread::JoinHandle<Result<()>>>,
}

impl PinWatcher {
    /// Starts watching `pin` through `/sys/class/gpio`.
    pub fn new(pin: u8) -> Result<PinWatcher> {
        PinWatcher::with_root(PATH_SYSFS_GPIO, pin)
    }

    /// Starts watching `pin` through a directory laid out like `/sys/class/gpio`.
    pub fn with_root<P: AsRef<Path>>(root: P, pin: u8) -> Result<PinWatcher> {
        PinWatcher::with_options(root, pin, DEFAULT_TIMEOUT, DEFAULT_CAPACITY)
    }

    /// Starts watching `pin` with a custom wait timeout and event queue capacity.
    ///
    /// `timeout` bounds how long the watcher thread blocks before checking
    /// whether it should stop.
    pub fn with_options<P: AsRef<Path>>(
        root: P,
        pin: u8,
        timeout: Duration,
        capacity: usize,
    ) -> Result<PinWatcher> {
        let root = root.as_ref().to_path_buf();
        let shared = Arc::new(Shared {
            state: AtomicU8::new(State::Starting as u8),
            shutdown: AtomicBool::new(false),
        });

        sysfs::export(&root, pin)?;

        let (poll, value, shutdown) = match Self::configure(&root, pin) {
            Ok(configured) => configured,
            Err(e) => {
                sysfs::unexport(&root, pin).ok();
                return Err(e);
            }
        };

        let (sender, events) = mpsc::sync_channel(capacity);

        let poll_thread = thread::Builder::new()
            .name(format!("pin-watcher-{}", pin))
            .spawn({
                let shared = shared.clone();
                let root = root.clone();
                move || -> Result<()> {
                    shared.set_state(State::Running);
                    debug!("Watching GPIO {}", pin);

                    let result = watch(pin, &poll, value, timeout, &sender, &shared);

                    shared.set_state(State::ShuttingDown);
                    drop(poll);

                    let unexported = sysfs::unexport(&root, pin);
                    shared.set_state(State::Stopped);
                    debug!("Stopped watching GPIO {}", pin);

                    result.and(unexported)
                }
            });

        let poll_thread = match poll_thread {
            Ok(poll_thread) => poll_thread,
            Err(e) => {
                sysfs::unexport(&root, pin).ok();
                shared.set_state(State::Stopped);
                return Err(Error::Io(e));
            }
        };

        Ok(PinWatcher {
            pin,
            shared,
            shutdown,
            events,
            poll_thread: Some(poll_thread),
        })
    }

    fn configure(root: &Path, pin: u8) -> Result<(Epoll, File, EventFd)> {
        sysfs::wait_for_gpio_group(root, pin)?;
        sysfs::write_attr(&sysfs::pin_dir(root, pin).join("edge"), EDGE_BOTH)?;

        let mut value = sysfs::open_value_nonblocking(root, pin)?;

        // Reading the freshly opened attribute resets any pending trigger.
        let mut buffer = [0; 1];
        match value.read(&mut buffer) {
            Ok(len) => trace!("Initial value of GPIO {}: {:?}", pin, &buffer[..len]),
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => return Err(Error::Io(e)),
        }

        let shutdown = EventFd::new()?;
        let poll = Epoll::new()?;

        // shutdown becomes readable when close() calls notify()
        poll.add(shutdown.fd(), ID_SHUTDOWN, EPOLLERR | EPOLLET | EPOLLIN)?;
        // A pin change sets error and priority on the value attribute
        poll.add(value.as_raw_fd(), ID_VALUE, EPOLLERR | EPOLLET | EPOLLPRI)?;

        Ok((poll, value, shutdown))
    }

    /// Returns the BCM GPIO pin number.
    pub fn pin(&self) -> u8 {
        self.pin
    }

    /// Returns the watcher's current state.
    pub fn state(&self) -> State {
        State::from_u8(self.shared.state.load(Ordering::SeqCst))
    }

    /// Returns the queue pin changes are delivered to.
    pub fn events(&self) -> &Receiver<PinEvent> {
        &self.events
    }

    /// Stops the watcher thread, and waits until it has unexported the pin.
    ///
    /// Calling `close` again has no effect.
    pub fn close(&mut self) -> Result<()> {
        let poll_thread = match self.poll_thread.take() {
            Some(poll_thread) => poll_thread,
            None => return Ok(()),
        };

        self.shared.shutdown.store(true, Ordering::SeqCst);

        // If the notification fails, the thread still notices the shutdown
        // flag after its current wait times out.
        if let Err(e) = self.shutdown.notify() {
            warn!("Failed to wake up watcher for GPIO {}: {}", self.pin, e);
        }

        match poll_thread.join() {
            Ok(result) => result,
            Err(_) => Err(Error::ThreadPanic),
        }
    }
}

impl Drop for PinWatcher {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Failed to stop watcher for GPIO {}: {}", self.pin, e);
        }
    }
}

impl fmt::Debug for PinWatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PinWatcher")
            .field("pin", &self.pin)
            .field("state", &self.state())
            .field("shutdown", &self.shutdown)
            .field("events", &format_args!("{{ .. }}"))
            .field("poll_thread", &self.poll_thread)
            .finish()
    }
}

fn watch<V: Read + Seek>(
    pin: u8,
    poll: &Epoll,
    mut value: V,
    timeout: Duration,
    sender: &SyncSender<PinEvent>,
    shared: &Shared,
) -> Result<()> {
    let mut events = [epoll_event { events: 0, u64: 0 }; 2];

    while !shared.shutdown.load(Ordering::SeqCst) {
        let num_events = match poll.wait(&mut events, Some(timeout)) {
            Ok(num_events) => num_events,
            Err(e) => {
                warn!("Failed to wait for changes on GPIO {}: {}", pin, e);
                continue;
            }
        };

        if num_events == 0 {
            trace!("No changes on GPIO {} within {:?}", pin, timeout);
            continue;
        }

        for event in &events[0..num_events] {
            let id = event.u64;
            match id {
                ID_SHUTDOWN => return Ok(()), // close() asked us to stop
                ID_VALUE => {
                    let level = match read_level(&mut value) {
                        Ok(level) => level,
                        Err(e) => {
                            warn!("Failed to read the value of GPIO {}: {}", pin, e);
                            continue;
                        }
                    };
                    debug!("GPIO {} changed to {}", pin, level);

                    queue_event(
                        sender,
                        PinEvent {
                            pin,
                            level,
                            types: EventType::RISING_EDGE | EventType::FALLING_EDGE,
                        },
                    );
                }
                _ => {}
            }
        }
    }

    Ok(())
}

fn read_level<R: Read + Seek>(value: &mut R) -> Result<Level> {
    value.seek(SeekFrom::Start(0))?;

    let mut buffer = [0; 1];
    let len = value.read(&mut buffer)?;

    match &buffer[..len] {
        b"0" => Ok(Level::Low),
        _ => Ok(Level::High),
    }
}

fn queue_event(sender: &SyncSender<PinEvent>, event: PinEvent) {
    match sender.try_send(event) {
        Ok(()) => {}
        Err(TrySendError::Full(event)) => {
            warn!("Event queue for GPIO {} is full, dropping {:?}", event.pin, event);
        }
        // The receiver only goes away together with the PinWatcher.
        Err(TrySendError::Disconnected(_)) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::ffi::CString;
    use std::fs;
    use std::io::Cursor;
    use std::os::unix::ffi::OsStrExt;
    use std::time::Instant;

    use crate::gpio::sysfs::tests::FakeSysfs;

    // epoll can't watch regular files, so the value attribute is replaced by a FIFO.
    fn fake_sysfs_with_fifo(pin: u8) -> FakeSysfs {
        let sysfs = FakeSysfs::new(&[pin]);
        let value = sysfs::pin_dir(&sysfs.root, pin).join("value");
        fs::remove_file(&value).unwrap();

        let path = CString::new(value.as_os_str().as_bytes()).unwrap();
        assert_eq!(unsafe { libc::mkfifo(path.as_ptr(), 0o644) }, 0);

        sysfs
    }

    fn wait_for_state(watcher: &PinWatcher, state: State) {
        let start = Instant::now();
        while watcher.state() != state {
            assert!(start.elapsed() < Duration::from_secs(2), "watcher never reached {}", state);
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn start_exports_and_arms_both_edges() {
        let sysfs = fake_sysfs_with_fifo(17);
        let mut watcher = PinWatcher::with_root(&sysfs.root, 17).unwrap();

        wait_for_state(&watcher, State::Running);
        assert_eq!(watcher.pin(), 17);
        assert_eq!(sysfs.read("export"), "17");
        assert_eq!(sysfs.read("gpio17/edge"), "both");

        watcher.close().unwrap();
    }

    #[test]
    fn close_before_any_event_returns_promptly() {
        let sysfs = fake_sysfs_with_fifo(22);
        let mut watcher = PinWatcher::with_root(&sysfs.root, 22).unwrap();
        wait_for_state(&watcher, State::Running);

        let start = Instant::now();
        watcher.close().unwrap();

        assert!(start.elapsed() < DEFAULT_TIMEOUT);
        assert_eq!(watcher.state(), State::Stopped);
        assert_eq!(sysfs.read("unexport"), "22");
        assert!(watcher.events().try_recv().is_err());

        // A second close has no effect
        watcher.close().unwrap();
    }

    #[test]
    fn drop_stops_the_watcher() {
        let sysfs = fake_sysfs_with_fifo(5);

        {
            let watcher =
                PinWatcher::with_options(&sysfs.root, 5, Duration::from_millis(50), 1).unwrap();
            wait_for_state(&watcher, State::Running);
        }

        assert_eq!(sysfs.read("unexport"), "5");
    }

    #[test]
    fn failed_setup_unexports_the_pin() {
        let sysfs = FakeSysfs::new(&[9]);
        fs::remove_file(sysfs::pin_dir(&sysfs.root, 9).join("value")).unwrap();

        assert!(matches!(PinWatcher::with_root(&sysfs.root, 9), Err(Error::Io(_))));
        assert_eq!(sysfs.read("unexport"), "9");
    }

    #[test]
    fn level_is_read_from_the_start() {
        let mut value = Cursor::new(b"1\n".to_vec());
        value.set_position(2);
        assert_eq!(read_level(&mut value).unwrap(), Level::High);

        let mut value = Cursor::new(b"0\n".to_vec());
        value.set_position(1);
        assert_eq!(read_level(&mut value).unwrap(), Level::Low);

        let mut value = Cursor::new(Vec::new());
        assert_eq!(read_level(&mut value).unwrap(), Level::High);
    }

    // Runs watch() on its own thread. An eventfd registered under ID_VALUE
    // stands in for the value attribute becoming ready.
    struct WatchLoop {
        trigger: EventFd,
        shutdown: EventFd,
        shared: Arc<Shared>,
        events: Receiver<PinEvent>,
        handle: thread::JoinHandle<Result<()>>,
    }

    impl WatchLoop {
        fn start<V: Read + Seek + Send + 'static>(pin: u8, value: V) -> WatchLoop {
            let poll = Epoll::new().unwrap();
            let trigger = EventFd::new().unwrap();
            let shutdown = EventFd::new().unwrap();
            poll.add(shutdown.fd(), ID_SHUTDOWN, EPOLLERR | EPOLLET | EPOLLIN).unwrap();
            poll.add(trigger.fd(), ID_VALUE, EPOLLERR | EPOLLET | EPOLLIN).unwrap();

            let shared = Arc::new(Shared {
                state: AtomicU8::new(State::Running as u8),
                shutdown: AtomicBool::new(false),
            });
            let (sender, events) = mpsc::sync_channel(DEFAULT_CAPACITY);

            let handle = thread::spawn({
                let shared = shared.clone();
                move || watch(pin, &poll, value, DEFAULT_TIMEOUT, &sender, &shared)
            });

            WatchLoop {
                trigger,
                shutdown,
                shared,
                events,
                handle,
            }
        }

        fn stop(self) -> Result<()> {
            self.shared.shutdown.store(true, Ordering::SeqCst);
            self.shutdown.notify().unwrap();

            self.handle.join().unwrap()
        }
    }

    // Fails the first seek, and reports the failure through `failed`.
    struct FlakyValue {
        failed: Option<mpsc::Sender<()>>,
        inner: Cursor<Vec<u8>>,
    }

    impl Read for FlakyValue {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.inner.read(buf)
        }
    }

    impl Seek for FlakyValue {
        fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
            match self.failed.take() {
                Some(failed) => {
                    failed.send(()).unwrap();
                    Err(io::Error::new(io::ErrorKind::Other, "Illegal seek"))
                }
                None => self.inner.seek(pos),
            }
        }
    }

    #[test]
    fn ready_value_is_delivered_as_an_event() {
        let watch_loop = WatchLoop::start(17, Cursor::new(b"1\n".to_vec()));
        watch_loop.trigger.notify().unwrap();

        let event = watch_loop
            .events
            .recv_timeout(Duration::from_secs(2))
            .unwrap();
        assert_eq!(
            event,
            PinEvent {
                pin: 17,
                level: Level::High,
                types: EventType::RISING_EDGE | EventType::FALLING_EDGE,
            }
        );

        watch_loop.stop().unwrap();
    }

    #[test]
    fn failed_read_keeps_the_watcher_running() {
        let (failed, seek_failed) = mpsc::channel();
        let watch_loop = WatchLoop::start(
            6,
            FlakyValue {
                failed: Some(failed),
                inner: Cursor::new(b"0\n".to_vec()),
            },
        );

        watch_loop.trigger.notify().unwrap();
        seek_failed.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(watch_loop.events.try_recv().is_err());

        // The next change is still picked up
        watch_loop.trigger.notify().unwrap();
        let event = watch_loop
            .events
            .recv_timeout(Duration::from_secs(2))
            .unwrap();
        assert_eq!((event.pin, event.level), (6, Level::Low));

        watch_loop.stop().unwrap();
    }

    #[test]
    fn full_queue_drops_events() {
        let (sender, receiver) = mpsc::sync_channel(1);
        let event = |level| PinEvent {
            pin: 4,
            level,
            types: EventType::RISING_EDGE | EventType::FALLING_EDGE,
        };

        queue_event(&sender, event(Level::High));
        queue_event(&sender, event(Level::Low));

        assert_eq!(receiver.try_recv().unwrap(), event(Level::High));
        assert!(receiver.try_recv().is_err());
    }
}
