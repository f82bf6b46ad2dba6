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

use std::io;
use std::time::Duration;

use libc::{self, c_int, c_void};

pub use libc::{epoll_event, EPOLLERR, EPOLLET, EPOLLIN, EPOLLPRI};

pub type Result<T> = std::result::Result<T, io::Error>;

// An EventFd wakes up a thread that's blocked in epoll_wait().
#[derive(Debug)]
pub struct EventFd {
    fd: c_int,
}

impl EventFd {
    pub fn new() -> Result<EventFd> {
        Ok(EventFd {
            fd: parse_retval!(unsafe {
                libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_SEMAPHORE | libc::EFD_CLOEXEC)
            })?,
        })
    }

    pub fn notify(&self) -> Result<()> {
        let buffer: u64 = 1;

        parse_retval!(unsafe {
            libc::write(self.fd, &buffer as *const u64 as *const c_void, 8)
        })?;

        Ok(())
    }

    pub fn fd(&self) -> c_int {
        self.fd
    }
}

impl Drop for EventFd {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fd);
        }
    }
}

#[derive(Debug)]
pub struct Epoll {
    fd: c_int,
}

impl Epoll {
    pub fn new() -> Result<Epoll> {
        Ok(Epoll {
            fd: parse_retval!(unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) })?,
        })
    }

    pub fn add(&self, fd: c_int, id: u64, event_mask: c_int) -> Result<()> {
        let mut event = epoll_event {
            events: event_mask as u32,
            u64: id,
        };

        parse_retval!(unsafe { libc::epoll_ctl(self.fd, libc::EPOLL_CTL_ADD, fd, &mut event) })?;

        Ok(())
    }

    /// Waits for events, and returns how many were stored in `events`.
    ///
    /// A return value of 0 means the timeout elapsed. `None` waits indefinitely.
    pub fn wait(&self, events: &mut [epoll_event], timeout: Option<Duration>) -> Result<usize> {
        if events.is_empty() {
            return Ok(0);
        }

        let timeout: c_int = match timeout {
            Some(duration) => duration.as_millis().min(c_int::MAX as u128) as c_int,
            None => -1,
        };

        let num_events = parse_retval!(unsafe {
            libc::epoll_wait(self.fd, events.as_mut_ptr(), events.len() as c_int, timeout)
        })?;

        Ok(num_events as usize)
    }
}

impl Drop for Epoll {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fd);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Instant;

    #[test]
    fn wait_times_out_without_events() {
        let poll = Epoll::new().unwrap();
        let eventfd = EventFd::new().unwrap();
        poll.add(eventfd.fd(), 1, EPOLLIN).unwrap();

        let mut events = [epoll_event { events: 0, u64: 0 }; 2];
        let start = Instant::now();

        assert_eq!(poll.wait(&mut events, Some(Duration::from_millis(20))).unwrap(), 0);
        assert!(start.elapsed() >= Duration::from_millis(15));
    }

    #[test]
    fn notify_wakes_up_wait() {
        let poll = Epoll::new().unwrap();
        let eventfd = EventFd::new().unwrap();
        poll.add(eventfd.fd(), 7, EPOLLERR | EPOLLET | EPOLLIN).unwrap();

        eventfd.notify().unwrap();

        let mut events = [epoll_event { events: 0, u64: 0 }; 2];
        assert_eq!(poll.wait(&mut events, None).unwrap(), 1);

        // Copy out of the packed struct before comparing
        let id = events[0].u64;
        assert_eq!(id, 7);
    }

    #[test]
    fn empty_event_buffer_returns_immediately() {
        let poll = Epoll::new().unwrap();

        assert_eq!(poll.wait(&mut [], None).unwrap(), 0);
    }
}
