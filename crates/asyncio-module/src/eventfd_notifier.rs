//! `EventFdNotifier`: Linux `Notifier` implementation.
//!
//! Writes to an eventfd to wake the thread blocked in `wait()`.
//! Coalescing: multiple calls to `notify()` before the waiter reads the
//! eventfd result in a single wakeup (eventfd counter semantics).

use asyncio_core::error::{AsyncIoError, Result};
use asyncio_core::notifier::Notifier;

use nix::errno::Errno;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;

pub struct EventFdNotifier {
    fd: OwnedFd,
}

impl EventFdNotifier {
    /// Create a new non-blocking, close-on-exec eventfd.
    pub fn create() -> Result<Self> {
        let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if fd < 0 {
            return Err(AsyncIoError::Allocation(format!(
                "eventfd: {}",
                Errno::last().desc()
            )));
        }
        // Safety: fd was just returned by eventfd() and is owned by nobody else.
        let fd = unsafe { OwnedFd::from_raw_fd(fd) };
        Ok(Self { fd })
    }

    pub fn fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    /// Drain the counter. Returns true if it was non-zero.
    fn drain(&self) -> bool {
        let mut val: u64 = 0;
        let ret = unsafe {
            libc::read(
                self.fd(),
                &mut val as *mut u64 as *mut libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };
        ret == std::mem::size_of::<u64>() as isize && val > 0
    }
}

/// Milliseconds for `poll(2)`, rounded up so short timeouts still sleep.
fn poll_timeout_ms(timeout: Option<Duration>) -> libc::c_int {
    match timeout {
        None => -1,
        Some(t) => {
            let ms = t.as_millis() + u128::from(t.subsec_nanos() % 1_000_000 != 0);
            ms.min(libc::c_int::MAX as u128) as libc::c_int
        }
    }
}

impl Notifier for EventFdNotifier {
    fn notify(&self) -> Result<()> {
        let val: u64 = 1;
        let ret = unsafe {
            libc::write(
                self.fd(),
                &val as *const u64 as *const libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };
        if ret < 0 {
            let errno = Errno::last();
            // EAGAIN means the counter would overflow, so a wakeup is
            // already pending.
            if errno == Errno::EAGAIN {
                return Ok(());
            }
            return Err(errno.into());
        }
        Ok(())
    }

    fn wait(&self, timeout: Option<Duration>) -> bool {
        let mut pfd = libc::pollfd {
            fd: self.fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        loop {
            let ret = unsafe { libc::poll(&mut pfd, 1, poll_timeout_ms(timeout)) };
            if ret < 0 {
                if Errno::last() == Errno::EINTR {
                    continue;
                }
                return false;
            }
            if ret == 0 {
                return false;
            }
            return self.drain();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_wait_times_out() {
        let n = EventFdNotifier::create().unwrap();
        let start = Instant::now();
        assert!(!n.wait(Some(Duration::from_millis(30))));
        assert!(start.elapsed() >= Duration::from_millis(25));
    }

    #[test]
    fn test_notifications_coalesce() {
        let n = EventFdNotifier::create().unwrap();
        n.notify().unwrap();
        n.notify().unwrap();
        n.notify().unwrap();
        assert!(n.wait(Some(Duration::from_millis(10))));
        // One read drained all three.
        assert!(!n.wait(Some(Duration::from_millis(10))));
    }

    #[test]
    fn test_cross_thread_wake() {
        let n = Arc::new(EventFdNotifier::create().unwrap());
        let n2 = Arc::clone(&n);
        let handle = thread::spawn(move || n2.wait(Some(Duration::from_secs(10))));
        thread::sleep(Duration::from_millis(20));
        n.notify().unwrap();
        assert!(handle.join().unwrap());
    }

    #[test]
    fn test_timeout_rounding() {
        assert_eq!(poll_timeout_ms(None), -1);
        assert_eq!(poll_timeout_ms(Some(Duration::from_micros(1))), 1);
        assert_eq!(poll_timeout_ms(Some(Duration::from_millis(5))), 5);
    }
}
