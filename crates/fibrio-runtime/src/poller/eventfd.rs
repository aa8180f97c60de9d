//! `EventFd`: wake channel for the reactor.
//!
//! Coalescing: several `notify()` calls before the reader drains the
//! descriptor produce a single wakeup (eventfd counter semantics).

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use nix::errno::Errno;

pub struct EventFd {
    fd: OwnedFd,
}

impl EventFd {
    /// Create a non-blocking, close-on-exec eventfd
    pub fn new() -> io::Result<Self> {
        let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if fd < 0 {
            return Err(Errno::last().into());
        }
        Ok(Self {
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
        })
    }

    /// Signal the reader; never blocks
    pub fn notify(&self) -> io::Result<()> {
        let val: u64 = 1;
        let ret = unsafe {
            libc::write(
                self.fd.as_raw_fd(),
                &val as *const u64 as *const libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };
        if ret < 0 {
            let errno = Errno::last();
            // Counter saturated: a wakeup is already pending
            if errno == Errno::EAGAIN {
                return Ok(());
            }
            return Err(errno.into());
        }
        Ok(())
    }

    /// Reset the counter; returns how many notifications were pending
    pub fn drain(&self) -> u64 {
        let mut total = 0u64;
        loop {
            let mut val: u64 = 0;
            let ret = unsafe {
                libc::read(
                    self.fd.as_raw_fd(),
                    &mut val as *mut u64 as *mut libc::c_void,
                    std::mem::size_of::<u64>(),
                )
            };
            if ret == std::mem::size_of::<u64>() as isize {
                total = total.saturating_add(val);
                continue;
            }
            if ret < 0 && Errno::last() == Errno::EINTR {
                continue;
            }
            return total;
        }
    }
}

impl AsRawFd for EventFd {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notifications_coalesce() {
        let efd = EventFd::new().unwrap();
        assert_eq!(efd.drain(), 0);
        efd.notify().unwrap();
        efd.notify().unwrap();
        efd.notify().unwrap();
        assert_eq!(efd.drain(), 3);
        assert_eq!(efd.drain(), 0);
    }
}
