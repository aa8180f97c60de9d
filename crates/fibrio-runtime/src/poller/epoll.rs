//! epoll-backed `Poller`

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;

use nix::errno::Errno;

use fibrio_core::Event;

use super::{timeout_ms, EventFd, Poller, Readiness};

/// epoll user data reserved for the wake eventfd
const WAKE_TOKEN: u64 = u64::MAX;

pub struct Epoll {
    epfd: OwnedFd,
    waker: EventFd,
    max_events: usize,
}

impl Epoll {
    /// `max_events` bounds how many descriptors one `wait` reports
    pub fn new(max_events: usize) -> io::Result<Self> {
        let fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if fd < 0 {
            return Err(Errno::last().into());
        }
        let epfd = unsafe { OwnedFd::from_raw_fd(fd) };
        let waker = EventFd::new()?;

        let poller = Epoll {
            epfd,
            waker,
            max_events: max_events.max(1),
        };
        poller.ctl(
            libc::EPOLL_CTL_ADD,
            poller.waker.as_raw_fd(),
            (libc::EPOLLIN | libc::EPOLLET) as u32,
            WAKE_TOKEN,
        )?;
        Ok(poller)
    }

    fn ctl(&self, op: libc::c_int, fd: RawFd, events: u32, token: u64) -> io::Result<()> {
        let mut ev = libc::epoll_event { events, u64: token };
        let ret = unsafe { libc::epoll_ctl(self.epfd.as_raw_fd(), op, fd, &mut ev) };
        if ret < 0 {
            return Err(Errno::last().into());
        }
        Ok(())
    }

    fn interest_bits(interest: Event) -> u32 {
        libc::EPOLLET as u32 | interest.bits()
    }
}

impl Poller for Epoll {
    fn register(&self, fd: RawFd, interest: Event) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_ADD, fd, Self::interest_bits(interest), fd as u64)
    }

    fn modify(&self, fd: RawFd, interest: Event) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_MOD, fd, Self::interest_bits(interest), fd as u64)
    }

    fn deregister(&self, fd: RawFd) -> io::Result<()> {
        let ret = unsafe {
            libc::epoll_ctl(self.epfd.as_raw_fd(), libc::EPOLL_CTL_DEL, fd, std::ptr::null_mut())
        };
        if ret < 0 {
            return Err(Errno::last().into());
        }
        Ok(())
    }

    fn wait(&self, ready: &mut Vec<Readiness>, timeout: Option<Duration>) -> io::Result<()> {
        let mut events: Vec<libc::epoll_event> = Vec::with_capacity(self.max_events);
        let n = unsafe {
            libc::epoll_wait(
                self.epfd.as_raw_fd(),
                events.as_mut_ptr(),
                self.max_events as libc::c_int,
                timeout_ms(timeout),
            )
        };
        if n < 0 {
            return Err(Errno::last().into());
        }
        unsafe {
            events.set_len(n as usize);
        }

        for ev in &events {
            let token = ev.u64;
            let flags = ev.events;
            if token == WAKE_TOKEN {
                self.waker.drain();
                continue;
            }
            let mut event = Event::NONE;
            if flags & (libc::EPOLLERR | libc::EPOLLHUP) as u32 != 0 {
                event = Event::READ | Event::WRITE;
            }
            if flags & libc::EPOLLIN as u32 != 0 {
                event |= Event::READ;
            }
            if flags & libc::EPOLLOUT as u32 != 0 {
                event |= Event::WRITE;
            }
            ready.push(Readiness {
                fd: token as RawFd,
                event,
            });
        }
        Ok(())
    }

    fn wake(&self) -> io::Result<()> {
        self.waker.notify()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;

    fn pipe() -> (OwnedFd, OwnedFd) {
        let mut fds = [0; 2];
        let ret = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_NONBLOCK | libc::O_CLOEXEC) };
        assert_eq!(ret, 0);
        unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) }
    }

    fn write_byte(fd: &OwnedFd) {
        let b = [1u8];
        let n = unsafe { libc::write(fd.as_raw_fd(), b.as_ptr() as *const libc::c_void, 1) };
        assert_eq!(n, 1);
    }

    #[test]
    fn test_read_readiness() {
        let poller = Epoll::new(16).unwrap();
        let (r, w) = pipe();
        poller.register(r.as_raw_fd(), Event::READ).unwrap();

        let mut ready = Vec::new();
        poller.wait(&mut ready, Some(Duration::ZERO)).unwrap();
        assert!(ready.is_empty());

        write_byte(&w);
        poller.wait(&mut ready, Some(Duration::from_secs(1))).unwrap();
        assert_eq!(ready, vec![Readiness { fd: r.as_raw_fd(), event: Event::READ }]);

        poller.deregister(r.as_raw_fd()).unwrap();
        assert!(poller.deregister(r.as_raw_fd()).is_err());
    }

    #[test]
    fn test_hangup_reports_both() {
        let poller = Epoll::new(16).unwrap();
        let (r, w) = pipe();
        poller.register(r.as_raw_fd(), Event::READ).unwrap();
        drop(w);

        let mut ready = Vec::new();
        poller.wait(&mut ready, Some(Duration::from_secs(1))).unwrap();
        assert_eq!(ready.len(), 1);
        assert!(ready[0].event.contains(Event::READ | Event::WRITE));
    }

    #[test]
    fn test_wake_interrupts_wait_and_is_hidden() {
        let poller = Arc::new(Epoll::new(16).unwrap());
        let p = poller.clone();
        let waker = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            p.wake().unwrap();
        });

        let start = Instant::now();
        let mut ready = Vec::new();
        poller.wait(&mut ready, Some(Duration::from_secs(5))).unwrap();
        assert!(start.elapsed() < Duration::from_secs(4));
        assert!(ready.is_empty());
        waker.join().unwrap();
    }

    #[test]
    fn test_double_register_fails() {
        let poller = Epoll::new(16).unwrap();
        let (r, _w) = pipe();
        poller.register(r.as_raw_fd(), Event::READ).unwrap();
        let err = poller.register(r.as_raw_fd(), Event::READ).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::EEXIST));
        poller.modify(r.as_raw_fd(), Event::READ | Event::WRITE).unwrap();
    }
}
