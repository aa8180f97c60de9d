//! Readiness multiplexer abstraction
//!
//! The reactor only talks to a [`Poller`]. Registrations are edge
//! triggered: after a descriptor fires, its remaining interest must be
//! re-armed with `modify` (or dropped with `deregister`).
//!
//! # Implementors
//!
//! - `Epoll` (Linux): epoll plus an eventfd for `wake()`

use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

use fibrio_core::Event;

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        mod eventfd;
        mod epoll;
        pub use eventfd::EventFd;
        pub use epoll::Epoll;
    } else {
        compile_error!("fibrio's reactor requires epoll (Linux)");
    }
}

/// One ready descriptor as reported by `wait`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Readiness {
    pub fd: RawFd,
    /// READ and/or WRITE; error and hang-up conditions report both
    pub event: Event,
}

/// Readiness multiplexer
///
/// **Contract:**
/// - `wake()` must never block and may be called from any thread.
/// - Wakes are coalesced and never show up in `wait` output.
/// - `wait` returns `ErrorKind::Interrupted` on EINTR; callers retry.
pub trait Poller: Send + Sync {
    fn register(&self, fd: RawFd, interest: Event) -> io::Result<()>;

    fn modify(&self, fd: RawFd, interest: Event) -> io::Result<()>;

    fn deregister(&self, fd: RawFd) -> io::Result<()>;

    /// Block until something is ready, `wake()` is called, or `timeout`
    /// elapses (`None` blocks indefinitely). Ready descriptors are
    /// appended to `ready`.
    fn wait(&self, ready: &mut Vec<Readiness>, timeout: Option<Duration>) -> io::Result<()>;

    /// Interrupt a concurrent or the next `wait`
    fn wake(&self) -> io::Result<()>;
}

/// Round up to whole milliseconds so short timeouts do not become busy polls
pub(crate) fn timeout_ms(timeout: Option<Duration>) -> libc::c_int {
    match timeout {
        None => -1,
        Some(d) => {
            let ms = d.as_nanos().div_ceil(1_000_000);
            ms.min(libc::c_int::MAX as u128) as libc::c_int
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_rounds_up() {
        assert_eq!(timeout_ms(None), -1);
        assert_eq!(timeout_ms(Some(Duration::ZERO)), 0);
        assert_eq!(timeout_ms(Some(Duration::from_micros(10))), 1);
        assert_eq!(timeout_ms(Some(Duration::from_millis(3000))), 3000);
        assert_eq!(timeout_ms(Some(Duration::from_secs(u64::MAX))), libc::c_int::MAX);
    }
}
