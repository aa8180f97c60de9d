//! Worker parking mechanism
//!
//! Sleep/wake for idle workers of a plain scheduler. The IoManager does not
//! use this; it blocks in epoll and is woken through an eventfd.

use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// Upper bound on banked wake permits
const MAX_PERMITS: usize = 1024;

/// Worker parking mechanism
///
/// Workers call `park()` when no work is available. Wake sources call
/// `wake_one()`.
pub trait WorkerParking: Send + Sync {
    /// Park the current worker until signaled or timeout
    ///
    /// Returns `true` if woken by a signal. Workers re-check for work after
    /// returning regardless of the result.
    fn park(&self, timeout: Option<Duration>) -> bool;

    /// Wake one parked worker, or bank a permit for the next one to park
    fn wake_one(&self);
}

/// Condvar-based parking with banked permits
///
/// A wake that arrives while nobody is parked is kept as a permit, so a
/// worker that checked the queue just before the wake does not sleep
/// through it.
pub struct CondvarParking {
    permits: Mutex<usize>,
    condvar: Condvar,
}

impl CondvarParking {
    pub fn new() -> Self {
        Self {
            permits: Mutex::new(0),
            condvar: Condvar::new(),
        }
    }
}

impl Default for CondvarParking {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerParking for CondvarParking {
    fn park(&self, timeout: Option<Duration>) -> bool {
        let mut permits = self.permits.lock();
        if *permits > 0 {
            *permits -= 1;
            return true;
        }

        match timeout {
            Some(t) => {
                self.condvar.wait_for(&mut permits, t);
            }
            None => self.condvar.wait(&mut permits),
        }

        if *permits > 0 {
            *permits -= 1;
            true
        } else {
            false
        }
    }

    fn wake_one(&self) {
        {
            let mut permits = self.permits.lock();
            if *permits < MAX_PERMITS {
                *permits += 1;
            }
        }
        self.condvar.notify_one();
    }
}
