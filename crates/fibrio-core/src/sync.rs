//! Thread synchronization primitives
//!
//! Scheduler and reactor state is guarded by `parking_lot` locks, which are
//! re-exported here so every crate uses the same types. [`Semaphore`] is a
//! counting semaphore built on a `parking_lot` condition variable.

use std::time::Duration;

use parking_lot::Condvar;

pub use parking_lot::{
    Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockUpgradableReadGuard, RwLockWriteGuard,
};

/// Counting semaphore
///
/// Blocks the OS thread, so it must not be used to wait from inside a fiber
/// for something only another fiber on the same worker can signal.
pub struct Semaphore {
    count: Mutex<u32>,
    cond: Condvar,
}

impl Semaphore {
    pub const fn new(initial: u32) -> Self {
        Semaphore {
            count: Mutex::new(initial),
            cond: Condvar::new(),
        }
    }

    /// Take one permit, blocking until available
    pub fn wait(&self) {
        let mut count = self.count.lock();
        while *count == 0 {
            self.cond.wait(&mut count);
        }
        *count -= 1;
    }

    /// Take one permit if one is available right now
    pub fn try_wait(&self) -> bool {
        let mut count = self.count.lock();
        if *count == 0 {
            return false;
        }
        *count -= 1;
        true
    }

    /// Take one permit, giving up after `timeout`
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut count = self.count.lock();
        while *count == 0 {
            if self.cond.wait_for(&mut count, timeout).timed_out() && *count == 0 {
                return false;
            }
        }
        *count -= 1;
        true
    }

    /// Release one permit
    pub fn notify(&self) {
        let mut count = self.count.lock();
        *count += 1;
        self.cond.notify_one();
    }

    /// Permits currently available
    pub fn available(&self) -> u32 {
        *self.count.lock()
    }
}

impl Default for Semaphore {
    fn default() -> Self {
        Semaphore::new(0)
    }
}
