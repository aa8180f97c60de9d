//! Thread-local storage for fiber and scheduler context
//!
//! Fibers migrate between OS threads, so a TLS address must never be
//! cached across a context switch. Every accessor here is
//! `#[inline(never)]` to force a fresh lookup on each call.

use std::cell::{Cell, RefCell};
use std::ptr;
use std::sync::{Arc, Weak};

use fibrio_core::kprint::{self, LogContext};
use fibrio_core::FiberId;

use crate::fiber::Fiber;
use crate::scheduler::Scheduler;

thread_local! {
    /// Worker index within the scheduler this thread serves
    static WORKER_ID: Cell<usize> = const { Cell::new(usize::MAX) };

    /// Fiber currently executing on this thread (null before first use)
    static CURRENT_FIBER: Cell<*const Fiber> = const { Cell::new(ptr::null()) };

    /// Pseudo-fiber standing for the thread's original stack
    static MAIN_FIBER: RefCell<Option<Arc<Fiber>>> = const { RefCell::new(None) };

    /// Scheduler this thread is running, if any
    static SCHEDULER: RefCell<Weak<Scheduler>> = const { RefCell::new(Weak::new()) };
}

/// Set the current worker index
#[inline(never)]
pub fn set_worker_id(id: Option<usize>) {
    WORKER_ID.with(|cell| cell.set(id.unwrap_or(usize::MAX)));
}

/// Current worker index, `None` when not on a scheduler thread
#[inline(never)]
pub fn worker_id() -> Option<usize> {
    let id = WORKER_ID.with(|cell| cell.get());
    if id == usize::MAX {
        None
    } else {
        Some(id)
    }
}

#[inline(never)]
pub fn set_current_fiber(fiber: *const Fiber) {
    CURRENT_FIBER.with(|cell| cell.set(fiber));
}

/// Raw pointer to the running fiber, null if none was ever set
#[inline(never)]
pub fn current_fiber_ptr() -> *const Fiber {
    CURRENT_FIBER.with(|cell| cell.get())
}

/// The running fiber, creating the thread's main fiber on first use
#[inline(never)]
pub fn current_fiber_or_main() -> *const Fiber {
    let cur = current_fiber_ptr();
    if !cur.is_null() {
        return cur;
    }
    let main = main_fiber();
    let p = Arc::as_ptr(&main);
    set_current_fiber(p);
    p
}

/// The thread's main pseudo-fiber
#[inline(never)]
pub fn main_fiber() -> Arc<Fiber> {
    MAIN_FIBER.with(|slot| {
        slot.borrow_mut()
            .get_or_insert_with(Fiber::new_main)
            .clone()
    })
}

#[inline(never)]
pub fn set_scheduler(sched: Option<&Arc<Scheduler>>) {
    SCHEDULER.with(|slot| {
        *slot.borrow_mut() = match sched {
            Some(s) => Arc::downgrade(s),
            None => Weak::new(),
        };
    });
}

#[inline(never)]
pub fn scheduler() -> Option<Arc<Scheduler>> {
    SCHEDULER.with(|slot| slot.borrow().upgrade())
}

/// Whether a scheduler is installed on this thread
#[inline(never)]
pub fn has_scheduler() -> bool {
    SCHEDULER.with(|slot| slot.borrow().strong_count() > 0)
}

fn log_context() -> LogContext {
    let fiber = current_fiber_ptr();
    LogContext {
        worker: worker_id(),
        fiber: if fiber.is_null() {
            FiberId::NONE
        } else {
            unsafe { (*fiber).id() }
        },
    }
}

/// Attach worker and fiber ids to diagnostic lines
pub fn install_log_context() {
    kprint::set_context_provider(log_context);
}
