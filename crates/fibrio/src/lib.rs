//! # fibrio - stackful fibers on an M:N scheduler
//!
//! Cooperative userspace threading for Rust, with an epoll reactor.
//!
//! ## Features
//!
//! - **Fibers**: independent mmap'd stacks with a guard page, explicit
//!   `resume` / `yield` and hand-written context switches
//! - **Scheduler**: a FIFO of fibers and callbacks shared by N worker
//!   threads, optional per-task worker affinity, optional use of the
//!   constructing thread as a worker
//! - **IoManager**: one-shot READ/WRITE readiness registrations per
//!   descriptor, driven by epoll from the workers' idle fibers
//! - **Timers**: one-shot, recurring and condition timers
//!
//! ## Quick Start
//!
//! ```ignore
//! use fibrio::{IoManager, SchedulerConfig};
//! use std::time::Duration;
//!
//! fn main() {
//!     let io = IoManager::new(SchedulerConfig::from_env().threads(2)).unwrap();
//!
//!     io.schedule_fn(|| {
//!         println!("hello from a fiber");
//!         fibrio::sleep(Duration::from_millis(10));
//!         println!("woke up without blocking the worker");
//!     });
//!
//!     io.add_timer(Duration::from_millis(50), || println!("tick"), false);
//!     io.stop();
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      User Code                              │
//! │        schedule(), add_event(), add_timer(), sleep()        │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Scheduler  (+ Reactor hooks)                │
//! │       task queue, affinity scan, idle / tickle / stop       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!          ┌───────────────────┼───────────────────┐
//!          ▼                   ▼                   ▼
//!    ┌───────────┐      ┌───────────┐      ┌─────────────────┐
//!    │  Worker   │      │  Worker   │      │  epoll + timers │
//!    │  Thread   │      │  Thread   │      │  (idle fibers)  │
//!    └───────────┘      └───────────┘      └─────────────────┘
//!          │                   │
//!          └─────────┬─────────┘
//!                    ▼
//!    ┌─────────────────────────────────────────────────────────┐
//!    │                       Fibers                            │
//!    │        mmap'd stacks, guard pages, switch_context       │
//!    └─────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;
use std::time::Duration;

// Re-export core types
pub use fibrio_core::{
    ConfigError,
    ContractViolation,
    Event,
    FiberId,
    FiberState,
    Mutex,
    RwLock,
    SchedError,
    SchedResult,
    Semaphore,
};

// Re-export kprint macros for debug logging
pub use fibrio_core::{contract_assert, kdebug, kerror, kinfo, kprint, kprintln, ktrace, kwarn};
pub use fibrio_core::kprint::{
    init as init_logging, set_flush_enabled, set_log_level, set_sink, DiagnosticSink, LogLevel,
    StderrSink,
};

// Re-export env utilities
pub use fibrio_core::env::{env_get, env_get_bool, env_get_ms, env_get_opt, env_get_str};

// Re-export runtime types
pub use fibrio_runtime::{
    Fiber,
    FiberBuilder,
    IoHandle,
    IoManager,
    ReactorConfig,
    Scheduler,
    SchedulerConfig,
    SchedulerHooks,
    SchedulerSwitcher,
    Task,
    Timer,
    TimerManager,
};

/// Suspend the caller for `dur`
///
/// Inside a fiber of an IoManager only the fiber sleeps: a one-shot timer
/// reschedules it and the worker keeps running other tasks. Anywhere else
/// this blocks the OS thread.
pub fn sleep(dur: Duration) {
    if Fiber::in_fiber() {
        if let Some(io) = IoManager::current() {
            let fiber = Fiber::current();
            let sched = Arc::clone(io.scheduler());
            io.add_timer(dur, move || sched.schedule(Arc::clone(&fiber)), false);
            Fiber::yield_to_hold();
            return;
        }
    }
    std::thread::sleep(dur);
}

/// Let other tasks run
///
/// Inside a scheduled fiber the caller is re-queued behind them; outside a
/// fiber this yields the OS thread.
#[inline]
pub fn yield_now() {
    if Fiber::in_fiber() && Scheduler::current().is_some() {
        Fiber::yield_to_ready();
    } else {
        std::thread::yield_now();
    }
}

/// The running fiber's id; `FiberId::NONE` on a thread that never used fibers
#[inline]
pub fn current_id() -> FiberId {
    Fiber::current_id()
}

/// Whether the caller runs on a fiber stack
#[inline]
pub fn in_fiber() -> bool {
    Fiber::in_fiber()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    fn io(threads: usize) -> IoManager {
        IoManager::with_config(
            SchedulerConfig::new().threads(threads).use_caller(false).name("facade"),
            ReactorConfig::new(),
        )
        .unwrap()
    }

    #[test]
    fn test_sleep_outside_fiber_blocks_thread() {
        assert!(!in_fiber());
        let start = Instant::now();
        sleep(Duration::from_millis(20));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_fiber_sleeps_do_not_block_the_worker() {
        let io = io(1);
        let done = Arc::new(AtomicUsize::new(0));
        let start = Instant::now();
        for _ in 0..4 {
            let d = done.clone();
            io.schedule_fn(move || {
                sleep(Duration::from_millis(200));
                d.fetch_add(1, Ordering::SeqCst);
            });
        }
        io.stop();
        assert_eq!(done.load(Ordering::SeqCst), 4);
        // Four sequential sleeps would take 800ms on the single worker
        assert!(start.elapsed() < Duration::from_millis(700));
    }

    #[test]
    fn test_yield_now_interleaves_fibers() {
        let io = io(1);
        let trace = Arc::new(Mutex::new(Vec::new()));
        let tasks: Vec<Task> = ['a', 'b']
            .into_iter()
            .map(|name| {
                let t = trace.clone();
                Task::callback(move || {
                    for _ in 0..3 {
                        t.lock().push(name);
                        yield_now();
                    }
                })
            })
            .collect();
        // Queued together so neither starts alone
        io.schedule_all(tasks);
        io.stop();
        assert_eq!(*trace.lock(), vec!['a', 'b', 'a', 'b', 'a', 'b']);
    }
}
