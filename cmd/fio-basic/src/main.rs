//! Basic fibrio example
//!
//! Drives a bare fiber by hand, then runs yielding fibers and pinned
//! callbacks on a scheduler that folds the main thread in as worker 0.
//!
//! # Environment Variables
//!
//! - `FIO_FLUSH_EPRINT=1` - Flush debug output immediately (useful for crash debugging)
//! - `FIO_LOG_LEVEL=debug` - Set log level (off, error, warn, info, debug, trace)
//! - `FIO_THREADS=4` - Worker count, main thread included

use fibrio::{kdebug, kinfo, Fiber, Scheduler, SchedulerConfig, Task};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
// FIO_LOG_LEVEL=debug FIO_FLUSH_EPRINT=1 cargo run -p fio-basic
fn main() {
    println!("=== fibrio Basic Example ===\n");

    fibrio::init_logging();

    // A fiber driven directly, no scheduler involved
    let steps = Arc::new(AtomicUsize::new(0));
    let s = steps.clone();
    let fiber = Fiber::builder()
        .run_in_scheduler(false)
        .spawn(move || {
            for i in 0..3 {
                s.fetch_add(1, Ordering::SeqCst);
                kdebug!("[manual] step {}", i);
                Fiber::yield_to_hold();
            }
        })
        .expect("fiber allocation failed");

    while !fiber.state().is_terminal() {
        let left = fiber.resume();
        println!("manual fiber {} yielded in state {}", fiber.id(), left);
    }
    println!("manual fiber ran {} steps\n", steps.load(Ordering::SeqCst));

    let config = SchedulerConfig::from_env()
        .threads(fibrio::env_get("FIO_THREADS", 3))
        .use_caller(true)
        .name("basic");
    config.print();

    let sched = Scheduler::new(config).expect("invalid scheduler config");
    sched.start().expect("failed to start workers");

    let completed = Arc::new(AtomicUsize::new(0));

    kinfo!("Scheduling fibers...");
    for i in 1..=4 {
        let c = completed.clone();
        let fiber = Fiber::new(move || {
            kdebug!("[fiber {}] started", i);
            for j in 0..3 {
                kdebug!("[fiber {}] iteration {}", i, j);
                fibrio::yield_now();
            }
            kdebug!("[fiber {}] finished", i);
            c.fetch_add(1, Ordering::SeqCst);
        })
        .expect("fiber allocation failed");
        println!("Scheduled fiber {} (ID={})", i, fiber.id());
        sched.schedule(fiber);
    }

    // One callback pinned to each worker
    for worker in 0..sched.worker_count() {
        let c = completed.clone();
        sched.schedule_on(
            Task::callback(move || {
                kdebug!("[pinned] running on worker {}", worker);
                c.fetch_add(1, Ordering::SeqCst);
            }),
            worker,
        );
    }

    println!("\n{}\n", sched);

    // The main thread joins in here and only returns once everything ran
    sched.stop();

    let count = completed.load(Ordering::SeqCst);
    kinfo!("{} task(s) completed", count);
    println!("{} task(s) completed, {} fiber(s) alive", count, Fiber::total());
    println!("\n=== Example Complete ===");
}
