//! Timer example
//!
//! One-shot, recurring, condition and cancelled timers on an IoManager,
//! plus fibers sleeping without blocking their worker.
//!
//! # Environment Variables
//!
//! - `FIO_LOG_LEVEL=debug` - Set log level (off, error, warn, info, debug, trace)
//! - `FIO_MAX_WAIT_MS=3000` - Upper bound on one reactor wait

use fibrio::{kinfo, IoManager, SchedulerConfig};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn main() {
    println!("=== fibrio Timer Example ===\n");

    fibrio::init_logging();

    let io = IoManager::new(SchedulerConfig::from_env().threads(2).use_caller(false).name("timers"))
        .expect("failed to start IoManager");
    let start = Instant::now();

    let ticks = Arc::new(AtomicUsize::new(0));
    let t = ticks.clone();
    let recurring = io.add_timer(
        Duration::from_millis(50),
        move || {
            let n = t.fetch_add(1, Ordering::SeqCst) + 1;
            kinfo!("[recurring] tick {} at {:?}", n, start.elapsed());
        },
        true,
    );

    io.add_timer(
        Duration::from_millis(20),
        move || println!("[one-shot] fired at {:?}", start.elapsed()),
        false,
    );

    // The condition dies before the deadline, so this never runs
    let cond = Arc::new(());
    io.add_condition_timer(
        Duration::from_millis(30),
        || println!("[condition] should not fire"),
        Arc::downgrade(&cond),
        false,
    );
    drop(cond);

    let cancelled = io.add_timer(
        Duration::from_millis(40),
        || println!("[cancelled] should not fire"),
        false,
    );
    println!("cancelled timer before it fired: {}", cancelled.cancel());

    // Four fibers share two workers while they sleep
    let woke = Arc::new(AtomicUsize::new(0));
    for i in 1..=4u64 {
        let w = woke.clone();
        io.schedule_fn(move || {
            fibrio::sleep(Duration::from_millis(25 * i));
            w.fetch_add(1, Ordering::SeqCst);
            println!("[sleeper {}] woke at {:?}", i, start.elapsed());
        });
    }

    // stop() waits for armed timers, so the recurring one must end first
    let r = recurring.clone();
    io.add_timer(
        Duration::from_millis(300),
        move || {
            r.cancel();
        },
        false,
    );

    io.stop();

    println!(
        "\n{} tick(s), {} sleeper(s) woke, done in {:?}",
        ticks.load(Ordering::SeqCst),
        woke.load(Ordering::SeqCst),
        start.elapsed()
    );
    println!("\n=== Example Complete ===");
}
