//! # fibrio-runtime
//!
//! Platform-specific runtime implementation for the fibrio scheduler.
//!
//! This crate provides:
//! - Fiber stacks (mmap with a guard page)
//! - Context switching (architecture-specific assembly)
//! - Stackful fibers with an explicit resume/yield protocol
//! - The M:N cooperative scheduler and its worker threads
//! - Deadline timers
//! - The epoll reactor (IoManager)

pub mod config;
pub mod arch;
pub mod stack;
pub mod tls;
pub mod fiber;
pub mod parking;
pub mod scheduler;
pub mod timer;
pub mod poller;
pub mod iomanager;

// Re-exports
pub use config::{ReactorConfig, SchedulerConfig};
pub use fiber::{Fiber, FiberBuilder};
pub use scheduler::{ParkingHooks, Scheduler, SchedulerHooks, SchedulerSwitcher, Task};
pub use timer::{Timer, TimerCallback, TimerManager};
pub use iomanager::{IoHandle, IoManager, Reactor};
pub use parking::{CondvarParking, WorkerParking};

// Platform detection
cfg_if::cfg_if! {
    if #[cfg(not(target_os = "linux"))] {
        compile_error!("fibrio-runtime supports Linux only");
    }
}

// Architecture detection
cfg_if::cfg_if! {
    if #[cfg(target_arch = "x86_64")] {
        pub use arch::x86_64 as current_arch;
    } else if #[cfg(target_arch = "aarch64")] {
        pub use arch::aarch64 as current_arch;
    } else {
        compile_error!("Unsupported architecture");
    }
}
