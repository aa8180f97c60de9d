//! # fibrio-core
//!
//! Core types for the fibrio fiber scheduler.
//!
//! This crate is platform-agnostic and contains no OS-specific code.
//! Context switching, stacks, the scheduler and the reactor live in
//! `fibrio-runtime`.
//!
//! ## Modules
//!
//! - `id` - Fiber identifier type
//! - `state` - Fiber state machine
//! - `event` - Readiness event mask (READ / WRITE)
//! - `error` - Error types and the contract-violation path
//! - `sync` - Semaphore and re-exported lock types
//! - `kprint` - Leveled diagnostic macros with a pluggable sink
//! - `env` - Environment variable utilities

pub mod id;
pub mod state;
pub mod event;
pub mod error;
pub mod sync;
pub mod kprint;
pub mod env;

// Re-exports for convenience
pub use id::FiberId;
pub use state::FiberState;
pub use event::Event;
pub use error::{ConfigError, ContractViolation, SchedError, SchedResult};
pub use sync::{Mutex, MutexGuard, RwLock, Semaphore};
pub use env::{env_get, env_get_bool, env_get_ms};

/// Constants shared by the runtime crates
pub mod constants {
    /// Upper bound on worker threads per scheduler
    pub const MAX_WORKERS: usize = 256;

    /// Smallest fiber stack accepted by configuration validation
    pub const MIN_STACK_SIZE: usize = 16 * 1024;
}
