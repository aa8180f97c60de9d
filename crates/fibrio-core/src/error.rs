//! Error types for the fibrio scheduler
//!
//! Two failure classes exist:
//!
//! - Recoverable resource and syscall failures are returned as [`SchedError`].
//! - Programming errors (double registration, resuming a running fiber,
//!   stopping from the wrong thread) go through [`contract_assert!`], which
//!   logs a backtrace and panics with a [`ContractViolation`] payload.

use std::backtrace::Backtrace;
use std::fmt;
use std::io;

use thiserror::Error;

/// Result type for scheduler operations
pub type SchedResult<T> = Result<T, SchedError>;

/// Errors that can occur in scheduler operations
#[derive(Debug, Error)]
pub enum SchedError {
    /// mmap or mprotect failed while allocating a fiber stack
    #[error("failed to allocate {size} byte fiber stack: {source}")]
    StackAlloc {
        size: usize,
        #[source]
        source: io::Error,
    },

    /// Worker thread could not be spawned
    #[error("failed to spawn worker thread {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: io::Error,
    },

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// epoll_ctl rejected a registration change
    #[error("epoll_ctl({op}) failed for fd {fd}: {source}")]
    Register {
        fd: i32,
        op: &'static str,
        #[source]
        source: io::Error,
    },

    /// The descriptor table could not grow to hold this fd
    #[error("descriptor table cannot grow to {0} entries")]
    TableGrowth(usize),

    /// Negative or otherwise unusable descriptor
    #[error("invalid file descriptor {0}")]
    InvalidFd(i32),

    /// epoll or eventfd setup failed
    #[error("poller error: {0}")]
    Poller(#[source] io::Error),
}

impl SchedError {
    /// Raw OS error code, if the failure came from a syscall
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            SchedError::StackAlloc { source, .. }
            | SchedError::Spawn { source, .. }
            | SchedError::Register { source, .. }
            | SchedError::Poller(source) => source.raw_os_error(),
            _ => None,
        }
    }
}

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("thread count must be at least 1")]
    NoThreads,

    #[error("thread count {0} exceeds the maximum of {max}", max = crate::constants::MAX_WORKERS)]
    TooManyThreads(usize),

    #[error("stack size {0} is below the minimum of {min}", min = crate::constants::MIN_STACK_SIZE)]
    StackTooSmall(usize),

    #[error("callback fiber pool capacity must be at least 1")]
    EmptyFiberPool,

    #[error("max_events must be at least 1")]
    NoEvents,

    #[error("max_wait must be non-zero")]
    ZeroWait,
}

/// Panic payload raised on API misuse
///
/// Inside a fiber the entry trampoline treats this payload as fatal and
/// aborts the process. On a plain thread it unwinds like any other panic.
#[derive(Debug, Clone)]
pub struct ContractViolation {
    pub message: String,
    pub location: &'static str,
}

impl fmt::Display for ContractViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "contract violation at {}: {}", self.location, self.message)
    }
}

/// Log the violation with a backtrace and panic with a `ContractViolation`
#[cold]
#[inline(never)]
#[doc(hidden)]
pub fn _contract_violation(location: &'static str, message: String) -> ! {
    let bt = Backtrace::force_capture();
    crate::kerror!("contract violation at {}: {}\n{}", location, message, bt);
    std::panic::panic_any(ContractViolation { message, location })
}

/// Check a usage precondition
///
/// ```ignore
/// contract_assert!(state.is_resumable(), "resume() on fiber in state {}", state);
/// ```
#[macro_export]
macro_rules! contract_assert {
    ($cond:expr, $($arg:tt)+) => {{
        if !$cond {
            $crate::error::_contract_violation(
                concat!(file!(), ":", line!()),
                format!($($arg)+),
            );
        }
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = SchedError::TableGrowth(1 << 40);
        assert!(e.to_string().contains("cannot grow"));

        let e = SchedError::Register {
            fd: 7,
            op: "add",
            source: io::Error::from_raw_os_error(9),
        };
        assert!(e.to_string().contains("fd 7"));
        assert_eq!(e.raw_os_error(), Some(9));

        let e: SchedError = ConfigError::NoThreads.into();
        assert!(matches!(e, SchedError::Config(ConfigError::NoThreads)));
        assert_eq!(e.raw_os_error(), None);
    }

    #[test]
    fn test_contract_assert_panics_with_payload() {
        crate::kprint::set_log_level(crate::kprint::LogLevel::Off);
        let result = std::panic::catch_unwind(|| {
            contract_assert!(1 + 1 == 3, "arithmetic is broken: {}", 42);
        });
        let payload = result.unwrap_err();
        let cv = payload
            .downcast_ref::<ContractViolation>()
            .expect("payload should be ContractViolation");
        assert_eq!(cv.message, "arithmetic is broken: 42");
        assert!(cv.location.contains("error.rs"));
    }

    #[test]
    fn test_contract_assert_passes() {
        contract_assert!(true, "never shown");
    }
}
