//! Runtime configuration
//!
//! Compile-time defaults with runtime environment overrides.
//!
//! # Configuration Priority (highest wins)
//!
//! 1. Builder calls
//! 2. Environment variables (`from_env()`)
//! 3. User's fio_config.rs named by `FIO_CONFIG_RS` at build time
//! 4. Library defaults
//!
//! # Example
//!
//! ```rust,ignore
//! use fibrio_runtime::config::SchedulerConfig;
//!
//! let config = SchedulerConfig::from_env()
//!     .threads(4)
//!     .use_caller(false)
//!     .name("io");
//! ```

use std::time::Duration;

use fibrio_core::constants::{MAX_WORKERS, MIN_STACK_SIZE};
use fibrio_core::env::{env_get, env_get_bool, env_get_ms, env_get_str};
use fibrio_core::{kprintln, ConfigError};

/// Defaults generated by build.rs
pub mod defaults {
    include!(concat!(env!("OUT_DIR"), "/fio_merged_config.rs"));
}

/// Scheduler configuration with builder pattern
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Total worker count, including the caller thread in use-caller mode
    pub threads: usize,
    /// Fold the constructing thread in as worker 0
    pub use_caller: bool,
    /// Name used for worker threads ("{name}-worker-{i}") and diagnostics
    pub name: String,
    /// Stack size for fibers created by the scheduler
    pub stack_size: usize,
    /// Callback fibers kept per worker for reuse
    pub callback_fiber_pool: usize,
    /// Upper bound on a single park in the default idle
    pub park_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulerConfig {
    /// Compile-time defaults with environment overrides
    ///
    /// Environment variables (all optional):
    /// - `FIO_THREADS` - Worker thread count
    /// - `FIO_USE_CALLER` - Fold the constructing thread in (0/1)
    /// - `FIO_NAME` - Scheduler name
    /// - `FIO_STACK_SIZE` - Fiber stack size in bytes
    /// - `FIO_CALLBACK_FIBER_POOL` - Pooled callback fibers per worker
    /// - `FIO_PARK_TIMEOUT_MS` - Idle park timeout in milliseconds
    pub fn from_env() -> Self {
        Self {
            threads: env_get("FIO_THREADS", defaults::NUM_WORKERS),
            use_caller: env_get_bool("FIO_USE_CALLER", defaults::USE_CALLER),
            name: env_get_str("FIO_NAME", "fibrio"),
            stack_size: env_get("FIO_STACK_SIZE", defaults::STACK_SIZE),
            callback_fiber_pool: env_get(
                "FIO_CALLBACK_FIBER_POOL",
                defaults::CALLBACK_FIBER_POOL,
            ),
            park_timeout: env_get_ms(
                "FIO_PARK_TIMEOUT_MS",
                Duration::from_millis(defaults::PARK_TIMEOUT_MS),
            ),
        }
    }

    /// Explicit defaults with no env override
    pub fn new() -> Self {
        Self {
            threads: defaults::NUM_WORKERS,
            use_caller: defaults::USE_CALLER,
            name: "fibrio".to_string(),
            stack_size: defaults::STACK_SIZE,
            callback_fiber_pool: defaults::CALLBACK_FIBER_POOL,
            park_timeout: Duration::from_millis(defaults::PARK_TIMEOUT_MS),
        }
    }

    // Builder methods

    pub fn threads(mut self, n: usize) -> Self {
        self.threads = n;
        self
    }

    pub fn use_caller(mut self, enable: bool) -> Self {
        self.use_caller = enable;
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn stack_size(mut self, size: usize) -> Self {
        self.stack_size = size;
        self
    }

    pub fn callback_fiber_pool(mut self, n: usize) -> Self {
        self.callback_fiber_pool = n;
        self
    }

    pub fn park_timeout(mut self, d: Duration) -> Self {
        self.park_timeout = d;
        self
    }

    /// OS threads `start()` spawns
    pub fn spawned_threads(&self) -> usize {
        if self.use_caller {
            self.threads - 1
        } else {
            self.threads
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.threads == 0 {
            return Err(ConfigError::NoThreads);
        }
        if self.threads > MAX_WORKERS {
            return Err(ConfigError::TooManyThreads(self.threads));
        }
        if self.stack_size < MIN_STACK_SIZE {
            return Err(ConfigError::StackTooSmall(self.stack_size));
        }
        if self.callback_fiber_pool == 0 {
            return Err(ConfigError::EmptyFiberPool);
        }
        Ok(())
    }

    /// Print configuration (for debugging)
    pub fn print(&self) {
        kprintln!("Scheduler configuration:");
        kprintln!("  name:                 {}", self.name);
        kprintln!("  threads:              {}", self.threads);
        kprintln!("  use_caller:           {}", self.use_caller);
        kprintln!("  stack_size:           {}", self.stack_size);
        kprintln!("  callback_fiber_pool:  {}", self.callback_fiber_pool);
        kprintln!("  park_timeout:         {:?}", self.park_timeout);
    }
}

/// Reactor (IoManager) configuration
#[derive(Debug, Clone)]
pub struct ReactorConfig {
    /// Upper bound on a single epoll_wait
    pub max_wait: Duration,
    /// Events fetched per epoll_wait
    pub max_events: usize,
    /// Initial descriptor table size
    pub initial_fd_capacity: usize,
}

impl Default for ReactorConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl ReactorConfig {
    /// Environment variables (all optional):
    /// - `FIO_MAX_WAIT_MS` - Reactor wait cap in milliseconds
    /// - `FIO_MAX_EVENTS` - Events per wait
    /// - `FIO_INITIAL_FD_CAPACITY` - Initial descriptor table size
    pub fn from_env() -> Self {
        Self {
            max_wait: env_get_ms(
                "FIO_MAX_WAIT_MS",
                Duration::from_millis(defaults::MAX_WAIT_MS),
            ),
            max_events: env_get("FIO_MAX_EVENTS", defaults::MAX_EVENTS),
            initial_fd_capacity: env_get(
                "FIO_INITIAL_FD_CAPACITY",
                defaults::INITIAL_FD_CAPACITY,
            ),
        }
    }

    pub fn new() -> Self {
        Self {
            max_wait: Duration::from_millis(defaults::MAX_WAIT_MS),
            max_events: defaults::MAX_EVENTS,
            initial_fd_capacity: defaults::INITIAL_FD_CAPACITY,
        }
    }

    pub fn max_wait(mut self, d: Duration) -> Self {
        self.max_wait = d;
        self
    }

    pub fn max_events(mut self, n: usize) -> Self {
        self.max_events = n;
        self
    }

    pub fn initial_fd_capacity(mut self, n: usize) -> Self {
        self.initial_fd_capacity = n;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_events == 0 {
            return Err(ConfigError::NoEvents);
        }
        if self.max_wait.is_zero() {
            return Err(ConfigError::ZeroWait);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(SchedulerConfig::new().validate().is_ok());
        assert!(ReactorConfig::new().validate().is_ok());
        assert_eq!(ReactorConfig::new().max_wait, Duration::from_millis(defaults::MAX_WAIT_MS));
    }

    #[test]
    fn test_builder() {
        let config = SchedulerConfig::new()
            .threads(8)
            .use_caller(false)
            .name("net")
            .park_timeout(Duration::from_millis(5));

        assert_eq!(config.threads, 8);
        assert_eq!(config.spawned_threads(), 8);
        assert_eq!(config.name, "net");
        assert_eq!(config.park_timeout, Duration::from_millis(5));

        assert_eq!(config.use_caller(true).spawned_threads(), 7);
    }

    #[test]
    fn test_validation() {
        assert_eq!(
            SchedulerConfig::new().threads(0).validate(),
            Err(ConfigError::NoThreads)
        );
        assert_eq!(
            SchedulerConfig::new().threads(1000).validate(),
            Err(ConfigError::TooManyThreads(1000))
        );
        assert_eq!(
            SchedulerConfig::new().stack_size(4096).validate(),
            Err(ConfigError::StackTooSmall(4096))
        );
        assert_eq!(
            SchedulerConfig::new().callback_fiber_pool(0).validate(),
            Err(ConfigError::EmptyFiberPool)
        );
        assert_eq!(
            ReactorConfig::new().max_events(0).validate(),
            Err(ConfigError::NoEvents)
        );
    }
}
