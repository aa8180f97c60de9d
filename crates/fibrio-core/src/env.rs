//! Environment variable utilities
//!
//! Generic `env_get<T>` for parsing `FIO_*` variables with defaults.
//!
//! # Usage
//!
//! ```ignore
//! use fibrio_core::env::{env_get, env_get_bool, env_get_ms};
//!
//! let workers: usize = env_get("FIO_THREADS", 4);
//! let park = env_get_ms("FIO_PARK_TIMEOUT_MS", Duration::from_millis(10));
//! let use_caller = env_get_bool("FIO_USE_CALLER", false);
//! ```

use std::str::FromStr;
use std::time::Duration;

/// Get environment variable parsed as type T, or return default
///
/// Works with any type that implements `FromStr`. Parse failures fall back
/// to the default.
#[inline]
pub fn env_get<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    env_get_opt(key).unwrap_or(default)
}

/// Get environment variable as boolean
///
/// Accepts "1", "true", "yes", "on" (case-insensitive) as true.
/// Anything else that is set counts as false; unset returns the default.
#[inline]
pub fn env_get_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => matches!(val.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

/// Get environment variable as a whole number of milliseconds
#[inline]
pub fn env_get_ms(key: &str, default: Duration) -> Duration {
    env_get_opt::<u64>(key)
        .map(Duration::from_millis)
        .unwrap_or(default)
}

/// Get environment variable as optional value
///
/// `Some(T)` if the variable is set and parses successfully.
#[inline]
pub fn env_get_opt<T>(key: &str) -> Option<T>
where
    T: FromStr,
{
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Get environment variable as string, or return default
#[inline]
pub fn env_get_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

// ============================================================================
// Tests
// ============================================================================
