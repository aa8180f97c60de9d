//! Kernel-style print macros for fibrio
//!
//! Thread-safe, optionally-flushing diagnostic output similar to printk.
//! Leveled lines carry the worker index and fiber id of the emitting
//! context when the runtime has installed a context provider.
//!
//! # Environment Variables
//!
//! - `FIO_FLUSH_EPRINT=1` - Flush after each line (useful for debugging crashes)
//! - `FIO_LOG_LEVEL=<level>` - off/error/warn/info/debug/trace or 0..5
//!
//! # Usage
//!
//! ```ignore
//! use fibrio_core::{kdebug, kinfo, kerror};
//!
//! kinfo!("worker {} started", id);
//! kdebug!("fd {} grew table to {}", fd, cap);
//! kerror!("epoll_wait failed: {}", err);
//! ```
//!
//! Output goes to stderr unless a [`DiagnosticSink`] is installed with
//! [`set_sink`].

use std::fmt::Write as _;
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;

use crate::id::FiberId;

/// Log levels (matches common conventions)
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Off = 0,
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
}

impl LogLevel {
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => LogLevel::Off,
            1 => LogLevel::Error,
            2 => LogLevel::Warn,
            3 => LogLevel::Info,
            4 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let level = match s.to_ascii_lowercase().as_str() {
            "off" | "0" => LogLevel::Off,
            "error" | "1" => LogLevel::Error,
            "warn" | "2" => LogLevel::Warn,
            "info" | "3" => LogLevel::Info,
            "debug" | "4" => LogLevel::Debug,
            "trace" | "5" => LogLevel::Trace,
            _ => return None,
        };
        Some(level)
    }

    pub fn prefix(&self) -> &'static str {
        match self {
            LogLevel::Off => "",
            LogLevel::Error => "[ERROR]",
            LogLevel::Warn => "[WARN] ",
            LogLevel::Info => "[INFO] ",
            LogLevel::Debug => "[DEBUG]",
            LogLevel::Trace => "[TRACE]",
        }
    }
}

/// Execution context attached to leveled lines
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogContext {
    pub worker: Option<usize>,
    pub fiber: FiberId,
}

/// Destination for diagnostic output
pub trait DiagnosticSink: Send + Sync {
    /// Receive one formatted line, without trailing newline
    fn write_line(&self, level: LogLevel, line: &str);

    /// Raw text from `kprint!`, no newline handling
    fn write_raw(&self, text: &str) {
        self.write_line(LogLevel::Off, text);
    }
}

/// Default sink: locked stderr, flushed when `FIO_FLUSH_EPRINT` is on
pub struct StderrSink;

impl DiagnosticSink for StderrSink {
    fn write_line(&self, _level: LogLevel, line: &str) {
        let stderr = std::io::stderr();
        let mut handle = stderr.lock();
        let _ = handle.write_all(line.as_bytes());
        let _ = handle.write_all(b"\n");
        if flush_enabled() {
            let _ = handle.flush();
        }
    }

    fn write_raw(&self, text: &str) {
        let stderr = std::io::stderr();
        let mut handle = stderr.lock();
        let _ = handle.write_all(text.as_bytes());
        if flush_enabled() {
            let _ = handle.flush();
        }
    }
}

// Global configuration (initialized once)
static FLUSH_ENABLED: AtomicBool = AtomicBool::new(false);
static LOG_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);
static INITIALIZED: AtomicBool = AtomicBool::new(false);

static SINK: RwLock<Option<Arc<dyn DiagnosticSink>>> = RwLock::new(None);
static CONTEXT_FN: OnceLock<fn() -> LogContext> = OnceLock::new();

/// Initialize logging from environment variables
///
/// Called automatically on first log, but can be called explicitly for
/// deterministic initialization.
pub fn init() {
    if INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }

    if let Ok(val) = std::env::var("FIO_FLUSH_EPRINT") {
        let flush = matches!(val.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on");
        FLUSH_ENABLED.store(flush, Ordering::Relaxed);
    }

    if let Ok(val) = std::env::var("FIO_LOG_LEVEL") {
        let level = LogLevel::parse(&val).unwrap_or(LogLevel::Info);
        LOG_LEVEL.store(level as u8, Ordering::Relaxed);
    }
}

/// Check if flush is enabled
#[inline]
pub fn flush_enabled() -> bool {
    if !INITIALIZED.load(Ordering::Relaxed) {
        init();
    }
    FLUSH_ENABLED.load(Ordering::Relaxed)
}

/// Get current log level
#[inline]
pub fn log_level() -> LogLevel {
    if !INITIALIZED.load(Ordering::Relaxed) {
        init();
    }
    LogLevel::from_u8(LOG_LEVEL.load(Ordering::Relaxed))
}

/// Set log level programmatically
pub fn set_log_level(level: LogLevel) {
    // Env must not override an explicit choice later
    INITIALIZED.store(true, Ordering::SeqCst);
    LOG_LEVEL.store(level as u8, Ordering::Relaxed);
}

/// Set flush mode programmatically
pub fn set_flush_enabled(enabled: bool) {
    FLUSH_ENABLED.store(enabled, Ordering::Relaxed);
}

/// Check if a log level is enabled
#[inline]
pub fn level_enabled(level: LogLevel) -> bool {
    level != LogLevel::Off && level as u8 <= log_level() as u8
}

/// Install a sink; returns the previous one
pub fn set_sink(sink: Arc<dyn DiagnosticSink>) -> Option<Arc<dyn DiagnosticSink>> {
    SINK.write().replace(sink)
}

/// Restore the default stderr sink
pub fn reset_sink() -> Option<Arc<dyn DiagnosticSink>> {
    SINK.write().take()
}

/// Register the function that reports the current worker and fiber
///
/// Only the first registration wins.
pub fn set_context_provider(f: fn() -> LogContext) {
    let _ = CONTEXT_FN.set(f);
}

fn current_context() -> LogContext {
    CONTEXT_FN.get().map(|f| f()).unwrap_or_default()
}

fn emit_line(level: LogLevel, line: &str) {
    let sink = SINK.read().clone();
    match sink {
        Some(s) => s.write_line(level, line),
        None => StderrSink.write_line(level, line),
    }
}

#[doc(hidden)]
pub fn _kprint_impl(args: std::fmt::Arguments<'_>) {
    let text = args.to_string();
    let sink = SINK.read().clone();
    match sink {
        Some(s) => s.write_raw(&text),
        None => StderrSink.write_raw(&text),
    }
}

#[doc(hidden)]
pub fn _kprintln_impl(args: std::fmt::Arguments<'_>) {
    emit_line(LogLevel::Off, &args.to_string());
}

/// Leveled print with context prefix
#[doc(hidden)]
pub fn _klog_impl(level: LogLevel, args: std::fmt::Arguments<'_>) {
    if !level_enabled(level) {
        return;
    }
    let ctx = current_context();
    let mut line = String::with_capacity(96);
    let _ = write!(line, "{} ", level.prefix());
    match ctx.worker {
        Some(w) => {
            let _ = write!(line, "[w{} f{}] ", w, ctx.fiber);
        }
        None if ctx.fiber.is_some() => {
            let _ = write!(line, "[f{}] ", ctx.fiber);
        }
        None => {}
    }
    let _ = line.write_fmt(args);
    emit_line(level, &line);
}

// ============================================================================
// Public Macros
// ============================================================================

/// Print to the diagnostic sink (no newline)
#[macro_export]
macro_rules! kprint {
    ($($arg:tt)*) => {{
        $crate::kprint::_kprint_impl(format_args!($($arg)*));
    }};
}

/// Print to the diagnostic sink with newline, regardless of level
#[macro_export]
macro_rules! kprintln {
    () => {{
        $crate::kprint::_kprintln_impl(format_args!(""));
    }};
    ($($arg:tt)*) => {{
        $crate::kprint::_kprintln_impl(format_args!($($arg)*));
    }};
}

/// Error level log (always shown unless logging is off)
#[macro_export]
macro_rules! kerror {
    ($($arg:tt)*) => {{
        $crate::kprint::_klog_impl(
            $crate::kprint::LogLevel::Error,
            format_args!($($arg)*)
        );
    }};
}

#[macro_export]
macro_rules! kwarn {
    ($($arg:tt)*) => {{
        $crate::kprint::_klog_impl(
            $crate::kprint::LogLevel::Warn,
            format_args!($($arg)*)
        );
    }};
}

#[macro_export]
macro_rules! kinfo {
    ($($arg:tt)*) => {{
        $crate::kprint::_klog_impl(
            $crate::kprint::LogLevel::Info,
            format_args!($($arg)*)
        );
    }};
}

#[macro_export]
macro_rules! kdebug {
    ($($arg:tt)*) => {{
        $crate::kprint::_klog_impl(
            $crate::kprint::LogLevel::Debug,
            format_args!($($arg)*)
        );
    }};
}

/// Trace level log (most verbose)
#[macro_export]
macro_rules! ktrace {
    ($($arg:tt)*) => {{
        $crate::kprint::_klog_impl(
            $crate::kprint::LogLevel::Trace,
            format_args!($($arg)*)
        );
    }};
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_levels() {
        assert!(LogLevel::Error < LogLevel::Warn);
        assert!(LogLevel::Warn < LogLevel::Info);
        assert!(LogLevel::Info < LogLevel::Debug);
        assert!(LogLevel::Debug < LogLevel::Trace);
    }

    #[test]
    fn test_level_parse() {
        assert_eq!(LogLevel::parse("DEBUG"), Some(LogLevel::Debug));
        assert_eq!(LogLevel::parse("0"), Some(LogLevel::Off));
        assert_eq!(LogLevel::parse("loud"), None);
        assert_eq!(LogLevel::from_u8(99), LogLevel::Trace);
    }

    #[test]
    fn test_sink_receives_lines() {
        struct Capture(parking_lot::Mutex<Vec<String>>);
        impl DiagnosticSink for Capture {
            fn write_line(&self, _level: LogLevel, line: &str) {
                self.0.lock().push(line.to_string());
            }
        }

        let cap = Arc::new(Capture(parking_lot::Mutex::new(Vec::new())));
        set_sink(cap.clone());
        kprintln!("plain {}", 1);
        reset_sink();

        let lines = cap.0.lock();
        assert!(lines.iter().any(|l| l == "plain 1"));
    }

    #[test]
    fn test_macros_compile() {
        kprint!("");
        ktrace!("trace {}", 1);
        kdebug!("debug");
    }
}
