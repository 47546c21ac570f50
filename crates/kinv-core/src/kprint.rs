//! Kernel-style leveled logging
//!
//! Every line goes to stderr under the stderr lock, prefixed with the
//! level and an optional component tag:
//!
//! ```text
//! [DEBUG] kmem: alloc 0x200000+0x200000
//! ```
//!
//! # Environment Variables
//!
//! - `KINV_LOG_LEVEL=<level>` - off|error|warn|info|debug|trace or 0..5 (default: warn)
//! - `KINV_FLUSH_EPRINT=1` - flush stderr after each line
//!
//! # Usage
//!
//! ```ignore
//! use kinv_core::{kdebug, kwarn};
//!
//! kdebug!(target: "kmem", "alloc {:#x}+{:#x}", addr, len);
//! kwarn!("dispatch failed: {}", err);
//! ```

use std::io::Write;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

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

impl FromStr for LogLevel {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" | "0" => Ok(LogLevel::Off),
            "error" | "1" => Ok(LogLevel::Error),
            "warn" | "2" => Ok(LogLevel::Warn),
            "info" | "3" => Ok(LogLevel::Info),
            "debug" | "4" => Ok(LogLevel::Debug),
            "trace" | "5" => Ok(LogLevel::Trace),
            _ => Err(()),
        }
    }
}

static FLUSH_ENABLED: AtomicBool = AtomicBool::new(false);
static LOG_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Warn as u8);
static INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Read the logging environment once
///
/// Runs implicitly on the first log line. A level set through
/// [`set_log_level`] before that point is kept unless the environment
/// overrides it.
pub fn init() {
    if INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }

    if let Ok(val) = std::env::var("KINV_FLUSH_EPRINT") {
        let flush = matches!(val.as_str(), "1" | "true" | "yes" | "on");
        FLUSH_ENABLED.store(flush, Ordering::Relaxed);
    }

    if let Some(level) = std::env::var("KINV_LOG_LEVEL").ok().and_then(|v| v.parse::<LogLevel>().ok()) {
        LOG_LEVEL.store(level as u8, Ordering::Relaxed);
    }
}

#[inline]
pub fn log_level() -> LogLevel {
    if !INITIALIZED.load(Ordering::Relaxed) {
        init();
    }
    LogLevel::from_u8(LOG_LEVEL.load(Ordering::Relaxed))
}

pub fn set_log_level(level: LogLevel) {
    init();
    LOG_LEVEL.store(level as u8, Ordering::Relaxed);
}

pub fn set_flush_enabled(enabled: bool) {
    init();
    FLUSH_ENABLED.store(enabled, Ordering::Relaxed);
}

#[inline]
pub fn level_enabled(level: LogLevel) -> bool {
    level != LogLevel::Off && level <= log_level()
}

#[doc(hidden)]
pub fn _klog_impl(level: LogLevel, target: Option<&str>, args: std::fmt::Arguments<'_>) {
    if !level_enabled(level) {
        return;
    }
    let stderr = std::io::stderr();
    let mut handle = stderr.lock();
    let _ = match target {
        Some(t) => write!(handle, "{} {}: ", level.prefix(), t),
        None => write!(handle, "{} ", level.prefix()),
    };
    let _ = handle.write_fmt(args);
    let _ = handle.write_all(b"\n");
    if FLUSH_ENABLED.load(Ordering::Relaxed) {
        let _ = handle.flush();
    }
}

#[doc(hidden)]
#[macro_export]
macro_rules! __klog {
    ($lvl:expr, target: $target:expr, $($arg:tt)+) => {{
        $crate::kprint::_klog_impl($lvl, Some($target), format_args!($($arg)+));
    }};
    ($lvl:expr, $($arg:tt)+) => {{
        $crate::kprint::_klog_impl($lvl, None, format_args!($($arg)+));
    }};
}

/// Error level log
#[macro_export]
macro_rules! kerror {
    ($($arg:tt)+) => { $crate::__klog!($crate::kprint::LogLevel::Error, $($arg)+) };
}

/// Warning level log
#[macro_export]
macro_rules! kwarn {
    ($($arg:tt)+) => { $crate::__klog!($crate::kprint::LogLevel::Warn, $($arg)+) };
}

/// Info level log
#[macro_export]
macro_rules! kinfo {
    ($($arg:tt)+) => { $crate::__klog!($crate::kprint::LogLevel::Info, $($arg)+) };
}

/// Debug level log
#[macro_export]
macro_rules! kdebug {
    ($($arg:tt)+) => { $crate::__klog!($crate::kprint::LogLevel::Debug, $($arg)+) };
}

/// Trace level log (most verbose)
#[macro_export]
macro_rules! ktrace {
    ($($arg:tt)+) => { $crate::__klog!($crate::kprint::LogLevel::Trace, $($arg)+) };
}
