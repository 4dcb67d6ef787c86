//! printk-style logging to stderr
//!
//! A global level filters the leveled macros (`kerror!` .. `ktrace!`);
//! `kprint!`/`kprintln!` always write. Each call holds the stderr lock for
//! the whole line, so output from test threads never interleaves mid-line.
//!
//! # Environment Variables
//!
//! Read once, on the first log call or on an explicit `init()`:
//!
//! - `WEFT_LOG_LEVEL=<level>` - off|error|warn|info|debug|trace, or 0-5 (default warn)
//! - `WEFT_FLUSH_EPRINT=1` - Flush stderr after each write
//! - `WEFT_LOG_TIME=1` - Prefix leveled lines with seconds since the first log
//!
//! ```ignore
//! use weft_core::{kdebug, kerror};
//!
//! kdebug!("spawned {}", id);
//! kerror!("task {} failed: {}", id, err);
//! ```

use std::fmt::Arguments;
use std::io::{StderrLock, Write};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::OnceLock;
use std::time::Instant;

use crate::env::{env_flag, env_get_with};

/// Severity, `Off` lowest; a line is shown when its level is at or below the
/// global one
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

const LEVELS: [(LogLevel, &str, &str); 6] = [
    (LogLevel::Off, "off", ""),
    (LogLevel::Error, "error", "[ERROR]"),
    (LogLevel::Warn, "warn", "[WARN] "),
    (LogLevel::Info, "info", "[INFO] "),
    (LogLevel::Debug, "debug", "[DEBUG]"),
    (LogLevel::Trace, "trace", "[TRACE]"),
];

impl LogLevel {
    /// Saturates at `Trace`
    pub fn from_u8(v: u8) -> Self {
        LEVELS[usize::from(v).min(LEVELS.len() - 1)].0
    }

    /// Level name (any case) or its digit
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if let Ok(n) = s.parse::<u8>() {
            return (usize::from(n) < LEVELS.len()).then(|| Self::from_u8(n));
        }
        LEVELS
            .iter()
            .find(|(_, name, _)| name.eq_ignore_ascii_case(s))
            .map(|(level, _, _)| *level)
    }

    pub fn prefix(&self) -> &'static str {
        LEVELS[*self as usize].2
    }
}

struct Settings {
    level: AtomicU8,
    flush: AtomicBool,
    time: AtomicBool,
    loaded: AtomicBool,
}

static SETTINGS: Settings = Settings {
    level: AtomicU8::new(LogLevel::Warn as u8),
    flush: AtomicBool::new(false),
    time: AtomicBool::new(false),
    loaded: AtomicBool::new(false),
};

static EPOCH: OnceLock<Instant> = OnceLock::new();

/// Load `WEFT_*` logging variables; later calls do nothing
///
/// Only variables that are present override earlier `set_*` calls.
pub fn init() {
    if SETTINGS.loaded.swap(true, Ordering::SeqCst) {
        return;
    }
    EPOCH.get_or_init(Instant::now);

    if let Some(level) = env_get_with("WEFT_LOG_LEVEL", LogLevel::parse) {
        SETTINGS.level.store(level as u8, Ordering::Relaxed);
    }
    if let Some(on) = env_flag("WEFT_FLUSH_EPRINT") {
        SETTINGS.flush.store(on, Ordering::Relaxed);
    }
    if let Some(on) = env_flag("WEFT_LOG_TIME") {
        SETTINGS.time.store(on, Ordering::Relaxed);
    }
}

#[inline]
fn settings() -> &'static Settings {
    if !SETTINGS.loaded.load(Ordering::Relaxed) {
        init();
    }
    &SETTINGS
}

#[inline]
pub fn log_level() -> LogLevel {
    LogLevel::from_u8(settings().level.load(Ordering::Relaxed))
}

pub fn set_log_level(level: LogLevel) {
    settings().level.store(level as u8, Ordering::Relaxed);
}

#[inline]
pub fn flush_enabled() -> bool {
    settings().flush.load(Ordering::Relaxed)
}

pub fn set_flush_enabled(enabled: bool) {
    settings().flush.store(enabled, Ordering::Relaxed);
}

/// Whether leveled lines carry the elapsed-seconds prefix
#[inline]
pub fn time_enabled() -> bool {
    settings().time.load(Ordering::Relaxed)
}

pub fn set_time_enabled(enabled: bool) {
    settings().time.store(enabled, Ordering::Relaxed);
}

#[inline]
pub fn level_enabled(level: LogLevel) -> bool {
    level != LogLevel::Off && level <= log_level()
}

fn emit(args: Arguments<'_>, header: impl FnOnce(&mut StderrLock<'_>), newline: bool) {
    let mut out = std::io::stderr().lock();
    header(&mut out);
    let _ = out.write_fmt(args);
    if newline {
        let _ = out.write_all(b"\n");
    }
    if flush_enabled() {
        let _ = out.flush();
    }
}

#[doc(hidden)]
pub fn _kprint_impl(args: Arguments<'_>, newline: bool) {
    emit(args, |_| {}, newline);
}

#[doc(hidden)]
pub fn _klog_impl(level: LogLevel, args: Arguments<'_>) {
    if !level_enabled(level) {
        return;
    }
    let stamp = time_enabled();
    emit(
        args,
        |out| {
            if stamp {
                let secs = EPOCH.get_or_init(Instant::now).elapsed().as_secs_f64();
                let _ = write!(out, "[{:>9.6}] ", secs);
            }
            let _ = write!(out, "{} ", level.prefix());
        },
        true,
    );
}

/// Write to stderr, no newline, regardless of level
#[macro_export]
macro_rules! kprint {
    ($($arg:tt)*) => {
        $crate::kprint::_kprint_impl(format_args!($($arg)*), false)
    };
}

/// Write a line to stderr regardless of level
#[macro_export]
macro_rules! kprintln {
    () => {
        $crate::kprint::_kprint_impl(format_args!(""), true)
    };
    ($($arg:tt)*) => {
        $crate::kprint::_kprint_impl(format_args!($($arg)*), true)
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __klog {
    ($level:ident, $($arg:tt)*) => {
        $crate::kprint::_klog_impl($crate::kprint::LogLevel::$level, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! kerror {
    ($($arg:tt)*) => { $crate::__klog!(Error, $($arg)*) };
}

#[macro_export]
macro_rules! kwarn {
    ($($arg:tt)*) => { $crate::__klog!(Warn, $($arg)*) };
}

#[macro_export]
macro_rules! kinfo {
    ($($arg:tt)*) => { $crate::__klog!(Info, $($arg)*) };
}

#[macro_export]
macro_rules! kdebug {
    ($($arg:tt)*) => { $crate::__klog!(Debug, $($arg)*) };
}

/// Per-event detail; very noisy
#[macro_export]
macro_rules! ktrace {
    ($($arg:tt)*) => { $crate::__klog!(Trace, $($arg)*) };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levels_order_by_verbosity() {
        assert!(LogLevel::Off < LogLevel::Error);
        assert!(LogLevel::Warn < LogLevel::Info);
        assert!(LogLevel::Debug < LogLevel::Trace);
        assert_eq!(LogLevel::from_u8(3), LogLevel::Info);
        assert_eq!(LogLevel::from_u8(200), LogLevel::Trace);
    }

    #[test]
    fn test_level_parse() {
        assert_eq!(LogLevel::parse("DEBUG"), Some(LogLevel::Debug));
        assert_eq!(LogLevel::parse(" 2 "), Some(LogLevel::Warn));
        assert_eq!(LogLevel::parse("off"), Some(LogLevel::Off));
        assert_eq!(LogLevel::parse("9"), None);
        assert_eq!(LogLevel::parse("loud"), None);
    }

    #[test]
    fn test_prefixes_line_up() {
        assert_eq!(LogLevel::Warn.prefix().len(), LogLevel::Error.prefix().len());
        assert_eq!(LogLevel::Off.prefix(), "");
    }

    #[test]
    fn test_macros_expand() {
        set_log_level(LogLevel::Off);
        assert!(!level_enabled(LogLevel::Error));

        kprint!("");
        kerror!("error {}", "msg");
        kwarn!("warn");
        kinfo!("info");
        kdebug!("debug {}", 1);
        ktrace!("trace");
    }
}
