//! Environment variable helpers
//!
//! Shared by `kprint` and the runtime's `SchedulerConfig::from_env`.

use std::str::FromStr;

/// Get environment variable parsed as `T`, or `default` if unset or unparsable
#[inline]
pub fn env_get<T: FromStr>(key: &str, default: T) -> T {
    env_get_opt(key).unwrap_or(default)
}

/// Get environment variable parsed as `T`, `None` if unset or unparsable
#[inline]
pub fn env_get_opt<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Read a boolean flag
///
/// `None` when unset. "1", "true", "yes" and "on" (any case) are true;
/// any other value is false.
#[inline]
pub fn env_flag(key: &str) -> Option<bool> {
    std::env::var(key).ok().map(|v| {
        matches!(
            v.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}

/// Read a variable through a custom parser, `None` if unset or rejected
pub fn env_get_with<T>(key: &str, parse: impl FnOnce(&str) -> Option<T>) -> Option<T> {
    std::env::var(key).ok().and_then(|v| parse(v.trim()))
}
