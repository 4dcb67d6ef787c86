//! Scheduler configuration
//!
//! Library defaults with runtime environment overrides.
//!
//! # Example
//!
//! ```rust,ignore
//! use weft_runtime::config::{SchedulerConfig, StallPolicy};
//!
//! // Defaults plus WEFT_* overrides
//! let config = SchedulerConfig::from_env();
//!
//! // Or fully programmatic
//! let config = SchedulerConfig::new()
//!     .max_tasks(1024)
//!     .stall_policy(StallPolicy::Block);
//! ```

use core::fmt;

use nix::errno::Errno;
use weft_core::constants::DEFAULT_MAX_TASKS;
use weft_core::env::{env_flag, env_get, env_get_with};

/// Which send/recv errors count as the peer going away
///
/// A disconnect ends the task gracefully with no value instead of raising.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DisconnectPolicy {
    /// Only EPIPE
    #[default]
    BrokenPipe,
    /// EPIPE and ECONNRESET
    BrokenPipeOrReset,
}

impl DisconnectPolicy {
    /// Parse `pipe` or `pipe+reset`
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pipe" => Some(DisconnectPolicy::BrokenPipe),
            "pipe+reset" | "reset" => Some(DisconnectPolicy::BrokenPipeOrReset),
            _ => None,
        }
    }

    pub(crate) fn covers(self, errno: Errno) -> bool {
        match self {
            DisconnectPolicy::BrokenPipe => errno == Errno::EPIPE,
            DisconnectPolicy::BrokenPipeOrReset => {
                matches!(errno, Errno::EPIPE | Errno::ECONNRESET)
            }
        }
    }
}

/// What to do when tasks remain but nothing can wake them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StallPolicy {
    /// End the run with `TaskError::Deadlock`
    #[default]
    Fail,
    /// Wait on the empty descriptor set forever
    Block,
}

impl StallPolicy {
    /// Parse `fail` or `block`
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "fail" => Some(StallPolicy::Fail),
            "block" => Some(StallPolicy::Block),
            _ => None,
        }
    }
}

/// Scheduler configuration with builder pattern
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Cap on live tasks
    pub max_tasks: usize,
    /// Errors treated as graceful peer disconnect
    pub disconnect_policy: DisconnectPolicy,
    /// Behaviour when the run can never progress
    pub stall_policy: StallPolicy,
    /// Raise the log level to debug when the run starts
    pub debug_logging: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulerConfig {
    /// Library defaults, no environment lookup
    pub fn new() -> Self {
        Self {
            max_tasks: DEFAULT_MAX_TASKS,
            disconnect_policy: DisconnectPolicy::default(),
            stall_policy: StallPolicy::default(),
            debug_logging: false,
        }
    }

    /// Library defaults with environment overrides
    ///
    /// Environment variables (all optional):
    /// - `WEFT_MAX_TASKS` - Cap on live tasks
    /// - `WEFT_DISCONNECT_POLICY` - `pipe` or `pipe+reset`
    /// - `WEFT_STALL_POLICY` - `fail` or `block`
    /// - `WEFT_DEBUG` - Enable debug logging (0/1)
    ///
    /// Unparsable values fall back to the default.
    pub fn from_env() -> Self {
        let defaults = Self::new();
        Self {
            max_tasks: env_get("WEFT_MAX_TASKS", defaults.max_tasks),
            disconnect_policy: env_get_with("WEFT_DISCONNECT_POLICY", DisconnectPolicy::parse)
                .unwrap_or(defaults.disconnect_policy),
            stall_policy: env_get_with("WEFT_STALL_POLICY", StallPolicy::parse)
                .unwrap_or(defaults.stall_policy),
            debug_logging: env_flag("WEFT_DEBUG").unwrap_or(defaults.debug_logging),
        }
    }

    // Builder methods

    pub fn max_tasks(mut self, n: usize) -> Self {
        self.max_tasks = n;
        self
    }

    pub fn disconnect_policy(mut self, policy: DisconnectPolicy) -> Self {
        self.disconnect_policy = policy;
        self
    }

    pub fn stall_policy(mut self, policy: StallPolicy) -> Self {
        self.stall_policy = policy;
        self
    }

    pub fn debug_logging(mut self, enable: bool) -> Self {
        self.debug_logging = enable;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_tasks == 0 {
            return Err(ConfigError::InvalidValue("max_tasks must be > 0"));
        }
        Ok(())
    }
}

/// Configuration error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    InvalidValue(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidValue(msg) => write!(f, "Invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}
