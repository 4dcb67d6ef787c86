//! # weft-core
//!
//! Core types for the weft cooperative task scheduler.
//!
//! This crate is platform-agnostic and contains no OS-specific code.
//! Sockets, poll(2) and the scheduler loop live in `weft-runtime`.
//!
//! ## Modules
//!
//! - `id` - Task identifier type
//! - `state` - Per-task scheduling state
//! - `value` - Dynamically typed values passed between tasks
//! - `error` - Error types
//! - `env` - Environment variable helpers
//! - `kprint` - Kernel-style debug printing macros

pub mod id;
pub mod state;
pub mod value;
pub mod error;
pub mod env;
pub mod kprint;

// Re-exports for convenience
pub use id::TaskId;
pub use state::TaskState;
pub use value::Value;
pub use error::{Resource, TaskError, TaskResult};

/// Fixed constants shared by the runtime and the facade
pub mod constants {
    /// Backlog passed to listen(2) by `Listener::bind`
    pub const LISTEN_BACKLOG: i32 = 128;

    /// Default chunk size requested per recv by `readline`
    pub const DEFAULT_RECV_SIZE: usize = 1024;

    /// Default cap on live tasks in one scheduler
    pub const DEFAULT_MAX_TASKS: usize = 65536;

    /// Line terminator used when none is given
    pub const DEFAULT_TERMINATOR: &[u8] = b"\n";
}
