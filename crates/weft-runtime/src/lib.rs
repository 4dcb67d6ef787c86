//! # weft-runtime
//!
//! Single-threaded runtime for the weft cooperative scheduler.
//!
//! This crate provides:
//! - The event taxonomy tasks hand to the scheduler
//! - The task wrapper that drives an `async` body one event at a time
//! - The scheduler core (drain, block, complete, route errors)
//! - A poll(2) readiness wait and a sleep deadline heap
//! - Non-blocking IPv4 TCP listener and connection wrappers

pub mod config;
pub mod event;
pub mod net;
pub mod scheduler;
pub mod task;
pub mod timer;
pub mod tls;

mod poller;
mod sys;

// Re-exports
pub use config::{ConfigError, DisconnectPolicy, SchedulerConfig, StallPolicy};
pub use event::{Completion, Event, Interest, Sleep};
pub use net::{Connection, Listener};
pub use scheduler::{RunStats, Scheduler};
pub use task::Task;

// Platform detection
cfg_if::cfg_if! {
    if #[cfg(unix)] {
        /// Raw descriptor type used by events and sockets
        pub type RawFd = std::os::fd::RawFd;
    } else {
        compile_error!("weft requires a Unix platform with poll(2)");
    }
}
