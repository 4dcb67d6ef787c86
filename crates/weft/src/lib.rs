//! # weft - cooperative tasks over sockets and timers
//!
//! Single-threaded scheduler for network code written as straight-line
//! logic per connection. Tasks are `async` bodies; every suspension point is
//! one of the primitives below, and the scheduler multiplexes all tasks over
//! one poll(2) loop. No OS threads, no host async runtime.
//!
//! ## Quick Start
//!
//! ```ignore
//! use weft::{call, end, run, sleep, spawn, Task};
//! use std::time::Duration;
//!
//! fn main() -> weft::TaskResult<()> {
//!     run(async {
//!         let ticker = spawn(Task::new(async {
//!             sleep(Duration::from_millis(10)).await?;
//!             Ok(())
//!         })).await?;
//!
//!         let answer: u32 = call(Task::new(async { end(42u32).await })).await?;
//!         weft::join(ticker).await?;
//!         assert_eq!(answer, 42);
//!         Ok(())
//!     })
//! }
//! ```
//!
//! ## Echo server
//!
//! ```ignore
//! weft::run(weft::server("", 8080, |conn| async move {
//!     loop {
//!         let line = conn.readline(b"\n", 1024).await?;
//!         if line.is_empty() {
//!             return Ok(());
//!         }
//!         conn.sendall(&line.to_ascii_uppercase()).await?;
//!     }
//! })?)
//! ```
//!
//! ## Failure
//!
//! An error returned from a task body reaches the task that delegated to it
//! (`call` returns it) or, when nobody did, ends `run` with that error after
//! every remaining task has been dropped.

mod server;

use std::future::Future;
use std::time::Duration;

use weft_runtime::task::suspend;

// Re-export core types
pub use weft_core::{Resource, TaskError, TaskId, TaskResult, TaskState, Value};
pub use weft_core::constants;

// Re-export kprint macros for debug logging
pub use weft_core::{kdebug, kerror, kinfo, kprint, kprintln, ktrace, kwarn};
pub use weft_core::kprint::{
    init as init_logging, set_flush_enabled, set_log_level, set_time_enabled, LogLevel,
};

// Re-export runtime types
pub use weft_runtime::{
    Completion, ConfigError, Connection, DisconnectPolicy, Event, Interest, Listener, RawFd,
    RunStats, Scheduler, SchedulerConfig, Sleep, StallPolicy, Task,
};

pub use server::{serve, server};

/// Register `task` to run alongside the caller; returns its id at once
pub async fn spawn(task: Task) -> TaskResult<TaskId> {
    suspend(Event::Spawn(task)).await?.into_typed()
}

/// Run `task` and resume with the value it ends with
///
/// An error escaping `task` (or anything it calls in turn) comes back here,
/// tagged with the id of the task that raised it.
pub async fn call<T: 'static>(task: Task) -> TaskResult<T> {
    suspend(Event::Delegate(task)).await?.into_typed()
}

/// End the current task with `value`
///
/// Never resumes. Lets a body finish from inside nested helpers:
/// `return end(v).await;`
pub async fn end<T: 'static>(value: T) -> TaskResult<Value> {
    suspend(Event::Return(Value::new(value))).await?;
    Err(TaskError::Misuse("task resumed after end"))
}

/// Wait until task `id` completes
///
/// All tasks joining the same id resume together, including when `id` is
/// killed while they wait. Joining a task that has already completed, or
/// was already killed, waits forever.
pub async fn join(id: TaskId) -> TaskResult<()> {
    suspend(Event::Join(id)).await?;
    Ok(())
}

/// Remove task `id` and every task it is delegating to
///
/// Their bodies never run again. The task that delegated to `id` resumes
/// with no value and tasks joining any of them wake. Killing the calling
/// task itself ends it here.
///
/// Killed bodies are kept until the run ends, so their scoped cleanup is
/// deferred to teardown: sockets they own stay open and each kill holds its
/// body's memory for the rest of the run. Long-running servers should let
/// handlers return (for example by closing their connection) rather than
/// kill them.
pub async fn kill(id: TaskId) -> TaskResult<()> {
    suspend(Event::Kill(id)).await?;
    Ok(())
}

/// Suspend the current task for `duration`
pub async fn sleep(duration: Duration) -> TaskResult<()> {
    suspend(Event::Sleep(Sleep::new(duration))).await?;
    Ok(())
}

/// Let every other runnable task advance, then continue
pub async fn yield_now() -> TaskResult<()> {
    suspend(Event::Value(Value::none())).await?;
    Ok(())
}

/// read(2) up to `size` bytes once `fd` is readable
///
/// `fd` must be non-blocking and stay open until this returns.
pub async fn read(fd: RawFd, size: usize) -> TaskResult<Vec<u8>> {
    suspend(Event::Read { fd, size }).await?.into_typed()
}

/// write(2) `data` once `fd` is writable; returns the count written
pub async fn write(fd: RawFd, data: &[u8]) -> TaskResult<usize> {
    suspend(Event::Write { fd, data: data.to_vec() }).await?.into_typed()
}

/// Open a TCP connection to `host:port`
pub async fn connect(host: &str, port: u16) -> TaskResult<Connection> {
    Connection::connect(host, port).await
}

/// Id of the running task, `None` outside a task
#[inline]
pub fn current() -> Option<TaskId> {
    weft_runtime::tls::current()
}

/// Runtime handle holding configuration across runs
#[derive(Debug, Clone)]
pub struct Runtime {
    config: SchedulerConfig,
    last_stats: Option<RunStats>,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::from_env()
    }
}

impl Runtime {
    pub fn new(config: SchedulerConfig) -> Self {
        Self { config, last_stats: None }
    }

    /// Runtime configured from `WEFT_*` environment variables
    pub fn from_env() -> Self {
        Self::new(SchedulerConfig::from_env())
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Drive `root` and everything it starts until they all end
    pub fn run<F, T>(&mut self, root: F) -> TaskResult<()>
    where
        F: Future<Output = TaskResult<T>> + 'static,
        T: 'static,
    {
        self.run_task(Task::new(root).with_name("root"))
    }

    /// Like `run`, for an already built task
    pub fn run_task(&mut self, root: Task) -> TaskResult<()> {
        let mut scheduler = Scheduler::new(self.config.clone());
        let result = scheduler.run(root);
        self.last_stats = Some(scheduler.stats());
        result
    }

    /// Counters from the most recent run
    pub fn stats(&self) -> Option<RunStats> {
        self.last_stats
    }
}

/// Drive `root` with configuration from the environment
pub fn run<F, T>(root: F) -> TaskResult<()>
where
    F: Future<Output = TaskResult<T>> + 'static,
    T: 'static,
{
    Runtime::from_env().run(root)
}
