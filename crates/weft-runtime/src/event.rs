//! Events: the only channel from a task to the scheduler
//!
//! A task suspends by handing exactly one `Event` to the scheduler. Control
//! events (`Value` through `Kill`) are resolved during the drain phase
//! without waiting. Waitable events name the descriptor and readiness they
//! need (`interest`) or a deadline (`Sleep`), and carry the completion
//! action that performs the actual syscall once the wait reports them ready
//! (`complete`).

use core::fmt;
use std::net::SocketAddrV4;
use std::os::fd::{AsRawFd, OwnedFd};
use std::time::{Duration, Instant};

use nix::errno::Errno;
use weft_core::{TaskError, TaskId, Value};

use crate::config::DisconnectPolicy;
use crate::net::Connection;
use crate::task::Task;
use crate::{sys, RawFd};

/// Readiness a waitable event needs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
    Readable,
    Writable,
}

impl Interest {
    pub(crate) fn poll_events(self) -> libc::c_short {
        match self {
            Interest::Readable => libc::POLLIN,
            Interest::Writable => libc::POLLOUT,
        }
    }
}

/// Sleep request with an absolute deadline fixed at construction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sleep {
    deadline: Instant,
}

impl Sleep {
    pub fn new(duration: Duration) -> Self {
        Self::until(Instant::now() + duration)
    }

    pub fn until(deadline: Instant) -> Self {
        Sleep { deadline }
    }

    #[inline]
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Time left before the deadline, zero once it has passed
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}

/// A request from a task to the scheduler
pub enum Event {
    /// Resume with a value
    Value(Value),
    /// Resume with an error
    Error(TaskError),
    /// Register a new task; resume with its id
    Spawn(Task),
    /// Run a task and resume with the value it ends with
    Delegate(Task),
    /// End the current task with a value
    Return(Value),
    /// Resume once the task completes
    Join(TaskId),
    /// Remove a task and its delegation chain, then resume
    Kill(TaskId),

    /// Resume at a deadline
    Sleep(Sleep),
    /// Accept one connection from a listening socket
    Accept { listener: RawFd },
    /// Receive up to `size` bytes from a connection
    Receive { fd: RawFd, size: usize },
    /// Send `data[sent..]`; with `all`, keep going until everything is sent
    Send {
        fd: RawFd,
        data: Vec<u8>,
        sent: usize,
        all: bool,
    },
    /// Wait for a non-blocking connect to finish
    Connect { socket: OwnedFd, addr: SocketAddrV4 },
    /// read(2) up to `size` bytes from any descriptor
    Read { fd: RawFd, size: usize },
    /// write(2) to any descriptor
    Write { fd: RawFd, data: Vec<u8> },
}

/// Outcome of running a waitable event's completion action
pub enum Completion {
    /// Resume the task with this value
    Done(Value),
    /// Not finished; wait again on this event
    Retry(Event),
    /// Peer went away; end the task with no value
    Disconnected,
    /// The syscall failed
    Failed(TaskError),
}

impl Event {
    /// Short name for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Event::Value(_) => "value",
            Event::Error(_) => "error",
            Event::Spawn(_) => "spawn",
            Event::Delegate(_) => "delegate",
            Event::Return(_) => "return",
            Event::Join(_) => "join",
            Event::Kill(_) => "kill",
            Event::Sleep(_) => "sleep",
            Event::Accept { .. } => "accept",
            Event::Receive { .. } => "receive",
            Event::Send { .. } => "send",
            Event::Connect { .. } => "connect",
            Event::Read { .. } => "read",
            Event::Write { .. } => "write",
        }
    }

    /// Check if the drain phase resolves this event without waiting
    pub fn is_immediate(&self) -> bool {
        matches!(
            self,
            Event::Value(_)
                | Event::Error(_)
                | Event::Spawn(_)
                | Event::Delegate(_)
                | Event::Return(_)
                | Event::Join(_)
                | Event::Kill(_)
        )
    }

    /// Descriptor and readiness this event waits for
    pub fn interest(&self) -> Option<(RawFd, Interest)> {
        match self {
            Event::Accept { listener } => Some((*listener, Interest::Readable)),
            Event::Receive { fd, .. } | Event::Read { fd, .. } => Some((*fd, Interest::Readable)),
            Event::Send { fd, .. } | Event::Write { fd, .. } => Some((*fd, Interest::Writable)),
            Event::Connect { socket, .. } => Some((socket.as_raw_fd(), Interest::Writable)),
            _ => None,
        }
    }

    /// Deadline of a `Sleep` event
    pub fn deadline(&self) -> Option<Instant> {
        match self {
            Event::Sleep(sleep) => Some(sleep.deadline()),
            _ => None,
        }
    }

    /// Run the completion action of a ready waitable event
    ///
    /// Would-block and interrupted calls come back as `Retry` carrying the
    /// same request. Errors the policy covers become `Disconnected`.
    pub fn complete(self, policy: DisconnectPolicy) -> Completion {
        let classify = |errno: Errno, event: Event| -> Completion {
            match errno {
                Errno::EAGAIN | Errno::EINTR => Completion::Retry(event),
                e if policy.covers(e) => Completion::Disconnected,
                e => Completion::Failed(TaskError::Os(e as i32)),
            }
        };

        match self {
            Event::Sleep(_) => Completion::Done(Value::none()),

            Event::Accept { listener } => match sys::accept(listener) {
                Ok((fd, peer)) => Completion::Done(Value::new(Connection::from_fd(fd, peer))),
                Err(Errno::ECONNABORTED) => Completion::Retry(self),
                Err(e) => classify(e, self),
            },

            Event::Receive { fd, size } => match sys::recv(fd, size) {
                Ok(bytes) => Completion::Done(Value::new(bytes)),
                Err(e) => classify(e, self),
            },

            Event::Send { fd, data, sent, all } => match sys::send(fd, &data[sent..]) {
                Ok(n) => {
                    let sent = sent + n;
                    if !all {
                        Completion::Done(Value::new(n))
                    } else if sent < data.len() {
                        Completion::Retry(Event::Send { fd, data, sent, all })
                    } else {
                        Completion::Done(Value::none())
                    }
                }
                Err(e) => classify(e, Event::Send { fd, data, sent, all }),
            },

            Event::Connect { socket, addr } => match sys::take_socket_error(socket.as_raw_fd()) {
                Ok(()) => Completion::Done(Value::new(Connection::from_fd(socket, addr))),
                Err(e) => classify(e, Event::Connect { socket, addr }),
            },

            Event::Read { fd, size } => match sys::read(fd, size) {
                Ok(bytes) => Completion::Done(Value::new(bytes)),
                Err(e) => classify(e, self),
            },

            Event::Write { fd, data } => match sys::write(fd, &data) {
                Ok(n) => Completion::Done(Value::new(n)),
                Err(e) => classify(e, Event::Write { fd, data }),
            },

            _ => Completion::Failed(TaskError::Misuse("event is not waitable")),
        }
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Value(v) | Event::Return(v) => write!(f, "{}({:?})", self.kind(), v),
            Event::Error(e) => write!(f, "error({})", e),
            Event::Spawn(t) | Event::Delegate(t) => write!(f, "{}({:?})", self.kind(), t),
            Event::Join(id) | Event::Kill(id) => write!(f, "{}({})", self.kind(), id),
            Event::Sleep(s) => write!(f, "sleep({:?} left)", s.remaining()),
            Event::Connect { addr, .. } => write!(f, "connect({})", addr),
            Event::Send { fd, data, sent, .. } => {
                write!(f, "send(fd={}, {}/{})", fd, sent, data.len())
            }
            Event::Write { fd, data } => write!(f, "write(fd={}, {})", fd, data.len()),
            Event::Receive { fd, size } | Event::Read { fd, size } => {
                write!(f, "{}(fd={}, {})", self.kind(), fd, size)
            }
            Event::Accept { listener } => write!(f, "accept(fd={})", listener),
        }
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Completion::Done(v) => write!(f, "Done({:?})", v),
            Completion::Retry(e) => write!(f, "Retry({:?})", e),
            Completion::Disconnected => write!(f, "Disconnected"),
            Completion::Failed(e) => write!(f, "Failed({})", e),
        }
    }
}
