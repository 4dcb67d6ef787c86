//! Error types for the weft scheduler

use core::fmt;
use crate::id::TaskId;

/// Result type for task bodies and scheduler operations
pub type TaskResult<T> = Result<T, TaskError>;

/// Which kind of handle was already closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Connection,
    Listener,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Connection => write!(f, "connection"),
            Resource::Listener => write!(f, "listener"),
        }
    }
}

/// Errors raised inside tasks or by the scheduler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// Error that escaped a task, tagged with the task that raised it
    Task {
        id: TaskId,
        source: Box<TaskError>,
    },

    /// Operation attempted on a connection or listener after close
    Closed(Resource),

    /// OS error with errno
    Os(i32),

    /// Application failure raised by a task body
    Failed(String),

    /// A value was extracted as the wrong type
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    /// Host is not an IPv4 literal
    InvalidAddress(String),

    /// A primitive was used in a way the scheduler cannot honour
    Misuse(&'static str),

    /// Task suspended without handing the scheduler an event
    Stalled(TaskId),

    /// Task table is full
    TooManyTasks(usize),

    /// Tasks remain but none can ever make progress
    Deadlock {
        blocked: usize,
    },
}

impl TaskError {
    /// Application failure with a message
    pub fn failed(msg: impl Into<String>) -> Self {
        TaskError::Failed(msg.into())
    }

    /// Tag an error with the task it escaped from
    pub fn wrap(id: TaskId, source: TaskError) -> Self {
        TaskError::Task {
            id,
            source: Box::new(source),
        }
    }

    /// The innermost error, with every task tag peeled off
    pub fn root_cause(&self) -> &TaskError {
        let mut current = self;
        while let TaskError::Task { source, .. } = current {
            current = source;
        }
        current
    }

    /// The task that originally raised this error, if it was tagged
    pub fn origin(&self) -> Option<TaskId> {
        let mut origin = None;
        let mut current = self;
        while let TaskError::Task { id, source } = current {
            origin = Some(*id);
            current = source;
        }
        origin
    }

    /// The errno behind an OS error, looking through task tags
    pub fn errno(&self) -> Option<i32> {
        match self.root_cause() {
            TaskError::Os(code) => Some(*code),
            _ => None,
        }
    }

    /// Check if this error reports a closed resource
    pub fn is_closed(&self) -> bool {
        matches!(self.root_cause(), TaskError::Closed(_))
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskError::Task { id, source } => write!(f, "task {} failed: {}", id, source),
            TaskError::Closed(what) => write!(f, "{} closed", what),
            TaskError::Os(code) => write!(f, "OS error: errno {}", code),
            TaskError::Failed(msg) => write!(f, "{}", msg),
            TaskError::TypeMismatch { expected, found } => {
                write!(f, "expected value of type {}, found {}", expected, found)
            }
            TaskError::InvalidAddress(host) => write!(f, "not an IPv4 address: {:?}", host),
            TaskError::Misuse(what) => write!(f, "{}", what),
            TaskError::Stalled(id) => {
                write!(f, "task {} suspended without producing an event", id)
            }
            TaskError::TooManyTasks(max) => write!(f, "task limit of {} reached", max),
            TaskError::Deadlock { blocked } => {
                write!(f, "deadlock: {} task(s) blocked with nothing to wait on", blocked)
            }
        }
    }
}

impl std::error::Error for TaskError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TaskError::Task { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for TaskError {
    fn from(e: std::io::Error) -> Self {
        match e.raw_os_error() {
            Some(code) => TaskError::Os(code),
            None => TaskError::Failed(e.to_string()),
        }
    }
}
