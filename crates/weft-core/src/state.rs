//! Task scheduling state

use core::fmt;
use crate::id::TaskId;

/// Where a task sits in the scheduler's state machine
///
/// Every live task is in exactly one of these states. `Killed` is only
/// observable between a kill and the end of the run, while the task's body
/// is parked; `Completed` is reported for ids the scheduler no longer holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Holding an event the drain phase can resolve without waiting
    /// (value, error, spawn, delegate, return, join, kill)
    Ready,

    /// Holding an I/O or timer event, included in the next readiness wait
    Waiting,

    /// Suspended until the given delegate finishes
    Delegated(TaskId),

    /// Suspended until the given task completes
    Joining(TaskId),

    /// Currently being resumed
    Running,

    /// Removed by `kill`; never resumed again
    Killed,

    /// Finished (returned, ended or failed) or never scheduled here
    Completed,
}

impl TaskState {
    /// Check if the drain phase would advance this task
    #[inline]
    pub const fn is_runnable(&self) -> bool {
        matches!(self, TaskState::Ready)
    }

    /// Check if this task is parked behind another task
    #[inline]
    pub const fn is_suspended(&self) -> bool {
        matches!(self, TaskState::Delegated(_) | TaskState::Joining(_))
    }

    /// Check if this task will never run again
    #[inline]
    pub const fn is_terminated(&self) -> bool {
        matches!(self, TaskState::Killed | TaskState::Completed)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskState::Ready => write!(f, "ready"),
            TaskState::Waiting => write!(f, "waiting"),
            TaskState::Delegated(child) => write!(f, "delegated to {}", child),
            TaskState::Joining(target) => write!(f, "joining {}", target),
            TaskState::Running => write!(f, "running"),
            TaskState::Killed => write!(f, "killed"),
            TaskState::Completed => write!(f, "completed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_predicates() {
        let other = TaskId::from_raw(7);

        assert!(TaskState::Ready.is_runnable());
        assert!(!TaskState::Waiting.is_runnable());
        assert!(TaskState::Delegated(other).is_suspended());
        assert!(TaskState::Joining(other).is_suspended());
        assert!(!TaskState::Running.is_suspended());
        assert!(TaskState::Killed.is_terminated());
        assert!(TaskState::Completed.is_terminated());
        assert!(!TaskState::Waiting.is_terminated());
    }

    #[test]
    fn test_state_display() {
        let other = TaskId::from_raw(3);
        assert_eq!(TaskState::Delegated(other).to_string(), "delegated to #3");
        assert_eq!(TaskState::Joining(other).to_string(), "joining #3");
    }
}
