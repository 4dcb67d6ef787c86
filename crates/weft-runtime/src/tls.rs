//! Thread-local context of the task being resumed
//!
//! While `Task::resume` polls a body, the frame holds the task's id, the
//! value it is being resumed with (inbox) and the event it suspends on
//! (outbox). Primitives talk to the scheduler only through this frame.

use std::cell::RefCell;

use weft_core::{TaskId, TaskResult, Value};

use crate::event::Event;

struct Frame {
    current: Option<TaskId>,
    inbox: Option<TaskResult<Value>>,
    outbox: Option<Event>,
}

impl Frame {
    const EMPTY: Frame = Frame { current: None, inbox: None, outbox: None };
}

thread_local! {
    static FRAME: RefCell<Frame> = const { RefCell::new(Frame::EMPTY) };
}

/// Restores the enclosing frame on drop
pub(crate) struct FrameGuard {
    saved: Option<Frame>,
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        if let Some(saved) = self.saved.take() {
            // Replaced frame is dropped outside the borrow
            let _finished = FRAME.with(|frame| frame.replace(saved));
        }
    }
}

/// Install a frame for `id`, resuming with `input`
pub(crate) fn enter(id: TaskId, input: TaskResult<Value>) -> FrameGuard {
    let fresh = Frame {
        current: Some(id),
        inbox: Some(input),
        outbox: None,
    };
    let saved = FRAME.with(|frame| frame.replace(fresh));
    FrameGuard { saved: Some(saved) }
}

/// Id of the task being resumed on this thread
#[inline]
pub fn current() -> Option<TaskId> {
    FRAME.with(|frame| frame.borrow().current)
}

/// Check if we're running inside a task
#[inline]
pub fn in_task() -> bool {
    current().is_some()
}

pub(crate) fn take_inbox() -> Option<TaskResult<Value>> {
    FRAME.with(|frame| frame.borrow_mut().inbox.take())
}

/// Hand the scheduler an event, giving it back if there is no running task
/// or an event is already waiting
pub(crate) fn put_outbox(event: Event) -> Result<(), Event> {
    FRAME.with(|frame| {
        let mut frame = frame.borrow_mut();
        if frame.current.is_none() || frame.outbox.is_some() {
            return Err(event);
        }
        frame.outbox = Some(event);
        Ok(())
    })
}

pub(crate) fn take_outbox() -> Option<Event> {
    FRAME.with(|frame| frame.borrow_mut().outbox.take())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_task_outside_frame() {
        assert_eq!(current(), None);
        assert!(put_outbox(Event::Value(Value::none())).is_err());
    }

    #[test]
    fn test_nested_frames_restore() {
        let outer = TaskId::from_raw(100);
        let inner = TaskId::from_raw(101);

        let guard = enter(outer, Ok(Value::new(1u8)));
        assert_eq!(current(), Some(outer));
        {
            let _inner = enter(inner, Ok(Value::none()));
            assert_eq!(current(), Some(inner));
            assert!(put_outbox(Event::Kill(outer)).is_ok());
        }
        assert_eq!(current(), Some(outer));
        assert!(take_outbox().is_none());
        let input = take_inbox().unwrap().unwrap();
        assert_eq!(input.into_typed::<u8>().unwrap(), 1);
        drop(guard);

        assert!(!in_task());
    }

    #[test]
    fn test_outbox_holds_one_event() {
        let _guard = enter(TaskId::from_raw(102), Ok(Value::none()));
        assert!(put_outbox(Event::Value(Value::none())).is_ok());
        assert!(put_outbox(Event::Value(Value::none())).is_err());
        assert!(matches!(take_outbox(), Some(Event::Value(_))));
    }
}
