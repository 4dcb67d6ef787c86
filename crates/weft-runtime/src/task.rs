//! Task wrapper and the suspension future
//!
//! A `Task` owns a pinned `async` body. `resume` polls it exactly once under
//! a fresh thread-local frame; the body runs until it awaits a primitive,
//! which deposits one `Event` and returns `Pending`. The next `resume`
//! delivers the scheduler's answer to that same primitive.
//!
//! Bodies never register wakers: the scheduler knows when to resume a task
//! from the event it handed over, so polling uses a no-op waker.

use core::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll, RawWaker, RawWakerVTable, Waker};

use weft_core::{TaskError, TaskId, TaskResult, Value};

use crate::event::Event;
use crate::tls;

type Body = Pin<Box<dyn Future<Output = TaskResult<Value>>>>;

/// Resumable unit of work with a stable identity
pub struct Task {
    id: TaskId,
    name: Option<String>,
    body: Body,
    finished: bool,
}

impl Task {
    /// Wrap an `async` body; its `Ok` output becomes the task's end value
    pub fn new<F, T>(body: F) -> Self
    where
        F: Future<Output = TaskResult<T>> + 'static,
        T: 'static,
    {
        Task {
            id: TaskId::next(),
            name: None,
            body: Box::pin(async move { body.await.map(Value::new) }),
            finished: false,
        }
    }

    /// Attach a name for logging
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[inline]
    pub fn id(&self) -> TaskId {
        self.id
    }

    #[inline]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Check if the body has run to completion
    #[inline]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Run the body until its next event
    ///
    /// A body that returns yields `Event::Return`, or its error. A body that
    /// suspends on anything other than a weft primitive is reported as
    /// `TaskError::Stalled`.
    pub fn resume(&mut self, input: TaskResult<Value>) -> TaskResult<Event> {
        if self.finished {
            return Err(TaskError::Misuse("task resumed after it finished"));
        }

        let guard = tls::enter(self.id, input);
        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        let poll = self.body.as_mut().poll(&mut cx);
        let outbox = tls::take_outbox();
        drop(guard);

        match poll {
            Poll::Ready(result) => {
                self.finished = true;
                result.map(Event::Return)
            }
            Poll::Pending => outbox.ok_or(TaskError::Stalled(self.id)),
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "Task({} {:?})", self.id, name),
            None => write!(f, "Task({})", self.id),
        }
    }
}

/// Future that hands one event to the scheduler and yields its answer
pub struct Suspend {
    event: Option<Event>,
}

/// Suspend the current task on `event`
pub fn suspend(event: Event) -> Suspend {
    Suspend { event: Some(event) }
}

impl Future for Suspend {
    type Output = TaskResult<Value>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if let Some(event) = this.event.take() {
            return match tls::put_outbox(event) {
                Ok(()) => Poll::Pending,
                Err(_) if !tls::in_task() => {
                    Poll::Ready(Err(TaskError::Misuse("weft primitive awaited outside a task")))
                }
                Err(_) => Poll::Ready(Err(TaskError::Misuse(
                    "task awaited two primitives in one step",
                ))),
            };
        }
        match tls::take_inbox() {
            Some(input) => Poll::Ready(input),
            None => Poll::Ready(Err(TaskError::Misuse("primitive polled without a resume"))),
        }
    }
}

unsafe fn noop_clone(_: *const ()) -> RawWaker {
    RawWaker::new(std::ptr::null(), &NOOP_VTABLE)
}

unsafe fn noop(_: *const ()) {}

static NOOP_VTABLE: RawWakerVTable = RawWakerVTable::new(noop_clone, noop, noop, noop);

fn noop_waker() -> Waker {
    // SAFETY: every vtable entry ignores the data pointer
    unsafe { Waker::from_raw(RawWaker::new(std::ptr::null(), &NOOP_VTABLE)) }
}
