//! Scheduler core
//!
//! Owns every task and drives them until the table is empty or a failure
//! escapes a task with no delegator.
//!
//! # Loop
//!
//! 1. **Drain**: resolve every immediate event (value, error, spawn,
//!    delegate, return, join, kill), resuming the tasks involved, until no
//!    task holds one. Every runnable task advances before any wait.
//! 2. **Block**: one poll(2) over the descriptors of waitable events,
//!    bounded by the earliest sleep deadline.
//! 3. **Complete**: expired sleeps in deadline order, then ready
//!    descriptors, run their completion action and resume their task.
//!
//! # Failure routing
//!
//! An error leaving a task is tagged with the task's id. If the task was
//! delegated to, its delegator resumes with the error. Otherwise the run is
//! torn down: every remaining body is dropped and `run` returns the error.
//!
//! Killed tasks are removed from the table immediately and count as ended
//! without a value for their delegator and current joiners. Their bodies
//! are parked until the run ends, so their scoped cleanup (and any socket
//! they own) lasts until teardown.

use core::fmt;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::mem;
use std::time::Instant;

use weft_core::kprint::{self, LogLevel};
use weft_core::{kdebug, kerror, ktrace, kwarn};
use weft_core::{TaskError, TaskId, TaskResult, TaskState, Value};

use crate::config::{SchedulerConfig, StallPolicy};
use crate::event::{Completion, Event};
use crate::poller::Poller;
use crate::task::Task;
use crate::timer::TimerQueue;

/// Stale timer entries tolerated beyond two per live task before compacting
const TIMER_SLACK: usize = 64;

/// What a task in the table is suspended on
enum Wait {
    /// Holding an event for the scheduler
    Event(Event),
    /// Waiting for a delegate to end
    Delegated(TaskId),
    /// Waiting for a task to complete
    Joining(TaskId),
    /// Event taken; being resumed
    Running,
}

struct Slot {
    task: Task,
    wait: Wait,
}

/// Counters for one run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    /// Tasks entered into the table, root included
    pub spawned: u64,
    /// Tasks that ended with a value (or a peer disconnect)
    pub completed: u64,
    /// Tasks that ended with an error
    pub failed: u64,
    /// Tasks removed by kill
    pub killed: u64,
    /// Calls to `Task::resume`
    pub resumes: u64,
    /// Drain passes that found at least one immediate event
    pub drain_passes: u64,
    /// Readiness waits
    pub polls: u64,
    /// Sleeps that reached their deadline
    pub timers_fired: u64,
}

impl fmt::Display for RunStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "spawned={} completed={} failed={} killed={} resumes={} drains={} polls={} timers={}",
            self.spawned,
            self.completed,
            self.failed,
            self.killed,
            self.resumes,
            self.drain_passes,
            self.polls,
            self.timers_fired
        )
    }
}

/// Single-threaded cooperative scheduler
pub struct Scheduler {
    config: SchedulerConfig,
    tasks: BTreeMap<TaskId, Slot>,
    /// child -> the task waiting for it to end
    delegators: HashMap<TaskId, TaskId>,
    /// target -> tasks joining it, in join order
    joiners: HashMap<TaskId, Vec<TaskId>>,
    timers: TimerQueue,
    poller: Poller,
    wake: VecDeque<(TaskId, TaskResult<Value>)>,
    /// Bodies of killed tasks, dropped when the run ends
    reaped: Vec<Task>,
    stats: RunStats,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        if config.debug_logging && kprint::log_level() < LogLevel::Debug {
            kprint::set_log_level(LogLevel::Debug);
        }
        Scheduler {
            config,
            tasks: BTreeMap::new(),
            delegators: HashMap::new(),
            joiners: HashMap::new(),
            timers: TimerQueue::new(),
            poller: Poller::new(),
            wake: VecDeque::new(),
            reaped: Vec::new(),
            stats: RunStats::default(),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn stats(&self) -> RunStats {
        self.stats
    }

    /// Number of live tasks
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Run `root` and everything it starts to completion
    ///
    /// Returns the first error that escaped a task without a delegator, or
    /// `Deadlock` under `StallPolicy::Fail`. Every task body is dropped
    /// before this returns.
    pub fn run(&mut self, root: Task) -> TaskResult<()> {
        self.config
            .validate()
            .map_err(|e| TaskError::failed(e.to_string()))?;
        self.stats = RunStats::default();
        kdebug!("run starting with {:?}", root);

        let result = self.spawn(root).and_then(|_| {
            while self.step()? {}
            Ok(())
        });

        self.shutdown();
        kdebug!("run finished: {}", self.stats);
        result
    }

    /// Enter a task into the table; it first resumes with no value
    pub fn spawn(&mut self, task: Task) -> TaskResult<TaskId> {
        self.insert(task, Event::Value(Value::none()))
    }

    /// One loop iteration: drain, then wait and complete if tasks remain
    ///
    /// Returns whether tasks remain. After an error, call `shutdown`.
    pub fn step(&mut self) -> TaskResult<bool> {
        self.drain()?;
        if self.tasks.is_empty() {
            return Ok(false);
        }
        self.block()?;
        Ok(!self.tasks.is_empty())
    }

    /// Resolve immediate events until none remain
    pub fn drain(&mut self) -> TaskResult<()> {
        loop {
            let ready: Vec<TaskId> = self
                .tasks
                .iter()
                .filter(|(_, slot)| matches!(&slot.wait, Wait::Event(e) if e.is_immediate()))
                .map(|(id, _)| *id)
                .collect();
            if ready.is_empty() {
                return Ok(());
            }
            self.stats.drain_passes += 1;
            for id in ready {
                self.dispatch(id)?;
            }
        }
    }

    /// Drop every task body, killed ones included, and reset the tables
    pub fn shutdown(&mut self) {
        if !self.tasks.is_empty() {
            kdebug!("tearing down {} task(s)", self.tasks.len());
        }
        self.wake.clear();
        self.tasks.clear();
        self.reaped.clear();
        self.delegators.clear();
        self.joiners.clear();
        self.timers.clear();
        self.poller.clear();
    }

    /// Scheduling state of `id`
    pub fn state_of(&self, id: TaskId) -> TaskState {
        match self.tasks.get(&id).map(|slot| &slot.wait) {
            Some(Wait::Event(e)) if e.is_immediate() => TaskState::Ready,
            Some(Wait::Event(_)) => TaskState::Waiting,
            Some(Wait::Delegated(child)) => TaskState::Delegated(*child),
            Some(Wait::Joining(target)) => TaskState::Joining(*target),
            Some(Wait::Running) => TaskState::Running,
            None if self.reaped.iter().any(|t| t.id() == id) => TaskState::Killed,
            None => TaskState::Completed,
        }
    }

    fn insert(&mut self, task: Task, event: Event) -> TaskResult<TaskId> {
        if self.tasks.len() >= self.config.max_tasks {
            kwarn!("task limit {} reached, rejecting {:?}", self.config.max_tasks, task);
            return Err(TaskError::TooManyTasks(self.config.max_tasks));
        }
        let id = task.id();
        if let Some(deadline) = event.deadline() {
            self.timers.push(deadline, id);
        }
        ktrace!("insert {:?}", task);
        self.tasks.insert(id, Slot { task, wait: Wait::Event(event) });
        self.stats.spawned += 1;
        Ok(id)
    }

    /// Take the event of `id` if it is immediate, marking the task running
    fn take_immediate(&mut self, id: TaskId) -> Option<Event> {
        let slot = self.tasks.get_mut(&id)?;
        if !matches!(&slot.wait, Wait::Event(e) if e.is_immediate()) {
            return None;
        }
        match mem::replace(&mut slot.wait, Wait::Running) {
            Wait::Event(event) => Some(event),
            other => {
                slot.wait = other;
                None
            }
        }
    }

    fn set_wait(&mut self, id: TaskId, wait: Wait) {
        if let Some(slot) = self.tasks.get_mut(&id) {
            slot.wait = wait;
        }
    }

    fn dispatch(&mut self, id: TaskId) -> TaskResult<()> {
        // Killed or finished earlier in this pass
        let Some(event) = self.take_immediate(id) else {
            return Ok(());
        };
        ktrace!("dispatch {} {:?}", id, event);

        match event {
            Event::Value(value) => self.wake.push_back((id, Ok(value))),
            Event::Error(err) => self.wake.push_back((id, Err(err))),

            Event::Spawn(task) => {
                let child = task.id();
                let input = self.spawn(task).map(|_| Value::new(child));
                if input.is_ok() {
                    kdebug!("{} spawned {}", id, child);
                }
                self.wake.push_back((id, input));
            }

            Event::Delegate(task) => {
                let child = task.id();
                match self.spawn(task) {
                    Ok(_) => {
                        self.delegators.insert(child, id);
                        self.set_wait(id, Wait::Delegated(child));
                    }
                    Err(e) => self.wake.push_back((id, Err(e))),
                }
            }

            Event::Return(value) => self.finish(id, value),

            Event::Join(target) => {
                self.joiners.entry(target).or_default().push(id);
                self.set_wait(id, Wait::Joining(target));
            }

            Event::Kill(target) => {
                self.kill(target);
                if self.tasks.contains_key(&id) {
                    self.wake.push_back((id, Ok(Value::none())));
                }
            }

            waitable => self.set_wait(id, Wait::Event(waitable)),
        }

        self.flush()
    }

    /// Resume every task in the wake queue
    fn flush(&mut self) -> TaskResult<()> {
        while let Some((id, input)) = self.wake.pop_front() {
            let Some(slot) = self.tasks.get_mut(&id) else {
                continue;
            };
            slot.wait = Wait::Running;
            self.stats.resumes += 1;

            match slot.task.resume(input) {
                Ok(event) => {
                    if let Some(deadline) = event.deadline() {
                        self.timers.push(deadline, id);
                    }
                    slot.wait = Wait::Event(event);
                }
                Err(err) => self.fail(id, err)?,
            }
        }
        Ok(())
    }

    /// `id` ended with `value`: wake its delegator and joiners
    fn finish(&mut self, id: TaskId, value: Value) {
        if self.tasks.remove(&id).is_none() {
            return;
        }
        self.stats.completed += 1;
        ktrace!("{} completed with {:?}", id, value);

        if let Some(parent) = self.delegators.remove(&id) {
            self.wake.push_back((parent, Ok(value)));
        }
        self.wake_joiners(id);
    }

    /// `id` raised `err`: route it to the delegator or tear the run down
    fn fail(&mut self, id: TaskId, err: TaskError) -> TaskResult<()> {
        let err = TaskError::wrap(id, err);
        self.tasks.remove(&id);
        self.stats.failed += 1;
        self.wake_joiners(id);

        match self.delegators.remove(&id) {
            Some(parent) => {
                kdebug!("{} failed, delivering to {}: {}", id, parent, err.root_cause());
                self.wake.push_back((parent, Err(err)));
                Ok(())
            }
            None => {
                kerror!("task {} failed: {}", id, err.root_cause());
                Err(err)
            }
        }
    }

    fn wake_joiners(&mut self, target: TaskId) {
        let Some(waiters) = self.joiners.remove(&target) else {
            return;
        };
        for waiter in waiters {
            let joining = self
                .tasks
                .get(&waiter)
                .is_some_and(|slot| matches!(slot.wait, Wait::Joining(t) if t == target));
            if joining {
                self.wake.push_back((waiter, Ok(Value::none())));
            }
        }
    }

    /// Remove `target` and every delegate below it
    ///
    /// A killed task counts as completed without a value: whoever delegated
    /// to `target` resumes with none, and tasks already joining any task of
    /// the chain wake. Joins made afterwards never resume.
    fn kill(&mut self, target: TaskId) {
        let mut next = Some(target);
        while let Some(id) = next.take() {
            let Some(slot) = self.tasks.remove(&id) else {
                break;
            };
            if let Wait::Delegated(child) = &slot.wait {
                next = Some(*child);
            }
            if let Some(parent) = self.delegators.remove(&id) {
                if id == target {
                    self.wake.push_back((parent, Ok(Value::none())));
                }
            }
            self.wake_joiners(id);
            self.stats.killed += 1;
            kdebug!("killed {:?}", slot.task);
            self.reaped.push(slot.task);
        }

        if self.timers.len() > 2 * self.tasks.len() + TIMER_SLACK {
            let tasks = &self.tasks;
            self.timers.compact(|id, at| sleeping_until(tasks, id, at));
        }
    }

    fn block(&mut self) -> TaskResult<()> {
        self.poller.clear();
        for (id, slot) in &self.tasks {
            if let Wait::Event(event) = &slot.wait {
                if let Some((fd, interest)) = event.interest() {
                    self.poller.register(*id, fd, interest);
                }
            }
        }

        let tasks = &self.tasks;
        let deadline = self.timers.next_deadline(|id, at| sleeping_until(tasks, id, at));

        if self.poller.is_empty() && deadline.is_none() {
            let blocked = self.tasks.len();
            match self.config.stall_policy {
                StallPolicy::Fail => {
                    kerror!("deadlock: {} task(s) can never be resumed", blocked);
                    return Err(TaskError::Deadlock { blocked });
                }
                StallPolicy::Block => {
                    kwarn!("{} task(s) blocked with nothing to wait on", blocked);
                }
            }
        }

        let timeout = deadline.map(|at| at.saturating_duration_since(Instant::now()));
        ktrace!("poll {} fd(s), timeout {:?}", self.poller.len(), timeout);
        self.stats.polls += 1;
        self.poller
            .wait(timeout)
            .map_err(|errno| TaskError::Os(errno as i32))?;

        let tasks = &self.tasks;
        let expired = self
            .timers
            .pop_expired(Instant::now(), |id, at| sleeping_until(tasks, id, at));
        let ready: Vec<TaskId> = self.poller.ready().collect();

        for id in expired {
            self.stats.timers_fired += 1;
            self.complete(id)?;
        }
        for id in ready {
            self.complete(id)?;
        }
        Ok(())
    }

    /// Run the completion action of the waitable event `id` holds
    fn complete(&mut self, id: TaskId) -> TaskResult<()> {
        let Some(slot) = self.tasks.get_mut(&id) else {
            return Ok(());
        };
        let event = match mem::replace(&mut slot.wait, Wait::Running) {
            Wait::Event(event) if !event.is_immediate() => event,
            other => {
                slot.wait = other;
                return Ok(());
            }
        };

        match event.complete(self.config.disconnect_policy) {
            Completion::Done(value) => self.wake.push_back((id, Ok(value))),
            Completion::Retry(event) => slot.wait = Wait::Event(event),
            Completion::Disconnected => {
                kdebug!("{} peer disconnected", id);
                self.finish(id, Value::none());
            }
            Completion::Failed(err) => self.fail(id, err)?,
        }
        self.flush()
    }
}

fn sleeping_until(tasks: &BTreeMap<TaskId, Slot>, id: TaskId, at: Instant) -> bool {
    matches!(
        tasks.get(&id).map(|slot| &slot.wait),
        Some(Wait::Event(Event::Sleep(sleep))) if sleep.deadline() == at
    )
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("tasks", &self.tasks.len())
            .field("killed", &self.reaped.len())
            .field("stats", &self.stats)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Sleep;
    use crate::task::suspend;
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::time::Duration;

    fn scheduler() -> Scheduler {
        Scheduler::new(SchedulerConfig::new())
    }

    #[test]
    fn test_empty_root_completes() {
        let mut sched = scheduler();
        sched.run(Task::new(async { Ok(()) })).unwrap();
        let stats = sched.stats();
        assert_eq!(stats.spawned, 1);
        assert_eq!(stats.completed, 1);
        assert!(sched.is_empty());
    }

    #[test]
    fn test_delegate_returns_value() {
        let mut sched = scheduler();
        let got = Rc::new(RefCell::new(None));
        let got2 = Rc::clone(&got);

        let root = Task::new(async move {
            let child = Task::new(async { Ok(20u32 + 1) });
            let v = suspend(Event::Delegate(child)).await?;
            *got2.borrow_mut() = Some(v.into_typed::<u32>()?);
            Ok(())
        });
        sched.run(root).unwrap();
        assert_eq!(*got.borrow(), Some(21));
    }

    #[test]
    fn test_states_while_delegated() {
        let mut sched = scheduler();
        let child = Task::new(async {
            suspend(Event::Sleep(Sleep::new(Duration::from_secs(3600)))).await?;
            Ok(())
        });
        let child_id = child.id();
        let root = Task::new(async move {
            suspend(Event::Delegate(child)).await?;
            Ok(())
        });
        let root_id = sched.spawn(root).unwrap();
        assert_eq!(sched.state_of(root_id), TaskState::Ready);

        sched.drain().unwrap();
        assert_eq!(sched.state_of(root_id), TaskState::Delegated(child_id));
        assert_eq!(sched.state_of(child_id), TaskState::Waiting);

        sched.kill(root_id);
        assert_eq!(sched.state_of(root_id), TaskState::Killed);
        assert_eq!(sched.state_of(child_id), TaskState::Killed);
        assert!(sched.is_empty());

        sched.shutdown();
        assert_eq!(sched.state_of(root_id), TaskState::Completed);
    }

    #[test]
    fn test_kill_wakes_delegator_and_joiners() {
        let mut sched = scheduler();
        let sleeper = || {
            Task::new(async {
                suspend(Event::Sleep(Sleep::new(Duration::from_secs(3600)))).await?;
                Ok(())
            })
        };
        let child = sleeper();
        let child_id = child.id();
        let parent_id = sched
            .spawn(Task::new(async move {
                suspend(Event::Delegate(child)).await?;
                Ok(())
            }))
            .unwrap();
        let joiner_id = sched
            .spawn(Task::new(async move {
                suspend(Event::Join(child_id)).await?;
                Ok(())
            }))
            .unwrap();

        sched.drain().unwrap();
        assert_eq!(sched.state_of(parent_id), TaskState::Delegated(child_id));
        assert_eq!(sched.state_of(joiner_id), TaskState::Joining(child_id));

        sched.kill(child_id);
        sched.flush().unwrap();
        sched.drain().unwrap();
        assert_eq!(sched.state_of(child_id), TaskState::Killed);
        assert_eq!(sched.state_of(parent_id), TaskState::Completed);
        assert_eq!(sched.state_of(joiner_id), TaskState::Completed);
        assert!(sched.is_empty());
    }

    #[test]
    fn test_kill_compacts_stale_timers() {
        let mut sched = scheduler();
        let ids: Vec<TaskId> = (0..200)
            .map(|_| {
                let task = Task::new(async {
                    suspend(Event::Sleep(Sleep::new(Duration::from_secs(3600)))).await?;
                    Ok(())
                });
                sched.spawn(task).unwrap()
            })
            .collect();
        sched.drain().unwrap();
        assert_eq!(sched.timers.len(), 200);

        for id in ids {
            sched.kill(id);
        }
        assert!(sched.timers.len() <= TIMER_SLACK + 1, "{} stale", sched.timers.len());
        sched.shutdown();
    }

    #[test]
    fn test_root_error_is_tagged() {
        let mut sched = scheduler();
        let root = Task::new(async { Err::<(), _>(TaskError::failed("nope")) });
        let root_id = root.id();

        let err = sched.run(root).unwrap_err();
        assert_eq!(err.origin(), Some(root_id));
        assert_eq!(err.root_cause(), &TaskError::failed("nope"));
        assert_eq!(sched.stats().failed, 1);
    }

    #[test]
    fn test_task_limit_reported_to_caller() {
        let mut sched = Scheduler::new(SchedulerConfig::new().max_tasks(2));
        let outcome = Rc::new(RefCell::new(Vec::new()));
        let outcome2 = Rc::clone(&outcome);

        let root = Task::new(async move {
            for _ in 0..2 {
                let child = Task::new(async { Ok(()) });
                let r = suspend(Event::Spawn(child)).await;
                outcome2.borrow_mut().push(r.map(|_| ()));
            }
            Ok(())
        });
        sched.run(root).unwrap();

        let outcome = outcome.borrow();
        assert!(outcome[0].is_ok());
        // First child has not run yet when the second spawn is dispatched
        assert_eq!(outcome[1], Err(TaskError::TooManyTasks(2)));
    }

    #[test]
    fn test_stall_policy_fail_reports_deadlock() {
        let mut sched = scheduler();
        let root = Task::new(async {
            let me = crate::tls::current().ok_or(TaskError::Misuse("no task"))?;
            suspend(Event::Join(me)).await?;
            Ok(())
        });
        assert_eq!(sched.run(root).unwrap_err(), TaskError::Deadlock { blocked: 1 });
        assert!(sched.is_empty());
    }

    #[test]
    fn test_sleep_fires_once_deadline_passes() {
        let mut sched = scheduler();
        let start = Instant::now();
        let root = Task::new(async {
            suspend(Event::Sleep(Sleep::new(Duration::from_millis(20)))).await?;
            Ok(())
        });
        sched.run(root).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(20));
        assert_eq!(sched.stats().timers_fired, 1);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut sched = Scheduler::new(SchedulerConfig::new().max_tasks(0));
        let err = sched.run(Task::new(async { Ok(()) })).unwrap_err();
        assert!(matches!(err, TaskError::Failed(_)));
    }
}
