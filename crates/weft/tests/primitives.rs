use std::cell::{Cell, RefCell};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use weft::{
    call, current, end, join, kill, sleep, spawn, yield_now, Runtime, Scheduler, SchedulerConfig,
    StallPolicy, Task, TaskError, Value,
};

fn runtime() -> Runtime {
    Runtime::new(SchedulerConfig::new())
}

/// Sets its flag when dropped
struct Cleanup(Rc<Cell<bool>>);

impl Drop for Cleanup {
    fn drop(&mut self) {
        self.0.set(true);
    }
}

#[test]
fn delegation_round_trip() {
    let got = Rc::new(Cell::new(0u64));
    let got2 = Rc::clone(&got);

    runtime()
        .run(async move {
            let inner = Task::new(async { Ok(20u64) });
            let middle = Task::new(async move {
                let v: u64 = call(inner).await?;
                end(v + 1).await
            });
            let v: u64 = call(middle).await?;
            got2.set(v * 2);
            Ok(())
        })
        .unwrap();

    assert_eq!(got.get(), 42);
}

#[test]
fn call_returns_tagged_error_from_deepest_task() {
    let seen = Rc::new(RefCell::new(None));
    let seen2 = Rc::clone(&seen);

    runtime()
        .run(async move {
            let leaf = Task::new(async { Err::<(), _>(TaskError::failed("leaf broke")) });
            let leaf_id = leaf.id();
            let branch = Task::new(async move { call::<()>(leaf).await });

            let err = call::<()>(branch).await.unwrap_err();
            *seen2.borrow_mut() = Some((leaf_id, err));
            Ok(())
        })
        .unwrap();

    let (leaf_id, err) = seen.borrow_mut().take().unwrap();
    assert_eq!(err.origin(), Some(leaf_id));
    assert_eq!(err.root_cause(), &TaskError::failed("leaf broke"));
}

#[test]
fn call_with_wrong_type_reports_mismatch() {
    let result = runtime().run(async {
        let _: String = call(Task::new(async { Ok(7u8) })).await?;
        Ok(())
    });
    assert!(matches!(
        result.unwrap_err().root_cause(),
        TaskError::TypeMismatch { found: "u8", .. }
    ));
}

#[test]
fn joiners_resume_in_one_drain_pass() {
    let log = Rc::new(RefCell::new(Vec::new()));

    let root_log = Rc::clone(&log);
    runtime()
        .run(async move {
            let target = spawn(Task::new(async {
                sleep(Duration::from_millis(10)).await?;
                for _ in 0..3 {
                    yield_now().await?;
                }
                Ok(())
            }))
            .await?;

            for n in 0..3 {
                let log = Rc::clone(&root_log);
                spawn(Task::new(async move {
                    join(target).await?;
                    log.borrow_mut().push(format!("joined {}", n));
                    Ok(())
                }))
                .await?;
            }

            let log = Rc::clone(&root_log);
            spawn(Task::new(async move {
                sleep(Duration::from_millis(10)).await?;
                for _ in 0..10 {
                    log.borrow_mut().push("tick".to_string());
                    yield_now().await?;
                }
                Ok(())
            }))
            .await?;
            Ok(())
        })
        .unwrap();

    let log = log.borrow();
    let first = log.iter().position(|e| e.starts_with("joined")).unwrap();
    assert_eq!(log[first..first + 3], ["joined 0", "joined 1", "joined 2"]);
    assert_eq!(log.iter().filter(|e| *e == "tick").count(), 10);
}

#[test]
fn kill_removes_delegation_chain_and_defers_cleanup() {
    let dropped: Vec<Rc<Cell<bool>>> = (0..3).map(|_| Rc::new(Cell::new(false))).collect();
    let flags = dropped.clone();
    let start = Instant::now();

    runtime()
        .run(async move {
            let [a, b, c] = [0, 1, 2].map(|i| Rc::clone(&flags[i]));

            let leaf = Task::new(async move {
                let _cleanup = Cleanup(c);
                sleep(Duration::from_secs(3600)).await
            });
            let middle = Task::new(async move {
                let _cleanup = Cleanup(b);
                call::<()>(leaf).await
            });
            let top = spawn(Task::new(async move {
                let _cleanup = Cleanup(a);
                call::<()>(middle).await
            }))
            .await?;

            sleep(Duration::from_millis(10)).await?;
            kill(top).await?;

            if flags.iter().any(|f| f.get()) {
                return Err(TaskError::failed("killed task cleaned up early"));
            }
            Ok(())
        })
        .unwrap();

    assert!(start.elapsed() < Duration::from_secs(60));
    assert!(dropped.iter().all(|f| f.get()));
}

#[test]
fn kill_wakes_tasks_already_joining() {
    let resumed = Rc::new(Cell::new(false));
    let resumed2 = Rc::clone(&resumed);

    let mut rt = runtime();
    let result = rt.run(async move {
        let victim = spawn(Task::new(sleep(Duration::from_secs(3600)))).await?;
        spawn(Task::new(async move {
            join(victim).await?;
            resumed2.set(true);
            Ok(())
        }))
        .await?;

        yield_now().await?;
        yield_now().await?;
        kill(victim).await?;
        Ok(())
    });

    assert_eq!(result, Ok(()));
    assert!(resumed.get());
    assert_eq!(rt.stats().map(|s| s.killed), Some(1));
}

#[test]
fn kill_resumes_delegator_without_value() {
    let got = Rc::new(RefCell::new(None));
    let got2 = Rc::clone(&got);

    runtime()
        .run(async move {
            let child = Task::new(sleep(Duration::from_secs(3600)));
            let child_id = child.id();
            spawn(Task::new(async move {
                let v: Value = call(child).await?;
                *got2.borrow_mut() = Some(v.is_none());
                Ok(())
            }))
            .await?;

            yield_now().await?;
            yield_now().await?;
            kill(child_id).await?;
            Ok(())
        })
        .unwrap();

    assert_eq!(*got.borrow(), Some(true));
}

#[test]
fn join_after_kill_never_resumes() {
    let resumed = Rc::new(Cell::new(false));
    let resumed2 = Rc::clone(&resumed);

    let mut rt = Runtime::new(SchedulerConfig::new().stall_policy(StallPolicy::Fail));
    let result = rt.run(async move {
        let victim = spawn(Task::new(sleep(Duration::from_secs(3600)))).await?;
        kill(victim).await?;
        spawn(Task::new(async move {
            join(victim).await?;
            resumed2.set(true);
            Ok(())
        }))
        .await?;
        Ok(())
    });

    assert_eq!(result.unwrap_err(), TaskError::Deadlock { blocked: 1 });
    assert!(!resumed.get());
    assert_eq!(rt.stats().map(|s| s.killed), Some(1));
}

#[test]
fn join_after_kill_is_ended_by_watchdog() {
    let resumed = Rc::new(Cell::new(false));
    let resumed2 = Rc::clone(&resumed);

    let mut rt = Runtime::new(SchedulerConfig::new().stall_policy(StallPolicy::Block));
    let result = rt.run(async move {
        let victim = spawn(Task::new(sleep(Duration::from_secs(3600)))).await?;
        kill(victim).await?;
        spawn(Task::new(async move {
            join(victim).await?;
            resumed2.set(true);
            Ok(())
        }))
        .await?;
        spawn(Task::new(async {
            sleep(Duration::from_millis(50)).await?;
            Err::<(), _>(TaskError::failed("watchdog"))
        }))
        .await?;
        Ok(())
    });

    assert_eq!(result.unwrap_err().root_cause(), &TaskError::failed("watchdog"));
    assert!(!resumed.get());
}

#[test]
fn joiners_of_failed_delegate_are_woken() {
    let woke = Rc::new(Cell::new(false));
    let woke2 = Rc::clone(&woke);

    runtime()
        .run(async move {
            let doomed = Task::new(async {
                yield_now().await?;
                Err::<(), _>(TaskError::failed("doomed"))
            });
            let doomed_id = doomed.id();
            spawn(Task::new(async move {
                join(doomed_id).await?;
                woke2.set(true);
                Ok(())
            }))
            .await?;

            assert!(call::<()>(doomed).await.is_err());
            Ok(())
        })
        .unwrap();

    assert!(woke.get());
}

#[test]
fn sleepers_wake_in_deadline_order_without_spinning() {
    let order = Rc::new(RefCell::new(Vec::new()));
    let order2 = Rc::clone(&order);
    let start = Instant::now();

    let mut rt = runtime();
    rt.run(async move {
        for ms in [30u64, 10, 20] {
            let order = Rc::clone(&order2);
            spawn(Task::new(async move {
                sleep(Duration::from_millis(ms)).await?;
                order.borrow_mut().push(ms);
                Ok(())
            }))
            .await?;
        }
        Ok(())
    })
    .unwrap();

    assert_eq!(*order.borrow(), vec![10, 20, 30]);
    assert!(start.elapsed() >= Duration::from_millis(30));

    let stats = rt.stats().unwrap();
    assert_eq!(stats.timers_fired, 3);
    assert!(stats.polls <= 10, "too many waits: {}", stats.polls);
}

#[test]
fn root_failure_tears_down_every_task() {
    let cleaned = Rc::new(Cell::new(false));
    let cleaned2 = Rc::clone(&cleaned);

    let root = Task::new(async move {
        spawn(Task::new(async move {
            let _cleanup = Cleanup(cleaned2);
            sleep(Duration::from_secs(3600)).await
        }))
        .await?;
        sleep(Duration::from_millis(5)).await?;
        Err::<(), _>(TaskError::failed("root gave up"))
    });
    let root_id = root.id();

    let mut scheduler = Scheduler::new(SchedulerConfig::new());
    let err = scheduler.run(root).unwrap_err();

    assert_eq!(err.origin(), Some(root_id));
    assert_eq!(err.root_cause(), &TaskError::failed("root gave up"));
    assert!(scheduler.is_empty());
    assert!(cleaned.get());
}

#[test]
fn spawn_beyond_task_limit_fails_in_caller() {
    let accepted = Rc::new(Cell::new(0));
    let accepted2 = Rc::clone(&accepted);

    let mut rt = Runtime::new(SchedulerConfig::new().max_tasks(3));
    rt.run(async move {
        loop {
            match spawn(Task::new(sleep(Duration::from_millis(1)))).await {
                Ok(_) => accepted2.set(accepted2.get() + 1),
                Err(TaskError::TooManyTasks(3)) => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    })
    .unwrap();

    assert_eq!(accepted.get(), 2);
}

#[test]
fn current_is_set_only_inside_tasks() {
    assert_eq!(current(), None);
    let ids = Rc::new(RefCell::new(Vec::new()));
    let ids2 = Rc::clone(&ids);

    let root = Task::new(async move {
        let child = Task::new(async { Ok(current()) });
        let child_id = child.id();
        let seen: Option<weft::TaskId> = call(child).await?;
        ids2.borrow_mut().push((current(), seen, child_id));
        Ok(())
    });
    let root_id = root.id();
    runtime().run_task(root).unwrap();

    let ids = ids.borrow();
    assert_eq!(ids[0].0, Some(root_id));
    assert_eq!(ids[0].1, Some(ids[0].2));
    assert_eq!(current(), None);
}

#[test]
fn foreign_future_stalls_the_task() {
    struct Never;
    impl Future for Never {
        type Output = ();
        fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<()> {
            Poll::Pending
        }
    }

    let err = runtime()
        .run(async {
            Never.await;
            Ok(())
        })
        .unwrap_err();
    assert!(matches!(err.root_cause(), TaskError::Stalled(_)));
}

#[test]
fn end_value_is_normalized() {
    let got = Rc::new(RefCell::new(None));
    let got2 = Rc::clone(&got);

    runtime()
        .run(async move {
            let nothing: Value = call(Task::new(async { end(()).await })).await?;
            let nested: u16 = call(Task::new(async { end(Value::new(9u16)).await })).await?;
            *got2.borrow_mut() = Some((nothing.is_none(), nested));
            Ok(())
        })
        .unwrap();

    assert_eq!(*got.borrow(), Some((true, 9)));
}
