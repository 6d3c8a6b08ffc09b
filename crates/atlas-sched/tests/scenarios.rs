//! End-to-end scheduler scenarios with real time.
//!
//! Deadlines are spaced far enough apart that OS scheduling jitter cannot
//! reorder them; only ordering and at-or-after-deadline starts are asserted,
//! never upper bounds.

use std::thread;
use std::time::{Duration, Instant};

use atlas_sched::{CancelError, Scheduler, SchedulerConfig, SchedulerError, TaskId};

fn ms(value: u64) -> Duration {
    Duration::from_millis(value)
}

fn sleep_until(deadline: Instant) {
    let now = Instant::now();
    if deadline > now {
        thread::sleep(deadline - now);
    }
}

#[test]
fn earliest_deadline_runs_first() {
    let start = Instant::now();
    let sched = Scheduler::spawn(start);

    // Admissions arrive in the opposite order of their deadlines.
    let a = sched.schedule_once(start + ms(350), ms(10)).unwrap();
    sleep_until(start + ms(30));
    let b = sched.schedule_once(start + ms(300), ms(10)).unwrap();
    sleep_until(start + ms(60));
    let c = sched.schedule_once(start + ms(250), ms(10)).unwrap();

    sleep_until(start + ms(500));
    let history = sched.history();

    let order: Vec<TaskId> = history.iter().map(|run| run.id).collect();
    assert_eq!(order, vec![c, b, a]);

    for (run, deadline_ms) in history.iter().zip([250u64, 300, 350]) {
        assert!(
            run.started_at >= start + ms(deadline_ms),
            "task {} started before its deadline",
            run.id
        );
    }
}

#[test]
fn task_ids_are_monotonic() {
    let start = Instant::now();
    let sched = Scheduler::spawn(start);

    let first = sched.schedule_once(start + ms(500), ms(1)).unwrap();
    let second = sched.schedule_repeated(start + ms(600), ms(100), ms(1)).unwrap();
    let third = sched.schedule_once(start + ms(700), ms(1)).unwrap();

    assert!(first < second && second < third);
}

#[test]
fn repeating_task_stops_after_cancel() {
    let start = Instant::now();
    let config = SchedulerConfig {
        max_runtime: Duration::from_secs(2),
        ..SchedulerConfig::default()
    };
    let sched = Scheduler::spawn_with(start, config);

    let id = sched.schedule_repeated(start + ms(50), ms(100), ms(5)).unwrap();

    sleep_until(start + ms(380));
    sched.cancel(id).unwrap();
    let runs_at_cancel = sched.history().len();
    assert!(runs_at_cancel >= 2, "repeats ran before the cancel");

    sleep_until(start + ms(700));
    assert_eq!(
        sched.history().len(),
        runs_at_cancel,
        "no occurrence may run after cancel returns"
    );
}

#[test]
fn cancel_pending_one_shot_prevents_execution() {
    let start = Instant::now();
    let sched = Scheduler::spawn(start);

    let id = sched.schedule_once(start + ms(300), ms(5)).unwrap();
    sched.cancel(id).unwrap();

    sleep_until(start + ms(450));
    assert!(sched.history().is_empty());

    // a second cancel no longer finds it
    assert_eq!(sched.cancel(id), Err(CancelError::NotFound(id)));
}

#[test]
fn cancel_after_execution_is_an_error() {
    let start = Instant::now();
    let sched = Scheduler::spawn(start);

    let id = sched.schedule_once(start + ms(30), ms(5)).unwrap();
    sleep_until(start + ms(150));

    assert_eq!(sched.cancel(id), Err(CancelError::AlreadyExecuted(id)));
    assert_eq!(sched.history().len(), 1);
}

#[test]
fn cancel_unknown_id() {
    let start = Instant::now();
    let sched = Scheduler::spawn(start);
    let missing = TaskId(999);
    assert_eq!(sched.cancel(missing), Err(CancelError::NotFound(missing)));
}

#[test]
fn due_task_runs_without_waiting() {
    let start = Instant::now();
    let sched = Scheduler::spawn(start);

    // already due at admission
    sched.schedule_once(start, ms(5)).unwrap();
    sleep_until(start + ms(150));
    assert_eq!(sched.history().len(), 1);
}

#[test]
fn long_running_task_delays_but_does_not_lose_later_tasks() {
    let start = Instant::now();
    let sched = Scheduler::spawn(start);

    let long = sched.schedule_once(start + ms(50), ms(300)).unwrap();
    let late = sched.schedule_once(start + ms(150), ms(5)).unwrap();

    sleep_until(start + ms(600));
    let history = sched.history();
    let order: Vec<TaskId> = history.iter().map(|run| run.id).collect();
    assert_eq!(order, vec![long, late]);
    // the second task could not start before the first released the worker
    assert!(history[1].started_at >= start + ms(350));
}

#[test]
fn scheduling_after_max_runtime_fails() {
    let start = Instant::now();
    let config = SchedulerConfig {
        max_runtime: ms(100),
        ..SchedulerConfig::default()
    };
    let sched = Scheduler::spawn_with(start, config);

    sleep_until(start + ms(250));
    assert!(!sched.is_running());
    assert_eq!(
        sched.schedule_once(start + ms(500), ms(1)),
        Err(SchedulerError::Stopped)
    );
    assert_eq!(sched.cancel(TaskId(1)), Err(CancelError::Stopped));
}

#[test]
fn drop_discards_pending_tasks() {
    let start = Instant::now();
    let sched = Scheduler::spawn(start);

    sched.schedule_once(start + ms(60_000), ms(1)).unwrap();
    let before = Instant::now();
    drop(sched); // must join promptly, not wait for the pending deadline
    assert!(before.elapsed() < Duration::from_secs(2));
}
