//! The scheduler: client API plus the worker event loop.
//!
//! One dedicated worker thread sleeps on a condition variable until the
//! earliest pending deadline and never polls. Admissions and cancellations
//! from client threads nudge the condvar so the worker re-derives its wait
//! target; the queue lock is released around task execution so clients are
//! never blocked behind a long-running task.

use std::collections::BinaryHeap;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use ahash::{AHashMap, AHashSet};
use parking_lot::{Condvar, Mutex, MutexGuard};
use thiserror::Error;
use tracing::{debug, trace};

use crate::task::{Task, TaskId, TaskRun};

/// Why a scheduling call failed.
#[derive(Error, Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchedulerError {
    /// The event loop has shut down; no further tasks are accepted.
    #[error("scheduler event loop has stopped")]
    Stopped,
}

/// Why a cancellation call failed.
#[derive(Error, Clone, Copy, Debug, PartialEq, Eq)]
pub enum CancelError {
    /// The event loop has shut down.
    #[error("scheduler event loop has stopped")]
    Stopped,
    /// The one-shot task already started executing.
    #[error("task {0} has already executed")]
    AlreadyExecuted(TaskId),
    /// No pending occurrence or repeat schedule exists for this id.
    #[error("task {0} is not scheduled")]
    NotFound(TaskId),
}

/// Tunable timing behaviour.
#[derive(Clone, Copy, Debug)]
pub struct SchedulerConfig {
    /// The event loop terminates on its own at `start + max_runtime`.
    pub max_runtime: Duration,
    /// A queue head due within this window of now is dispatched immediately
    /// instead of arming one more short timer.
    pub start_slack: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_runtime: Duration::from_secs(4),
            start_slack: Duration::from_millis(20),
        }
    }
}

struct State {
    /// Pending occurrences, earliest deadline first.
    queue: BinaryHeap<Task>,
    /// Interval per repeating task; removal stops future repeats.
    repeating: AHashMap<TaskId, Duration>,
    /// One-shot ids whose execution has begun.
    executed: AHashSet<TaskId>,
    /// Dispatch log, in execution order.
    history: Vec<TaskRun>,
    next_task_id: u64,
    running: bool,
    shutdown: bool,
}

impl State {
    fn alloc_id(&mut self) -> TaskId {
        let id = TaskId(self.next_task_id);
        self.next_task_id += 1;
        id
    }
}

struct Inner {
    state: Mutex<State>,
    wakeup: Condvar,
}

/// Handle to a running scheduler.
///
/// Dropping the handle signals the worker, discards pending tasks without
/// running them, and joins the worker thread.
pub struct Scheduler {
    inner: Arc<Inner>,
    worker: Option<JoinHandle<()>>,
}

impl Scheduler {
    /// Start a scheduler whose clock origin is `start`.
    pub fn spawn(start: Instant) -> Self {
        Self::spawn_with(start, SchedulerConfig::default())
    }

    /// Start a scheduler with explicit timing configuration.
    pub fn spawn_with(start: Instant, config: SchedulerConfig) -> Self {
        let inner = Arc::new(Inner {
            state: Mutex::new(State {
                queue: BinaryHeap::new(),
                repeating: AHashMap::new(),
                executed: AHashSet::new(),
                history: Vec::new(),
                next_task_id: 1,
                running: true,
                shutdown: false,
            }),
            wakeup: Condvar::new(),
        });

        let worker_inner = Arc::clone(&inner);
        let worker = std::thread::Builder::new()
            .name("atlas-sched".into())
            .spawn(move || event_loop(&worker_inner, start, config))
            .expect("spawn scheduler worker");

        Self {
            inner,
            worker: Some(worker),
        }
    }

    /// Enqueue a task to run once at `start`, occupying the worker for
    /// `running`.
    pub fn schedule_once(&self, start: Instant, running: Duration) -> Result<TaskId, SchedulerError> {
        let mut state = self.inner.state.lock();
        if !state.running {
            return Err(SchedulerError::Stopped);
        }
        let id = state.alloc_id();
        debug!(id = id.0, "admitting one-shot task");
        state.queue.push(Task { id, start, running });
        self.inner.wakeup.notify_one();
        Ok(id)
    }

    /// Enqueue a repeating task. The first occurrence runs at `start`; each
    /// later one at the previous occurrence's start plus `interval`, enqueued
    /// after the previous body finishes.
    pub fn schedule_repeated(
        &self,
        start: Instant,
        interval: Duration,
        running: Duration,
    ) -> Result<TaskId, SchedulerError> {
        let mut state = self.inner.state.lock();
        if !state.running {
            return Err(SchedulerError::Stopped);
        }
        let id = state.alloc_id();
        debug!(id = id.0, interval_ms = interval.as_millis() as u64, "admitting repeating task");
        state.queue.push(Task { id, start, running });
        state.repeating.insert(id, interval);
        self.inner.wakeup.notify_one();
        Ok(id)
    }

    /// Cancel a task.
    ///
    /// Stopping a repeating task takes effect immediately for future
    /// occurrences, even if the current one is mid-execution; its pending
    /// occurrence is removed as well when still queued. Cancelling a one-shot
    /// that already started reports [`CancelError::AlreadyExecuted`].
    pub fn cancel(&self, id: TaskId) -> Result<(), CancelError> {
        let mut state = self.inner.state.lock();
        if !state.running {
            return Err(CancelError::Stopped);
        }

        let stopped_repeat = state.repeating.remove(&id).is_some();
        if !stopped_repeat && state.executed.contains(&id) {
            return Err(CancelError::AlreadyExecuted(id));
        }

        let removed = remove_pending(&mut state.queue, id);
        if stopped_repeat || removed {
            debug!(id = id.0, "cancelled task");
            self.inner.wakeup.notify_one();
            Ok(())
        } else {
            Err(CancelError::NotFound(id))
        }
    }

    /// Dispatch log so far, in execution order.
    pub fn history(&self) -> Vec<TaskRun> {
        self.inner.state.lock().history.clone()
    }

    /// Whether the event loop is still accepting tasks.
    pub fn is_running(&self) -> bool {
        self.inner.state.lock().running
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        debug!("stopping scheduler");
        {
            let mut state = self.inner.state.lock();
            state.shutdown = true;
        }
        self.inner.wakeup.notify_one();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// Extract one pending occurrence by id. `BinaryHeap` hides its storage, so
/// pop entries aside until the id surfaces, then push the rest back.
fn remove_pending(queue: &mut BinaryHeap<Task>, id: TaskId) -> bool {
    let mut rest = Vec::with_capacity(queue.len());
    let mut found = false;
    while let Some(task) = queue.pop() {
        if task.id == id {
            found = true;
            break;
        }
        rest.push(task);
    }
    for task in rest {
        queue.push(task);
    }
    found
}

fn head_earlier_than(state: &State, next_time: Instant) -> bool {
    state.queue.peek().is_some_and(|task| task.start < next_time)
}

fn event_loop(inner: &Inner, start: Instant, config: SchedulerConfig) {
    let final_deadline = start + config.max_runtime;
    let mut state = inner.state.lock();

    loop {
        // Re-derive the wait target every pass: a task may have run, arrived
        // or been cancelled since the lock was last held.
        let next_time = state
            .queue
            .peek()
            .map_or(final_deadline, |task| task.start.min(final_deadline));
        trace!("updating queue state");

        // Sleep until next_time unless a strictly earlier deadline is
        // admitted or shutdown is requested. Four things end the wait:
        // admission, cancellation, a due task timing out, or the final
        // deadline timing out.
        let mut timed_out = false;
        loop {
            if state.shutdown || head_earlier_than(&state, next_time) {
                break;
            }
            let result = inner.wakeup.wait_until(&mut state, next_time);
            if result.timed_out() {
                timed_out = !(state.shutdown || head_earlier_than(&state, next_time));
                break;
            }
        }

        if state.shutdown {
            debug!(pending = state.queue.len(), "shutdown requested, dropping pending tasks");
            state.queue.clear();
            state.running = false;
            return;
        }

        if timed_out && next_time == final_deadline {
            debug!("reached max runtime, shutting down event loop");
            state.running = false;
            return;
        }

        // Only possible after a cancellation: nothing to do, re-derive.
        if state.queue.is_empty() {
            continue;
        }

        let head_start = state.queue.peek().expect("queue checked non-empty").start;
        if timed_out || head_start < Instant::now() + config.start_slack {
            let task = state.queue.pop().expect("queue checked non-empty");
            state.executed.insert(task.id);
            state.history.push(TaskRun {
                id: task.id,
                started_at: Instant::now(),
            });

            // Run with the lock released so admissions and cancellations
            // proceed while the body occupies the worker.
            MutexGuard::unlocked(&mut state, || task.run());

            // Re-check the repeat map only now: a cancel during the run must
            // stop future occurrences.
            if let Some(&interval) = state.repeating.get(&task.id) {
                debug!(id = task.id.0, "re-admitting repeating task");
                state.queue.push(Task {
                    id: task.id,
                    start: task.start + interval,
                    running: task.running,
                });
            }
        }
    }
}
