//! Task records and deadline ordering.

use core::cmp::Ordering;
use core::fmt;
use std::time::{Duration, Instant};

use tracing::debug;

/// Unique task identifier, assigned by the scheduler starting from 1.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A pending occurrence in the deadline queue.
#[derive(Clone, Debug)]
pub(crate) struct Task {
    pub id: TaskId,
    pub start: Instant,
    pub running: Duration,
}

impl Task {
    /// Execute the task body. Called with the queue lock released; the body
    /// occupies the worker for `running` (stand-in for real work that may
    /// block or sleep).
    pub fn run(&self) {
        debug!(id = self.id.0, "running task");
        if !self.running.is_zero() {
            std::thread::sleep(self.running);
        }
        debug!(id = self.id.0, "finished task");
    }
}

// `BinaryHeap` is a max-heap; reverse the deadline comparison so the earliest
// start surfaces first. Equal deadlines fall back to reversed id, which keeps
// the ordering total. Execution order among ties is not part of the contract.
impl Ord for Task {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .start
            .cmp(&self.start)
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for Task {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Task {
    fn eq(&self, other: &Self) -> bool {
        self.start == other.start && self.id == other.id
    }
}

impl Eq for Task {}

/// One completed dispatch, recorded just before the task body ran.
#[derive(Clone, Copy, Debug)]
pub struct TaskRun {
    /// Task that ran.
    pub id: TaskId,
    /// When the worker picked it up.
    pub started_at: Instant,
}
