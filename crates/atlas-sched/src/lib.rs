//! # Atlas Sched
//!
//! Single-worker task scheduler with earliest-deadline-first dispatch.
//!
//! ## Design
//! - One worker thread, one mutex, one condition variable
//! - Precise wakeup: the worker sleeps until the earliest pending deadline,
//!   never on a polling interval
//! - One-shot and repeating tasks, cooperative cancellation
//! - Task bodies run with the queue lock released

pub mod scheduler;
pub mod task;

pub use scheduler::{CancelError, Scheduler, SchedulerConfig, SchedulerError};
pub use task::{TaskId, TaskRun};
