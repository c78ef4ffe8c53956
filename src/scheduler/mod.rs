//! Retrying task scheduler
//!
//! Serializes side-effecting work behind a fixed number of concurrency
//! slots and retries failed attempts with exponential backoff:
//! - `backoff` computes the delay schedule
//! - `run_queue` does the FIFO slot accounting
//! - `retry` drives each task's attempt loop
//! - `timeout` bounds a single attempt at the task-construction boundary

pub mod backoff;
pub mod retry;
pub mod run_queue;
pub mod timeout;

pub use backoff::{backoff_delay, base_delay, RetryConfig};
pub use retry::{observe, RetryScheduler, SchedulerStats, TaskHandle};
pub use run_queue::QueueSnapshot;
pub use timeout::with_attempt_timeout;

use serde::{Deserialize, Serialize};

/// Identity of a submitted task, unique per scheduler instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(u64);

impl TaskId {
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}
