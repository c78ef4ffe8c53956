//! Slot accounting for the retry scheduler.
//!
//! A single mutex guards the in-flight counter, the FIFO of attempts that
//! are ready to run, and the attempt number of every live task. Admission
//! hands the waiting attempt a [`SlotPermit`] through a oneshot channel; the
//! permit gives its slot back when dropped, so a slot cannot leak even if
//! the attempt panics or its driver is cancelled.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;
use tracing::trace;

use super::TaskId;

struct PendingAttempt {
    task_id: TaskId,
    attempt: u32,
    admit: oneshot::Sender<SlotPermit>,
}

#[derive(Default)]
struct QueueState {
    in_flight: usize,
    pending: VecDeque<PendingAttempt>,
    attempts: HashMap<TaskId, u32>,
}

/// Point-in-time view of the queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueSnapshot {
    pub in_flight: usize,
    pub pending: usize,
    pub tracked_tasks: usize,
}

pub(crate) struct RunQueue {
    concurrency: usize,
    state: Mutex<QueueState>,
}

impl RunQueue {
    pub(crate) fn new(concurrency: usize) -> Arc<Self> {
        Arc::new(Self {
            concurrency,
            state: Mutex::new(QueueState::default()),
        })
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        // Nothing that runs under this lock can leave the state half-updated
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Put `attempt` of `task_id` at the tail of the pending sequence.
    ///
    /// The returned receiver yields a permit once a slot is free and every
    /// attempt queued earlier has been admitted.
    pub(crate) fn enqueue(
        self: &Arc<Self>,
        task_id: TaskId,
        attempt: u32,
    ) -> oneshot::Receiver<SlotPermit> {
        let (admit, rx) = oneshot::channel();
        let mut state = self.lock();
        state.attempts.insert(task_id, attempt);
        state.pending.push_back(PendingAttempt {
            task_id,
            attempt,
            admit,
        });
        self.admit_ready(&mut state);
        rx
    }

    /// Forget a task that reached its terminal outcome
    pub(crate) fn forget(&self, task_id: TaskId) {
        self.lock().attempts.remove(&task_id);
    }

    pub(crate) fn current_attempt(&self, task_id: TaskId) -> Option<u32> {
        self.lock().attempts.get(&task_id).copied()
    }

    pub(crate) fn snapshot(&self) -> QueueSnapshot {
        let state = self.lock();
        QueueSnapshot {
            in_flight: state.in_flight,
            pending: state.pending.len(),
            tracked_tasks: state.attempts.len(),
        }
    }

    fn release(self: &Arc<Self>) {
        let mut state = self.lock();
        state.in_flight = state.in_flight.saturating_sub(1);
        self.admit_ready(&mut state);
    }

    fn admit_ready(self: &Arc<Self>, state: &mut QueueState) {
        while state.in_flight < self.concurrency {
            let Some(next) = state.pending.pop_front() else {
                break;
            };
            state.in_flight += 1;
            let permit = SlotPermit {
                queue: Some(Arc::clone(self)),
            };
            match next.admit.send(permit) {
                Ok(()) => {
                    trace!(task_id = %next.task_id, attempt = next.attempt, "attempt admitted");
                }
                Err(mut permit) => {
                    // Waiter is gone; the slot was never handed out
                    permit.disarm();
                    state.in_flight -= 1;
                }
            }
        }
    }
}

/// One occupied concurrency slot; dropping it admits the next pending attempt
#[must_use = "dropping the permit releases the slot immediately"]
pub(crate) struct SlotPermit {
    queue: Option<Arc<RunQueue>>,
}

impl SlotPermit {
    fn disarm(&mut self) {
        self.queue = None;
    }
}

impl Drop for SlotPermit {
    fn drop(&mut self) {
        if let Some(queue) = self.queue.take() {
            queue.release();
        }
    }
}
