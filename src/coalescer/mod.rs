//! Status Coalescer
//!
//! Collapses the high-rate status stream of one status key into one
//! [`FundingEvent`] per funding-period boundary. The exchange repeats the
//! same period-end timestamp on every tick until the period rolls, so a
//! change in that field is the only trigger.
//!
//! ```text
//!   UNARMED --first snapshot (adopt baseline)--> ARMED
//!   ARMED   --same period end-------------------> ARMED (silent)
//!   ARMED   --different period end (emit)-------> ARMED (new baseline)
//!   any     --reset()---------------------------> UNARMED
//! ```

pub mod registry;

pub use registry::CoalescerRegistry;

use anyhow::anyhow;
use std::panic::{self, AssertUnwindSafe};
use tracing::{debug, warn};

use crate::domain::{FundingEvent, StatusSnapshot};
use crate::scheduler::retry::panic_message;

/// Callback invoked with every emitted event
pub type FundingCallback = Box<dyn FnMut(&FundingEvent) -> anyhow::Result<()> + Send>;

/// Baseline tracked for one status key; `None` means unarmed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoalescerState {
    current_period_end_ts: Option<i64>,
}

/// Result of feeding one snapshot to a [`CoalescerState`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// First snapshot after creation or reset
    Armed { baseline: i64 },
    /// Still inside the tracked funding period
    Unchanged,
    /// The period end moved; baseline already updated
    Crossed { previous: i64, next: i64 },
}

impl CoalescerState {
    pub fn current_period_end_ts(&self) -> Option<i64> {
        self.current_period_end_ts
    }

    pub fn is_armed(&self) -> bool {
        self.current_period_end_ts.is_some()
    }

    /// Apply one snapshot's period end to the baseline
    pub fn observe(&mut self, period_end_ts: i64) -> Transition {
        match self.current_period_end_ts {
            None => {
                self.current_period_end_ts = Some(period_end_ts);
                Transition::Armed {
                    baseline: period_end_ts,
                }
            }
            Some(current) if current == period_end_ts => Transition::Unchanged,
            Some(previous) => {
                self.current_period_end_ts = Some(period_end_ts);
                Transition::Crossed {
                    previous,
                    next: period_end_ts,
                }
            }
        }
    }

    pub fn reset(&mut self) {
        self.current_period_end_ts = None;
    }
}

/// Coalescer counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoalescerStats {
    pub snapshots: u64,
    pub emitted: u64,
    pub callback_failures: u64,
    pub resets: u64,
}

/// Per-key funding boundary detector
///
/// Snapshots for a key must be delivered in feed order; `&mut self` keeps
/// calls sequential.
pub struct StatusCoalescer {
    status_key: String,
    state: CoalescerState,
    on_event: FundingCallback,
    stats: CoalescerStats,
}

impl std::fmt::Debug for StatusCoalescer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusCoalescer")
            .field("status_key", &self.status_key)
            .field("state", &self.state)
            .field("stats", &self.stats)
            .finish()
    }
}

impl StatusCoalescer {
    pub fn new<F>(status_key: impl Into<String>, on_event: F) -> Self
    where
        F: FnMut(&FundingEvent) -> anyhow::Result<()> + Send + 'static,
    {
        Self::with_callback(status_key, Box::new(on_event))
    }

    pub fn with_callback(status_key: impl Into<String>, on_event: FundingCallback) -> Self {
        Self {
            status_key: status_key.into(),
            state: CoalescerState::default(),
            on_event,
            stats: CoalescerStats::default(),
        }
    }

    pub fn status_key(&self) -> &str {
        &self.status_key
    }

    pub fn state(&self) -> CoalescerState {
        self.state
    }

    pub fn stats(&self) -> CoalescerStats {
        self.stats
    }

    /// Feed one snapshot; returns the event if a boundary was crossed.
    ///
    /// The baseline moves before the callback runs, so a failing callback
    /// neither corrupts the state nor causes the boundary to be emitted
    /// again on the next snapshot.
    pub fn handle_snapshot(&mut self, snapshot: &StatusSnapshot) -> Option<FundingEvent> {
        self.stats.snapshots += 1;

        match self.state.observe(snapshot.period_end_ts) {
            Transition::Armed { baseline } => {
                debug!(
                    "[{}] baseline period end adopted: {}",
                    self.status_key, baseline
                );
                None
            }
            Transition::Unchanged => None,
            Transition::Crossed { previous, next } => {
                let event = FundingEvent {
                    status_key: self.status_key.clone(),
                    status_ts: snapshot.event_ts,
                    previous_period_end_ts: previous,
                    next_period_end_ts: next,
                    mark_price: snapshot.mark_price,
                    funding_rate: snapshot.funding_rate,
                };
                self.stats.emitted += 1;
                debug!(
                    "[{}] funding period rolled {} -> {} at ts={} rate={} mark={}",
                    self.status_key,
                    previous,
                    next,
                    snapshot.event_ts,
                    snapshot.funding_rate,
                    snapshot.mark_price
                );

                let outcome = panic::catch_unwind(AssertUnwindSafe(|| (self.on_event)(&event)))
                    .unwrap_or_else(|payload| {
                        Err(anyhow!("callback panicked: {}", panic_message(payload.as_ref())))
                    });
                if let Err(e) = outcome {
                    self.stats.callback_failures += 1;
                    warn!(
                        "[{}] funding callback failed for {} -> {}: {:#}",
                        self.status_key, previous, next, e
                    );
                }
                Some(event)
            }
        }
    }

    /// Forget the baseline; the next snapshot is adopted silently
    pub fn reset(&mut self) {
        self.stats.resets += 1;
        self.state.reset();
        debug!("[{}] coalescer reset", self.status_key);
    }
}
