//! Orchestrator
//!
//! Wires the feed to the ledger: status records go through the per-key
//! coalescers, trade records through the trade assembler, and everything
//! that should be booked becomes one retryable task on the scheduler.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::coalescer::{CoalescerRegistry, FundingCallback};
use crate::config::AppConfig;
use crate::domain::{FundingEvent, TradeFill};
use crate::error::Result;
use crate::feed::{FeedRecord, TradeAssembler};
use crate::ledger::{LedgerEntry, LedgerSink};
use crate::scheduler::{observe, with_attempt_timeout, RetryScheduler, SchedulerStats, TaskHandle};

#[derive(Debug, Default)]
struct Counters {
    records: AtomicU64,
    trades_submitted: AtomicU64,
    funding_submitted: AtomicU64,
    funding_skipped: AtomicU64,
}

/// Outcome of a feed run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub records: u64,
    pub trades_submitted: u64,
    pub funding_submitted: u64,
    pub funding_skipped: u64,
    /// True if the feed ended on its own rather than by shutdown
    pub feed_closed: bool,
    /// False if shutdown gave up waiting for queued writes
    pub drained: bool,
    pub scheduler: SchedulerStats,
}

/// Submit one ledger write, bounded per attempt when `timeout` is set
fn submit_ledger_task<F, Fut, T>(
    scheduler: &RetryScheduler,
    label: String,
    timeout: Option<Duration>,
    task: F,
) -> Result<TaskHandle<T>>
where
    F: FnMut(u32) -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    T: Send + 'static,
{
    match timeout {
        Some(limit) => scheduler.submit(label, with_attempt_timeout(limit, task)),
        None => scheduler.submit(label, task),
    }
}

/// Queue a trade row
pub fn submit_trade(
    scheduler: &RetryScheduler,
    ledger: Arc<dyn LedgerSink>,
    timeout: Option<Duration>,
    fill: TradeFill,
) -> Result<TaskHandle<LedgerEntry>> {
    let label = format!("trade {}", fill.id);
    debug!("Queueing trade {} ({} @ {})", fill.id, fill.exec_amount, fill.exec_price);
    submit_ledger_task(scheduler, label, timeout, move |attempt| {
        let ledger = Arc::clone(&ledger);
        let fill = fill.clone();
        async move {
            if attempt > 1 {
                debug!("Re-applying trade {} (attempt {})", fill.id, attempt);
            }
            ledger.apply_trade(&fill).await
        }
    })
}

/// Queue a funding row
pub fn submit_funding(
    scheduler: &RetryScheduler,
    ledger: Arc<dyn LedgerSink>,
    timeout: Option<Duration>,
    event: FundingEvent,
) -> Result<TaskHandle<Option<LedgerEntry>>> {
    let label = format!(
        "funding {} {}->{}",
        event.status_key, event.previous_period_end_ts, event.next_period_end_ts
    );
    submit_ledger_task(scheduler, label, timeout, move |attempt| {
        let ledger = Arc::clone(&ledger);
        let event = event.clone();
        async move {
            if attempt > 1 {
                debug!(
                    "Re-applying funding for {} (attempt {})",
                    event.status_key, attempt
                );
            }
            ledger.apply_funding(&event).await
        }
    })
}

pub struct Orchestrator {
    scheduler: RetryScheduler,
    coalescers: CoalescerRegistry,
    assembler: TradeAssembler,
    ledger: Arc<dyn LedgerSink>,
    attempt_timeout: Option<Duration>,
    drain_timeout: Duration,
    symbol_filter: Option<String>,
    counters: Arc<Counters>,
    feed_closed: bool,
}

impl Orchestrator {
    pub fn new(config: &AppConfig, ledger: Arc<dyn LedgerSink>) -> Result<Self> {
        config.ensure_valid()?;
        let scheduler = RetryScheduler::from_config(&config.scheduler, &config.retry)?;
        let attempt_timeout = config.scheduler.attempt_timeout();
        let counters = Arc::new(Counters::default());

        let coalescers = {
            let scheduler = scheduler.clone();
            let ledger = Arc::clone(&ledger);
            let counters = Arc::clone(&counters);
            CoalescerRegistry::new(move |_key: &str| -> FundingCallback {
                let scheduler = scheduler.clone();
                let ledger = Arc::clone(&ledger);
                let counters = Arc::clone(&counters);
                Box::new(move |event: &FundingEvent| {
                    if event.funding_rate == 0.0 {
                        counters.funding_skipped.fetch_add(1, Ordering::Relaxed);
                        debug!("No funding owed for {} at {}", event.status_key, event.status_ts);
                        return Ok(());
                    }
                    let handle =
                        submit_funding(&scheduler, Arc::clone(&ledger), attempt_timeout, event.clone())?;
                    counters.funding_submitted.fetch_add(1, Ordering::Relaxed);
                    observe(handle);
                    Ok(())
                })
            })
        };

        let symbol_filter = config
            .feed
            .filter_symbol
            .then(|| config.feed.symbol.clone());

        Ok(Self {
            scheduler,
            coalescers,
            assembler: TradeAssembler::new(),
            ledger,
            attempt_timeout,
            drain_timeout: config.scheduler.drain_timeout(),
            symbol_filter,
            counters,
            feed_closed: false,
        })
    }

    pub fn coalescers(&self) -> &CoalescerRegistry {
        &self.coalescers
    }

    /// Route one feed record
    pub fn handle_record(&mut self, record: FeedRecord) -> Result<()> {
        self.counters.records.fetch_add(1, Ordering::Relaxed);

        match record {
            FeedRecord::Status { key, snapshot } => {
                self.coalescers.handle(&key, &snapshot);
            }
            FeedRecord::Trade { phase, fill } => {
                if let Some(symbol) = &self.symbol_filter {
                    if &fill.symbol != symbol {
                        debug!("Ignoring trade {} on {}", fill.id, fill.symbol);
                        return Ok(());
                    }
                }
                if let Some(fill) = self.assembler.accept(phase, fill) {
                    let handle = submit_trade(
                        &self.scheduler,
                        Arc::clone(&self.ledger),
                        self.attempt_timeout,
                        fill,
                    )?;
                    self.counters.trades_submitted.fetch_add(1, Ordering::Relaxed);
                    observe(handle);
                }
            }
            FeedRecord::Reconnect { key: Some(key) } => {
                info!("Feed reconnected for {}, re-arming funding tracking", key);
                self.coalescers.reset(&key);
            }
            FeedRecord::Reconnect { key: None } => {
                info!("Feed reconnected, re-arming funding tracking");
                self.coalescers.reset_all();
            }
        }
        Ok(())
    }

    /// Consume the feed until it ends or `shutdown` resolves, then drain
    pub async fn run<S>(
        mut self,
        mut feed: mpsc::UnboundedReceiver<FeedRecord>,
        shutdown: S,
    ) -> Result<RunSummary>
    where
        S: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                record = feed.recv() => match record {
                    Some(record) => {
                        if let Err(e) = self.handle_record(record) {
                            warn!("Failed to handle feed record: {}", e);
                        }
                    }
                    None => {
                        info!("Feed closed");
                        self.feed_closed = true;
                        break;
                    }
                },
                _ = &mut shutdown => {
                    info!("Shutdown requested, no longer reading the feed");
                    break;
                }
            }
        }

        Ok(self.finish().await)
    }

    /// Stop accepting work and wait for queued writes
    pub async fn finish(self) -> RunSummary {
        self.scheduler.close();
        let drained = self.scheduler.drain_timeout(self.drain_timeout).await;
        if !drained {
            warn!(
                "Shutdown timed out after {:?} with {} ledger write(s) outstanding",
                self.drain_timeout,
                self.scheduler.stats().live_tasks
            );
        }

        let summary = RunSummary {
            records: self.counters.records.load(Ordering::Relaxed),
            trades_submitted: self.counters.trades_submitted.load(Ordering::Relaxed),
            funding_submitted: self.counters.funding_submitted.load(Ordering::Relaxed),
            funding_skipped: self.counters.funding_skipped.load(Ordering::Relaxed),
            feed_closed: self.feed_closed,
            drained,
            scheduler: self.scheduler.stats(),
        };
        info!(
            "Run finished: records={}, trades={}, funding={}, attempts={}, failed={}",
            summary.records,
            summary.trades_submitted,
            summary.funding_submitted,
            summary.scheduler.attempts_started,
            summary.scheduler.failed
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::StatusSnapshot;
    use crate::ledger::{EntryKind, MockLedgerSink};
    use anyhow::anyhow;
    use chrono::Utc;
    use rust_decimal::Decimal;
    use std::sync::atomic::AtomicU32;

    fn fast_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.retry.min_delay_ms = 10;
        config.retry.max_delay_ms = 50;
        config.retry.jitter = false;
        config.scheduler.drain_timeout_secs = 60;
        config
    }

    fn fill(id: i64) -> TradeFill {
        TradeFill {
            id,
            symbol: "tBTCF0:USTF0".to_string(),
            mts: 1_700_000_000_000,
            order_id: 1,
            exec_amount: 0.1,
            exec_price: 100.0,
            order_type: None,
            order_price: None,
            maker: false,
            fee: -0.01,
            fee_currency: None,
            client_order_id: None,
        }
    }

    fn entry(kind: EntryKind) -> LedgerEntry {
        LedgerEntry {
            trade_id: None,
            timestamp: Utc::now(),
            kind,
            size: Decimal::ZERO,
            exec_price: Decimal::ZERO,
            funding_amount: Decimal::ZERO,
            fee_rate: Decimal::ZERO,
            page: 0,
        }
    }

    fn status(ts: i64, period_end: i64, rate: f64) -> FeedRecord {
        FeedRecord::Status {
            key: "deriv:tBTCF0:USTF0".to_string(),
            snapshot: StatusSnapshot::new(ts, period_end, rate, 100.0),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_trade_failure_is_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let seen = Arc::clone(&calls);
        let mut ledger = MockLedgerSink::new();
        ledger
            .expect_apply_trade()
            .times(2)
            .returning(move |_| {
                if seen.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(anyhow!("429 rate limited"))
                } else {
                    Ok(entry(EntryKind::Buy))
                }
            });

        let mut orchestrator = Orchestrator::new(&fast_config(), Arc::new(ledger)).unwrap();
        orchestrator
            .handle_record(FeedRecord::Trade {
                phase: None,
                fill: fill(1),
            })
            .unwrap();

        let summary = orchestrator.finish().await;
        assert!(summary.drained);
        assert_eq!(summary.trades_submitted, 1);
        assert_eq!(summary.scheduler.attempts_started, 2);
        assert_eq!(summary.scheduler.succeeded, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_noise_becomes_single_funding_write() {
        let mut ledger = MockLedgerSink::new();
        ledger
            .expect_apply_funding()
            .times(1)
            .withf(|event| event.previous_period_end_ts == 100 && event.next_period_end_ts == 200)
            .returning(|_| Ok(Some(entry(EntryKind::Funding))));

        let mut orchestrator = Orchestrator::new(&fast_config(), Arc::new(ledger)).unwrap();
        for (ts, period_end) in [(1, 100), (2, 100), (3, 100), (4, 200), (5, 200)] {
            orchestrator.handle_record(status(ts, period_end, 0.0001)).unwrap();
        }

        let summary = orchestrator.finish().await;
        assert_eq!(summary.funding_submitted, 1);
        assert_eq!(summary.records, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_rate_boundary_is_not_submitted() {
        let ledger = MockLedgerSink::new();
        let mut orchestrator = Orchestrator::new(&fast_config(), Arc::new(ledger)).unwrap();

        orchestrator.handle_record(status(1, 100, 0.0)).unwrap();
        orchestrator.handle_record(status(2, 200, 0.0)).unwrap();

        let summary = orchestrator.finish().await;
        assert_eq!(summary.funding_submitted, 0);
        assert_eq!(summary.funding_skipped, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_rearms_without_emitting() {
        let ledger = MockLedgerSink::new();
        let mut orchestrator = Orchestrator::new(&fast_config(), Arc::new(ledger)).unwrap();

        orchestrator.handle_record(status(1, 100, 0.0001)).unwrap();
        orchestrator
            .handle_record(FeedRecord::Reconnect { key: None })
            .unwrap();
        orchestrator.handle_record(status(2, 200, 0.0001)).unwrap();

        let stats = orchestrator
            .coalescers()
            .stats("deriv:tBTCF0:USTF0")
            .unwrap();
        assert_eq!(stats.emitted, 0);
        assert_eq!(stats.resets, 1);
        assert_eq!(orchestrator.finish().await.funding_submitted, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_symbol_filter_drops_other_markets() {
        let mut config = fast_config();
        config.feed.filter_symbol = true;
        let ledger = MockLedgerSink::new();
        let mut orchestrator = Orchestrator::new(&config, Arc::new(ledger)).unwrap();

        let mut other = fill(5);
        other.symbol = "tETHF0:USTF0".to_string();
        orchestrator
            .handle_record(FeedRecord::Trade {
                phase: None,
                fill: other,
            })
            .unwrap();

        assert_eq!(orchestrator.finish().await.trades_submitted, 0);
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let mut config = AppConfig::default();
        config.retry.min_delay_ms = 10_000;
        config.retry.max_delay_ms = 1;
        let result = Orchestrator::new(&config, Arc::new(MockLedgerSink::new()));
        assert!(result.is_err());
    }
}
