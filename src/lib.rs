pub mod cli;
pub mod coalescer;
pub mod config;
pub mod domain;
pub mod error;
pub mod feed;
pub mod ledger;
pub mod orchestrator;
pub mod scheduler;

pub use coalescer::{CoalescerRegistry, StatusCoalescer};
pub use config::AppConfig;
pub use domain::{FundingEvent, StatusSnapshot, TradeFill};
pub use error::{Result, TallyError, TaskError};
pub use feed::{FeedRecord, TradeAssembler};
pub use ledger::{JsonlLedger, LedgerEntry, LedgerSink, MemoryLedger};
pub use orchestrator::{Orchestrator, RunSummary};
pub use scheduler::{RetryConfig, RetryScheduler, SchedulerStats, TaskHandle, TaskId};
