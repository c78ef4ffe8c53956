//! Ledger sinks
//!
//! The bookkeeping side of the tracker: every trade fill and every funding
//! event that reaches a sink becomes one ledger row.
//! - `book` holds the running position and page numbering
//! - `memory` keeps rows in process
//! - `jsonl` appends rows to a JSON-lines file

pub mod book;
pub mod jsonl;
pub mod memory;

pub use book::LedgerBook;
pub use jsonl::{read_entries, JsonlLedger};
pub use memory::MemoryLedger;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::{FundingEvent, TradeFill};

/// Kind of ledger row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryKind {
    Buy,
    Sell,
    Funding,
}

impl std::fmt::Display for EntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntryKind::Buy => write!(f, "Buy"),
            EntryKind::Sell => write!(f, "Sell"),
            EntryKind::Funding => write!(f, "Funding"),
        }
    }
}

/// One ledger row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Exchange trade id; empty for funding rows
    pub trade_id: Option<i64>,
    pub timestamp: DateTime<Utc>,
    pub kind: EntryKind,
    /// Position change, recorded as the negated executed amount
    pub size: Decimal,
    pub exec_price: Decimal,
    pub funding_amount: Decimal,
    /// Fee as a fraction of notional
    pub fee_rate: Decimal,
    /// Page the row belongs to; a new page starts once the position is flat
    pub page: u32,
}

/// Downstream bookkeeping capability
///
/// Calls may fail transiently; the caller retries any failure the same
/// way, so implementations should make a failed call leave no partial row.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LedgerSink: Send + Sync {
    /// Append a trade row
    async fn apply_trade(&self, fill: &TradeFill) -> anyhow::Result<LedgerEntry>;

    /// Append a funding row; `None` when nothing is owed (flat position or
    /// zero rate)
    async fn apply_funding(&self, event: &FundingEvent) -> anyhow::Result<Option<LedgerEntry>>;
}
