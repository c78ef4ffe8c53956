//! Exchange feed plumbing
//!
//! The live exchange connection is outside this crate; the tracker
//! consumes [`FeedRecord`]s from any producer through an unbounded channel,
//! so the producer never blocks on the ledger side.

pub mod assembler;
pub mod replay;

pub use assembler::TradeAssembler;
pub use replay::{read_snapshots, spawn_replay, ReplaySource};

use serde::{Deserialize, Serialize};

use crate::domain::{StatusSnapshot, TradeFill};

/// Stage of a trade message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradePhase {
    /// Execution notice (`te`); fee not final yet
    Executed,
    /// Final update (`tu`) carrying the fee
    Updated,
}

/// One record from the exchange feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FeedRecord {
    Trade {
        /// Absent for already-final fills
        #[serde(default, skip_serializing_if = "Option::is_none")]
        phase: Option<TradePhase>,
        fill: TradeFill,
    },
    Status {
        key: String,
        snapshot: StatusSnapshot,
    },
    /// The connection was re-established; funding baselines are stale
    Reconnect {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        key: Option<String>,
    },
}

impl FeedRecord {
    pub fn parse_line(line: &str) -> crate::error::Result<Self> {
        serde_json::from_str(line)
            .map_err(|e| crate::error::TallyError::InvalidRecord(format!("{}: {}", e, line)))
    }
}
