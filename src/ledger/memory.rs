use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::info;

use super::{LedgerBook, LedgerEntry, LedgerSink};
use crate::domain::{FundingEvent, TradeFill};

#[derive(Debug, Default)]
struct MemoryState {
    book: LedgerBook,
    entries: Vec<LedgerEntry>,
}

/// In-process ledger, used for dry runs and tests
#[derive(Debug, Default)]
pub struct MemoryLedger {
    state: Mutex<MemoryState>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn entries(&self) -> Vec<LedgerEntry> {
        self.state.lock().await.entries.clone()
    }

    pub async fn book(&self) -> LedgerBook {
        self.state.lock().await.book
    }
}

#[async_trait]
impl LedgerSink for MemoryLedger {
    async fn apply_trade(&self, fill: &TradeFill) -> anyhow::Result<LedgerEntry> {
        let mut state = self.state.lock().await;
        let entry = state.book.record_trade(fill)?;
        info!(
            "{} - amount={}, price={}, fee={}",
            entry.kind, entry.size, entry.exec_price, entry.fee_rate
        );
        state.entries.push(entry.clone());
        Ok(entry)
    }

    async fn apply_funding(&self, event: &FundingEvent) -> anyhow::Result<Option<LedgerEntry>> {
        let mut state = self.state.lock().await;
        let entry = state.book.record_funding(event)?;
        if let Some(entry) = &entry {
            info!(
                "Funding - [ts={} nextTs={}] {}",
                event.status_ts, event.next_period_end_ts, entry.funding_amount
            );
            state.entries.push(entry.clone());
        }
        Ok(entry)
    }
}
