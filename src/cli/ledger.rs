//! `tally ledger` - print ledger rows

use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;

use crate::ledger::{read_entries, LedgerBook, LedgerEntry};

#[derive(Args, Debug)]
pub struct LedgerArgs {
    /// Ledger file
    #[arg(short, long)]
    pub file: PathBuf,

    /// Show at most this many rows
    #[arg(short = 'n', long)]
    pub limit: Option<usize>,
}

/// Rows newest first, as the sheet presents them
pub fn newest_first(mut entries: Vec<LedgerEntry>, limit: Option<usize>) -> Vec<LedgerEntry> {
    // stable: rows written in the same millisecond keep file order reversed
    entries.reverse();
    entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    if let Some(limit) = limit {
        entries.truncate(limit);
    }
    entries
}

impl LedgerArgs {
    pub async fn run(self) -> Result<()> {
        let entries = read_entries(&self.file)
            .await
            .with_context(|| format!("Failed to read ledger {}", self.file.display()))?;
        let book = LedgerBook::replay(&entries);

        println!(
            "{} rows, position={}, page={}",
            book.rows(),
            book.position_size(),
            book.page()
        );
        println!(
            "{:<25} {:<8} {:>14} {:>14} {:>14} {:>12} {:>5}",
            "timestamp", "kind", "size", "price", "funding", "fee_rate", "page"
        );
        for entry in newest_first(entries, self.limit) {
            println!(
                "{:<25} {:<8} {:>14} {:>14} {:>14} {:>12} {:>5}",
                entry.timestamp.format("%Y-%m-%d %H:%M:%S%.3f").to_string(),
                entry.kind.to_string(),
                entry.size,
                entry.exec_price,
                entry.funding_amount,
                entry.fee_rate,
                entry.page
            );
        }
        Ok(())
    }
}
