//! Append-only JSON-lines ledger file.
//!
//! A row is committed to the running book only after its line has been
//! written and flushed, so a failed write can be retried without booking the
//! trade twice. A write that fails part way is cut back off the file; a
//! line torn by a crash is dropped when the ledger is next opened.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{LedgerBook, LedgerEntry, LedgerSink};
use crate::domain::{FundingEvent, TradeFill};
use crate::error::{Result, TallyError};

/// Byte length of the newline-terminated part of `content`
fn complete_len(content: &[u8]) -> usize {
    content
        .iter()
        .rposition(|b| *b == b'\n')
        .map_or(0, |i| i + 1)
}

/// Read every row of a ledger file in write order.
///
/// An unterminated last line is an interrupted write and is skipped with a
/// warning; any other malformed line is an error.
pub async fn read_entries(path: impl AsRef<Path>) -> Result<Vec<LedgerEntry>> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).await?;
    let mut entries = Vec::new();

    for (index, line) in content.split_inclusive('\n').enumerate() {
        let terminated = line.ends_with('\n');
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str(line) {
            Ok(entry) => entries.push(entry),
            Err(e) if !terminated => {
                warn!(
                    "{}:{}: ignoring unterminated last line ({})",
                    path.display(),
                    index + 1,
                    e
                );
            }
            Err(e) => {
                return Err(TallyError::Ledger(format!(
                    "{}:{}: {}",
                    path.display(),
                    index + 1,
                    e
                )))
            }
        }
    }
    Ok(entries)
}

/// Cut an unterminated last line off the file so new rows start clean
async fn drop_torn_tail(path: &Path) -> Result<()> {
    let content = fs::read(path).await?;
    let keep = complete_len(&content);
    if keep == content.len() {
        return Ok(());
    }

    warn!(
        "Ledger {} ends with a torn line ({} bytes), truncating it",
        path.display(),
        content.len() - keep
    );
    let file = OpenOptions::new().write(true).open(path).await?;
    file.set_len(keep as u64).await?;
    file.sync_all().await?;
    Ok(())
}

/// Ledger persisted as one JSON object per line
#[derive(Debug)]
pub struct JsonlLedger {
    path: PathBuf,
    book: Mutex<LedgerBook>,
}

impl JsonlLedger {
    /// Open (or create) a ledger file, resuming the position it records
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }

        let book = if fs::try_exists(&path).await? {
            drop_torn_tail(&path).await?;
            let entries = read_entries(&path).await?;
            LedgerBook::replay(&entries)
        } else {
            LedgerBook::default()
        };

        info!(
            "Working on ledger {}, rows = {}, page = {}, positionSize = {}",
            path.display(),
            book.rows(),
            book.page(),
            book.position_size()
        );

        Ok(Self {
            path,
            book: Mutex::new(book),
        })
    }

    pub async fn book(&self) -> LedgerBook {
        *self.book.lock().await
    }

    async fn append(&self, entry: &LedgerEntry) -> Result<()> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        let committed = file.metadata().await?.len();

        let written = async {
            file.write_all(line.as_bytes()).await?;
            file.flush().await
        }
        .await;
        if let Err(e) = written {
            // leave no partial row behind for the retry to append after
            if let Err(cut) = file.set_len(committed).await {
                warn!(
                    "Could not cut partial row from {}: {}",
                    self.path.display(),
                    cut
                );
            }
            return Err(e.into());
        }

        debug!("Appended {} row to {}", entry.kind, self.path.display());
        Ok(())
    }
}

#[async_trait]
impl LedgerSink for JsonlLedger {
    async fn apply_trade(&self, fill: &TradeFill) -> anyhow::Result<LedgerEntry> {
        let mut book = self.book.lock().await;
        let mut next = *book;
        let entry = next.record_trade(fill)?;
        self.append(&entry).await?;
        *book = next;
        info!(
            "{} - amount={}, price={}, fee={}",
            entry.kind, entry.size, entry.exec_price, entry.fee_rate
        );
        Ok(entry)
    }

    async fn apply_funding(&self, event: &FundingEvent) -> anyhow::Result<Option<LedgerEntry>> {
        let mut book = self.book.lock().await;
        let mut next = *book;
        let Some(entry) = next.record_funding(event)? else {
            return Ok(None);
        };
        self.append(&entry).await?;
        *book = next;
        info!(
            "Funding - [ts={} nextTs={}] {}",
            event.status_ts, event.next_period_end_ts, entry.funding_amount
        );
        Ok(Some(entry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::EntryKind;
    use rust_decimal_macros::dec;

    fn temp_path(name: &str) -> PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        std::env::temp_dir().join(format!("tally-{}-{}-{}.jsonl", name, std::process::id(), nanos))
    }

    fn fill(id: i64, amount: f64) -> TradeFill {
        TradeFill {
            id,
            symbol: "tBTCF0:USTF0".to_string(),
            mts: 1_700_000_000_000 + id,
            order_id: id,
            exec_amount: amount,
            exec_price: 200.0,
            order_type: None,
            order_price: None,
            maker: false,
            fee: -0.1,
            fee_currency: None,
            client_order_id: None,
        }
    }

    #[tokio::test]
    async fn test_rows_persist_and_book_resumes() {
        let path = temp_path("resume");

        {
            let ledger = JsonlLedger::open(&path).await.unwrap();
            ledger.apply_trade(&fill(1, 0.5)).await.unwrap();
            ledger.apply_trade(&fill(2, 0.25)).await.unwrap();
        }

        let entries = read_entries(&path).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].kind, EntryKind::Buy);
        assert_eq!(entries[1].trade_id, Some(2));

        let reopened = JsonlLedger::open(&path).await.unwrap();
        let book = reopened.book().await;
        assert_eq!(book.position_size(), dec!(-0.75));
        assert_eq!(book.rows(), 2);

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_torn_last_line_is_dropped_on_open() {
        use std::io::Write;

        let path = temp_path("torn");
        {
            let ledger = JsonlLedger::open(&path).await.unwrap();
            ledger.apply_trade(&fill(1, 0.5)).await.unwrap();
        }
        std::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .unwrap()
            .write_all(br#"{"trade_id":2,"timest"#)
            .unwrap();

        // readers skip the torn line without touching the file
        assert_eq!(read_entries(&path).await.unwrap().len(), 1);

        let ledger = JsonlLedger::open(&path).await.unwrap();
        assert_eq!(ledger.book().await.rows(), 1);
        assert!(std::fs::read(&path).unwrap().ends_with(b"\n"));

        // the next row starts on its own line
        ledger.apply_trade(&fill(3, 0.25)).await.unwrap();
        let entries = read_entries(&path).await.unwrap();
        let ids: Vec<_> = entries.iter().map(|e| e.trade_id).collect();
        assert_eq!(ids, vec![Some(1), Some(3)]);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_complete_len_stops_at_last_newline() {
        assert_eq!(complete_len(b""), 0);
        assert_eq!(complete_len(b"{}\n"), 3);
        assert_eq!(complete_len(b"{}\n{\"a"), 3);
        assert_eq!(complete_len(b"{\"a"), 0);
    }

    #[tokio::test]
    async fn test_malformed_line_reports_location() {
        let path = temp_path("malformed");
        std::fs::write(&path, "{\"not\": \"an entry\"}\n").unwrap();

        let err = read_entries(&path).await.unwrap_err();
        assert!(err.to_string().contains(":1:"), "{err}");

        let _ = std::fs::remove_file(&path);
    }
}
