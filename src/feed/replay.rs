//! Replay of recorded feeds from JSON-lines files.

use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::FeedRecord;
use crate::domain::StatusSnapshot;
use crate::error::{Result, TallyError};

/// Read a status log: one JSON snapshot per line, in arrival order
pub async fn read_snapshots(path: impl AsRef<Path>) -> Result<Vec<StatusSnapshot>> {
    let path = path.as_ref();
    let file = File::open(path).await?;
    let mut lines = BufReader::new(file).lines();
    let mut snapshots = Vec::new();
    let mut line_no = 0usize;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }
        let snapshot = serde_json::from_str(&line).map_err(|e| {
            TallyError::InvalidRecord(format!("{}:{}: {}", path.display(), line_no, e))
        })?;
        snapshots.push(snapshot);
    }
    Ok(snapshots)
}

/// Where a replayed feed is read from
#[derive(Debug, Clone)]
pub enum ReplaySource {
    File(PathBuf),
    Stdin,
}

impl ReplaySource {
    /// `-` selects stdin
    pub fn parse(arg: &str) -> Self {
        if arg == "-" {
            ReplaySource::Stdin
        } else {
            ReplaySource::File(PathBuf::from(arg))
        }
    }
}

/// Stream feed records from `source` into an unbounded channel.
///
/// Malformed lines are logged and skipped. The channel closes at end of
/// input; the join handle reports how many records were forwarded.
pub fn spawn_replay(
    source: ReplaySource,
) -> (mpsc::UnboundedReceiver<FeedRecord>, JoinHandle<Result<u64>>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(async move {
        match source {
            ReplaySource::File(path) => {
                let file = File::open(&path).await?;
                info!("Replaying feed from {}", path.display());
                forward_lines(BufReader::new(file), tx).await
            }
            ReplaySource::Stdin => {
                info!("Replaying feed from stdin");
                forward_lines(BufReader::new(tokio::io::stdin()), tx).await
            }
        }
    });
    (rx, handle)
}

async fn forward_lines<R>(reader: R, tx: mpsc::UnboundedSender<FeedRecord>) -> Result<u64>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut forwarded = 0u64;

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        match FeedRecord::parse_line(&line) {
            Ok(record) => {
                if tx.send(record).is_err() {
                    // consumer stopped
                    break;
                }
                forwarded += 1;
            }
            Err(e) => warn!("Skipping feed line: {}", e),
        }
    }
    info!("Feed replay finished, {} records forwarded", forwarded);
    Ok(forwarded)
}
