//! `tally track` - the long-running tracker

use anyhow::{Context, Result};
use clap::Args;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::feed::{spawn_replay, ReplaySource};
use crate::ledger::{JsonlLedger, LedgerSink, MemoryLedger};
use crate::orchestrator::{Orchestrator, RunSummary};

#[derive(Args, Debug)]
pub struct TrackArgs {
    /// JSON-lines feed file, or `-` for stdin
    #[arg(short, long, default_value = "-")]
    pub feed: String,

    /// Ledger file (overrides `ledger.path`)
    #[arg(short, long)]
    pub ledger: Option<String>,

    /// Ledger writes in flight at once (overrides `scheduler.concurrency`)
    #[arg(long)]
    pub concurrency: Option<usize>,
}

impl TrackArgs {
    pub async fn run<S>(self, mut config: AppConfig, shutdown: S) -> Result<RunSummary>
    where
        S: Future<Output = ()>,
    {
        if let Some(path) = self.ledger {
            config.ledger.path = Some(path);
        }
        if let Some(concurrency) = self.concurrency {
            config.scheduler.concurrency = concurrency;
        }

        let ledger: Arc<dyn LedgerSink> = match &config.ledger.path {
            Some(path) => {
                let ledger = JsonlLedger::open(path)
                    .await
                    .with_context(|| format!("Failed to open ledger {}", path))?;
                let book = ledger.book().await;
                info!(
                    "Ledger {} opened: {} rows, position={}, page={}",
                    path,
                    book.rows(),
                    book.position_size(),
                    book.page()
                );
                Arc::new(ledger)
            }
            None => {
                warn!("No ledger path configured, rows are kept in memory only");
                Arc::new(MemoryLedger::new())
            }
        };

        let orchestrator = Orchestrator::new(&config, ledger)?;
        info!(
            "Tracking {} (status {}), concurrency={}, max_attempts={}",
            config.feed.symbol,
            config.feed.status_key(),
            config.scheduler.concurrency,
            config.retry.max_attempts
        );

        let (records, reader) = spawn_replay(ReplaySource::parse(&self.feed));
        let summary = orchestrator.run(records, shutdown).await?;

        // A closed feed means the reader has returned; a shutdown leaves
        // it blocked on input
        if summary.feed_closed || reader.is_finished() {
            match reader.await {
                Ok(Ok(forwarded)) => debug!("Feed reader forwarded {} records", forwarded),
                Ok(Err(e)) => {
                    return Err(anyhow::Error::new(e)
                        .context(format!("Failed to read feed {}", self.feed)));
                }
                Err(e) => anyhow::bail!("Feed reader for {} panicked: {}", self.feed, e),
            }
        } else {
            reader.abort();
        }

        println!(
            "records={} trades={} funding={} attempts={} retries={} succeeded={} failed={}{}",
            summary.records,
            summary.trades_submitted,
            summary.funding_submitted,
            summary.scheduler.attempts_started,
            summary.scheduler.retries,
            summary.scheduler.succeeded,
            summary.scheduler.failed,
            if summary.drained { "" } else { " (drain timed out)" }
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(feed: &str) -> TrackArgs {
        TrackArgs {
            feed: feed.to_string(),
            ledger: None,
            concurrency: None,
        }
    }

    #[tokio::test]
    async fn test_unreadable_feed_fails_the_run() {
        let missing = std::env::temp_dir()
            .join(format!("tally-missing-{}", std::process::id()))
            .join("feed.jsonl");

        let result = args(&missing.to_string_lossy())
            .run(AppConfig::default(), std::future::pending::<()>())
            .await;

        let err = result.unwrap_err();
        assert!(err.to_string().contains("Failed to read feed"), "{err:#}");
    }

    #[tokio::test]
    async fn test_readable_feed_succeeds() {
        let feed = std::env::temp_dir().join(format!("tally-feed-{}.jsonl", std::process::id()));
        std::fs::write(&feed, "{\"type\":\"reconnect\"}\n").unwrap();

        let summary = args(&feed.to_string_lossy())
            .run(AppConfig::default(), std::future::pending::<()>())
            .await
            .unwrap();

        assert!(summary.feed_closed);
        assert_eq!(summary.records, 1);
        let _ = std::fs::remove_file(&feed);
    }
}
