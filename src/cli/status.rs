//! `tally replay-status` - offline check of funding boundary detection

use anyhow::Result;
use clap::Args;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::coalescer::StatusCoalescer;
use crate::domain::{ms_to_utc, FundingEvent};
use crate::feed::read_snapshots;

#[derive(Args, Debug)]
pub struct ReplayStatusArgs {
    /// Status log, one JSON snapshot per line
    #[arg(short, long)]
    pub file: PathBuf,

    /// Status key to report events under
    #[arg(short, long, default_value = "deriv:tBTCF0:USTF0")]
    pub key: String,
}

impl ReplayStatusArgs {
    pub async fn run(self) -> Result<Vec<FundingEvent>> {
        let snapshots = read_snapshots(&self.file).await?;

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let mut coalescer = StatusCoalescer::new(self.key, move |event: &FundingEvent| {
            sink.lock()
                .map_err(|_| anyhow::anyhow!("event buffer poisoned"))?
                .push(event.clone());
            Ok(())
        });

        for snapshot in &snapshots {
            coalescer.handle_snapshot(snapshot);
        }

        let events = events
            .lock()
            .map_err(|_| anyhow::anyhow!("event buffer poisoned"))?
            .clone();

        println!(
            "{} snapshots, {} funding boundaries",
            snapshots.len(),
            events.len()
        );
        for event in &events {
            let at = ms_to_utc(event.status_ts)
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| event.status_ts.to_string());
            println!(
                "  {}  {} -> {}  rate={}  mark={}",
                at,
                event.previous_period_end_ts,
                event.next_period_end_ts,
                event.funding_rate,
                event.mark_price
            );
        }
        Ok(events)
    }
}
