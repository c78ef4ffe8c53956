//! Tally CLI
//!
//! Commands:
//! - `tally track`         - Book a recorded or piped feed into the ledger
//! - `tally replay-status` - Show the funding boundaries in a status log
//! - `tally ledger`        - Print ledger rows, newest first
//! - `tally config`        - Show or validate the effective configuration

pub mod config;
pub mod ledger;
pub mod status;
pub mod track;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Position and funding ledger tracker
#[derive(Parser, Debug)]
#[command(name = "tally")]
#[command(author, version, about = "Books exchange fills and funding payments into a ledger")]
pub struct Cli {
    /// Directory holding default.toml and per-environment overrides
    #[arg(short, long, global = true, default_value = "config", env = "TALLY_CONFIG_DIR")]
    pub config_dir: PathBuf,

    /// Emit JSON logs on the console
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Consume a JSON-lines feed and book trades and funding
    Track(track::TrackArgs),

    /// Replay a status log through the funding coalescer
    ReplayStatus(status::ReplayStatusArgs),

    /// Print ledger rows in reverse chronological order
    Ledger(ledger::LedgerArgs),

    /// Configuration management
    #[command(subcommand)]
    Config(config::ConfigCommands),
}
