use anyhow::{Context, Result};
use clap::Parser;
use tally::cli::{Cli, Commands};
use tally::config::AppConfig;
use tracing::info;

mod main_runtime;

use main_runtime::{init_logging, init_logging_simple, shutdown_signal};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load_from(&cli.config_dir).with_context(|| {
        format!("Failed to load configuration from {}", cli.config_dir.display())
    })?;

    match cli.command {
        Commands::Track(args) => {
            init_logging(&config.logging, cli.json_logs);
            config.ensure_valid()?;
            let summary = args
                .run(config, async {
                    shutdown_signal().await;
                    info!("Received shutdown signal");
                })
                .await?;
            if summary.scheduler.failed > 0 {
                anyhow::bail!(
                    "{} ledger write(s) failed after exhausting retries",
                    summary.scheduler.failed
                );
            }
        }
        Commands::ReplayStatus(args) => {
            init_logging_simple();
            args.run().await?;
        }
        Commands::Ledger(args) => {
            init_logging_simple();
            args.run().await?;
        }
        Commands::Config(cmd) => {
            init_logging_simple();
            cmd.run(&config)?;
        }
    }

    Ok(())
}
