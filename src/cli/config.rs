//! Configuration management commands
//!
//! tally config show     - Print the effective configuration as TOML
//! tally config validate - Check the effective configuration

use anyhow::{Context, Result};
use clap::Subcommand;

use crate::config::AppConfig;

/// Configuration-related commands
#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Show the effective configuration (files + environment)
    Show {
        /// Configuration section to show
        #[arg(short, long)]
        section: Option<String>,
    },

    /// Validate the effective configuration
    Validate,
}

impl ConfigCommands {
    pub fn run(self, config: &AppConfig) -> Result<()> {
        match self {
            Self::Show { section } => show_config(config, section.as_deref()),
            Self::Validate => validate_config(config),
        }
    }
}

fn show_config(config: &AppConfig, section: Option<&str>) -> Result<()> {
    let value = toml::Value::try_from(config).context("Failed to serialize configuration")?;

    let rendered = match section {
        Some(name) => {
            let section = value
                .get(name)
                .with_context(|| format!("Unknown configuration section '{}'", name))?;
            format!("[{}]\n{}", name, toml::to_string_pretty(section)?)
        }
        None => toml::to_string_pretty(&value)?,
    };
    println!("{}", rendered);
    Ok(())
}

fn validate_config(config: &AppConfig) -> Result<()> {
    match config.validate() {
        Ok(()) => {
            println!("\x1b[32m✓ Configuration is valid\x1b[0m");
            Ok(())
        }
        Err(errors) => {
            for error in &errors {
                println!("\x1b[31m✗ {}\x1b[0m", error);
            }
            anyhow::bail!("{} configuration error(s)", errors.len())
        }
    }
}
