use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::TallyError;
use crate::scheduler::RetryConfig;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Ledger writes allowed in flight at once (default: 1)
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Deadline for a single ledger write attempt; none if unset
    #[serde(default)]
    pub attempt_timeout_ms: Option<u64>,
    /// Fixed seed for backoff jitter, for reproducible runs
    #[serde(default)]
    pub jitter_seed: Option<u64>,
    /// How long shutdown waits for queued writes (default: 120s)
    #[serde(default = "default_drain_timeout_secs")]
    pub drain_timeout_secs: u64,
}

fn default_concurrency() -> usize {
    1
}

fn default_drain_timeout_secs() -> u64 {
    120
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            attempt_timeout_ms: None,
            jitter_seed: None,
            drain_timeout_secs: default_drain_timeout_secs(),
        }
    }
}

impl SchedulerConfig {
    pub fn attempt_timeout(&self) -> Option<Duration> {
        self.attempt_timeout_ms.map(Duration::from_millis)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Trading pair whose fills are tracked (e.g., "tBTCF0:USTF0")
    #[serde(default = "default_symbol")]
    pub symbol: String,
    /// Status channel key carrying funding data (e.g., "deriv:tBTCF0:USTF0")
    #[serde(default)]
    pub status_key: Option<String>,
    /// Only book fills for `symbol`
    #[serde(default)]
    pub filter_symbol: bool,
}

fn default_symbol() -> String {
    "tBTCF0:USTF0".to_string()
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            symbol: default_symbol(),
            status_key: None,
            filter_symbol: false,
        }
    }
}

impl FeedConfig {
    /// Configured status key, or the derivative key derived from the symbol
    pub fn status_key(&self) -> String {
        self.status_key
            .clone()
            .unwrap_or_else(|| format!("deriv:{}", self.symbol))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LedgerConfig {
    /// JSON-lines ledger file; rows are kept in memory when unset
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
    /// Directory for daily rolling log files; console only if unset
    #[serde(default)]
    pub dir: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            dir: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            // Start with default values
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .set_default("scheduler.concurrency", 1)?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("TALLY_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (TALLY__RETRY__MAX_ATTEMPTS, etc.)
            .add_source(
                Environment::with_prefix("TALLY")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.scheduler.concurrency < 1 {
            errors.push("scheduler.concurrency must be at least 1".to_string());
        }

        if self.scheduler.attempt_timeout_ms == Some(0) {
            errors.push("scheduler.attempt_timeout_ms must be positive when set".to_string());
        }

        if let Err(e) = self.retry.validate() {
            errors.push(e.to_string());
        }

        if self.feed.symbol.trim().is_empty() {
            errors.push("feed.symbol must not be empty".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// `validate`, folded into a single error
    pub fn ensure_valid(&self) -> crate::error::Result<()> {
        self.validate()
            .map_err(|errors| TallyError::InvalidConfig(errors.join("; ")))
    }
}
