//! Exponential backoff with optional jitter.
//!
//! Kept as free functions so the delay schedule can be checked without a
//! scheduler or a runtime.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Result, TallyError};

/// Retry/backoff settings applied to a single submitted task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first one (default: 5)
    pub max_attempts: u32,
    /// Delay before the second attempt in milliseconds (default: 500)
    pub min_delay_ms: u64,
    /// Upper bound for any delay in milliseconds (default: 5000)
    pub max_delay_ms: u64,
    /// Growth factor per attempt (default: 2.0)
    pub factor: f64,
    /// Scale each delay by a random value in [0.5, 1.5) (default: true)
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            min_delay_ms: 500,
            max_delay_ms: 5000,
            factor: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Same settings with jitter disabled
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Reject settings that would make the delay schedule meaningless
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts < 1 {
            return Err(TallyError::InvalidConfig(format!(
                "retry.max_attempts must be >= 1, got {}",
                self.max_attempts
            )));
        }
        if self.min_delay_ms > self.max_delay_ms {
            return Err(TallyError::InvalidConfig(format!(
                "retry.min_delay_ms ({}) must not exceed retry.max_delay_ms ({})",
                self.min_delay_ms, self.max_delay_ms
            )));
        }
        if !self.factor.is_finite() || self.factor <= 0.0 {
            return Err(TallyError::InvalidConfig(format!(
                "retry.factor must be a positive finite number, got {}",
                self.factor
            )));
        }
        Ok(())
    }
}

/// Un-jittered delay in milliseconds awaited before `attempt`.
///
/// `min_delay * factor^(attempt-1)`, clamped to `max_delay`.
fn base_delay_ms(attempt: u32, config: &RetryConfig) -> f64 {
    let exp = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
    let grown = config.min_delay_ms as f64 * config.factor.powi(exp);
    // powi saturates to +inf (or NaN for 0 * inf), both clamp to max
    if grown.is_nan() {
        return config.max_delay_ms as f64;
    }
    grown.min(config.max_delay_ms as f64)
}

/// Delay before `attempt` with jitter ignored
pub fn base_delay(attempt: u32, config: &RetryConfig) -> Duration {
    Duration::from_secs_f64(base_delay_ms(attempt, config) / 1000.0)
}

/// Delay to await before running `attempt` (1-based).
///
/// Attempt 1 is never delayed by the scheduler, but the function is total
/// and returns `min_delay` for it. With jitter enabled the base delay is
/// scaled by a uniform value in `[0.5, 1.5)` and floored to whole
/// milliseconds.
pub fn backoff_delay<R: Rng + ?Sized>(attempt: u32, config: &RetryConfig, rng: &mut R) -> Duration {
    if !config.jitter {
        return base_delay(attempt, config);
    }
    let base = base_delay_ms(attempt, config);
    let scale: f64 = rng.gen_range(0.5..1.5);
    Duration::from_millis((base * scale).floor() as u64)
}
