use thiserror::Error;

use crate::scheduler::TaskId;

/// Main error type for the tracker
#[derive(Error, Debug)]
pub enum TallyError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Feed errors
    #[error("Invalid feed record: {0}")]
    InvalidRecord(String),

    // Ledger errors
    #[error("Ledger error: {0}")]
    Ledger(String),

    // Scheduler errors
    #[error("Scheduler is closed, task not accepted: {0}")]
    SchedulerClosed(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for TallyError
pub type Result<T> = std::result::Result<T, TallyError>;

/// Terminal outcome of a task that did not succeed.
///
/// Intermediate attempt failures never show up here; only the final one does.
#[derive(Error, Debug)]
pub enum TaskError {
    #[error("Task {task_id} ({label}) ultimately failed after {attempts} attempts: {source}")]
    Exhausted {
        task_id: TaskId,
        label: String,
        attempts: u32,
        #[source]
        source: anyhow::Error,
    },

    #[error("Task {task_id} ({label}) was dropped before reaching a terminal outcome")]
    Abandoned { task_id: TaskId, label: String },
}

impl TaskError {
    /// Number of attempts made before giving up (0 for abandoned tasks)
    pub fn attempts(&self) -> u32 {
        match self {
            TaskError::Exhausted { attempts, .. } => *attempts,
            TaskError::Abandoned { .. } => 0,
        }
    }

    pub fn task_id(&self) -> TaskId {
        match self {
            TaskError::Exhausted { task_id, .. } | TaskError::Abandoned { task_id, .. } => *task_id,
        }
    }
}

/// Raised by `with_attempt_timeout` when a single attempt runs too long
#[derive(Error, Debug, Clone)]
#[error("Attempt {attempt} timed out after {elapsed_ms}ms")]
pub struct AttemptTimeout {
    pub attempt: u32,
    pub elapsed_ms: u64,
}
