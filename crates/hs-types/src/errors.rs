use std::path::PathBuf;

use thiserror::Error;

use crate::trial::TrialState;

/// Main error type for the HyperSweep system
#[derive(Error, Debug)]
pub enum HsError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Evaluation error: {0}")]
    Evaluation(#[from] EvaluationError),

    #[error(
        "Run exhausted: observed {observed} of {expected} trials{}",
        .lost.as_deref().map(|l| format!(" (lost trial: {l})")).unwrap_or_default()
    )]
    Exhaustion {
        observed: usize,
        expected: usize,
        lost: Option<String>,
    },

    #[error("Invalid transition for trial {label}: {from:?} -> {to:?}")]
    InvalidTransition {
        label: String,
        from: TrialState,
        to: TrialState,
    },

    #[error("Optimizer error: {0}")]
    Optimizer(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl HsError {
    /// Whether the run can continue after this error (the trial is scored
    /// as a failure instead).
    pub fn is_recoverable(&self) -> bool {
        matches!(self, HsError::Evaluation(_))
    }
}

/// Failures of a single trial evaluation.
#[derive(Error, Debug)]
pub enum EvaluationError {
    #[error("Evaluator could not be started: {message}")]
    LaunchFailed { message: String },

    #[error("Result log not found: {}", .path.display())]
    LogMissing { path: PathBuf },

    #[error("Result log has no rows: {}", .path.display())]
    EmptyLog { path: PathBuf },

    #[error("Column {column} not found in {}", .path.display())]
    ColumnMissing { column: String, path: PathBuf },

    #[error("Unparseable result log {}: {message}", .path.display())]
    Unparseable { path: PathBuf, message: String },
}

/// Result type alias for HyperSweep operations
pub type HsResult<T> = Result<T, HsError>;

/// Macro for creating validation errors
#[macro_export]
macro_rules! validation_error {
    ($($arg:tt)*) => {
        $crate::HsError::Validation(format!($($arg)*))
    };
}

/// Macro for creating internal errors
#[macro_export]
macro_rules! internal_error {
    ($($arg:tt)*) => {
        $crate::HsError::Internal(format!($($arg)*))
    };
}

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::HsError::Config(format!($($arg)*))
    };
}
