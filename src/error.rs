//! Error types for feedkit

use crate::schema::TableKind;
use thiserror::Error;

/// Errors that can occur while loading or aggregating an experiment
#[derive(Debug, Error)]
pub enum AssayError {
    /// The input table is empty or malformed. Fatal to the experiment load.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A canonical column is absent after renaming. Fatal to the experiment load.
    #[error("missing required column `{column}` in {kind} table")]
    Schema { kind: TableKind, column: String },

    /// Caller-supplied grouping or comparison parameters are ambiguous or
    /// insufficient. Fatal to that call only.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// A (subject, choice) combination has no mapped tube label. The
    /// offending row is dropped during the merge.
    #[error("no tube mapped for subject {subject}, choice index {choice}")]
    ChoiceLookup { subject: String, choice: u32 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience alias used throughout the crate
pub type Result<T> = std::result::Result<T, AssayError>;
