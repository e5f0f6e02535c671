use std::path::PathBuf;

use thiserror::Error;

/// Configuration and precondition failures.
///
/// All of these are raised before any clustering work starts. Library functions
/// return `anyhow::Result`, so callers that care about the kind of failure can
/// `downcast_ref::<DedupError>()`.
#[derive(Debug, Error, PartialEq)]
pub enum DedupError {
    #[error("cannot use --force and --resume at the same time")]
    ConflictingRunModes,

    #[error("cluster result exists: {}, use --force to overwrite or --resume to resume", .0.display())]
    ResultExists(PathBuf),

    #[error("invalid parameter {name}: {message}")]
    InvalidParameter { name: &'static str, message: String },

    #[error("unknown metric {0:?}; expected one of: euclidean, cosine")]
    UnknownMetric(String),

    #[error("input table is missing required column {0:?}")]
    MissingColumn(&'static str),

    #[error("column {column:?} has unsupported type {found}")]
    UnsupportedColumnType { column: &'static str, found: String },

    #[error("column {column:?} has a null value at row {row}")]
    NullValue { column: &'static str, row: usize },

    #[error("embedding for {id:?} has dimension {found}, expected {expected}")]
    DimensionMismatch {
        id: String,
        expected: usize,
        found: usize,
    },

    #[error("duplicate record id {0:?}")]
    DuplicateId(String),
}

impl DedupError {
    pub(crate) fn invalid(name: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name,
            message: message.into(),
        }
    }
}
