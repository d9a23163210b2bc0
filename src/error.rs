use thiserror::Error;

use crate::schema::DataType;

#[derive(Error, Debug)]
pub enum NormalizeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid file name '{name}': {reason}")]
    InvalidFileName { name: String, reason: String },

    #[error("Column '{table}.{column}' is {existing}, refusing to change it to {proposed}")]
    ColumnTypeChange {
        table: String,
        column: String,
        existing: DataType,
        proposed: DataType,
    },

    #[error("Table '{table}' has parent {existing:?}, delta proposes {proposed:?}")]
    ParentMismatch {
        table: String,
        existing: Option<String>,
        proposed: Option<String>,
    },

    #[error("Naming collision in table '{table}': '{name}' {detail}")]
    NamingCollision {
        table: String,
        name: String,
        detail: String,
    },

    #[error("Identifier '{identifier}' exceeds the destination limit of {limit} characters")]
    IdentifierTooLong { identifier: String, limit: usize },

    #[error("Table '{0}' is not in the schema")]
    UnknownTable(String),

    #[error("Load package '{0}' not found")]
    PackageNotFound(String),

    #[error("Load package '{0}' already exists")]
    PackageExists(String),

    #[error("Worker failed: {0}")]
    WorkerFailed(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl NormalizeError {
    /// Errors a rerun on the same input cannot fix.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            NormalizeError::ColumnTypeChange { .. }
                | NormalizeError::ParentMismatch { .. }
                | NormalizeError::NamingCollision { .. }
                | NormalizeError::IdentifierTooLong { .. }
                | NormalizeError::UnknownTable(_)
                | NormalizeError::Config(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, NormalizeError>;
