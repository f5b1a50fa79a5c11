//! Error types for Hailcast
//!
//! Missing data (no files for a date range, a group without models) is not an
//! error: it propagates as empty results. Everything here is either a caller
//! mistake or an I/O failure the caller has to see.

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Hailcast error types
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration failed validation
    #[error("Invalid configuration value for `{field}`: {reason}")]
    Config {
        /// Offending field
        field: String,
        /// Why the value was rejected
        reason: String,
    },

    /// A required column is missing from a non-empty table
    #[error("Column not found: {column} (table: {table})")]
    MissingColumn {
        /// Column that was requested
        column: String,
        /// Table the lookup ran against
        table: String,
    },

    /// Member table maps one member to more than one group
    #[error("Ensemble member {0} appears more than once in the member table")]
    DuplicateMember(String),

    /// A classifier produced a class that is not on its output grid
    #[error("Class {class} predicted by `{model}` is not on the output grid {grid:?}")]
    ClassNotInGrid {
        /// Offending class value
        class: i64,
        /// Model name
        model: String,
        /// Expected grid values
        grid: Vec<i64>,
    },

    /// Prediction requested for a model that was never fitted for the group
    #[error("No fitted model `{model}` for group `{group}` ({family})")]
    ModelNotFound {
        /// Model family label
        family: String,
        /// Group label
        group: String,
        /// Model name
        model: String,
    },

    /// Model fitting or prediction failed
    #[error("Model error: {0}")]
    Fit(String),

    /// Group or model name cannot be encoded in a persisted file name
    #[error("Invalid model key component `{0}`: must be non-empty and contain no '_' or path separators")]
    InvalidModelKey(String),

    /// Persisted model files are inconsistent
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Worker pool could not be created
    #[error("Thread pool error: {0}")]
    ThreadPool(String),

    /// Storage error (CSV/Parquet/Arrow)
    #[error("Storage error: {0}")]
    StorageError(String),

    /// Invalid argument
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Arrow error
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Parquet error
    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Shorthand for [`Error::Config`]
    pub fn config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Config {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Shorthand for [`Error::MissingColumn`]
    pub fn missing_column(column: impl Into<String>, table: impl Into<String>) -> Self {
        Self::MissingColumn {
            column: column.into(),
            table: table.into(),
        }
    }
}
