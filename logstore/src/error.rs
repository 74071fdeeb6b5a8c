//! Log store error types

use thiserror::Error;

/// Errors from log store operations
///
/// "No new data" is not an error; see [`crate::ReadOutcome::NoNewData`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Log store unavailable: {0}")]
    Unavailable(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Field encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("Invalid entry id: {0}")]
    InvalidId(String),

    #[error("Store actor channel closed")]
    ChannelError,
}

/// Result alias for log store operations
pub type StoreResult<T> = Result<T, StoreError>;
