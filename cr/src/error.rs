//! Relay error types

use logstore::{EntryId, StoreError};
use thiserror::Error;

/// Errors surfaced by relay operations
///
/// Cancellation and "no new data" are not errors: the former ends a
/// subscription with its session summary, the latter just waits for the
/// next poll.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),

    #[error("Entry {id} is missing field '{field}'")]
    MalformedEntry { id: EntryId, field: &'static str },

    #[error("Delivery failed: {0}")]
    Delivery(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Subscription task failed: {0}")]
    TaskFailed(String),
}

impl RelayError {
    /// Stable machine-readable kind, used on the wire
    pub fn kind(&self) -> &'static str {
        match self {
            RelayError::StoreUnavailable(_) => "store_unavailable",
            RelayError::MalformedEntry { .. } => "malformed_entry",
            RelayError::Delivery(_) => "delivery",
            RelayError::Protocol(_) => "protocol",
            RelayError::TaskFailed(_) => "internal",
        }
    }
}

/// Result alias for relay operations
pub type RelayResult<T> = Result<T, RelayError>;
