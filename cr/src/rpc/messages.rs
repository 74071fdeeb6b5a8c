//! RPC message types
//!
//! Simple JSON-over-newline protocol. Each message is a single line of JSON
//! followed by `\n`. A connection carries exactly one request.

use serde::{Deserialize, Serialize};

use crate::domain::Message;
use crate::error::RelayError;

/// Requests from client to server
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum RelayRequest {
    /// Append a message to the log
    Publish { sender: String, body: String },

    /// Fetch every message currently in the log
    ReadBacklog,

    /// Stream messages appended from now on
    Subscribe,

    /// Number of live subscriptions
    ActiveSubscriptionCount,
}

/// Responses from server to client
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum RelayResponse {
    /// Acknowledgment
    Ok,

    /// Full backlog, oldest first
    Backlog { messages: Vec<Message> },

    /// The subscription is positioned; later publishes will be delivered
    Subscribed,

    /// One delivered batch of a subscription
    Batch { messages: Vec<Message> },

    /// Active subscription count
    Count { count: usize },

    /// Error response
    Error { kind: String, message: String },
}

impl From<&RelayError> for RelayResponse {
    fn from(err: &RelayError) -> Self {
        RelayResponse::Error {
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}
