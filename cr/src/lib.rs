//! chatrelay - chat messages over an append-only log
//!
//! Producers append messages to an ordered log; consumers either fetch the
//! whole backlog once or open a live subscription that receives only the
//! messages appended after it started.
//!
//! # Core Concepts
//!
//! - **Log as source of truth**: every message lives in a [`logstore`] stream
//! - **Cursor per subscription**: each subscription polls "everything after"
//!   its own cursor and advances it only after a batch is delivered
//! - **Exact accounting**: the live subscription count is an atomic counter
//!   decremented by a drop guard on every exit path
//!
//! # Modules
//!
//! - [`domain`] - Message and its log codec
//! - [`subscription`] - Polling engine, registry, sessions
//! - [`service`] - The four relay operations
//! - [`rpc`] - JSON-over-newline TCP server and client
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

pub mod cli;
pub mod config;
pub mod domain;
pub mod error;
pub mod rpc;
pub mod service;
pub mod store;
pub mod subscription;

// Re-export commonly used types
pub use config::Config;
pub use domain::{LogEntry, Message};
pub use error::{RelayError, RelayResult};
pub use rpc::{RelayClient, RelayServer, RemoteSubscription};
pub use service::{RelayService, Subscription};
pub use store::create_store;
pub use subscription::{
    BatchSink, CancelHandle, Cancellation, PollSettings, SessionSummary, SubscriberRegistry, SubscriptionEngine,
    cancellation,
};
