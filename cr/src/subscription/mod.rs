//! Live subscriptions
//!
//! - `SubscriberRegistry`: counts live subscriptions
//! - `SubscriptionSession`: cursor and counters of one subscription
//! - `SubscriptionEngine`: the poll loop that pushes batches to a sink
//! - `BatchSink` / `Cancellation`: the seams to the transport

mod engine;
mod registry;
mod session;
mod sink;

pub use engine::{DEFAULT_BLOCK_TIMEOUT, DEFAULT_POLL_INTERVAL, PollSettings, SubscriptionEngine};
pub use registry::{Registration, SubscriberRegistry};
pub use session::{SessionSummary, SubscriptionSession};
pub use sink::{BatchSink, CancelHandle, Cancellation, ChannelSink, cancellation};
