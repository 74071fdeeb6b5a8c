//! RPC boundary over TCP
//!
//! Newline-delimited JSON, one request per connection. `Subscribe` keeps the
//! connection open and streams `Batch` lines until the client hangs up.

pub mod client;
pub mod messages;
pub mod server;

pub use client::{RelayClient, RemoteSubscription};
pub use messages::{RelayRequest, RelayResponse};
pub use server::{MAX_REQUEST_SIZE, RelayServer};
