//! Domain types for the relay
//!
//! - `Message`: a chat message (sender + body)
//! - `LogEntry`: a message together with its store-assigned id

mod message;

pub use message::{BODY_FIELD, LogEntry, Message, SENDER_FIELD, decode_entries};
