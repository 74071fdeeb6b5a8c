//! Durable SQLite-backed log store
//!
//! The connection is owned by a single actor task; [`SqliteLogStore`] is a
//! cheap cloneable handle that talks to it over a channel.

mod manager;
mod messages;

pub use manager::SqliteLogStore;
