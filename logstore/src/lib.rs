//! LogStore - append-only keyed streams
//!
//! Each stream is an ordered log of field maps. Appends get a store-assigned
//! [`EntryId`] that only ever grows; readers pull "everything after" a
//! [`Cursor`], optionally blocking briefly until something arrives.
//!
//! # Backends
//!
//! - [`MemoryLogStore`] - process-local, for tests and throwaway runs
//! - [`SqliteLogStore`] - durable, connection owned by an actor task
//!
//! # Example
//!
//! ```ignore
//! use logstore::{Cursor, Fields, LogStore, MemoryLogStore};
//!
//! let store = MemoryLogStore::new();
//! let id = store.append("chat", Fields::new()).await?;
//! let outcome = store.read_after("chat", Cursor::Beginning, None).await?;
//! ```

mod error;
mod id;
mod memory;
pub mod sqlite;
mod store;

pub use error::{StoreError, StoreResult};
pub use id::{Cursor, EntryId};
pub use memory::MemoryLogStore;
pub use sqlite::SqliteLogStore;
pub use store::{Fields, LogStore, ReadOutcome, StoredEntry};

/// Current time as Unix milliseconds
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
