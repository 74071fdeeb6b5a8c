//! SQLite store actor messages
//!
//! Commands and replies for the actor that owns the connection.

use tokio::sync::oneshot;

use crate::error::StoreResult;
use crate::id::{Cursor, EntryId};
use crate::store::{Fields, StoredEntry};

/// Commands sent to the SQLite store actor
#[derive(Debug)]
pub(crate) enum StoreCommand {
    Append {
        key: String,
        fields: Fields,
        reply: oneshot::Sender<StoreResult<EntryId>>,
    },
    ReadAfter {
        key: String,
        cursor: Cursor,
        reply: oneshot::Sender<StoreResult<Vec<StoredEntry>>>,
    },
    Tail {
        key: String,
        reply: oneshot::Sender<StoreResult<Cursor>>,
    },

    // Shutdown
    Shutdown,
}
