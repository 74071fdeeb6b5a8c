//! The `LogStore` capability trait
//!
//! A log store keeps one append-only stream per key. Each append gets a
//! store-assigned [`EntryId`] greater than every earlier id in that stream.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::debug;

use crate::error::StoreResult;
use crate::id::{Cursor, EntryId};

/// Field map stored with each entry
pub type Fields = BTreeMap<String, String>;

/// An entry as returned by the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEntry {
    pub id: EntryId,
    pub fields: Fields,
}

/// Outcome of a read
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Entries after the cursor, in id order (never empty)
    Entries(Vec<StoredEntry>),
    /// Nothing after the cursor before the block timeout elapsed
    NoNewData,
}

impl ReadOutcome {
    /// Entries of the outcome, empty for `NoNewData`
    pub fn into_entries(self) -> Vec<StoredEntry> {
        match self {
            ReadOutcome::Entries(entries) => entries,
            ReadOutcome::NoNewData => Vec::new(),
        }
    }

    pub(crate) fn from_entries(entries: Vec<StoredEntry>) -> Self {
        if entries.is_empty() {
            ReadOutcome::NoNewData
        } else {
            ReadOutcome::Entries(entries)
        }
    }
}

/// Append-only, ordered, keyed log
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Append one entry to `key`, returning its new id
    async fn append(&self, key: &str, fields: Fields) -> StoreResult<EntryId>;

    /// Read every entry of `key` after `cursor`
    ///
    /// With `block = Some(timeout)` and nothing to return, waits up to
    /// `timeout` for an append before reporting [`ReadOutcome::NoNewData`].
    /// With `block = None` the read never waits.
    async fn read_after(&self, key: &str, cursor: Cursor, block: Option<Duration>) -> StoreResult<ReadOutcome>;

    /// Cursor positioned after the newest entry of `key`
    ///
    /// Returns [`Cursor::Beginning`] for an empty stream.
    async fn tail(&self, key: &str) -> StoreResult<Cursor>;
}

/// Append notification shared between a store and its blocked readers
///
/// Holds a version counter bumped on every append. A reader grabs a
/// [`watch::Receiver`] *before* reading so an append racing with the read is
/// never missed.
#[derive(Debug)]
pub(crate) struct AppendSignal {
    tx: watch::Sender<u64>,
}

impl AppendSignal {
    pub(crate) fn new() -> Self {
        let (tx, _) = watch::channel(0);
        Self { tx }
    }

    pub(crate) fn listen(&self) -> watch::Receiver<u64> {
        self.tx.subscribe()
    }

    pub(crate) fn notify(&self) {
        self.tx.send_modify(|version| *version = version.wrapping_add(1));
    }
}

/// Wait up to `timeout` for the next append seen by `rx`
///
/// Returns `true` if an append happened, `false` on timeout.
pub(crate) async fn wait_for_append(rx: &mut watch::Receiver<u64>, timeout: Duration) -> bool {
    match tokio::time::timeout(timeout, rx.changed()).await {
        Ok(Ok(())) => true,
        Ok(Err(_)) => false,
        Err(_) => {
            debug!(?timeout, "wait_for_append: block timeout elapsed");
            false
        }
    }
}
