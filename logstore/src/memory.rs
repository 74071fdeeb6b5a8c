//! In-memory log store
//!
//! Process-local and non-durable. Used for tests and throwaway runs.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::id::{Cursor, EntryId};
use crate::now_ms;
use crate::store::{AppendSignal, Fields, LogStore, ReadOutcome, StoredEntry, wait_for_append};

/// Log store backed by a map of vectors
#[derive(Debug)]
pub struct MemoryLogStore {
    streams: Mutex<HashMap<String, Vec<StoredEntry>>>,
    appended: AppendSignal,
    available: AtomicBool,
}

impl Default for MemoryLogStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLogStore {
    pub fn new() -> Self {
        Self {
            streams: Mutex::new(HashMap::new()),
            appended: AppendSignal::new(),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate an outage: while unavailable every call fails with
    /// [`StoreError::Unavailable`]
    pub fn set_available(&self, available: bool) {
        debug!(available, "MemoryLogStore::set_available: called");
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of entries in `key`
    pub fn len(&self, key: &str) -> usize {
        self.streams
            .lock()
            .map(|streams| streams.get(key).map_or(0, Vec::len))
            .unwrap_or(0)
    }

    pub fn is_empty(&self, key: &str) -> bool {
        self.len(key) == 0
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store marked unavailable".to_string()))
        }
    }

    fn collect_after(&self, key: &str, cursor: Cursor) -> StoreResult<Vec<StoredEntry>> {
        self.check_available()?;
        let streams = self
            .streams
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))?;
        let entries = streams
            .get(key)
            .map(|entries| {
                // Entries are sorted by id, so skip to the first one past the cursor
                let start = entries.partition_point(|e| !cursor.admits(e.id));
                entries[start..].to_vec()
            })
            .unwrap_or_default();
        Ok(entries)
    }
}

#[async_trait]
impl LogStore for MemoryLogStore {
    async fn append(&self, key: &str, fields: Fields) -> StoreResult<EntryId> {
        self.check_available()?;
        let id = {
            let mut streams = self
                .streams
                .lock()
                .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))?;
            let entries = streams.entry(key.to_string()).or_default();
            let id = EntryId::next_after(entries.last().map(|e| e.id), now_ms());
            entries.push(StoredEntry { id, fields });
            id
        };
        debug!(%key, %id, "MemoryLogStore::append: appended");
        self.appended.notify();
        Ok(id)
    }

    async fn read_after(&self, key: &str, cursor: Cursor, block: Option<Duration>) -> StoreResult<ReadOutcome> {
        let mut rx = self.appended.listen();
        let entries = self.collect_after(key, cursor)?;
        let Some(timeout) = block else {
            return Ok(ReadOutcome::from_entries(entries));
        };
        if !entries.is_empty() {
            return Ok(ReadOutcome::Entries(entries));
        }

        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() || !wait_for_append(&mut rx, remaining).await {
                return Ok(ReadOutcome::NoNewData);
            }
            let entries = self.collect_after(key, cursor)?;
            if !entries.is_empty() {
                return Ok(ReadOutcome::Entries(entries));
            }
        }
    }

    async fn tail(&self, key: &str) -> StoreResult<Cursor> {
        self.check_available()?;
        let streams = self
            .streams
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))?;
        Ok(streams
            .get(key)
            .and_then(|entries| entries.last())
            .map_or(Cursor::Beginning, |e| Cursor::After(e.id)))
    }
}
