//! SqliteLogStore - actor that owns the SQLite connection
//!
//! Processes commands via channels; blocking reads wait on an append signal
//! on the handle side so the actor never sleeps.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, params};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};
use crate::id::{Cursor, EntryId};
use crate::now_ms;
use crate::store::{AppendSignal, Fields, LogStore, ReadOutcome, StoredEntry, wait_for_append};

use super::messages::StoreCommand;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS entries (
    stream TEXT NOT NULL,
    id_ms INTEGER NOT NULL,
    id_seq INTEGER NOT NULL,
    fields TEXT NOT NULL,
    PRIMARY KEY (stream, id_ms, id_seq)
);
";

/// Handle to send commands to the SQLite store actor
#[derive(Clone)]
pub struct SqliteLogStore {
    tx: mpsc::Sender<StoreCommand>,
    appended: Arc<AppendSignal>,
}

impl SqliteLogStore {
    /// Open (or create) a database file and spawn the actor
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "open: called");
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Unavailable(format!("cannot create {}: {}", parent.display(), e)))?;
        }
        let conn = Connection::open(path)?;
        let journal_mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
        debug!(%journal_mode, "open: journal mode set");
        Self::spawn(conn)
    }

    /// Open a private in-memory database (lost when the actor stops)
    pub fn open_in_memory() -> StoreResult<Self> {
        debug!("open_in_memory: called");
        Self::spawn(Connection::open_in_memory()?)
    }

    fn spawn(conn: Connection) -> StoreResult<Self> {
        conn.execute_batch(SCHEMA)?;

        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(actor_loop(conn, rx));

        info!("SqliteLogStore spawned");
        Ok(Self {
            tx,
            appended: Arc::new(AppendSignal::new()),
        })
    }

    /// Stop the actor; further calls fail with [`StoreError::ChannelError`]
    pub async fn shutdown(&self) -> StoreResult<()> {
        debug!("shutdown: called");
        self.tx
            .send(StoreCommand::Shutdown)
            .await
            .map_err(|_| StoreError::ChannelError)
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<StoreResult<T>>) -> StoreCommand) -> StoreResult<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| StoreError::ChannelError)?;
        reply_rx.await.map_err(|_| StoreError::ChannelError)?
    }

    async fn fetch_after(&self, key: &str, cursor: Cursor) -> StoreResult<Vec<StoredEntry>> {
        self.request(|reply| StoreCommand::ReadAfter {
            key: key.to_string(),
            cursor,
            reply,
        })
        .await
    }
}

#[async_trait]
impl LogStore for SqliteLogStore {
    async fn append(&self, key: &str, fields: Fields) -> StoreResult<EntryId> {
        debug!(%key, "append: called");
        let id = self
            .request(|reply| StoreCommand::Append {
                key: key.to_string(),
                fields,
                reply,
            })
            .await?;
        self.appended.notify();
        Ok(id)
    }

    async fn read_after(&self, key: &str, cursor: Cursor, block: Option<Duration>) -> StoreResult<ReadOutcome> {
        debug!(%key, %cursor, ?block, "read_after: called");
        let mut rx = self.appended.listen();
        let entries = self.fetch_after(key, cursor).await?;
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
            let entries = self.fetch_after(key, cursor).await?;
            if !entries.is_empty() {
                return Ok(ReadOutcome::Entries(entries));
            }
        }
    }

    async fn tail(&self, key: &str) -> StoreResult<Cursor> {
        debug!(%key, "tail: called");
        self.request(|reply| StoreCommand::Tail {
            key: key.to_string(),
            reply,
        })
        .await
    }
}

/// The actor loop that processes commands
async fn actor_loop(conn: Connection, mut rx: mpsc::Receiver<StoreCommand>) {
    debug!("actor_loop: started");
    while let Some(cmd) = rx.recv().await {
        match cmd {
            StoreCommand::Append { key, fields, reply } => {
                let result = append_entry(&conn, &key, &fields);
                if let Err(e) = &result {
                    warn!(%key, error = %e, "actor_loop: append failed");
                }
                let _ = reply.send(result);
            }
            StoreCommand::ReadAfter { key, cursor, reply } => {
                let _ = reply.send(select_after(&conn, &key, cursor));
            }
            StoreCommand::Tail { key, reply } => {
                let result = last_id(&conn, &key).map(|last| last.map_or(Cursor::Beginning, Cursor::After));
                let _ = reply.send(result);
            }
            StoreCommand::Shutdown => {
                info!("SqliteLogStore shutting down");
                break;
            }
        }
    }
    debug!("actor_loop: exited");
}

fn last_id(conn: &Connection, key: &str) -> StoreResult<Option<EntryId>> {
    let row = conn
        .query_row(
            "SELECT id_ms, id_seq FROM entries WHERE stream = ?1 ORDER BY id_ms DESC, id_seq DESC LIMIT 1",
            params![key],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
        )
        .optional()?;
    Ok(row.map(|(ms, seq)| EntryId::new(ms as u64, seq as u64)))
}

fn append_entry(conn: &Connection, key: &str, fields: &Fields) -> StoreResult<EntryId> {
    let id = EntryId::next_after(last_id(conn, key)?, now_ms());
    let encoded = serde_json::to_string(fields)?;
    conn.execute(
        "INSERT INTO entries (stream, id_ms, id_seq, fields) VALUES (?1, ?2, ?3, ?4)",
        params![key, id.millis() as i64, id.seq() as i64, encoded],
    )?;
    debug!(%key, %id, "append_entry: inserted");
    Ok(id)
}

fn select_after(conn: &Connection, key: &str, cursor: Cursor) -> StoreResult<Vec<StoredEntry>> {
    let (ms, seq) = match cursor {
        Cursor::Beginning => (-1i64, -1i64),
        Cursor::After(id) => (id.millis() as i64, id.seq() as i64),
    };
    let mut stmt = conn.prepare_cached(
        "SELECT id_ms, id_seq, fields FROM entries
         WHERE stream = ?1 AND (id_ms > ?2 OR (id_ms = ?2 AND id_seq > ?3))
         ORDER BY id_ms, id_seq",
    )?;
    let rows = stmt.query_map(params![key, ms, seq], |row| {
        Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?, row.get::<_, String>(2)?))
    })?;

    let mut entries = Vec::new();
    for row in rows {
        let (ms, seq, encoded) = row?;
        let fields: Fields = serde_json::from_str(&encoded)?;
        entries.push(StoredEntry {
            id: EntryId::new(ms as u64, seq as u64),
            fields,
        });
    }
    Ok(entries)
}
