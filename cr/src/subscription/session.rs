//! Per-subscription session state

use std::time::Duration;

use chrono::{DateTime, Utc};
use logstore::{Cursor, EntryId};
use uuid::Uuid;

use super::registry::Registration;

/// State of one live subscription
///
/// Owns the registry registration, so the active count drops exactly when
/// the session does.
#[derive(Debug)]
pub struct SubscriptionSession {
    id: Uuid,
    cursor: Cursor,
    started_at: DateTime<Utc>,
    batches_sent: u64,
    messages_sent: u64,
    _registration: Registration,
}

impl SubscriptionSession {
    pub fn new(registration: Registration) -> Self {
        Self {
            id: Uuid::now_v7(),
            cursor: Cursor::Beginning,
            started_at: Utc::now(),
            batches_sent: 0,
            messages_sent: 0,
            _registration: registration,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    /// Position the cursor where polling starts
    pub fn start_at(&mut self, cursor: Cursor) {
        self.cursor = cursor;
    }

    /// Commit a delivered batch: the cursor moves to its last entry
    pub fn record_delivery(&mut self, last: EntryId, messages: usize) {
        debug_assert!(self.cursor.admits(last), "cursor must only move forward");
        self.cursor = Cursor::After(last);
        self.batches_sent += 1;
        self.messages_sent += messages as u64;
    }

    pub fn summary(&self) -> SessionSummary {
        let elapsed = Utc::now() - self.started_at;
        SessionSummary {
            id: self.id,
            started_at: self.started_at,
            duration: elapsed.to_std().unwrap_or_default(),
            batches_sent: self.batches_sent,
            messages_sent: self.messages_sent,
            last_id: self.cursor.last_id(),
        }
    }
}

/// What a finished subscription did
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    pub batches_sent: u64,
    pub messages_sent: u64,
    pub last_id: Option<EntryId>,
}
