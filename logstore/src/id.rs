//! Entry identifiers and read cursors
//!
//! Ids use the format `{millis}-{seq}`, e.g. `1718000000000-3`. They are
//! totally ordered by `(millis, seq)` and strictly increasing within a stream.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::StoreError;

/// Store-assigned identifier of a log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryId {
    millis: u64,
    seq: u64,
}

impl EntryId {
    /// Create an id from its two components
    pub fn new(millis: u64, seq: u64) -> Self {
        Self { millis, seq }
    }

    /// Millisecond component
    pub fn millis(&self) -> u64 {
        self.millis
    }

    /// Sequence component (disambiguates entries within one millisecond)
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Next id to assign after `last`, given the current wall clock
    ///
    /// Never goes backwards: if the clock is behind `last`, the millis of
    /// `last` are reused and the sequence bumped.
    pub fn next_after(last: Option<EntryId>, now_ms: u64) -> EntryId {
        match last {
            Some(last) if now_ms <= last.millis => EntryId::new(last.millis, last.seq + 1),
            _ => EntryId::new(now_ms, 0),
        }
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.millis, self.seq)
    }
}

impl FromStr for EntryId {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (millis, seq) = s
            .split_once('-')
            .ok_or_else(|| StoreError::InvalidId(s.to_string()))?;
        let millis = millis.parse().map_err(|_| StoreError::InvalidId(s.to_string()))?;
        let seq = seq.parse().map_err(|_| StoreError::InvalidId(s.to_string()))?;
        Ok(Self { millis, seq })
    }
}

impl Serialize for EntryId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for EntryId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Read position within a stream: "everything after this point"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Cursor {
    /// Before the first entry of the stream
    #[default]
    Beginning,
    /// After the given entry
    After(EntryId),
}

impl Cursor {
    /// Whether an entry with `id` lies after this cursor
    pub fn admits(&self, id: EntryId) -> bool {
        match self {
            Cursor::Beginning => true,
            Cursor::After(last) => id > *last,
        }
    }

    /// The last observed id, if any
    pub fn last_id(&self) -> Option<EntryId> {
        match self {
            Cursor::Beginning => None,
            Cursor::After(id) => Some(*id),
        }
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cursor::Beginning => write!(f, "0"),
            Cursor::After(id) => write!(f, "{}", id),
        }
    }
}
