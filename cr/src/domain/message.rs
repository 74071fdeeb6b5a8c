//! Chat message and its log representation

use logstore::{EntryId, Fields, StoredEntry};
use serde::{Deserialize, Serialize};

use crate::error::{RelayError, RelayResult};

/// Field holding the sender name
pub const SENDER_FIELD: &str = "name";

/// Field holding the message body
pub const BODY_FIELD: &str = "msg";

/// A chat message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub sender: String,
    pub body: String,
}

impl Message {
    pub fn new(sender: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            body: body.into(),
        }
    }

    /// Field map to append to the log
    pub fn to_fields(&self) -> Fields {
        let mut fields = Fields::new();
        fields.insert(SENDER_FIELD.to_string(), self.sender.clone());
        fields.insert(BODY_FIELD.to_string(), self.body.clone());
        fields
    }

    /// Rebuild a message from a stored entry
    pub fn from_entry(entry: &StoredEntry) -> RelayResult<Self> {
        let field = |name: &'static str| {
            entry
                .fields
                .get(name)
                .cloned()
                .ok_or(RelayError::MalformedEntry { id: entry.id, field: name })
        };
        Ok(Self {
            sender: field(SENDER_FIELD)?,
            body: field(BODY_FIELD)?,
        })
    }
}

impl std::fmt::Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.sender, self.body)
    }
}

/// A decoded log entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub id: EntryId,
    pub message: Message,
}

impl TryFrom<&StoredEntry> for LogEntry {
    type Error = RelayError;

    fn try_from(entry: &StoredEntry) -> RelayResult<Self> {
        Ok(Self {
            id: entry.id,
            message: Message::from_entry(entry)?,
        })
    }
}

/// Decode a batch of stored entries, failing on the first malformed one
pub fn decode_entries(entries: &[StoredEntry]) -> RelayResult<Vec<LogEntry>> {
    entries.iter().map(LogEntry::try_from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stored(id: EntryId, fields: &[(&str, &str)]) -> StoredEntry {
        StoredEntry {
            id,
            fields: fields.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
        }
    }

    #[test]
    fn test_to_fields_uses_log_field_names() {
        let fields = Message::new("alice", "hi").to_fields();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields["name"], "alice");
        assert_eq!(fields["msg"], "hi");
    }

    #[test]
    fn test_from_entry_ignores_extra_fields() {
        let entry = stored(EntryId::new(1, 0), &[("name", "bob"), ("msg", "yo"), ("extra", "x")]);
        assert_eq!(Message::from_entry(&entry).unwrap(), Message::new("bob", "yo"));
    }

    #[test]
    fn test_from_entry_missing_body() {
        let entry = stored(EntryId::new(3, 2), &[("name", "bob")]);
        match Message::from_entry(&entry) {
            Err(RelayError::MalformedEntry { id, field }) => {
                assert_eq!(id, EntryId::new(3, 2));
                assert_eq!(field, "msg");
            }
            other => panic!("Expected MalformedEntry, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_strings_are_valid() {
        let entry = stored(EntryId::new(1, 0), &[("name", ""), ("msg", "")]);
        assert_eq!(Message::from_entry(&entry).unwrap(), Message::new("", ""));
    }

    #[test]
    fn test_decode_entries_keeps_order() {
        let entries = vec![
            stored(EntryId::new(1, 0), &[("name", "alice"), ("msg", "hi")]),
            stored(EntryId::new(1, 1), &[("name", "bob"), ("msg", "yo")]),
        ];
        let decoded = decode_entries(&entries).unwrap();
        assert_eq!(decoded[0].id, EntryId::new(1, 0));
        assert_eq!(decoded[0].message.sender, "alice");
        assert_eq!(decoded[1].message.body, "yo");
    }

    #[test]
    fn test_display() {
        assert_eq!(Message::new("carol", "sup").to_string(), "carol: sup");
    }
}
