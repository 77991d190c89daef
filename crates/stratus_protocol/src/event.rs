//! Change events pushed by the backend.

use serde::Serialize;
use stratus_codec::{Row, Value};

/// Kind of row change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    /// A row was inserted.
    Inserted,
    /// A row was updated.
    Updated,
    /// A row was deleted.
    Deleted,
}

impl ChangeKind {
    /// Parses a kind string, ignoring case.
    ///
    /// Accepts `insert`/`inserted`, `update`/`updated` and
    /// `delete`/`deleted`.
    pub fn parse(kind: &str) -> Option<Self> {
        match kind.to_ascii_lowercase().as_str() {
            "insert" | "inserted" => Some(ChangeKind::Inserted),
            "update" | "updated" => Some(ChangeKind::Updated),
            "delete" | "deleted" => Some(ChangeKind::Deleted),
            _ => None,
        }
    }

    /// Wire name of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Inserted => "INSERT",
            ChangeKind::Updated => "UPDATE",
            ChangeKind::Deleted => "DELETE",
        }
    }
}

/// A decoded change to one row.
///
/// Sequences are strictly increasing within one connection epoch. The epoch
/// is stamped by the channel session that received the frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeEvent {
    /// Table the row belongs to.
    pub table: String,
    /// Kind of change.
    pub kind: ChangeKind,
    /// Primary-key value of the row.
    pub id: Value,
    /// New row contents (absent for deletes).
    ///
    /// An update may carry only the changed columns.
    pub payload: Option<Row>,
    /// Position in the channel's change stream.
    pub sequence: u64,
    /// Connection epoch the event was received in.
    pub epoch: u32,
}

impl ChangeEvent {
    /// Creates an insert event.
    pub fn inserted(table: impl Into<String>, row: Row, sequence: u64, epoch: u32) -> Self {
        Self {
            table: table.into(),
            kind: ChangeKind::Inserted,
            id: row.id().clone(),
            payload: Some(row),
            sequence,
            epoch,
        }
    }

    /// Creates an update event.
    pub fn updated(table: impl Into<String>, row: Row, sequence: u64, epoch: u32) -> Self {
        Self {
            table: table.into(),
            kind: ChangeKind::Updated,
            id: row.id().clone(),
            payload: Some(row),
            sequence,
            epoch,
        }
    }

    /// Creates a delete event.
    pub fn deleted(table: impl Into<String>, id: impl Into<Value>, sequence: u64, epoch: u32) -> Self {
        Self {
            table: table.into(),
            kind: ChangeKind::Deleted,
            id: id.into(),
            payload: None,
            sequence,
            epoch,
        }
    }

    /// Encodes the event as a flat push frame.
    ///
    /// The epoch is local to the receiver and is not encoded.
    pub fn to_frame(&self, primary_key: &str) -> serde_json::Value {
        let mut frame = serde_json::json!({
            "table": self.table,
            "type": self.kind.as_str(),
            "seq": self.sequence,
        });
        if let Some(object) = frame.as_object_mut() {
            match &self.payload {
                Some(row) => {
                    object.insert("record".into(), row.to_json());
                }
                None => {
                    let mut old = serde_json::Map::new();
                    old.insert(primary_key.to_string(), self.id.to_json());
                    object.insert("old_record".into(), serde_json::Value::Object(old));
                }
            }
        }
        frame
    }
}
