//! Push-frame decoder.
//!
//! Servers push changes in a few shapes. Flat frames carry the change at
//! the top level:
//!
//! ```json
//! {"table": "posts", "type": "INSERT", "record": {"id": 1}, "seq": 7}
//! ```
//!
//! Wrapped frames nest it under an event envelope, either directly in
//! `payload` or in `payload.data`:
//!
//! ```json
//! {"event": "postgres_changes", "payload": {"data": {"table": "posts", ...}}}
//! ```
//!
//! Key aliases are accepted for each field (`type`/`eventType`/`kind`,
//! `record`/`new`/`payload`, `old_record`/`old`, `seq`/`sequence`). Unknown
//! fields are ignored.

use crate::error::{DecodeError, DecodeResult};
use crate::event::{ChangeEvent, ChangeKind};
use crate::raw::RawMessage;
use serde_json::{Map, Value as Json};
use stratus_codec::{json_type_name, Row, Value, DEFAULT_PRIMARY_KEY};

const KIND_KEYS: [&str; 3] = ["type", "eventType", "kind"];
const RECORD_KEYS: [&str; 3] = ["record", "new", "payload"];
const OLD_RECORD_KEYS: [&str; 2] = ["old_record", "old"];
const SEQUENCE_KEYS: [&str; 2] = ["seq", "sequence"];

/// Decoder configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecoderConfig {
    /// Name of the primary-key column.
    pub primary_key: String,
}

impl DecoderConfig {
    /// Sets the primary-key column.
    pub fn with_primary_key(mut self, primary_key: impl Into<String>) -> Self {
        self.primary_key = primary_key.into();
        self
    }
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            primary_key: DEFAULT_PRIMARY_KEY.to_string(),
        }
    }
}

/// Turns raw push frames into [`ChangeEvent`]s.
///
/// Decoding is pure: a frame either yields an event or a [`DecodeError`].
#[derive(Debug, Clone, Default)]
pub struct ChangeDecoder {
    config: DecoderConfig,
}

impl ChangeDecoder {
    /// Creates a decoder.
    pub fn new(config: DecoderConfig) -> Self {
        Self { config }
    }

    /// Returns the decoder configuration.
    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    /// Decodes a raw frame, stamping it with the receiving epoch.
    pub fn decode(&self, raw: &RawMessage, epoch: u32) -> DecodeResult<ChangeEvent> {
        let json = raw.to_json()?;
        self.decode_json(&json, epoch)
    }

    /// Decodes an already-parsed frame.
    pub fn decode_json(&self, json: &Json, epoch: u32) -> DecodeResult<ChangeEvent> {
        let object = as_object(json)?;
        let (flat, kind_hint) = unwrap_envelope(object)?;
        self.decode_flat(flat, kind_hint, epoch)
    }

    fn decode_flat(
        &self,
        flat: &Map<String, Json>,
        kind_hint: Option<&str>,
        epoch: u32,
    ) -> DecodeResult<ChangeEvent> {
        let table = match flat.get("table") {
            Some(Json::String(t)) if t.trim().is_empty() => return Err(DecodeError::EmptyTable),
            Some(Json::String(t)) => t.clone(),
            Some(_) | None => return Err(DecodeError::MissingField { field: "table" }),
        };

        let kind_str = first_of(flat, &KIND_KEYS)
            .and_then(Json::as_str)
            .or(kind_hint)
            .ok_or(DecodeError::MissingField { field: "type" })?;
        let kind = ChangeKind::parse(kind_str).ok_or_else(|| DecodeError::UnknownKind {
            kind: kind_str.to_string(),
        })?;

        let sequence = match first_of(flat, &SEQUENCE_KEYS) {
            None => return Err(DecodeError::MissingField { field: "seq" }),
            Some(seq) => seq.as_u64().ok_or_else(|| DecodeError::InvalidSequence {
                found: seq.to_string(),
            })?,
        };

        let primary_key = self.config.primary_key.as_str();
        match kind {
            ChangeKind::Inserted | ChangeKind::Updated => {
                let record = first_of(flat, &RECORD_KEYS)
                    .ok_or(DecodeError::MissingField { field: "record" })?;
                let row = Row::from_json(primary_key, record)?;
                Ok(ChangeEvent {
                    table,
                    kind,
                    id: row.id().clone(),
                    payload: Some(row),
                    sequence,
                    epoch,
                })
            }
            ChangeKind::Deleted => {
                let id = deleted_id(flat, primary_key).ok_or(DecodeError::MissingIdentifier)?;
                Ok(ChangeEvent {
                    table,
                    kind,
                    id,
                    payload: None,
                    sequence,
                    epoch,
                })
            }
        }
    }
}

fn as_object(json: &Json) -> DecodeResult<&Map<String, Json>> {
    json.as_object().ok_or(DecodeError::NotAnObject {
        found: json_type_name(json),
    })
}

/// Finds the flat change object inside a frame.
///
/// Returns the envelope's event name as a kind hint for payloads that do
/// not name their own kind.
fn unwrap_envelope(object: &Map<String, Json>) -> DecodeResult<(&Map<String, Json>, Option<&str>)> {
    if object.contains_key("table") {
        return Ok((object, None));
    }
    let Some(event) = object.get("event").and_then(Json::as_str) else {
        return Err(DecodeError::MissingField { field: "table" });
    };
    if is_control_event(event) {
        return Err(DecodeError::ControlFrame {
            event: event.to_string(),
        });
    }
    let payload = object
        .get("payload")
        .ok_or(DecodeError::MissingField { field: "payload" })?;
    let payload = as_object(payload)?;
    let flat = match payload.get("data") {
        Some(data) if !payload.contains_key("table") => as_object(data)?,
        _ => payload,
    };
    Ok((flat, Some(event)))
}

fn is_control_event(event: &str) -> bool {
    let event = event.to_ascii_lowercase();
    matches!(
        event.as_str(),
        "heartbeat" | "phx_reply" | "phx_join" | "phx_leave" | "phx_close" | "phx_error" | "system"
    ) || event.starts_with("presence")
}

fn first_of<'a>(object: &'a Map<String, Json>, keys: &[&str]) -> Option<&'a Json> {
    keys.iter()
        .filter_map(|k| object.get(*k))
        .find(|v| !v.is_null())
}

fn deleted_id(flat: &Map<String, Json>, primary_key: &str) -> Option<Value> {
    first_of(flat, &OLD_RECORD_KEYS)
        .and_then(Json::as_object)
        .and_then(|old| old.get(primary_key))
        .or_else(|| flat.get("id"))
        .filter(|id| !id.is_null())
        .map(|id| Value::from(id.clone()))
}
