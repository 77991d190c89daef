//! Raw push frames.

use crate::error::{DecodeError, DecodeResult};
use bytes::Bytes;
use std::borrow::Cow;

/// A frame as received from the push channel.
#[derive(Debug, Clone, PartialEq)]
pub enum RawMessage {
    /// JSON text frame.
    Text(String),
    /// CBOR binary frame.
    Binary(Bytes),
    /// Already-parsed JSON, from transports that parse frames themselves.
    Json(serde_json::Value),
}

impl RawMessage {
    /// Creates a JSON text frame.
    pub fn text(json: &serde_json::Value) -> Self {
        RawMessage::Text(json.to_string())
    }

    /// Creates a CBOR binary frame.
    pub fn cbor(json: &serde_json::Value) -> DecodeResult<Self> {
        let bytes = stratus_codec::to_cbor(json).map_err(|e| DecodeError::malformed(e.to_string()))?;
        Ok(RawMessage::Binary(Bytes::from(bytes)))
    }

    /// Parses the frame into JSON.
    pub fn to_json(&self) -> DecodeResult<Cow<'_, serde_json::Value>> {
        match self {
            RawMessage::Text(text) => serde_json::from_str(text)
                .map(Cow::Owned)
                .map_err(|e| DecodeError::malformed(e.to_string())),
            RawMessage::Binary(bytes) => stratus_codec::from_cbor(bytes)
                .map(Cow::Owned)
                .map_err(|e| DecodeError::malformed(e.to_string())),
            RawMessage::Json(json) => Ok(Cow::Borrowed(json)),
        }
    }

    /// Size of the frame in bytes, as received.
    ///
    /// Parsed frames report zero.
    pub fn len(&self) -> usize {
        match self {
            RawMessage::Text(text) => text.len(),
            RawMessage::Binary(bytes) => bytes.len(),
            RawMessage::Json(_) => 0,
        }
    }

    /// Returns true if the frame carries no bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<String> for RawMessage {
    fn from(text: String) -> Self {
        RawMessage::Text(text)
    }
}

impl From<&str> for RawMessage {
    fn from(text: &str) -> Self {
        RawMessage::Text(text.to_string())
    }
}

impl From<Bytes> for RawMessage {
    fn from(bytes: Bytes) -> Self {
        RawMessage::Binary(bytes)
    }
}

impl From<serde_json::Value> for RawMessage {
    fn from(json: serde_json::Value) -> Self {
        RawMessage::Json(json)
    }
}
