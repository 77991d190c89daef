//! Error types for the protocol crate.

use stratus_codec::CodecError;
use thiserror::Error;

/// Result type for decoding push frames.
pub type DecodeResult<T> = Result<T, DecodeError>;

/// A push frame that could not be turned into a change event.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The frame is not valid JSON or CBOR.
    #[error("malformed frame: {message}")]
    Malformed {
        /// Parser error message.
        message: String,
    },

    /// The frame (or its payload) is not an object.
    #[error("expected an object, found {found}")]
    NotAnObject {
        /// JSON type that was found instead.
        found: &'static str,
    },

    /// A required field is absent.
    #[error("missing field `{field}`")]
    MissingField {
        /// Name of the field.
        field: &'static str,
    },

    /// The table name is empty.
    #[error("table name is empty")]
    EmptyTable,

    /// The change kind is not insert, update or delete.
    #[error("unknown change kind `{kind}`")]
    UnknownKind {
        /// Kind string as received.
        kind: String,
    },

    /// The sequence is not an unsigned integer.
    #[error("invalid sequence: {found}")]
    InvalidSequence {
        /// Value as received.
        found: String,
    },

    /// The record could not be read as a row.
    #[error("invalid record: {0}")]
    InvalidRecord(#[from] CodecError),

    /// A delete carries no identifier.
    #[error("delete event carries no row identifier")]
    MissingIdentifier,

    /// The frame is channel housekeeping, not a change.
    #[error("control frame `{event}`")]
    ControlFrame {
        /// Event name of the frame.
        event: String,
    },
}

impl DecodeError {
    /// Creates a malformed-frame error.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed {
            message: message.into(),
        }
    }

    /// Returns true for housekeeping frames that callers drop silently.
    pub fn is_control_frame(&self) -> bool {
        matches!(self, DecodeError::ControlFrame { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = DecodeError::MissingField { field: "table" };
        assert_eq!(err.to_string(), "missing field `table`");

        let err = DecodeError::from(CodecError::MissingPrimaryKey { field: "id".into() });
        assert!(err.to_string().contains("primary key"));
    }

    #[test]
    fn control_frames() {
        assert!(DecodeError::ControlFrame {
            event: "heartbeat".into()
        }
        .is_control_frame());
        assert!(!DecodeError::EmptyTable.is_control_frame());
    }
}
