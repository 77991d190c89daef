//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur while converting wire data into rows and values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Failed to encode a value.
    #[error("encoding failed: {message}")]
    EncodingFailed {
        /// Description of the encoding error.
        message: String,
    },

    /// Failed to decode bytes.
    #[error("decoding failed: {message}")]
    DecodingFailed {
        /// Description of the decoding error.
        message: String,
    },

    /// A record was expected to be an object.
    #[error("expected an object, found {found}")]
    NotAnObject {
        /// JSON type that was found instead.
        found: &'static str,
    },

    /// The primary-key column is absent from a record.
    #[error("record is missing primary key field `{field}`")]
    MissingPrimaryKey {
        /// Name of the primary-key column.
        field: String,
    },

    /// The primary-key column is present but null.
    #[error("primary key field `{field}` is null")]
    NullPrimaryKey {
        /// Name of the primary-key column.
        field: String,
    },
}

impl CodecError {
    /// Creates an encoding error.
    pub fn encoding(message: impl Into<String>) -> Self {
        Self::EncodingFailed {
            message: message.into(),
        }
    }

    /// Creates a decoding error.
    pub fn decoding(message: impl Into<String>) -> Self {
        Self::DecodingFailed {
            message: message.into(),
        }
    }

    /// Returns true if the error is about the primary key.
    pub fn is_primary_key_error(&self) -> bool {
        matches!(
            self,
            CodecError::MissingPrimaryKey { .. } | CodecError::NullPrimaryKey { .. }
        )
    }
}
