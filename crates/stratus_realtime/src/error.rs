//! Error types for the realtime client.

use stratus_codec::CodecError;
use stratus_protocol::DecodeError;
use stratus_query::{FetchError, PredicateError};
use thiserror::Error;

/// Result type for realtime operations.
pub type RealtimeResult<T> = Result<T, RealtimeError>;

/// Errors returned by the realtime client.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RealtimeError {
    /// The client was created outside a tokio runtime.
    #[error("no tokio runtime available")]
    NoRuntime,

    /// The client has been closed.
    #[error("client is closed")]
    ClientClosed,

    /// A frame arrived while no channel session is connected.
    #[error("not connected to the push channel")]
    NotConnected,

    /// The subscription is not registered with this client.
    #[error("unknown subscription {0}")]
    UnknownSubscription(u64),

    /// Opening the push channel failed.
    #[error("connect failed: {message}")]
    ConnectFailed {
        /// Error message.
        message: String,
        /// Whether another attempt may succeed.
        retryable: bool,
    },

    /// The query was built incorrectly.
    #[error(transparent)]
    Predicate(#[from] PredicateError),

    /// The data source failed.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// A push frame could not be decoded.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// A value could not be converted.
    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl RealtimeError {
    /// Creates a retryable connect error.
    pub fn connect_retryable(message: impl Into<String>) -> Self {
        Self::ConnectFailed {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable connect error.
    pub fn connect_fatal(message: impl Into<String>) -> Self {
        Self::ConnectFailed {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            RealtimeError::ConnectFailed { retryable, .. } => *retryable,
            RealtimeError::NotConnected => true,
            RealtimeError::Fetch(e) => e.is_retryable(),
            _ => false,
        }
    }
}
