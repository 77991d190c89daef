//! Error types for queries.

use thiserror::Error;

/// Result type for building queries.
pub type PredicateResult<T> = Result<T, PredicateError>;

/// Misuse of the query builder.
///
/// These are reported by the terminal builder methods before any request is
/// made.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PredicateError {
    /// No table name was given.
    #[error("table name must not be empty")]
    EmptyTable,

    /// A filter, order or select entry used an empty column name.
    #[error("column name must not be empty (in `{method}`)")]
    EmptyField {
        /// Builder method that received the empty name.
        method: &'static str,
    },

    /// `single()` was combined with a limit that allows more than one row.
    #[error("single() cannot be combined with limit({limit})")]
    SingleWithLimit {
        /// The conflicting limit.
        limit: u64,
    },

    /// `limit(0)` was requested.
    #[error("limit must be greater than zero")]
    ZeroLimit,

    /// `range(from, to)` with `to < from`.
    #[error("invalid range {from}..={to}")]
    InvalidRange {
        /// First row index.
        from: u64,
        /// Last row index (inclusive).
        to: u64,
    },

    /// `page(_, 0)` was requested.
    #[error("page size must be greater than zero")]
    ZeroPageSize,

    /// The page offset does not fit in 64 bits.
    #[error("page {index} of size {size} overflows the row offset")]
    PageOverflow {
        /// Zero-based page index.
        index: u64,
        /// Page size.
        size: u64,
    },
}

/// A failed fetch through the data-access collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the request can be retried.
        retryable: bool,
    },

    /// The backend answered with an error status.
    #[error("server error ({status}): {message}")]
    Server {
        /// HTTP-like status code.
        status: u16,
        /// Error message from the backend.
        message: String,
    },

    /// The request was not authorized.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The response could not be interpreted.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl FetchError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Transport { retryable, .. } => *retryable,
            FetchError::Server { status, .. } => *status >= 500,
            FetchError::Unauthorized(_) | FetchError::InvalidResponse(_) => false,
        }
    }
}
