//! Result envelopes returned by one-shot queries.

use crate::error::{FetchError, PredicateError};
use crate::predicate::Predicate;
use crate::source::FetchResponse;
use std::sync::Arc;
use stratus_codec::Row;
use thiserror::Error;

/// Outcome of a single-row query that did not find exactly one row.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultError {
    /// No row matched.
    #[error("not found")]
    NotFound,

    /// More than one row matched.
    #[error("ambiguous: {matched} rows matched")]
    Ambiguous {
        /// Number of matching rows known to the client.
        matched: u64,
    },
}

/// Any error carried by a [`ResultEnvelope`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    /// The query was built incorrectly.
    #[error(transparent)]
    Predicate(#[from] PredicateError),

    /// The data source failed.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// A single-row query found zero or several rows.
    #[error(transparent)]
    Result(#[from] ResultError),
}

impl QueryError {
    /// Returns true if retrying the same query may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, QueryError::Fetch(e) if e.is_retryable())
    }
}

/// Rows returned by a query.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryData {
    /// An ordered list of rows.
    Rows(Arc<[Row]>),
    /// The one row of a single-row query.
    Single(Row),
}

impl QueryData {
    /// Shapes rows according to the query's cardinality.
    ///
    /// A single-row query is ambiguous when more than one row is present or
    /// the reported count exceeds one.
    pub fn from_rows(
        rows: Vec<Row>,
        single: bool,
        reported_count: Option<u64>,
    ) -> Result<QueryData, ResultError> {
        if !single {
            return Ok(QueryData::Rows(rows.into()));
        }
        let matched = reported_count.unwrap_or(0).max(rows.len() as u64);
        match matched {
            0 => Err(ResultError::NotFound),
            1 => rows
                .into_iter()
                .next()
                .map(QueryData::Single)
                .ok_or(ResultError::NotFound),
            _ => Err(ResultError::Ambiguous { matched }),
        }
    }

    /// Rows as a slice; a single row is a slice of one.
    pub fn rows(&self) -> &[Row] {
        match self {
            QueryData::Rows(rows) => rows,
            QueryData::Single(row) => std::slice::from_ref(row),
        }
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows().len()
    }

    /// Returns true if there are no rows.
    pub fn is_empty(&self) -> bool {
        self.rows().is_empty()
    }

    /// The single row, if this is a single-row result.
    pub fn as_single(&self) -> Option<&Row> {
        match self {
            QueryData::Single(row) => Some(row),
            QueryData::Rows(_) => None,
        }
    }
}

/// `{ data, error, count }` result of a one-shot query.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResultEnvelope {
    /// Rows, when the query succeeded.
    pub data: Option<QueryData>,
    /// Error, when the query failed.
    pub error: Option<QueryError>,
    /// Row count reported by the backend, when one was requested.
    pub count: Option<u64>,
}

impl ResultEnvelope {
    /// A successful envelope.
    pub fn success(data: QueryData, count: Option<u64>) -> Self {
        Self {
            data: Some(data),
            error: None,
            count,
        }
    }

    /// A failed envelope.
    pub fn failure(error: QueryError) -> Self {
        Self {
            data: None,
            error: Some(error),
            count: None,
        }
    }

    pub(crate) fn from_response(predicate: &Predicate, response: FetchResponse) -> Self {
        let count = response.count;
        match QueryData::from_rows(response.rows, predicate.is_single(), count) {
            Ok(data) => Self::success(data, count),
            Err(e) => Self {
                data: None,
                error: Some(e.into()),
                count,
            },
        }
    }

    /// Returns true if the envelope carries data and no error.
    pub fn is_ok(&self) -> bool {
        self.error.is_none() && self.data.is_some()
    }
}
