//! Immutable views of a live query.

use stratus_codec::Row;
use stratus_query::{FetchError, QueryData, ResultError};
use thiserror::Error;

/// Lifecycle phase of a live query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Waiting for the initial fetch.
    Seeding,
    /// Applying change events.
    Live,
    /// Re-fetching a baseline after a reconnect or refresh.
    Reconciling,
}

impl Phase {
    /// Returns true while change events are being buffered.
    pub fn is_buffering(&self) -> bool {
        matches!(self, Phase::Seeding | Phase::Reconciling)
    }
}

/// Error carried by a [`Snapshot`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SnapshotError {
    /// The last fetch failed.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// A single-row query currently matches zero or several rows.
    #[error(transparent)]
    Result(#[from] ResultError),

    /// The push channel could not be reached.
    #[error("disconnected")]
    Disconnected,
}

/// The value delivered to listeners.
///
/// Snapshots are immutable; a listener may keep one for as long as it likes.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    /// Current rows, or `None` while loading or when a single-row query has
    /// no unique result.
    pub data: Option<QueryData>,
    /// True until the initial fetch completes.
    pub loading: bool,
    /// Degraded condition, if any.
    pub error: Option<SnapshotError>,
    /// True when the rows may be out of date because the channel dropped.
    pub stale: bool,
    /// Row count reported by the last baseline fetch.
    pub count: Option<u64>,
    /// Sequence of the last applied change.
    pub sequence: u64,
    /// Connection epoch the rows belong to.
    pub epoch: u32,
    /// Phase the query was in when the snapshot was taken.
    pub phase: Phase,
}

impl Snapshot {
    /// Rows in the snapshot; empty while loading.
    pub fn rows(&self) -> &[Row] {
        self.data.as_ref().map(QueryData::rows).unwrap_or(&[])
    }

    /// The single row of a single-row query.
    pub fn single(&self) -> Option<&Row> {
        self.data.as_ref().and_then(QueryData::as_single)
    }

    /// Returns true if the snapshot has data and no error.
    pub fn is_healthy(&self) -> bool {
        self.data.is_some() && self.error.is_none() && !self.stale
    }
}
