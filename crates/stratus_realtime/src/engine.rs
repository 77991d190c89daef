//! Synchronization engine.
//!
//! [`LiveQueryState`] keeps the materialized result of one predicate and
//! folds change events into it. It is a plain state machine: no locking, no
//! I/O and no listeners. The surrounding [`LiveQuery`](crate::live) shell
//! serializes access and broadcasts snapshots.
//!
//! ## Apply order
//!
//! 1. events for another table are ignored
//! 2. events from another connection epoch are discarded
//! 3. while seeding or reconciling, events are buffered
//! 4. events at or below the last applied sequence are discarded
//! 5. inserts and updates are merged, matched and positioned; deletes remove
//!
//! Under a limit the window is kept at most `limit` rows long. Rows pushed
//! out by an insert are evicted silently; rows removed by a delete or an
//! update leave a gap that is only filled by the next baseline.
//!
//! With an offset the window is one page of the result. Rows before the
//! page are unknown, so an event that may add or remove one of them leaves
//! the page unchanged, marks it stale and reports a gap.
//!
//! Rows are kept with every column the predicate reads; snapshots project
//! them back to the selected columns.

use crate::snapshot::{Phase, Snapshot, SnapshotError};
use std::cmp::Ordering;
use std::sync::Arc;
use stratus_codec::{Row, Value, DEFAULT_PRIMARY_KEY};
use stratus_protocol::{ChangeEvent, ChangeKind};
use stratus_query::{FetchError, FetchResponse, Predicate, QueryData};

/// Why an event was not applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// The event is for another table.
    OtherTable,
    /// The event belongs to an earlier connection epoch.
    StaleEpoch,
    /// The event's sequence was already applied.
    Duplicate,
}

/// Result of [`LiveQueryState::apply_event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The event was dropped.
    Ignored(IgnoreReason),
    /// The event was queued until the baseline is installed.
    Buffered,
    /// The event was applied.
    Applied {
        /// Whether the row set changed.
        changed: bool,
        /// Whether a removal left a limited window short.
        gap: bool,
    },
}

impl ApplyOutcome {
    /// Returns true if the row set changed.
    pub fn changed(&self) -> bool {
        matches!(self, ApplyOutcome::Applied { changed: true, .. })
    }

    /// Returns true if the window may be missing rows.
    pub fn gap(&self) -> bool {
        matches!(self, ApplyOutcome::Applied { gap: true, .. })
    }
}

/// Result of [`LiveQueryState::install_baseline`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InstallOutcome {
    /// Number of rows in the new window.
    pub rows: usize,
    /// Number of buffered events replayed on top.
    pub replayed: usize,
    /// Whether a replayed removal left a limited window short.
    pub gap: bool,
}

/// Materialized result of one predicate.
#[derive(Debug, Clone)]
pub struct LiveQueryState {
    predicate: Arc<Predicate>,
    primary_key: String,
    rows: Vec<Row>,
    last_sequence: u64,
    epoch: u32,
    phase: Phase,
    buffered: Vec<ChangeEvent>,
    error: Option<SnapshotError>,
    stale: bool,
    count: Option<u64>,
}

impl LiveQueryState {
    /// Creates a state waiting for its initial fetch.
    pub fn new(predicate: Arc<Predicate>, epoch: u32) -> Self {
        Self {
            predicate,
            primary_key: DEFAULT_PRIMARY_KEY.to_string(),
            rows: Vec::new(),
            last_sequence: 0,
            epoch,
            phase: Phase::Seeding,
            buffered: Vec::new(),
            error: None,
            stale: false,
            count: None,
        }
    }

    /// Sets the primary-key column kept by snapshot projection.
    pub fn with_primary_key(mut self, primary_key: impl Into<String>) -> Self {
        self.primary_key = primary_key.into();
        self
    }

    /// The state's predicate.
    pub fn predicate(&self) -> &Arc<Predicate> {
        &self.predicate
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Connection epoch the rows belong to.
    pub fn epoch(&self) -> u32 {
        self.epoch
    }

    /// Sequence of the last applied event.
    pub fn last_sequence(&self) -> u64 {
        self.last_sequence
    }

    /// Materialized rows, in predicate order, with every column the
    /// predicate reads.
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// Number of events waiting for the baseline.
    pub fn buffered_len(&self) -> usize {
        self.buffered.len()
    }

    /// Whether the rows may be out of date.
    pub fn is_stale(&self) -> bool {
        self.stale
    }

    /// Folds one change event into the state.
    pub fn apply_event(&mut self, event: ChangeEvent) -> ApplyOutcome {
        if event.table != self.predicate.table() {
            return ApplyOutcome::Ignored(IgnoreReason::OtherTable);
        }
        if event.epoch != self.epoch {
            return ApplyOutcome::Ignored(IgnoreReason::StaleEpoch);
        }
        if self.phase.is_buffering() {
            self.buffered.push(event);
            return ApplyOutcome::Buffered;
        }
        self.apply_live(event)
    }

    fn apply_live(&mut self, event: ChangeEvent) -> ApplyOutcome {
        if event.sequence <= self.last_sequence {
            return ApplyOutcome::Ignored(IgnoreReason::Duplicate);
        }
        self.last_sequence = event.sequence;

        let (changed, gap) = match (event.kind, event.payload) {
            (ChangeKind::Inserted, Some(row)) => self.upsert(row, false),
            (ChangeKind::Updated, Some(row)) => self.upsert(row, true),
            (ChangeKind::Deleted, _) | (_, None) => self.remove(&event.id),
        };
        ApplyOutcome::Applied { changed, gap }
    }

    fn position_of(&self, id: &Value) -> Option<usize> {
        self.rows.iter().position(|r| r.id().equals(id))
    }

    fn paged(&self) -> bool {
        self.predicate.offset().is_some_and(|offset| offset > 0)
    }

    /// True if `row` would sort ahead of the whole page, or the page is
    /// empty.
    fn before_page(&self, row: &Row) -> bool {
        self.rows
            .first()
            .map_or(true, |first| self.predicate.compare(row, first) == Ordering::Less)
    }

    /// Rows before the page may have changed. The page is left as is.
    fn page_shifted(&mut self) -> (bool, bool) {
        (self.mark_stale(), true)
    }

    fn window_full(&self) -> bool {
        self.predicate
            .live_limit()
            .is_some_and(|limit| self.rows.len() >= limit)
    }

    fn upsert(&mut self, incoming: Row, merge: bool) -> (bool, bool) {
        let existing = self.position_of(incoming.id());
        let row = match existing {
            Some(i) if merge => self.rows[i].merged(&incoming),
            _ => incoming,
        };

        let matches = self.predicate.matches(&row);
        if self.paged() && existing.is_none() {
            // An updated row outside the page may have been on an earlier
            // one; a new row ahead of the page pushes it back.
            if merge || (matches && self.before_page(&row)) {
                return self.page_shifted();
            }
        }

        match (existing, matches) {
            (None, false) => (false, false),
            (None, true) => (self.insert_sorted(row).is_some(), false),
            (Some(i), true) => {
                if self.rows[i] == row {
                    return (false, false);
                }
                let was_full = self.window_full();
                let old = self.rows.remove(i);
                let sank = self.predicate.compare(&old, &row) == Ordering::Less;
                let rose = self.predicate.compare(&row, &old) == Ordering::Less;
                let position = self.insert_sorted(row);
                let gap = match position {
                    // A row that moved down into the last slot of a full
                    // window may now rank below rows the window never held.
                    Some(pos) => was_full && sank && pos + 1 == self.rows.len(),
                    None => true,
                };
                if self.paged() && rose && position == Some(0) {
                    // It may now belong on an earlier page.
                    self.mark_stale();
                    return (true, true);
                }
                (true, gap)
            }
            (Some(i), false) => {
                let gap = self.window_full();
                self.rows.remove(i);
                (true, gap)
            }
        }
    }

    /// Inserts a row at its sorted position, keeping the window within the
    /// limit. Returns the position, or `None` if the row falls outside.
    fn insert_sorted(&mut self, row: Row) -> Option<usize> {
        let predicate = &self.predicate;
        let pos = self
            .rows
            .binary_search_by(|probe| predicate.compare(probe, &row))
            .unwrap_or_else(|p| p);
        match predicate.live_limit() {
            Some(limit) if pos >= limit => return None,
            Some(limit) => {
                self.rows.insert(pos, row);
                self.rows.truncate(limit);
            }
            None => self.rows.insert(pos, row),
        }
        Some(pos)
    }

    fn remove(&mut self, id: &Value) -> (bool, bool) {
        match self.position_of(id) {
            Some(i) => {
                let gap = self.window_full();
                self.rows.remove(i);
                (true, gap)
            }
            None if self.paged() => self.page_shifted(),
            None => (false, false),
        }
    }

    /// Starts a reconciliation in `epoch`.
    ///
    /// A state that never finished seeding restarts seeding instead. Events
    /// buffered for an earlier epoch are dropped.
    pub fn begin_reconcile(&mut self, epoch: u32) {
        if epoch != self.epoch {
            self.buffered.clear();
            self.epoch = epoch;
        }
        if self.phase != Phase::Seeding {
            self.phase = Phase::Reconciling;
        }
    }

    /// Replaces the rows with a freshly fetched baseline.
    ///
    /// The new window is built aside and swapped in whole. Buffered events
    /// are then replayed in sequence order; those at or below the baseline
    /// sequence are discarded as duplicates.
    pub fn install_baseline(&mut self, response: FetchResponse) -> InstallOutcome {
        let rows = self.predicate.materialize(response.rows);

        self.rows = rows;
        self.last_sequence = response.sequence.unwrap_or(0);
        self.count = response.count;
        self.phase = Phase::Live;
        self.stale = false;
        self.error = None;

        let mut buffered = std::mem::take(&mut self.buffered);
        buffered.sort_by_key(|e| e.sequence);

        let mut outcome = InstallOutcome::default();
        for event in buffered {
            outcome.replayed += 1;
            outcome.gap |= self.apply_live(event).gap();
        }
        outcome.rows = self.rows.len();
        outcome
    }

    /// Records a failed fetch. The phase is unchanged.
    pub fn fail_fetch(&mut self, error: FetchError) {
        self.error = Some(SnapshotError::Fetch(error));
    }

    /// Marks the rows as possibly out of date. Returns true if this changed
    /// the state.
    pub fn mark_stale(&mut self) -> bool {
        !std::mem::replace(&mut self.stale, true)
    }

    /// Records that the push channel could not be reached. Returns true if
    /// this changed the state.
    pub fn mark_unreachable(&mut self) -> bool {
        let changed = !self.stale || self.error != Some(SnapshotError::Disconnected);
        self.stale = true;
        self.error = Some(SnapshotError::Disconnected);
        changed
    }

    /// Clears a disconnected condition without a new baseline. Returns true
    /// if this changed the state.
    pub fn mark_reachable(&mut self) -> bool {
        if self.error == Some(SnapshotError::Disconnected) {
            self.error = None;
            self.stale = false;
            true
        } else {
            false
        }
    }

    /// Builds the snapshot delivered to listeners.
    ///
    /// Single-row queries report `not found` or `ambiguous` when the window
    /// does not hold exactly one row. An existing fetch or channel error
    /// takes precedence.
    pub fn snapshot(&self) -> Snapshot {
        let loading = self.phase == Phase::Seeding;
        let (data, error) = if loading {
            (None, self.error.clone())
        } else {
            let rows = self
                .rows
                .iter()
                .map(|r| r.project(&self.primary_key, self.predicate.fields()))
                .collect();
            match QueryData::from_rows(rows, self.predicate.is_single(), None) {
                Ok(data) => (Some(data), self.error.clone()),
                Err(e) => (None, self.error.clone().or(Some(e.into()))),
            }
        };

        Snapshot {
            data,
            loading,
            error,
            stale: self.stale,
            count: self.count,
            sequence: self.last_sequence,
            epoch: self.epoch,
            phase: self.phase,
        }
    }
}
