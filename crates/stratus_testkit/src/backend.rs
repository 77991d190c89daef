//! In-memory backend.
//!
//! [`MemoryBackend`] plays both collaborators of a realtime client: it
//! answers fetches like a request/response server and pushes change frames
//! to every open session like a push channel. Every mutation takes the next
//! sequence number, and fetches report the last sequence they reflect, so a
//! client seeded from it can line up baselines with the event stream.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use stratus_codec::{Row, Value, DEFAULT_PRIMARY_KEY};
use stratus_protocol::{ChangeEvent, RawMessage};
use stratus_query::{DataSource, FetchError, FetchResponse, Query};
use stratus_realtime::{PushConnector, RealtimeError, RealtimeResult};
use tokio::sync::{mpsc, watch};

const SESSION_BUFFER: usize = 1024;

struct BackendState {
    tables: BTreeMap<String, Vec<Row>>,
    sequence: u64,
    sessions: Vec<mpsc::Sender<RawMessage>>,
    failing_connects: u32,
    connects: usize,
    fetch_errors: VecDeque<FetchError>,
    fetches: usize,
}

/// Tables in memory with a push channel.
pub struct MemoryBackend {
    primary_key: String,
    state: Mutex<BackendState>,
    gate: watch::Sender<bool>,
}

impl MemoryBackend {
    /// Creates an empty backend keyed by `id`.
    pub fn new() -> Self {
        Self::with_primary_key(DEFAULT_PRIMARY_KEY)
    }

    /// Creates an empty backend keyed by `primary_key`.
    pub fn with_primary_key(primary_key: impl Into<String>) -> Self {
        let (gate, _) = watch::channel(true);
        Self {
            primary_key: primary_key.into(),
            state: Mutex::new(BackendState {
                tables: BTreeMap::new(),
                sequence: 0,
                sessions: Vec::new(),
                failing_connects: 0,
                connects: 0,
                fetch_errors: VecDeque::new(),
                fetches: 0,
            }),
            gate,
        }
    }

    /// Name of the primary-key column.
    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    /// Loads rows without publishing events or taking sequence numbers.
    pub fn seed(&self, table: &str, rows: impl IntoIterator<Item = serde_json::Value>) {
        let mut state = self.state.lock();
        let stored = state.tables.entry(table.to_string()).or_default();
        for json in rows {
            let row = Row::from_json(&self.primary_key, &json).expect("seed row must be keyed");
            upsert(stored, row);
        }
    }

    /// Inserts a row, or replaces the row with the same identifier.
    pub fn insert(&self, table: &str, json: serde_json::Value) -> u64 {
        let row = Row::from_json(&self.primary_key, &json).expect("inserted row must be keyed");
        let mut state = self.state.lock();
        state.sequence += 1;
        let sequence = state.sequence;
        upsert(state.tables.entry(table.to_string()).or_default(), row.clone());
        self.publish(&mut state, ChangeEvent::inserted(table, row, sequence, 0));
        sequence
    }

    /// Overlays `patch` on an existing row and publishes the full new row.
    ///
    /// Returns `None` when no row has the identifier.
    pub fn update(&self, table: &str, id: impl Into<Value>, patch: serde_json::Value) -> Option<u64> {
        let id = id.into();
        let mut state = self.state.lock();
        let stored = state.tables.get_mut(table)?;
        let position = stored.iter().position(|r| r.id().equals(&id))?;

        let mut patch = patch;
        if let Some(object) = patch.as_object_mut() {
            object.insert(self.primary_key.clone(), id.to_json());
        }
        let partial = Row::from_json(&self.primary_key, &patch).ok()?;
        let row = stored[position].merged(&partial);
        stored[position] = row.clone();

        state.sequence += 1;
        let sequence = state.sequence;
        self.publish(&mut state, ChangeEvent::updated(table, row, sequence, 0));
        Some(sequence)
    }

    /// Deletes a row. Returns `None` when no row has the identifier.
    pub fn delete(&self, table: &str, id: impl Into<Value>) -> Option<u64> {
        let id = id.into();
        let mut state = self.state.lock();
        let stored = state.tables.get_mut(table)?;
        let position = stored.iter().position(|r| r.id().equals(&id))?;
        stored.remove(position);

        state.sequence += 1;
        let sequence = state.sequence;
        self.publish(&mut state, ChangeEvent::deleted(table, id, sequence, 0));
        Some(sequence)
    }

    /// Rows of a table in identifier order.
    pub fn rows(&self, table: &str) -> Vec<Row> {
        let mut rows = self
            .state
            .lock()
            .tables
            .get(table)
            .cloned()
            .unwrap_or_default();
        rows.sort_by(|a, b| a.id().cmp_total(b.id()));
        rows
    }

    /// Last sequence number handed out.
    pub fn sequence(&self) -> u64 {
        self.state.lock().sequence
    }

    /// Closes every open session.
    pub fn drop_connections(&self) {
        let dropped = std::mem::take(&mut self.state.lock().sessions);
        tracing::debug!(sessions = dropped.len(), "memory backend dropped connections");
    }

    /// Makes the next `count` connection attempts fail.
    pub fn fail_next_connects(&self, count: u32) {
        self.state.lock().failing_connects = count;
    }

    /// Makes the next fetch fail with `error`.
    pub fn fail_next_fetch(&self, error: FetchError) {
        self.state.lock().fetch_errors.push_back(error);
    }

    /// Makes subsequent fetches wait until [`release_fetches`](Self::release_fetches).
    pub fn hold_fetches(&self) {
        self.gate.send_replace(false);
    }

    /// Lets held fetches complete. They read the tables as of release.
    pub fn release_fetches(&self) {
        self.gate.send_replace(true);
    }

    /// Number of fetches started.
    pub fn fetch_count(&self) -> usize {
        self.state.lock().fetches
    }

    /// Number of successful connection attempts.
    pub fn connect_count(&self) -> usize {
        self.state.lock().connects
    }

    /// Number of sessions still open.
    pub fn open_sessions(&self) -> usize {
        let mut state = self.state.lock();
        state.sessions.retain(|s| !s.is_closed());
        state.sessions.len()
    }

    fn publish(&self, state: &mut BackendState, event: ChangeEvent) {
        let frame = RawMessage::text(&event.to_frame(&self.primary_key));
        state
            .sessions
            .retain(|session| session.try_send(frame.clone()).is_ok());
    }

    fn answer(&self, query: &Query) -> Result<FetchResponse, FetchError> {
        let mut state = self.state.lock();
        if let Some(error) = state.fetch_errors.pop_front() {
            return Err(error);
        }

        let predicate = query.predicate();
        let mut rows: Vec<Row> = state
            .tables
            .get(predicate.table())
            .map(|rows| rows.iter().filter(|r| predicate.matches(r)).cloned().collect())
            .unwrap_or_default();
        rows.sort_by(|a, b| predicate.compare(a, b));
        let total = rows.len() as u64;

        let offset = predicate.offset().unwrap_or(0) as usize;
        let limit = query.request_limit().map_or(usize::MAX, |l| l as usize);
        let rows = rows
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|r| r.project(&self.primary_key, predicate.fields()))
            .collect();

        let mut response = FetchResponse::new(rows).with_sequence(state.sequence);
        if query.params().count.is_some() {
            response = response.with_count(total);
        }
        Ok(response)
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn upsert(rows: &mut Vec<Row>, row: Row) {
    match rows.iter_mut().find(|r| r.same_row(&row)) {
        Some(existing) => *existing = row,
        None => rows.push(row),
    }
}

#[async_trait]
impl DataSource for MemoryBackend {
    async fn fetch(&self, query: &Query) -> Result<FetchResponse, FetchError> {
        self.state.lock().fetches += 1;

        let mut gate = self.gate.subscribe();
        if gate.wait_for(|open| *open).await.is_err() {
            return Err(FetchError::transport_fatal("memory backend dropped"));
        }
        self.answer(query)
    }
}

#[async_trait]
impl PushConnector for MemoryBackend {
    async fn connect(&self) -> RealtimeResult<mpsc::Receiver<RawMessage>> {
        let mut state = self.state.lock();
        if state.failing_connects > 0 {
            state.failing_connects -= 1;
            return Err(RealtimeError::connect_retryable("memory backend refused connection"));
        }
        let (tx, rx) = mpsc::channel(SESSION_BUFFER);
        state.sessions.push(tx);
        state.connects += 1;
        Ok(rx)
    }
}
