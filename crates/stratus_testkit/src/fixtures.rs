//! Row helpers and snapshot recording.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use stratus_codec::{Row, Value, DEFAULT_PRIMARY_KEY};
use stratus_realtime::Snapshot;
use tokio::sync::mpsc;

/// How long [`SnapshotRecorder`] waits for a snapshot.
pub const RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// Builds a row keyed by `id` from a JSON object.
pub fn row(json: serde_json::Value) -> Row {
    Row::from_json(DEFAULT_PRIMARY_KEY, &json).expect("fixture row must be keyed")
}

/// Identifiers of `rows`, in order.
pub fn ids(rows: &[Row]) -> Vec<Value> {
    rows.iter().map(|r| r.id().clone()).collect()
}

/// Integer identifiers of `rows`, in order.
pub fn int_ids(rows: &[Row]) -> Vec<i64> {
    rows.iter().filter_map(|r| r.id().as_integer()).collect()
}

/// A post row for the `posts` table used across tests.
pub fn post(id: i64, status: &str, created_at: i64) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "title": format!("post {}", id),
        "status": status,
        "created_at": created_at,
    })
}

/// Collects every snapshot delivered to a listener.
///
/// # Example
///
/// ```rust,ignore
/// let mut recorder = SnapshotRecorder::new();
/// let _handle = client.subscribe(query, recorder.listener())?;
/// let first = recorder.next().await;
/// assert!(first.loading);
/// ```
pub struct SnapshotRecorder {
    tx: mpsc::UnboundedSender<Snapshot>,
    rx: mpsc::UnboundedReceiver<Snapshot>,
    seen: Arc<Mutex<Vec<Snapshot>>>,
}

impl SnapshotRecorder {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx,
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A listener feeding this recorder.
    pub fn listener(&self) -> impl Fn(&Snapshot) + Send + Sync + 'static {
        let tx = self.tx.clone();
        let seen = Arc::clone(&self.seen);
        move |snapshot: &Snapshot| {
            seen.lock().push(snapshot.clone());
            let _ = tx.send(snapshot.clone());
        }
    }

    /// Waits for the next snapshot.
    ///
    /// Panics after [`RECV_TIMEOUT`].
    pub async fn next(&mut self) -> Snapshot {
        tokio::time::timeout(RECV_TIMEOUT, self.rx.recv())
            .await
            .expect("timed out waiting for a snapshot")
            .expect("recorder channel closed")
    }

    /// Skips snapshots until one satisfies `check`.
    pub async fn wait_for(&mut self, check: impl Fn(&Snapshot) -> bool) -> Snapshot {
        loop {
            let snapshot = self.next().await;
            if check(&snapshot) {
                return snapshot;
            }
        }
    }

    /// Waits for the first snapshot that is neither loading nor buffering.
    pub async fn settled(&mut self) -> Snapshot {
        self.wait_for(|s| !s.loading && !s.phase.is_buffering()).await
    }

    /// Returns true if no snapshot arrives within `wait`.
    pub async fn is_quiet(&mut self, wait: Duration) -> bool {
        tokio::time::timeout(wait, self.rx.recv()).await.is_err()
    }

    /// Number of snapshots delivered so far.
    pub fn count(&self) -> usize {
        self.seen.lock().len()
    }

    /// Every snapshot delivered so far.
    pub fn history(&self) -> Vec<Snapshot> {
        self.seen.lock().clone()
    }
}

impl Default for SnapshotRecorder {
    fn default() -> Self {
        Self::new()
    }
}
