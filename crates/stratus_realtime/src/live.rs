//! Per-query shell around [`LiveQueryState`].
//!
//! Every change to a state goes through a work queue. Whoever pushes onto an
//! idle queue drains it; everyone else just enqueues. Each work item is
//! processed under the state lock and the resulting snapshot is delivered
//! after the lock is released, so listeners may call back into the client.

use crate::config::ReconnectConfig;
use crate::engine::{ApplyOutcome, LiveQueryState};
use crate::snapshot::Snapshot;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use stratus_protocol::ChangeEvent;
use stratus_query::{CanonicalKey, DataSource, FetchError, FetchResponse, Query};
use tokio::runtime::Handle;

/// Callback receiving snapshots.
pub type Listener = Arc<dyn Fn(&Snapshot) + Send + Sync>;

/// Identifier of one subscription.
pub type SubscriptionId = u64;

/// Shared by every live query of one client.
pub(crate) struct LiveContext {
    pub(crate) source: Arc<dyn DataSource>,
    pub(crate) handle: Handle,
    pub(crate) primary_key: String,
    pub(crate) retry: ReconnectConfig,
    pub(crate) emit_unchanged: bool,
    pub(crate) backfill_on_gap: bool,
}

enum Work {
    Event(ChangeEvent),
    Attach(SubscriptionId, Listener),
    Install { generation: u64, response: FetchResponse },
    FetchFailed { generation: u64, error: FetchError },
    Reconcile { epoch: u32 },
    Disconnected,
    Unreachable,
    Reachable,
}

/// Snapshot plus the listeners it goes to.
struct Emission {
    snapshot: Snapshot,
    targets: Vec<Listener>,
}

struct Inner {
    state: LiveQueryState,
    listeners: Vec<(SubscriptionId, Listener)>,
    queue: VecDeque<Work>,
    draining: bool,
}

impl Inner {
    /// Current snapshot for every listener.
    fn emission(&self) -> Emission {
        Emission {
            snapshot: self.state.snapshot(),
            targets: self.listeners.iter().map(|(_, l)| Arc::clone(l)).collect(),
        }
    }
}

pub(crate) struct LiveQuery {
    key: CanonicalKey,
    request: Query,
    ctx: Arc<LiveContext>,
    inner: Mutex<Inner>,
    closed: AtomicBool,
    generation: AtomicU64,
}

impl LiveQuery {
    pub(crate) fn new(key: CanonicalKey, query: &Query, epoch: u32, ctx: Arc<LiveContext>) -> Self {
        let state = LiveQueryState::new(Arc::clone(query.predicate()), epoch)
            .with_primary_key(ctx.primary_key.as_str());
        Self {
            key,
            request: query.live(),
            ctx,
            inner: Mutex::new(Inner {
                state,
                listeners: Vec::new(),
                queue: VecDeque::new(),
                draining: false,
            }),
            closed: AtomicBool::new(false),
            generation: AtomicU64::new(0),
        }
    }

    pub(crate) fn key(&self) -> &CanonicalKey {
        &self.key
    }

    pub(crate) fn table(&self) -> &str {
        self.request.predicate().table()
    }

    pub(crate) fn snapshot(&self) -> Snapshot {
        self.inner.lock().state.snapshot()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Stops all further processing. Pending fetches are discarded when
    /// they complete.
    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.generation.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.inner.lock();
        inner.queue.clear();
        inner.listeners.clear();
    }

    pub(crate) fn attach(self: &Arc<Self>, id: SubscriptionId, listener: Listener) {
        self.submit(Work::Attach(id, listener));
    }

    /// Removes a listener. It receives nothing emitted after this returns,
    /// except an emission already being delivered.
    pub(crate) fn detach(&self, id: SubscriptionId) {
        let mut inner = self.inner.lock();
        inner.listeners.retain(|(lid, _)| *lid != id);
        inner
            .queue
            .retain(|work| !matches!(work, Work::Attach(lid, _) if *lid == id));
    }

    pub(crate) fn push_event(self: &Arc<Self>, event: ChangeEvent) {
        self.submit(Work::Event(event));
    }

    pub(crate) fn mark_disconnected(self: &Arc<Self>) {
        self.submit(Work::Disconnected);
    }

    pub(crate) fn mark_unreachable(self: &Arc<Self>) {
        self.submit(Work::Unreachable);
    }

    pub(crate) fn mark_reachable(self: &Arc<Self>) {
        self.submit(Work::Reachable);
    }

    /// Starts the initial fetch.
    pub(crate) fn seed(self: &Arc<Self>) {
        tracing::debug!(key = %self.key, "seeding live query");
        self.spawn_fetch();
    }

    /// Re-fetches the baseline in `epoch`, buffering events meanwhile.
    pub(crate) fn reconcile(self: &Arc<Self>, epoch: u32) {
        if self.is_closed() {
            return;
        }
        tracing::debug!(key = %self.key, epoch, "reconciling live query");
        self.submit(Work::Reconcile { epoch });
        self.spawn_fetch();
    }

    fn current_epoch(&self) -> u32 {
        self.inner.lock().state.epoch()
    }

    fn is_current(&self, generation: u64) -> bool {
        !self.is_closed() && self.generation.load(Ordering::SeqCst) == generation
    }

    fn spawn_fetch(self: &Arc<Self>) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let live = Arc::clone(self);
        self.ctx.handle.spawn(async move {
            live.run_fetch(generation).await;
        });
    }

    async fn run_fetch(self: Arc<Self>, generation: u64) {
        let mut attempt = 0u32;
        loop {
            if !self.is_current(generation) {
                tracing::trace!(key = %self.key, generation, "fetch superseded");
                return;
            }
            match self.ctx.source.fetch(&self.request).await {
                Ok(response) => {
                    self.submit(Work::Install {
                        generation,
                        response,
                    });
                    return;
                }
                Err(error) => {
                    let retryable = error.is_retryable();
                    tracing::warn!(key = %self.key, attempt, retryable, error = %error, "fetch failed");
                    self.submit(Work::FetchFailed { generation, error });
                    if !retryable {
                        return;
                    }
                    attempt = attempt.saturating_add(1);
                    tokio::time::sleep(self.ctx.retry.delay_for_attempt(attempt)).await;
                }
            }
        }
    }

    fn submit(self: &Arc<Self>, work: Work) {
        {
            let mut inner = self.inner.lock();
            if self.is_closed() {
                return;
            }
            inner.queue.push_back(work);
            if inner.draining {
                return;
            }
            inner.draining = true;
        }
        self.drain();
    }

    fn drain(self: &Arc<Self>) {
        loop {
            let (emission, backfill) = {
                let mut inner = self.inner.lock();
                let Some(work) = inner.queue.pop_front() else {
                    inner.draining = false;
                    return;
                };
                self.process(&mut inner, work)
            };

            if let Some(emission) = emission {
                for listener in &emission.targets {
                    listener(&emission.snapshot);
                }
            }
            if backfill {
                self.backfill();
            }
        }
    }

    fn backfill(self: &Arc<Self>) {
        tracing::debug!(key = %self.key, "window gap, re-fetching baseline");
        self.reconcile(self.current_epoch());
    }

    fn process(&self, inner: &mut Inner, work: Work) -> (Option<Emission>, bool) {
        match work {
            Work::Attach(id, listener) => {
                let snapshot = inner.state.snapshot();
                inner.listeners.push((id, Arc::clone(&listener)));
                (
                    Some(Emission {
                        snapshot,
                        targets: vec![listener],
                    }),
                    false,
                )
            }
            Work::Event(event) => {
                let sequence = event.sequence;
                match inner.state.apply_event(event) {
                    ApplyOutcome::Ignored(reason) => {
                        tracing::trace!(key = %self.key, sequence, ?reason, "event discarded");
                        (None, false)
                    }
                    ApplyOutcome::Buffered => (None, false),
                    outcome => {
                        let emit = outcome.changed() || self.ctx.emit_unchanged;
                        let backfill = outcome.gap() && self.ctx.backfill_on_gap;
                        (emit.then(|| inner.emission()), backfill)
                    }
                }
            }
            Work::Install {
                generation,
                response,
            } => {
                if !self.is_current(generation) {
                    tracing::trace!(key = %self.key, generation, "stale fetch result discarded");
                    return (None, false);
                }
                let outcome = inner.state.install_baseline(response);
                tracing::debug!(
                    key = %self.key,
                    rows = outcome.rows,
                    replayed = outcome.replayed,
                    sequence = inner.state.last_sequence(),
                    "baseline installed"
                );
                let backfill = outcome.gap && self.ctx.backfill_on_gap;
                (Some(inner.emission()), backfill)
            }
            Work::FetchFailed { generation, error } => {
                if !self.is_current(generation) {
                    return (None, false);
                }
                inner.state.fail_fetch(error);
                (Some(inner.emission()), false)
            }
            Work::Reconcile { epoch } => {
                inner.state.begin_reconcile(epoch);
                (None, false)
            }
            Work::Disconnected => {
                let changed = inner.state.mark_stale();
                (changed.then(|| inner.emission()), false)
            }
            Work::Unreachable => {
                let changed = inner.state.mark_unreachable();
                (changed.then(|| inner.emission()), false)
            }
            Work::Reachable => {
                let changed = inner.state.mark_reachable();
                (changed.then(|| inner.emission()), false)
            }
        }
    }
}
