//! Realtime client facade.

use crate::config::RealtimeConfig;
use crate::connection::{ConnectionManager, ConnectionState, PushConnector, Session};
use crate::error::{RealtimeError, RealtimeResult};
use crate::live::{Listener, LiveContext, LiveQuery, SubscriptionId};
use crate::registry::{QueryInfo, SubscriptionRegistry};
use crate::snapshot::Snapshot;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use stratus_protocol::{ChangeDecoder, ChangeEvent, DecodeError, RawMessage};
use stratus_query::{CanonicalKey, DataSource, Query, QueryBuilder, ResultEnvelope};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Client counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RealtimeStats {
    /// Number of distinct live queries.
    pub active_queries: usize,
    /// Number of subscriptions across all queries.
    pub subscriptions: usize,
    /// Push channel state.
    pub connection: ConnectionState,
    /// Current connection epoch.
    pub epoch: u32,
}

struct ClientInner {
    id: Uuid,
    config: RealtimeConfig,
    decoder: ChangeDecoder,
    ctx: Arc<LiveContext>,
    registry: SubscriptionRegistry,
    connection: ConnectionManager,
    closed: AtomicBool,
    channel: Mutex<Option<JoinHandle<()>>>,
}

/// Live-query client.
///
/// Owns the subscription table, the connection epoch and the push channel
/// task. Cloning is cheap and clones share everything. Multiple clients can
/// coexist in one process.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use stratus_query::{MockDataSource, QueryBuilder};
/// use stratus_realtime::{RealtimeClient, RealtimeConfig};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let client = RealtimeClient::new(Arc::new(MockDataSource::new()), RealtimeConfig::default()).unwrap();
/// let handle = client
///     .subscribe(QueryBuilder::from("posts").limit(10), |snapshot| {
///         println!("{} rows, loading = {}", snapshot.rows().len(), snapshot.loading);
///     })
///     .unwrap();
/// handle.unsubscribe();
/// # }
/// ```
#[derive(Clone)]
pub struct RealtimeClient {
    inner: Arc<ClientInner>,
}

impl RealtimeClient {
    /// Creates a client on the current tokio runtime.
    pub fn new(source: Arc<dyn DataSource>, config: RealtimeConfig) -> RealtimeResult<Self> {
        let handle = Handle::try_current().map_err(|_| RealtimeError::NoRuntime)?;
        Ok(Self::with_handle(source, config, handle))
    }

    /// Creates a client that spawns its tasks on `handle`.
    pub fn with_handle(source: Arc<dyn DataSource>, config: RealtimeConfig, handle: Handle) -> Self {
        let ctx = Arc::new(LiveContext {
            source,
            handle,
            primary_key: config.primary_key.clone(),
            retry: config.reconnect.clone(),
            emit_unchanged: config.emit_unchanged,
            backfill_on_gap: config.backfill_on_gap,
        });
        let inner = ClientInner {
            id: Uuid::new_v4(),
            decoder: ChangeDecoder::new(config.decoder_config()),
            connection: ConnectionManager::new(config.reconnect.clone()),
            config,
            ctx,
            registry: SubscriptionRegistry::new(),
            closed: AtomicBool::new(false),
            channel: Mutex::new(None),
        };
        tracing::debug!(client = %inner.id, "realtime client created");
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Unique identifier of this client instance.
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Client configuration.
    pub fn config(&self) -> &RealtimeConfig {
        &self.inner.config
    }

    /// Runs a query once through the data source.
    pub async fn execute(&self, builder: QueryBuilder) -> ResultEnvelope {
        builder.execute(self.inner.ctx.source.as_ref()).await
    }

    /// Subscribes to a live query.
    ///
    /// Builder misuse is reported here, before any request. The listener
    /// receives the current snapshot first (a loading snapshot for a new
    /// query) and then one snapshot per change.
    pub fn subscribe<F>(&self, builder: QueryBuilder, listener: F) -> RealtimeResult<SubscriptionHandle>
    where
        F: Fn(&Snapshot) + Send + Sync + 'static,
    {
        let query = builder.build()?;
        self.subscribe_query(&query, listener)
    }

    /// Subscribes to a live query that is already built.
    pub fn subscribe_query<F>(&self, query: &Query, listener: F) -> RealtimeResult<SubscriptionHandle>
    where
        F: Fn(&Snapshot) + Send + Sync + 'static,
    {
        let inner = &self.inner;
        if inner.is_closed() {
            return Err(RealtimeError::ClientClosed);
        }

        let registration = inner
            .registry
            .register(query, || inner.connection.epoch(), &inner.ctx);
        let listener: Listener = Arc::new(listener);
        tracing::debug!(
            key = %registration.live.key(),
            subscription = registration.id,
            created = registration.created,
            "subscribed"
        );

        registration.live.attach(registration.id, listener);
        if registration.created {
            registration.live.seed();
        }

        Ok(SubscriptionHandle {
            id: registration.id,
            key: registration.live.key().clone(),
            client: Arc::downgrade(inner),
            active: true,
        })
    }

    /// Ends a subscription.
    pub fn unsubscribe(&self, mut handle: SubscriptionHandle) -> RealtimeResult<()> {
        if !self.owns(&handle) {
            return Err(RealtimeError::UnknownSubscription(handle.id));
        }
        handle.active = false;
        if self.inner.registry.unregister(handle.id) {
            Ok(())
        } else {
            Err(RealtimeError::UnknownSubscription(handle.id))
        }
    }

    /// Re-fetches the baseline of a subscription's live query.
    ///
    /// Useful after removals under a limit left the window short.
    pub fn refresh(&self, handle: &SubscriptionHandle) -> RealtimeResult<()> {
        let live = self.lookup(handle)?;
        live.reconcile(self.inner.connection.epoch());
        Ok(())
    }

    /// Current snapshot of a subscription's live query.
    pub fn snapshot(&self, handle: &SubscriptionHandle) -> RealtimeResult<Snapshot> {
        self.lookup(handle).map(|live| live.snapshot())
    }

    fn owns(&self, handle: &SubscriptionHandle) -> bool {
        Weak::ptr_eq(&handle.client, &Arc::downgrade(&self.inner))
    }

    fn lookup(&self, handle: &SubscriptionHandle) -> RealtimeResult<Arc<LiveQuery>> {
        if !self.owns(handle) {
            return Err(RealtimeError::UnknownSubscription(handle.id));
        }
        self.inner
            .registry
            .lookup(handle.id)
            .ok_or(RealtimeError::UnknownSubscription(handle.id))
    }

    /// Drives the push channel in a background task.
    ///
    /// The task reconnects with backoff until the client is closed or
    /// dropped. Calling this again replaces the previous task.
    pub fn connect(&self, connector: Arc<dyn PushConnector>) -> RealtimeResult<()> {
        if self.inner.is_closed() {
            return Err(RealtimeError::ClientClosed);
        }
        let weak = Arc::downgrade(&self.inner);
        let task = self
            .inner
            .ctx
            .handle
            .spawn(run_channel(weak, connector));
        if let Some(previous) = self.inner.channel.lock().replace(task) {
            previous.abort();
        }
        Ok(())
    }

    /// Records that a channel session opened.
    ///
    /// On a reconnect every live query reconciles in the new epoch.
    pub fn on_connected(&self) -> Session {
        self.inner.connected()
    }

    /// Records that the channel session closed.
    pub fn on_disconnected(&self) {
        self.inner.disconnected();
    }

    /// Records a failed connection attempt.
    pub fn on_connect_failed(&self) {
        self.inner.connect_failed();
    }

    /// Decodes a frame from the current session and routes it.
    ///
    /// Returns the number of live queries the event was offered to.
    /// Control frames are dropped and count as zero.
    pub fn receive(&self, raw: &RawMessage) -> RealtimeResult<usize> {
        if self.inner.is_closed() {
            return Err(RealtimeError::ClientClosed);
        }
        if self.inner.connection.state() != ConnectionState::Connected {
            return Err(RealtimeError::NotConnected);
        }
        self.inner.receive(raw, self.inner.connection.epoch())
    }

    /// Routes an already-decoded event.
    pub fn apply(&self, event: ChangeEvent) -> RealtimeResult<usize> {
        if self.inner.is_closed() {
            return Err(RealtimeError::ClientClosed);
        }
        Ok(self.inner.dispatch(event))
    }

    /// Push channel state.
    pub fn connection_state(&self) -> ConnectionState {
        self.inner.connection.state()
    }

    /// Current connection epoch.
    pub fn epoch(&self) -> u32 {
        self.inner.connection.epoch()
    }

    /// Client counters.
    pub fn stats(&self) -> RealtimeStats {
        let registry = self.inner.registry.stats();
        RealtimeStats {
            active_queries: registry.active_queries,
            subscriptions: registry.subscriptions,
            connection: self.connection_state(),
            epoch: self.epoch(),
        }
    }

    /// Registered live queries, ordered by key.
    pub fn active_queries(&self) -> Vec<QueryInfo> {
        self.inner.registry.queries()
    }

    /// Stops the channel task and closes every live query.
    pub fn close(&self) {
        self.inner.close();
    }

    /// Returns true once [`close`](Self::close) was called.
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

impl ClientInner {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn connected(&self) -> Session {
        let session = self.connection.on_connected();
        let queries = self.registry.all();
        if session.reconnect {
            tracing::debug!(
                client = %self.id,
                epoch = session.epoch,
                queries = queries.len(),
                "reconnected, reconciling live queries"
            );
            for live in &queries {
                live.reconcile(session.epoch);
            }
        } else {
            tracing::debug!(client = %self.id, "connected");
            for live in &queries {
                live.mark_reachable();
            }
        }
        session
    }

    fn disconnected(&self) {
        if self.connection.on_disconnected() {
            tracing::debug!(client = %self.id, epoch = self.connection.epoch(), "disconnected");
            for live in self.registry.all() {
                live.mark_disconnected();
            }
        }
    }

    fn connect_failed(&self) {
        let failures = self.connection.on_connect_failed();
        tracing::debug!(client = %self.id, failures, "connect failed");
        for live in self.registry.all() {
            live.mark_unreachable();
        }
    }

    fn receive(&self, raw: &RawMessage, epoch: u32) -> RealtimeResult<usize> {
        match self.decoder.decode(raw, epoch) {
            Ok(event) => Ok(self.dispatch(event)),
            Err(DecodeError::ControlFrame { event }) => {
                tracing::trace!(event = %event, "control frame dropped");
                Ok(0)
            }
            Err(e) => {
                tracing::warn!(error = %e, bytes = raw.len(), "undecodable frame dropped");
                Err(e.into())
            }
        }
    }

    fn dispatch(&self, event: ChangeEvent) -> usize {
        let targets = self.registry.for_table(&event.table);
        for live in &targets {
            live.push_event(event.clone());
        }
        targets.len()
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(task) = self.channel.lock().take() {
            task.abort();
        }
        self.registry.close_all();
        tracing::debug!(client = %self.id, "realtime client closed");
    }
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        self.close();
    }
}

async fn run_channel(client: Weak<ClientInner>, connector: Arc<dyn PushConnector>) {
    loop {
        let Some(inner) = client.upgrade() else {
            return;
        };
        if inner.is_closed() {
            return;
        }
        inner.connection.on_connecting();
        drop(inner);

        let connected = connector.connect().await;

        let Some(inner) = client.upgrade() else {
            return;
        };
        match connected {
            Ok(mut frames) => {
                let session = inner.connected();
                drop(inner);

                while let Some(raw) = frames.recv().await {
                    let Some(inner) = client.upgrade() else {
                        return;
                    };
                    if inner.is_closed() {
                        return;
                    }
                    // Decode failures are logged and skipped.
                    let _ = inner.receive(&raw, session.epoch);
                }

                let Some(inner) = client.upgrade() else {
                    return;
                };
                inner.disconnected();
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::warn!(client = %inner.id, error = %e, "push channel unavailable");
                } else {
                    tracing::error!(client = %inner.id, error = %e, "push channel rejected connection");
                }
                inner.connect_failed();
            }
        }

        let Some(inner) = client.upgrade() else {
            return;
        };
        let delay = inner.connection.next_delay();
        drop(inner);
        tokio::time::sleep(delay).await;
    }
}

/// A registered subscription.
///
/// Dropping the handle unsubscribes.
pub struct SubscriptionHandle {
    id: SubscriptionId,
    key: CanonicalKey,
    client: Weak<ClientInner>,
    active: bool,
}

impl SubscriptionHandle {
    /// Subscription identifier.
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Key of the live query this subscription shares.
    pub fn key(&self) -> &CanonicalKey {
        &self.key
    }

    /// Current snapshot, if the subscription is still registered.
    pub fn snapshot(&self) -> Option<Snapshot> {
        let client = self.client.upgrade()?;
        client.registry.lookup(self.id).map(|live| live.snapshot())
    }

    /// Ends the subscription.
    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !std::mem::replace(&mut self.active, false) {
            return;
        }
        if let Some(client) = self.client.upgrade() {
            client.registry.unregister(self.id);
            tracing::debug!(key = %self.key, subscription = self.id, "unsubscribed");
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("active", &self.active)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::mpsc as std_mpsc;
    use std::time::Duration;
    use stratus_codec::Row;
    use stratus_query::{FetchResponse, MockDataSource, PredicateError};

    fn post(id: i64, status: &str, created_at: i64) -> Row {
        Row::from_json("id", &json!({"id": id, "status": status, "created_at": created_at})).unwrap()
    }

    fn published() -> QueryBuilder {
        QueryBuilder::from("posts")
            .eq("status", "published")
            .order("created_at", false)
    }

    fn recorder() -> (
        impl Fn(&Snapshot) + Send + Sync + 'static,
        std_mpsc::Receiver<Snapshot>,
    ) {
        let (tx, rx) = std_mpsc::channel();
        let tx = Mutex::new(tx);
        (
            move |s: &Snapshot| {
                let _ = tx.lock().send(s.clone());
            },
            rx,
        )
    }

    async fn next(rx: &std_mpsc::Receiver<Snapshot>) -> Snapshot {
        for _ in 0..200 {
            if let Ok(s) = rx.try_recv() {
                return s;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("no snapshot received");
    }

    #[tokio::test]
    async fn no_runtime_is_an_error() {
        let result = std::thread::spawn(|| {
            RealtimeClient::new(Arc::new(MockDataSource::new()), RealtimeConfig::default()).err()
        })
        .join()
        .unwrap();
        assert_eq!(result, Some(RealtimeError::NoRuntime));
    }

    #[tokio::test]
    async fn misuse_is_reported_at_subscribe() {
        let source = Arc::new(MockDataSource::new());
        let client = RealtimeClient::new(source.clone(), RealtimeConfig::default()).unwrap();
        let err = client
            .subscribe(QueryBuilder::from("posts").limit(0), |_| {})
            .unwrap_err();
        assert_eq!(err, RealtimeError::Predicate(PredicateError::ZeroLimit));
        assert_eq!(source.fetch_count(), 0);
    }

    #[tokio::test]
    async fn loading_then_seeded() {
        let source = Arc::new(MockDataSource::new());
        source.set_response(FetchResponse::new(vec![post(1, "published", 10)]).with_sequence(3));
        let client = RealtimeClient::new(source, RealtimeConfig::default()).unwrap();

        let (listener, rx) = recorder();
        let handle = client.subscribe(published(), listener).unwrap();

        let first = next(&rx).await;
        assert!(first.loading);
        assert!(first.data.is_none());

        let seeded = next(&rx).await;
        assert!(!seeded.loading);
        assert_eq!(seeded.rows().len(), 1);
        assert_eq!(seeded.sequence, 3);
        assert_eq!(handle.snapshot().unwrap(), seeded);
    }

    #[tokio::test]
    async fn receive_requires_connection() {
        let client = RealtimeClient::new(Arc::new(MockDataSource::new()), RealtimeConfig::default()).unwrap();
        let raw = RawMessage::from(r#"{"table":"posts","type":"DELETE","id":1,"seq":1}"#);
        assert_eq!(client.receive(&raw), Err(RealtimeError::NotConnected));

        client.on_connected();
        assert_eq!(client.receive(&raw), Ok(0));
        assert!(matches!(
            client.receive(&RawMessage::from("{}")),
            Err(RealtimeError::Decode(_))
        ));
        assert_eq!(
            client.receive(&RawMessage::from(r#"{"event":"heartbeat","payload":{}}"#)),
            Ok(0)
        );
    }

    #[tokio::test]
    async fn unsubscribe_unknown_and_foreign_handles() {
        let a = RealtimeClient::new(Arc::new(MockDataSource::new()), RealtimeConfig::default()).unwrap();
        let b = RealtimeClient::new(Arc::new(MockDataSource::new()), RealtimeConfig::default()).unwrap();
        let handle = a.subscribe(published(), |_| {}).unwrap();
        let id = handle.id();
        assert_eq!(b.unsubscribe(handle), Err(RealtimeError::UnknownSubscription(id)));
        // The foreign handle was dropped and released its own subscription.
        assert_eq!(a.stats().subscriptions, 0);
    }

    #[tokio::test]
    async fn close_tears_down() {
        let client = RealtimeClient::new(Arc::new(MockDataSource::new()), RealtimeConfig::default()).unwrap();
        let handle = client.subscribe(published(), |_| {}).unwrap();
        client.close();
        assert!(client.is_closed());
        assert_eq!(client.stats().active_queries, 0);
        assert!(handle.snapshot().is_none());
        assert_eq!(
            client.subscribe(published(), |_| {}).unwrap_err(),
            RealtimeError::ClientClosed
        );
    }
}
