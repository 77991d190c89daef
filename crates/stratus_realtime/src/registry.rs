//! Subscription registry.
//!
//! Maps canonical predicate keys to live queries so that structurally equal
//! subscriptions share one state, and subscription ids to the key they hold.
//! Subscriber counts are kept under the registry lock: a state is closed
//! exactly when its last subscriber leaves, and a later subscription with
//! the same key starts from scratch.

use crate::live::{LiveContext, LiveQuery, SubscriptionId};
use crate::snapshot::Phase;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use stratus_query::{CanonicalKey, Query};

/// Registration details for one live query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryInfo {
    /// Deduplication key.
    pub key: CanonicalKey,
    /// Table the query reads.
    pub table: String,
    /// Number of subscriptions sharing the query.
    pub subscribers: usize,
    /// Current phase.
    pub phase: Phase,
}

/// Registry counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegistryStats {
    /// Number of distinct live queries.
    pub active_queries: usize,
    /// Number of subscriptions across all queries.
    pub subscriptions: usize,
}

pub(crate) struct Registration {
    pub(crate) id: SubscriptionId,
    pub(crate) live: Arc<LiveQuery>,
    pub(crate) created: bool,
}

struct Entry {
    live: Arc<LiveQuery>,
    subscribers: usize,
}

#[derive(Default)]
struct Tables {
    queries: HashMap<CanonicalKey, Entry>,
    subscriptions: HashMap<SubscriptionId, CanonicalKey>,
}

pub(crate) struct SubscriptionRegistry {
    tables: Mutex<Tables>,
    next_id: AtomicU64,
}

impl SubscriptionRegistry {
    pub(crate) fn new() -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Registers a subscription, creating the live query if needed.
    ///
    /// `epoch` is read under the registry lock so a concurrent reconnect
    /// either sees the new query or the query sees the new epoch.
    pub(crate) fn register(
        &self,
        query: &Query,
        epoch: impl FnOnce() -> u32,
        ctx: &Arc<LiveContext>,
    ) -> Registration {
        let key = query.canonical_key();
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        let mut tables = self.tables.lock();
        let (live, created) = match tables.queries.get_mut(&key) {
            Some(entry) => {
                entry.subscribers += 1;
                (Arc::clone(&entry.live), false)
            }
            None => {
                let live = Arc::new(LiveQuery::new(key.clone(), query, epoch(), Arc::clone(ctx)));
                tables.queries.insert(
                    key.clone(),
                    Entry {
                        live: Arc::clone(&live),
                        subscribers: 1,
                    },
                );
                (live, true)
            }
        };
        tables.subscriptions.insert(id, key);

        Registration { id, live, created }
    }

    /// Removes a subscription. Returns false if it was not registered.
    pub(crate) fn unregister(&self, id: SubscriptionId) -> bool {
        let live = {
            let mut tables = self.tables.lock();
            let Some(key) = tables.subscriptions.remove(&id) else {
                return false;
            };
            let Some(entry) = tables.queries.get_mut(&key) else {
                return true;
            };
            entry.subscribers = entry.subscribers.saturating_sub(1);
            if entry.subscribers == 0 {
                if let Some(entry) = tables.queries.remove(&key) {
                    tracing::debug!(key = %key, "last subscriber left, closing live query");
                    entry.live.close();
                }
                return true;
            }
            Arc::clone(&entry.live)
        };
        live.detach(id);
        true
    }

    pub(crate) fn lookup(&self, id: SubscriptionId) -> Option<Arc<LiveQuery>> {
        let tables = self.tables.lock();
        let key = tables.subscriptions.get(&id)?;
        tables.queries.get(key).map(|e| Arc::clone(&e.live))
    }

    pub(crate) fn for_table(&self, table: &str) -> Vec<Arc<LiveQuery>> {
        self.tables
            .lock()
            .queries
            .values()
            .filter(|e| e.live.table() == table)
            .map(|e| Arc::clone(&e.live))
            .collect()
    }

    pub(crate) fn all(&self) -> Vec<Arc<LiveQuery>> {
        self.tables
            .lock()
            .queries
            .values()
            .map(|e| Arc::clone(&e.live))
            .collect()
    }

    pub(crate) fn stats(&self) -> RegistryStats {
        let tables = self.tables.lock();
        RegistryStats {
            active_queries: tables.queries.len(),
            subscriptions: tables.subscriptions.len(),
        }
    }

    pub(crate) fn queries(&self) -> Vec<QueryInfo> {
        let entries: Vec<(Arc<LiveQuery>, usize)> = self
            .tables
            .lock()
            .queries
            .values()
            .map(|e| (Arc::clone(&e.live), e.subscribers))
            .collect();

        let mut infos: Vec<QueryInfo> = entries
            .into_iter()
            .map(|(live, subscribers)| QueryInfo {
                key: live.key().clone(),
                table: live.table().to_string(),
                subscribers,
                phase: live.snapshot().phase,
            })
            .collect();
        infos.sort_by(|a, b| a.key.cmp(&b.key));
        infos
    }

    /// Closes every live query and forgets every subscription.
    pub(crate) fn close_all(&self) {
        let mut tables = self.tables.lock();
        tables.subscriptions.clear();
        for (_, entry) in tables.queries.drain() {
            entry.live.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReconnectConfig;
    use stratus_query::{MockDataSource, QueryBuilder};
    use tokio::runtime::Handle;

    fn ctx() -> Arc<LiveContext> {
        Arc::new(LiveContext {
            source: Arc::new(MockDataSource::new()),
            handle: Handle::current(),
            primary_key: "id".into(),
            retry: ReconnectConfig::immediate(),
            emit_unchanged: false,
            backfill_on_gap: false,
        })
    }

    fn posts(status: &str) -> Query {
        QueryBuilder::from("posts").eq("status", status).build().unwrap()
    }

    #[tokio::test]
    async fn equal_predicates_share_one_state() {
        let registry = SubscriptionRegistry::new();
        let ctx = ctx();

        let a = registry.register(&posts("published"), || 0, &ctx);
        let b = registry.register(&posts("published"), || 0, &ctx);
        let c = registry.register(&posts("draft"), || 0, &ctx);

        assert!(a.created);
        assert!(!b.created);
        assert!(c.created);
        assert!(Arc::ptr_eq(&a.live, &b.live));
        assert_ne!(a.id, b.id);
        assert_eq!(
            registry.stats(),
            RegistryStats {
                active_queries: 2,
                subscriptions: 3
            }
        );
    }

    #[tokio::test]
    async fn last_unregister_closes_state() {
        let registry = SubscriptionRegistry::new();
        let ctx = ctx();

        let a = registry.register(&posts("published"), || 0, &ctx);
        let b = registry.register(&posts("published"), || 0, &ctx);

        assert!(registry.unregister(a.id));
        assert!(!a.live.is_closed());
        assert!(registry.unregister(b.id));
        assert!(b.live.is_closed());
        assert!(!registry.unregister(b.id));
        assert_eq!(registry.stats(), RegistryStats::default());

        let again = registry.register(&posts("published"), || 0, &ctx);
        assert!(again.created);
        assert!(!Arc::ptr_eq(&again.live, &a.live));
    }

    #[tokio::test]
    async fn routes_by_table() {
        let registry = SubscriptionRegistry::new();
        let ctx = ctx();
        registry.register(&posts("published"), || 0, &ctx);
        registry.register(
            &QueryBuilder::from("comments").build().unwrap(),
            || 0,
            &ctx,
        );

        assert_eq!(registry.for_table("posts").len(), 1);
        assert_eq!(registry.for_table("users").len(), 0);
        assert_eq!(registry.all().len(), 2);

        let infos = registry.queries();
        assert_eq!(infos.len(), 2);
        assert!(infos.iter().all(|i| i.phase == Phase::Seeding && i.subscribers == 1));
    }

    #[tokio::test]
    async fn close_all_closes_everything() {
        let registry = SubscriptionRegistry::new();
        let ctx = ctx();
        let a = registry.register(&posts("published"), || 0, &ctx);
        registry.close_all();
        assert!(a.live.is_closed());
        assert!(registry.lookup(a.id).is_none());
    }
}
