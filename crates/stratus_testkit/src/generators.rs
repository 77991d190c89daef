//! Property-based test generators using proptest.
//!
//! Strategies produce small id spaces on purpose so generated operations
//! collide: updates hit existing rows, deletes remove rows that queries
//! hold, and re-inserts reuse identifiers.

use crate::backend::MemoryBackend;
use proptest::prelude::*;
use stratus_query::QueryBuilder;

/// Statuses used by generated posts.
pub const STATUSES: [&str; 3] = ["draft", "published", "archived"];

/// Strategy for a post status.
pub fn status_strategy() -> impl Strategy<Value = &'static str> {
    prop::sample::select(&STATUSES[..])
}

/// Strategy for a post row with an identifier below `max_id`.
pub fn post_strategy(max_id: i64) -> impl Strategy<Value = serde_json::Value> {
    (0..max_id, status_strategy(), 0i64..50)
        .prop_map(|(id, status, created_at)| crate::fixtures::post(id, status, created_at))
}

/// A mutation against the `posts` table.
#[derive(Debug, Clone)]
pub enum PostOperation {
    /// Insert or replace a post.
    Insert {
        /// Full row.
        row: serde_json::Value,
    },
    /// Change some columns of a post.
    Update {
        /// Post identifier.
        id: i64,
        /// New status, if changed.
        status: Option<&'static str>,
        /// New creation time, if changed.
        created_at: Option<i64>,
    },
    /// Delete a post.
    Delete {
        /// Post identifier.
        id: i64,
    },
}

impl PostOperation {
    /// Applies the operation to `backend`. Returns the sequence it took, if
    /// it changed anything.
    pub fn apply(&self, backend: &MemoryBackend) -> Option<u64> {
        match self {
            PostOperation::Insert { row } => Some(backend.insert("posts", row.clone())),
            PostOperation::Update {
                id,
                status,
                created_at,
            } => {
                let mut patch = serde_json::Map::new();
                if let Some(status) = status {
                    patch.insert("status".into(), (*status).into());
                }
                if let Some(created_at) = created_at {
                    patch.insert("created_at".into(), (*created_at).into());
                }
                backend.update("posts", *id, serde_json::Value::Object(patch))
            }
            PostOperation::Delete { id } => backend.delete("posts", *id),
        }
    }
}

/// Strategy for one post operation.
pub fn post_operation_strategy(max_id: i64) -> impl Strategy<Value = PostOperation> {
    prop_oneof![
        3 => post_strategy(max_id).prop_map(|row| PostOperation::Insert { row }),
        3 => (0..max_id, prop::option::of(status_strategy()), prop::option::of(0i64..50))
            .prop_map(|(id, status, created_at)| PostOperation::Update { id, status, created_at }),
        2 => (0..max_id).prop_map(|id| PostOperation::Delete { id }),
    ]
}

/// Strategy for a sequence of post operations.
pub fn post_operations_strategy(
    max_id: i64,
    min_ops: usize,
    max_ops: usize,
) -> impl Strategy<Value = Vec<PostOperation>> {
    prop::collection::vec(post_operation_strategy(max_id), min_ops..max_ops)
}

/// Strategy for a query over `posts`.
///
/// Covers unfiltered and filtered queries, both sort directions, narrowed
/// selections and optional limits and offsets.
pub fn posts_query_strategy() -> impl Strategy<Value = QueryBuilder> {
    (
        prop::option::of(status_strategy()),
        any::<bool>(),
        any::<bool>(),
        prop::option::of(1u64..6),
        prop::option::of(1u64..4),
    )
        .prop_map(|(status, ascending, narrow, limit, offset)| {
            let mut builder = QueryBuilder::from("posts").order("created_at", ascending);
            if narrow {
                builder = builder.select("id, title");
            }
            if let Some(status) = status {
                builder = builder.eq("status", status);
            }
            if let Some(limit) = limit {
                builder = builder.limit(limit);
            }
            if let Some(offset) = offset {
                builder = builder.offset(offset);
            }
            builder
        })
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}
