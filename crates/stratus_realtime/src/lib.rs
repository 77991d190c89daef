//! # Stratus Realtime
//!
//! Live queries over a request/response backend and a push channel of row
//! changes.
//!
//! This crate provides:
//! - [`RealtimeClient`], which owns subscriptions and the push channel
//! - [`SubscriptionHandle`], the caller's side of one subscription
//! - [`LiveQueryState`], the synchronization engine that keeps a query
//!   result current from change events
//! - [`ConnectionManager`], the connection lifecycle with epochs and
//!   backoff
//!
//! ## Model
//!
//! A subscription seeds its result with one fetch, then applies change
//! events for its table in sequence order. Structurally equal predicates
//! share one live query. Events that arrive while a fetch is outstanding
//! are buffered and replayed over the fetched baseline.
//!
//! Every reconnect starts a new epoch. Events stamped with an older epoch
//! are discarded and every live query re-fetches its baseline, so changes
//! missed while disconnected never leave a result permanently wrong.
//!
//! ## Usage
//!
//! ```
//! use std::sync::Arc;
//! use stratus_protocol::RawMessage;
//! use stratus_query::{FetchResponse, MockDataSource, QueryBuilder};
//! use stratus_realtime::{RealtimeClient, RealtimeConfig};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let source = Arc::new(MockDataSource::new());
//! source.set_response(FetchResponse::default().with_sequence(1));
//!
//! let client = RealtimeClient::new(source, RealtimeConfig::default()).unwrap();
//! let _handle = client
//!     .subscribe(QueryBuilder::from("posts").order("created_at", false), |snapshot| {
//!         println!("posts: {}", snapshot.rows().len());
//!     })
//!     .unwrap();
//!
//! client.on_connected();
//! let frame = RawMessage::from(
//!     r#"{"table":"posts","type":"INSERT","record":{"id":1,"created_at":5},"seq":2}"#,
//! );
//! assert_eq!(client.receive(&frame), Ok(1));
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod client;
mod config;
mod connection;
mod engine;
mod error;
mod live;
mod registry;
mod snapshot;

pub use client::{RealtimeClient, RealtimeStats, SubscriptionHandle};
pub use config::{RealtimeConfig, ReconnectConfig};
pub use connection::{ConnectionManager, ConnectionState, PushConnector, Session};
pub use engine::{ApplyOutcome, IgnoreReason, InstallOutcome, LiveQueryState};
pub use error::{RealtimeError, RealtimeResult};
pub use live::{Listener, SubscriptionId};
pub use registry::{QueryInfo, RegistryStats};
pub use snapshot::{Phase, Snapshot, SnapshotError};
