//! # Stratus Testkit
//!
//! Test utilities for Stratus.
//!
//! This crate provides:
//! - [`MemoryBackend`], an in-memory data source and push channel
//! - Row fixtures and a snapshot recorder for listener assertions
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use stratus_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn sees_inserts() {
//!     let backend = Arc::new(MemoryBackend::new());
//!     let client = RealtimeClient::new(backend.clone(), RealtimeConfig::default()).unwrap();
//!     client.connect(backend.clone()).unwrap();
//!
//!     let mut recorder = SnapshotRecorder::new();
//!     let _handle = client.subscribe(QueryBuilder::from("posts"), recorder.listener()).unwrap();
//!     recorder.settled().await;
//!
//!     backend.insert("posts", post(1, "published", 10));
//!     let snapshot = recorder.wait_for(|s| s.rows().len() == 1).await;
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod backend;
pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::backend::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use std::sync::Arc;
    pub use stratus_query::{CountMode, DataSource, FetchError, FetchResponse, QueryBuilder};
    pub use stratus_realtime::{
        ConnectionState, Phase, RealtimeClient, RealtimeConfig, ReconnectConfig, Snapshot,
    };
}

pub use backend::*;
pub use fixtures::*;
pub use generators::*;
