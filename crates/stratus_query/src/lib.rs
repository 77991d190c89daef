//! # Stratus Query
//!
//! Predicate model and query builder for Stratus.
//!
//! This crate provides:
//! - [`Predicate`], the structured description of a query, with row
//!   matching, a total row order and a canonical deduplication key
//! - [`QueryBuilder`], a chainable builder that captures misuse and reports
//!   it when the query is built or executed
//! - [`DataSource`], the request/response collaborator used for one-shot
//!   queries and for seeding live queries
//! - [`ResultEnvelope`], the `{ data, error, count }` result of a one-shot
//!   query
//!
//! ## Semantics
//!
//! - Equality is type-aware: `1` matches `1.0` but never `"1"`.
//! - `eq(col, null)` never matches; use `is(col, Value::Null)`.
//! - Rows with equal sort keys are ordered by identifier ascending, so every
//!   predicate defines a total order.
//! - Filter clause order does not affect the canonical key.
//!
//! ## Usage
//!
//! ```
//! use stratus_query::{MockDataSource, QueryBuilder};
//!
//! let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
//! let source = MockDataSource::new();
//! let envelope = rt.block_on(
//!     QueryBuilder::from("posts")
//!         .eq("status", "published")
//!         .order("created_at", false)
//!         .limit(10)
//!         .execute(&source),
//! );
//! assert!(envelope.is_ok());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod builder;
mod envelope;
mod error;
mod predicate;
mod source;

pub use builder::{CountMode, Query, QueryBuilder, RequestParams};
pub use envelope::{QueryData, QueryError, ResultEnvelope, ResultError};
pub use error::{FetchError, PredicateError, PredicateResult};
pub use predicate::{CanonicalKey, FilterClause, FilterOp, OrderBy, Predicate};
pub use source::{DataSource, FetchResponse, MockDataSource};
