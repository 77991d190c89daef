//! Chainable query builder.

use crate::envelope::ResultEnvelope;
use crate::error::{PredicateError, PredicateResult};
use crate::predicate::{CanonicalKey, FilterClause, FilterOp, OrderBy, Predicate};
use crate::source::DataSource;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use stratus_codec::Value;

/// How the backend should count matching rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CountMode {
    /// Exact count (`COUNT(*)`).
    Exact,
    /// Planner estimate.
    Planned,
    /// Exact for small tables, estimate otherwise.
    Estimated,
}

/// Request parameters that are not part of the predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestParams {
    /// Table name.
    pub table: String,
    /// Whether exactly one row is expected.
    pub single: bool,
    /// Requested row count, if any.
    pub count: Option<CountMode>,
    /// Whether the request seeds a live query.
    pub live: bool,
}

/// A built query: predicate plus request parameters.
#[derive(Debug, Clone)]
pub struct Query {
    predicate: Arc<Predicate>,
    params: RequestParams,
}

impl Query {
    /// The query's predicate.
    pub fn predicate(&self) -> &Arc<Predicate> {
        &self.predicate
    }

    /// The query's request parameters.
    pub fn params(&self) -> &RequestParams {
        &self.params
    }

    /// Deduplication key: the predicate's key plus the requested count
    /// mode, which changes what a baseline carries.
    pub fn canonical_key(&self) -> CanonicalKey {
        self.predicate.canonical_key_counting(self.params.count)
    }

    /// Maximum number of rows a data source should return.
    ///
    /// One-shot single-row queries ask for one row. Live single-row queries
    /// need every matching row so the result can be re-derived as rows
    /// change.
    pub fn request_limit(&self) -> Option<u64> {
        if self.params.live && self.predicate.is_single() {
            None
        } else {
            self.predicate.request_limit()
        }
    }

    /// Returns the request used to seed a live query.
    ///
    /// The request selects [`Predicate::live_fields`], so rows can be
    /// re-evaluated locally even when the selection omits filtered or
    /// ordered columns.
    pub fn live(&self) -> Query {
        let fields = self.predicate.live_fields();
        let predicate = if fields == self.predicate.fields {
            Arc::clone(&self.predicate)
        } else {
            Arc::new(Predicate {
                fields,
                ..self.predicate.as_ref().clone()
            })
        };
        Query {
            predicate,
            params: RequestParams {
                live: true,
                ..self.params.clone()
            },
        }
    }

    /// Runs the query once through a data source.
    pub async fn execute<S>(&self, source: &S) -> ResultEnvelope
    where
        S: DataSource + ?Sized,
    {
        match source.fetch(self).await {
            Ok(response) => ResultEnvelope::from_response(&self.predicate, response),
            Err(e) => {
                tracing::warn!(table = %self.params.table, error = %e, "query failed");
                ResultEnvelope::failure(e.into())
            }
        }
    }
}

/// Chainable accumulator producing a [`Query`].
///
/// Every method consumes the builder and returns the next state; nothing is
/// sent until [`execute`](QueryBuilder::execute) is awaited. Misuse is
/// recorded and reported by [`build`](QueryBuilder::build).
///
/// # Example
///
/// ```
/// use stratus_query::QueryBuilder;
///
/// let query = QueryBuilder::from("posts")
///     .select("id, title, created_at")
///     .eq("status", "published")
///     .order("created_at", false)
///     .limit(10)
///     .build()
///     .unwrap();
///
/// assert_eq!(query.predicate().table(), "posts");
/// assert_eq!(query.predicate().limit(), Some(10));
/// ```
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    table: String,
    fields: Vec<String>,
    filters: Vec<FilterClause>,
    order: Option<OrderBy>,
    limit: Option<u64>,
    offset: Option<u64>,
    single: bool,
    count: Option<CountMode>,
    error: Option<PredicateError>,
}

impl QueryBuilder {
    /// Starts a query on a table, selecting every column.
    pub fn from(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            fields: vec!["*".to_string()],
            filters: Vec::new(),
            order: None,
            limit: None,
            offset: None,
            single: false,
            count: None,
            error: None,
        }
    }

    /// Selects columns from a comma-separated list.
    ///
    /// An empty list selects every column.
    pub fn select(mut self, columns: &str) -> Self {
        let fields: Vec<String> = columns
            .split(',')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .collect();
        self.fields = if fields.is_empty() {
            vec!["*".to_string()]
        } else {
            fields
        };
        self
    }

    /// Keeps rows where `field` equals `value`.
    pub fn eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(field, FilterOp::Eq, value.into(), "eq")
    }

    /// Keeps rows where `field` differs from `value`.
    pub fn neq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(field, FilterOp::Neq, value.into(), "neq")
    }

    /// Keeps rows where `field > value`.
    pub fn gt(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(field, FilterOp::Gt, value.into(), "gt")
    }

    /// Keeps rows where `field >= value`.
    pub fn gte(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(field, FilterOp::Gte, value.into(), "gte")
    }

    /// Keeps rows where `field < value`.
    pub fn lt(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(field, FilterOp::Lt, value.into(), "lt")
    }

    /// Keeps rows where `field <= value`.
    pub fn lte(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(field, FilterOp::Lte, value.into(), "lte")
    }

    /// Keeps rows where `field` equals any of `values`.
    pub fn in_list<V, I>(self, field: impl Into<String>, values: I) -> Self
    where
        V: Into<Value>,
        I: IntoIterator<Item = V>,
    {
        let list = Value::Array(values.into_iter().map(Into::into).collect());
        self.filter(field, FilterOp::In, list, "in_list")
    }

    /// Keeps rows where `field` is null (`Value::Null`) or the given boolean.
    pub fn is(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(field, FilterOp::Is, value.into(), "is")
    }

    /// Keeps rows matching every `(column, value)` pair exactly.
    ///
    /// Each entry becomes its own equality clause.
    pub fn match_fields<K, V, I>(mut self, entries: I) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        for (field, value) in entries {
            self = self.filter(field, FilterOp::MatchExact, value.into(), "match_fields");
        }
        self
    }

    /// Orders rows by a column. A later call replaces an earlier one.
    pub fn order(mut self, field: impl Into<String>, ascending: bool) -> Self {
        let field = field.into();
        if field.is_empty() {
            return self.fail(PredicateError::EmptyField { method: "order" });
        }
        self.order = Some(OrderBy { field, ascending });
        self
    }

    /// Limits the number of rows.
    pub fn limit(mut self, limit: u64) -> Self {
        if limit == 0 {
            return self.fail(PredicateError::ZeroLimit);
        }
        self.limit = Some(limit);
        self
    }

    /// Skips leading rows.
    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Selects rows `from..=to` (zero-based, inclusive).
    pub fn range(mut self, from: u64, to: u64) -> Self {
        if to < from {
            return self.fail(PredicateError::InvalidRange { from, to });
        }
        self.offset = Some(from);
        self.limit = Some(to - from + 1);
        self
    }

    /// Selects the zero-based page `index` of `size` rows.
    pub fn page(mut self, index: u64, size: u64) -> Self {
        if size == 0 {
            return self.fail(PredicateError::ZeroPageSize);
        }
        match index.checked_mul(size) {
            Some(offset) => {
                self.offset = Some(offset);
                self.limit = Some(size);
                self
            }
            None => self.fail(PredicateError::PageOverflow { index, size }),
        }
    }

    /// Expects exactly one row.
    pub fn single(mut self) -> Self {
        self.single = true;
        self
    }

    /// Asks the backend to report the number of matching rows.
    pub fn count(mut self, mode: CountMode) -> Self {
        self.count = Some(mode);
        self
    }

    /// Finishes the builder.
    pub fn build(self) -> PredicateResult<Query> {
        if let Some(err) = self.error {
            return Err(err);
        }
        if self.table.trim().is_empty() {
            return Err(PredicateError::EmptyTable);
        }
        if self.single {
            if let Some(limit) = self.limit.filter(|&n| n > 1) {
                return Err(PredicateError::SingleWithLimit { limit });
            }
        }

        let params = RequestParams {
            table: self.table.clone(),
            single: self.single,
            count: self.count,
            live: false,
        };
        let predicate = Predicate {
            table: self.table,
            fields: self.fields,
            filters: self.filters,
            order: self.order,
            limit: self.limit,
            offset: self.offset,
            single: self.single,
        };
        Ok(Query {
            predicate: Arc::new(predicate),
            params,
        })
    }

    /// Builds and runs the query once.
    ///
    /// Builder misuse is reported in the envelope without contacting the
    /// data source.
    pub async fn execute<S>(self, source: &S) -> ResultEnvelope
    where
        S: DataSource + ?Sized,
    {
        match self.build() {
            Ok(query) => query.execute(source).await,
            Err(e) => ResultEnvelope::failure(e.into()),
        }
    }

    fn filter(
        mut self,
        field: impl Into<String>,
        op: FilterOp,
        value: Value,
        method: &'static str,
    ) -> Self {
        let field = field.into();
        if field.is_empty() {
            return self.fail(PredicateError::EmptyField { method });
        }
        self.filters.push(FilterClause { field, op, value });
        self
    }

    fn fail(mut self, error: PredicateError) -> Self {
        self.error.get_or_insert(error);
        self
    }
}
