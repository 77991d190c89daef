//! Predicate model.
//!
//! A [`Predicate`] is the structured, re-evaluable shape of a query: which
//! table and columns it reads, which rows it keeps, how they are ordered and
//! how many are kept. The same predicate drives the initial fetch and every
//! later decision about whether a change event affects a live result set.

use crate::builder::CountMode;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use stratus_codec::{Row, Value};

/// Filter operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    /// Column equals value.
    Eq,
    /// Column equals value; produced by expanding a field-map `match`.
    MatchExact,
    /// Column differs from value.
    Neq,
    /// Column greater than value.
    Gt,
    /// Column greater than or equal to value.
    Gte,
    /// Column less than value.
    Lt,
    /// Column less than or equal to value.
    Lte,
    /// Column equals one of the values in a list.
    In,
    /// Column is null, true or false.
    Is,
}

impl FilterOp {
    /// Returns the operator token.
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOp::Eq | FilterOp::MatchExact => "eq",
            FilterOp::Neq => "neq",
            FilterOp::Gt => "gt",
            FilterOp::Gte => "gte",
            FilterOp::Lt => "lt",
            FilterOp::Lte => "lte",
            FilterOp::In => "in",
            FilterOp::Is => "is",
        }
    }

    /// Operator with `match` provenance erased.
    pub fn canonical(&self) -> FilterOp {
        match self {
            FilterOp::MatchExact => FilterOp::Eq,
            op => *op,
        }
    }
}

impl fmt::Display for FilterOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single filter condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterClause {
    /// Column name.
    pub field: String,
    /// Operator.
    pub op: FilterOp,
    /// Operand.
    pub value: Value,
}

impl FilterClause {
    /// Creates a new filter clause.
    pub fn new(field: impl Into<String>, op: FilterOp, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    /// Creates an equality clause.
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, FilterOp::Eq, value)
    }

    /// Evaluates the clause against a row.
    ///
    /// Absent columns read as null. Null never satisfies `eq`, `neq`, `in`
    /// or the ordering operators; only `is` tests for it.
    pub fn evaluate(&self, row: &Row) -> bool {
        let actual = row.get_or_null(&self.field);
        match self.op {
            FilterOp::Eq | FilterOp::MatchExact => {
                !actual.is_null() && actual.equals(&self.value)
            }
            FilterOp::Neq => {
                !actual.is_null() && !self.value.is_null() && !actual.equals(&self.value)
            }
            FilterOp::Gt => matches!(actual.partial_cmp_value(&self.value), Some(Ordering::Greater)),
            FilterOp::Gte => matches!(
                actual.partial_cmp_value(&self.value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            FilterOp::Lt => matches!(actual.partial_cmp_value(&self.value), Some(Ordering::Less)),
            FilterOp::Lte => matches!(
                actual.partial_cmp_value(&self.value),
                Some(Ordering::Less | Ordering::Equal)
            ),
            FilterOp::In => {
                !actual.is_null()
                    && self
                        .value
                        .as_array()
                        .is_some_and(|items| items.iter().any(|v| actual.equals(v)))
            }
            FilterOp::Is => match &self.value {
                Value::Null => actual.is_null(),
                Value::Bool(b) => actual.as_bool() == Some(*b),
                _ => false,
            },
        }
    }

    fn cmp_canonical(&self, other: &Self) -> Ordering {
        self.field
            .cmp(&other.field)
            .then_with(|| self.op.canonical().cmp(&other.op.canonical()))
            .then_with(|| self.value.cmp_total(&other.value))
    }

    fn same_canonical(&self, other: &Self) -> bool {
        self.cmp_canonical(other) == Ordering::Equal
    }
}

/// Sort key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    /// Column to sort by.
    pub field: String,
    /// Ascending when true, descending otherwise.
    pub ascending: bool,
}

impl OrderBy {
    /// Ascending order on a column.
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            ascending: true,
        }
    }

    /// Descending order on a column.
    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            ascending: false,
        }
    }

    /// Compares two column values under this order.
    ///
    /// Nulls sort last when ascending and first when descending.
    pub fn compare_values(&self, a: &Value, b: &Value) -> Ordering {
        match (a.is_null(), b.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) if self.ascending => Ordering::Greater,
            (true, false) => Ordering::Less,
            (false, true) if self.ascending => Ordering::Less,
            (false, true) => Ordering::Greater,
            (false, false) if self.ascending => a.cmp_total(b),
            (false, false) => a.cmp_total(b).reverse(),
        }
    }
}

/// Deduplication identity of a predicate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CanonicalKey(String);

impl CanonicalKey {
    /// Returns the key as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CanonicalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Immutable description of a query.
///
/// Built through [`QueryBuilder`](crate::QueryBuilder). Once built a
/// predicate is shared behind an `Arc` and never changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    pub(crate) table: String,
    pub(crate) fields: Vec<String>,
    pub(crate) filters: Vec<FilterClause>,
    pub(crate) order: Option<OrderBy>,
    pub(crate) limit: Option<u64>,
    pub(crate) offset: Option<u64>,
    pub(crate) single: bool,
}

impl Predicate {
    /// Table the query reads.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Selected columns (`*` for all).
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Columns a live result set needs from the backend.
    ///
    /// A live query re-evaluates filters and ordering on its own rows, so
    /// it fetches the selected columns plus every filtered and ordered
    /// column. Listeners still see only the selection.
    pub fn live_fields(&self) -> Vec<String> {
        if self.fields.iter().any(|f| f == "*") {
            return self.fields.clone();
        }
        let mut fields = self.fields.clone();
        let referenced = self
            .filters
            .iter()
            .map(|c| &c.field)
            .chain(self.order.as_ref().map(|o| &o.field));
        for field in referenced {
            if !fields.contains(field) {
                fields.push(field.clone());
            }
        }
        fields
    }

    /// Filter clauses, in the order they were added.
    pub fn filters(&self) -> &[FilterClause] {
        &self.filters
    }

    /// Sort key, if any.
    pub fn order(&self) -> Option<&OrderBy> {
        self.order.as_ref()
    }

    /// Maximum number of rows.
    pub fn limit(&self) -> Option<u64> {
        self.limit
    }

    /// Number of leading rows skipped by the backend.
    pub fn offset(&self) -> Option<u64> {
        self.offset
    }

    /// Whether exactly one row is expected.
    pub fn is_single(&self) -> bool {
        self.single
    }

    /// Limit sent with a request.
    ///
    /// Single-row queries ask for one row.
    pub fn request_limit(&self) -> Option<u64> {
        if self.single {
            Some(1)
        } else {
            self.limit
        }
    }

    /// Size of the window kept by a live result set.
    ///
    /// Single-row queries keep every matching row so that the single result
    /// can be re-derived as the set changes.
    pub fn live_limit(&self) -> Option<usize> {
        if self.single {
            None
        } else {
            self.limit
                .map(|n| usize::try_from(n).unwrap_or(usize::MAX))
        }
    }

    /// Returns true if the row satisfies every filter clause.
    pub fn matches(&self, row: &Row) -> bool {
        self.filters.iter().all(|clause| clause.evaluate(row))
    }

    /// Total order over rows.
    ///
    /// Rows are compared by the order column when one is set; ties (and
    /// queries without an order) fall back to identifier ascending.
    pub fn compare(&self, a: &Row, b: &Row) -> Ordering {
        let primary = match &self.order {
            Some(order) => {
                order.compare_values(a.get_or_null(&order.field), b.get_or_null(&order.field))
            }
            None => Ordering::Equal,
        };
        primary.then_with(|| a.id().cmp_total(b.id()))
    }

    /// Filters, deduplicates, sorts and truncates rows into a live window.
    ///
    /// When the same identifier appears more than once the first occurrence
    /// wins.
    pub fn materialize(&self, rows: Vec<Row>) -> Vec<Row> {
        let mut rows: Vec<Row> = rows.into_iter().filter(|r| self.matches(r)).collect();
        rows.sort_by(|a, b| a.id().cmp_total(b.id()));
        rows.dedup_by(|later, earlier| later.same_row(earlier));
        rows.sort_by(|a, b| self.compare(a, b));
        if let Some(limit) = self.live_limit() {
            rows.truncate(limit);
        }
        rows
    }

    /// Stable serialization used to deduplicate subscriptions.
    ///
    /// Filter clauses are sorted and exact duplicates collapsed, so clause
    /// order does not matter; `match` clauses serialize like `eq`. Order,
    /// limit, offset, single and the column list are kept as given.
    pub fn canonical_key(&self) -> CanonicalKey {
        CanonicalKey(self.key_form().to_string())
    }

    /// Key of the predicate together with a requested count mode.
    pub(crate) fn canonical_key_counting(&self, count: Option<CountMode>) -> CanonicalKey {
        let mut form = self.key_form();
        if let (Some(mode), Some(fields)) = (count, form.as_object_mut()) {
            fields.insert("count".into(), serde_json::json!(mode));
        }
        CanonicalKey(form.to_string())
    }

    fn key_form(&self) -> serde_json::Value {
        let mut clauses: Vec<&FilterClause> = self.filters.iter().collect();
        clauses.sort_by(|a, b| a.cmp_canonical(b));
        clauses.dedup_by(|later, earlier| later.same_canonical(earlier));

        let filters: Vec<serde_json::Value> = clauses
            .iter()
            .map(|c| serde_json::json!([c.field, c.op.canonical().as_str(), tagged(&c.value)]))
            .collect();
        let order = self.order.as_ref().map(|o| {
            serde_json::json!([o.field, if o.ascending { "asc" } else { "desc" }])
        });

        serde_json::json!({
            "table": self.table,
            "select": self.fields,
            "filters": filters,
            "order": order,
            "limit": self.limit,
            "offset": self.offset,
            "single": self.single,
        })
    }
}

/// Key form of a value: `[type, repr]`, recursing into arrays and maps.
///
/// Floats are rendered from their bits so that non-finite values, and
/// `1` against `1.0`, stay distinct.
fn tagged(value: &Value) -> serde_json::Value {
    let repr = match value {
        Value::Float(f) => serde_json::Value::String(format!("{:016x}", f.to_bits())),
        Value::Array(items) => serde_json::Value::Array(items.iter().map(tagged).collect()),
        Value::Map(map) => serde_json::Value::Object(
            map.iter().map(|(k, v)| (k.clone(), tagged(v))).collect(),
        ),
        other => other.to_json(),
    };
    serde_json::json!([value.type_name(), repr])
}
