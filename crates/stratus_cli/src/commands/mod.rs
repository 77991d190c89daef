//! CLI command implementations.

pub mod key;
pub mod replay;

use clap::Args;
use stratus_codec::Value;
use stratus_query::QueryBuilder;
use thiserror::Error;

/// Errors from parsing command arguments.
#[derive(Error, Debug, PartialEq)]
pub enum CliError {
    /// A filter was not written as `field=value`.
    #[error("invalid filter '{0}': expected field=value")]
    InvalidFilter(String),

    /// An order was not written as `field` or `field:asc|desc`.
    #[error("invalid order '{0}': expected field[:asc|desc]")]
    InvalidOrder(String),

    /// An input file did not have the expected shape.
    #[error("invalid input in {path}: {message}")]
    InvalidInput {
        /// File that was read.
        path: String,
        /// What was wrong.
        message: String,
    },
}

/// Query description shared by commands.
#[derive(Args, Debug, Clone, Default)]
pub struct QueryArgs {
    /// Table to query
    #[arg(short, long)]
    pub table: String,

    /// Comma-separated columns to select
    #[arg(long)]
    pub select: Option<String>,

    /// Equality filter, as field=value (repeatable)
    #[arg(long = "eq", value_name = "FIELD=VALUE")]
    pub eq: Vec<String>,

    /// Inequality filter, as field=value (repeatable)
    #[arg(long = "neq", value_name = "FIELD=VALUE")]
    pub neq: Vec<String>,

    /// Lower bound, as field=value (repeatable)
    #[arg(long = "gte", value_name = "FIELD=VALUE")]
    pub gte: Vec<String>,

    /// Upper bound, as field=value (repeatable)
    #[arg(long = "lte", value_name = "FIELD=VALUE")]
    pub lte: Vec<String>,

    /// Sort column, as field or field:desc
    #[arg(long)]
    pub order: Option<String>,

    /// Maximum number of rows
    #[arg(long)]
    pub limit: Option<u64>,

    /// Rows to skip
    #[arg(long)]
    pub offset: Option<u64>,

    /// Expect exactly one row
    #[arg(long)]
    pub single: bool,
}

impl QueryArgs {
    /// Builds the query described by the arguments.
    pub fn to_builder(&self) -> Result<QueryBuilder, CliError> {
        let mut builder = QueryBuilder::from(self.table.as_str());
        if let Some(columns) = &self.select {
            builder = builder.select(columns);
        }
        for filter in &self.eq {
            let (field, value) = parse_filter(filter)?;
            builder = builder.eq(field, value);
        }
        for filter in &self.neq {
            let (field, value) = parse_filter(filter)?;
            builder = builder.neq(field, value);
        }
        for filter in &self.gte {
            let (field, value) = parse_filter(filter)?;
            builder = builder.gte(field, value);
        }
        for filter in &self.lte {
            let (field, value) = parse_filter(filter)?;
            builder = builder.lte(field, value);
        }
        if let Some(order) = &self.order {
            let (field, ascending) = parse_order(order)?;
            builder = builder.order(field, ascending);
        }
        if let Some(limit) = self.limit {
            builder = builder.limit(limit);
        }
        if let Some(offset) = self.offset {
            builder = builder.offset(offset);
        }
        if self.single {
            builder = builder.single();
        }
        Ok(builder)
    }
}

/// Splits `field=value`. The value is read as JSON when it parses, so
/// `n=1` filters on a number and `s=abc` on text.
fn parse_filter(filter: &str) -> Result<(&str, Value), CliError> {
    let (field, raw) = filter
        .split_once('=')
        .ok_or_else(|| CliError::InvalidFilter(filter.to_string()))?;
    if field.trim().is_empty() {
        return Err(CliError::InvalidFilter(filter.to_string()));
    }
    let value = match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(json) => Value::from(json),
        Err(_) => Value::from(raw),
    };
    Ok((field.trim(), value))
}

fn parse_order(order: &str) -> Result<(&str, bool), CliError> {
    let (field, direction) = match order.split_once(':') {
        Some((field, direction)) => (field, direction),
        None => (order, "asc"),
    };
    let ascending = match direction {
        "asc" => true,
        "desc" => false,
        _ => return Err(CliError::InvalidOrder(order.to_string())),
    };
    if field.is_empty() {
        return Err(CliError::InvalidOrder(order.to_string()));
    }
    Ok((field, ascending))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_values_prefer_json() {
        assert_eq!(parse_filter("n=1").unwrap(), ("n", Value::from(1)));
        assert_eq!(parse_filter("s=abc").unwrap(), ("s", Value::from("abc")));
        assert_eq!(parse_filter("s=\"1\"").unwrap(), ("s", Value::from("1")));
        assert_eq!(
            parse_filter("missing"),
            Err(CliError::InvalidFilter("missing".into()))
        );
    }

    #[test]
    fn order_direction() {
        assert_eq!(parse_order("created_at").unwrap(), ("created_at", true));
        assert_eq!(parse_order("created_at:desc").unwrap(), ("created_at", false));
        assert!(parse_order("created_at:sideways").is_err());
        assert!(parse_order(":desc").is_err());
    }
}
