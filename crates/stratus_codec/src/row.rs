//! Rows keyed by primary key.

use crate::error::{CodecError, CodecResult};
use crate::value::Value;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;

/// Default name of the primary-key column.
pub const DEFAULT_PRIMARY_KEY: &str = "id";

static NULL: Value = Value::Null;

/// A single table row.
///
/// The identifier is extracted from the primary-key column when the row is
/// built and is never null. Two rows are the same row when their
/// identifiers are equal, regardless of the remaining fields; derived
/// `PartialEq` compares full contents.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    id: Value,
    fields: BTreeMap<String, Value>,
}

impl Row {
    /// Builds a row from a field map, extracting the primary key.
    pub fn new(primary_key: &str, fields: BTreeMap<String, Value>) -> CodecResult<Self> {
        let id = match fields.get(primary_key) {
            None => {
                return Err(CodecError::MissingPrimaryKey {
                    field: primary_key.to_string(),
                })
            }
            Some(Value::Null) => {
                return Err(CodecError::NullPrimaryKey {
                    field: primary_key.to_string(),
                })
            }
            Some(id) => id.clone(),
        };
        Ok(Self { id, fields })
    }

    /// Builds a row from `(column, value)` pairs.
    pub fn from_pairs<K, V, I>(primary_key: &str, pairs: I) -> CodecResult<Self>
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        let fields = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self::new(primary_key, fields)
    }

    /// Builds a row from a JSON object.
    pub fn from_json(primary_key: &str, json: &serde_json::Value) -> CodecResult<Self> {
        let object = json.as_object().ok_or(CodecError::NotAnObject {
            found: json_type_name(json),
        })?;
        let fields = object
            .iter()
            .map(|(k, v)| (k.clone(), Value::from(v.clone())))
            .collect();
        Self::new(primary_key, fields)
    }

    /// Returns the row identifier (primary-key value).
    pub fn id(&self) -> &Value {
        &self.id
    }

    /// Returns the value of a column, if present.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Returns the value of a column, reading absent columns as null.
    pub fn get_or_null(&self, field: &str) -> &Value {
        self.fields.get(field).unwrap_or(&NULL)
    }

    /// Returns all columns.
    pub fn fields(&self) -> &BTreeMap<String, Value> {
        &self.fields
    }

    /// Returns true if both rows carry the same identifier.
    pub fn same_row(&self, other: &Row) -> bool {
        self.id.equals(&other.id)
    }

    /// Overlays the columns of `partial` on top of this row.
    ///
    /// Used for update events that only carry the changed columns. The
    /// identifier of `self` is kept.
    pub fn merged(&self, partial: &Row) -> Row {
        let mut fields = self.fields.clone();
        for (k, v) in &partial.fields {
            fields.insert(k.clone(), v.clone());
        }
        Row {
            id: self.id.clone(),
            fields,
        }
    }

    /// Returns a copy limited to the given columns.
    ///
    /// `*` selects everything. The primary-key column is always kept so the
    /// projected row stays identifiable.
    pub fn project(&self, primary_key: &str, columns: &[String]) -> Row {
        if columns.is_empty() || columns.iter().any(|c| c == "*") {
            return self.clone();
        }
        let fields = self
            .fields
            .iter()
            .filter(|(k, _)| k.as_str() == primary_key || columns.contains(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Row {
            id: self.id.clone(),
            fields,
        }
    }

    /// Converts the row to a JSON object.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.fields
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.fields.serialize(serializer)
    }
}

/// Returns the JSON type name of a value, for error messages.
pub fn json_type_name(json: &serde_json::Value) -> &'static str {
    match json {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
