//! Dynamic scalar value type.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// A dynamic column value as received from the backend.
///
/// Rows are exchanged as JSON (or CBOR) documents, so a value is anything a
/// JSON document can hold. Nested arrays and maps appear for `json`/`jsonb`
/// and array columns.
///
/// Derived `PartialEq` is structural: `Integer(1) != Float(1.0)`. Filter
/// evaluation uses [`Value::equals`], which compares numbers numerically but
/// never coerces across numeric, text, boolean and null types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Null value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Signed integer.
    Integer(i64),
    /// Floating point number (also used for integers outside the i64 range).
    Float(f64),
    /// Text string (UTF-8).
    Text(String),
    /// Array of values.
    Array(Vec<Value>),
    /// Map of string keys to values, kept sorted by key.
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Check if this value is a number (integer or float).
    pub fn is_number(&self) -> bool {
        matches!(self, Value::Integer(_) | Value::Float(_))
    }

    /// Get this value as a boolean, if it is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get this value as an integer, if it is one.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Get this value as a float, widening integers.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(n) => Some(*n as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Get this value as text, if it is text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Get this value as an array, if it is one.
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Get this value as a map, if it is one.
    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Returns a short name for the value's type.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::Array(_) => "array",
            Value::Map(_) => "map",
        }
    }

    /// Type-aware equality used by filters.
    ///
    /// Integers and floats compare numerically; every other pair must be the
    /// same type. `Text("1")` never equals `Integer(1)`.
    pub fn equals(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (a, b) if a.is_number() && b.is_number() => {
                !a.is_nan() && !b.is_nan() && Self::cmp_numbers(a, b) == Ordering::Equal
            }
            (Value::Array(a), Value::Array(b)) => {
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.equals(y))
            }
            (Value::Map(a), Value::Map(b)) => {
                a.len() == b.len()
                    && a
                        .iter()
                        .zip(b.iter())
                        .all(|((ka, va), (kb, vb))| ka == kb && va.equals(vb))
            }
            (a, b) => a == b,
        }
    }

    /// Ordering between values of comparable types.
    ///
    /// Returns `None` when the two values cannot be ordered against each
    /// other (different types, nulls, arrays or maps).
    pub fn partial_cmp_value(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(b)),
            (a, b) if a.is_number() && b.is_number() => Some(Self::cmp_numbers(a, b)),
            _ => None,
        }
    }

    /// Total order over all values.
    ///
    /// Values of different types are ordered by type rank
    /// (null < bool < number < text < array < map); values of the same type
    /// by content. Numbers compare exactly by value; an integer sorts before
    /// a float of equal value, so only identical values compare equal. Used
    /// for identifier tie-breaks and sort keys.
    pub fn cmp_total(&self, other: &Self) -> Ordering {
        let rank = self.type_rank().cmp(&other.type_rank());
        if rank != Ordering::Equal {
            return rank;
        }

        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            (Value::Array(a), Value::Array(b)) => {
                for (av, bv) in a.iter().zip(b.iter()) {
                    let ord = av.cmp_total(bv);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                a.len().cmp(&b.len())
            }
            (Value::Map(a), Value::Map(b)) => {
                for ((ak, av), (bk, bv)) in a.iter().zip(b.iter()) {
                    let ord = ak.cmp(bk).then_with(|| av.cmp_total(bv));
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                a.len().cmp(&b.len())
            }
            (a, b) => Self::cmp_numbers(a, b).then_with(|| match (a, b) {
                (Value::Integer(_), Value::Float(_)) => Ordering::Less,
                (Value::Float(_), Value::Integer(_)) => Ordering::Greater,
                (Value::Float(x), Value::Float(y)) => x.total_cmp(y),
                _ => Ordering::Equal,
            }),
        }
    }

    fn cmp_numbers(a: &Self, b: &Self) -> Ordering {
        match (a, b) {
            (Value::Integer(x), Value::Integer(y)) => x.cmp(y),
            (Value::Integer(x), Value::Float(y)) => cmp_int_float(*x, *y),
            (Value::Float(x), Value::Integer(y)) => cmp_int_float(*y, *x).reverse(),
            (Value::Float(x), Value::Float(y)) => x.partial_cmp(y).unwrap_or_else(|| x.total_cmp(y)),
            _ => Ordering::Equal,
        }
    }

    fn is_nan(&self) -> bool {
        matches!(self, Value::Float(f) if f.is_nan())
    }

    fn type_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Integer(_) | Value::Float(_) => 2,
            Value::Text(_) => 3,
            Value::Array(_) => 4,
            Value::Map(_) => 5,
        }
    }

    /// Converts this value into a JSON value.
    ///
    /// Non-finite floats have no JSON representation and become null.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Integer(n) => serde_json::Value::from(*n),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Text(s) => serde_json::Value::String(s.clone()),
            Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Map(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }
}

/// Compares an integer with a float without rounding the integer.
fn cmp_int_float(i: i64, f: f64) -> Ordering {
    // 2^63, exactly representable.
    const BOUND: f64 = 9_223_372_036_854_775_808.0;

    if f.is_nan() {
        return (i as f64).total_cmp(&f);
    }
    if f >= BOUND {
        return Ordering::Less;
    }
    if f < -BOUND {
        return Ordering::Greater;
    }
    let whole = f.trunc();
    match i.cmp(&(whole as i64)) {
        Ordering::Equal => 0.0_f64.partial_cmp(&(f - whole)).unwrap_or(Ordering::Equal),
        ord => ord,
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Integer(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::Text(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                Value::Map(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<&Value> for serde_json::Value {
    fn from(value: &Value) -> Self {
        value.to_json()
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Integer(i64::from(n))
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Integer(i64::from(n))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::Array(items.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn numeric_equality_across_representations() {
        assert!(Value::Integer(1).equals(&Value::Float(1.0)));
        assert!(Value::Float(2.5).equals(&Value::Float(2.5)));
        assert!(!Value::Integer(1).equals(&Value::Integer(2)));
    }

    #[test]
    fn no_coercion_across_types() {
        assert!(!Value::Integer(1).equals(&Value::Text("1".into())));
        assert!(!Value::Bool(true).equals(&Value::Integer(1)));
        assert!(!Value::Null.equals(&Value::Integer(0)));
        assert!(!Value::Text(String::new()).equals(&Value::Null));
    }

    #[test]
    fn partial_cmp_only_for_comparable_types() {
        assert_eq!(
            Value::Integer(3).partial_cmp_value(&Value::Float(2.5)),
            Some(Ordering::Greater)
        );
        assert_eq!(
            Value::from("a").partial_cmp_value(&Value::from("b")),
            Some(Ordering::Less)
        );
        assert_eq!(Value::from("1").partial_cmp_value(&Value::Integer(1)), None);
        assert_eq!(Value::Null.partial_cmp_value(&Value::Null), None);
    }

    #[test]
    fn total_order_by_type_rank() {
        let mut values = vec![
            Value::from("z"),
            Value::Integer(10),
            Value::Null,
            Value::Bool(false),
            Value::Float(-1.5),
        ];
        values.sort_by(|a, b| a.cmp_total(b));
        assert_eq!(
            values,
            vec![
                Value::Null,
                Value::Bool(false),
                Value::Float(-1.5),
                Value::Integer(10),
                Value::from("z"),
            ]
        );
    }

    #[test]
    fn from_json_numbers() {
        assert_eq!(Value::from(serde_json::json!(42)), Value::Integer(42));
        assert_eq!(Value::from(serde_json::json!(1.5)), Value::Float(1.5));
        assert_eq!(
            Value::from(serde_json::json!(u64::MAX)),
            Value::Float(u64::MAX as f64)
        );
    }

    #[test]
    fn from_json_nested() {
        let value = Value::from(serde_json::json!({"tags": ["a", "b"], "n": null}));
        let map = value.as_map().unwrap();
        assert_eq!(
            map.get("tags"),
            Some(&Value::Array(vec![Value::from("a"), Value::from("b")]))
        );
        assert_eq!(map.get("n"), Some(&Value::Null));
    }

    #[test]
    fn serde_untagged_shape() {
        let value: Value = serde_json::from_str(r#"{"a": 1, "b": [true, "x", 2.5]}"#).unwrap();
        let json = serde_json::to_string(&value).unwrap();
        assert_eq!(json, r#"{"a":1,"b":[true,"x",2.5]}"#);
    }

    #[test]
    fn non_finite_float_to_json_is_null() {
        assert_eq!(Value::Float(f64::NAN).to_json(), serde_json::Value::Null);
    }

    #[test]
    fn integers_compare_exactly_against_floats() {
        let big = Value::Integer((1 << 53) + 1);
        let float = Value::Float((1u64 << 53) as f64);
        assert!(!big.equals(&float));
        assert_eq!(big.partial_cmp_value(&float), Some(Ordering::Greater));
        assert_eq!(
            Value::Integer(i64::MAX).partial_cmp_value(&Value::Float(9.3e18)),
            Some(Ordering::Less)
        );
        assert_eq!(
            Value::Integer(-3).partial_cmp_value(&Value::Float(-2.5)),
            Some(Ordering::Less)
        );
        assert_eq!(
            Value::Integer(2).partial_cmp_value(&Value::Float(2.5)),
            Some(Ordering::Less)
        );
        assert!(!Value::Float(f64::NAN).equals(&Value::Float(f64::NAN)));
    }

    #[test]
    fn equal_numbers_of_different_types_sort_integer_first() {
        let int = Value::Integer(1);
        let float = Value::Float(1.0);
        assert!(int.equals(&float));
        assert_eq!(int.cmp_total(&float), Ordering::Less);
        assert_eq!(float.cmp_total(&int), Ordering::Greater);
        assert_eq!(float.cmp_total(&Value::Float(1.0)), Ordering::Equal);
    }

    proptest! {
        #[test]
        fn cmp_total_is_transitive(
            a in any::<i64>(),
            b in any::<f64>(),
            c in any::<i64>(),
        ) {
            let values = [Value::Integer(a), Value::Float(b), Value::Integer(c)];
            let mut sorted = values.to_vec();
            sorted.sort_by(|x, y| x.cmp_total(y));
            for pair in sorted.windows(2) {
                prop_assert_ne!(pair[0].cmp_total(&pair[1]), Ordering::Greater);
            }
            prop_assert_ne!(sorted[0].cmp_total(&sorted[2]), Ordering::Greater);
        }

        #[test]
        fn cmp_total_is_antisymmetric(a in any::<i64>(), b in -1.0e12f64..1.0e12) {
            let x = Value::Integer(a);
            let y = Value::Float(b);
            prop_assert_eq!(x.cmp_total(&y), y.cmp_total(&x).reverse());
        }
    }
}
