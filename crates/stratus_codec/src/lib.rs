//! # Stratus Codec
//!
//! Row and scalar value model shared by every Stratus crate.
//!
//! This crate provides:
//! - [`Value`], a dynamic column value with type-aware equality and a total
//!   order suitable for deterministic sorting
//! - [`Row`], a field map identified by its primary-key value
//! - JSON conversion and CBOR framing for binary push messages
//!
//! ## Usage
//!
//! ```
//! use stratus_codec::{Row, Value};
//!
//! let row = Row::from_json("id", &serde_json::json!({"id": 1, "title": "hello"})).unwrap();
//! assert_eq!(row.id(), &Value::Integer(1));
//! assert!(row.get_or_null("body").is_null());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cbor;
mod error;
mod row;
mod value;

pub use cbor::{from_cbor, to_cbor};
pub use error::{CodecError, CodecResult};
pub use row::{json_type_name, Row, DEFAULT_PRIMARY_KEY};
pub use value::Value;
