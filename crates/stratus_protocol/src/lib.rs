//! # Stratus Protocol
//!
//! Change events and push-frame decoding for Stratus.
//!
//! This crate provides:
//! - [`ChangeEvent`], a decoded insert, update or delete of one row
//! - [`RawMessage`], a frame as received (JSON text, CBOR binary or parsed
//!   JSON)
//! - [`ChangeDecoder`], which accepts the flat and wrapped frame shapes
//!   servers push and rejects everything else with a [`DecodeError`]
//!
//! ## Key Invariants
//!
//! - Decoding is pure and never panics on malformed input
//! - Every decoded event carries a table, a kind, a non-null row identifier
//!   and a sequence
//! - Channel housekeeping frames decode to [`DecodeError::ControlFrame`]
//!
//! ## Usage
//!
//! ```
//! use stratus_protocol::{ChangeDecoder, ChangeKind, RawMessage};
//!
//! let decoder = ChangeDecoder::default();
//! let raw = RawMessage::from(
//!     r#"{"table":"posts","type":"INSERT","record":{"id":1,"title":"hi"},"seq":1}"#,
//! );
//! let event = decoder.decode(&raw, 0).unwrap();
//! assert_eq!(event.kind, ChangeKind::Inserted);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod decoder;
mod error;
mod event;
mod raw;

pub use decoder::{ChangeDecoder, DecoderConfig};
pub use error::{DecodeError, DecodeResult};
pub use event::{ChangeEvent, ChangeKind};
pub use raw::RawMessage;
