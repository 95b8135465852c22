// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # wirecraft
//!
//! A declarative binary-format schema compiler: load a JSON schema document
//! describing a wire format, validate it, and interpret it against concrete
//! values to encode, decode, and annotate messages — without generating or
//! compiling any code.
//!
//! ## Quick Start
//!
//! ```rust
//! use wirecraft::{load_schema, encode, decode, Value};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let doc = serde_json::json!({
//!     "config": {"endianness": "big_endian"},
//!     "types": {
//!         "Ping": {
//!             "sequence": [
//!                 {"name": "seq", "type": "uint32"}
//!             ]
//!         }
//!     }
//! });
//!
//! let schema = load_schema(&doc)?;
//! let value = Value::composite([("seq", Value::U32(7))]);
//! let bytes = encode(&schema, "Ping", &value)?;
//! let decoded = decode(&schema, "Ping", &bytes)?;
//! assert_eq!(decoded, value);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +---------------------------------------------------------------------+
//! |  schema::loader   JSON document -> Schema IR                        |
//! |  schema::validator Schema IR -> structural soundness checks         |
//! +---------------------------------------------------------------------+
//! |  engine            interprets Schema IR against Value trees/bytes   |
//! |    encode / decode  field-sequence walk, computed fields, unions    |
//! |    resolve          path + `when`-identifier lookup (both directions)|
//! +---------------------------------------------------------------------+
//! |  bitstream          bit-level reader/writer, varlength codecs       |
//! +---------------------------------------------------------------------+
//! |  annotate           re-runs encode in a recording mode for spans    |
//! +---------------------------------------------------------------------+
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`schema::Schema`] | The loaded and name-resolved schema IR |
//! | [`Value`] | The in-memory tree passed to `encode` and produced by `decode` |
//! | [`annotate::Annotation`] | One named byte range of an encoded message |
//!
//! ## What this crate does not do
//!
//! Schema documents are plain [`serde_json::Value`] trees — reading them
//! from disk, parsing JSON5, generating target-language bindings, and
//! producing human-readable documentation are all left to callers.

// Clippy: No blanket suppressions. Fix issues properly or use inline #[allow] with justification.

/// The wire-format annotator: byte-range spans for an already-encoded message.
pub mod annotate;
/// Bit-level reader/writer and varlength integer codecs (DER, LEB128, EBML, VLQ).
pub mod bitstream;
/// CRC-32 (IEEE 802.3) checksum, used by `crc32_of` computed fields.
pub mod crc32;
/// The interpreter: walks a [`schema::Schema`] against [`Value`] trees or bytes.
pub mod engine;
/// Structured error types shared by the validator, bit-stream runtime, and interpreter.
pub mod error;
/// Compile-time configurable advisory tracing (zero-cost when disabled).
pub mod logging;
/// Schema IR, JSON loader, path/`when` expression parsers, and the validator.
pub mod schema;
/// The value tree fed to [`encode`] and produced by [`decode`].
pub mod value;

pub use annotate::{annotate, Annotation, AnnotateError, BitfieldAnnotation};
pub use engine::{decode, encode};
pub use error::{DecodeError, EncodeError, SchemaError};
pub use schema::{load_schema, validate, Schema, ValidationResult};
pub use value::Value;

/// wirecraft version string.
pub const VERSION: &str = "0.1.0";
