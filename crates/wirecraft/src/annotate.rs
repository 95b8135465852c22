// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The wire-format annotator (spec.md §4.4): re-runs the encoder in a
//! recording mode and turns the spans it collects into a flat, read-only
//! byte-range map over an already-produced wire payload.

use crate::engine::context::EngineContext;
use crate::engine::encode_with;
use crate::schema::Schema;
use crate::value::Value;

/// One named byte range within an encoded message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Annotation {
    /// Dotted field path, e.g. `header.length` or `records[2].rdata`.
    pub path: String,
    pub byte_offset: u64,
    pub byte_length: u64,
    pub bitfields: Vec<BitfieldAnnotation>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitfieldAnnotation {
    pub name: String,
    pub bit_start: u64,
    pub bit_end: u64,
    pub value: i128,
}

/// Raised when the re-encoded trace doesn't cover `bytes` exactly, which
/// means `bytes` was not actually produced by encoding `value` against
/// `type_name` under this schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotateError {
    pub message: String,
}

impl std::fmt::Display for AnnotateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AnnotateError {}

/// Annotates `bytes` (the wire encoding of `value` as `type_name`) with the
/// byte range each field occupies, by observing an encode of `value` in
/// recording mode rather than re-parsing `bytes` independently (spec.md §2:
/// "observes an encode in a recording mode").
pub fn annotate(schema: &Schema, type_name: &str, value: &Value, bytes: &[u8]) -> Result<Vec<Annotation>, AnnotateError> {
    let mut ctx = EngineContext::recording(false);
    let produced = encode_with(schema, type_name, value, &mut ctx).map_err(|e| AnnotateError { message: e.to_string() })?;

    if produced.len() != bytes.len() {
        return Err(AnnotateError {
            message: format!("re-encoded length {} does not match supplied bytes length {}", produced.len(), bytes.len()),
        });
    }
    if produced != bytes {
        return Err(AnnotateError {
            message: "re-encoded bytes do not match the supplied bytes; annotate() requires bytes produced by encoding the same value".to_string(),
        });
    }

    let annotations: Vec<Annotation> = ctx
        .spans
        .into_iter()
        .map(|span| Annotation {
            path: span.path,
            byte_offset: span.byte_offset,
            byte_length: span.byte_length,
            bitfields: span
                .bitfields
                .into_iter()
                .map(|b| BitfieldAnnotation {
                    name: b.name,
                    bit_start: b.bit_start,
                    bit_end: b.bit_end,
                    value: b.value,
                })
                .collect(),
        })
        .collect();

    if let Some(last) = annotations.last() {
        if last.byte_offset + last.byte_length != bytes.len() as u64 {
            return Err(AnnotateError {
                message: format!(
                    "annotation coverage ends at byte {} but the payload is {} bytes",
                    last.byte_offset + last.byte_length,
                    bytes.len()
                ),
            });
        }
    }

    Ok(annotations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::load_schema;

    fn scalar_schema() -> Schema {
        let doc = serde_json::json!({
            "config": {"endianness": "big_endian"},
            "types": {
                "Msg": {
                    "sequence": [
                        {"name": "tag", "type": "uint8", "const": 7},
                        {"name": "length", "type": "uint16", "computed": {"kind": "length_of", "target": "payload"}},
                        {"name": "payload", "type": "array", "kind": "fixed", "length": 2, "items": {"type": "uint8"}}
                    ]
                }
            }
        });
        load_schema(&doc).unwrap()
    }

    #[test]
    fn annotation_spans_cover_the_whole_payload() {
        let schema = scalar_schema();
        let value = Value::composite([
            ("tag", Value::U8(7)),
            ("length", Value::U16(0)),
            ("payload", Value::Array(vec![Value::U8(1), Value::U8(2)])),
        ]);
        let bytes = crate::engine::encode(&schema, "Msg", &value).unwrap();
        let annotations = annotate(&schema, "Msg", &value, &bytes).unwrap();
        assert_eq!(annotations.iter().map(|a| a.path.as_str()).collect::<Vec<_>>(), vec!["tag", "length", "payload"]);
        let last = annotations.last().unwrap();
        assert_eq!(last.byte_offset + last.byte_length, bytes.len() as u64);
    }

    #[test]
    fn mismatched_bytes_are_rejected() {
        let schema = scalar_schema();
        let value = Value::composite([
            ("tag", Value::U8(7)),
            ("length", Value::U16(0)),
            ("payload", Value::Array(vec![Value::U8(1), Value::U8(2)])),
        ]);
        let wrong_bytes = vec![0u8; 1];
        assert!(annotate(&schema, "Msg", &value, &wrong_bytes).is_err());
    }
}
