//! End-to-end scenarios against the public `wirecraft` API: a schema is
//! loaded from a JSON document, validated, encoded, decoded, and annotated,
//! and the wire bytes are checked against a literal expected sequence.

use wirecraft::{annotate, decode, encode, load_schema, validate, Value};

fn schema_from(doc: serde_json::Value) -> wirecraft::Schema {
    let schema = load_schema(&doc).expect("schema should load");
    let result = validate(&schema);
    assert!(result.is_valid(), "schema should validate, got: {:?}", result.errors);
    schema
}

/// S1: a single little-endian uint32 scalar round-trips to a literal byte sequence.
#[test]
fn s1_little_endian_scalar_round_trips() {
    let schema = schema_from(serde_json::json!({
        "config": {"endianness": "little_endian"},
        "types": {
            "T": {
                "sequence": [
                    {"name": "v", "type": "uint32"}
                ]
            }
        }
    }));

    let value = Value::composite([("v", Value::U32(1_000_000))]);
    let bytes = encode(&schema, "T", &value).unwrap();
    assert_eq!(bytes, vec![0x40, 0x42, 0x0F, 0x00]);

    let decoded = decode(&schema, "T", &bytes).unwrap();
    assert_eq!(decoded, value);
}

fn dns_label_schema() -> wirecraft::Schema {
    schema_from(serde_json::json!({
        "config": {"endianness": "big_endian"},
        "types": {
            "Label": {
                "sequence": [
                    {"name": "text", "type": "string", "kind": "length_prefixed", "length_type": "uint8", "encoding": "ascii"}
                ]
            },
            "LabelPointer": {
                "sequence": [
                    {
                        "name": "target",
                        "type": "back_reference",
                        "storage": "uint16",
                        "offset_mask": "0x3FFF",
                        "offset_from": "message_start",
                        "target_type": "Label",
                        "endianness": "big_endian"
                    }
                ]
            },
            "LabelOrPointer": {
                "type": "discriminated_union",
                "discriminator": {"peek": "uint8"},
                "variants": [
                    {"type": "LabelPointer", "when": "value >= 0xC0"},
                    {"type": "Label", "when": "value < 0xC0"}
                ]
            },
            "Message": {
                "sequence": [
                    {
                        "name": "labels",
                        "type": "array",
                        "kind": "null_terminated",
                        "terminal_variants": ["LabelPointer"],
                        "items": {"type": "LabelOrPointer"}
                    }
                ]
            }
        }
    }))
}

/// S2: a DNS-style name made of one literal label followed by a pointer back
/// to the start of the same message decodes with no separate terminator
/// byte, since the pointer variant is itself the array's terminal variant.
#[test]
fn s2_label_pointer_terminates_without_a_sentinel_byte() {
    let schema = dns_label_schema();
    let bytes: Vec<u8> = vec![0x03, b'c', b'o', b'm', 0xC0, 0x00];

    let decoded = decode(&schema, "Message", &bytes).unwrap();
    let expected = Value::composite([(
        "labels",
        Value::Array(vec![
            Value::variant("Label", Value::composite([("text", Value::String("com".to_string()))])),
            Value::variant("LabelPointer", Value::composite([("target", Value::U16(0))])),
        ]),
    )]);
    assert_eq!(decoded, expected);
}

/// S4: re-encoding the decoded name reproduces the pointer's marker bits
/// (the top two bits of the storage word, forced to `1` by `offset_mask`)
/// and writes no trailing sentinel, matching the original bytes exactly.
#[test]
fn s4_label_pointer_round_trips_with_marker_bits() {
    let schema = dns_label_schema();
    let bytes: Vec<u8> = vec![0x03, b'c', b'o', b'm', 0xC0, 0x00];

    let decoded = decode(&schema, "Message", &bytes).unwrap();
    let reencoded = encode(&schema, "Message", &decoded).unwrap();
    assert_eq!(reencoded, bytes);

    let annotations = annotate(&schema, "Message", &decoded, &bytes).unwrap();
    let last = annotations.last().unwrap();
    assert_eq!(last.byte_offset + last.byte_length, bytes.len() as u64);
}

/// S3: a `length_of(from_after_field)` computed field measures only the
/// bytes written after its named anchor, encoded here as a single DER byte.
#[test]
fn s3_length_of_from_after_field_uses_der_encoding() {
    let schema = schema_from(serde_json::json!({
        "config": {"endianness": "little_endian"},
        "types": {
            "T": {
                "sequence": [
                    {"name": "tag", "type": "uint16", "const": 4660},
                    {"name": "length", "type": "varlength", "encoding": "der", "computed": {"kind": "length_of", "from_after_field": "tag"}},
                    {"name": "payload", "type": "array", "kind": "fixed", "length": 5, "items": {"type": "uint8"}}
                ]
            }
        }
    }));

    let value = Value::composite([
        ("tag", Value::U16(4660)),
        ("length", Value::U8(0)),
        ("payload", Value::Array((1..=5).map(Value::U8).collect())),
    ]);
    let bytes = encode(&schema, "T", &value).unwrap();
    assert_eq!(bytes, vec![0x34, 0x12, 0x05, 0x01, 0x02, 0x03, 0x04, 0x05]);

    let decoded = decode(&schema, "T", &bytes).unwrap();
    assert_eq!(decoded.field("tag"), Some(&Value::U16(4660)));
    assert_eq!(decoded.field("payload"), value.field("payload"));
}

/// S5: negative zero is normalized to positive zero before being written,
/// so decoding the result never reproduces the sign bit.
#[test]
fn s5_negative_zero_float_is_normalized_on_encode() {
    let schema = schema_from(serde_json::json!({
        "config": {"endianness": "little_endian"},
        "types": {
            "T": {
                "sequence": [
                    {"name": "v", "type": "float64"}
                ]
            }
        }
    }));

    let value = Value::composite([("v", Value::F64(-0.0))]);
    let bytes = encode(&schema, "T", &value).unwrap();
    assert_eq!(bytes, vec![0u8; 8]);

    let decoded = decode(&schema, "T", &bytes).unwrap();
    assert_eq!(decoded.field("v"), Some(&Value::F64(0.0)));
    assert!(decoded.field("v").unwrap().as_i128().is_none());
    if let Some(Value::F64(v)) = decoded.field("v") {
        assert!(v.is_sign_positive());
    } else {
        panic!("expected a float64 field");
    }
}

#[test]
fn crc32_of_checksums_a_uint8_array_sibling() {
    let schema = schema_from(serde_json::json!({
        "config": {"endianness": "little_endian"},
        "types": {
            "T": {
                "sequence": [
                    {"name": "payload", "type": "array", "kind": "fixed", "length": 4, "items": {"type": "uint8"}},
                    {"name": "checksum", "type": "uint32", "computed": {"kind": "crc32_of", "target": "payload"}}
                ]
            }
        }
    }));

    let payload = vec![1u8, 2, 3, 4];
    let value = Value::composite([("payload", Value::Array(payload.iter().map(|b| Value::U8(*b)).collect()))]);
    let bytes = encode(&schema, "T", &value).unwrap();

    let expected_crc = wirecraft::crc32::crc32(&payload);
    assert_eq!(&bytes[0..4], payload.as_slice());
    assert_eq!(&bytes[4..8], expected_crc.to_le_bytes().as_slice());

    let decoded = decode(&schema, "T", &bytes).unwrap();
    assert_eq!(decoded.field("checksum"), Some(&Value::U32(expected_crc)));
}

fn sum_of_type_sizes_schema() -> wirecraft::Schema {
    schema_from(serde_json::json!({
        "config": {"endianness": "big_endian"},
        "types": {
            "A": {
                "sequence": [
                    {"name": "tag", "type": "uint8", "const": 1},
                    {"name": "pad", "type": "array", "kind": "fixed", "length": 4, "items": {"type": "uint8"}}
                ]
            },
            "B": {
                "sequence": [
                    {"name": "tag", "type": "uint8", "const": 2},
                    {"name": "pad", "type": "array", "kind": "fixed", "length": 2, "items": {"type": "uint8"}}
                ]
            },
            "AB": {
                "type": "choice",
                "variants": ["A", "B"]
            },
            "Container": {
                "sequence": [
                    {"name": "arr", "type": "array", "kind": "fixed", "length": 4, "items": {"type": "AB"}},
                    {"name": "sizeA", "type": "uint32", "computed": {"kind": "sum_of_type_sizes", "target": "arr", "element_type": "A"}},
                    {"name": "sizeB", "type": "uint32", "computed": {"kind": "sum_of_type_sizes", "target": "arr", "element_type": "B"}}
                ]
            }
        }
    }))
}

fn a_variant(pad: [u8; 4]) -> Value {
    Value::variant("A", Value::composite([("tag", Value::U8(1)), ("pad", Value::Array(pad.into_iter().map(Value::U8).collect()))]))
}

fn b_variant(pad: [u8; 2]) -> Value {
    Value::variant("B", Value::composite([("tag", Value::U8(2)), ("pad", Value::Array(pad.into_iter().map(Value::U8).collect()))]))
}

/// S6: `sum_of_type_sizes` totals the encoded width of only the array
/// elements tagged with the named variant (`A` is 5 bytes, `B` is 3).
#[test]
fn s6_sum_of_type_sizes_counts_only_the_named_variant() {
    let schema = sum_of_type_sizes_schema();
    let value = Value::composite([
        (
            "arr",
            Value::Array(vec![a_variant([0, 0, 0, 0]), b_variant([0, 0]), a_variant([1, 1, 1, 1]), b_variant([2, 2])]),
        ),
        ("sizeA", Value::U32(0)),
        ("sizeB", Value::U32(0)),
    ]);

    let bytes = encode(&schema, "Container", &value).unwrap();
    let decoded = decode(&schema, "Container", &bytes).unwrap();
    assert_eq!(decoded.field("sizeA"), Some(&Value::U32(10)));
    assert_eq!(decoded.field("sizeB"), Some(&Value::U32(6)));
}

/// A `position_of` pointing at a field that doesn't immediately follow it
/// must still land on the target's real offset: the computed field's own
/// width, plus everything encoded in between, has to be added on top of the
/// writer's position at the moment the computed field is about to be written.
#[test]
fn position_of_accounts_for_its_own_width_and_intervening_fields() {
    let schema = schema_from(serde_json::json!({
        "config": {"endianness": "big_endian"},
        "types": {
            "T": {
                "sequence": [
                    {"name": "a", "type": "uint8"},
                    {"name": "pos", "type": "uint32", "computed": {"kind": "position_of", "target": "payload"}},
                    {"name": "mid", "type": "uint8"},
                    {"name": "payload", "type": "array", "kind": "fixed", "length": 2, "items": {"type": "uint8"}}
                ]
            }
        }
    }));

    let value = Value::composite([
        ("a", Value::U8(9)),
        ("pos", Value::U32(0)),
        ("mid", Value::U8(5)),
        ("payload", Value::Array(vec![Value::U8(1), Value::U8(2)])),
    ]);
    let bytes = encode(&schema, "T", &value).unwrap();
    assert_eq!(bytes, vec![0x09, 0x00, 0x00, 0x00, 0x06, 0x05, 0x01, 0x02]);

    let decoded = decode(&schema, "T", &bytes).unwrap();
    assert_eq!(decoded.field("pos"), Some(&Value::U32(6)));
}

/// Invariant: encode(decode(bytes)) == bytes and decode(encode(value)) ==
/// value for a schema that exercises arrays, strings, and a discriminated
/// union in the same message.
#[test]
fn round_trip_is_stable_in_both_directions() {
    let schema = dns_label_schema();
    let bytes: Vec<u8> = vec![0x03, b'c', b'o', b'm', 0xC0, 0x00];
    let decoded = decode(&schema, "Message", &bytes).unwrap();
    assert_eq!(encode(&schema, "Message", &decoded).unwrap(), bytes);

    let scalar_schema = schema_from(serde_json::json!({
        "config": {"endianness": "little_endian"},
        "types": {"T": {"sequence": [{"name": "v", "type": "uint32"}]}}
    }));
    let value = Value::composite([("v", Value::U32(42))]);
    let round_tripped = decode(&scalar_schema, "T", &encode(&scalar_schema, "T", &value).unwrap()).unwrap();
    assert_eq!(round_tripped, value);
}

/// Invariant: encoding the same value twice produces byte-identical output
/// (the engine carries no hidden incrementing state across calls).
#[test]
fn encoding_is_deterministic() {
    let schema = sum_of_type_sizes_schema();
    let value = Value::composite([
        ("arr", Value::Array(vec![a_variant([0, 0, 0, 0]), b_variant([0, 0]), a_variant([1, 1, 1, 1]), b_variant([2, 2])])),
        ("sizeA", Value::U32(0)),
        ("sizeB", Value::U32(0)),
    ]);
    let first = encode(&schema, "Container", &value).unwrap();
    let second = encode(&schema, "Container", &value).unwrap();
    assert_eq!(first, second);
}

/// Invariant: DER varlength encoding is canonical for small values — a
/// length under 128 is a single byte equal to the value itself.
#[test]
fn der_varlength_is_canonical_for_small_values() {
    let schema = schema_from(serde_json::json!({
        "config": {"endianness": "big_endian"},
        "types": {
            "T": {
                "sequence": [
                    {"name": "length", "type": "varlength", "encoding": "der", "computed": {"kind": "length_of", "target": "payload"}},
                    {"name": "payload", "type": "array", "kind": "fixed", "length": 5, "items": {"type": "uint8"}}
                ]
            }
        }
    }));
    let value = Value::composite([("length", Value::U8(0)), ("payload", Value::Array((0..5).map(Value::U8).collect()))]);
    let bytes = encode(&schema, "T", &value).unwrap();
    assert_eq!(bytes[0], 0x05);
}

/// Invariant: a `peek` discriminator doesn't advance the reader — decoding
/// a `Label` whose leading byte is below `0xC0` leaves that byte available
/// for the label's own length-prefix read, not consumed twice.
#[test]
fn peek_discriminator_does_not_advance_past_the_chosen_variant_start() {
    let schema = dns_label_schema();
    let bytes: Vec<u8> = vec![0x03, b'c', b'o', b'm', 0xC0, 0x00];
    let decoded = decode(&schema, "Message", &bytes).unwrap();
    let labels = decoded.field("labels").unwrap().as_array().unwrap();
    assert_eq!(labels[0].variant_type(), Some("Label"));
    assert_eq!(labels[0].field("text"), Some(&Value::String("com".to_string())));
}

/// Invariant: the validator rejects a discriminated union with no
/// non-fallback variant, and a back_reference whose storage doesn't fit the
/// declared `offset_mask`.
#[test]
fn validator_rejects_malformed_schemas() {
    let all_fallback = serde_json::json!({
        "config": {"endianness": "big_endian"},
        "types": {
            "Label": {"sequence": [{"name": "text", "type": "string", "kind": "length_prefixed", "length_type": "uint8", "encoding": "ascii"}]},
            "LabelOrPointer": {
                "type": "discriminated_union",
                "discriminator": {"peek": "uint8"},
                "variants": [{"type": "Label"}]
            }
        }
    });
    let schema = load_schema(&all_fallback).unwrap();
    assert!(!validate(&schema).is_valid());

    let bad_mask = serde_json::json!({
        "config": {"endianness": "big_endian"},
        "types": {
            "Label": {"sequence": [{"name": "text", "type": "string", "kind": "length_prefixed", "length_type": "uint8", "encoding": "ascii"}]},
            "LabelPointer": {
                "sequence": [
                    {
                        "name": "target",
                        "type": "back_reference",
                        "storage": "uint8",
                        "offset_mask": "0x3FFF",
                        "offset_from": "message_start",
                        "target_type": "Label"
                    }
                ]
            }
        }
    });
    let schema = load_schema(&bad_mask).unwrap();
    assert!(!validate(&schema).is_valid());
}

/// Invariant: the validator accepts every schema used by the scenarios
/// above (completeness of the accepted surface, not just rejection).
#[test]
fn validator_accepts_every_scenario_schema() {
    for schema in [dns_label_schema(), sum_of_type_sizes_schema()] {
        assert!(validate(&schema).is_valid());
    }
}

/// Invariant: `annotate` covers the payload exactly, with no gap or overlap,
/// for a message that mixes consts, a computed length, and an array.
#[test]
fn annotator_covers_the_whole_payload() {
    let schema = schema_from(serde_json::json!({
        "config": {"endianness": "little_endian"},
        "types": {
            "T": {
                "sequence": [
                    {"name": "tag", "type": "uint16", "const": 4660},
                    {"name": "length", "type": "varlength", "encoding": "der", "computed": {"kind": "length_of", "from_after_field": "tag"}},
                    {"name": "payload", "type": "array", "kind": "fixed", "length": 5, "items": {"type": "uint8"}}
                ]
            }
        }
    }));
    let value = Value::composite([
        ("tag", Value::U16(4660)),
        ("length", Value::U8(0)),
        ("payload", Value::Array((1..=5).map(Value::U8).collect())),
    ]);
    let bytes = encode(&schema, "T", &value).unwrap();
    let annotations = annotate(&schema, "T", &value, &bytes).unwrap();
    assert_eq!(annotations.iter().map(|a| a.path.as_str()).collect::<Vec<_>>(), vec!["tag", "length", "payload"]);
    let mut cursor = 0u64;
    for a in &annotations {
        assert_eq!(a.byte_offset, cursor);
        cursor += a.byte_length;
    }
    assert_eq!(cursor, bytes.len() as u64);
}
