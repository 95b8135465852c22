// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

use std::hint::black_box as bb;

use criterion::{criterion_group, criterion_main, Criterion};
use wirecraft::{decode, encode, load_schema, Value};

fn dns_message_schema() -> wirecraft::Schema {
    let doc = serde_json::json!({
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
    });
    load_schema(&doc).expect("bench schema should load")
}

fn bench_decode(c: &mut Criterion) {
    let schema = dns_message_schema();
    let value = Value::composite([(
        "labels",
        Value::Array(vec![
            Value::variant("Label", Value::composite([("text", Value::String("www".to_string()))])),
            Value::variant("Label", Value::composite([("text", Value::String("example".to_string()))])),
            Value::variant("LabelPointer", Value::composite([("target", Value::U16(0))])),
        ]),
    )]);
    let bytes = encode(&schema, "Message", &value).unwrap();

    c.bench_function("decode dns-style message", |b| {
        b.iter(|| decode(bb(&schema), bb("Message"), bb(&bytes)).unwrap());
    });
}

fn scalar_schema() -> wirecraft::Schema {
    let doc = serde_json::json!({
        "config": {"endianness": "little_endian"},
        "types": {"T": {"sequence": [{"name": "v", "type": "uint32"}]}}
    });
    load_schema(&doc).expect("bench schema should load")
}

fn bench_decode_scalar(c: &mut Criterion) {
    let schema = scalar_schema();
    let bytes = vec![0x40, 0x42, 0x0F, 0x00];
    c.bench_function("decode scalar uint32", |b| {
        b.iter(|| decode(bb(&schema), bb("T"), bb(&bytes)).unwrap());
    });
}

criterion_group!(benches, bench_decode, bench_decode_scalar);
criterion_main!(benches);
