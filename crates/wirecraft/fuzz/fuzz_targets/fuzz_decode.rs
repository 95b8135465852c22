// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Fuzz target for the decoder.
//!
//! Feeds arbitrary bytes to `decode` against a schema that exercises
//! arrays, strings, a discriminated union, and a back_reference in one
//! message. `decode` should return an error on malformed input, never
//! panic or loop forever.

#![no_main]

use libfuzzer_sys::fuzz_target;
use std::sync::OnceLock;
use wirecraft::Schema;

fn schema() -> &'static Schema {
    static SCHEMA: OnceLock<Schema> = OnceLock::new();
    SCHEMA.get_or_init(|| {
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
        wirecraft::load_schema(&doc).expect("fuzz target schema must load")
    })
}

fuzz_target!(|data: &[u8]| {
    let _ = wirecraft::decode(schema(), "Message", data);
});
