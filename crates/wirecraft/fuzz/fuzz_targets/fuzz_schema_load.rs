// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Fuzz target for the schema loader and validator.
//!
//! Treats arbitrary bytes as a JSON document and feeds anything that parses
//! into `load_schema` and then `validate`. Neither should ever panic,
//! regardless of how malformed the document is.

#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(doc) = serde_json::from_slice::<serde_json::Value>(data) else {
        return;
    };
    if let Ok(schema) = wirecraft::load_schema(&doc) {
        let _ = wirecraft::validate(&schema);
    }
});
