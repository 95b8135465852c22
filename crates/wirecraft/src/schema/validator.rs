// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Static schema validation (spec.md §4.2). A pure function of the schema;
//! never touches the wire.

use std::collections::{BTreeSet, HashMap};

use super::ir::*;
use crate::error::SchemaError;

#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<SchemaError>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

pub fn validate(schema: &Schema) -> ValidationResult {
    let mut errors = Vec::new();
    check_referential(schema, &mut errors);
    check_field_ordering(schema, &mut errors);
    check_computed_type_compatibility(schema, &mut errors);
    check_discriminated_unions(schema, &mut errors);
    check_back_references(schema, &mut errors);
    check_optionals(schema, &mut errors);
    check_choices(schema, &mut errors);
    check_strings(schema, &mut errors);
    check_cycles(schema, &mut errors);
    if let Some(protocol) = &schema.protocol {
        check_protocol(schema, protocol, &mut errors);
    }
    ValidationResult { errors }
}

/// Direct type-name references a field kind makes, for referential and cycle checks.
fn direct_type_refs(kind: &FieldKind) -> Vec<String> {
    match kind {
        FieldKind::TypeRef { name } => vec![name.clone()],
        FieldKind::Array { items, .. } => direct_type_refs(items),
        FieldKind::Optional { value_type, .. } => direct_type_refs(value_type),
        FieldKind::DiscriminatedUnion { variants, .. } => variants.iter().map(|v| v.type_name.clone()).collect(),
        FieldKind::Choice { variants } => variants.iter().map(|v| v.type_name.clone()).collect(),
        FieldKind::BackReference { target_type, .. } => vec![target_type.clone()],
        _ => Vec::new(),
    }
}

fn is_template_name(name: &str) -> bool {
    name.contains("<T>")
}

fn check_referential(schema: &Schema, errors: &mut Vec<SchemaError>) {
    for (type_name, def) in &schema.types {
        let kinds: Vec<(&str, &FieldKind)> = match def {
            TypeDef::Composite(c) => c.sequence.iter().map(|f| (f.name.as_str(), &f.kind)).collect(),
            TypeDef::Alias(kind) => vec![("$alias", kind)],
        };
        for (field_name, kind) in kinds {
            for referenced in direct_type_refs(kind) {
                if !type_exists(schema, &referenced) {
                    errors.push(SchemaError::new(
                        format!("types.{type_name}.{field_name}"),
                        format!("references unknown type {referenced:?}"),
                    ));
                }
            }
        }
    }
}

fn type_exists(schema: &Schema, name: &str) -> bool {
    if let Some(base) = name.strip_suffix('>').and_then(|s| s.split_once('<')).map(|(b, _)| b) {
        return schema.types.contains_key(&format!("{base}<T>"));
    }
    schema.types.contains_key(name)
}

fn check_protocol(schema: &Schema, protocol: &Protocol, errors: &mut Vec<SchemaError>) {
    if !type_exists(schema, &protocol.header_type) {
        errors.push(SchemaError::new("protocol.header", format!("unknown header type {:?}", protocol.header_type)));
    }
    for (i, m) in protocol.messages.iter().enumerate() {
        if !type_exists(schema, &m.payload_type) {
            errors.push(SchemaError::new(
                format!("protocol.messages[{i}].payload_type"),
                format!("unknown type {:?}", m.payload_type),
            ));
        }
    }
}

/// Fields referenced by name (discriminator, length_field, byte_budget,
/// computed path targets) must occur earlier in the same sequence, with the
/// documented forward-reference exceptions.
fn check_field_ordering(schema: &Schema, errors: &mut Vec<SchemaError>) {
    for (type_name, def) in &schema.types {
        let TypeDef::Composite(c) = def else { continue };
        for (i, field) in c.sequence.iter().enumerate() {
            let path = format!("types.{type_name}.{}", field.name);
            let mut require_before = |name: &str| {
                match c.field_index(name) {
                    Some(j) if j < i => {}
                    Some(_) => errors.push(SchemaError::new(path.clone(), format!("{name:?} must occur earlier in the sequence"))),
                    None => errors.push(SchemaError::new(path.clone(), format!("references unknown field {name:?}"))),
                }
            };

            match &field.kind {
                FieldKind::DiscriminatedUnion { discriminator: Discriminator::Field { path: p }, byte_budget_field, .. } => {
                    if p.is_plain_sibling() {
                        require_before(p.head());
                    }
                    if let Some(bb) = byte_budget_field {
                        require_before(bb);
                    }
                }
                FieldKind::DiscriminatedUnion { byte_budget_field: Some(bb), .. } => require_before(bb),
                FieldKind::Array { kind: ArrayKind::FieldReferenced { length_field }, .. } => require_before(length_field),
                FieldKind::String { kind: StringKind::FieldReferenced { length_field }, .. } => require_before(length_field),
                _ => {}
            }

            if let Some(computed) = &field.computed {
                match computed {
                    Computed::LengthOf { target: LengthOfTarget::FromAfterField(name), .. } => match c.field_index(name) {
                        Some(j) if j < i => {
                            for between in &c.sequence[j + 1..i] {
                                if between.const_value.is_none() && between.computed.is_none() {
                                    errors.push(SchemaError::new(
                                        path.clone(),
                                        format!("from_after_field({name:?}) leaves non-computed field {:?} in between", between.name),
                                    ));
                                }
                            }
                        }
                        Some(_) => errors.push(SchemaError::new(path.clone(), format!("from_after_field {name:?} must occur earlier"))),
                        None => errors.push(SchemaError::new(path.clone(), format!("references unknown field {name:?}"))),
                    },
                    Computed::LengthOf { target: LengthOfTarget::Path(p), .. } | Computed::Crc32Of { target: p } => {
                        if p.is_plain_sibling() {
                            require_before(p.head());
                        }
                    }
                    Computed::SumOfSizes { targets } => {
                        for p in targets {
                            if p.is_plain_sibling() {
                                require_before(p.head());
                            }
                        }
                    }
                    Computed::SumOfTypeSizes { target, .. } => {
                        if target.is_plain_sibling() {
                            require_before(target.head());
                        }
                    }
                    // position_of is explicitly allowed to forward-reference.
                    Computed::PositionOf { .. } => {}
                }
            }
        }
    }
}

fn check_computed_type_compatibility(schema: &Schema, errors: &mut Vec<SchemaError>) {
    for (type_name, def) in &schema.types {
        let TypeDef::Composite(c) = def else { continue };
        for field in &c.sequence {
            let Some(computed) = &field.computed else { continue };
            let path = format!("types.{type_name}.{}", field.name);
            let is_unsigned_int = matches!(field.kind, FieldKind::Integer { int_type, .. } if !int_type.is_signed());
            let is_varlength = matches!(field.kind, FieldKind::Varlength { .. });
            match computed {
                Computed::Crc32Of { .. } => {
                    if !matches!(field.kind, FieldKind::Integer { int_type: IntType::U32, .. }) {
                        errors.push(SchemaError::new(path, "crc32_of requires a uint32 host field"));
                    }
                }
                _ => {
                    if !is_unsigned_int && !is_varlength {
                        errors.push(SchemaError::new(path, "computed field requires an unsigned-integer or varlength host field"));
                    }
                }
            }
        }
    }
}

fn check_discriminated_unions(schema: &Schema, errors: &mut Vec<SchemaError>) {
    for_each_field(schema, |path, field| {
        let FieldKind::DiscriminatedUnion { discriminator, variants, .. } = &field.kind else { return };
        if let Discriminator::Peek { int_type, endianness } = discriminator {
            let multi_byte = int_type.byte_width() > 1;
            if multi_byte && endianness.is_none() {
                errors.push(SchemaError::new(path.clone(), "multi-byte peek discriminator requires endianness"));
            }
            if !multi_byte && endianness.is_some() {
                errors.push(SchemaError::new(path.clone(), "uint8 peek discriminator must not declare endianness"));
            }
        }
        let non_fallback = variants.iter().filter(|v| v.when.is_some()).count();
        if non_fallback == 0 {
            errors.push(SchemaError::new(path.clone(), "discriminated union requires at least one non-fallback variant"));
        }
        if let Some(pos) = variants.iter().position(|v| v.when.is_none()) {
            if pos != variants.len() - 1 {
                errors.push(SchemaError::new(path.clone(), "fallback variant (no \"when\") must be last"));
            }
        }
    });
}

fn check_back_references(schema: &Schema, errors: &mut Vec<SchemaError>) {
    for_each_field(schema, |path, field| {
        let FieldKind::BackReference { storage, offset_mask, endianness, .. } = &field.kind else { return };
        if !matches!(storage, IntType::U8 | IntType::U16 | IntType::U32) {
            errors.push(SchemaError::new(path.clone(), "back_reference storage must be uint8/uint16/uint32"));
        }
        if *offset_mask == 0 {
            errors.push(SchemaError::new(path.clone(), "offset_mask must be non-zero"));
        }
        if *offset_mask > storage.max_unsigned() {
            errors.push(SchemaError::new(path.clone(), "offset_mask does not fit in storage"));
        }
        let multi_byte = storage.byte_width() > 1;
        if multi_byte && endianness.is_none() {
            errors.push(SchemaError::new(path.clone(), "multi-byte back_reference storage requires endianness"));
        }
        if !multi_byte && endianness.is_some() {
            errors.push(SchemaError::new(path.clone(), "uint8 back_reference storage must not declare endianness"));
        }
    });
}

fn check_optionals(schema: &Schema, errors: &mut Vec<SchemaError>) {
    for_each_field(schema, |path, field| {
        let FieldKind::Optional { value_type, .. } = &field.kind else { return };
        if matches!(**value_type, FieldKind::Optional { .. }) {
            errors.push(SchemaError::new(path.clone(), "optional<optional<_>> is not allowed"));
        }
        if matches!(**value_type, FieldKind::Bit { .. }) {
            errors.push(SchemaError::new(path.clone(), "optional<bit> is not allowed"));
        }
    });
}

fn check_choices(schema: &Schema, errors: &mut Vec<SchemaError>) {
    for_each_field(schema, |path, field| {
        let FieldKind::Choice { variants } = &field.kind else { return };
        if variants.len() < 2 {
            errors.push(SchemaError::new(path.clone(), "choice requires at least two variants"));
            return;
        }
        let mut seen_consts = BTreeSet::new();
        let mut common_int_type: Option<IntType> = None;
        for variant in variants {
            let Some(TypeDef::Composite(c)) = schema.type_def(&variant.type_name) else {
                errors.push(SchemaError::new(path.clone(), format!("choice variant {:?} is not a composite type", variant.type_name)));
                continue;
            };
            let Some(first) = c.sequence.first() else {
                errors.push(SchemaError::new(path.clone(), format!("choice variant {:?} has no fields", variant.type_name)));
                continue;
            };
            let FieldKind::Integer { int_type, .. } = first.kind else {
                errors.push(SchemaError::new(path.clone(), format!("choice variant {:?} must start with an integer tag", variant.type_name)));
                continue;
            };
            match common_int_type {
                None => common_int_type = Some(int_type),
                Some(expected) if expected != int_type => {
                    errors.push(SchemaError::new(path.clone(), "choice variants must share one tag integer type"));
                }
                _ => {}
            }
            match &first.const_value {
                Some(ConstValue::Int(v)) => {
                    if !seen_consts.insert(*v) {
                        errors.push(SchemaError::new(path.clone(), format!("choice tag value {v} is not unique")));
                    }
                }
                _ => errors.push(SchemaError::new(path.clone(), format!("choice variant {:?} tag field must be const", variant.type_name))),
            }
        }
    });
}

fn check_strings(schema: &Schema, errors: &mut Vec<SchemaError>) {
    for_each_field(schema, |path, field| {
        let FieldKind::String { kind, encoding, const_str } = &field.kind else { return };
        let Some(const_str) = const_str else { return };
        if !matches!(kind, StringKind::Fixed { .. }) {
            errors.push(SchemaError::new(path.clone(), "string \"const\" is only allowed on kind=fixed"));
            return;
        }
        if let StringKind::Fixed { length } = kind {
            let byte_len = match encoding {
                StringEncoding::Ascii => const_str.len() as u64,
                StringEncoding::Utf8 => const_str.len() as u64,
            };
            if byte_len > *length {
                errors.push(SchemaError::new(path.clone(), format!("const string is {byte_len} bytes, longer than declared length {length}")));
            }
        }
    });
}

fn check_cycles(schema: &Schema, errors: &mut Vec<SchemaError>) {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Gray,
        Black,
    }
    let mut marks: HashMap<&str, Mark> = HashMap::new();

    fn visit<'a>(schema: &'a Schema, name: &'a str, marks: &mut HashMap<&'a str, Mark>, stack: &mut Vec<&'a str>, errors: &mut Vec<SchemaError>) {
        if is_template_name(name) {
            return;
        }
        match marks.get(name) {
            Some(Mark::Black) => return,
            Some(Mark::Gray) => {
                let mut chain: Vec<&str> = stack.clone();
                chain.push(name);
                errors.push(SchemaError::new(format!("types.{name}"), format!("circular type dependency: {}", chain.join(" -> "))));
                return;
            }
            None => {}
        }
        let Some((def, canonical)) = schema.types.get_key_value(crate::schema::ir::strip_generic_args(name)) else {
            return;
        };
        marks.insert(canonical.as_str(), Mark::Gray);
        stack.push(canonical.as_str());
        let edges: Vec<String> = match def {
            TypeDef::Composite(c) => c.sequence.iter().flat_map(|f| direct_type_refs(&f.kind)).collect(),
            TypeDef::Alias(kind) => direct_type_refs(kind),
        };
        for edge in edges {
            if let Some((_, canonical_edge)) = schema.types.get_key_value(crate::schema::ir::strip_generic_args(&edge)) {
                visit(schema, canonical_edge.as_str(), marks, stack, errors);
            }
        }
        stack.pop();
        marks.insert(canonical.as_str(), Mark::Black);
    }

    let names: Vec<&str> = schema.types.keys().map(String::as_str).collect();
    for name in names {
        let mut stack = Vec::new();
        visit(schema, name, &mut marks, &mut stack, errors);
    }
}

/// Visits every field-shaped thing in the schema: a composite's sequence
/// fields, and a type whose whole body is an alias for one field kind
/// (e.g. a top-level `discriminated_union` or `choice`) represented as a
/// single synthetic field named after the type itself.
fn for_each_field(schema: &Schema, mut f: impl FnMut(&String, &Field)) {
    for (type_name, def) in &schema.types {
        match def {
            TypeDef::Composite(c) => {
                for field in &c.sequence {
                    let path = format!("types.{type_name}.{}", field.name);
                    f(&path, field);
                }
            }
            TypeDef::Alias(kind) => {
                let path = format!("types.{type_name}");
                let synthetic = Field {
                    name: type_name.clone(),
                    kind: kind.clone(),
                    const_value: None,
                    conditional: None,
                    computed: None,
                };
                f(&path, &synthetic);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::loader::load_schema;
    use serde_json::json;

    #[test]
    fn accepts_scalar_schema() {
        let doc = json!({ "types": { "T": { "sequence": [ { "name": "v", "type": "uint32" } ] } } });
        let schema = load_schema(&doc).unwrap();
        assert!(validate(&schema).is_valid());
    }

    #[test]
    fn rejects_unknown_type_reference() {
        let doc = json!({ "types": { "T": { "sequence": [ { "name": "v", "type": "Missing" } ] } } });
        let schema = load_schema(&doc).unwrap();
        let result = validate(&schema);
        assert!(!result.is_valid());
        assert!(result.errors[0].message.contains("unknown type"));
    }

    #[test]
    fn rejects_forward_reference_to_length_field() {
        let doc = json!({ "types": { "T": { "sequence": [
            { "name": "items", "type": "array", "items": { "type": "uint8" }, "kind": "field_referenced", "length_field": "count" },
            { "name": "count", "type": "uint8" }
        ] } } });
        let schema = load_schema(&doc).unwrap();
        let result = validate(&schema);
        assert!(!result.is_valid());
    }

    #[test]
    fn detects_direct_type_cycle() {
        let doc = json!({ "types": {
            "A": { "sequence": [ { "name": "b", "type": "B" } ] },
            "B": { "sequence": [ { "name": "a", "type": "A" } ] }
        } });
        let schema = load_schema(&doc).unwrap();
        let result = validate(&schema);
        assert!(result.errors.iter().any(|e| e.message.contains("circular")));
    }

    #[test]
    fn crc32_of_requires_uint32_host() {
        let doc = json!({ "types": { "T": { "sequence": [
            { "name": "data", "type": "array", "items": { "type": "uint8" }, "kind": "fixed", "length": 4 },
            { "name": "sum", "type": "uint16", "computed": { "kind": "crc32_of", "target": "data" } }
        ] } } });
        let schema = load_schema(&doc).unwrap();
        let result = validate(&schema);
        assert!(!result.is_valid());
    }
}
