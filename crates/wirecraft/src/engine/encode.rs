// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The encode half of the interpreter (spec.md §4.3.1): walks a composite's
//! field sequence against a supplied [`Value`] tree, writing bits through a
//! [`BitWriter`] and materializing computed fields as it goes.

use crate::bitstream::{BitWriter, Endianness};
use crate::crc32::crc32;
use crate::error::EncodeError;
use crate::schema::ir::{
    ArrayKind, BitfieldField, ChoiceVariant, Computed, ConstValue, Discriminator, Field, FieldKind, LengthOfTarget,
    PositionTarget, PresenceType, Schema, SelectorKind, StringEncoding, StringKind, VarlengthEncoding,
};
use crate::schema::path::Path;
use crate::value::Value;

use super::context::{ArrayIterState, EngineContext, RecordedBitfield};
use super::resolve::{resolve_ident_in_value, resolve_in_value};

/// Encode `value` as an instance of `type_name` and return the wire bytes.
pub fn encode(schema: &Schema, type_name: &str, value: &Value) -> Result<Vec<u8>, EncodeError> {
    let mut ctx = EngineContext::new(false);
    encode_with(schema, type_name, value, &mut ctx)
}

pub(crate) fn encode_with(schema: &Schema, type_name: &str, value: &Value, ctx: &mut EngineContext) -> Result<Vec<u8>, EncodeError> {
    let mut bw = BitWriter::with_bit_order(schema.config.bit_order);
    encode_type(ctx, schema, type_name, value, &mut bw, "")?;
    Ok(bw.finish())
}

fn endian_of(schema: &Schema, override_: Option<Endianness>) -> Endianness {
    override_.unwrap_or(schema.config.endianness)
}

pub(crate) fn encode_type(ctx: &mut EngineContext, schema: &Schema, type_name: &str, value: &Value, bw: &mut BitWriter, path: &str) -> Result<(), EncodeError> {
    let def = schema
        .type_def(type_name)
        .ok_or_else(|| EncodeError::MissingRequired { path: path.to_string() })?;
    match def.clone() {
        crate::schema::ir::TypeDef::Composite(composite) => encode_sequence(ctx, schema, &composite.sequence, value, bw, 0, path),
        crate::schema::ir::TypeDef::Alias(kind) => encode_kind(ctx, schema, &kind, value, bw, path),
    }
}

/// Walk `fields[start..]`, stopping early (everything was already spliced)
/// when a `length_of(from_after_field)` field is encountered.
fn encode_sequence(
    ctx: &mut EngineContext,
    schema: &Schema,
    fields: &[Field],
    composite_value: &Value,
    bw: &mut BitWriter,
    start: usize,
    path: &str,
) -> Result<(), EncodeError> {
    let mut i = start;
    while i < fields.len() {
        let field = &fields[i];
        let field_path = join_path(path, &field.name);

        if let Some(cond) = &field.conditional {
            let matched = crate::schema::when::evaluate(cond, &|name| resolve_ident_in_value(name, None, composite_value, &ctx.parents))
                .map_err(|reason| EncodeError::OutOfRange { path: field_path.clone(), reason })?;
            if !matched {
                i += 1;
                continue;
            }
        }

        let start_offset = bw.byte_offset();

        if let Some(Computed::LengthOf {
            target: LengthOfTarget::FromAfterField(_),
            encoding,
            offset,
        }) = &field.computed
        {
            let mut scratch = BitWriter::with_bit_order(schema.config.bit_order);
            encode_sequence(ctx, schema, fields, composite_value, &mut scratch, i + 1, path)?;
            let bytes = scratch.finish();
            let length = apply_offset(bytes.len() as i64, *offset, &field_path)?;
            write_length_value(schema.config.endianness, &field.kind, length, *encoding, bw, &field_path)?;
            bw.write_bytes(&bytes);
            record_field(ctx, &field_path, start_offset, bw.byte_offset() - start_offset);
            return Ok(());
        }

        if let Some(const_val) = &field.const_value {
            encode_const(&field.kind, const_val, bw, &field_path, endian_of(schema, None))?;
        } else if let Some(computed) = &field.computed {
            encode_computed(ctx, schema, fields, composite_value, i, &field.kind, computed, bw, &field_path)?;
        } else {
            let fv = composite_value
                .field(&field.name)
                .ok_or_else(|| EncodeError::MissingRequired { path: field_path.clone() })?;
            ctx.parents.push(composite_value.clone());
            ctx.parent_fields.push(fields.to_vec());
            let res = encode_kind(ctx, schema, &field.kind, fv, bw, &field_path);
            ctx.parents.pop();
            ctx.parent_fields.pop();
            res?;
        }

        record_field(ctx, &field_path, start_offset, bw.byte_offset() - start_offset);
        i += 1;
    }
    Ok(())
}

fn record_field(ctx: &mut EngineContext, path: &str, start_offset: u64, length: u64) {
    if ctx.record {
        ctx.record_span(path, start_offset, length, Vec::new());
    }
}

fn join_path(path: &str, name: &str) -> String {
    if path.is_empty() {
        name.to_string()
    } else {
        format!("{path}.{name}")
    }
}

fn apply_offset(value: i64, offset: Option<i64>, path: &str) -> Result<i64, EncodeError> {
    match offset {
        Some(o) => value.checked_add(o).ok_or_else(|| EncodeError::OutOfRange {
            path: path.to_string(),
            reason: "length offset overflowed".to_string(),
        }),
        None => Ok(value),
    }
}

fn write_length_value(default_endian: Endianness, kind: &FieldKind, length: i64, encoding: Option<StringEncoding>, bw: &mut BitWriter, path: &str) -> Result<(), EncodeError> {
    let _ = encoding;
    if length < 0 {
        return Err(EncodeError::OutOfRange {
            path: path.to_string(),
            reason: format!("computed length {length} is negative"),
        });
    }
    write_numeric_kind(default_endian, kind, length as u64, bw, path)
}

fn write_numeric_kind(default_endian: Endianness, kind: &FieldKind, value: u64, bw: &mut BitWriter, path: &str) -> Result<(), EncodeError> {
    match kind {
        FieldKind::Integer { int_type, endianness } => {
            let endian = endianness.unwrap_or(default_endian);
            write_int(*int_type, value as i128, endian, bw, path)
        }
        FieldKind::Varlength { encoding } => {
            write_varlength(*encoding, value, bw);
            Ok(())
        }
        other => Err(EncodeError::OutOfRange {
            path: path.to_string(),
            reason: format!("computed field host kind {other:?} cannot carry a numeric value"),
        }),
    }
}

fn write_varlength(encoding: VarlengthEncoding, value: u64, bw: &mut BitWriter) {
    match encoding {
        VarlengthEncoding::Der => bw.write_der(value),
        VarlengthEncoding::Leb128 => bw.write_leb128(value),
        VarlengthEncoding::Ebml => {
            let _ = bw.write_ebml(value);
        }
        VarlengthEncoding::Vlq => bw.write_vlq(value),
    }
}

fn write_int(int_type: crate::schema::ir::IntType, value: i128, endian: Endianness, bw: &mut BitWriter, path: &str) -> Result<(), EncodeError> {
    use crate::schema::ir::IntType::*;
    let unsigned_max = int_type.max_unsigned() as i128;
    if int_type.is_signed() {
        let half = (unsigned_max + 1) / 2;
        if value < -half || value >= half {
            return Err(EncodeError::OutOfRange {
                path: path.to_string(),
                reason: format!("{value} does not fit {int_type:?}"),
            });
        }
    } else if value < 0 || value > unsigned_max {
        return Err(EncodeError::OutOfRange {
            path: path.to_string(),
            reason: format!("{value} does not fit {int_type:?}"),
        });
    }
    match int_type {
        U8 => bw.write_u8(value as u8),
        I8 => bw.write_i8(value as i8),
        U16 => bw.write_u16(value as u16, endian),
        I16 => bw.write_i16(value as i16, endian),
        U32 => bw.write_u32(value as u32, endian),
        I32 => bw.write_i32(value as i32, endian),
        U64 => bw.write_u64(value as u64, endian),
        I64 => bw.write_i64(value as i64, endian),
    }
    Ok(())
}

fn encode_const(kind: &FieldKind, const_value: &ConstValue, bw: &mut BitWriter, path: &str, endian: Endianness) -> Result<(), EncodeError> {
    match (kind, const_value) {
        (FieldKind::Integer { int_type, endianness }, ConstValue::Int(v)) => write_int(*int_type, *v, endianness.unwrap_or(endian), bw, path),
        (FieldKind::Varlength { encoding }, ConstValue::Int(v)) => {
            write_varlength(*encoding, *v as u64, bw);
            Ok(())
        }
        (FieldKind::String { const_str: Some(_), kind: StringKind::Fixed { length }, encoding, .. }, ConstValue::Str(s)) => {
            write_fixed_string(s, *length, *encoding, bw, path)
        }
        (FieldKind::String { .. }, ConstValue::Str(s)) => encode_kind_inner(endian, kind, &Value::String(s.clone()), bw, path),
        (_, ConstValue::Bytes(b)) => {
            bw.write_bytes(b);
            Ok(())
        }
        _ => Err(EncodeError::OutOfRange {
            path: path.to_string(),
            reason: "const value does not match field kind".to_string(),
        }),
    }
}

fn write_fixed_string(s: &str, length: u64, encoding: StringEncoding, bw: &mut BitWriter, path: &str) -> Result<(), EncodeError> {
    let bytes = string_bytes(s, encoding, path)?;
    if bytes.len() as u64 != length {
        return Err(EncodeError::OutOfRange {
            path: path.to_string(),
            reason: format!("fixed string expected {length} bytes, got {}", bytes.len()),
        });
    }
    bw.write_bytes(&bytes);
    Ok(())
}

fn string_bytes(s: &str, encoding: StringEncoding, path: &str) -> Result<Vec<u8>, EncodeError> {
    match encoding {
        StringEncoding::Utf8 => Ok(s.as_bytes().to_vec()),
        StringEncoding::Ascii => {
            if !s.is_ascii() {
                return Err(EncodeError::OutOfRange {
                    path: path.to_string(),
                    reason: "string is not ASCII".to_string(),
                });
            }
            Ok(s.as_bytes().to_vec())
        }
    }
}

/// Dispatches on a `FieldKind`, delegating directly (no const/computed
/// handling -- that belongs to the enclosing composite field loop).
fn encode_kind(ctx: &mut EngineContext, schema: &Schema, kind: &FieldKind, value: &Value, bw: &mut BitWriter, path: &str) -> Result<(), EncodeError> {
    match kind {
        FieldKind::TypeRef { name } => encode_type(ctx, schema, name, value, bw, path),
        FieldKind::Array { items, kind: array_kind } => encode_array(ctx, schema, items, array_kind, value, bw, path),
        FieldKind::Optional { presence_type, value_type } => encode_optional(ctx, schema, *presence_type, value_type, value, bw, path),
        FieldKind::DiscriminatedUnion { discriminator, variants, byte_budget_field } => {
            encode_discriminated_union(ctx, schema, discriminator, variants, byte_budget_field.as_deref(), value, bw, path)
        }
        FieldKind::BackReference {
            storage,
            offset_mask,
            target_type,
            endianness,
            ..
        } => encode_back_reference(ctx, schema, *storage, *offset_mask, target_type, *endianness, value, bw, path),
        FieldKind::Choice { variants } => encode_choice(ctx, schema, variants, value, bw, path),
        _ => encode_kind_inner(schema.config.endianness, kind, value, bw, path),
    }
}

/// Scalar/leaf kinds that need no schema or engine context.
fn encode_kind_inner(default_endian: Endianness, kind: &FieldKind, value: &Value, bw: &mut BitWriter, path: &str) -> Result<(), EncodeError> {
    match kind {
        FieldKind::Integer { int_type, endianness } => {
            let v = value.as_i128().ok_or_else(|| EncodeError::MissingRequired { path: path.to_string() })?;
            write_int(*int_type, v, endianness.unwrap_or(default_endian), bw, path)
        }
        FieldKind::Float { float_type } => {
            match (float_type, value) {
                (crate::schema::ir::FloatType::F32, Value::F32(v)) => bw.write_f32(*v, default_endian),
                (crate::schema::ir::FloatType::F64, Value::F64(v)) => bw.write_f64(*v, default_endian),
                _ => {
                    return Err(EncodeError::OutOfRange {
                        path: path.to_string(),
                        reason: "float value kind mismatch".to_string(),
                    })
                }
            }
            Ok(())
        }
        FieldKind::Bit { size } => {
            let v = value.as_i128().ok_or_else(|| EncodeError::MissingRequired { path: path.to_string() })?;
            bw.write_bits(v as u64, *size);
            Ok(())
        }
        FieldKind::Bitfield { size, fields } => encode_bitfield(*size, fields, value, bw, path),
        FieldKind::Varlength { encoding } => {
            let v = value.as_i128().ok_or_else(|| EncodeError::MissingRequired { path: path.to_string() })?;
            write_varlength(*encoding, v as u64, bw);
            Ok(())
        }
        FieldKind::String { kind, encoding, .. } => encode_string(default_endian, kind, *encoding, value, bw, path),
        FieldKind::Padding { bits } => {
            bw.write_bits(0, (*bits).min(64) as u8);
            let mut remaining = *bits;
            if remaining > 64 {
                remaining -= 64;
                while remaining > 0 {
                    let n = remaining.min(64) as u8;
                    bw.write_bits(0, n);
                    remaining -= n as u64;
                }
            }
            Ok(())
        }
        _ => unreachable!("handled by encode_kind"),
    }
}

fn encode_bitfield(size: u16, fields: &[BitfieldField], value: &Value, bw: &mut BitWriter, path: &str) -> Result<(), EncodeError> {
    let mut written = 0u16;
    for bf in fields {
        if bf.offset > written {
            bw.write_bits(0, (bf.offset - written) as u8);
        }
        let v = value
            .field(&bf.name)
            .and_then(Value::as_i128)
            .ok_or_else(|| EncodeError::MissingRequired { path: format!("{path}.{}", bf.name) })?;
        bw.write_bits(v as u64, bf.size as u8);
        written = bf.offset + bf.size;
    }
    if written > size {
        return Err(EncodeError::OutOfRange {
            path: path.to_string(),
            reason: format!("bitfield subfields overflow declared size {size}"),
        });
    }
    if written < size {
        bw.write_bits(0, (size - written) as u8);
    }
    Ok(())
}

fn encode_string(default_endian: Endianness, kind: &StringKind, encoding: StringEncoding, value: &Value, bw: &mut BitWriter, path: &str) -> Result<(), EncodeError> {
    let s = value.as_str().ok_or_else(|| EncodeError::MissingRequired { path: path.to_string() })?;
    let bytes = string_bytes(s, encoding, path)?;
    match kind {
        StringKind::Fixed { length } => {
            if bytes.len() as u64 != *length {
                return Err(EncodeError::OutOfRange {
                    path: path.to_string(),
                    reason: format!("fixed string expected {length} bytes, got {}", bytes.len()),
                });
            }
            bw.write_bytes(&bytes);
        }
        StringKind::LengthPrefixed { length_type } => {
            write_int(*length_type, bytes.len() as i128, default_endian, bw, path)?;
            bw.write_bytes(&bytes);
        }
        StringKind::NullTerminated => {
            bw.write_bytes(&bytes);
            bw.write_u8(0);
        }
        StringKind::FieldReferenced { .. } => {
            bw.write_bytes(&bytes);
        }
    }
    Ok(())
}

fn encode_array(ctx: &mut EngineContext, schema: &Schema, items: &FieldKind, array_kind: &ArrayKind, value: &Value, bw: &mut BitWriter, path: &str) -> Result<(), EncodeError> {
    let elements = value.as_array().ok_or_else(|| EncodeError::MissingRequired { path: path.to_string() })?;

    if let ArrayKind::Fixed { length } = array_kind {
        if elements.len() as u64 != *length {
            return Err(EncodeError::ArityMismatch {
                path: path.to_string(),
                expected: *length as usize,
                found: elements.len(),
            });
        }
    }

    match array_kind {
        ArrayKind::LengthPrefixed { length_type, length_encoding } => match length_encoding {
            Some(enc) => write_varlength(*enc, elements.len() as u64, bw),
            None => write_int(*length_type, elements.len() as i128, schema.config.endianness, bw, path)?,
        },
        ArrayKind::ByteLengthPrefixed { length_type, length_encoding } => {
            let mut scratch = BitWriter::with_bit_order(schema.config.bit_order);
            encode_array_elements(ctx, schema, items, elements, &mut scratch, path)?;
            let bytes = scratch.finish();
            match length_encoding {
                Some(enc) => write_varlength(*enc, bytes.len() as u64, bw),
                None => write_int(*length_type, bytes.len() as i128, schema.config.endianness, bw, path)?,
            }
            bw.write_bytes(&bytes);
            return Ok(());
        }
        _ => {}
    }

    encode_array_elements(ctx, schema, items, elements, bw, path)?;

    // A trailing 0x00 only belongs here when termination is the explicit
    // sentinel byte; when `terminal_variants` names the terminator, the last
    // element's own encoding already ends the array (spec.md §3.3).
    if let ArrayKind::NullTerminated { terminal_variants } = array_kind {
        if terminal_variants.is_empty() {
            bw.write_u8(0);
        }
    }
    Ok(())
}

fn encode_array_elements(ctx: &mut EngineContext, schema: &Schema, items: &FieldKind, elements: &[Value], bw: &mut BitWriter, path: &str) -> Result<(), EncodeError> {
    let array_name = path.rsplit('.').next().unwrap_or(path).to_string();
    for (idx, el) in elements.iter().enumerate() {
        let el_path = format!("{path}[{idx}]");
        let tag = el.variant_type().map(str::to_string);

        let start_offset = bw.byte_offset();
        encode_kind(ctx, schema, items, el, bw, &el_path)?;

        if let Some(tag) = &tag {
            let key = EngineContext::array_position_key(&array_name, tag);
            ctx.positions.entry(key).or_default().push(start_offset);
            let frame = ctx.array_iterations.entry(array_name.clone()).or_insert_with(ArrayIterState::default);
            *frame.type_indices.entry(tag.clone()).or_insert(0) += 1;
        }
        let frame = ctx.array_iterations.entry(array_name.clone()).or_insert_with(ArrayIterState::default);
        frame.index = idx + 1;
    }
    Ok(())
}

fn encode_optional(ctx: &mut EngineContext, schema: &Schema, presence_type: PresenceType, value_type: &FieldKind, value: &Value, bw: &mut BitWriter, path: &str) -> Result<(), EncodeError> {
    let present = !value.is_absent();
    match presence_type {
        PresenceType::U8 => bw.write_u8(u8::from(present)),
        PresenceType::Bit => bw.write_bits(u64::from(present), 1),
    }
    if present {
        encode_kind(ctx, schema, value_type, value, bw, path)?;
    }
    Ok(())
}

fn encode_discriminated_union(
    ctx: &mut EngineContext,
    schema: &Schema,
    discriminator: &Discriminator,
    variants: &[crate::schema::ir::Variant],
    byte_budget_field: Option<&str>,
    value: &Value,
    bw: &mut BitWriter,
    path: &str,
) -> Result<(), EncodeError> {
    let _ = byte_budget_field;
    let tag = value.variant_type().ok_or_else(|| EncodeError::MissingRequired { path: path.to_string() })?;
    if !variants.iter().any(|v| v.type_name == tag) {
        return Err(EncodeError::UnknownVariant {
            path: path.to_string(),
            tag: tag.to_string(),
        });
    }
    // A `peek` discriminator never consumes/writes a byte of its own: the
    // discriminant is whatever leading bytes the chosen variant's own field
    // sequence naturally produces (spec.md §3.3). `discriminator` is only
    // consulted on the decode side, to pick which variant to read.
    let _ = discriminator;
    let inner = value.variant_fields().cloned().unwrap_or_else(|| value.clone());
    encode_type_tail(ctx, schema, tag, &inner, bw, path)
}

fn encode_type_tail(ctx: &mut EngineContext, schema: &Schema, type_name: &str, value: &Value, bw: &mut BitWriter, path: &str) -> Result<(), EncodeError> {
    ctx.parents.push(value.clone());
    ctx.parent_fields.push(composite_fields_of(schema, type_name));
    let res = encode_type(ctx, schema, type_name, value, bw, path);
    ctx.parents.pop();
    ctx.parent_fields.pop();
    res
}

/// A type's own named fields, or an empty list for an alias type (which has
/// no named fields of its own to be an ascend/root target's containing scope).
fn composite_fields_of(schema: &Schema, type_name: &str) -> Vec<Field> {
    match schema.type_def(type_name) {
        Some(crate::schema::ir::TypeDef::Composite(c)) => c.sequence.clone(),
        _ => Vec::new(),
    }
}

fn encode_choice(ctx: &mut EngineContext, schema: &Schema, variants: &[ChoiceVariant], value: &Value, bw: &mut BitWriter, path: &str) -> Result<(), EncodeError> {
    let tag = value.variant_type().ok_or_else(|| EncodeError::MissingRequired { path: path.to_string() })?;
    if !variants.iter().any(|v| v.type_name == tag) {
        return Err(EncodeError::UnknownVariant {
            path: path.to_string(),
            tag: tag.to_string(),
        });
    }
    let inner = value.variant_fields().cloned().unwrap_or_else(|| value.clone());
    encode_type_tail(ctx, schema, tag, &inner, bw, path)
}

fn encode_back_reference(
    ctx: &mut EngineContext,
    schema: &Schema,
    storage: crate::schema::ir::IntType,
    offset_mask: u64,
    target_type: &str,
    endianness: Option<Endianness>,
    value: &Value,
    bw: &mut BitWriter,
    path: &str,
) -> Result<(), EncodeError> {
    let offset = value.as_i128().ok_or_else(|| EncodeError::MissingRequired { path: path.to_string() })? as u64 & offset_mask;
    // Bits outside the mask are the pointer's marker (e.g. DNS's leading `11`
    // for a 0x3FFF mask on a uint16): they're forced to 1, not left as
    // whatever the caller's offset happened to carry there (spec.md §4).
    let marker = !offset_mask & storage.max_unsigned();
    let raw = offset | marker;
    write_int(storage, i128::from(raw), endianness.unwrap_or(schema.config.endianness), bw, path)?;
    let _ = (ctx, schema, target_type);
    Ok(())
}

fn encode_computed(
    ctx: &mut EngineContext,
    schema: &Schema,
    fields: &[Field],
    composite_value: &Value,
    field_index: usize,
    kind: &FieldKind,
    computed: &Computed,
    bw: &mut BitWriter,
    path: &str,
) -> Result<(), EncodeError> {
    match computed {
        Computed::LengthOf { target, encoding, offset } => {
            let length = match target {
                LengthOfTarget::Path(p) => measure_path_length(ctx, schema, fields, composite_value, p, path)?,
                LengthOfTarget::FromAfterField(_) => unreachable!("handled in encode_sequence"),
            };
            let length = apply_offset(length as i64, *offset, path)?;
            write_length_value(schema.config.endianness, kind, length, *encoding, bw, path)
        }
        Computed::Crc32Of { target } => {
            let resolved = resolve_in_value(target, composite_value, &ctx.parents).ok_or_else(|| EncodeError::MissingRequired { path: path.to_string() })?;
            let bytes = value_as_byte_content(resolved).ok_or_else(|| EncodeError::OutOfRange {
                path: path.to_string(),
                reason: "crc32_of target is not byte content".to_string(),
            })?;
            write_numeric_kind(schema.config.endianness, kind, u64::from(crc32(&bytes)), bw, path)
        }
        Computed::PositionOf { target } => {
            let offset = resolve_position(ctx, schema, fields, composite_value, field_index, kind, target, bw, path)?;
            write_numeric_kind(schema.config.endianness, kind, offset, bw, path)
        }
        Computed::SumOfSizes { targets } => {
            let mut total = 0u64;
            for t in targets {
                total += measure_path_length(ctx, schema, fields, composite_value, t, path)?;
            }
            write_numeric_kind(schema.config.endianness, kind, total, bw, path)
        }
        Computed::SumOfTypeSizes { target, element_type } => {
            let arr = resolve_in_value(target, composite_value, &ctx.parents)
                .and_then(Value::as_array)
                .ok_or_else(|| EncodeError::MissingRequired { path: path.to_string() })?;
            let mut total = 0u64;
            for el in arr {
                if el.variant_type() == Some(element_type.as_str()) {
                    let mut scratch = BitWriter::with_bit_order(schema.config.bit_order);
                    encode_type(ctx, schema, element_type, &el.variant_fields().cloned().unwrap_or_else(|| el.clone()), &mut scratch, path)?;
                    total += scratch.finish().len() as u64;
                }
            }
            write_numeric_kind(schema.config.endianness, kind, total, bw, path)
        }
    }
}

fn value_as_byte_content(value: &Value) -> Option<Vec<u8>> {
    match value {
        Value::Bytes(b) => Some(b.clone()),
        Value::String(s) => Some(s.as_bytes().to_vec()),
        Value::Array(items) => items.iter().map(|el| if let Value::U8(b) = el { Some(*b) } else { None }).collect(),
        _ => None,
    }
}

/// The field list a path's target lives in: the current composite's own
/// fields for a plain sibling, or the matching `ctx.parent_fields` entry
/// (same index math as `resolve::ascend_into`) for `../`/`_root.` targets.
fn fields_for_path<'a>(ctx: &'a EngineContext, fields: &'a [Field], target: &Path) -> Option<&'a [Field]> {
    if target.is_plain_sibling() {
        return Some(fields);
    }
    if target.root {
        return ctx.parent_fields.first().map(Vec::as_slice);
    }
    let idx = ctx.parent_fields.len().checked_sub(target.ascend as usize)?;
    ctx.parent_fields.get(idx).map(Vec::as_slice)
}

/// Looks up a path target's declared `FieldKind`, descending through a
/// `TypeRef` field for each dotted segment after the head.
fn field_kind_for_path(schema: &Schema, fields: &[Field], target: &Path) -> Option<FieldKind> {
    let mut kind = fields.iter().find(|f| f.name == target.head())?.kind.clone();
    for seg in &target.segments[1..] {
        let FieldKind::TypeRef { name } = &kind else { return None };
        let crate::schema::ir::TypeDef::Composite(c) = schema.type_def(name)? else {
            return None;
        };
        kind = c.sequence.iter().find(|f| &f.name == seg)?.kind.clone();
    }
    Some(kind)
}

/// Measures the wire length of a `length_of`/`sum_of_sizes` target by
/// scratch-encoding it with its declared `FieldKind`, not by inspecting the
/// shape of the already-resolved `Value` (an `array<uint16>` and an
/// `array<uint8>` both decode to a `Value::Array`, but only one of them has
/// an element count equal to its byte length).
fn measure_path_length(ctx: &EngineContext, schema: &Schema, fields: &[Field], composite_value: &Value, target: &Path, path: &str) -> Result<u64, EncodeError> {
    let resolved = resolve_in_value(target, composite_value, &ctx.parents).ok_or_else(|| EncodeError::MissingRequired { path: path.to_string() })?;
    let scope_fields = fields_for_path(ctx, fields, target).ok_or_else(|| EncodeError::OutOfRange {
        path: path.to_string(),
        reason: "length_of target's containing composite is not available".to_string(),
    })?;
    let kind = field_kind_for_path(schema, scope_fields, target).ok_or_else(|| EncodeError::OutOfRange {
        path: path.to_string(),
        reason: "length_of target field is not declared in the schema".to_string(),
    })?;
    let mut scratch = BitWriter::with_bit_order(schema.config.bit_order);
    let mut scratch_ctx = EngineContext::new(false);
    encode_kind(&mut scratch_ctx, schema, &kind, resolved, &mut scratch, path)?;
    Ok(scratch.finish().len() as u64)
}

/// Resolves a `position_of` target to an absolute byte offset from the
/// message start. A plain sibling field is resolved by adding the computed
/// field's own (statically known) width plus the scratch-encoded width of
/// whatever fields sit between it and the target to the writer's current
/// offset — the computed field itself hasn't been written yet at this point,
/// so neither its own bytes nor the gap are already reflected in `here`.
/// Array selectors consult `ctx.positions`.
fn resolve_position(
    ctx: &mut EngineContext,
    schema: &Schema,
    fields: &[Field],
    composite_value: &Value,
    field_index: usize,
    host_kind: &FieldKind,
    target: &PositionTarget,
    bw: &BitWriter,
    path: &str,
) -> Result<u64, EncodeError> {
    match target {
        PositionTarget::Path(p) => {
            if p.is_plain_sibling() && p.segments.len() == 1 {
                if let Some(idx) = fields.iter().position(|f| f.name == p.head()) {
                    if idx <= field_index {
                        return Err(EncodeError::NonComputablePosition {
                            path: path.to_string(),
                            reason: format!("position_of target {:?} does not follow the computed field", p.head()),
                        });
                    }
                    let own_width = match host_kind {
                        FieldKind::Integer { int_type, .. } => u64::from(int_type.byte_width()),
                        other => {
                            return Err(EncodeError::NonComputablePosition {
                                path: path.to_string(),
                                reason: format!("position_of cannot be hosted on field kind {other:?}"),
                            })
                        }
                    };
                    let here = bw.byte_offset();
                    let mut scratch = BitWriter::with_bit_order(schema.config.bit_order);
                    let mut target_offset = None;
                    for f in &fields[field_index + 1..=idx] {
                        if f.name == p.head() {
                            target_offset = Some(scratch.byte_offset());
                            break;
                        }
                        if let Some(cv) = &f.const_value {
                            encode_const(&f.kind, cv, &mut scratch, path, schema.config.endianness)?;
                        } else if f.computed.is_some() {
                            // Computed fields ahead of the target cannot be
                            // replayed without full context; bail out rather
                            // than guess.
                            return Err(EncodeError::NonComputablePosition {
                                path: path.to_string(),
                                reason: format!("position_of target {:?} is preceded by another computed field", p.head()),
                            });
                        } else {
                            let fv = composite_value.field(&f.name).ok_or_else(|| EncodeError::MissingRequired { path: path.to_string() })?;
                            encode_kind(ctx, schema, &f.kind, fv, &mut scratch, path)?;
                        }
                    }
                    let local = target_offset.ok_or_else(|| EncodeError::NonComputablePosition {
                        path: path.to_string(),
                        reason: "position_of target field not found".to_string(),
                    })?;
                    return Ok(here - ctx.message_start + own_width + local);
                }
            }
            Err(EncodeError::NonComputablePosition {
                path: path.to_string(),
                reason: "position_of supports only a plain sibling field target".to_string(),
            })
        }
        PositionTarget::ArraySelector { array, selector, element_type } => {
            let key = EngineContext::array_position_key(array, element_type);
            let positions = ctx.positions.get(&key).ok_or_else(|| EncodeError::NonComputablePosition {
                path: path.to_string(),
                reason: format!("no recorded positions for {array}[{element_type}]"),
            })?;
            let offset = match selector {
                SelectorKind::First => positions.first().copied(),
                SelectorKind::Last => positions.last().copied(),
                SelectorKind::Corresponding => resolve_corresponding(ctx, array, element_type),
            };
            offset
                .map(|o| o - ctx.message_start)
                .ok_or_else(|| EncodeError::NonComputablePosition {
                    path: path.to_string(),
                    reason: format!("no element of type {element_type} recorded in {array}"),
                })
        }
    }
}

/// `corresponding<T>`: resolves to the element at the same occurrence index
/// the current array walk has reached (spec.md §4.3.4). This engine applies
/// the current array's element-count so far as the index into the target
/// array's recorded positions for `element_type`.
fn resolve_corresponding(ctx: &EngineContext, array: &str, element_type: &str) -> Option<u64> {
    let key = EngineContext::array_position_key(array, element_type);
    let positions = ctx.positions.get(&key)?;
    let idx = ctx.array_iterations.values().map(|s| s.index).max().unwrap_or(0).saturating_sub(1);
    positions.get(idx).copied().or_else(|| positions.last().copied())
}
