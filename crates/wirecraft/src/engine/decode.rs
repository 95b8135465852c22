// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The decode half of the interpreter (spec.md §4.3.2): mirrors [`super::encode`],
//! reading fields off a [`BitReader`] instead of writing them.
//!
//! Computed fields are read and kept verbatim rather than cross-checked
//! against the bytes that follow them -- spec.md §4.3 does not require the
//! decoder to re-verify a `length_of`/`crc32_of`/`position_of` value, only to
//! preserve it. `from_after_field` is the one computed kind the decoder must
//! still act on, since its value bounds how many of the following bytes
//! belong to this composite.

use crate::bitstream::{BitReader, Endianness};
use crate::error::DecodeError;
use crate::schema::ir::{
    ArrayKind, BitfieldField, Computed, ConstValue, Discriminator, Field, FieldKind, IntType, LengthOfTarget, OffsetFrom, PresenceType, Schema,
    StringEncoding, StringKind, TypeDef, VarlengthEncoding,
};
use crate::value::Value;

use super::context::EngineContext;
use super::resolve::resolve_ident_in_accum;

/// Decode `type_name` from `bytes`.
pub fn decode(schema: &Schema, type_name: &str, bytes: &[u8]) -> Result<Value, DecodeError> {
    let mut ctx = EngineContext::new(false);
    decode_with(schema, type_name, bytes, &mut ctx)
}

pub(crate) fn decode_with(schema: &Schema, type_name: &str, bytes: &[u8], ctx: &mut EngineContext) -> Result<Value, DecodeError> {
    let mut reader = BitReader::with_bit_order(bytes, schema.config.bit_order);
    decode_type(ctx, schema, type_name, &mut reader, "")
}

pub(crate) fn decode_type(ctx: &mut EngineContext, schema: &Schema, type_name: &str, reader: &mut BitReader<'_>, path: &str) -> Result<Value, DecodeError> {
    let def = schema
        .type_def(type_name)
        .ok_or_else(|| DecodeError::UnknownVariant {
            path: path.to_string(),
            discriminator: type_name.to_string(),
        })?
        .clone();
    match def {
        TypeDef::Composite(composite) => {
            let fields = decode_sequence(ctx, schema, &composite.sequence, reader, 0, path)?;
            Ok(Value::Composite(fields))
        }
        TypeDef::Alias(kind) => decode_kind(ctx, schema, &kind, reader, &[], path),
    }
}

fn join_path(path: &str, name: &str) -> String {
    if path.is_empty() {
        name.to_string()
    } else {
        format!("{path}.{name}")
    }
}

fn decode_sequence(
    ctx: &mut EngineContext,
    schema: &Schema,
    fields: &[Field],
    reader: &mut BitReader<'_>,
    start: usize,
    path: &str,
) -> Result<Vec<(String, Value)>, DecodeError> {
    let mut accum: Vec<(String, Value)> = Vec::new();
    let mut i = start;
    while i < fields.len() {
        let field = &fields[i];
        let field_path = join_path(path, &field.name);

        if let Some(cond) = &field.conditional {
            let matched = crate::schema::when::evaluate(cond, &|name| resolve_ident_in_accum(name, None, &accum, &ctx.parents)).unwrap_or(false);
            if !matched {
                i += 1;
                continue;
            }
        }

        let start_offset = reader.byte_offset();

        if let Some(Computed::LengthOf {
            target: LengthOfTarget::FromAfterField(_),
            offset,
            ..
        }) = &field.computed
        {
            let length_value = decode_kind(ctx, schema, &field.kind, reader, &accum, &field_path)?;
            let raw = length_value.as_i128().ok_or_else(|| DecodeError::NotByteAligned { path: field_path.clone() })?;
            let content_length = raw - i128::from(offset.unwrap_or(0));
            if content_length < 0 {
                return Err(DecodeError::OffsetOutOfBounds {
                    path: field_path.clone(),
                    offset: 0,
                    len: 0,
                });
            }
            let payload = reader.read_bytes(&field_path, content_length as usize)?;
            let mut sub_reader = BitReader::with_bit_order(&payload, schema.config.bit_order);
            accum.push((field.name.clone(), length_value));
            record_field(ctx, &field_path, start_offset, reader.byte_offset() - start_offset);
            let rest = decode_sequence(ctx, schema, fields, &mut sub_reader, i + 1, path)?;
            accum.extend(rest);
            return Ok(accum);
        }

        let value = if let Some(const_val) = &field.const_value {
            let decoded = decode_kind(ctx, schema, &field.kind, reader, &accum, &field_path)?;
            check_const(&decoded, const_val, &field_path)?;
            decoded
        } else {
            ctx.parents.push(Value::Composite(accum.clone()));
            let res = decode_kind(ctx, schema, &field.kind, reader, &accum, &field_path);
            ctx.parents.pop();
            res?
        };

        record_field(ctx, &field_path, start_offset, reader.byte_offset() - start_offset);
        accum.push((field.name.clone(), value));
        i += 1;
    }
    Ok(accum)
}

fn record_field(ctx: &mut EngineContext, path: &str, start_offset: u64, length: u64) {
    if ctx.record {
        ctx.record_span(path, start_offset, length, Vec::new());
    }
}

fn check_const(decoded: &Value, expected: &ConstValue, path: &str) -> Result<(), DecodeError> {
    let matches = match (decoded, expected) {
        (v, ConstValue::Int(e)) => v.as_i128() == Some(*e),
        (Value::String(s), ConstValue::Str(e)) => s == e,
        (Value::Bytes(b), ConstValue::Bytes(e)) => b == e,
        _ => false,
    };
    if matches {
        Ok(())
    } else {
        Err(DecodeError::ConstMismatch {
            path: path.to_string(),
            expected: format!("{expected:?}"),
            found: format!("{decoded:?}"),
        })
    }
}

fn decode_kind(
    ctx: &mut EngineContext,
    schema: &Schema,
    kind: &FieldKind,
    reader: &mut BitReader<'_>,
    accum: &[(String, Value)],
    path: &str,
) -> Result<Value, DecodeError> {
    match kind {
        FieldKind::TypeRef { name } => decode_type(ctx, schema, name, reader, path),
        FieldKind::Array { items, kind: array_kind } => decode_array(ctx, schema, items, array_kind, reader, accum, path),
        FieldKind::Optional { presence_type, value_type } => decode_optional(ctx, schema, *presence_type, value_type, reader, accum, path),
        FieldKind::DiscriminatedUnion { discriminator, variants, byte_budget_field } => {
            decode_discriminated_union(ctx, schema, discriminator, variants, byte_budget_field.as_deref(), reader, accum, path)
        }
        FieldKind::Choice { variants } => decode_choice(ctx, schema, variants, reader, path),
        FieldKind::BackReference {
            storage,
            offset_mask,
            offset_from,
            target_type,
            endianness,
        } => decode_back_reference(ctx, schema, *storage, *offset_mask, *offset_from, target_type, *endianness, reader, path),
        _ => decode_kind_inner(schema.config.endianness, kind, reader, accum, path),
    }
}

fn decode_kind_inner(default_endian: Endianness, kind: &FieldKind, reader: &mut BitReader<'_>, accum: &[(String, Value)], path: &str) -> Result<Value, DecodeError> {
    match kind {
        FieldKind::Integer { int_type, endianness } => read_int(*int_type, endianness.unwrap_or(default_endian), reader, path),
        FieldKind::Float { float_type } => match float_type {
            crate::schema::ir::FloatType::F32 => Ok(Value::F32(reader.read_f32(path, default_endian)?)),
            crate::schema::ir::FloatType::F64 => Ok(Value::F64(reader.read_f64(path, default_endian)?)),
        },
        FieldKind::Bit { size } => Ok(Value::U64(reader.read_bits(path, *size)?)),
        FieldKind::Bitfield { size, fields } => decode_bitfield(*size, fields, reader, path),
        FieldKind::Varlength { encoding } => Ok(Value::U64(read_varlength(*encoding, reader, path)?)),
        FieldKind::String { kind, encoding, .. } => decode_string(default_endian, kind, *encoding, reader, accum, path),
        FieldKind::Padding { bits } => {
            let mut remaining = *bits;
            while remaining > 0 {
                let n = remaining.min(64) as u8;
                reader.read_bits(path, n)?;
                remaining -= n as u64;
            }
            Ok(Value::Absent)
        }
        _ => unreachable!("handled by decode_kind"),
    }
}

fn read_int(int_type: IntType, endian: Endianness, reader: &mut BitReader<'_>, path: &str) -> Result<Value, DecodeError> {
    use IntType::*;
    Ok(match int_type {
        U8 => Value::U8(reader.read_u8(path)?),
        I8 => Value::I8(reader.read_i8(path)?),
        U16 => Value::U16(reader.read_u16(path, endian)?),
        I16 => Value::I16(reader.read_i16(path, endian)?),
        U32 => Value::U32(reader.read_u32(path, endian)?),
        I32 => Value::I32(reader.read_i32(path, endian)?),
        U64 => Value::U64(reader.read_u64(path, endian)?),
        I64 => Value::I64(reader.read_i64(path, endian)?),
    })
}

fn int_value_from_u64(int_type: IntType, v: u64) -> Value {
    use IntType::*;
    match int_type {
        U8 => Value::U8(v as u8),
        I8 => Value::I8(v as i8),
        U16 => Value::U16(v as u16),
        I16 => Value::I16(v as i16),
        U32 => Value::U32(v as u32),
        I32 => Value::I32(v as i32),
        U64 => Value::U64(v),
        I64 => Value::I64(v as i64),
    }
}

fn read_varlength(encoding: VarlengthEncoding, reader: &mut BitReader<'_>, path: &str) -> Result<u64, DecodeError> {
    match encoding {
        VarlengthEncoding::Der => reader.read_der(path),
        VarlengthEncoding::Leb128 => reader.read_leb128(path),
        VarlengthEncoding::Ebml => reader.read_ebml(path),
        VarlengthEncoding::Vlq => reader.read_vlq(path),
    }
}

fn decode_bitfield(size: u16, fields: &[BitfieldField], reader: &mut BitReader<'_>, path: &str) -> Result<Value, DecodeError> {
    let mut subfields = Vec::new();
    let mut cursor = 0u16;
    for bf in fields {
        if bf.offset > cursor {
            reader.read_bits(path, (bf.offset - cursor) as u8)?;
        }
        let v = reader.read_bits(&format!("{path}.{}", bf.name), bf.size as u8)?;
        subfields.push((bf.name.clone(), Value::U64(v)));
        cursor = bf.offset + bf.size;
    }
    if cursor < size {
        reader.read_bits(path, (size - cursor) as u8)?;
    }
    Ok(Value::Composite(subfields))
}

fn decode_string(default_endian: Endianness, kind: &StringKind, encoding: StringEncoding, reader: &mut BitReader<'_>, accum: &[(String, Value)], path: &str) -> Result<Value, DecodeError> {
    let bytes = match kind {
        StringKind::Fixed { length } => reader.read_bytes(path, *length as usize)?,
        StringKind::LengthPrefixed { length_type } => {
            let len = read_int(*length_type, default_endian, reader, path)?
                .as_i128()
                .ok_or_else(|| DecodeError::NotByteAligned { path: path.to_string() })?;
            reader.read_bytes(path, len as usize)?
        }
        StringKind::NullTerminated => {
            let mut out = Vec::new();
            loop {
                let b = reader.read_u8(path)?;
                if b == 0 {
                    break;
                }
                out.push(b);
            }
            out
        }
        StringKind::FieldReferenced { length_field } => {
            let len = accum
                .iter()
                .find(|(n, _)| n == length_field)
                .and_then(|(_, v)| v.as_i128())
                .ok_or_else(|| DecodeError::NotByteAligned {
                    path: format!("{path}: length field {length_field:?} not yet decoded"),
                })?;
            reader.read_bytes(path, len as usize)?
        }
    };
    decode_string_bytes(bytes, encoding, path)
}

fn decode_string_bytes(bytes: Vec<u8>, encoding: StringEncoding, path: &str) -> Result<Value, DecodeError> {
    match encoding {
        StringEncoding::Utf8 => String::from_utf8(bytes)
            .map(Value::String)
            .map_err(|_| DecodeError::NotByteAligned {
                path: format!("{path}: invalid UTF-8"),
            }),
        StringEncoding::Ascii => {
            if bytes.iter().any(|b| !b.is_ascii()) {
                return Err(DecodeError::NotByteAligned {
                    path: format!("{path}: invalid ASCII"),
                });
            }
            Ok(Value::String(bytes.iter().map(|&b| b as char).collect()))
        }
    }
}

fn decode_array(
    ctx: &mut EngineContext,
    schema: &Schema,
    items: &FieldKind,
    array_kind: &ArrayKind,
    reader: &mut BitReader<'_>,
    accum: &[(String, Value)],
    path: &str,
) -> Result<Value, DecodeError> {
    let elements = match array_kind {
        ArrayKind::Fixed { length } => {
            let mut out = Vec::with_capacity(*length as usize);
            for idx in 0..*length {
                out.push(decode_kind(ctx, schema, items, reader, accum, &format!("{path}[{idx}]"))?);
            }
            out
        }
        ArrayKind::LengthPrefixed { length_type, length_encoding } => {
            let count = match length_encoding {
                Some(enc) => read_varlength(*enc, reader, path)?,
                None => read_int(*length_type, schema.config.endianness, reader, path)?
                    .as_i128()
                    .ok_or_else(|| DecodeError::NotByteAligned { path: path.to_string() })? as u64,
            };
            let mut out = Vec::with_capacity(count as usize);
            for idx in 0..count {
                out.push(decode_kind(ctx, schema, items, reader, accum, &format!("{path}[{idx}]"))?);
            }
            out
        }
        ArrayKind::ByteLengthPrefixed { length_type, length_encoding } => {
            let byte_len = match length_encoding {
                Some(enc) => read_varlength(*enc, reader, path)?,
                None => read_int(*length_type, schema.config.endianness, reader, path)?
                    .as_i128()
                    .ok_or_else(|| DecodeError::NotByteAligned { path: path.to_string() })? as u64,
            };
            let payload = reader.read_bytes(path, byte_len as usize)?;
            let mut sub = BitReader::with_bit_order(&payload, schema.config.bit_order);
            let mut out = Vec::new();
            let mut idx = 0usize;
            while !sub.is_eof() {
                out.push(decode_kind(ctx, schema, items, &mut sub, accum, &format!("{path}[{idx}]"))?);
                idx += 1;
            }
            out
        }
        ArrayKind::NullTerminated { terminal_variants } => {
            let mut out = Vec::new();
            let mut idx = 0usize;
            loop {
                if terminal_variants.is_empty() {
                    if reader.peek_u8(path)? == 0 {
                        reader.read_u8(path)?;
                        break;
                    }
                }
                let el = decode_kind(ctx, schema, items, reader, accum, &format!("{path}[{idx}]"))?;
                let is_terminal = el.variant_type().map(|t| terminal_variants.iter().any(|v| v == t)).unwrap_or(false);
                out.push(el);
                idx += 1;
                if is_terminal {
                    break;
                }
            }
            out
        }
        ArrayKind::FieldReferenced { length_field } => {
            let count = accum
                .iter()
                .find(|(n, _)| n == length_field)
                .and_then(|(_, v)| v.as_i128())
                .ok_or_else(|| DecodeError::NotByteAligned {
                    path: format!("{path}: length field {length_field:?} not yet decoded"),
                })?;
            let mut out = Vec::with_capacity(count as usize);
            for idx in 0..count {
                out.push(decode_kind(ctx, schema, items, reader, accum, &format!("{path}[{idx}]"))?);
            }
            out
        }
    };
    Ok(Value::Array(elements))
}

fn decode_optional(
    ctx: &mut EngineContext,
    schema: &Schema,
    presence_type: PresenceType,
    value_type: &FieldKind,
    reader: &mut BitReader<'_>,
    accum: &[(String, Value)],
    path: &str,
) -> Result<Value, DecodeError> {
    let present = match presence_type {
        PresenceType::U8 => reader.read_u8(path)? != 0,
        PresenceType::Bit => reader.read_bits(path, 1)? != 0,
    };
    if present {
        decode_kind(ctx, schema, value_type, reader, accum, path)
    } else {
        Ok(Value::Absent)
    }
}

fn decode_discriminated_union(
    ctx: &mut EngineContext,
    schema: &Schema,
    discriminator: &Discriminator,
    variants: &[crate::schema::ir::Variant],
    byte_budget_field: Option<&str>,
    reader: &mut BitReader<'_>,
    accum: &[(String, Value)],
    path: &str,
) -> Result<Value, DecodeError> {
    let discriminant = match discriminator {
        Discriminator::Peek { int_type, endianness } => {
            reader.push_position();
            let v = read_int(*int_type, endianness.unwrap_or(schema.config.endianness), reader, path)?;
            reader.pop_position();
            v.as_i128()
        }
        Discriminator::Field { path: p } => super::resolve::resolve_in_accum(p, accum, &ctx.parents).and_then(Value::as_i128),
    };

    let budget = byte_budget_field.and_then(|name| accum.iter().find(|(n, _)| n == name).and_then(|(_, v)| v.as_i128()).map(|v| v as u64));
    let start = reader.byte_offset();

    let mut chosen = None;
    for variant in variants {
        match &variant.when {
            Some(cond) => {
                let d = discriminant;
                if crate::schema::when::evaluate(cond, &|name| if name == "value" { d } else { None }).unwrap_or(false) {
                    chosen = Some(variant.type_name.as_str());
                    break;
                }
            }
            None => {
                chosen = Some(variant.type_name.as_str());
                break;
            }
        }
    }
    let type_name = chosen.ok_or_else(|| DecodeError::UnknownVariant {
        path: path.to_string(),
        discriminator: discriminant.map(|d| d.to_string()).unwrap_or_else(|| "?".to_string()),
    })?;

    ctx.parents.push(Value::Composite(accum.to_vec()));
    let inner = decode_type(ctx, schema, type_name, reader, path);
    ctx.parents.pop();
    let inner = inner?;

    if let Some(b) = budget {
        let consumed = reader.byte_offset() - start;
        if consumed > b {
            return Err(DecodeError::ByteBudgetExceeded {
                path: path.to_string(),
                budget: b,
                consumed,
            });
        }
    }

    Ok(Value::variant(type_name, inner))
}

fn decode_choice(ctx: &mut EngineContext, schema: &Schema, variants: &[crate::schema::ir::ChoiceVariant], reader: &mut BitReader<'_>, path: &str) -> Result<Value, DecodeError> {
    for variant in variants {
        if let Some(TypeDef::Composite(c)) = schema.type_def(&variant.type_name) {
            if let Some(first) = c.sequence.first() {
                if let (FieldKind::Integer { int_type, endianness }, Some(ConstValue::Int(expected))) = (&first.kind, &first.const_value) {
                    reader.push_position();
                    let peeked = read_int(*int_type, endianness.unwrap_or(schema.config.endianness), reader, path)?.as_i128();
                    reader.pop_position();
                    if peeked == Some(*expected) {
                        let inner = decode_type(ctx, schema, &variant.type_name, reader, path)?;
                        return Ok(Value::variant(variant.type_name.clone(), inner));
                    }
                }
            }
        }
    }
    Err(DecodeError::UnknownVariant {
        path: path.to_string(),
        discriminator: "choice tag matched no variant".to_string(),
    })
}

fn decode_back_reference(
    ctx: &mut EngineContext,
    schema: &Schema,
    storage: IntType,
    offset_mask: u64,
    offset_from: OffsetFrom,
    target_type: &str,
    endianness: Option<Endianness>,
    reader: &mut BitReader<'_>,
    path: &str,
) -> Result<Value, DecodeError> {
    let raw = read_int(storage, endianness.unwrap_or(schema.config.endianness), reader, path)?
        .as_i128()
        .ok_or_else(|| DecodeError::NotByteAligned { path: path.to_string() })? as u64;
    let offset = raw & offset_mask;
    let after_pointer = reader.byte_offset();
    let absolute_byte_offset = match offset_from {
        OffsetFrom::MessageStart => ctx.message_start + offset,
        OffsetFrom::CurrentPosition => after_pointer + offset,
    };
    if ctx.following_offsets.contains(&absolute_byte_offset) {
        return Err(DecodeError::CircularBackReference {
            path: path.to_string(),
            offset: absolute_byte_offset,
        });
    }
    // Dereference to confirm the pointer actually lands on a well-formed
    // `target_type`, but the field's own value stays the raw offset: that's
    // what the encoder's mirror `back_reference` write expects, so a decoded
    // value can be fed straight back into `encode` (spec.md §8 property 1).
    ctx.following_offsets.insert(absolute_byte_offset);
    reader.push_position();
    reader.seek(path, absolute_byte_offset * 8)?;
    ctx.parents.push(Value::Composite(Vec::new()));
    let result = decode_type(ctx, schema, target_type, reader, path);
    ctx.parents.pop();
    reader.pop_position();
    ctx.following_offsets.remove(&absolute_byte_offset);
    result?;
    Ok(int_value_from_u64(storage, offset))
}
