// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Translates a parsed JSON-like document into the schema IR (spec.md §6,
//! `loadSchema`). Parsing the document text itself (including JSON5) is a
//! collaborator's job; this module only walks an already-parsed
//! [`serde_json::Value`].

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use super::ir::*;
use super::path::{parse_selector, Path};
use super::when;
use crate::bitstream::{BitOrder, Endianness};
use crate::error::SchemaError;

type Res<T> = Result<T, SchemaError>;

fn err(path: &str, message: impl Into<String>) -> SchemaError {
    SchemaError::new(path, message)
}

fn as_obj<'a>(v: &'a Value, path: &str) -> Res<&'a Map<String, Value>> {
    v.as_object().ok_or_else(|| err(path, "expected a JSON object"))
}

fn req<'a>(o: &'a Map<String, Value>, key: &str, path: &str) -> Res<&'a Value> {
    o.get(key).ok_or_else(|| err(path, format!("missing required property {key:?}")))
}

fn req_str<'a>(o: &'a Map<String, Value>, key: &str, path: &str) -> Res<&'a str> {
    req(o, key, path)?.as_str().ok_or_else(|| err(path, format!("property {key:?} must be a string")))
}

fn opt_str<'a>(o: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    o.get(key).and_then(Value::as_str)
}

fn req_u64(o: &Map<String, Value>, key: &str, path: &str) -> Res<u64> {
    req(o, key, path)?.as_u64().ok_or_else(|| err(path, format!("property {key:?} must be a non-negative integer")))
}

fn opt_u64(o: &Map<String, Value>, key: &str) -> Option<u64> {
    o.get(key).and_then(Value::as_u64)
}

fn req_arr<'a>(o: &'a Map<String, Value>, key: &str, path: &str) -> Res<&'a Vec<Value>> {
    req(o, key, path)?.as_array().ok_or_else(|| err(path, format!("property {key:?} must be an array")))
}

pub fn load_schema(doc: &Value) -> Res<Schema> {
    let root = as_obj(doc, "$")?;

    let config = match root.get("config") {
        Some(v) => load_config(v)?,
        None => Config::default(),
    };

    let types_obj = root.get("types").and_then(Value::as_object).ok_or_else(|| err("$.types", "missing required property \"types\""))?;
    let mut types = BTreeMap::new();
    for (name, def) in types_obj {
        if name.is_empty() {
            return Err(err("$.types", "type name must not be empty"));
        }
        let path = format!("types.{name}");
        types.insert(name.clone(), load_type_def(def, &path)?);
    }

    let protocol = match root.get("protocol") {
        Some(v) => Some(load_protocol(v)?),
        None => None,
    };

    Ok(Schema { config, types, protocol })
}

fn load_config(v: &Value) -> Res<Config> {
    let o = as_obj(v, "$.config")?;
    let endianness = match opt_str(o, "endianness") {
        Some("little_endian") => Endianness::Little,
        Some("big_endian") | None => Endianness::Big,
        Some(other) => return Err(err("$.config.endianness", format!("unknown endianness {other:?}"))),
    };
    let bit_order = match opt_str(o, "bit_order") {
        Some("lsb_first") => BitOrder::LsbFirst,
        Some("msb_first") | None => BitOrder::MsbFirst,
        Some(other) => return Err(err("$.config.bit_order", format!("unknown bit_order {other:?}"))),
    };
    Ok(Config { endianness, bit_order })
}

fn load_protocol(v: &Value) -> Res<Protocol> {
    let o = as_obj(v, "$.protocol")?;
    let name = req_str(o, "name", "$.protocol.name")?.to_string();
    let header_type = req_str(o, "header", "$.protocol.header")?.to_string();
    let size_field = opt_str(o, "size_field").map(str::to_string);
    let discriminator_field_path = opt_str(o, "discriminator_field_path").map(str::to_string);
    let version = opt_str(o, "version").map(str::to_string);

    let mut messages = Vec::new();
    let mut seen_codes = std::collections::BTreeSet::new();
    for (i, m) in req_arr(o, "messages", "$.protocol.messages")?.iter().enumerate() {
        let path = format!("$.protocol.messages[{i}]");
        let mo = as_obj(m, &path)?;
        let raw_code = req(mo, "code", &path)?;
        let code_num = raw_code.as_u64().ok_or_else(|| err(&path, "\"code\" must be a non-negative integer"))?;
        let code = normalize_message_code(code_num);
        if !seen_codes.insert(code.clone()) {
            return Err(err(&path, format!("duplicate message code {code}")));
        }
        let name = req_str(mo, "name", &path)?.to_string();
        let direction = match req_str(mo, "direction", &path)? {
            "client_to_server" => Direction::ClientToServer,
            "server_to_client" => Direction::ServerToClient,
            "bidirectional" => Direction::Bidirectional,
            other => return Err(err(&path, format!("unknown direction {other:?}"))),
        };
        let payload_type = req_str(mo, "payload_type", &path)?.to_string();
        messages.push(Message { code, name, direction, payload_type });
    }

    Ok(Protocol { name, version, header_type, size_field, discriminator_field_path, messages })
}

/// `0xNN` uppercase, even hex-digit length.
fn normalize_message_code(value: u64) -> String {
    let hex = format!("{value:X}");
    let padded = if hex.len() % 2 == 1 { format!("0{hex}") } else { hex };
    format!("0x{padded}")
}

fn load_type_def(v: &Value, path: &str) -> Res<TypeDef> {
    let o = as_obj(v, path)?;
    if o.contains_key("sequence") {
        let mut seen = std::collections::BTreeSet::new();
        let mut sequence = Vec::new();
        for (i, f) in req_arr(o, "sequence", path)?.iter().enumerate() {
            let fpath = format!("{path}.sequence[{i}]");
            let field = load_field(f, &fpath)?;
            if !seen.insert(field.name.clone()) {
                return Err(err(&fpath, format!("duplicate field name {:?}", field.name)));
            }
            if field.name.ends_with("ArrayIter") {
                return Err(err(&fpath, "field name uses the reserved \"ArrayIter\" suffix"));
            }
            sequence.push(field);
        }
        let mut instances = Vec::new();
        if let Some(raw) = o.get("instances").and_then(Value::as_array) {
            for (i, inst) in raw.iter().enumerate() {
                let ipath = format!("{path}.instances[{i}]");
                let io = as_obj(inst, &ipath)?;
                let name = req_str(io, "name", &ipath)?.to_string();
                if !seen.insert(name.clone()) {
                    return Err(err(&ipath, format!("duplicate field name {name:?}")));
                }
                let offset = req_u64(io, "offset", &ipath)?;
                let field = load_field(inst, &ipath)?;
                instances.push(Instance { name, field, offset });
            }
        }
        Ok(TypeDef::Composite(Composite { sequence, instances }))
    } else {
        Ok(TypeDef::Alias(load_field_kind(o, path)?))
    }
}

fn load_field(v: &Value, path: &str) -> Res<Field> {
    let o = as_obj(v, path)?;
    let name = req_str(o, "name", path)?.to_string();
    let kind = load_field_kind(o, path)?;
    let const_value = match o.get("const") {
        Some(Value::Number(n)) => Some(ConstValue::Int(n.as_i64().map(i128::from).ok_or_else(|| err(path, "unsupported const number"))?)),
        Some(Value::String(s)) => Some(ConstValue::Str(s.clone())),
        Some(Value::Array(items)) => {
            let mut bytes = Vec::with_capacity(items.len());
            for it in items {
                bytes.push(it.as_u64().ok_or_else(|| err(path, "const byte array must contain integers"))? as u8);
            }
            Some(ConstValue::Bytes(bytes))
        }
        Some(_) => return Err(err(path, "unsupported const value")),
        None => None,
    };
    let conditional = match opt_str(o, "conditional") {
        Some(expr) => Some(when::parse(expr).map_err(|e| err(path, format!("invalid conditional: {e}")))?),
        None => None,
    };
    let computed = match o.get("computed") {
        Some(c) => Some(load_computed(c, path)?),
        None => None,
    };
    if const_value.is_some() && computed.is_some() {
        return Err(err(path, "a field cannot be both const and computed"));
    }
    Ok(Field { name, kind, const_value, conditional, computed })
}

fn int_type(tag: &str) -> Option<IntType> {
    Some(match tag {
        "uint8" => IntType::U8,
        "uint16" => IntType::U16,
        "uint32" => IntType::U32,
        "uint64" => IntType::U64,
        "int8" => IntType::I8,
        "int16" => IntType::I16,
        "int32" => IntType::I32,
        "int64" => IntType::I64,
        _ => return None,
    })
}

fn load_endianness(o: &Map<String, Value>, path: &str) -> Res<Option<Endianness>> {
    match opt_str(o, "endianness") {
        Some("little_endian") => Ok(Some(Endianness::Little)),
        Some("big_endian") => Ok(Some(Endianness::Big)),
        Some(other) => Err(err(path, format!("unknown endianness {other:?}"))),
        None => Ok(None),
    }
}

fn load_varlength_encoding(tag: &str, path: &str) -> Res<VarlengthEncoding> {
    Ok(match tag {
        "der" => VarlengthEncoding::Der,
        "leb128" => VarlengthEncoding::Leb128,
        "ebml" => VarlengthEncoding::Ebml,
        "vlq" => VarlengthEncoding::Vlq,
        other => return Err(err(path, format!("unknown varlength encoding {other:?}"))),
    })
}

fn load_field_kind(o: &Map<String, Value>, path: &str) -> Res<FieldKind> {
    let tag = req_str(o, "type", path)?;

    if let Some(int_type) = int_type(tag) {
        return Ok(FieldKind::Integer { int_type, endianness: load_endianness(o, path)? });
    }

    Ok(match tag {
        "float32" => FieldKind::Float { float_type: FloatType::F32 },
        "float64" => FieldKind::Float { float_type: FloatType::F64 },
        "bit" => FieldKind::Bit { size: req_u64(o, "size", path)? as u8 },
        "bitfield" => {
            let size = req_u64(o, "size", path)? as u16;
            let mut fields = Vec::new();
            for (i, bf) in req_arr(o, "fields", path)?.iter().enumerate() {
                let bpath = format!("{path}.fields[{i}]");
                let bo = as_obj(bf, &bpath)?;
                fields.push(BitfieldField {
                    name: req_str(bo, "name", &bpath)?.to_string(),
                    offset: req_u64(bo, "offset", &bpath)? as u16,
                    size: req_u64(bo, "size", &bpath)? as u16,
                });
            }
            FieldKind::Bitfield { size, fields }
        }
        "varlength" => {
            let enc = req_str(o, "encoding", path)?;
            FieldKind::Varlength { encoding: load_varlength_encoding(enc, path)? }
        }
        "string" => {
            let encoding = match req_str(o, "encoding", path)? {
                "utf8" => StringEncoding::Utf8,
                "ascii" => StringEncoding::Ascii,
                other => return Err(err(path, format!("unknown string encoding {other:?}"))),
            };
            let kind = match req_str(o, "kind", path)? {
                "fixed" => StringKind::Fixed { length: req_u64(o, "length", path)? },
                "length_prefixed" => StringKind::LengthPrefixed {
                    length_type: int_type(req_str(o, "length_type", path)?)
                        .ok_or_else(|| err(path, "length_type must be an unsigned integer type"))?,
                },
                "null_terminated" => StringKind::NullTerminated,
                "field_referenced" => StringKind::FieldReferenced { length_field: req_str(o, "length_field", path)?.to_string() },
                other => return Err(err(path, format!("unknown string kind {other:?}"))),
            };
            let const_str = opt_str(o, "const").map(str::to_string);
            FieldKind::String { kind, encoding, const_str }
        }
        "array" => {
            let items_path = format!("{path}.items");
            let items_obj = req(o, "items", path)?;
            let items_obj = as_obj(items_obj, &items_path)?;
            let items = Box::new(load_field_kind(items_obj, &items_path)?);
            let length_encoding = |o: &Map<String, Value>| -> Res<Option<VarlengthEncoding>> {
                match opt_str(o, "length_encoding") {
                    Some(tag) => Ok(Some(load_varlength_encoding(tag, path)?)),
                    None => Ok(None),
                }
            };
            let kind = match req_str(o, "kind", path)? {
                "fixed" => ArrayKind::Fixed { length: req_u64(o, "length", path)? },
                "length_prefixed" => ArrayKind::LengthPrefixed {
                    length_type: int_type(req_str(o, "length_type", path)?)
                        .ok_or_else(|| err(path, "length_type must be an unsigned integer type"))?,
                    length_encoding: length_encoding(o)?,
                },
                "byte_length_prefixed" => ArrayKind::ByteLengthPrefixed {
                    length_type: int_type(req_str(o, "length_type", path)?)
                        .ok_or_else(|| err(path, "length_type must be an unsigned integer type"))?,
                    length_encoding: length_encoding(o)?,
                },
                "null_terminated" => {
                    let terminal_variants = o
                        .get("terminal_variants")
                        .and_then(Value::as_array)
                        .map(|arr| arr.iter().filter_map(Value::as_str).map(str::to_string).collect())
                        .unwrap_or_default();
                    ArrayKind::NullTerminated { terminal_variants }
                }
                "field_referenced" => ArrayKind::FieldReferenced { length_field: req_str(o, "length_field", path)?.to_string() },
                other => return Err(err(path, format!("unknown array kind {other:?}"))),
            };
            FieldKind::Array { items, kind }
        }
        "optional" => {
            let presence_type = match opt_str(o, "presence_type") {
                Some("bit") => PresenceType::Bit,
                Some("uint8") | None => PresenceType::U8,
                Some(other) => return Err(err(path, format!("unknown presence_type {other:?}"))),
            };
            let value_path = format!("{path}.value_type");
            let value_obj = req(o, "value_type", path)?;
            let value_obj = as_obj(value_obj, &value_path)?;
            let value_type = Box::new(load_field_kind(value_obj, &value_path)?);
            FieldKind::Optional { presence_type, value_type }
        }
        "discriminated_union" => {
            let disc_path = format!("{path}.discriminator");
            let disc_obj = as_obj(req(o, "discriminator", path)?, &disc_path)?;
            let discriminator = if let Some(peek_tag) = opt_str(disc_obj, "peek") {
                let int_type = int_type(peek_tag).ok_or_else(|| err(&disc_path, "peek must name uint8/uint16/uint32"))?;
                Discriminator::Peek { int_type, endianness: load_endianness(disc_obj, &disc_path)? }
            } else if let Some(field_path) = opt_str(disc_obj, "field") {
                Discriminator::Field {
                    path: Path::parse(field_path).map_err(|e| err(&disc_path, e))?,
                }
            } else {
                return Err(err(&disc_path, "discriminator must set \"peek\" or \"field\""));
            };
            let mut variants = Vec::new();
            for (i, var) in req_arr(o, "variants", path)?.iter().enumerate() {
                let vpath = format!("{path}.variants[{i}]");
                let vo = as_obj(var, &vpath)?;
                let type_name = req_str(vo, "type", &vpath)?.to_string();
                let when = match opt_str(vo, "when") {
                    Some(src) => Some(when::parse(src).map_err(|e| err(&vpath, format!("invalid when: {e}")))?),
                    None => None,
                };
                variants.push(Variant { type_name, when });
            }
            let byte_budget_field = match o.get("byte_budget") {
                Some(bb) => {
                    let bbo = as_obj(bb, &format!("{path}.byte_budget"))?;
                    Some(req_str(bbo, "field", &format!("{path}.byte_budget"))?.to_string())
                }
                None => None,
            };
            FieldKind::DiscriminatedUnion { discriminator, variants, byte_budget_field }
        }
        "back_reference" => {
            let storage = int_type(req_str(o, "storage", path)?).ok_or_else(|| err(path, "storage must be uint8/uint16/uint32"))?;
            let mask_str = req_str(o, "offset_mask", path)?;
            let hex = mask_str.strip_prefix("0x").or_else(|| mask_str.strip_prefix("0X")).unwrap_or(mask_str);
            let offset_mask = u64::from_str_radix(hex, 16).map_err(|e| err(path, format!("invalid offset_mask: {e}")))?;
            let offset_from = match req_str(o, "offset_from", path)? {
                "message_start" => OffsetFrom::MessageStart,
                "current_position" => OffsetFrom::CurrentPosition,
                other => return Err(err(path, format!("unknown offset_from {other:?}"))),
            };
            let target_type = req_str(o, "target_type", path)?.to_string();
            let endianness = load_endianness(o, path)?;
            FieldKind::BackReference { storage, offset_mask, offset_from, target_type, endianness }
        }
        "choice" => {
            let mut variants = Vec::new();
            for v in req_arr(o, "variants", path)? {
                let type_name = v
                    .as_str()
                    .map(str::to_string)
                    .or_else(|| v.as_object().and_then(|o| req_str(o, "type", path).ok().map(str::to_string)))
                    .ok_or_else(|| err(path, "choice variant must be a type name or {type: name}"))?;
                variants.push(ChoiceVariant { type_name });
            }
            FieldKind::Choice { variants }
        }
        "padding" => FieldKind::Padding { bits: req_u64(o, "bits", path)? },
        other => FieldKind::TypeRef { name: other.to_string() },
    })
}

fn load_computed(v: &Value, path: &str) -> Res<Computed> {
    let o = as_obj(v, path)?;
    Ok(match req_str(o, "kind", path)? {
        "length_of" => {
            let target = if let Some(faf) = opt_str(o, "from_after_field") {
                LengthOfTarget::FromAfterField(faf.to_string())
            } else {
                let target_str = req_str(o, "target", path)?;
                LengthOfTarget::Path(Path::parse(target_str).map_err(|e| err(path, e))?)
            };
            let encoding = match opt_str(o, "encoding") {
                Some("utf8") => Some(StringEncoding::Utf8),
                Some("ascii") => Some(StringEncoding::Ascii),
                Some(other) => return Err(err(path, format!("unknown encoding {other:?}"))),
                None => None,
            };
            let offset = o.get("offset").and_then(Value::as_i64);
            Computed::LengthOf { target, encoding, offset }
        }
        "crc32_of" => Computed::Crc32Of {
            target: Path::parse(req_str(o, "target", path)?).map_err(|e| err(path, e))?,
        },
        "position_of" => {
            let target_str = req_str(o, "target", path)?;
            let target = if target_str.contains('[') {
                let (array, selector, element_type) = parse_selector(target_str).map_err(|e| err(path, e))?;
                PositionTarget::ArraySelector { array, selector, element_type }
            } else {
                PositionTarget::Path(Path::parse(target_str).map_err(|e| err(path, e))?)
            };
            Computed::PositionOf { target }
        }
        "sum_of_sizes" => {
            let mut targets = Vec::new();
            for t in req_arr(o, "targets", path)? {
                let s = t.as_str().ok_or_else(|| err(path, "targets must be strings"))?;
                targets.push(Path::parse(s).map_err(|e| err(path, e))?);
            }
            Computed::SumOfSizes { targets }
        }
        "sum_of_type_sizes" => Computed::SumOfTypeSizes {
            target: Path::parse(req_str(o, "target", path)?).map_err(|e| err(path, e))?,
            element_type: req_str(o, "element_type", path)?.to_string(),
        },
        other => return Err(err(path, format!("unknown computed kind {other:?}"))),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn loads_scalar_scenario() {
        let doc = json!({
            "types": { "T": { "sequence": [ { "name": "v", "type": "uint32" } ] } },
            "config": { "endianness": "little_endian" }
        });
        let schema = load_schema(&doc).unwrap();
        assert!(matches!(schema.config.endianness, Endianness::Little));
        let TypeDef::Composite(c) = schema.type_def("T").unwrap() else { panic!("expected composite") };
        assert_eq!(c.sequence.len(), 1);
        assert_eq!(c.sequence[0].name, "v");
    }

    #[test]
    fn rejects_duplicate_field_names() {
        let doc = json!({
            "types": { "T": { "sequence": [
                { "name": "v", "type": "uint8" },
                { "name": "v", "type": "uint8" }
            ] } }
        });
        assert!(load_schema(&doc).is_err());
    }

    #[test]
    fn normalizes_message_code() {
        assert_eq!(normalize_message_code(7), "0x07");
        assert_eq!(normalize_message_code(255), "0xFF");
    }

    #[test]
    fn loads_discriminated_union_with_fallback() {
        let doc = json!({
            "types": {
                "Label": { "sequence": [] },
                "U": {
                    "type": "discriminated_union",
                    "discriminator": { "peek": "uint8" },
                    "variants": [
                        { "type": "Label", "when": "value < 0xC0" },
                        { "type": "Label" }
                    ]
                }
            }
        });
        let schema = load_schema(&doc).unwrap();
        let TypeDef::Alias(FieldKind::DiscriminatedUnion { variants, .. }) = schema.type_def("U").unwrap() else {
            panic!("expected discriminated union alias")
        };
        assert!(variants[1].when.is_none());
    }
}
