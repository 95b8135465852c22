// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The value tree fed to [`crate::encode`] and produced by [`crate::decode`].
//!
//! Mirrors spec.md §3.5: a recursive sum of primitives, named composites,
//! ordered sequences, tagged variants, and an explicit absent marker for
//! unset optionals.

use std::collections::BTreeMap;

/// A decoded or to-be-encoded value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    String(String),
    /// Raw byte content, used for `array<uint8>` and varlength payloads.
    Bytes(Vec<u8>),
    /// Named fields of a composite type, in declaration order.
    Composite(Vec<(String, Value)>),
    /// Ordered elements of an array.
    Array(Vec<Value>),
    /// A discriminated-union or choice element: the chosen type name plus its fields.
    Variant { type_name: String, fields: Box<Value> },
    /// An optional field with no value present.
    Absent,
}

impl Value {
    pub fn composite<I, K>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        Self::Composite(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn variant(type_name: impl Into<String>, fields: Value) -> Self {
        Self::Variant {
            type_name: type_name.into(),
            fields: Box::new(fields),
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }

    /// Look up a field by name if this is a composite.
    pub fn field(&self, name: &str) -> Option<&Value> {
        match self {
            Self::Composite(fields) => fields.iter().find(|(n, _)| n == name).map(|(_, v)| v),
            Self::Variant { fields, .. } => fields.field(name),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn variant_type(&self) -> Option<&str> {
        match self {
            Self::Variant { type_name, .. } => Some(type_name),
            _ => None,
        }
    }

    /// The payload carried by a [`Value::Variant`], i.e. the value to encode
    /// under the chosen type name.
    pub fn variant_fields(&self) -> Option<&Value> {
        match self {
            Self::Variant { fields, .. } => Some(fields),
            _ => None,
        }
    }

    /// Widen any integer variant to an `i128`, for use in `when` predicate
    /// evaluation and discriminator comparisons.
    pub fn as_i128(&self) -> Option<i128> {
        match self {
            Self::Bool(b) => Some(i128::from(*b)),
            Self::U8(v) => Some(i128::from(*v)),
            Self::U16(v) => Some(i128::from(*v)),
            Self::U32(v) => Some(i128::from(*v)),
            Self::U64(v) => Some(i128::from(*v)),
            Self::I8(v) => Some(i128::from(*v)),
            Self::I16(v) => Some(i128::from(*v)),
            Self::I32(v) => Some(i128::from(*v)),
            Self::I64(v) => Some(i128::from(*v)),
            _ => None,
        }
    }
}

/// A flattened view of a composite's fields, usable as a lookup map during
/// path resolution (`schema::path`) without cloning the value tree.
pub fn composite_field_map(value: &Value) -> BTreeMap<&str, &Value> {
    match value {
        Value::Composite(fields) => fields.iter().map(|(k, v)| (k.as_str(), v)).collect(),
        _ => BTreeMap::new(),
    }
}
