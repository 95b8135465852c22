// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Path and `when`-identifier resolution shared by the encoder and decoder.
//!
//! Encode already holds the full input value for the composite being
//! walked, so level-0 (plain sibling) lookups go straight to
//! `Value::field`. Decode builds its composite incrementally as bytes
//! arrive, so it resolves level-0 names against the fields decoded so far.

use crate::schema::path::Path;
use crate::value::Value;

fn ascend_into<'a>(path: &Path, parents: &'a [Value]) -> Option<&'a Value> {
    if path.root {
        return parents.first();
    }
    let idx = parents.len().checked_sub(path.ascend as usize)?;
    parents.get(idx)
}

fn walk_tail<'a>(mut cur: &'a Value, segments: &[String]) -> Option<&'a Value> {
    for seg in segments {
        cur = cur.field(seg)?;
    }
    Some(cur)
}

/// Resolve `path` against the composite `current` being encoded.
pub fn resolve_in_value<'a>(path: &Path, current: &'a Value, parents: &'a [Value]) -> Option<&'a Value> {
    let head = path.head();
    let base = if path.is_plain_sibling() {
        current.field(head)?
    } else {
        ascend_into(path, parents)?.field(head)?
    };
    walk_tail(base, &path.segments[1..])
}

/// Resolve `path` against the fields of the composite decoded so far.
pub fn resolve_in_accum<'a>(path: &Path, accum: &'a [(String, Value)], parents: &'a [Value]) -> Option<&'a Value> {
    let head = path.head();
    let base = if path.is_plain_sibling() {
        accum.iter().find(|(n, _)| n == head).map(|(_, v)| v)?
    } else {
        ascend_into(path, parents)?.field(head)?
    };
    walk_tail(base, &path.segments[1..])
}

/// Resolve a `when`/`conditional` identifier: the special name `value`
/// (the discriminator under evaluation) or a dotted sibling path.
pub fn resolve_ident_in_value(name: &str, discriminator: Option<i128>, current: &Value, parents: &[Value]) -> Option<i128> {
    if name == "value" {
        return discriminator;
    }
    let path = Path::parse(name).ok()?;
    resolve_in_value(&path, current, parents)?.as_i128()
}

pub fn resolve_ident_in_accum(name: &str, discriminator: Option<i128>, accum: &[(String, Value)], parents: &[Value]) -> Option<i128> {
    if name == "value" {
        return discriminator;
    }
    let path = Path::parse(name).ok()?;
    resolve_in_accum(&path, accum, parents)?.as_i128()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_plain_sibling_in_value() {
        let v = Value::composite([("a", Value::U8(1)), ("b", Value::U8(2))]);
        let path = Path::parse("a").unwrap();
        assert_eq!(resolve_in_value(&path, &v, &[]), Some(&Value::U8(1)));
    }

    #[test]
    fn resolves_parent_via_ascend() {
        let parent = Value::composite([("x", Value::U16(9))]);
        let path = Path::parse("../x").unwrap();
        assert_eq!(resolve_in_value(&path, &Value::Absent, &[parent]), Some(&Value::U16(9)));
    }

    #[test]
    fn resolves_discriminator_identifier() {
        assert_eq!(resolve_ident_in_value("value", Some(7), &Value::Absent, &[]), Some(7));
    }
}
