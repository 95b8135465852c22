// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Path syntax for computed-field targets (spec.md §3.4): `name`, `a.b`,
//! `../name`, `../../name`, `_root.name`, and the array-selector suffixes
//! `[first<T>]`, `[last<T>]`, `[corresponding<T>]`.

use super::ir::SelectorKind;

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Path {
    /// Number of leading `../` ascents.
    pub ascend: u32,
    /// Set for a leading `_root.` prefix.
    pub root: bool,
    /// Dotted segments, e.g. `["status", "flags"]` for a bitfield subfield
    /// `status.flags`, or a single segment for a plain sibling reference.
    pub segments: Vec<String>,
}

impl Path {
    pub fn parse(raw: &str) -> Result<Self, String> {
        let mut s = raw;
        let mut ascend = 0u32;
        let mut root = false;

        loop {
            if let Some(rest) = s.strip_prefix("../") {
                ascend += 1;
                s = rest;
            } else {
                break;
            }
        }
        if ascend == 0 {
            if let Some(rest) = s.strip_prefix("_root.") {
                root = true;
                s = rest;
            }
        }
        if s.is_empty() {
            return Err(format!("path {raw:?} has no field segment"));
        }
        let segments: Vec<String> = s.split('.').map(str::to_string).collect();
        if segments.iter().any(String::is_empty) {
            return Err(format!("path {raw:?} has an empty segment"));
        }
        Ok(Self { ascend, root, segments })
    }

    pub fn head(&self) -> &str {
        &self.segments[0]
    }

    pub fn is_plain_sibling(&self) -> bool {
        self.ascend == 0 && !self.root
    }
}

/// Parses an array-selector suffix such as `arr[first<Label>]`.
pub fn parse_selector(raw: &str) -> Result<(String, SelectorKind, String), String> {
    let open = raw.find('[').ok_or_else(|| format!("{raw:?} is not a selector expression"))?;
    if !raw.ends_with(']') {
        return Err(format!("{raw:?} is missing a closing ']'"));
    }
    let array = raw[..open].to_string();
    let inner = &raw[open + 1..raw.len() - 1];
    let lt = inner.find('<').ok_or_else(|| format!("{raw:?} is missing '<T>'"))?;
    if !inner.ends_with('>') {
        return Err(format!("{raw:?} is missing a closing '>'"));
    }
    let kind = match &inner[..lt] {
        "first" => SelectorKind::First,
        "last" => SelectorKind::Last,
        "corresponding" => SelectorKind::Corresponding,
        other => return Err(format!("unknown selector {other:?}")),
    };
    let element_type = inner[lt + 1..inner.len() - 1].to_string();
    if array.is_empty() || element_type.is_empty() {
        return Err(format!("{raw:?} is malformed"));
    }
    Ok((array, kind, element_type))
}
