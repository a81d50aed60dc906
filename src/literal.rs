// SPDX-License-Identifier: AGPL-3.0-or-later

//! Lexical helpers over JavaScript/TypeScript source text: string and
//! template literals, balanced delimiters and top-level object-literal
//! entries. Everything is byte-offset based and string/comment aware.

use std::collections::BTreeSet;

/// Index just past the string or template literal opening at `start`
fn skip_literal(bytes: &[u8], start: usize) -> usize {
    let quote = bytes[start];
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'$' if quote == b'`' && bytes.get(i + 1) == Some(&b'{') => {
                i = close_of(bytes, i + 1).unwrap_or(bytes.len());
            }
            b if b == quote => return i + 1,
            _ => i += 1,
        }
    }
    bytes.len()
}

/// Index just past a comment starting at `i`, if one starts there
fn skip_comment(bytes: &[u8], i: usize) -> Option<usize> {
    if bytes[i] != b'/' {
        return None;
    }
    match bytes.get(i + 1) {
        Some(b'/') => Some(
            bytes[i..]
                .iter()
                .position(|&b| b == b'\n')
                .map(|n| i + n)
                .unwrap_or(bytes.len()),
        ),
        Some(b'*') => Some(
            bytes[i + 2..]
                .windows(2)
                .position(|w| w == b"*/")
                .map(|n| i + 2 + n + 2)
                .unwrap_or(bytes.len()),
        ),
        _ => None,
    }
}

fn close_of(bytes: &[u8], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut i = open;
    while i < bytes.len() {
        match bytes[i] {
            b'"' | b'\'' | b'`' => {
                i = skip_literal(bytes, i);
                continue;
            }
            b'/' => {
                if let Some(next) = skip_comment(bytes, i) {
                    i = next;
                    continue;
                }
            }
            b'{' | b'[' | b'(' => depth += 1,
            b'}' | b']' | b')' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

/// Index just past the delimiter matching the `{`, `[` or `(` at `open`.
///
/// `None` when the text ends before the group is closed.
pub fn balanced_end(text: &str, open: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    match bytes.get(open) {
        Some(b'{' | b'[' | b'(') => close_of(bytes, open),
        _ => None,
    }
}

/// Skip whitespace and comments from `i`
pub fn skip_trivia(text: &str, mut i: usize) -> usize {
    let bytes = text.as_bytes();
    while i < bytes.len() {
        if bytes[i].is_ascii_whitespace() {
            i += 1;
        } else if let Some(next) = skip_comment(bytes, i) {
            i = next;
        } else {
            break;
        }
    }
    i
}

/// Read the quoted or template literal at `start`: its raw content and the index past it
pub fn read_quoted(text: &str, start: usize) -> Option<(String, usize)> {
    let bytes = text.as_bytes();
    match bytes.get(start) {
        Some(b'"' | b'\'' | b'`') => {}
        _ => return None,
    }
    let end = skip_literal(bytes, start);
    if end > bytes.len() || end < start + 2 || bytes[end - 1] != bytes[start] {
        return None;
    }
    Some((text[start + 1..end - 1].to_string(), end))
}

/// Split the inside of a delimited group at its top-level commas
pub fn split_top_level(inner: &str) -> Vec<&str> {
    let bytes = inner.as_bytes();
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'"' | b'\'' | b'`' => {
                i = skip_literal(bytes, i);
                continue;
            }
            b'/' => {
                if let Some(next) = skip_comment(bytes, i) {
                    i = next;
                    continue;
                }
            }
            b'{' | b'[' | b'(' => depth += 1,
            b'}' | b']' | b')' => depth = depth.saturating_sub(1),
            b',' if depth == 0 => {
                parts.push(&inner[start..i]);
                start = i + 1;
            }
            _ => {}
        }
        i += 1;
    }
    parts.push(&inner[start..]);
    parts
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

/// Leading identifier of `text`, if it starts with one
pub fn leading_identifier(text: &str) -> Option<&str> {
    let end = text.find(|c: char| !is_ident_char(c)).unwrap_or(text.len());
    let ident = &text[..end];
    match ident.chars().next() {
        Some(c) if !c.is_ascii_digit() => Some(ident),
        _ => None,
    }
}

/// Keys of one object literal, with spreads left for the caller to resolve
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectShape {
    pub keys: BTreeSet<String>,
    /// Identifiers spread into the literal (`...base`)
    pub spreads: Vec<String>,
    /// Entries whose key cannot be known statically
    pub unresolved: Vec<String>,
}

/// Tokenize the object literal spanning `literal` (braces included or not)
pub fn object_shape(literal: &str) -> ObjectShape {
    let trimmed = literal.trim();
    let inner = trimmed
        .strip_prefix('{')
        .and_then(|s| s.strip_suffix('}'))
        .unwrap_or(trimmed);

    let mut shape = ObjectShape::default();
    for raw in split_top_level(inner) {
        let start = skip_trivia(raw, 0);
        let entry = raw[start..].trim_end();
        if entry.is_empty() {
            continue;
        }

        if let Some(rest) = entry.strip_prefix("...") {
            let rest = rest.trim_start();
            match leading_identifier(rest) {
                Some(ident) if ident.len() == rest.trim_end().len() => {
                    shape.spreads.push(ident.to_string())
                }
                _ => shape.unresolved.push(entry.to_string()),
            }
            continue;
        }

        if entry.starts_with('"') || entry.starts_with('\'') {
            match read_quoted(entry, 0) {
                Some((key, _)) => {
                    shape.keys.insert(key);
                }
                None => shape.unresolved.push(entry.to_string()),
            }
            continue;
        }

        if entry.starts_with('[') {
            shape.unresolved.push(entry.to_string());
            continue;
        }

        let mut key_text = entry;
        for modifier in ["async ", "get ", "set ", "*"] {
            if let Some(rest) = key_text.strip_prefix(modifier) {
                let rest = rest.trim_start();
                if rest.starts_with(|c: char| is_ident_char(c) || c == '"' || c == '\'') {
                    key_text = rest;
                }
            }
        }
        match leading_identifier(key_text) {
            Some(ident) => {
                shape.keys.insert(ident.to_string());
            }
            None => shape.unresolved.push(entry.to_string()),
        }
    }
    shape
}
