// SPDX-License-Identifier: AGPL-3.0-or-later

//! Top-level projection field extraction.
//!
//! A bracket-depth scanner: it finds the first `{`, then walks the text
//! tracking nested `{`/`[`/`(` and string literals, and only looks at what
//! sits directly at depth one. It never needs the query to be valid.

use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq)]
enum Piece {
    Ident(String),
    Str(String),
    Colon,
    Arrow,
    Spread,
    /// A nested group opened with the given bracket
    Group(char),
    Other,
}

/// Extract the sorted, deduplicated top-level projection fields of a query
pub fn extract_fields(query: &str) -> Vec<String> {
    let mut fields = BTreeSet::new();
    for entry in top_level_entries(query) {
        if let Some(field) = entry_field(&entry) {
            fields.insert(field);
        }
    }
    fields.into_iter().collect()
}

fn top_level_entries(query: &str) -> Vec<Vec<Piece>> {
    let chars: Vec<char> = query.chars().collect();
    let Some(open) = first_projection_brace(&chars) else {
        return Vec::new();
    };

    let mut entries = Vec::new();
    let mut current = Vec::new();
    let mut depth = 1usize;
    let mut i = open + 1;

    while i < chars.len() {
        let c = chars[i];

        if c == '"' || c == '\'' {
            let (literal, next) = read_string(&chars, i);
            if depth == 1 {
                current.push(Piece::Str(literal));
            }
            i = next;
            continue;
        }
        if c == '/' && chars.get(i + 1) == Some(&'/') {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
            continue;
        }

        match c {
            '{' | '[' | '(' => {
                if depth == 1 {
                    current.push(Piece::Group(c));
                }
                depth += 1;
                i += 1;
            }
            '}' | ']' | ')' => {
                depth = depth.saturating_sub(1);
                i += 1;
                if depth == 0 {
                    break;
                }
            }
            _ if depth > 1 => i += 1,
            ',' => {
                entries.push(std::mem::take(&mut current));
                i += 1;
            }
            ':' => {
                current.push(Piece::Colon);
                i += 1;
            }
            '=' if chars.get(i + 1) == Some(&'>') => {
                current.push(Piece::Arrow);
                i += 2;
            }
            '.' if chars.get(i + 1) == Some(&'.') && chars.get(i + 2) == Some(&'.') => {
                current.push(Piece::Spread);
                i += 3;
            }
            _ if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                current.push(Piece::Ident(chars[start..i].iter().collect()));
            }
            _ if c.is_whitespace() => i += 1,
            _ => {
                current.push(Piece::Other);
                i += 1;
            }
        }
    }

    if !current.is_empty() {
        entries.push(current);
    }
    entries
}

/// Index of the first `{` outside string literals
fn first_projection_brace(chars: &[char]) -> Option<usize> {
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '"' | '\'' => i = read_string(chars, i).1,
            '{' => return Some(i),
            _ => i += 1,
        }
    }
    None
}

/// Read a quoted literal starting at `start`; returns its content and the index after it
fn read_string(chars: &[char], start: usize) -> (String, usize) {
    let quote = chars[start];
    let mut out = String::new();
    let mut i = start + 1;
    while i < chars.len() {
        match chars[i] {
            '\\' => {
                if let Some(&escaped) = chars.get(i + 1) {
                    out.push(escaped);
                }
                i += 2;
            }
            c if c == quote => return (out, i + 1),
            c => {
                out.push(c);
                i += 1;
            }
        }
    }
    (out, i)
}

fn entry_field(entry: &[Piece]) -> Option<String> {
    match entry.first()? {
        Piece::Spread => return None,
        _ if entry.contains(&Piece::Arrow) => return None,
        _ => {}
    }

    // `"alias": source` records the source, never the alias
    if let Some(colon) = entry.iter().position(|p| *p == Piece::Colon) {
        return leading_identifier(&entry[colon + 1..]);
    }

    leading_identifier(entry)
}

/// The first identifier of an entry, unless it names a function call
fn leading_identifier(pieces: &[Piece]) -> Option<String> {
    match pieces {
        [Piece::Ident(_), Piece::Group('('), ..] => None,
        [Piece::Ident(name), ..] => Some(name.clone()),
        _ => None,
    }
}
