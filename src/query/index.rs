// SPDX-License-Identifier: AGPL-3.0-or-later

//! Query index: every embedded query, its projection fields and a reverse
//! field -> usage-site index

use once_cell::sync::Lazy;
use rayon::prelude::*;
use regex::Regex;
use serde_json::json;
use std::collections::BTreeSet;

use super::fields::extract_fields;
use super::parser;
use crate::literal::{read_quoted, skip_trivia};
use crate::model::{FieldUsageIndex, QueryRecord, StepResult, StepStatus, UsageSite};
use crate::scanner::{line_of, SourceFile};

/// groq`...`
static TAGGED_TEMPLATE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bgroq\s*`").unwrap());

/// client.fetch('...') / client.fetch<T>(`...`)
static METHOD_CALL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\.\s*fetch\s*(?:<[^<>()]*>)?\s*\(").unwrap());

/// sanityFetch('...'), only when not itself a method call
static BARE_CALL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:sanityFetch|groqFetch|fetchQuery|fetch)\s*(?:<[^<>()]*>)?\s*\(").unwrap());

static INTERPOLATION: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$\{[^}]*\}").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallShape {
    TaggedTemplate,
    MethodCall,
    BareCall,
}

/// The index over all scanned code
#[derive(Debug, Clone, Default)]
pub struct QueryIndex {
    pub records: Vec<QueryRecord>,
    pub usage: FieldUsageIndex,
}

impl QueryIndex {
    pub fn build(files: &[&SourceFile]) -> Self {
        let mut records: Vec<QueryRecord> = files
            .par_iter()
            .flat_map_iter(|file| find_queries(&file.text, &file.display))
            .collect();
        records.sort_by(|a, b| (&a.file, a.line_number).cmp(&(&b.file, b.line_number)));
        Self::from_records(records)
    }

    pub fn from_records(records: Vec<QueryRecord>) -> Self {
        let mut usage = FieldUsageIndex::new();
        for record in &records {
            for field in &record.fields {
                usage
                    .entry(field.clone())
                    .or_default()
                    .push(UsageSite::new(record.file.clone(), record.line_number));
            }
        }
        Self { records, usage }
    }

    /// Every projection field used by any query
    pub fn field_union(&self) -> BTreeSet<String> {
        self.usage.keys().cloned().collect()
    }

    pub fn parse_errors(&self) -> impl Iterator<Item = &QueryRecord> {
        self.records.iter().filter(|r| r.parse_error.is_some())
    }

    pub fn to_step_result(&self, step: &str) -> StepResult {
        let parse_errors = self.parse_errors().count();
        let status = if parse_errors > 0 {
            StepStatus::Warn
        } else {
            StepStatus::Pass
        };
        StepResult::new(
            step,
            status,
            false,
            json!({
                "queries": self.records,
                "fieldUsage": self.usage,
                "stats": {
                    "queryCount": self.records.len(),
                    "parseErrors": parse_errors,
                    "distinctFields": self.usage.len(),
                },
            }),
        )
    }
}

/// Find and analyse every embedded query in one file
pub fn find_queries(text: &str, file: &str) -> Vec<QueryRecord> {
    let mut found: Vec<(usize, String, CallShape)> = Vec::new();

    for m in TAGGED_TEMPLATE.find_iter(text) {
        if let Some((query, _)) = read_quoted(text, m.end() - 1) {
            found.push((m.start(), query, CallShape::TaggedTemplate));
        }
    }

    for m in METHOD_CALL.find_iter(text) {
        if let Some(query) = literal_argument(text, m.end()) {
            found.push((m.start(), query, CallShape::MethodCall));
        }
    }

    for m in BARE_CALL.find_iter(text) {
        let preceding = text[..m.start()].trim_end();
        if preceding.ends_with('.') || preceding.ends_with("?.") {
            continue;
        }
        if let Some(query) = literal_argument(text, m.end()) {
            found.push((m.start(), query, CallShape::BareCall));
        }
    }

    found.sort_by_key(|(offset, _, _)| *offset);
    found.dedup_by_key(|(offset, _, _)| *offset);

    found
        .into_iter()
        .map(|(offset, query, shape)| analyse(file, line_of(text, offset), query, shape))
        .collect()
}

fn literal_argument(text: &str, after_paren: usize) -> Option<String> {
    let start = skip_trivia(text, after_paren);
    let (query, _) = read_quoted(text, start)?;
    looks_like_query(&query).then_some(query)
}

/// Plain fetch() is also an HTTP client; only accept text shaped like a query
fn looks_like_query(text: &str) -> bool {
    let t = text.trim_start();
    t.starts_with('*')
        || t.starts_with("count(")
        || t.starts_with('{')
        || t.starts_with('$')
        || t.contains("_type")
}

fn analyse(file: &str, line_number: usize, query_text: String, shape: CallShape) -> QueryRecord {
    let normalized = if shape == CallShape::TaggedTemplate || query_text.contains("${") {
        INTERPOLATION.replace_all(&query_text, "$$__interpolated").into_owned()
    } else {
        query_text.clone()
    };
    let parse_error = parser::parse(&normalized).err().map(|e| e.to_string());
    QueryRecord {
        file: file.to_string(),
        line_number,
        fields: extract_fields(&normalized),
        query_text,
        parse_error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_three_call_shapes() {
        let text = r#"
import groq from 'groq'
const a = groq`*[_type == "order"]{status, total}`
const b = await client.fetch('*[_type == "customer"]{email}', {})
const c = await sanityFetch("*[_type == 'product']{title}")
const d = await fetch("https://api.stripe.com/v1/charges")
"#;
        let records = find_queries(text, "web/src/data.ts");
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].line_number, 3);
        assert_eq!(records[0].fields, vec!["status", "total"]);
        assert_eq!(records[1].fields, vec!["email"]);
        assert_eq!(records[2].fields, vec!["title"]);
        assert!(records.iter().all(|r| r.parse_error.is_none()));
    }

    #[test]
    fn test_method_call_not_rematched_as_bare() {
        let text = r#"client.fetch(`*[_type == "order"]{_id}`)"#;
        assert_eq!(find_queries(text, "f.ts").len(), 1);
    }

    #[test]
    fn test_parse_error_kept_with_fields() {
        let text = "const q = groq`*[_type == \"order\"]{status, total`";
        let records = find_queries(text, "f.ts");
        assert_eq!(records.len(), 1);
        assert!(records[0].parse_error.is_some());
        assert_eq!(records[0].fields, vec!["status", "total"]);
    }

    #[test]
    fn test_interpolation_is_tolerated() {
        let text = "const q = groq`*[_type == \"order\" && _id == ${id}]{status}`";
        let records = find_queries(text, "f.ts");
        assert!(records[0].parse_error.is_none(), "{:?}", records[0].parse_error);
        assert_eq!(records[0].fields, vec!["status"]);
        assert!(records[0].query_text.contains("${id}"));
    }

    #[test]
    fn test_usage_index() {
        let a = SourceFile::new("web", "a.ts", "groq`*[]{status}`\ngroq`*[]{status, total}`");
        let index = QueryIndex::build(&[&a]);
        assert_eq!(index.usage["status"].len(), 2);
        assert_eq!(index.usage["total"][0], UsageSite::new("web/a.ts", 2));
    }
}
