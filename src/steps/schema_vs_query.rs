// SPDX-License-Identifier: AGPL-3.0-or-later

//! Diff of query projection fields against declared schema fields

use serde::Serialize;
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};

use super::is_system_field;
use crate::mapping::normalize_field;
use crate::model::{FieldUsageIndex, StepResult, StepStatus, UsageSite};
use crate::query::QueryIndex;
use crate::schema_index::SchemaIndex;

/// A query field whose only counterpart differs by case or punctuation
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedMatch {
    pub query_field: String,
    pub schema_fields: BTreeSet<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldDiff {
    pub missing_in_schema: BTreeSet<String>,
    pub unused_schema_fields: BTreeSet<String>,
    pub normalized_matches: Vec<NormalizedMatch>,
}

pub fn diff(schema_fields: &BTreeSet<String>, query_fields: &BTreeSet<String>) -> FieldDiff {
    let schema: BTreeSet<&String> = schema_fields.iter().filter(|f| !is_system_field(f)).collect();
    let query: BTreeSet<&String> = query_fields.iter().filter(|f| !is_system_field(f)).collect();

    let mut missing: BTreeSet<String> = query.difference(&schema).map(|f| f.to_string()).collect();
    let mut unused: BTreeSet<String> = schema.difference(&query).map(|f| f.to_string()).collect();

    let mut unused_by_key: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for field in &unused {
        unused_by_key.entry(normalize_field(field)).or_default().insert(field.clone());
    }

    let mut normalized_matches = Vec::new();
    let mut matched_schema = BTreeSet::new();
    for field in &missing {
        if let Some(counterparts) = unused_by_key.get(&normalize_field(field)) {
            matched_schema.extend(counterparts.iter().cloned());
            normalized_matches.push(NormalizedMatch {
                query_field: field.clone(),
                schema_fields: counterparts.clone(),
            });
        }
    }
    for m in &normalized_matches {
        missing.remove(&m.query_field);
    }
    unused.retain(|f| !matched_schema.contains(f));

    FieldDiff {
        missing_in_schema: missing,
        unused_schema_fields: unused,
        normalized_matches,
    }
}

fn usage_of(usage: &FieldUsageIndex, fields: &BTreeSet<String>) -> BTreeMap<String, Vec<UsageSite>> {
    fields
        .iter()
        .filter_map(|f| usage.get(f).map(|sites| (f.clone(), sites.clone())))
        .collect()
}

pub fn run(step: &str, schema: &SchemaIndex, queries: &QueryIndex) -> StepResult {
    let result = diff(&schema.field_union(), &queries.field_union());
    let parse_errors: Vec<_> = queries
        .parse_errors()
        .map(|r| {
            json!({
                "file": r.file,
                "lineNumber": r.line_number,
                "parseError": r.parse_error,
            })
        })
        .collect();

    let partial_types: Vec<&str> = schema
        .types
        .values()
        .filter(|t| t.partial)
        .map(|t| t.name.as_str())
        .collect();

    let requires_enforcement = !result.missing_in_schema.is_empty();
    let status = if requires_enforcement
        || !result.unused_schema_fields.is_empty()
        || !parse_errors.is_empty()
    {
        StepStatus::Warn
    } else {
        StepStatus::Pass
    };

    StepResult::new(
        step,
        status,
        requires_enforcement,
        json!({
            "missingInSchema": result.missing_in_schema,
            "missingUsage": usage_of(&queries.usage, &result.missing_in_schema),
            "unusedSchemaFields": result.unused_schema_fields,
            "normalizedMatches": result.normalized_matches,
            "queryParseErrors": parse_errors,
            "partialSchemaTypes": partial_types,
            "stats": {
                "schemaFields": schema.field_union().len(),
                "queryFields": queries.field_union().len(),
                "missing": result.missing_in_schema.len(),
                "unused": result.unused_schema_fields.len(),
            },
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_plain_diff() {
        let d = diff(&set(&["status", "total"]), &set(&["status", "totalAmount"]));
        assert_eq!(d.missing_in_schema, set(&["totalAmount"]));
        assert_eq!(d.unused_schema_fields, set(&["total"]));
        assert!(d.normalized_matches.is_empty());
    }

    #[test]
    fn test_system_fields_ignored() {
        let d = diff(&set(&["title"]), &set(&["_id", "_type", "title"]));
        assert!(d.missing_in_schema.is_empty());
        assert!(d.unused_schema_fields.is_empty());
    }

    #[test]
    fn test_normalized_matches_leave_both_lists() {
        let d = diff(&set(&["first_name", "email"]), &set(&["firstName", "email"]));
        assert!(d.missing_in_schema.is_empty());
        assert!(d.unused_schema_fields.is_empty());
        assert_eq!(d.normalized_matches.len(), 1);
        assert_eq!(d.normalized_matches[0].query_field, "firstName");
        assert_eq!(d.normalized_matches[0].schema_fields, set(&["first_name"]));
    }
}
