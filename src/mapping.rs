// SPDX-License-Identifier: AGPL-3.0-or-later

//! Schema <-> query field correspondence by normalized name

use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};

use crate::integrations::IntegrationsInventory;
use crate::model::{MappingEntry, StepResult, StepStatus};
use crate::query::QueryIndex;
use crate::schema_index::SchemaIndex;

/// Lowercase and drop everything that is not alphanumeric
pub fn normalize_field(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// normalized key -> original spellings
pub fn normalized_groups<'a>(names: impl IntoIterator<Item = &'a String>) -> BTreeMap<String, BTreeSet<String>> {
    let mut groups: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for name in names {
        let key = normalize_field(name);
        if key.is_empty() {
            continue;
        }
        groups.entry(key).or_default().insert(name.clone());
    }
    groups
}

#[derive(Debug, Clone, Default)]
pub struct MappingIndex {
    pub entries: Vec<MappingEntry>,
    pub schema_only: BTreeSet<String>,
    pub query_only: BTreeSet<String>,
    pub integration_categories: BTreeSet<String>,
}

impl MappingIndex {
    pub fn build(
        schema: &SchemaIndex,
        queries: &QueryIndex,
        integrations: Option<&IntegrationsInventory>,
    ) -> Self {
        let schema_fields = schema.field_union();
        let query_fields = queries.field_union();
        let schema_groups = normalized_groups(&schema_fields);
        let query_groups = normalized_groups(&query_fields);

        let mut entries = Vec::new();
        let mut schema_only = BTreeSet::new();
        for (key, spellings) in &schema_groups {
            match query_groups.get(key) {
                Some(query_spellings) => entries.push(MappingEntry {
                    normalized_key: key.clone(),
                    schema_fields: spellings.clone(),
                    query_fields: query_spellings.clone(),
                }),
                None => {
                    schema_only.insert(key.clone());
                }
            }
        }
        let query_only = query_groups
            .keys()
            .filter(|key| !schema_groups.contains_key(*key))
            .cloned()
            .collect();

        Self {
            entries,
            schema_only,
            query_only,
            integration_categories: integrations
                .map(|inv| inv.categories().into_iter().map(str::to_string).collect())
                .unwrap_or_default(),
        }
    }

    /// Entries whose two sides are not spelled identically
    pub fn renamed(&self) -> impl Iterator<Item = &MappingEntry> {
        self.entries.iter().filter(|e| e.schema_fields != e.query_fields)
    }

    pub fn to_step_result(&self, step: &str) -> StepResult {
        StepResult::new(
            step,
            StepStatus::Pass,
            false,
            json!({
                "entries": self.entries,
                "schemaOnly": self.schema_only,
                "queryOnly": self.query_only,
                "integrationCategories": self.integration_categories,
                "stats": {
                    "matched": self.entries.len(),
                    "renamed": self.renamed().count(),
                },
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{QueryRecord, SchemaKind, SchemaType};

    fn schema_with(fields: &[&str]) -> SchemaIndex {
        let mut index = SchemaIndex::default();
        let mut ty = SchemaType::new("customer", SchemaKind::Document, "studio/schemas/customer.ts");
        for field in fields {
            ty.add_field(*field, false);
        }
        index.insert(ty);
        index
    }

    fn queries_with(fields: &[&str]) -> QueryIndex {
        QueryIndex::from_records(vec![QueryRecord {
            file: "web/src/q.ts".into(),
            line_number: 1,
            query_text: String::new(),
            fields: fields.iter().map(|f| f.to_string()).collect(),
            parse_error: None,
        }])
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize_field("First_Name"), "firstname");
        assert_eq!(normalize_field("firstName"), normalize_field("First_Name"));
        assert_eq!(normalize_field("stripe-session.id"), "stripesessionid");
    }

    #[test]
    fn test_differently_spelled_fields_share_an_entry() {
        let mapping = MappingIndex::build(
            &schema_with(&["First_Name", "email"]),
            &queries_with(&["firstName", "phone"]),
            None,
        );
        assert_eq!(mapping.entries.len(), 1);
        let entry = &mapping.entries[0];
        assert_eq!(entry.normalized_key, "firstname");
        assert!(entry.schema_fields.contains("First_Name"));
        assert!(entry.query_fields.contains("firstName"));
        assert_eq!(mapping.renamed().count(), 1);
        assert!(mapping.schema_only.contains("email"));
        assert!(mapping.query_only.contains("phone"));
    }
}
