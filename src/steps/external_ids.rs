// SPDX-License-Identifier: AGPL-3.0-or-later

//! External-id integrity: provider reference fields declared in the schema
//! versus the ones queries and code actually touch

use once_cell::sync::Lazy;
use rayon::prelude::*;
use regex::Regex;
use serde::Serialize;
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};

use crate::mapping::normalize_field;
use crate::model::{Classification, StepResult, StepStatus, UsageSite};
use crate::query::QueryIndex;
use crate::scanner::{line_of, SourceFile};
use crate::schema_index::SchemaIndex;

const PROVIDERS: &str = "stripe|shopify|shippo|sendgrid|paypal|printful|easypost|external";

static EXTERNAL_ID_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"^(?i:{PROVIDERS})(?:[A-Za-z0-9_]*(?:_id|_ID|Id|ID)|_?id|_?ID)$")).unwrap()
});

static EXTERNAL_ID_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"\b(?i:{PROVIDERS})(?:[A-Za-z0-9_]*(?:_id|_ID|Id|ID)|_?id|_?ID)\b")).unwrap()
});

static ENV_ACCESS: Lazy<Regex> = Lazy::new(|| Regex::new(r#"\benv\s*(?:\.\s*|\[\s*['"`])$"#).unwrap());

pub fn is_external_id(name: &str) -> bool {
    EXTERNAL_ID_NAME.is_match(name)
}

/// Environment variable names (`STRIPE_PRICE_ID`, `process.env.stripeKeyId`) are
/// configuration, not document fields.
fn is_env_reference(text: &str, start: usize, token: &str) -> bool {
    if !token.chars().any(|c| c.is_ascii_lowercase()) {
        return true;
    }
    let line_start = text[..start].rfind('\n').map_or(0, |i| i + 1);
    ENV_ACCESS.is_match(&text[line_start..start])
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExternalIdEntry {
    pub normalized_key: String,
    pub classification: Classification,
    pub declared: BTreeSet<String>,
    pub declared_in: BTreeSet<String>,
    pub referenced: BTreeSet<String>,
    pub references: Vec<UsageSite>,
}

fn classify(declared: &BTreeSet<String>, referenced: &BTreeSet<String>) -> Classification {
    match (declared.len(), referenced.is_empty()) {
        (0, _) => Classification::Broken,
        (n, _) if n > 1 => Classification::Duplicate,
        (_, true) => Classification::Obsolete,
        (_, false) => Classification::InUse,
    }
}

/// Every external-id token in code, outside the schema sources
fn code_references(files: &[&SourceFile]) -> Vec<(String, UsageSite)> {
    let mut refs: Vec<(String, UsageSite)> = files
        .par_iter()
        .flat_map_iter(|file| {
            EXTERNAL_ID_TOKEN
                .find_iter(&file.text)
                .filter(|m| !is_env_reference(&file.text, m.start(), m.as_str()))
                .map(|m| {
                    (
                        m.as_str().to_string(),
                        UsageSite::new(file.display.clone(), line_of(&file.text, m.start())),
                    )
                })
                .collect::<Vec<_>>()
        })
        .collect();
    refs.sort();
    refs.dedup();
    refs
}

pub fn analyse(schema: &SchemaIndex, queries: &QueryIndex, code: &[&SourceFile]) -> Vec<ExternalIdEntry> {
    let mut entries: BTreeMap<String, ExternalIdEntry> = BTreeMap::new();

    for ty in schema.types.values() {
        for field in ty.fields.iter().filter(|f| is_external_id(f)) {
            let e = slot(&mut entries, field);
            e.declared.insert(field.clone());
            e.declared_in.extend(ty.sources.iter().cloned());
        }
    }

    for (field, sites) in &queries.usage {
        if is_external_id(field) {
            let e = slot(&mut entries, field);
            e.referenced.insert(field.clone());
            e.references.extend(sites.iter().cloned());
        }
    }

    for (name, site) in code_references(code) {
        let e = slot(&mut entries, &name);
        e.referenced.insert(name);
        e.references.push(site);
    }

    entries
        .into_values()
        .map(|mut e| {
            e.references.sort();
            e.references.dedup();
            e.classification = classify(&e.declared, &e.referenced);
            e
        })
        .collect()
}

fn slot<'a>(entries: &'a mut BTreeMap<String, ExternalIdEntry>, name: &str) -> &'a mut ExternalIdEntry {
    let key = normalize_field(name);
    entries.entry(key.clone()).or_insert_with(|| ExternalIdEntry {
        normalized_key: key,
        classification: Classification::Broken,
        declared: BTreeSet::new(),
        declared_in: BTreeSet::new(),
        referenced: BTreeSet::new(),
        references: Vec::new(),
    })
}

pub fn run(step: &str, schema: &SchemaIndex, queries: &QueryIndex, code: &[&SourceFile]) -> StepResult {
    let entries = analyse(schema, queries, code);
    let mut counts: BTreeMap<Classification, usize> = BTreeMap::new();
    for e in &entries {
        *counts.entry(e.classification).or_insert(0) += 1;
    }
    let broken = counts.get(&Classification::Broken).copied().unwrap_or(0);
    let status = if broken > 0 || counts.contains_key(&Classification::Duplicate) {
        StepStatus::Warn
    } else {
        StepStatus::Pass
    };
    StepResult::new(
        step,
        status,
        broken > 0,
        json!({
            "entries": entries,
            "stats": counts,
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{QueryRecord, SchemaKind, SchemaType};

    fn schema(fields: &[&str]) -> SchemaIndex {
        let mut index = SchemaIndex::default();
        let mut ty = SchemaType::new("order", SchemaKind::Document, "studio/schemas/order.ts");
        for f in fields {
            ty.add_field(*f, false);
        }
        index.insert(ty);
        index
    }

    fn queries(fields: &[&str]) -> QueryIndex {
        QueryIndex::from_records(vec![QueryRecord {
            file: "web/src/orders.ts".into(),
            line_number: 4,
            query_text: String::new(),
            fields: fields.iter().map(|f| f.to_string()).collect(),
            parse_error: None,
        }])
    }

    #[test]
    fn test_name_pattern() {
        assert!(is_external_id("stripeSessionId"));
        assert!(is_external_id("shippo_transaction_id"));
        assert!(is_external_id("externalId"));
        assert!(is_external_id("paypalID"));
        assert!(!is_external_id("stripeValid"));
        assert!(!is_external_id("customerId"));
        assert!(!is_external_id("stripe"));
    }

    #[test]
    fn test_classifications() {
        let entries = analyse(
            &schema(&["stripeSessionId", "shippoRateId", "printful_id", "printfulId"]),
            &queries(&["stripeSessionId", "shopifyProductId"]),
            &[],
        );
        let by_key: BTreeMap<_, _> = entries
            .iter()
            .map(|e| (e.normalized_key.as_str(), e.classification))
            .collect();
        assert_eq!(by_key["stripesessionid"], Classification::InUse);
        assert_eq!(by_key["shipporateid"], Classification::Obsolete);
        assert_eq!(by_key["shopifyproductid"], Classification::Broken);
        assert_eq!(by_key["printfulid"], Classification::Duplicate);
    }

    #[test]
    fn test_code_reference_counts_as_use() {
        let file = SourceFile::new("functions", "netlify/functions/ship.ts", "const x = order.shippoRateId");
        let entries = analyse(&schema(&["shippoRateId"]), &QueryIndex::default(), &[&file]);
        assert_eq!(entries[0].classification, Classification::InUse);
        assert_eq!(entries[0].references[0], UsageSite::new("functions/netlify/functions/ship.ts", 1));
    }

    #[test]
    fn test_env_variables_are_not_field_references() {
        let text = "const price = process.env.STRIPE_PRICE_ID\nconst key = import.meta.env.stripeProductId\nconst id = env['shopifyVariantId']\n";
        let file = SourceFile::new("web", "src/checkout.ts", text);
        let entries = analyse(&schema(&["stripePriceId"]), &QueryIndex::default(), &[&file]);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].normalized_key, "stripepriceid");
        assert_eq!(entries[0].classification, Classification::Obsolete);
        assert!(entries[0].references.is_empty());

        let used = SourceFile::new("web", "src/checkout.ts", "const price = process.env.STRIPE_PRICE_ID ?? doc.stripePriceId\n");
        let entries = analyse(&schema(&["stripePriceId"]), &QueryIndex::default(), &[&used]);
        assert_eq!(entries[0].classification, Classification::InUse);
    }

    #[test]
    fn test_broken_requires_enforcement() {
        let result = run("external-id-integrity", &schema(&[]), &queries(&["stripeCustomerId"]), &[]);
        assert!(result.requires_enforcement);
        assert_eq!(result.status, StepStatus::Warn);
    }
}
