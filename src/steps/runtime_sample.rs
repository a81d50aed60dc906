// SPDX-License-Identifier: AGPL-3.0-or-later

//! Runtime sampling: compare stored documents against their declared types

use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, warn};

use super::is_system_field;
use crate::model::{StepResult, StepStatus};
use crate::schema_index::SchemaIndex;
use crate::store::DocumentStore;

#[derive(Debug, Clone, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct TypeSample {
    pub sampled: usize,
    pub undeclared_fields: BTreeSet<String>,
    pub missing_required: BTreeSet<String>,
}

/// Compare sampled documents against one declared type
pub fn compare(fields: &BTreeSet<String>, required: &BTreeSet<String>, docs: &[Value]) -> TypeSample {
    let mut sample = TypeSample {
        sampled: docs.len(),
        ..TypeSample::default()
    };
    for doc in docs {
        let Some(object) = doc.as_object() else {
            continue;
        };
        for key in object.keys().filter(|k| !is_system_field(k)) {
            if !fields.contains(key) {
                sample.undeclared_fields.insert(key.clone());
            }
        }
        for field in required {
            if object.get(field).map_or(true, Value::is_null) {
                sample.missing_required.insert(field.clone());
            }
        }
    }
    sample
}

pub async fn run(
    step: &str,
    store: Option<&dyn DocumentStore>,
    schema: &SchemaIndex,
    sample_size: usize,
) -> StepResult {
    let Some(store) = store else {
        return StepResult::skipped(step, "document store credentials are not configured");
    };
    let documents: Vec<_> = schema.documents().collect();
    if documents.is_empty() {
        return StepResult::skipped(step, "schema index declares no document types");
    }

    info!("Sampling {} document types from {}", documents.len(), store.describe());
    let mut per_type: BTreeMap<String, TypeSample> = BTreeMap::new();
    for ty in documents {
        match store.sample(&ty.name, sample_size).await {
            Ok(docs) => {
                per_type.insert(ty.name.clone(), compare(&ty.fields, &ty.required, &docs));
            }
            Err(e) => {
                warn!("Store sampling failed for {}: {:#}", ty.name, e);
                return StepResult::skipped(step, format!("sampling '{}' failed: {:#}", ty.name, e));
            }
        }
    }

    let missing_required = per_type.values().any(|s| !s.missing_required.is_empty());
    let drift = missing_required || per_type.values().any(|s| !s.undeclared_fields.is_empty());
    StepResult::new(
        step,
        if drift { StepStatus::Warn } else { StepStatus::Pass },
        missing_required,
        json!({
            "store": store.describe(),
            "types": per_type,
        }),
    )
}
