// SPDX-License-Identifier: AGPL-3.0-or-later

//! API contract violations across all scanned code

use rayon::prelude::*;
use serde_json::json;
use std::collections::BTreeSet;

use crate::detectors::contracts::{check_file, ContractReport};
use crate::model::{StepResult, StepStatus};
use crate::scanner::SourceFile;

pub fn analyse(files: &[&SourceFile], schema_fields: &BTreeSet<String>) -> ContractReport {
    let reports: Vec<ContractReport> = files
        .par_iter()
        .map(|f| check_file(&f.display, &f.text, schema_fields))
        .collect();

    let mut merged = ContractReport::default();
    for report in reports {
        merged.violations.extend(report.violations);
        merged.schema_mismatches.extend(report.schema_mismatches);
        merged.unresolved.extend(report.unresolved);
        merged.calls_checked += report.calls_checked;
    }
    merged
}

pub fn run(step: &str, files: &[&SourceFile], schema_fields: &BTreeSet<String>) -> StepResult {
    let report = analyse(files, schema_fields);
    let blocking = !report.violations.is_empty();
    let status = if blocking || !report.unresolved.is_empty() {
        StepStatus::Warn
    } else {
        StepStatus::Pass
    };
    StepResult::new(
        step,
        status,
        blocking,
        json!({
            "missingField": report.violations,
            "schemaMismatch": report.schema_mismatches,
            "unresolvedCalls": report.unresolved,
            "stats": {
                "callsChecked": report.calls_checked,
                "violations": report.violations.len(),
                "schemaMismatches": report.schema_mismatches.len(),
                "unresolved": report.unresolved.len(),
            },
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_mismatch_alone_never_blocks() {
        let file = SourceFile::new(
            "functions",
            "netlify/functions/order.ts",
            "await client.create({ _type: 'order', legacyTotal: 1 })",
        );
        let schema: BTreeSet<String> = ["status".to_string()].into_iter().collect();
        let result = run("api-contract-violations", &[&file], &schema);
        assert!(!result.requires_enforcement);
        assert_eq!(result.payload["schemaMismatch"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_missing_field_blocks() {
        let file = SourceFile::new(
            "functions",
            "netlify/functions/pay.ts",
            "await stripe.paymentIntents.create({ amount: 500 })",
        );
        let result = run("api-contract-violations", &[&file], &BTreeSet::new());
        assert!(result.requires_enforcement);
        assert_eq!(result.payload["missingField"][0]["file"], "functions/netlify/functions/pay.ts");
    }
}
