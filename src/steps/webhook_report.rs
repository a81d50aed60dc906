// SPDX-License-Identifier: AGPL-3.0-or-later

//! Webhook drift report: classified handlers with their idempotency and
//! unsafe-payload findings

use rayon::prelude::*;
use serde_json::json;

use crate::detectors::{idempotency, payload, ClassifiedHandler};
use crate::model::{Finding, StepResult, StepStatus};

#[derive(Debug, Clone, Default)]
pub struct WebhookFindings {
    pub idempotency: Vec<Finding>,
    pub unsafe_access: Vec<Finding>,
}

pub fn analyse(handlers: &[ClassifiedHandler<'_>]) -> WebhookFindings {
    let per_file: Vec<(Option<Finding>, Vec<Finding>)> = handlers
        .par_iter()
        .map(|h| {
            let file = h.file;
            (
                idempotency::check_handler(&file.display, &file.relative, &file.text),
                payload::check_handler(&file.display, &file.text),
            )
        })
        .collect();

    let mut findings = WebhookFindings::default();
    for (idem, unsafe_access) in per_file {
        findings.idempotency.extend(idem);
        findings.unsafe_access.extend(unsafe_access);
    }
    findings
}

pub fn run(step: &str, handlers: &[ClassifiedHandler<'_>]) -> StepResult {
    let findings = analyse(handlers);
    let listed: Vec<_> = handlers
        .iter()
        .map(|h| json!({ "file": h.file.display, "matchedBy": h.matched }))
        .collect();
    let total = findings.idempotency.len() + findings.unsafe_access.len();
    StepResult::new(
        step,
        if total > 0 { StepStatus::Warn } else { StepStatus::Pass },
        total > 0,
        json!({
            "handlers": listed,
            "idempotency": findings.idempotency,
            "unsafeAccess": findings.unsafe_access,
            "stats": {
                "handlers": handlers.len(),
                "idempotencyFindings": findings.idempotency.len(),
                "unsafeAccessFindings": findings.unsafe_access.len(),
            },
        }),
    )
}
