// SPDX-License-Identifier: AGPL-3.0-or-later

//! Remediation prompts for a downstream fix agent, one per
//! `(repository, scope)` entry of the remediation table

use serde::Serialize;
use std::collections::BTreeMap;

use crate::config::RemediationTarget;
use crate::model::{StepResult, StepStatus};

/// State of one cited input artifact
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InputState {
    pub step: String,
    pub status: Option<StepStatus>,
    pub digest: Option<String>,
}

impl InputState {
    /// Recorded, and neither failed nor skipped
    pub fn approved(&self) -> bool {
        matches!(self.status, Some(StepStatus::Pass | StepStatus::Warn))
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Prompt {
    pub repository: String,
    pub scope: String,
    pub approved: bool,
    pub inputs: Vec<InputState>,
    #[serde(skip)]
    pub text: String,
}

impl Prompt {
    pub fn file_name(&self) -> String {
        format!("{}-{}.txt", self.repository, self.scope)
    }
}

/// Build every prompt; `digests` maps step name to artifact digest
pub fn build_prompts(
    targets: &[RemediationTarget],
    results: &[StepResult],
    digests: &BTreeMap<String, String>,
    run_name: &str,
) -> Vec<Prompt> {
    let by_step: BTreeMap<&str, &StepResult> = results.iter().map(|r| (r.step.as_str(), r)).collect();

    targets
        .iter()
        .map(|target| {
            let inputs: Vec<InputState> = target
                .inputs
                .iter()
                .map(|step| InputState {
                    step: step.clone(),
                    status: by_step.get(step.as_str()).map(|r| r.status),
                    digest: digests.get(step).cloned(),
                })
                .collect();
            let approved = !inputs.is_empty() && inputs.iter().all(InputState::approved);
            let text = render(target, &inputs, approved, run_name);
            Prompt {
                repository: target.repository.clone(),
                scope: target.scope.clone(),
                approved,
                inputs,
                text,
            }
        })
        .collect()
}

fn render(target: &RemediationTarget, inputs: &[InputState], approved: bool, run_name: &str) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "Remediation request: repository `{}`, scope `{}`\n",
        target.repository, target.scope
    ));
    out.push_str(&format!("Audit run: {}\n\n", run_name));

    out.push_str("Input artifacts:\n");
    for input in inputs {
        let status = input
            .status
            .map(|s| s.to_string())
            .unwrap_or_else(|| "NOT RECORDED".to_string());
        let digest = input.digest.as_deref().unwrap_or("-");
        let mark = if input.approved() { "approved" } else { "not approved" };
        out.push_str(&format!(
            "  - {}.json  status={}  sha256={}  ({})\n",
            input.step, status, digest, mark
        ));
    }
    out.push('\n');

    if approved {
        out.push_str(
            "Every input above is enforcement-approved. You may act on the findings they contain.\n",
        );
    } else {
        out.push_str(
            "At least one input is missing, failed or skipped. Do not change anything; \
             re-run the audit first.\n",
        );
    }

    out.push_str(&format!(
        r#"
Rules:
  1. Act only when every input artifact above is marked approved.
  2. Edit files in `{repo}` only, and only for the `{scope}` findings.
  3. Make the smallest change that resolves each finding. No refactors, no renames,
     no formatting churn.
  4. Cite the artifact and finding (file and line) each edit addresses.
  5. Leave anything you cannot resolve confidently as a note instead of a change.
"#,
        repo = target.repository,
        scope = target.scope
    ));
    out
}
