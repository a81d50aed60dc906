// SPDX-License-Identifier: AGPL-3.0-or-later

//! Run summary and its renditions

use anyhow::Result;
use clap::ValueEnum;
use serde::Serialize;
use std::path::Path;

use crate::model::{RepoDescriptor, RepoRole, StepResult, StepStatus, Verdict, VerdictStatus};

/// Output format options
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text
    #[default]
    Text,
    /// JSON format
    Json,
    /// Markdown format
    Markdown,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RepoSummary {
    pub name: String,
    pub role: RepoRole,
    pub status: String,
}

/// Per-step line of the summary
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StepSummary {
    pub step: String,
    pub status: StepStatus,
    pub requires_enforcement: bool,
    pub phase: String,
    pub digest: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Machine-readable summary of one run
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub run: String,
    pub command: String,
    pub generated_at: String,
    pub repos: Vec<RepoSummary>,
    pub steps: Vec<StepSummary>,
    pub verdict: Verdict,
    pub integrity_errors: Vec<String>,
}

impl RunSummary {
    pub fn new(
        run: impl Into<String>,
        command: impl Into<String>,
        repos: &[RepoDescriptor],
        results: &[StepResult],
        digest_of: impl Fn(&str) -> Option<String>,
        verdict: &Verdict,
        integrity_errors: &[String],
    ) -> Self {
        Self {
            run: run.into(),
            command: command.into(),
            generated_at: chrono::Utc::now().to_rfc3339(),
            repos: repos
                .iter()
                .map(|r| RepoSummary {
                    name: r.name.clone(),
                    role: r.role,
                    status: r.status.clone(),
                })
                .collect(),
            steps: results
                .iter()
                .map(|r| StepSummary {
                    step: r.step.clone(),
                    status: r.status,
                    requires_enforcement: r.requires_enforcement,
                    phase: verdict
                        .phased_enforcement
                        .get(&r.step)
                        .cloned()
                        .unwrap_or_else(|| "BLOCK".to_string()),
                    digest: digest_of(&r.step),
                    reason: r.reason.clone(),
                })
                .collect(),
            verdict: verdict.clone(),
            integrity_errors: integrity_errors.to_vec(),
        }
    }
}

/// Reporter for outputting run summaries
pub struct Reporter {
    format: OutputFormat,
}

impl Reporter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Output the summary to stdout or file
    pub fn output(&self, summary: &RunSummary, path: Option<&Path>) -> Result<()> {
        let output = self.render(summary)?;
        if let Some(path) = path {
            std::fs::write(path, &output)?;
        } else {
            print!("{}", output);
        }
        Ok(())
    }

    pub fn render(&self, summary: &RunSummary) -> Result<String> {
        Ok(match self.format {
            OutputFormat::Text => format_text(summary),
            OutputFormat::Json => format!("{}\n", serde_json::to_string_pretty(summary)?),
            OutputFormat::Markdown => format_markdown(summary),
        })
    }
}

fn status_icon(status: StepStatus) -> &'static str {
    match status {
        StepStatus::Pass => "✓",
        StepStatus::Warn => "⚠",
        StepStatus::Fail => "✗",
        StepStatus::Skipped => "–",
    }
}

fn format_text(summary: &RunSummary) -> String {
    let mut output = String::new();

    output.push_str(&format!(
        "\n{} Schemabot {} ({})\n",
        match summary.verdict.status {
            VerdictStatus::Pass => "✓",
            VerdictStatus::Fail => "✗",
        },
        summary.command,
        summary.run
    ));
    output.push_str(&"─".repeat(50));
    output.push('\n');

    for repo in &summary.repos {
        output.push_str(&format!("  repo {} [{}] {}\n", repo.name, repo.role, repo.status));
    }
    output.push('\n');

    for step in &summary.steps {
        output.push_str(&format!(
            "  {} {:<26} {:<8} phase={}{}\n",
            status_icon(step.status),
            step.step,
            step.status.to_string(),
            step.phase,
            if step.requires_enforcement { "  enforce" } else { "" }
        ));
        if let Some(reason) = &step.reason {
            output.push_str(&format!("      {}\n", reason));
        }
    }

    output.push_str(&format!("\nVerdict: {:?}\n", summary.verdict.status));
    for reason in &summary.verdict.reasons {
        output.push_str(&format!("  - {}\n", reason));
    }
    if !summary.integrity_errors.is_empty() {
        output.push_str("\nIntegrity errors:\n");
        for error in &summary.integrity_errors {
            output.push_str(&format!("  ✗ {}\n", error));
        }
    }
    output.push('\n');
    output
}

/// Markdown rendition, also persisted as `summary.md`
pub fn format_markdown(summary: &RunSummary) -> String {
    let mut output = String::new();

    output.push_str(&format!("# Schemabot audit: {}\n\n", summary.run));
    output.push_str(&format!(
        "**Verdict:** {} | **Command:** `{}`\n\n",
        match summary.verdict.status {
            VerdictStatus::Pass => "✅ PASS",
            VerdictStatus::Fail => "❌ FAIL",
        },
        summary.command
    ));

    output.push_str("## Repositories\n\n| Name | Role | Status |\n|------|------|--------|\n");
    for repo in &summary.repos {
        output.push_str(&format!("| {} | {} | {} |\n", repo.name, repo.role, repo.status));
    }

    output.push_str("\n## Steps\n\n| Step | Status | Enforcement | Phase | Digest |\n|------|--------|-------------|-------|--------|\n");
    for step in &summary.steps {
        output.push_str(&format!(
            "| {} | {} {} | {} | {} | `{}` |\n",
            step.step,
            status_icon(step.status),
            step.status,
            if step.requires_enforcement { "required" } else { "-" },
            step.phase,
            step.digest.as_deref().map(|d| &d[..d.len().min(12)]).unwrap_or("-")
        ));
    }

    if !summary.verdict.reasons.is_empty() {
        output.push_str("\n## Reasons\n\n");
        for reason in &summary.verdict.reasons {
            output.push_str(&format!("- {}\n", reason));
        }
    }

    if !summary.integrity_errors.is_empty() {
        output.push_str("\n## Integrity errors\n\n");
        for error in &summary.integrity_errors {
            output.push_str(&format!("- {}\n", error));
        }
    }

    output.push_str("\n---\n*Generated by schemabot*\n");
    output
}
