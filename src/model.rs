// SPDX-License-Identifier: AGPL-3.0-or-later

//! Core audit data structures and types

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;

/// Status string carried by a repository that is safe to scan
pub const REPO_OK: &str = "OK";

/// A repository under audit, created once from static configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RepoDescriptor {
    /// Unique repository name, used as the prefix of every reported file path
    pub name: String,

    /// What the repository contributes to the system
    pub role: RepoRole,

    /// Absolute path to the repository root
    pub path: PathBuf,

    /// `OK`, or the reason the repository is skipped
    pub status: String,
}

impl RepoDescriptor {
    pub fn is_ok(&self) -> bool {
        self.status == REPO_OK
    }
}

/// Repository roles
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum RepoRole {
    /// Serverless function handlers
    Functions,
    /// Content studio holding the schema definitions
    Studio,
    /// Storefront / web application
    Web,
    /// Everything in one tree
    Monorepo,
}

impl fmt::Display for RepoRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepoRole::Functions => write!(f, "functions"),
            RepoRole::Studio => write!(f, "studio"),
            RepoRole::Web => write!(f, "web"),
            RepoRole::Monorepo => write!(f, "monorepo"),
        }
    }
}

/// Schema type kinds
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SchemaKind {
    Document,
    Object,
}

/// A named entity type declared in the content schema
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaType {
    pub name: String,
    pub kind: SchemaKind,
    pub fields: BTreeSet<String>,
    /// Always a subset of `fields`
    pub required: BTreeSet<String>,
    pub sources: BTreeSet<String>,
    /// The field set is a lower bound: something could not be resolved statically
    pub partial: bool,
}

impl SchemaType {
    pub fn new(name: impl Into<String>, kind: SchemaKind, source: impl Into<String>) -> Self {
        let mut sources = BTreeSet::new();
        sources.insert(source.into());
        Self {
            name: name.into(),
            kind,
            fields: BTreeSet::new(),
            required: BTreeSet::new(),
            sources,
            partial: false,
        }
    }

    pub fn add_field(&mut self, name: impl Into<String>, required: bool) {
        let name = name.into();
        if required {
            self.required.insert(name.clone());
        }
        self.fields.insert(name);
    }

    /// Union another discovery of the same type into this one.
    ///
    /// A `document` kind wins over `object` so a type declared as a document
    /// anywhere stays sampleable.
    pub fn merge(&mut self, other: SchemaType) {
        if other.kind == SchemaKind::Document {
            self.kind = SchemaKind::Document;
        }
        self.fields.extend(other.fields);
        self.required.extend(other.required);
        self.sources.extend(other.sources);
        self.partial |= other.partial;
        let stray: Vec<String> = self.required.difference(&self.fields).cloned().collect();
        self.fields.extend(stray);
    }
}

/// One embedded structured query found in source text
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QueryRecord {
    pub file: String,
    pub line_number: usize,
    pub query_text: String,
    /// Top-level projection fields, sorted and deduplicated
    pub fields: Vec<String>,
    pub parse_error: Option<String>,
}

/// A file/line reference
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "camelCase")]
pub struct UsageSite {
    pub file: String,
    pub line_number: usize,
}

impl UsageSite {
    pub fn new(file: impl Into<String>, line_number: usize) -> Self {
        Self {
            file: file.into(),
            line_number,
        }
    }
}

/// Field name -> query usage sites
pub type FieldUsageIndex = BTreeMap<String, Vec<UsageSite>>;

/// Environment key -> referencing sites
pub type EnvKeyUsage = BTreeMap<String, Vec<UsageSite>>;

/// One matched external-service signature occurrence
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "camelCase")]
pub struct IntegrationHit {
    pub category: String,
    pub file: String,
    pub line_number: usize,
    pub snippet: String,
}

/// An inferred schema <-> query field correspondence group
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MappingEntry {
    pub normalized_key: String,
    pub schema_fields: BTreeSet<String>,
    pub query_fields: BTreeSet<String>,
}

/// Finding classifications across all detectors
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Classification {
    #[serde(rename = "IN_USE")]
    InUse,
    #[serde(rename = "BROKEN")]
    Broken,
    #[serde(rename = "OBSOLETE")]
    Obsolete,
    #[serde(rename = "DUPLICATE")]
    Duplicate,
    #[serde(rename = "missingField")]
    MissingField,
    #[serde(rename = "unsafeAccess")]
    UnsafeAccess,
    #[serde(rename = "idempotency")]
    Idempotency,
    #[serde(rename = "payloadAccess")]
    PayloadAccess,
    #[serde(rename = "schemaMismatch")]
    SchemaMismatch,
}

/// A piece of evidence attached to a finding
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Evidence {
    #[serde(rename = "type")]
    pub kind: String,
    pub detail: String,
    pub file: String,
    pub line_number: usize,
}

/// A detector or cross-reference finding
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Finding {
    pub classification: Classification,
    pub reason: String,
    pub file: String,
    pub line_numbers: Vec<usize>,
    pub evidence: Vec<Evidence>,
}

impl Finding {
    pub fn new(classification: Classification, reason: impl Into<String>, file: impl Into<String>) -> Self {
        Self {
            classification,
            reason: reason.into(),
            file: file.into(),
            line_numbers: Vec::new(),
            evidence: Vec::new(),
        }
    }

    pub fn at_line(mut self, line: usize) -> Self {
        if !self.line_numbers.contains(&line) {
            self.line_numbers.push(line);
        }
        self
    }

    pub fn with_evidence(mut self, kind: impl Into<String>, detail: impl Into<String>, line: usize) -> Self {
        self.evidence.push(Evidence {
            kind: kind.into(),
            detail: detail.into(),
            file: self.file.clone(),
            line_number: line,
        });
        self
    }
}

/// Outcome of a single pipeline step
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum StepStatus {
    Pass,
    Warn,
    Fail,
    Skipped,
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepStatus::Pass => write!(f, "PASS"),
            StepStatus::Warn => write!(f, "WARN"),
            StepStatus::Fail => write!(f, "FAIL"),
            StepStatus::Skipped => write!(f, "SKIPPED"),
        }
    }
}

/// The immutable artifact a step leaves behind
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub step: String,
    pub status: StepStatus,
    pub requires_enforcement: bool,
    pub generated_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub payload: serde_json::Value,
}

impl StepResult {
    pub fn new(
        step: impl Into<String>,
        status: StepStatus,
        requires_enforcement: bool,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            step: step.into(),
            status,
            requires_enforcement,
            generated_at: chrono::Utc::now().to_rfc3339(),
            reason: None,
            payload,
        }
    }

    pub fn skipped(step: impl Into<String>, reason: impl Into<String>) -> Self {
        let mut result = Self::new(step, StepStatus::Skipped, false, serde_json::Value::Null);
        result.reason = Some(reason.into());
        result
    }

    pub fn failed(step: impl Into<String>, reason: impl Into<String>) -> Self {
        let mut result = Self::new(step, StepStatus::Fail, false, serde_json::Value::Null);
        result.reason = Some(reason.into());
        result
    }
}

/// Enforcement phase of a step
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum EnforcementPhase {
    /// Advisory only: violations never fail the gate
    Warn,
    /// Violations fail the gate
    #[default]
    Block,
}

impl fmt::Display for EnforcementPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnforcementPhase::Warn => write!(f, "WARN"),
            EnforcementPhase::Block => write!(f, "BLOCK"),
        }
    }
}

/// Overall gate status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum VerdictStatus {
    Pass,
    Fail,
}

/// Gate decision derived from the collected step results
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Verdict {
    pub status: VerdictStatus,
    pub reasons: Vec<String>,
    pub phased_enforcement: BTreeMap<String, String>,
}

impl Verdict {
    pub fn is_fail(&self) -> bool {
        self.status == VerdictStatus::Fail
    }
}

/// Best-effort extraction outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extracted<T> {
    Complete(T),
    Partial { value: T, reason: String },
}

impl<T> Extracted<T> {
    pub fn value(&self) -> &T {
        match self {
            Extracted::Complete(value) | Extracted::Partial { value, .. } => value,
        }
    }

    pub fn is_partial(&self) -> bool {
        matches!(self, Extracted::Partial { .. })
    }

    pub fn partial_reason(&self) -> Option<&str> {
        match self {
            Extracted::Complete(_) => None,
            Extracted::Partial { reason, .. } => Some(reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_unions_and_keeps_required_subset() {
        let mut a = SchemaType::new("order", SchemaKind::Object, "studio/schemas/a.ts");
        a.add_field("status", true);
        a.add_field("total", false);

        let mut b = SchemaType::new("order", SchemaKind::Document, "studio/schemas/b.ts");
        b.add_field("customer", false);
        b.required.insert("email".to_string());
        b.partial = true;

        a.merge(b);

        let fields: Vec<_> = a.fields.iter().map(String::as_str).collect();
        assert_eq!(fields, vec!["customer", "email", "status", "total"]);
        assert!(a.required.is_subset(&a.fields));
        assert_eq!(a.kind, SchemaKind::Document);
        assert_eq!(a.sources.len(), 2);
        assert!(a.partial);
    }

    #[test]
    fn test_step_status_serializes_uppercase() {
        let result = StepResult::skipped("runtime-sample", "no credentials");
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], "SKIPPED");
        assert_eq!(json["requiresEnforcement"], false);
        assert_eq!(json["reason"], "no credentials");
    }

    #[test]
    fn test_classification_names() {
        let json = serde_json::to_value([Classification::InUse, Classification::MissingField]).unwrap();
        assert_eq!(json, serde_json::json!(["IN_USE", "missingField"]));
    }

    #[test]
    fn test_finding_lines_deduplicate() {
        let finding = Finding::new(Classification::Idempotency, "no guard", "fn/webhook.ts")
            .at_line(3)
            .at_line(3)
            .with_evidence("sideEffect", "client.create(", 3);
        assert_eq!(finding.line_numbers, vec![3]);
        assert_eq!(finding.evidence[0].file, "fn/webhook.ts");
    }
}
