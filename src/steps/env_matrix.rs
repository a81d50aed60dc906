// SPDX-License-Identifier: AGPL-3.0-or-later

//! Environment resolution matrix: where each referenced key gets its value,
//! per repository. Values are never recorded.

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tokio::fs;
use tracing::debug;

use crate::model::{EnvKeyUsage, RepoDescriptor, StepResult, StepStatus, UsageSite};

/// One environment file. Values stay in memory for credential lookup and are never serialized.
#[derive(Clone, PartialEq, Eq)]
pub struct EnvFile {
    pub name: String,
    vars: BTreeMap<String, String>,
}

impl EnvFile {
    pub fn new(name: impl Into<String>, vars: BTreeMap<String, String>) -> Self {
        Self {
            name: name.into(),
            vars,
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.vars.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.vars.keys()
    }
}

impl std::fmt::Debug for EnvFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvFile")
            .field("name", &self.name)
            .field("keys", &self.vars.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Parse a dotenv-style file; comments, blanks and `export` prefixes are tolerated
pub fn parse_env_file(content: &str) -> BTreeMap<String, String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let line = line.strip_prefix("export ").unwrap_or(line);
            let (key, value) = line.split_once('=')?;
            let key = key.trim();
            let valid = !key.is_empty()
                && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
                && !key.starts_with(|c: char| c.is_ascii_digit());
            valid.then(|| (key.to_string(), unquote(value.trim()).to_string()))
        })
        .collect()
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\'', '`'] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

/// Merge env files in order (earlier files win), then let the process environment win over all
pub fn merged_env(process_env: &BTreeMap<String, String>, env_files: &[EnvFile]) -> BTreeMap<String, String> {
    let mut merged = BTreeMap::new();
    for file in env_files.iter().rev() {
        for (key, value) in &file.vars {
            merged.insert(key.clone(), value.clone());
        }
    }
    for (key, value) in process_env {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

/// Read whichever of `names` exist in `root`, keeping the configured order
pub async fn load_env_files(root: &Path, names: &[String]) -> Result<Vec<EnvFile>> {
    let mut files = Vec::new();
    for name in names {
        let path = root.join(name);
        if !fs::try_exists(&path).await.unwrap_or(false) {
            continue;
        }
        let content = fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read env file {}", path.display()))?;
        debug!("Loaded env file {}", path.display());
        files.push(EnvFile::new(name.clone(), parse_env_file(&content)));
    }
    Ok(files)
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct KeyResolution {
    /// `process`, `file:<name>` or `missing`
    pub source: String,
    pub references: Vec<UsageSite>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct RepoMatrix {
    pub env_files: Vec<String>,
    pub keys: BTreeMap<String, KeyResolution>,
    pub unused_declared: BTreeSet<String>,
}

impl RepoMatrix {
    pub fn missing(&self) -> impl Iterator<Item = &String> {
        self.keys
            .iter()
            .filter(|(_, r)| r.source == "missing")
            .map(|(k, _)| k)
    }
}

/// Resolve every key one repository references. The process environment wins over files.
pub fn resolve_repo(usage: &EnvKeyUsage, env_files: &[EnvFile], process_env: &BTreeMap<String, String>) -> RepoMatrix {
    let keys = usage
        .iter()
        .map(|(key, sites)| {
            let source = if process_env.contains_key(key) {
                "process".to_string()
            } else {
                env_files
                    .iter()
                    .find(|f| f.contains(key))
                    .map(|f| format!("file:{}", f.name))
                    .unwrap_or_else(|| "missing".to_string())
            };
            (
                key.clone(),
                KeyResolution {
                    source,
                    references: sites.clone(),
                },
            )
        })
        .collect();

    let unused_declared = env_files
        .iter()
        .flat_map(|f| f.keys())
        .filter(|k| !usage.contains_key(*k))
        .cloned()
        .collect();

    RepoMatrix {
        env_files: env_files.iter().map(|f| f.name.clone()).collect(),
        keys,
        unused_declared,
    }
}

pub fn run(step: &str, matrices: &BTreeMap<String, RepoMatrix>, skipped: &[&RepoDescriptor]) -> StepResult {
    let missing: usize = matrices.values().map(|m| m.missing().count()).sum();
    let resolved: usize = matrices.values().map(|m| m.keys.len()).sum::<usize>() - missing;
    let skipped_repos: BTreeMap<&str, &str> = skipped
        .iter()
        .map(|r| (r.name.as_str(), r.status.as_str()))
        .collect();
    StepResult::new(
        step,
        if missing > 0 { StepStatus::Warn } else { StepStatus::Pass },
        missing > 0,
        json!({
            "repos": matrices,
            "skippedRepos": skipped_repos,
            "stats": {
                "resolved": resolved,
                "missing": missing,
            },
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_env_file() {
        let vars = parse_env_file(
            "# comment\nSANITY_PROJECT_ID=abc\n\nexport SANITY_DATASET = \"production\"\nnot a line\n1BAD=x\nEMPTY=\n",
        );
        let keys: Vec<_> = vars.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["EMPTY", "SANITY_DATASET", "SANITY_PROJECT_ID"]);
        assert_eq!(vars["SANITY_DATASET"], "production");
    }

    #[test]
    fn test_resolution_order() {
        let mut usage = EnvKeyUsage::new();
        for key in ["A", "B", "C", "D"] {
            usage.insert(key.to_string(), vec![UsageSite::new("web/src/env.ts", 1)]);
        }
        let vars = |keys: &[&str]| -> BTreeMap<String, String> {
            keys.iter().map(|k| (k.to_string(), "secret".to_string())).collect()
        };
        let files = vec![
            EnvFile::new(".env", vars(&["B", "C", "UNUSED"])),
            EnvFile::new(".env.local", vars(&["C", "D"])),
        ];
        let mut process = BTreeMap::new();
        process.insert("A".to_string(), "secret".to_string());
        process.insert("B".to_string(), "secret".to_string());

        let matrix = resolve_repo(&usage, &files, &process);
        assert_eq!(matrix.keys["A"].source, "process");
        assert_eq!(matrix.keys["B"].source, "process");
        assert_eq!(matrix.keys["C"].source, "file:.env");
        assert_eq!(matrix.keys["D"].source, "file:.env.local");
        assert!(matrix.unused_declared.contains("UNUSED"));
        assert_eq!(matrix.missing().count(), 0);

        let json = serde_json::to_string(&matrix).unwrap();
        assert!(!json.contains("secret"));
        assert!(!format!("{:?}", files).contains("secret"));
    }

    #[test]
    fn test_merged_env_precedence() {
        let files = vec![
            EnvFile::new(".env", [("K".to_string(), "base".to_string())].into_iter().collect()),
            EnvFile::new(".env.local", [("K".to_string(), "local".to_string())].into_iter().collect()),
        ];
        assert_eq!(merged_env(&BTreeMap::new(), &files)["K"], "base");
        let process: BTreeMap<String, String> = [("K".to_string(), "process".to_string())].into_iter().collect();
        assert_eq!(merged_env(&process, &files)["K"], "process");
    }

    #[test]
    fn test_missing_key_requires_enforcement() {
        let mut usage = EnvKeyUsage::new();
        usage.insert("STRIPE_SECRET_KEY".into(), vec![UsageSite::new("fn/a.ts", 2)]);
        let mut matrices = BTreeMap::new();
        matrices.insert("fn".to_string(), resolve_repo(&usage, &[], &BTreeMap::new()));
        let result = run("env-resolution-matrix", &matrices, &[]);
        assert!(result.requires_enforcement);
        assert_eq!(result.payload["stats"]["missing"], 1);
    }

    #[tokio::test]
    async fn test_load_env_files_in_configured_order() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join(".env.local"), "LOCAL=1\n").unwrap();
        std::fs::write(dir.path().join(".env"), "BASE=1\n").unwrap();
        let names = vec![".env".to_string(), ".env.local".to_string(), ".env.production".to_string()];
        let files = load_env_files(dir.path(), &names).await.unwrap();
        let loaded: Vec<_> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(loaded, vec![".env", ".env.local"]);
    }
}
