// SPDX-License-Identifier: AGPL-3.0-or-later

//! Run artifacts: one canonical JSON file per step under a timestamped
//! run directory, each with a SHA-256 content digest

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// File in the output root naming the most recent run directory
pub const LATEST_FILE: &str = "latest";

/// Recursively order object keys
pub fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut sorted = Map::new();
            for (key, value) in entries {
                sorted.insert(key, sort_keys(value));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}

/// Pretty JSON with recursively sorted keys and a trailing newline
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String> {
    let value = sort_keys(serde_json::to_value(value)?);
    let mut text = serde_json::to_string_pretty(&value)?;
    text.push('\n');
    Ok(text)
}

pub fn digest(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}

/// Writer bound to one run directory
#[derive(Debug)]
pub struct ArtifactWriter {
    root: PathBuf,
    run_dir: PathBuf,
    digests: BTreeMap<String, String>,
}

impl ArtifactWriter {
    /// Create `<root>/<UTC timestamp>/`, suffixed when a run in the same second exists
    pub async fn create(root: &Path) -> Result<Self> {
        let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%SZ").to_string();
        fs::create_dir_all(root)
            .await
            .with_context(|| format!("Failed to create output root {}", root.display()))?;

        let mut run_dir = root.join(&stamp);
        let mut n = 1;
        while fs::try_exists(&run_dir).await.unwrap_or(false) {
            run_dir = root.join(format!("{}-{}", stamp, n));
            n += 1;
        }
        fs::create_dir_all(&run_dir)
            .await
            .with_context(|| format!("Failed to create run directory {}", run_dir.display()))?;
        debug!("Run directory {}", run_dir.display());

        Ok(Self {
            root: root.to_path_buf(),
            run_dir,
            digests: BTreeMap::new(),
        })
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    /// Write `<name>.json` canonically; returns its digest
    pub async fn write_json<T: Serialize>(&mut self, name: &str, value: &T) -> Result<String> {
        let content = canonical_json(value)?;
        self.write_text(&format!("{}.json", name), &content).await
    }

    /// Write a text artifact at a path relative to the run directory; returns its digest
    pub async fn write_text(&mut self, relative: &str, content: &str) -> Result<String> {
        let path = self.run_dir.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, content)
            .await
            .with_context(|| format!("Failed to write artifact {}", path.display()))?;
        let sum = digest(content.as_bytes());
        self.digests.insert(relative.to_string(), sum.clone());
        Ok(sum)
    }

    pub fn digest_of(&self, relative: &str) -> Option<&str> {
        self.digests.get(relative).map(String::as_str)
    }

    /// Point `<root>/latest` at this run
    pub async fn mark_latest(&self) -> Result<()> {
        let name = self
            .run_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        fs::write(self.root.join(LATEST_FILE), format!("{}\n", name))
            .await
            .context("Failed to update latest run pointer")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_keys_sorted_recursively() {
        let text = canonical_json(&json!({ "b": 1, "a": { "z": [ { "y": 1, "x": 2 } ], "c": null } })).unwrap();
        let a = text.find("\"a\"").unwrap();
        let b = text.find("\"b\"").unwrap();
        let c = text.find("\"c\"").unwrap();
        let z = text.find("\"z\"").unwrap();
        let x = text.find("\"x\"").unwrap();
        let y = text.find("\"y\"").unwrap();
        assert!(a < b && c < z && x < y);
        assert!(text.ends_with('\n'));
    }

    #[test]
    fn test_digest_is_stable() {
        assert_eq!(
            digest(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn test_writer_layout() {
        let dir = TempDir::new().unwrap();
        let mut writer = ArtifactWriter::create(dir.path()).await.unwrap();
        let sum = writer.write_json("schema-index", &json!({ "k": 1 })).await.unwrap();
        writer.write_text("prompts/functions-webhooks.txt", "hi").await.unwrap();
        writer.mark_latest().await.unwrap();

        let written = std::fs::read_to_string(writer.run_dir().join("schema-index.json")).unwrap();
        assert_eq!(digest(written.as_bytes()), sum);
        assert_eq!(writer.digest_of("schema-index.json"), Some(sum.as_str()));
        assert!(writer.run_dir().join("prompts/functions-webhooks.txt").exists());

        let latest = std::fs::read_to_string(dir.path().join(LATEST_FILE)).unwrap();
        assert_eq!(dir.path().join(latest.trim()), writer.run_dir());
    }

    #[tokio::test]
    async fn test_same_second_runs_get_distinct_dirs() {
        let dir = TempDir::new().unwrap();
        let first = ArtifactWriter::create(dir.path()).await.unwrap();
        let second = ArtifactWriter::create(dir.path()).await.unwrap();
        assert_ne!(first.run_dir(), second.run_dir());
    }
}
