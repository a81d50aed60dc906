// SPDX-License-Identifier: AGPL-3.0-or-later

//! Repository file scanning and the in-memory workspace of loaded sources

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::ScanConfig;
use crate::model::RepoDescriptor;

/// Directories that are never scanned, whatever the globs say
const ALWAYS_IGNORED: &[&str] = &[
    "node_modules",
    ".git",
    "dist",
    "build",
    ".next",
    ".netlify",
    "out",
    "coverage",
    ".sanity",
    ".schemabot",
];

/// Files above this size are skipped (bundles, fixtures)
const MAX_FILE_BYTES: u64 = 2 * 1024 * 1024;

/// File roles the scanner classifies by
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileRole {
    /// Any source file
    Code,
    /// Schema definition sources
    Schema,
}

/// Compiled scan rules
pub struct ScanRules {
    extensions: BTreeSet<String>,
    schemas: GlobSet,
    ignores: GlobSet,
}

impl ScanRules {
    pub fn new(config: &ScanConfig) -> Result<Self> {
        Ok(Self {
            extensions: config
                .code_extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_lowercase())
                .collect(),
            schemas: build_globset(&config.schema_globs).context("invalid schema_globs")?,
            ignores: build_globset(&config.extra_ignores).context("invalid extra_ignores")?,
        })
    }

    fn matches_role(&self, relative: &str, role: FileRole) -> bool {
        match role {
            FileRole::Code => true,
            FileRole::Schema => self.schemas.is_match(relative),
        }
    }

    fn is_code(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| self.extensions.contains(&e.to_lowercase()))
            .unwrap_or(false)
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("bad glob '{}'", pattern))?);
    }
    Ok(builder.build()?)
}

fn is_ignored(name: &str) -> bool {
    ALWAYS_IGNORED.contains(&name)
}

/// Forward-slash relative path, the form every glob and report uses
pub fn normalize_relative(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Enumerate the files of one repository that play `role`.
///
/// A repository that is not `OK` yields nothing.
pub fn scan_repository(repo: &RepoDescriptor, role: FileRole, rules: &ScanRules) -> Vec<String> {
    if !repo.is_ok() {
        debug!("Skipping repository {} ({})", repo.name, repo.status);
        return Vec::new();
    }

    let mut files = BTreeSet::new();
    for entry in WalkDir::new(&repo.path)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_ignored(e.file_name().to_str().unwrap_or("")))
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file() || !rules.is_code(entry.path()) {
            continue;
        }
        let relative = normalize_relative(&repo.path, entry.path());
        if rules.ignores.is_match(&relative) {
            continue;
        }
        if rules.matches_role(&relative, role) {
            files.insert(relative);
        }
    }

    files.into_iter().collect()
}

/// A loaded source file
#[derive(Debug, Clone)]
pub struct SourceFile {
    /// Owning repository name
    pub repo: String,
    /// Path relative to the repository root
    pub relative: String,
    /// `<repo>/<relative>`, the identity used in every artifact
    pub display: String,
    pub text: String,
}

impl SourceFile {
    pub fn new(repo: impl Into<String>, relative: impl Into<String>, text: impl Into<String>) -> Self {
        let repo = repo.into();
        let relative = relative.into();
        Self {
            display: format!("{}/{}", repo, relative),
            repo,
            relative,
            text: text.into(),
        }
    }
}

/// Every file the indexing stage visited, keyed by display path
#[derive(Debug, Clone, Default)]
pub struct Workspace {
    pub repos: Vec<RepoDescriptor>,
    files: BTreeMap<String, SourceFile>,
    schemas: BTreeSet<String>,
}

impl Workspace {
    /// Scan and read every OK repository
    pub fn load(repos: &[RepoDescriptor], rules: &ScanRules) -> Self {
        let mut workspace = Self {
            repos: repos.to_vec(),
            ..Self::default()
        };

        for repo in repos {
            if !repo.is_ok() {
                warn!("Repository {} skipped: {}", repo.name, repo.status);
                continue;
            }

            let code = scan_repository(repo, FileRole::Code, rules);
            let schemas: BTreeSet<String> =
                scan_repository(repo, FileRole::Schema, rules).into_iter().collect();

            let loaded: Vec<SourceFile> = code
                .par_iter()
                .filter_map(|relative| read_source(repo, relative))
                .collect();

            info!(
                "Repository {}: {} code files, {} schema files",
                repo.name,
                loaded.len(),
                schemas.len()
            );

            for file in loaded {
                if schemas.contains(&file.relative) {
                    workspace.schemas.insert(file.display.clone());
                }
                workspace.files.insert(file.display.clone(), file);
            }
        }

        workspace
    }

    /// Files playing `role`, in display-path order
    pub fn files(&self, role: FileRole) -> Vec<&SourceFile> {
        match role {
            FileRole::Code => self.files.values().collect(),
            FileRole::Schema => self.schemas.iter().filter_map(|k| self.files.get(k)).collect(),
        }
    }

    pub fn ok_repos(&self) -> impl Iterator<Item = &RepoDescriptor> {
        self.repos.iter().filter(|r| r.is_ok())
    }
}

fn read_source(repo: &RepoDescriptor, relative: &str) -> Option<SourceFile> {
    let path = repo.path.join(relative);
    match std::fs::metadata(&path) {
        Ok(meta) if meta.len() > MAX_FILE_BYTES => {
            debug!("Skipping oversized file {}", path.display());
            return None;
        }
        Err(e) => {
            debug!("Cannot stat {}: {}", path.display(), e);
            return None;
        }
        _ => {}
    }
    match std::fs::read(&path) {
        Ok(bytes) => Some(SourceFile::new(
            repo.name.clone(),
            relative,
            String::from_utf8_lossy(&bytes).into_owned(),
        )),
        Err(e) => {
            debug!("Cannot read {}: {}", path.display(), e);
            None
        }
    }
}

/// 1-based line number of a byte offset
pub fn line_of(text: &str, offset: usize) -> usize {
    let end = offset.min(text.len());
    text.as_bytes()[..end].iter().filter(|&&b| b == b'\n').count() + 1
}

/// The trimmed source line holding `offset`, capped for artifact readability
pub fn snippet_at(text: &str, offset: usize) -> String {
    let offset = offset.min(text.len());
    let start = text[..offset].rfind('\n').map(|i| i + 1).unwrap_or(0);
    let end = text[offset..].find('\n').map(|i| offset + i).unwrap_or(text.len());
    let line = text[start..end].trim();
    if line.chars().count() > 160 {
        let cut: String = line.chars().take(157).collect();
        format!("{}...", cut)
    } else {
        line.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{RepoRole, REPO_OK};
    use std::fs;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn repo(root: &Path, status: &str) -> RepoDescriptor {
        RepoDescriptor {
            name: "shop".to_string(),
            role: RepoRole::Monorepo,
            path: root.to_path_buf(),
            status: status.to_string(),
        }
    }

    #[test]
    fn test_scan_roles_and_ignores() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(root, "netlify/functions/stripe-webhook.ts", "export const handler = 1");
        write(root, "studio/schemas/order.ts", "export default {}");
        write(root, "src/lib/util.js", "");
        write(root, "node_modules/stripe/index.js", "");
        write(root, "dist/bundle.js", "");
        write(root, "README.md", "");

        let rules = ScanRules::new(&ScanConfig::default()).unwrap();
        let repo = repo(root, REPO_OK);

        let code = scan_repository(&repo, FileRole::Code, &rules);
        assert_eq!(
            code,
            vec![
                "netlify/functions/stripe-webhook.ts".to_string(),
                "src/lib/util.js".to_string(),
                "studio/schemas/order.ts".to_string(),
            ]
        );
        assert_eq!(
            scan_repository(&repo, FileRole::Schema, &rules),
            vec!["studio/schemas/order.ts".to_string()]
        );
    }

    #[test]
    fn test_non_ok_repo_yields_nothing() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "netlify/functions/a.ts", "");
        let rules = ScanRules::new(&ScanConfig::default()).unwrap();
        let repo = repo(dir.path(), "MISSING: gone");
        assert!(scan_repository(&repo, FileRole::Code, &rules).is_empty());

        let workspace = Workspace::load(&[repo], &rules);
        assert!(workspace.files(FileRole::Code).is_empty());
    }

    #[test]
    fn test_workspace_display_paths() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "api/orders.ts", "const x = 1;\n");
        write(dir.path(), "schemaTypes/order.ts", "export default {}\n");
        let rules = ScanRules::new(&ScanConfig::default()).unwrap();
        let workspace = Workspace::load(&[repo(dir.path(), REPO_OK)], &rules);
        let code: Vec<_> = workspace.files(FileRole::Code).iter().map(|f| f.display.as_str()).collect();
        assert_eq!(code, vec!["shop/api/orders.ts", "shop/schemaTypes/order.ts"]);
        let schemas = workspace.files(FileRole::Schema);
        assert_eq!(schemas.len(), 1);
        assert_eq!(schemas[0].relative, "schemaTypes/order.ts");
    }

    #[test]
    fn test_line_and_snippet() {
        let text = "a\n  b = event.data.object;\nc";
        let offset = text.find("event").unwrap();
        assert_eq!(line_of(text, offset), 2);
        assert_eq!(snippet_at(text, offset), "b = event.data.object;");
    }
}
