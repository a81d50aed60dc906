// SPDX-License-Identifier: AGPL-3.0-or-later

//! Static audit configuration (`schemabot.toml`)

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use crate::model::{EnforcementPhase, RepoDescriptor, RepoRole, REPO_OK};
use crate::steps;

/// Default config file name looked up in the audit root
pub const CONFIG_FILE: &str = "schemabot.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("repository name '{0}' is declared more than once")]
    DuplicateRepo(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub repos: Vec<RepoConfig>,
    pub scan: ScanConfig,
    pub enforcement: EnforcementConfig,
    pub store: StoreConfig,
    pub remediation: Vec<RemediationTarget>,
    pub env_files: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoConfig {
    pub name: String,
    pub role: RepoRole,
    /// Relative to the directory holding the config file
    pub path: PathBuf,
    /// Forces a non-OK status, e.g. `"DISABLED: archived"`
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub schema_globs: Vec<String>,
    pub code_extensions: Vec<String>,
    pub extra_ignores: Vec<String>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            schema_globs: vec![
                "**/schemas/**".to_string(),
                "**/schemaTypes/**".to_string(),
                "**/schema/**".to_string(),
            ],
            code_extensions: ["js", "jsx", "ts", "tsx", "mjs", "cjs"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            extra_ignores: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnforcementConfig {
    pub phases: BTreeMap<String, EnforcementPhase>,
}

impl Default for EnforcementConfig {
    fn default() -> Self {
        let phases = [
            steps::ENV_RESOLUTION_MATRIX,
            steps::EXTERNAL_ID_INTEGRITY,
            steps::RUNTIME_SAMPLE,
        ]
        .iter()
        .map(|step| (step.to_string(), EnforcementPhase::Warn))
        .collect();
        Self { phases }
    }
}

impl EnforcementConfig {
    /// Steps without an explicit phase block the gate
    pub fn phase_for(&self, step: &str) -> EnforcementPhase {
        self.phases.get(step).copied().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub project_id_key: String,
    pub dataset_key: String,
    pub token_key: String,
    pub api_version: String,
    pub timeout_secs: u64,
    pub sample_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            project_id_key: "SANITY_PROJECT_ID".to_string(),
            dataset_key: "SANITY_DATASET".to_string(),
            token_key: "SANITY_API_TOKEN".to_string(),
            api_version: "2023-10-01".to_string(),
            timeout_secs: 10,
            sample_size: 25,
        }
    }
}

/// One entry of the remediation prompt table
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemediationTarget {
    pub repository: String,
    pub scope: String,
    /// Step names whose artifacts the downstream agent must consult
    pub inputs: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            repos: Vec::new(),
            scan: ScanConfig::default(),
            enforcement: EnforcementConfig::default(),
            store: StoreConfig::default(),
            remediation: default_remediation("functions", "studio"),
            env_files: [".env", ".env.local", ".env.development", ".env.production", ".env.example"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl Config {
    /// Config auditing `root` as a single monorepo
    pub fn for_single_repo(root: &Path) -> Self {
        let name = root
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("repo")
            .to_string();
        Self {
            repos: vec![RepoConfig {
                name: name.clone(),
                role: RepoRole::Monorepo,
                path: PathBuf::from("."),
                status: None,
            }],
            remediation: default_remediation(&name, &name),
            ..Self::default()
        }
    }

    pub fn from_toml(content: &str, path: &Path) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        let mut seen = HashSet::new();
        for repo in &config.repos {
            if !seen.insert(repo.name.as_str()) {
                return Err(ConfigError::DuplicateRepo(repo.name.clone()));
            }
        }
        Ok(config)
    }

    /// Load the configuration and the directory repo paths are relative to.
    ///
    /// An explicit path must exist; otherwise `<root>/schemabot.toml` is used when
    /// present and a single-repo default when not.
    pub fn load(explicit: Option<&Path>, root: &Path) -> Result<(Self, PathBuf), ConfigError> {
        let candidate = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => {
                let default_path = root.join(CONFIG_FILE);
                default_path.exists().then_some(default_path)
            }
        };

        let Some(path) = candidate else {
            debug!("No {} found, auditing {} as a single repository", CONFIG_FILE, root.display());
            return Ok((Self::for_single_repo(root), root.to_path_buf()));
        };

        let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        let mut config = Self::from_toml(&content, &path)?;
        let base = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| root.to_path_buf());
        if config.repos.is_empty() {
            let single = Self::for_single_repo(&base);
            config.repos = single.repos;
        }
        info!("Loaded config from {} ({} repositories)", path.display(), config.repos.len());
        Ok((config, base))
    }

    /// Resolve repository descriptors, marking unusable ones non-OK
    pub fn repo_descriptors(&self, base: &Path) -> Vec<RepoDescriptor> {
        self.repos
            .iter()
            .map(|repo| {
                let path = base.join(&repo.path);
                let status = match &repo.status {
                    Some(forced) if forced != REPO_OK => forced.clone(),
                    _ if !path.exists() => format!("MISSING: {} does not exist", path.display()),
                    _ if !path.is_dir() => format!("INVALID: {} is not a directory", path.display()),
                    _ => REPO_OK.to_string(),
                };
                RepoDescriptor {
                    name: repo.name.clone(),
                    role: repo.role,
                    path,
                    status,
                }
            })
            .collect()
    }
}

fn default_remediation(functions_repo: &str, studio_repo: &str) -> Vec<RemediationTarget> {
    vec![
        RemediationTarget {
            repository: functions_repo.to_string(),
            scope: "webhooks".to_string(),
            inputs: vec![
                steps::WEBHOOK_DRIFT_REPORT.to_string(),
                steps::API_CONTRACT_VIOLATIONS.to_string(),
            ],
        },
        RemediationTarget {
            repository: functions_repo.to_string(),
            scope: "env".to_string(),
            inputs: vec![
                steps::INTEGRATIONS_INVENTORY.to_string(),
                steps::ENV_RESOLUTION_MATRIX.to_string(),
            ],
        },
        RemediationTarget {
            repository: studio_repo.to_string(),
            scope: "schema".to_string(),
            inputs: vec![
                steps::SCHEMA_VS_QUERY.to_string(),
                steps::EXTERNAL_ID_INTEGRITY.to_string(),
            ],
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
            env_files = [".env"]

            [[repos]]
            name = "functions"
            role = "functions"
            path = "shop-functions"

            [[repos]]
            name = "studio"
            role = "studio"
            path = "shop-studio"
            status = "DISABLED: archived"

            [enforcement.phases]
            "api-contract-violations" = "WARN"

            [store]
            timeout_secs = 3
        "#;
        let config = Config::from_toml(toml, Path::new("schemabot.toml")).unwrap();
        assert_eq!(config.repos.len(), 2);
        assert_eq!(config.repos[0].role, RepoRole::Functions);
        assert_eq!(config.env_files, vec![".env".to_string()]);
        assert_eq!(config.store.timeout_secs, 3);
        assert_eq!(config.store.sample_size, 25);
        assert_eq!(
            config.enforcement.phase_for("api-contract-violations"),
            EnforcementPhase::Warn
        );
        assert_eq!(
            config.enforcement.phase_for("webhook-drift-report"),
            EnforcementPhase::Block
        );
    }

    #[test]
    fn test_default_phases() {
        let config = Config::default();
        assert_eq!(config.enforcement.phase_for(steps::ENV_RESOLUTION_MATRIX), EnforcementPhase::Warn);
        assert_eq!(config.enforcement.phase_for(steps::SCHEMA_VS_QUERY), EnforcementPhase::Block);
    }

    #[test]
    fn test_duplicate_repo_rejected() {
        let toml = r#"
            [[repos]]
            name = "a"
            role = "web"
            path = "a"

            [[repos]]
            name = "a"
            role = "web"
            path = "b"
        "#;
        let err = Config::from_toml(toml, Path::new("x.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateRepo(name) if name == "a"));
    }

    #[test]
    fn test_repo_descriptor_status() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("present")).unwrap();
        let config = Config {
            repos: vec![
                RepoConfig {
                    name: "present".to_string(),
                    role: RepoRole::Web,
                    path: PathBuf::from("present"),
                    status: None,
                },
                RepoConfig {
                    name: "absent".to_string(),
                    role: RepoRole::Web,
                    path: PathBuf::from("absent"),
                    status: None,
                },
                RepoConfig {
                    name: "disabled".to_string(),
                    role: RepoRole::Web,
                    path: PathBuf::from("present"),
                    status: Some("DISABLED: archived".to_string()),
                },
            ],
            ..Config::default()
        };
        let repos = config.repo_descriptors(dir.path());
        assert!(repos[0].is_ok());
        assert!(repos[1].status.starts_with("MISSING"));
        assert_eq!(repos[2].status, "DISABLED: archived");
    }
}
