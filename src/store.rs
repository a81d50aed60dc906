// SPDX-License-Identifier: AGPL-3.0-or-later

//! Read-only document-store sampling
//!
//! The store is consulted by a single step and only when credentials are
//! present in the merged environment.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

use crate::config::StoreConfig;

/// Read-only access to stored documents
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch up to `limit` documents of `doc_type`
    async fn sample(&self, doc_type: &str, limit: usize) -> Result<Vec<Value>>;

    /// Human-readable target, never containing credentials
    fn describe(&self) -> String;
}

/// Store credentials resolved from the environment
#[derive(Clone)]
pub struct StoreCredentials {
    pub project_id: String,
    pub dataset: String,
    pub token: Option<String>,
}

impl std::fmt::Debug for StoreCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreCredentials")
            .field("project_id", &self.project_id)
            .field("dataset", &self.dataset)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl StoreCredentials {
    /// `None` unless both project id and dataset are set and non-empty
    pub fn from_env(env: &BTreeMap<String, String>, config: &StoreConfig) -> Option<Self> {
        let get = |key: &str| env.get(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        Some(Self {
            project_id: get(&config.project_id_key)?,
            dataset: get(&config.dataset_key)?,
            token: get(&config.token_key),
        })
    }
}

/// HTTP query client for the hosted content store
pub struct SanityStore {
    client: Client,
    credentials: StoreCredentials,
    base_url: String,
}

impl SanityStore {
    pub fn new(credentials: StoreCredentials, config: &StoreConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent("schemabot")
            .build()
            .context("Failed to build store HTTP client")?;
        let base_url = format!(
            "https://{}.api.sanity.io/v{}/data/query/{}",
            credentials.project_id,
            config.api_version.trim_start_matches('v'),
            credentials.dataset
        );
        Ok(Self {
            client,
            credentials,
            base_url,
        })
    }
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    result: Value,
}

#[async_trait]
impl DocumentStore for SanityStore {
    async fn sample(&self, doc_type: &str, limit: usize) -> Result<Vec<Value>> {
        let query = format!("*[_type == $type][0...{}]", limit);
        let type_param = serde_json::to_string(doc_type)?;
        debug!("Sampling {} documents of type {}", limit, doc_type);

        let mut request = self
            .client
            .get(&self.base_url)
            .query(&[("query", query.as_str()), ("$type", type_param.as_str())]);
        if let Some(token) = &self.credentials.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.context("Store request failed")?;
        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("Store responded with HTTP {}", status));
        }
        let body: QueryResponse = response.json().await.context("Malformed store response")?;
        match body.result {
            Value::Array(docs) => Ok(docs),
            Value::Null => Ok(Vec::new()),
            other => Err(anyhow!("Unexpected store result shape: {}", other)),
        }
    }

    fn describe(&self) -> String {
        format!(
            "{}.api.sanity.io dataset {}",
            self.credentials.project_id, self.credentials.dataset
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_credentials_require_project_and_dataset() {
        let config = StoreConfig::default();
        assert!(StoreCredentials::from_env(&env(&[]), &config).is_none());
        assert!(StoreCredentials::from_env(&env(&[("SANITY_PROJECT_ID", "abc")]), &config).is_none());
        assert!(StoreCredentials::from_env(
            &env(&[("SANITY_PROJECT_ID", "abc"), ("SANITY_DATASET", "  ")]),
            &config
        )
        .is_none());

        let creds = StoreCredentials::from_env(
            &env(&[("SANITY_PROJECT_ID", "abc"), ("SANITY_DATASET", "production")]),
            &config,
        )
        .unwrap();
        assert_eq!(creds.project_id, "abc");
        assert!(creds.token.is_none());
    }

    #[test]
    fn test_debug_redacts_token() {
        let creds = StoreCredentials {
            project_id: "abc".into(),
            dataset: "production".into(),
            token: Some("sk-secret".into()),
        };
        assert!(!format!("{:?}", creds).contains("sk-secret"));
    }

    #[test]
    fn test_endpoint() {
        let creds = StoreCredentials {
            project_id: "abc".into(),
            dataset: "production".into(),
            token: None,
        };
        let store = SanityStore::new(creds, &StoreConfig::default()).unwrap();
        assert_eq!(store.base_url, "https://abc.api.sanity.io/v2023-10-01/data/query/production");
        assert_eq!(store.describe(), "abc.api.sanity.io dataset production");
    }
}
