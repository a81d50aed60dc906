// SPDX-License-Identifier: AGPL-3.0-or-later

//! Step orchestration
//!
//! Steps run sequentially in dependency order. Each step is isolated: an
//! error or panic becomes a `FAIL` result plus an integrity error, and the
//! pipeline moves on. A step whose inputs produced no result is `SKIPPED`.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::artifacts::ArtifactWriter;
use crate::config::Config;
use crate::detectors::webhook_handlers;
use crate::integrations::IntegrationsInventory;
use crate::mapping::MappingIndex;
use crate::model::{RepoDescriptor, StepResult, Verdict};
use crate::query::QueryIndex;
use crate::remediation::build_prompts;
use crate::report::{format_markdown, RunSummary};
use crate::scanner::{FileRole, ScanRules, SourceFile, Workspace};
use crate::schema_index::SchemaIndex;
use crate::steps::env_matrix::{self, EnvFile};
use crate::steps::{
    api_contracts, external_ids, runtime_sample, schema_vs_query, webhook_report, API_CONTRACT_VIOLATIONS,
    ENV_RESOLUTION_MATRIX, EXTERNAL_ID_INTEGRITY, INTEGRATIONS_INVENTORY, MAPPING_INDEX, QUERY_INDEX,
    RUNTIME_SAMPLE, SCHEMA_INDEX, SCHEMA_VS_QUERY, WEBHOOK_DRIFT_REPORT,
};
use crate::store::{DocumentStore, SanityStore, StoreCredentials};
use crate::verdict::aggregate;

/// Which steps a command runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    All,
    Schema,
    Contracts,
    Env,
}

impl Selection {
    pub fn steps(&self) -> &'static [&'static str] {
        match self {
            Selection::All => crate::steps::ALL_STEPS,
            Selection::Schema => &[SCHEMA_INDEX, QUERY_INDEX, MAPPING_INDEX, SCHEMA_VS_QUERY],
            Selection::Contracts => &[SCHEMA_INDEX, WEBHOOK_DRIFT_REPORT, API_CONTRACT_VIOLATIONS],
            Selection::Env => &[INTEGRATIONS_INVENTORY, ENV_RESOLUTION_MATRIX],
        }
    }

    pub fn includes(&self, step: &str) -> bool {
        self.steps().contains(&step)
    }
}

/// Everything a run reads, fixed before the first step starts
pub struct AuditContext {
    pub config: Config,
    pub workspace: Workspace,
    pub process_env: BTreeMap<String, String>,
    /// Env files found per repository, in configured order
    pub env_files: BTreeMap<String, Vec<EnvFile>>,
    pub store: Option<Arc<dyn DocumentStore>>,
}

impl AuditContext {
    /// Resolve repositories, load every source file and env file, and
    /// build a store client when credentials are present
    pub async fn prepare(config: Config, base: &Path, process_env: BTreeMap<String, String>) -> Result<Self> {
        let repos = config.repo_descriptors(base);
        let rules = ScanRules::new(&config.scan)?;
        let workspace = Workspace::load(&repos, &rules);

        let mut env_files = BTreeMap::new();
        for repo in workspace.ok_repos() {
            let files = env_matrix::load_env_files(&repo.path, &config.env_files)
                .await
                .unwrap_or_else(|e| {
                    warn!("Env files of {} unreadable: {:#}", repo.name, e);
                    Vec::new()
                });
            env_files.insert(repo.name.clone(), files);
        }

        let declared: Vec<EnvFile> = env_files.values().flatten().cloned().collect();
        let merged = env_matrix::merged_env(&process_env, &declared);
        let store: Option<Arc<dyn DocumentStore>> = match StoreCredentials::from_env(&merged, &config.store) {
            Some(credentials) => {
                let store = SanityStore::new(credentials, &config.store)?;
                debug!("Document store configured: {}", store.describe());
                Some(Arc::new(store))
            }
            None => None,
        };

        Ok(Self {
            config,
            workspace,
            process_env,
            env_files,
            store,
        })
    }

    /// Replace the document store
    pub fn with_store(mut self, store: Option<Arc<dyn DocumentStore>>) -> Self {
        self.store = store;
        self
    }
}

/// Result of one complete run
#[derive(Debug)]
pub struct RunOutcome {
    pub verdict: Verdict,
    pub results: Vec<StepResult>,
    pub integrity_errors: Vec<String>,
    pub summary: RunSummary,
    pub run_dir: PathBuf,
}

impl RunOutcome {
    pub fn result(&self, step: &str) -> Option<&StepResult> {
        self.results.iter().find(|r| r.step == step)
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("step panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("step panicked: {}", s)
    } else {
        "step panicked".to_string()
    }
}

/// Run `f`, turning an error or a panic into a message
fn isolate<T>(f: impl FnOnce() -> Result<T>) -> Result<T, String> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(format!("{:#}", e)),
        Err(payload) => Err(panic_message(payload)),
    }
}

fn skipped_for(step: &str, inputs: &[&str]) -> StepResult {
    StepResult::skipped(step, format!("input step(s) {} produced no result", inputs.join(", ")))
}

struct Recorder {
    writer: ArtifactWriter,
    results: Vec<StepResult>,
    integrity_errors: Vec<String>,
}

impl Recorder {
    /// Persist a finished step
    async fn record(&mut self, result: StepResult, started: Instant) -> Result<()> {
        info!(
            "Step {} finished: {} in {} ms",
            result.step,
            result.status,
            started.elapsed().as_millis()
        );
        if let Some(reason) = &result.reason {
            debug!("Step {} reason: {}", result.step, reason);
        }
        self.writer.write_json(&result.step, &result).await?;
        self.results.push(result);
        Ok(())
    }

    fn failure(&mut self, step: &str, message: String) -> StepResult {
        warn!("Step {} threw: {}", step, message);
        self.integrity_errors.push(format!("{}: {}", step, message));
        StepResult::failed(step, message)
    }

    /// Run an index builder; the index is kept only when it was built
    async fn index<T>(
        &mut self,
        step: &str,
        build: impl FnOnce() -> Result<T>,
        describe: impl FnOnce(&T) -> StepResult,
    ) -> Result<Option<T>> {
        let started = Instant::now();
        info!("Running step {}", step);
        match isolate(build) {
            Ok(index) => {
                self.record(describe(&index), started).await?;
                Ok(Some(index))
            }
            Err(message) => {
                let failed = self.failure(step, message);
                self.record(failed, started).await?;
                Ok(None)
            }
        }
    }

    /// Run a step that produces its result directly
    async fn step(&mut self, step: &str, run: impl FnOnce() -> Result<StepResult>) -> Result<()> {
        let started = Instant::now();
        info!("Running step {}", step);
        let result = match isolate(run) {
            Ok(result) => result,
            Err(message) => self.failure(step, message),
        };
        self.record(result, started).await
    }

    async fn skip(&mut self, result: StepResult) -> Result<()> {
        self.record(result, Instant::now()).await
    }
}

/// Run the selected steps and write every artifact under `out_root`
pub async fn execute(ctx: &AuditContext, selection: Selection, command: &str, out_root: &Path) -> Result<RunOutcome> {
    let writer = ArtifactWriter::create(out_root).await?;
    let mut rec = Recorder {
        writer,
        results: Vec::new(),
        integrity_errors: Vec::new(),
    };
    let workspace = &ctx.workspace;
    let code = workspace.files(FileRole::Code);
    let schema_files = workspace.files(FileRole::Schema);
    let non_schema: Vec<&SourceFile> = code
        .iter()
        .copied()
        .filter(|f| !schema_files.iter().any(|s| s.display == f.display))
        .collect();

    // Indices
    let schema = if selection.includes(SCHEMA_INDEX) {
        rec.index(SCHEMA_INDEX, || SchemaIndex::build(&schema_files), |i| i.to_step_result(SCHEMA_INDEX))
            .await?
    } else {
        None
    };
    let queries = if selection.includes(QUERY_INDEX) {
        rec.index(QUERY_INDEX, || Ok(QueryIndex::build(&code)), |i| i.to_step_result(QUERY_INDEX))
            .await?
    } else {
        None
    };
    let integrations = if selection.includes(INTEGRATIONS_INVENTORY) {
        rec.index(
            INTEGRATIONS_INVENTORY,
            || Ok(IntegrationsInventory::build(&code)),
            |i| i.to_step_result(INTEGRATIONS_INVENTORY),
        )
        .await?
    } else {
        None
    };

    // Cross-reference
    if selection.includes(MAPPING_INDEX) {
        match (&schema, &queries) {
            (Some(s), Some(q)) => {
                rec.step(MAPPING_INDEX, || {
                    Ok(MappingIndex::build(s, q, integrations.as_ref()).to_step_result(MAPPING_INDEX))
                })
                .await?
            }
            _ => rec.skip(skipped_for(MAPPING_INDEX, &[SCHEMA_INDEX, QUERY_INDEX])).await?,
        }
    }

    if selection.includes(SCHEMA_VS_QUERY) {
        match (&schema, &queries) {
            (Some(s), Some(q)) => {
                rec.step(SCHEMA_VS_QUERY, || Ok(schema_vs_query::run(SCHEMA_VS_QUERY, s, q)))
                    .await?
            }
            _ => rec.skip(skipped_for(SCHEMA_VS_QUERY, &[SCHEMA_INDEX, QUERY_INDEX])).await?,
        }
    }

    if selection.includes(EXTERNAL_ID_INTEGRITY) {
        match (&schema, &queries) {
            (Some(s), Some(q)) => {
                rec.step(EXTERNAL_ID_INTEGRITY, || {
                    Ok(external_ids::run(EXTERNAL_ID_INTEGRITY, s, q, &non_schema))
                })
                .await?
            }
            _ => {
                rec.skip(skipped_for(EXTERNAL_ID_INTEGRITY, &[SCHEMA_INDEX, QUERY_INDEX]))
                    .await?
            }
        }
    }

    if selection.includes(ENV_RESOLUTION_MATRIX) {
        match &integrations {
            Some(inventory) => {
                rec.step(ENV_RESOLUTION_MATRIX, || {
                    let mut matrices = BTreeMap::new();
                    for repo in workspace.ok_repos() {
                        let usage = inventory.env_keys_by_repo.get(&repo.name).cloned().unwrap_or_default();
                        let files = ctx.env_files.get(&repo.name).map(Vec::as_slice).unwrap_or(&[]);
                        matrices.insert(
                            repo.name.clone(),
                            env_matrix::resolve_repo(&usage, files, &ctx.process_env),
                        );
                    }
                    let skipped: Vec<&RepoDescriptor> = workspace.repos.iter().filter(|r| !r.is_ok()).collect();
                    Ok(env_matrix::run(ENV_RESOLUTION_MATRIX, &matrices, &skipped))
                })
                .await?
            }
            None => {
                rec.skip(skipped_for(ENV_RESOLUTION_MATRIX, &[INTEGRATIONS_INVENTORY]))
                    .await?
            }
        }
    }

    // Detectors
    if selection.includes(WEBHOOK_DRIFT_REPORT) {
        rec.step(WEBHOOK_DRIFT_REPORT, || {
            let handlers = webhook_handlers(&code);
            debug!("{} webhook handlers classified", handlers.len());
            Ok(webhook_report::run(WEBHOOK_DRIFT_REPORT, &handlers))
        })
        .await?;
    }

    if selection.includes(API_CONTRACT_VIOLATIONS) {
        match &schema {
            Some(s) => {
                rec.step(API_CONTRACT_VIOLATIONS, || {
                    Ok(api_contracts::run(API_CONTRACT_VIOLATIONS, &code, &s.field_union()))
                })
                .await?
            }
            None => {
                rec.skip(skipped_for(API_CONTRACT_VIOLATIONS, &[SCHEMA_INDEX]))
                    .await?
            }
        }
    }

    if selection.includes(RUNTIME_SAMPLE) {
        match &schema {
            Some(s) => {
                let started = Instant::now();
                info!("Running step {}", RUNTIME_SAMPLE);
                let store = ctx.store.clone();
                let index = s.clone();
                let sample_size = ctx.config.store.sample_size;
                let handle = tokio::spawn(async move {
                    runtime_sample::run(RUNTIME_SAMPLE, store.as_deref(), &index, sample_size).await
                });
                let result = match handle.await {
                    Ok(result) => result,
                    Err(e) => rec.failure(RUNTIME_SAMPLE, format!("step aborted: {}", e)),
                };
                rec.record(result, started).await?;
            }
            None => rec.skip(skipped_for(RUNTIME_SAMPLE, &[SCHEMA_INDEX])).await?,
        }
    }

    // Aggregation
    let verdict = aggregate(&rec.results, &ctx.config.enforcement);
    info!("Verdict: {:?} ({} reasons)", verdict.status, verdict.reasons.len());
    rec.writer.write_json("verdict", &verdict).await?;

    let run_name = rec
        .writer
        .run_dir()
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let digests: BTreeMap<String, String> = rec
        .results
        .iter()
        .filter_map(|r| {
            rec.writer
                .digest_of(&format!("{}.json", r.step))
                .map(|d| (r.step.clone(), d.to_string()))
        })
        .collect();

    let summary = RunSummary::new(
        run_name.clone(),
        command,
        &workspace.repos,
        &rec.results,
        |step| digests.get(step).cloned(),
        &verdict,
        &rec.integrity_errors,
    );
    rec.writer.write_json("summary", &summary).await?;
    rec.writer
        .write_text("summary.md", &format_markdown(&summary))
        .await?;

    for prompt in build_prompts(&ctx.config.remediation, &rec.results, &digests, &run_name) {
        rec.writer
            .write_text(&format!("prompts/{}", prompt.file_name()), &prompt.text)
            .await
            .with_context(|| format!("Failed to write prompt for {}", prompt.repository))?;
    }

    rec.writer.mark_latest().await?;
    let run_dir = rec.writer.run_dir().to_path_buf();
    info!("Artifacts written to {}", run_dir.display());

    Ok(RunOutcome {
        verdict,
        results: rec.results,
        integrity_errors: rec.integrity_errors,
        summary,
        run_dir,
    })
}
