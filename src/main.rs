// SPDX-License-Identifier: AGPL-3.0-or-later

//! Schemabot - Content Commerce Consistency Auditor
//!
//! Audits storefront, function and studio repositories for schema, query,
//! webhook and provider-contract drift, and gates CI on the verdict.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::info;

use schemabot::config::Config;
use schemabot::pipeline::{self, AuditContext, Selection};
use schemabot::report::{OutputFormat, Reporter};

/// Consistency auditor for content-driven commerce repositories
#[derive(Parser, Debug)]
#[command(name = "schemabot")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the audit root
    #[arg(short, long, default_value = ".", global = true)]
    path: PathBuf,

    /// Configuration file (defaults to <path>/schemabot.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Artifact output root (defaults to <path>/.schemabot)
    #[arg(short, long, global = true)]
    out: Option<PathBuf>,

    /// Output format of the summary printed to stdout
    #[arg(short, long, default_value = "text", global = true)]
    format: OutputFormat,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run every step; fails only when a step threw
    Run,

    /// Run every step and fail on a FAIL verdict
    Ci,

    /// Schema and query consistency steps
    Schema,

    /// Webhook and provider-contract steps
    Contracts,

    /// Integration inventory and environment resolution steps
    Env,
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Commands::Run => "run",
            Commands::Ci => "ci",
            Commands::Schema => "schema",
            Commands::Contracts => "contracts",
            Commands::Env => "env",
        }
    }

    fn selection(&self) -> Selection {
        match self {
            Commands::Run | Commands::Ci => Selection::All,
            Commands::Schema => Selection::Schema,
            Commands::Contracts => Selection::Contracts,
            Commands::Env => Selection::Env,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging on stderr so stdout stays parseable
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("schemabot={}", log_level).into()),
        )
        .init();

    info!("Schemabot v{}", env!("CARGO_PKG_VERSION"));

    let root = cli
        .path
        .canonicalize()
        .with_context(|| format!("Audit root {} not found", cli.path.display()))?;
    info!("Auditing from: {}", root.display());

    let (config, base) = Config::load(cli.config.as_deref(), &root).context("Failed to load configuration")?;
    let out = cli.out.clone().unwrap_or_else(|| root.join(".schemabot"));

    let process_env: BTreeMap<String, String> = std::env::vars().collect();
    let ctx = AuditContext::prepare(config, &base, process_env).await?;
    let outcome = pipeline::execute(&ctx, cli.command.selection(), cli.command.name(), &out).await?;

    Reporter::new(cli.format).output(&outcome.summary, None)?;

    if !outcome.integrity_errors.is_empty() {
        std::process::exit(1);
    }
    if matches!(cli.command, Commands::Ci) && outcome.verdict.is_fail() {
        std::process::exit(1);
    }

    Ok(())
}
