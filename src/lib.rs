// SPDX-License-Identifier: AGPL-3.0-or-later

//! Schemabot - Content Commerce Consistency Auditor
//!
//! Statically audits a set of repositories (storefront, serverless functions,
//! content studio) for drift between content schemas, the queries that read
//! them, the webhook handlers that write them and the provider APIs they call.
//! Every step writes a canonical JSON artifact and a single verdict gates CI.

pub mod artifacts;
pub mod config;
pub mod detectors;
pub mod integrations;
pub mod literal;
pub mod mapping;
pub mod model;
pub mod pipeline;
pub mod query;
pub mod remediation;
pub mod report;
pub mod scanner;
pub mod schema_index;
pub mod steps;
pub mod store;
pub mod verdict;

pub use config::Config;
pub use model::{StepResult, StepStatus, Verdict, VerdictStatus};
pub use pipeline::{execute, AuditContext, RunOutcome, Selection};
