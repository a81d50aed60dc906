// SPDX-License-Identifier: AGPL-3.0-or-later

//! Cross-reference steps and the names every pipeline step is recorded under

pub mod api_contracts;
pub mod env_matrix;
pub mod external_ids;
pub mod runtime_sample;
pub mod schema_vs_query;
pub mod webhook_report;

pub const SCHEMA_INDEX: &str = "schema-index";
pub const QUERY_INDEX: &str = "query-index";
pub const INTEGRATIONS_INVENTORY: &str = "integrations-inventory";
pub const MAPPING_INDEX: &str = "mapping-index";
pub const SCHEMA_VS_QUERY: &str = "schema-vs-query";
pub const EXTERNAL_ID_INTEGRITY: &str = "external-id-integrity";
pub const ENV_RESOLUTION_MATRIX: &str = "env-resolution-matrix";
pub const WEBHOOK_DRIFT_REPORT: &str = "webhook-drift-report";
pub const API_CONTRACT_VIOLATIONS: &str = "api-contract-violations";
pub const RUNTIME_SAMPLE: &str = "runtime-sample";

/// Every step, in dependency order
pub const ALL_STEPS: &[&str] = &[
    SCHEMA_INDEX,
    QUERY_INDEX,
    INTEGRATIONS_INVENTORY,
    MAPPING_INDEX,
    SCHEMA_VS_QUERY,
    EXTERNAL_ID_INTEGRITY,
    ENV_RESOLUTION_MATRIX,
    WEBHOOK_DRIFT_REPORT,
    API_CONTRACT_VIOLATIONS,
    RUNTIME_SAMPLE,
];

/// Store system fields (`_id`, `_type`, ...) take no part in diffs
pub fn is_system_field(name: &str) -> bool {
    name.starts_with('_')
}
