// SPDX-License-Identifier: AGPL-3.0-or-later

//! External-service usage inventory and environment-variable references

use once_cell::sync::Lazy;
use rayon::prelude::*;
use regex::Regex;
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};

use crate::model::{EnvKeyUsage, IntegrationHit, StepResult, StepStatus, UsageSite};
use crate::scanner::{line_of, snippet_at, SourceFile};

/// One signature per provider category
const SIGNATURES: &[(&str, &str)] = &[
    ("payment:stripe", r#"from\s+['"]stripe['"]|require\(\s*['"]stripe['"]\s*\)|\bnew\s+Stripe\s*\(|\bstripe\.\w+"#),
    ("payment:paypal", r#"@paypal/|api(?:-m)?\.(?:sandbox\.)?paypal\.com|\bpaypal\.\w+"#),
    ("shipping:shippo", r#"from\s+['"]shippo['"]|require\(\s*['"]shippo['"]\s*\)|\bshippo\.\w+|api\.goshippo\.com"#),
    ("shipping:easypost", r#"@easypost/api|\bnew\s+EasyPost\s*\(|api\.easypost\.com"#),
    ("email:sendgrid", r#"@sendgrid/mail|\bsgMail\.\w+|api\.sendgrid\.com"#),
    ("email:resend", r#"from\s+['"]resend['"]|\bnew\s+Resend\s*\(|\bresend\.emails\."#),
    ("email:postmark", r#"from\s+['"]postmark['"]|require\(\s*['"]postmark['"]\s*\)|api\.postmarkapp\.com"#),
    ("email:nodemailer", r#"['"]nodemailer['"]|\.sendMail\s*\("#),
    ("store:sanity", r#"@sanity/client|['"]next-sanity['"]|\.api\.sanity\.io|\bsanityClient\b"#),
    ("commerce:shopify", r#"@shopify/|\.myshopify\.com"#),
];

static SIGNATURE_PATTERNS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    SIGNATURES
        .iter()
        .map(|(category, pattern)| (*category, Regex::new(pattern).unwrap()))
        .collect()
});

/// process.env.KEY / process.env['KEY']
static PROCESS_ENV: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"process\.env\.([A-Za-z_][A-Za-z0-9_]*)|process\.env\[\s*['"]([A-Za-z_][A-Za-z0-9_]*)['"]\s*\]"#)
        .unwrap()
});

/// import.meta.env.KEY
static BUILD_ENV: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"import\.meta\.env\.([A-Za-z_][A-Za-z0-9_]*)").unwrap());

/// Hits and env references across all scanned code
#[derive(Debug, Clone, Default)]
pub struct IntegrationsInventory {
    pub hits: Vec<IntegrationHit>,
    pub env_keys: EnvKeyUsage,
    /// The same references split per owning repository
    pub env_keys_by_repo: BTreeMap<String, EnvKeyUsage>,
}

struct FileScan {
    repo: String,
    hits: Vec<IntegrationHit>,
    env: Vec<(String, UsageSite)>,
}

impl IntegrationsInventory {
    pub fn build(files: &[&SourceFile]) -> Self {
        let scans: Vec<FileScan> = files.par_iter().map(|file| scan_file(file)).collect();

        let mut hits = Vec::new();
        let mut env_keys = EnvKeyUsage::new();
        let mut env_keys_by_repo: BTreeMap<String, EnvKeyUsage> = BTreeMap::new();
        for scan in scans {
            hits.extend(scan.hits);
            for (key, site) in scan.env {
                env_keys_by_repo
                    .entry(scan.repo.clone())
                    .or_default()
                    .entry(key.clone())
                    .or_default()
                    .push(site.clone());
                env_keys.entry(key).or_default().push(site);
            }
        }

        hits.sort();
        hits.dedup();
        for sites in env_keys.values_mut().chain(
            env_keys_by_repo
                .values_mut()
                .flat_map(|usage| usage.values_mut()),
        ) {
            sites.sort();
            sites.dedup();
        }

        Self {
            hits,
            env_keys,
            env_keys_by_repo,
        }
    }

    pub fn categories(&self) -> BTreeSet<&str> {
        self.hits.iter().map(|h| h.category.as_str()).collect()
    }

    pub fn to_step_result(&self, step: &str) -> StepResult {
        let mut per_category: BTreeMap<&str, usize> = BTreeMap::new();
        for hit in &self.hits {
            *per_category.entry(hit.category.as_str()).or_insert(0) += 1;
        }
        StepResult::new(
            step,
            StepStatus::Pass,
            false,
            json!({
                "hits": self.hits,
                "envKeys": self.env_keys,
                "stats": {
                    "filesPerCategory": per_category,
                    "envKeyCount": self.env_keys.len(),
                },
            }),
        )
    }
}

fn scan_file(file: &SourceFile) -> FileScan {
    let text = &file.text;
    let mut hits = Vec::new();
    for (category, pattern) in SIGNATURE_PATTERNS.iter() {
        if let Some(m) = pattern.find(text) {
            hits.push(IntegrationHit {
                category: category.to_string(),
                file: file.display.clone(),
                line_number: line_of(text, m.start()),
                snippet: snippet_at(text, m.start()),
            });
        }
    }

    let mut env = Vec::new();
    for pattern in [&*PROCESS_ENV, &*BUILD_ENV] {
        for caps in pattern.captures_iter(text) {
            let Some(key) = caps.get(1).or_else(|| caps.get(2)) else {
                continue;
            };
            env.push((
                key.as_str().to_string(),
                UsageSite::new(file.display.clone(), line_of(text, key.start())),
            ));
        }
    }

    FileScan {
        repo: file.repo.clone(),
        hits,
        env,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_match_per_category() {
        let file = SourceFile::new(
            "functions",
            "netlify/functions/checkout.ts",
            "import Stripe from 'stripe'\nconst stripe = new Stripe(process.env.STRIPE_SECRET_KEY)\nstripe.checkout.sessions.create({})\n",
        );
        let inventory = IntegrationsInventory::build(&[&file]);
        let stripe: Vec<_> = inventory
            .hits
            .iter()
            .filter(|h| h.category == "payment:stripe")
            .collect();
        assert_eq!(stripe.len(), 1);
        assert_eq!(stripe[0].line_number, 1);
        assert_eq!(stripe[0].snippet, "import Stripe from 'stripe'");
    }

    #[test]
    fn test_env_references_both_forms() {
        let file = SourceFile::new(
            "web",
            "src/env.ts",
            "const a = process.env.SANITY_PROJECT_ID\nconst b = process.env['SANITY_DATASET']\nconst c = import.meta.env.PUBLIC_URL\nconst d = process.env.SANITY_PROJECT_ID",
        );
        let inventory = IntegrationsInventory::build(&[&file]);
        let keys: Vec<_> = inventory.env_keys.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["PUBLIC_URL", "SANITY_DATASET", "SANITY_PROJECT_ID"]);
        assert_eq!(inventory.env_keys["SANITY_PROJECT_ID"].len(), 2);
        assert_eq!(inventory.env_keys_by_repo["web"]["PUBLIC_URL"][0].line_number, 3);
    }

    #[test]
    fn test_no_signature_no_hit() {
        let file = SourceFile::new("web", "src/a.ts", "export const x = 1");
        let inventory = IntegrationsInventory::build(&[&file]);
        assert!(inventory.hits.is_empty());
        assert!(inventory.categories().is_empty());
    }
}
