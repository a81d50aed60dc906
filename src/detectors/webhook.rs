// SPDX-License-Identifier: AGPL-3.0-or-later

//! Webhook-handler classification
//!
//! A file is a handler when its path sits in a webhook location and no
//! exclusion applies, or, failing the path test, when its content shows a
//! handler export, signature verification and an event-shape access together.

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

const HANDLER_LOCATIONS: &[&str] = &[
    "**/netlify/functions/**/*webhook*",
    "**/functions/**/*webhook*",
    "**/api/**/*webhook*",
    "**/webhooks/**",
    "**/webhook/**",
];

const EXCLUDED_LOCATIONS: &[&str] = &[
    "**/schemas/**",
    "**/schemaTypes/**",
    "**/components/**",
    "**/*.md",
    "**/*.mdx",
    "**/docs/**",
    "**/test/**",
    "**/tests/**",
    "**/__tests__/**",
    "**/*.test.*",
    "**/*.spec.*",
    "**/debug/**",
    "**/*debug*",
];

fn globset(patterns: &[&str]) -> GlobSet {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(
            GlobBuilder::new(pattern)
                .case_insensitive(true)
                .literal_separator(false)
                .build()
                .unwrap(),
        );
    }
    builder.build().unwrap()
}

static ALLOWLIST: Lazy<GlobSet> = Lazy::new(|| globset(HANDLER_LOCATIONS));
static EXCLUSIONS: Lazy<GlobSet> = Lazy::new(|| globset(EXCLUDED_LOCATIONS));

static TEST_OR_DEBUG: Lazy<GlobSet> = Lazy::new(|| {
    globset(&[
        "**/test/**",
        "**/tests/**",
        "**/__tests__/**",
        "**/*.test.*",
        "**/*.spec.*",
        "**/debug/**",
        "**/*debug*",
    ])
});

static UI_IMPORT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?m)(?:from\s+|require\(\s*)['"](?:react|react-dom|next/(?:link|image|router|navigation)|vue|svelte|@sanity/ui|styled-components)(?:/[^'"]*)?['"]"#)
        .unwrap()
});

static HANDLER_EXPORT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"export\s+(?:const|async\s+function|function|let)\s+(?:handler|POST|default)\b|export\s+default\s+(?:async\s+)?function|exports\.handler\s*=|module\.exports\s*=")
        .unwrap()
});

static SIGNATURE_VERIFICATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)constructEvent(?:Async)?\s*\(|stripe-signature|x-shopify-hmac-sha256|x-hub-signature|x-webhook-signature|sanity-webhook-signature|paypal-transmission-sig|\bverify\w*Signature\w*\s*\(|\bisValidSignature\s*\(|\bvalidateWebhook\w*\s*\(")
        .unwrap()
});

static PAYLOAD_OBJECT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\w+\??\.data\??\.object\b|\bevent\??\.type\b").unwrap());

static MEMBER_READ: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b([A-Za-z_$][\w$]*)\??\.(id|type)\b").unwrap());

/// How a file came to be classified as a handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HandlerMatch {
    Path,
    Content,
}

/// The three independent content signals
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentSignals {
    pub handler_export: bool,
    pub signature_verification: bool,
    pub event_shape: bool,
}

impl ContentSignals {
    pub fn all(&self) -> bool {
        self.handler_export && self.signature_verification && self.event_shape
    }
}

pub fn is_test_or_debug_path(relative: &str) -> bool {
    TEST_OR_DEBUG.is_match(relative)
}

fn is_excluded(relative: &str, text: &str) -> bool {
    if EXCLUSIONS.is_match(relative) || UI_IMPORT.is_match(text) {
        return true;
    }
    relative.ends_with(".d.ts") && !text.to_lowercase().contains("webhook")
}

/// Evaluate the content signals of a file
pub fn content_signals(text: &str) -> ContentSignals {
    ContentSignals {
        handler_export: HANDLER_EXPORT.is_match(text),
        signature_verification: SIGNATURE_VERIFICATION.is_match(text),
        event_shape: has_event_shape(text),
    }
}

/// Both `.id` and `.type` read off the same identifier, or a payload/event-type access
fn has_event_shape(text: &str) -> bool {
    if PAYLOAD_OBJECT.is_match(text) {
        return true;
    }
    let mut reads: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for caps in MEMBER_READ.captures_iter(text) {
        if let (Some(object), Some(member)) = (caps.get(1), caps.get(2)) {
            let members = reads.entry(object.as_str()).or_default();
            members.insert(member.as_str());
            if members.len() == 2 {
                return true;
            }
        }
    }
    false
}

/// Classify one file; `relative` is the path inside its repository
pub fn classify(relative: &str, text: &str) -> Option<HandlerMatch> {
    if ALLOWLIST.is_match(relative) {
        return (!is_excluded(relative, text)).then_some(HandlerMatch::Path);
    }
    if is_excluded(relative, text) {
        return None;
    }
    content_signals(text).all().then_some(HandlerMatch::Content)
}

pub fn is_webhook_handler(relative: &str, text: &str) -> bool {
    classify(relative, text).is_some()
}
