// SPDX-License-Identifier: AGPL-3.0-or-later

//! Idempotency-guard detection for webhook handlers.
//!
//! File scope: a guard anywhere in the file suppresses the finding, even one
//! that appears after the side effect.

use once_cell::sync::Lazy;
use regex::Regex;

use super::webhook::is_test_or_debug_path;
use crate::model::{Classification, Finding};
use crate::scanner::{line_of, snippet_at};

static SIDE_EFFECTS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    [
        ("documentCreate", r"\b\w*(?:[Cc]lient|sanity)\w*\s*\.\s*create(?:OrReplace)?\s*\("),
        ("patchSet", r"\.patch\s*\([^)]*\)\s*\.\s*set\s*\("),
        ("emailSend", r"\b(?:sgMail|resend\.emails|transporter|postmark\w*|mailer)\s*\.\s*send(?:Mail|Email)?\s*\("),
        ("paymentCreate", r"\bstripe\s*\.\s*\w+\s*\.\s*create\s*\("),
        ("shippingCreate", r"\bshippo\s*\.\s*\w+\s*\.\s*create\s*\("),
    ]
    .into_iter()
    .map(|(kind, pattern)| (kind, Regex::new(pattern).unwrap()))
    .collect()
});

static GUARDS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"\bcreateIfNotExists\s*\(",
        r"(?s)\.fetch\s*\(.{0,200}?(?:event|evt|payload)\w*\??\.id\b",
        r"\bif\s*\(\s*existing\w*\b",
        r"(?i)idempoten",
        r"(?i)processedEvents?\b",
    ]
    .into_iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

/// The first side-effecting call, if any
fn first_side_effect(text: &str) -> Option<(&'static str, usize)> {
    SIDE_EFFECTS
        .iter()
        .filter_map(|(kind, re)| re.find(text).map(|m| (*kind, m.start())))
        .min_by_key(|(_, offset)| *offset)
}

pub fn has_guard(text: &str) -> bool {
    GUARDS.iter().any(|re| re.is_match(text))
}

/// At most one finding per handler file
pub fn check_handler(file: &str, relative: &str, text: &str) -> Option<Finding> {
    if is_test_or_debug_path(relative) {
        return None;
    }
    let (kind, offset) = first_side_effect(text)?;
    if has_guard(text) {
        return None;
    }
    let line = line_of(text, offset);
    let mut finding = Finding::new(
        Classification::Idempotency,
        "Side effect without an idempotency guard; a redelivered event repeats it",
        file,
    )
    .at_line(line)
    .with_evidence(kind, snippet_at(text, offset), line);

    for (other_kind, re) in SIDE_EFFECTS.iter() {
        for m in re.find_iter(text).filter(|m| m.start() != offset) {
            let other_line = line_of(text, m.start());
            finding = finding
                .at_line(other_line)
                .with_evidence(*other_kind, snippet_at(text, m.start()), other_line);
        }
    }
    finding.line_numbers.sort_unstable();
    Some(finding)
}
