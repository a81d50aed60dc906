// SPDX-License-Identifier: AGPL-3.0-or-later

//! Provider API contract checks.
//!
//! Each contract names a call signature and the fields its argument object
//! must carry. The argument is resolved from an inline object literal or,
//! for a bare identifier, from the file-scoped symbol table.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::literal::{balanced_end, leading_identifier, object_shape, skip_trivia, ObjectShape};
use crate::model::{Classification, Extracted, Finding};
use crate::scanner::{line_of, snippet_at};

/// A required argument field, or a group where any one alternative suffices
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequiredField {
    One(&'static str),
    AnyOf(&'static [&'static str]),
}

impl RequiredField {
    fn satisfied_by(&self, keys: &BTreeSet<String>) -> bool {
        match self {
            RequiredField::One(name) => keys.contains(*name),
            RequiredField::AnyOf(names) => names.iter().any(|n| keys.contains(*n)),
        }
    }
}

impl fmt::Display for RequiredField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequiredField::One(name) => write!(f, "{}", name),
            RequiredField::AnyOf(names) => write!(f, "one of {}", names.join(" | ")),
        }
    }
}

#[derive(Debug)]
pub struct Contract {
    pub service: &'static str,
    pub operation: &'static str,
    signature: &'static str,
    pub required: &'static [RequiredField],
}

use RequiredField::{AnyOf, One};

static CONTRACTS: &[Contract] = &[
    Contract {
        service: "stripe",
        operation: "checkout.sessions.create",
        signature: r"\bstripe\s*\.\s*checkout\s*\.\s*sessions\s*\.\s*create\s*\(",
        required: &[One("mode"), One("line_items"), AnyOf(&["success_url", "return_url"])],
    },
    Contract {
        service: "stripe",
        operation: "paymentIntents.create",
        signature: r"\bstripe\s*\.\s*paymentIntents\s*\.\s*create\s*\(",
        required: &[One("amount"), One("currency")],
    },
    Contract {
        service: "stripe",
        operation: "customers.create",
        signature: r"\bstripe\s*\.\s*customers\s*\.\s*create\s*\(",
        required: &[AnyOf(&["email", "phone"])],
    },
    Contract {
        service: "stripe",
        operation: "refunds.create",
        signature: r"\bstripe\s*\.\s*refunds\s*\.\s*create\s*\(",
        required: &[AnyOf(&["payment_intent", "charge"])],
    },
    Contract {
        service: "shippo",
        operation: "shipment.create",
        signature: r"\bshippo\s*\.\s*shipments?\s*\.\s*create\s*\(",
        required: &[One("address_from"), One("address_to"), One("parcels")],
    },
    Contract {
        service: "shippo",
        operation: "transaction.create",
        signature: r"\bshippo\s*\.\s*transactions?\s*\.\s*create\s*\(",
        required: &[AnyOf(&["rate", "shipment"])],
    },
    Contract {
        service: "sendgrid",
        operation: "send",
        signature: r"\bsgMail\s*\.\s*send\s*\(",
        required: &[One("to"), One("from"), AnyOf(&["subject", "templateId"])],
    },
    Contract {
        service: "resend",
        operation: "emails.send",
        signature: r"\bresend\s*\.\s*emails\s*\.\s*send\s*\(",
        required: &[One("from"), One("to"), One("subject")],
    },
    Contract {
        service: "postmark",
        operation: "sendEmail",
        signature: r"\.\s*sendEmail\s*\(",
        required: &[One("From"), One("To")],
    },
    Contract {
        service: "nodemailer",
        operation: "sendMail",
        signature: r"\.\s*sendMail\s*\(",
        required: &[One("to"), AnyOf(&["text", "html"])],
    },
];

static CONTRACT_PATTERNS: Lazy<Vec<(&'static Contract, Regex)>> = Lazy::new(|| {
    CONTRACTS
        .iter()
        .map(|c| (c, Regex::new(c.signature).unwrap()))
        .collect()
});

/// `name = {` / `const name: T = {`
static OBJECT_ASSIGNMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b([A-Za-z_$][\w$]*)\s*(?::\s*[\w$<>\[\]., |]+?)?\s*=\s*\{").unwrap()
});

static PERSISTED_WRITES: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    vec![
        (
            "create",
            Regex::new(r"\b\w*(?:[Cc]lient|sanity)\w*\s*\.\s*create(?:OrReplace|IfNotExists)?\s*\(").unwrap(),
        ),
        ("patch.set", Regex::new(r"\.patch\s*\([^)]*\)\s*\.\s*set\s*\(").unwrap()),
    ]
});

/// File-scoped table of object-literal assignments, built in one forward pass
#[derive(Debug, Default)]
pub struct SymbolTable {
    assignments: BTreeMap<String, Vec<(usize, ObjectShape)>>,
}

impl SymbolTable {
    pub fn build(text: &str) -> Self {
        let mut table = Self::default();
        for caps in OBJECT_ASSIGNMENT.captures_iter(text) {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            let open = whole.end() - 1;
            let Some(close) = balanced_end(text, open) else {
                continue;
            };
            table
                .assignments
                .entry(name.as_str().to_string())
                .or_default()
                .push((whole.start(), object_shape(&text[open..close])));
        }
        table
    }

    /// Field set of the latest assignment to `ident` before `before`
    pub fn resolve(&self, ident: &str, before: usize) -> Extracted<BTreeSet<String>> {
        let mut visiting = BTreeSet::new();
        self.resolve_inner(ident, before, &mut visiting)
    }

    fn latest(&self, ident: &str, before: usize) -> Option<&(usize, ObjectShape)> {
        self.assignments
            .get(ident)?
            .iter()
            .rev()
            .find(|(offset, _)| *offset < before)
    }

    fn resolve_inner(
        &self,
        ident: &str,
        before: usize,
        visiting: &mut BTreeSet<String>,
    ) -> Extracted<BTreeSet<String>> {
        if !visiting.insert(ident.to_string()) {
            return Extracted::Partial {
                value: BTreeSet::new(),
                reason: format!("cyclic spread through '{}'", ident),
            };
        }
        let Some((offset, shape)) = self.latest(ident, before) else {
            visiting.remove(ident);
            return Extracted::Partial {
                value: BTreeSet::new(),
                reason: format!("no object literal assigned to '{}'", ident),
            };
        };
        let resolved = self.expand(shape, *offset, visiting);
        visiting.remove(ident);
        resolved
    }

    /// Keys of `shape` plus everything its spreads resolve to
    pub fn expand(
        &self,
        shape: &ObjectShape,
        at: usize,
        visiting: &mut BTreeSet<String>,
    ) -> Extracted<BTreeSet<String>> {
        let mut keys = shape.keys.clone();
        let mut reasons: Vec<String> = shape
            .unresolved
            .iter()
            .map(|entry| format!("unresolvable entry '{}'", entry))
            .collect();
        for spread in &shape.spreads {
            match self.resolve_inner(spread, at, visiting) {
                Extracted::Complete(more) => keys.extend(more),
                Extracted::Partial { value, reason } => {
                    keys.extend(value);
                    reasons.push(reason);
                }
            }
        }
        if reasons.is_empty() {
            Extracted::Complete(keys)
        } else {
            Extracted::Partial {
                value: keys,
                reason: reasons.join("; "),
            }
        }
    }
}

/// Resolve the first argument of the call whose `(` ends at `after_paren`
fn resolve_argument(text: &str, call_start: usize, after_paren: usize, table: &SymbolTable) -> Extracted<BTreeSet<String>> {
    let start = skip_trivia(text, after_paren);
    if text.as_bytes().get(start) == Some(&b'{') {
        return match balanced_end(text, start) {
            Some(end) => table.expand(&object_shape(&text[start..end]), call_start, &mut BTreeSet::new()),
            None => Extracted::Partial {
                value: BTreeSet::new(),
                reason: "unterminated object literal".to_string(),
            },
        };
    }
    let rest = &text[start..];
    match leading_identifier(rest) {
        Some(ident) if rest[ident.len()..].trim_start().starts_with([',', ')']) => {
            table.resolve(ident, call_start)
        }
        _ => Extracted::Partial {
            value: BTreeSet::new(),
            reason: "argument is not an object literal or identifier".to_string(),
        },
    }
}

/// A call whose argument fields could only be partly recovered
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UnresolvedCall {
    pub file: String,
    pub line_number: usize,
    pub contract: String,
    pub missing: Vec<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct ContractReport {
    pub violations: Vec<Finding>,
    pub schema_mismatches: Vec<Finding>,
    pub unresolved: Vec<UnresolvedCall>,
    pub calls_checked: usize,
}

/// Check every contract call and every persisted write in one file
pub fn check_file(file: &str, text: &str, schema_fields: &BTreeSet<String>) -> ContractReport {
    let table = SymbolTable::build(text);
    let mut report = ContractReport::default();

    for (contract, pattern) in CONTRACT_PATTERNS.iter() {
        for m in pattern.find_iter(text) {
            report.calls_checked += 1;
            let resolved = resolve_argument(text, m.start(), m.end(), &table);
            let missing: Vec<String> = contract
                .required
                .iter()
                .filter(|r| !r.satisfied_by(resolved.value()))
                .map(|r| r.to_string())
                .collect();
            if missing.is_empty() {
                continue;
            }
            let line = line_of(text, m.start());
            let name = format!("{}.{}", contract.service, contract.operation);
            if let Some(reason) = resolved.partial_reason() {
                report.unresolved.push(UnresolvedCall {
                    file: file.to_string(),
                    line_number: line,
                    contract: name,
                    missing,
                    reason: reason.to_string(),
                });
                continue;
            }
            report.violations.push(
                Finding::new(
                    Classification::MissingField,
                    format!(
                        "{} is missing required {}; add {} to the call arguments",
                        name,
                        missing.join(", "),
                        if missing.len() == 1 { "it" } else { "them" }
                    ),
                    file,
                )
                .at_line(line)
                .with_evidence("contract", name, line)
                .with_evidence("call", snippet_at(text, m.start()), line),
            );
        }
    }

    if !schema_fields.is_empty() {
        for (kind, pattern) in PERSISTED_WRITES.iter() {
            for m in pattern.find_iter(text) {
                let resolved = resolve_argument(text, m.start(), m.end(), &table);
                let unknown: BTreeSet<&str> = resolved
                    .value()
                    .iter()
                    .filter(|k| !k.starts_with('_'))
                    .map(|k| k.split('.').next().unwrap_or(k))
                    .filter(|k| !schema_fields.contains(*k))
                    .collect();
                if unknown.is_empty() {
                    continue;
                }
                let line = line_of(text, m.start());
                let unknown: Vec<&str> = unknown.into_iter().collect();
                report.schema_mismatches.push(
                    Finding::new(
                        Classification::SchemaMismatch,
                        format!("{} writes fields absent from the schema: {}", kind, unknown.join(", ")),
                        file,
                    )
                    .at_line(line)
                    .with_evidence("persistedWrite", snippet_at(text, m.start()), line),
                );
            }
        }
    }

    report.violations.sort_by_key(|f| f.line_numbers.first().copied());
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema(fields: &[&str]) -> BTreeSet<String> {
        fields.iter().map(|f| f.to_string()).collect()
    }

    #[test]
    fn test_inline_literal_missing_field() {
        let text = r#"
const session = await stripe.checkout.sessions.create({
  mode: 'payment',
  success_url: `${origin}/thanks`,
})
"#;
        let report = check_file("fn/checkout.ts", text, &BTreeSet::new());
        assert_eq!(report.calls_checked, 1);
        assert_eq!(report.violations.len(), 1);
        let finding = &report.violations[0];
        assert_eq!(finding.classification, Classification::MissingField);
        assert!(finding.reason.contains("line_items"));
        assert_eq!(finding.line_numbers, vec![2]);
    }

    #[test]
    fn test_supplied_directly_or_by_spread() {
        let direct = "stripe.checkout.sessions.create({ mode: 'payment', line_items, return_url: u })";
        assert!(check_file("f", direct, &BTreeSet::new()).violations.is_empty());

        let spread = r#"
const base = { line_items: items, success_url: url }
stripe.checkout.sessions.create({ ...base, mode: 'payment' })
"#;
        assert!(check_file("f", spread, &BTreeSet::new()).violations.is_empty());
    }

    #[test]
    fn test_identifier_argument_uses_latest_assignment() {
        let text = r#"
let params = { amount: 100, currency: 'usd' }
params = { amount: 100 }
await stripe.paymentIntents.create(params)
"#;
        let report = check_file("f", text, &BTreeSet::new());
        assert_eq!(report.violations.len(), 1);
        assert!(report.violations[0].reason.contains("currency"));
    }

    #[test]
    fn test_transitive_spread_and_cycle_guard() {
        let text = r#"
const a = { to: 'x' }
const b = { ...a, from: 'y' }
const c = { ...b, subject: 'z' }
sgMail.send(c)
"#;
        assert!(check_file("f", text, &BTreeSet::new()).violations.is_empty());

        let table = SymbolTable::build("const x = { ...y }\nconst y = { ...x }\n");
        assert!(table.resolve("x", 1000).is_partial());
    }

    #[test]
    fn test_partial_resolution_is_unresolved_not_violation() {
        let text = "sgMail.send(buildMessage(order))";
        let report = check_file("f", text, &BTreeSet::new());
        assert!(report.violations.is_empty());
        assert_eq!(report.unresolved.len(), 1);
        assert_eq!(report.unresolved[0].contract, "sendgrid.send");
    }

    #[test]
    fn test_any_of_group() {
        let ok = "transporter.sendMail({ to: a, html: b })";
        assert!(check_file("f", ok, &BTreeSet::new()).violations.is_empty());
        let bad = "transporter.sendMail({ to: a })";
        let report = check_file("f", bad, &BTreeSet::new());
        assert!(report.violations[0].reason.contains("one of text | html"));
    }

    #[test]
    fn test_persisted_write_schema_mismatch() {
        let text = r#"
await sanityClient.create({ _type: 'order', status: 'paid', totalAmount: 10 })
await client.patch(id).set({ 'shipping.carrier': 'ups', status: 'sent' }).commit()
"#;
        let report = check_file("f", text, &schema(&["status", "total", "shipping"]));
        assert_eq!(report.schema_mismatches.len(), 1);
        assert!(report.schema_mismatches[0].reason.contains("totalAmount"));
        assert!(report.violations.is_empty());
    }
}
