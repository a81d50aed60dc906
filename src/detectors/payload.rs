// SPDX-License-Identifier: AGPL-3.0-or-later

//! Unsafe payload access: `event.data.object` dereferences with no
//! validation earlier in the file text.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::model::{Classification, Finding};
use crate::scanner::{line_of, snippet_at};

static PAYLOAD_DEREF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[A-Za-z_$][\w$]*\??\.data\??\.object\b").unwrap());

static VALIDATION: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        // zod / yup / joi style schema parse
        r"\b\w*(?:[Ss]chema|[Vv]alidator)\w*\s*\.\s*(?:safeParse|parse|parseAsync|validate|validateSync)\s*\(",
        r"\b(?:validate|assert|is)[A-Z]\w*(?:Payload|Event|Object|Body)\s*\(",
        r"\bconstructEvent(?:Async)?\s*\(",
        r"typeof\s+[\w$.?]*object\b",
        r"\bif\s*\(\s*!\s*[\w$.?]*\.object\b",
        r"[\w$.?]*\.object\s+instanceof\b",
    ]
    .into_iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

fn validated_before(text: &str, offset: usize) -> bool {
    let preceding = &text[..offset];
    VALIDATION.iter().any(|re| re.is_match(preceding))
}

/// One `unsafeAccess` finding per unvalidated occurrence
pub fn check_handler(file: &str, text: &str) -> Vec<Finding> {
    PAYLOAD_DEREF
        .find_iter(text)
        .filter(|m| !validated_before(text, m.start()))
        .map(|m| {
            let line = line_of(text, m.start());
            Finding::new(
                Classification::UnsafeAccess,
                format!("'{}' is read before any payload validation", m.as_str()),
                file,
            )
            .at_line(line)
            .with_evidence("payloadAccess", snippet_at(text, m.start()), line)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_each_unvalidated_occurrence_reported() {
        let text = "const session = event.data.object\nconst again = payload?.data?.object\n";
        let findings = check_handler("fn/webhook.ts", text);
        assert_eq!(findings.len(), 2);
        assert_eq!(findings[1].line_numbers, vec![2]);
        assert_eq!(findings[0].evidence[0].detail, "const session = event.data.object");
    }

    #[test]
    fn test_only_preceding_validation_counts() {
        let text = "const a = event.data.object\nconst evt = stripe.webhooks.constructEvent(b, s, k)\nconst b = evt.data.object\n";
        let findings = check_handler("fn/webhook.ts", text);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].line_numbers, vec![1]);
    }

    #[test]
    fn test_schema_parse_counts_as_validation() {
        let text = "const parsed = EventSchema.safeParse(body)\nconst o = parsed.data.object";
        assert!(check_handler("f", text).is_empty());
    }

    #[test]
    fn test_instanceof_must_check_the_object() {
        let unrelated = "try { x() } catch (err) { if (err instanceof Error) log(err) }\nconst session = event.data.object\n";
        assert_eq!(check_handler("fn/webhook.ts", unrelated).len(), 1);

        let checked = "if (!(event.data.object instanceof Object)) return\nconst session = event.data.object\n";
        let findings = check_handler("fn/webhook.ts", checked);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].line_numbers, vec![1]);
    }

    #[test]
    fn test_json_parse_is_not_validation() {
        let text = "const event = JSON.parse(body)\nconst o = event.data.object";
        assert_eq!(check_handler("f", text).len(), 1);
    }
}
