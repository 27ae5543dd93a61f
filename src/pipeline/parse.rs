//! Response parsing: recover a structured record from the model's reply.
//!
//! ## Why not `serde_json::from_str` directly?
//!
//! The reply is untrusted with respect to formatting: despite the output
//! contract, models routinely wrap the object in ```` ```json ```` fences,
//! preface it with prose ("Here is the extracted data:"), or emit stray
//! braces around it. The recovery strategy, in order of preference:
//!
//! 1. Strip outer code fences (language-tagged or bare) and try the
//!    remainder as JSON.
//! 2. Scan for brace-balanced spans with a depth-counting scan that is
//!    aware of strings and escapes, and try each candidate in order.
//!    A naive "first `{` to last `}`" slice breaks on nested objects and
//!    stray braces in surrounding prose, so it is deliberately not used.
//! 3. Split the nested `{"results": …, "evidence": …}` shape when present;
//!    otherwise the whole object is the fields mapping.
//!
//! A failure here is final for the document — the cause is a content
//! problem, not a transient one, so it is never retried. The raw reply is
//! preserved (truncated) in the error for manual inspection.
//!
//! Fields absent from the decoded object stay absent in the result: the
//! parser never fabricates values, preserving the distinction between an
//! explicit model `null` and an omitted key.

use crate::error::DocumentError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

/// The structured content recovered from one reply.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedReply {
    pub fields: Map<String, Value>,
    pub evidence: Option<Map<String, Value>>,
}

/// Reply preview length kept in [`DocumentError::Malformed`].
const RAW_PREVIEW_LEN: usize = 500;

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[a-zA-Z]*\s*\n?(.*?)\n?```\s*$").unwrap());

/// Extract the fields (and optional evidence) mapping from a raw reply.
pub fn parse_reply(raw: &str) -> Result<ParsedReply, DocumentError> {
    // Strategy 1: strip fences, then try the remainder verbatim.
    let stripped = strip_code_fences(raw);
    if let Ok(Value::Object(obj)) = serde_json::from_str::<Value>(stripped.trim()) {
        return Ok(split_record(obj));
    }

    // Strategy 2: depth-counting scan over the raw text. Each `{` opens a
    // candidate span; the first candidate that deserialises to an object
    // wins. Trying candidates in order means prose braces before the real
    // object are skipped rather than fatal.
    for span in balanced_spans(raw) {
        if let Ok(Value::Object(obj)) = serde_json::from_str::<Value>(span) {
            return Ok(split_record(obj));
        }
    }

    let detail = if raw.contains('{') {
        "no brace-balanced span deserialised to a JSON object"
    } else {
        "no JSON object found in reply"
    };
    Err(DocumentError::Malformed {
        detail: detail.to_string(),
        raw: truncate_preview(raw),
    })
}

/// Remove an outer code fence (```json … ``` or bare ``` … ```), if any.
fn strip_code_fences(input: &str) -> &str {
    match RE_OUTER_FENCES.captures(input.trim()) {
        Some(caps) => caps.get(1).map(|m| m.as_str()).unwrap_or(input),
        None => input,
    }
}

/// All brace-balanced spans of `input`, one per opening `{`, in text order.
///
/// The scan tracks JSON string context so braces inside string values
/// neither open nor close a span, and `\"` inside a string does not end
/// it. Unbalanced opens (depth never returns to zero) yield no span.
fn balanced_spans(input: &str) -> Vec<&str> {
    let bytes = input.as_bytes();
    let mut spans = Vec::new();
    let mut search_from = 0;

    while let Some(offset) = input[search_from..].find('{') {
        let start = search_from + offset;
        if let Some(end) = find_balanced_end(bytes, start) {
            spans.push(&input[start..=end]);
        }
        search_from = start + 1;
    }

    spans
}

/// Byte index of the `}` closing the `{` at `start`, or `None` if the
/// braces never balance.
fn find_balanced_end(bytes: &[u8], start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }

    None
}

/// Split the decoded object into fields and optional evidence.
///
/// The nested shape `{"results": {…}, "evidence": {…}}` is produced when
/// the prompt requested evidence; a flat object is entirely fields.
fn split_record(mut obj: Map<String, Value>) -> ParsedReply {
    let nested_results = matches!(obj.get("results"), Some(Value::Object(_)));
    if nested_results {
        let fields = match obj.remove("results") {
            Some(Value::Object(m)) => m,
            _ => unreachable!("checked above"),
        };
        let evidence = match obj.remove("evidence") {
            Some(Value::Object(m)) => Some(m),
            _ => None,
        };
        ParsedReply { fields, evidence }
    } else {
        ParsedReply {
            fields: obj,
            evidence: None,
        }
    }
}

/// Truncate on a char boundary for the error's raw-reply preview.
fn truncate_preview(raw: &str) -> String {
    if raw.len() <= RAW_PREVIEW_LEN {
        return raw.to_string();
    }
    let mut end = RAW_PREVIEW_LEN;
    while !raw.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}\u{2026}", &raw[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields_of(raw: &str) -> Map<String, Value> {
        parse_reply(raw).expect("should parse").fields
    }

    #[test]
    fn bare_json_object() {
        let f = fields_of(r#"{"Part Number": "A1", "Material": null}"#);
        assert_eq!(f["Part Number"], json!("A1"));
        assert_eq!(f["Material"], Value::Null);
    }

    #[test]
    fn json_in_language_tagged_fence() {
        let f = fields_of("```json\n{\"Part Number\": \"A1\"}\n```");
        assert_eq!(f["Part Number"], json!("A1"));
    }

    #[test]
    fn json_in_bare_fence() {
        let f = fields_of("```\n{\"Part Number\": \"A1\"}\n```");
        assert_eq!(f["Part Number"], json!("A1"));
    }

    #[test]
    fn json_wrapped_in_prose() {
        let raw = "Here is the extracted data:\n{\"Part Number\": \"A1\"}\nLet me know if you need more.";
        let f = fields_of(raw);
        assert_eq!(f["Part Number"], json!("A1"));
    }

    #[test]
    fn unrelated_braces_before_object() {
        // A stray brace pair in prose must not derail the scan.
        let raw = "{not json} but this is: {\"Part Number\": \"A1\"}";
        let f = fields_of(raw);
        assert_eq!(f["Part Number"], json!("A1"));
    }

    #[test]
    fn nested_objects_stay_balanced() {
        // "first { to last }" would work here, but a stray trailing brace
        // breaks it; the depth scan does not care.
        let raw = "{\"a\": {\"b\": {\"c\": 1}}} }";
        let f = fields_of(raw);
        assert_eq!(f["a"]["b"]["c"], json!(1));
    }

    #[test]
    fn braces_inside_string_values() {
        let raw = r#"{"Note": "see { detail } view", "Part Number": "A1"}"#;
        let f = fields_of(raw);
        assert_eq!(f["Note"], json!("see { detail } view"));
    }

    #[test]
    fn escaped_quotes_inside_strings() {
        let raw = r#"{"Note": "the \"main\" view {", "Part Number": "A1"}"#;
        let f = fields_of(raw);
        assert_eq!(f["Part Number"], json!("A1"));
    }

    #[test]
    fn results_evidence_split() {
        let parsed = parse_reply(
            r#"{"results":{"Part Number":"A1"},"evidence":{"Part Number":"title block"}}"#,
        )
        .unwrap();
        assert_eq!(parsed.fields["Part Number"], json!("A1"));
        assert_eq!(
            parsed.evidence.unwrap()["Part Number"],
            json!("title block")
        );
    }

    #[test]
    fn flat_object_has_no_evidence() {
        let parsed = parse_reply(r#"{"Part Number": "A1"}"#).unwrap();
        assert!(parsed.evidence.is_none());
    }

    #[test]
    fn results_key_with_non_object_value_stays_flat() {
        // "results" as a plain field value is not the nested shape.
        let parsed = parse_reply(r#"{"results": "passed", "Part Number": "A1"}"#).unwrap();
        assert_eq!(parsed.fields["results"], json!("passed"));
        assert!(parsed.evidence.is_none());
    }

    #[test]
    fn not_json_at_all_is_malformed() {
        let err = parse_reply("not json at all").unwrap_err();
        match err {
            DocumentError::Malformed { raw, .. } => assert_eq!(raw, "not json at all"),
            other => panic!("expected Malformed, got {other:?}"),
        }
    }

    #[test]
    fn unbalanced_braces_are_malformed() {
        let err = parse_reply(r#"{"Part Number": "A1""#).unwrap_err();
        assert!(matches!(err, DocumentError::Malformed { .. }));
    }

    #[test]
    fn top_level_array_is_malformed() {
        let err = parse_reply(r#"["A1", "B2"]"#).unwrap_err();
        assert!(matches!(err, DocumentError::Malformed { .. }));
    }

    #[test]
    fn omitted_keys_stay_absent() {
        let f = fields_of(r#"{"Part Number": "A1"}"#);
        assert!(!f.contains_key("Material"));
    }

    #[test]
    fn raw_preview_is_truncated() {
        let long = format!("prose {}", "x".repeat(2000));
        let err = parse_reply(&long).unwrap_err();
        match err {
            DocumentError::Malformed { raw, .. } => {
                assert!(raw.chars().count() <= RAW_PREVIEW_LEN + 1);
                assert!(raw.ends_with('\u{2026}'));
            }
            other => panic!("expected Malformed, got {other:?}"),
        }
    }

    #[test]
    fn fence_round_trip_preserves_object() {
        let obj = json!({"Part Number": "A1", "Pins": 12, "Material": null});
        let wrapped = format!("```json\n{}\n```", obj);
        let parsed = parse_reply(&wrapped).unwrap();
        assert_eq!(Value::Object(parsed.fields), obj);
    }
}
