//! Instruction prompts for field extraction from drawings.
//!
//! Centralising the prompt text here serves two purposes:
//!
//! 1. **Single source of truth** — tightening the output contract or the
//!    evidence wording happens in exactly one place.
//!
//! 2. **Testability** — unit tests can build and inspect instructions
//!    without a live model, so prompt regressions are cheap to catch.
//!
//! [`build_instructions`] is a pure function of the profile: identical
//! input yields byte-identical output, which keeps re-runs comparable.

use crate::pipeline::input::AnalysisProfile;
use std::fmt::Write;

/// The strict output contract appended to every instruction.
///
/// Models frequently wrap JSON in prose or fences anyway — the parser in
/// [`crate::pipeline::parse`] handles that — but a firm contract keeps the
/// failure rate low.
pub const OUTPUT_CONTRACT: &str = "\
Output rules:
- Respond with exactly ONE JSON object and nothing else.
- Use null for any item that cannot be found in the document.
- Do not include any prose, explanation, or code fences outside the object.";

/// Additional contract when per-field evidence is requested.
///
/// The evidence values are pinned to English so downstream review stays
/// consistent regardless of the drawing's language.
pub const EVIDENCE_CONTRACT: &str = "\
- Structure the object as {\"results\": {...}, \"evidence\": {...}}.
- \"results\" maps each item name to its extracted value (or null).
- \"evidence\" maps each item name, using identical keys, to a short English
  phrase describing where in the document the value was found
  (e.g. \"title block, lower right\"). Use null when the value is null.";

/// Build the instruction text for one analysis run.
///
/// Renders the free-text context fields, one line per active extraction
/// item (name plus location hint, so the model gets a per-field lookup
/// hint rather than a bare list of names), and the output contract.
/// Inactive items (empty names) are skipped. An empty schema still
/// produces a well-formed instruction — the model is free to extract
/// nothing.
pub fn build_instructions(profile: &AnalysisProfile) -> String {
    let mut text = String::with_capacity(512);

    text.push_str("Context:\n");
    let _ = writeln!(
        text,
        "- Customer overview: {}",
        non_empty_or(&profile.customer_context, "(not provided)")
    );
    let _ = writeln!(
        text,
        "- Component details: {}",
        non_empty_or(&profile.component_context, "(not provided)")
    );

    text.push_str(
        "\nTask:\nAnalyze the attached technical drawing and extract the following \
         items into a JSON object, one key per item name.\n\nTarget items:\n",
    );

    for item in profile.schema.active_items() {
        let name = item.name.trim();
        let hint = item.location_hint.trim();
        if hint.is_empty() {
            let _ = writeln!(text, "- {name}");
        } else {
            let _ = writeln!(text, "- {name} (look in: {hint})");
        }
    }
    if profile.schema.is_empty() {
        text.push_str("(none)\n");
    }

    text.push('\n');
    text.push_str(OUTPUT_CONTRACT);
    if profile.want_evidence {
        text.push('\n');
        text.push_str(EVIDENCE_CONTRACT);
    }
    text.push('\n');

    text
}

fn non_empty_or<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        fallback
    } else {
        trimmed
    }
}
