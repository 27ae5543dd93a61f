//! Output types: per-document records, batch results, and the tabular
//! shape handed to sinks.
//!
//! The core produces one [`DocumentOutcome`] per input document — either an
//! [`ExtractedRecord`] or a [`FailureRecord`] — and never silently drops a
//! document. Sinks (table viewers, spreadsheet encoders, cloud writers)
//! consume the uniform [`RecordTable`] shape and the library makes no
//! assumption about which sink is used or whether it succeeds.

use crate::error::DocumentError;
use crate::schema::ExtractionSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Structured fields extracted from one document.
///
/// `fields` maps item name → value. An explicit model `null` is stored as
/// [`Value::Null`]; a key the model omitted is simply absent. The parser
/// never fabricates values to close that gap — the distinction survives
/// into the JSON output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedRecord {
    /// Identity of the source document; always the first column when tabulated.
    pub file_name: String,
    pub fields: Map<String, Value>,
    /// Per-field provenance strings, present when evidence was requested
    /// and the model supplied it. Keyed identically to `fields`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence: Option<Map<String, Value>>,
    /// Retries consumed by the model call.
    #[serde(default)]
    pub retries: u8,
    /// Wall-clock duration of invoke + parse for this document.
    #[serde(default)]
    pub duration_ms: u64,
}

/// A document that produced no record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureRecord {
    pub file_name: String,
    pub error: DocumentError,
}

impl FailureRecord {
    /// Human-readable error message for error rows.
    pub fn message(&self) -> String {
        self.error.to_string()
    }
}

/// The outcome for one input document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DocumentOutcome {
    Extracted(ExtractedRecord),
    Failed(FailureRecord),
}

impl DocumentOutcome {
    pub fn file_name(&self) -> &str {
        match self {
            DocumentOutcome::Extracted(r) => &r.file_name,
            DocumentOutcome::Failed(f) => &f.file_name,
        }
    }

    pub fn record(&self) -> Option<&ExtractedRecord> {
        match self {
            DocumentOutcome::Extracted(r) => Some(r),
            DocumentOutcome::Failed(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&FailureRecord> {
        match self {
            DocumentOutcome::Extracted(_) => None,
            DocumentOutcome::Failed(f) => Some(f),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, DocumentOutcome::Failed(_))
    }
}

/// Terminal state of a batch run.
///
/// A batch where *every* document failed is still `Completed`: the batch
/// mechanism itself never aborts on individual document errors, and sinks
/// receive the error rows either way. `PartiallyFailed` needs at least one
/// success and one failure. `Cancelled` means cancellation skipped at
/// least one document that had not started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchState {
    Completed,
    PartiallyFailed,
    Cancelled,
}

/// Aggregate statistics for a batch run.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct BatchStats {
    /// Documents in the input list.
    pub total_documents: usize,
    /// Documents that produced an [`ExtractedRecord`].
    pub extracted: usize,
    /// Documents that produced a [`FailureRecord`].
    pub failed: usize,
    /// Documents never started because the run was cancelled.
    pub skipped: usize,
    /// Wall-clock duration of the whole batch.
    pub total_duration_ms: u64,
}

/// Result of a batch run: one outcome per attempted document, in input order.
///
/// For non-cancelled runs `outcomes.len()` always equals the input document
/// count. Cancelled runs omit skipped documents entirely rather than
/// fabricating outcomes for work that never ran.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResult {
    pub outcomes: Vec<DocumentOutcome>,
    pub state: BatchState,
    pub stats: BatchStats,
}

impl BatchResult {
    /// Derive the batch state from outcome counts.
    pub(crate) fn state_for(extracted: usize, failed: usize, skipped: usize) -> BatchState {
        if skipped > 0 {
            BatchState::Cancelled
        } else if extracted > 0 && failed > 0 {
            BatchState::PartiallyFailed
        } else {
            BatchState::Completed
        }
    }

    /// The values "sheet": file-identity column first, then active schema
    /// columns in declaration order, then an error column.
    ///
    /// Failed documents appear as error rows with empty field cells so the
    /// record count a sink sees matches the outcome count here.
    pub fn to_table(&self, schema: &ExtractionSchema) -> RecordTable {
        let field_columns = schema.column_names();
        let mut columns = Vec::with_capacity(field_columns.len() + 2);
        columns.push("File".to_string());
        columns.extend(field_columns.iter().cloned());
        columns.push("Error".to_string());

        let rows = self
            .outcomes
            .iter()
            .map(|outcome| {
                let mut row = Vec::with_capacity(columns.len());
                row.push(outcome.file_name().to_string());
                match outcome {
                    DocumentOutcome::Extracted(r) => {
                        for name in &field_columns {
                            row.push(render_cell(r.fields.get(name.as_str())));
                        }
                        row.push(String::new());
                    }
                    DocumentOutcome::Failed(f) => {
                        row.extend(std::iter::repeat_n(String::new(), field_columns.len()));
                        row.push(f.message());
                    }
                }
                row
            })
            .collect();

        RecordTable { columns, rows }
    }

    /// The evidence "sheet", or `None` when no record carries evidence.
    ///
    /// Same column order as [`Self::to_table`] minus the error column;
    /// failed documents are excluded since they have nothing to source.
    pub fn evidence_table(&self, schema: &ExtractionSchema) -> Option<RecordTable> {
        let records_with_evidence: Vec<&ExtractedRecord> = self
            .outcomes
            .iter()
            .filter_map(|o| o.record())
            .filter(|r| r.evidence.is_some())
            .collect();
        if records_with_evidence.is_empty() {
            return None;
        }

        let field_columns = schema.column_names();
        let mut columns = Vec::with_capacity(field_columns.len() + 1);
        columns.push("File".to_string());
        columns.extend(field_columns.iter().cloned());

        let rows = records_with_evidence
            .into_iter()
            .map(|r| {
                let evidence = r.evidence.as_ref().expect("filtered above");
                let mut row = Vec::with_capacity(columns.len());
                row.push(r.file_name.clone());
                for name in &field_columns {
                    row.push(render_cell(evidence.get(name.as_str())));
                }
                row
            })
            .collect();

        Some(RecordTable { columns, rows })
    }
}

/// The uniform tabular shape consumed by every sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// Render a JSON value as a flat cell. Explicit null and absent key both
/// render empty; strings render unquoted; everything else uses compact JSON.
fn render_cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ExtractionItem;
    use serde_json::json;

    fn record(file: &str, fields: Value) -> DocumentOutcome {
        DocumentOutcome::Extracted(ExtractedRecord {
            file_name: file.to_string(),
            fields: fields.as_object().unwrap().clone(),
            evidence: None,
            retries: 0,
            duration_ms: 0,
        })
    }

    fn failure(file: &str) -> DocumentOutcome {
        DocumentOutcome::Failed(FailureRecord {
            file_name: file.to_string(),
            error: DocumentError::Refusal,
        })
    }

    fn schema() -> ExtractionSchema {
        ExtractionSchema::new(vec![
            ExtractionItem::new("Part Number", "title block"),
            ExtractionItem::named("Material"),
        ])
    }

    #[test]
    fn state_derivation() {
        assert_eq!(BatchResult::state_for(3, 0, 0), BatchState::Completed);
        assert_eq!(BatchResult::state_for(0, 3, 0), BatchState::Completed);
        assert_eq!(BatchResult::state_for(2, 1, 0), BatchState::PartiallyFailed);
        assert_eq!(BatchResult::state_for(1, 0, 2), BatchState::Cancelled);
    }

    #[test]
    fn table_has_file_first_and_error_last() {
        let result = BatchResult {
            outcomes: vec![
                record("a.pdf", json!({"Part Number": "A1", "Material": null})),
                failure("b.pdf"),
            ],
            state: BatchState::PartiallyFailed,
            stats: BatchStats::default(),
        };

        let table = result.to_table(&schema());
        assert_eq!(table.columns, vec!["File", "Part Number", "Material", "Error"]);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[0], vec!["a.pdf", "A1", "", ""]);
        assert_eq!(table.rows[1][0], "b.pdf");
        assert!(table.rows[1][3].contains("empty reply"));
    }

    #[test]
    fn omitted_field_renders_empty() {
        let result = BatchResult {
            outcomes: vec![record("a.pdf", json!({"Part Number": "A1"}))],
            state: BatchState::Completed,
            stats: BatchStats::default(),
        };
        let table = result.to_table(&schema());
        assert_eq!(table.rows[0][2], "");
    }

    #[test]
    fn non_string_values_render_as_json() {
        let result = BatchResult {
            outcomes: vec![record("a.pdf", json!({"Part Number": 42}))],
            state: BatchState::Completed,
            stats: BatchStats::default(),
        };
        let table = result.to_table(&schema());
        assert_eq!(table.rows[0][1], "42");
    }

    #[test]
    fn evidence_table_absent_without_evidence() {
        let result = BatchResult {
            outcomes: vec![record("a.pdf", json!({"Part Number": "A1"}))],
            state: BatchState::Completed,
            stats: BatchStats::default(),
        };
        assert!(result.evidence_table(&schema()).is_none());
    }

    #[test]
    fn evidence_table_excludes_failures() {
        let mut rec = ExtractedRecord {
            file_name: "a.pdf".into(),
            fields: json!({"Part Number": "A1"}).as_object().unwrap().clone(),
            evidence: Some(
                json!({"Part Number": "title block"})
                    .as_object()
                    .unwrap()
                    .clone(),
            ),
            retries: 0,
            duration_ms: 0,
        };
        rec.fields.insert("Material".into(), Value::Null);
        let result = BatchResult {
            outcomes: vec![DocumentOutcome::Extracted(rec), failure("b.pdf")],
            state: BatchState::PartiallyFailed,
            stats: BatchStats::default(),
        };

        let table = result.evidence_table(&schema()).expect("evidence present");
        assert_eq!(table.columns, vec!["File", "Part Number", "Material"]);
        assert_eq!(table.rows.len(), 1);
        assert_eq!(table.rows[0], vec!["a.pdf", "title block", ""]);
    }

    #[test]
    fn outcome_serialises_with_status_tag() {
        let json = serde_json::to_value(failure("b.pdf")).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["file_name"], "b.pdf");
    }
}
