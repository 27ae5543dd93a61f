//! # draw2struct
//!
//! Extract structured fields from technical drawings using multimodal LLMs.
//!
//! ## Why this crate?
//!
//! Title blocks, revision tables, and connector callouts on engineering
//! drawings defeat classical OCR: the layout varies per vendor and half
//! the interesting values live in dense stamped boxes. Instead this crate
//! hands the document — PDF or image, untouched — to a multimodal model
//! together with a generated instruction prompt describing *which* fields
//! to find and *where* to look, then defensively parses the model's
//! free-text reply into a well-typed record.
//!
//! ## Pipeline Overview
//!
//! ```text
//! Drawing (PDF/PNG/JPEG/TIFF)
//!  │
//!  ├─ 1. Input    load file, resolve + verify mime type
//!  ├─ 2. Prompt   schema + context → instruction text
//!  ├─ 3. Invoke   one multimodal call (payload + prompt as sibling parts)
//!  ├─ 4. Parse    fence-strip / balanced-brace scan → fields [+ evidence]
//!  └─ 5. Output   records, error rows, tabular shape for sinks
//! ```
//!
//! Batches fan the same pipeline out over many documents with a bounded
//! worker pool; one bad drawing yields an error row, never a dead batch.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use draw2struct::{
//!     analyze_batch, load_document, AnalysisConfig, AnalysisProfile, ExtractionSchema,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // API key read from GEMINI_API_KEY
//!     let config = AnalysisConfig::default();
//!     let profile = AnalysisProfile {
//!         schema: ExtractionSchema::from_names(["Part Number", "Material", "Revision"]),
//!         customer_context: "Automotive OEM".into(),
//!         component_context: "Wire harness for door".into(),
//!         want_evidence: false,
//!     };
//!
//!     let documents = vec![load_document("drawing_a.pdf")?, load_document("drawing_b.pdf")?];
//!     let result = analyze_batch(documents, &profile, &config).await?;
//!
//!     for row in &result.to_table(&profile.schema).rows {
//!         println!("{}", row.join(" | "));
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `draw2struct` binary (clap + anyhow + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! draw2struct = { version = "0.2", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod analyze;
pub mod config;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod schema;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use analyze::{analyze, analyze_batch, analyze_sync, write_batch_json, CancelHandle};
pub use config::{AnalysisConfig, AnalysisConfigBuilder};
pub use error::{DocumentError, ExtractError};
pub use output::{
    BatchResult, BatchState, BatchStats, DocumentOutcome, ExtractedRecord, FailureRecord,
    RecordTable,
};
pub use pipeline::input::{load_document, AnalysisProfile, AnalysisRequest, DocumentInput, MimeType};
pub use pipeline::invoke::{GeminiInvoker, ModelInvoker};
pub use progress::{AnalysisProgressCallback, NoopProgressCallback, ProgressCallback};
pub use schema::{ExtractionItem, ExtractionSchema};
