//! Error types for the draw2struct library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`ExtractError`] — **Fatal**: the run cannot proceed at all (missing
//!   input file, no API key, invalid configuration). Returned as
//!   `Err(ExtractError)` from the top-level `analyze*` functions.
//!
//! * [`DocumentError`] — **Non-fatal**: a single document failed (upstream
//!   glitch, unparseable reply) but sibling documents are fine. Stored
//!   inside [`crate::output::FailureRecord`] so batch callers inspect
//!   partial success rather than losing the whole run to one bad drawing.
//!
//! The separation lets callers decide their own tolerance: abort on the
//! first failure, log and continue, or collect every error row for review.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the draw2struct library.
///
/// Per-document failures use [`DocumentError`] and are stored in
/// [`crate::output::FailureRecord`] rather than propagated here, except in
/// single-document mode where the one document's error *is* the run error.
#[derive(Debug, Error)]
pub enum ExtractError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Document not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The file extension is not one of the supported document types.
    #[error(
        "Unsupported document type for '{path}'\n\
         Supported: .pdf .png .jpg .jpeg .tif .tiff"
    )]
    UnsupportedFile { path: PathBuf },

    // ── Provider errors ───────────────────────────────────────────────────
    /// No model invoker could be resolved (missing API key etc.).
    #[error("Model provider is not configured.\n{hint}")]
    ProviderNotConfigured { hint: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Single-document propagation ───────────────────────────────────────
    /// The single document of a non-batch run failed.
    #[error(transparent)]
    Document(#[from] DocumentError),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single document.
///
/// Stored in [`crate::output::FailureRecord`] when a document fails during
/// a batch. The batch itself never aborts because of these.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum DocumentError {
    /// Request rejected before any remote call: empty payload or a mime
    /// type the model endpoint does not accept.
    #[error("Invalid request: {detail}")]
    Invalid { detail: String },

    /// Transport, authentication, or quota failure from the model API.
    #[error("Upstream error{}: {detail}", status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
    Upstream {
        /// HTTP status when the request reached the server.
        status: Option<u16>,
        detail: String,
        /// Retries consumed before giving up.
        retries: u8,
    },

    /// The model returned an empty or blocked reply.
    #[error("Model returned an empty reply (refused or blocked)")]
    Refusal,

    /// A reply arrived but no JSON object could be extracted from it.
    ///
    /// `raw` keeps a truncated copy of the reply so a human can inspect
    /// what the model actually said.
    #[error("Unparseable model reply: {detail}")]
    Malformed { detail: String, raw: String },

    /// The model call exceeded the per-call timeout.
    #[error("Model call timed out after {secs}s")]
    Timeout { secs: u64 },
}

impl DocumentError {
    /// Whether retrying the same request could plausibly succeed.
    ///
    /// Only transient upstream conditions qualify: connection failures
    /// (no status), rate limiting (429), and server errors (5xx).
    /// Content-level failures (`Refusal`, `Malformed`) are never retried —
    /// the input will not change.
    pub fn is_transient(&self) -> bool {
        match self {
            DocumentError::Upstream { status, .. } => {
                matches!(status, None | Some(429) | Some(500..=599))
            }
            DocumentError::Timeout { .. } => true,
            _ => false,
        }
    }
}
