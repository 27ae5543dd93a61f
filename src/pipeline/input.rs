//! Inbound data: documents, mime resolution, and request validation.
//!
//! ## Why validate before the remote call?
//!
//! The model endpoint rejects unsupported payloads with opaque errors long
//! after the bytes have been uploaded. Checking the mime type and payload
//! here gives callers a precise [`DocumentError::Invalid`] before any
//! network traffic, and lets batches skip doomed documents without
//! spending quota. Where a format has reliable magic bytes we cross-check
//! them so a mislabelled file fails fast rather than confusing the model.

use crate::error::{DocumentError, ExtractError};
use crate::schema::ExtractionSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Document types the model endpoint accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MimeType {
    Pdf,
    Png,
    Jpeg,
    Tiff,
}

impl MimeType {
    /// The IANA string sent to the model API.
    pub fn as_str(&self) -> &'static str {
        match self {
            MimeType::Pdf => "application/pdf",
            MimeType::Png => "image/png",
            MimeType::Jpeg => "image/jpeg",
            MimeType::Tiff => "image/tiff",
        }
    }

    /// Resolve from a file extension (case-insensitive).
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "pdf" => Some(MimeType::Pdf),
            "png" => Some(MimeType::Png),
            "jpg" | "jpeg" => Some(MimeType::Jpeg),
            "tif" | "tiff" => Some(MimeType::Tiff),
            _ => None,
        }
    }

    /// Resolve from an IANA mime string, e.g. from an upload header.
    pub fn from_mime_str(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "application/pdf" => Some(MimeType::Pdf),
            "image/png" => Some(MimeType::Png),
            "image/jpeg" | "image/jpg" => Some(MimeType::Jpeg),
            "image/tiff" | "image/tif" => Some(MimeType::Tiff),
            _ => None,
        }
    }

    /// Check the payload's magic bytes against this type.
    ///
    /// Returns `false` only on a definite mismatch. TIFF has two valid
    /// byte orders; JPEG and PNG have fixed signatures; PDF starts with
    /// `%PDF`.
    pub fn matches_magic(&self, bytes: &[u8]) -> bool {
        match self {
            MimeType::Pdf => bytes.starts_with(b"%PDF"),
            MimeType::Png => bytes.starts_with(&[0x89, b'P', b'N', b'G']),
            MimeType::Jpeg => bytes.starts_with(&[0xFF, 0xD8, 0xFF]),
            MimeType::Tiff => bytes.starts_with(b"II*\0") || bytes.starts_with(b"MM\0*"),
        }
    }
}

impl std::fmt::Display for MimeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One document submitted for analysis.
///
/// The bytes are owned by the request and released when the call returns;
/// the invoker never retains them.
#[derive(Debug, Clone)]
pub struct DocumentInput {
    /// Identity carried through to output rows; typically the file name.
    pub file_name: String,
    pub bytes: Vec<u8>,
    pub mime_type: MimeType,
}

impl DocumentInput {
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>, mime_type: MimeType) -> Self {
        Self {
            file_name: file_name.into(),
            bytes,
            mime_type,
        }
    }

    /// Reject empty payloads and mislabelled documents before any remote call.
    pub fn validate(&self) -> Result<(), DocumentError> {
        if self.bytes.is_empty() {
            return Err(DocumentError::Invalid {
                detail: format!("'{}' has an empty payload", self.file_name),
            });
        }
        if !self.mime_type.matches_magic(&self.bytes) {
            return Err(DocumentError::Invalid {
                detail: format!(
                    "'{}' does not look like {} (magic bytes mismatch)",
                    self.file_name, self.mime_type
                ),
            });
        }
        Ok(())
    }
}

/// The run parameters shared by every document of a batch: the extraction
/// schema, the free-text context fields, and whether per-field evidence is
/// requested.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisProfile {
    pub schema: ExtractionSchema,
    #[serde(default)]
    pub customer_context: String,
    #[serde(default)]
    pub component_context: String,
    #[serde(default)]
    pub want_evidence: bool,
}

/// A complete single-document request: one document plus the profile.
///
/// Captured by value into the run; immutable once submitted.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub document: DocumentInput,
    pub profile: AnalysisProfile,
}

impl AnalysisRequest {
    pub fn new(document: DocumentInput, profile: AnalysisProfile) -> Self {
        Self { document, profile }
    }
}

/// Load a local file into a [`DocumentInput`].
///
/// The mime type is resolved from the extension and cross-checked against
/// the payload's magic bytes.
pub fn load_document(path: impl AsRef<Path>) -> Result<DocumentInput, ExtractError> {
    let path = path.as_ref();

    let mime_type = path
        .extension()
        .and_then(|e| e.to_str())
        .and_then(MimeType::from_extension)
        .ok_or_else(|| ExtractError::UnsupportedFile {
            path: path.to_path_buf(),
        })?;

    let bytes = std::fs::read(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => ExtractError::PermissionDenied {
            path: path.to_path_buf(),
        },
        _ => ExtractError::FileNotFound {
            path: path.to_path_buf(),
        },
    })?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());

    debug!(
        "Loaded '{}' ({} bytes, {})",
        file_name,
        bytes.len(),
        mime_type
    );

    Ok(DocumentInput::new(file_name, bytes, mime_type))
}
