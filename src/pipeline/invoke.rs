//! Model invocation: one multimodal call per document, plus retry policy.
//!
//! [`ModelInvoker`] is the seam between orchestration and the remote
//! model: binary payload + instruction text in, raw reply text out. The
//! document bytes and the prompt travel as *sibling parts of one message*
//! — the model needs both simultaneously to ground the instructions in
//! the drawing, so they are never split across calls.
//!
//! [`GeminiInvoker`] is the production implementation (Gemini
//! `generateContent` REST API). Tests and hosts with custom middleware
//! inject their own invoker through
//! [`crate::config::AnalysisConfigBuilder::invoker`].
//!
//! ## Retry Strategy
//!
//! HTTP 429 / 5xx from model APIs are transient and frequent under
//! concurrent load. [`invoke_with_retry`] applies exponential backoff
//! (`retry_backoff_ms * 2^(attempt - 1)`): with the 500 ms default and 3 retries
//! the wait sequence is 500 ms → 1 s → 2 s. Content-level failures
//! (refusals, unparseable replies, invalid requests) are never retried —
//! the input will not change. Each attempt is bounded by a per-call
//! timeout so one unresponsive upstream call cannot stall a batch.

use crate::error::DocumentError;
use crate::pipeline::input::DocumentInput;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, warn};

/// Default model, matching the hosted tool this library grew out of.
pub const DEFAULT_MODEL: &str = "gemini-2.5-pro";

/// Default REST endpoint for the Gemini API.
pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// A single multimodal call to a remote model.
///
/// Implementations own nothing beyond the call: the request is borrowed
/// for the duration of `invoke` and not retained afterwards. They report
/// failures through [`DocumentError`] so the orchestrator can classify
/// them for retry and batch containment.
#[async_trait]
pub trait ModelInvoker: Send + Sync {
    /// Send `document` and `instructions` as one multimodal message and
    /// return the model's raw reply text.
    async fn invoke(
        &self,
        document: &DocumentInput,
        instructions: &str,
    ) -> Result<String, DocumentError>;
}

/// Drive one invocation with validation, per-call timeout, and bounded
/// retry with exponential backoff on transient errors.
///
/// Returns the raw reply and the number of retries consumed.
pub async fn invoke_with_retry(
    invoker: &dyn ModelInvoker,
    document: &DocumentInput,
    instructions: &str,
    max_retries: u32,
    retry_backoff_ms: u64,
    api_timeout_secs: u64,
) -> Result<(String, u8), DocumentError> {
    document.validate()?;

    let mut last_err: Option<DocumentError> = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let backoff = retry_backoff_ms * 2u64.pow(attempt - 1);
            warn!(
                "'{}': retry {}/{} after {}ms",
                document.file_name, attempt, max_retries, backoff
            );
            sleep(Duration::from_millis(backoff)).await;
        }

        let call = invoker.invoke(document, instructions);
        let result = match timeout(Duration::from_secs(api_timeout_secs), call).await {
            Ok(r) => r,
            Err(_) => Err(DocumentError::Timeout {
                secs: api_timeout_secs,
            }),
        };

        match result {
            Ok(text) => return Ok((text, attempt as u8)),
            Err(e) if e.is_transient() => {
                warn!(
                    "'{}': attempt {} failed — {}",
                    document.file_name,
                    attempt + 1,
                    e
                );
                last_err = Some(e);
            }
            Err(e) => return Err(stamp_retries(e, attempt as u8)),
        }
    }

    let err = last_err.unwrap_or_else(|| DocumentError::Upstream {
        status: None,
        detail: "unknown error".into(),
        retries: 0,
    });
    Err(stamp_retries(err, max_retries as u8))
}

/// Record the retries consumed on the error that ends the attempt loop.
fn stamp_retries(err: DocumentError, retries: u8) -> DocumentError {
    match err {
        DocumentError::Upstream { status, detail, .. } => DocumentError::Upstream {
            status,
            detail,
            retries,
        },
        other => other,
    }
}

// ── Gemini REST implementation ───────────────────────────────────────────

/// [`ModelInvoker`] backed by the Gemini `generateContent` REST API.
///
/// The API key is sent in the `x-goog-api-key` header rather than as a
/// query parameter so it never lands in URLs or access logs.
pub struct GeminiInvoker {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_output_tokens: usize,
}

impl GeminiInvoker {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: DEFAULT_API_BASE.to_string(),
            api_key: api_key.into(),
            model: model.into(),
            temperature: 0.1,
            max_output_tokens: 4096,
        }
    }

    /// Point at a different endpoint (regional deployment, proxy, stub).
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_output_tokens(mut self, n: usize) -> Self {
        self.max_output_tokens = n;
        self
    }

    fn request_url(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.api_base.trim_end_matches('/'),
            self.model
        )
    }
}

impl std::fmt::Debug for GeminiInvoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiInvoker")
            .field("api_base", &self.api_base)
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .finish()
    }
}

#[async_trait]
impl ModelInvoker for GeminiInvoker {
    async fn invoke(
        &self,
        document: &DocumentInput,
        instructions: &str,
    ) -> Result<String, DocumentError> {
        let body = GenerateContentRequest {
            contents: vec![Content {
                parts: vec![
                    Part {
                        inline_data: Some(InlineData {
                            mime_type: document.mime_type.as_str(),
                            data: BASE64.encode(&document.bytes),
                        }),
                        text: None,
                    },
                    Part {
                        inline_data: None,
                        text: Some(instructions),
                    },
                ],
            }],
            generation_config: GenerationConfig {
                temperature: self.temperature,
                max_output_tokens: self.max_output_tokens,
            },
        };

        debug!(
            "'{}': POST {} ({} payload bytes)",
            document.file_name,
            self.request_url(),
            document.bytes.len()
        );

        let response = self
            .client
            .post(self.request_url())
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| DocumentError::Upstream {
                status: e.status().map(|s| s.as_u16()),
                detail: e.to_string(),
                retries: 0,
            })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(DocumentError::Upstream {
                status: Some(status.as_u16()),
                detail: truncate(&detail, 300),
                retries: 0,
            });
        }

        let reply: GenerateContentResponse =
            response.json().await.map_err(|e| DocumentError::Upstream {
                status: Some(status.as_u16()),
                detail: format!("response body was not valid JSON: {e}"),
                retries: 0,
            })?;

        extract_reply_text(reply)
    }
}

/// Pull the reply text out of the response envelope.
///
/// A blocked prompt, a safety-stopped candidate, or an empty parts list
/// all map to [`DocumentError::Refusal`] — the model gave us nothing to
/// parse, and retrying the same content will not change that.
fn extract_reply_text(reply: GenerateContentResponse) -> Result<String, DocumentError> {
    if let Some(feedback) = &reply.prompt_feedback {
        if feedback.block_reason.is_some() {
            return Err(DocumentError::Refusal);
        }
    }

    let candidate = reply
        .candidates
        .into_iter()
        .next()
        .ok_or(DocumentError::Refusal)?;

    if matches!(candidate.finish_reason.as_deref(), Some("SAFETY")) {
        return Err(DocumentError::Refusal);
    }

    let text: String = candidate
        .content
        .map(|c| {
            c.parts
                .into_iter()
                .filter_map(|p| p.text)
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(DocumentError::Refusal);
    }
    Ok(text)
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}\u{2026}", &s[..end])
}

// ── Wire types ───────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    #[serde(rename = "inlineData", skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct InlineData {
    #[serde(rename = "mimeType")]
    mime_type: &'static str,
    data: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: usize,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(rename = "promptFeedback")]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PromptFeedback {
    #[serde(rename = "blockReason")]
    block_reason: Option<String>,
}
