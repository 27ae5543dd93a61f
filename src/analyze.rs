//! Analysis orchestration: single-document and batch entry points.
//!
//! Both modes drive the same three-stage pipeline — build instructions,
//! invoke the model, parse the reply — through one suspension abstraction
//! (async + the progress callback), so the "keep the UI responsive during
//! a long call" concern and the "fan out over a batch" concern are not
//! reimplemented per mode.
//!
//! ## Batch semantics
//!
//! Documents are processed by a bounded worker pool
//! (`buffer_unordered(concurrency)`). Each document's invoke+parse is
//! fully isolated: any failure becomes a [`FailureRecord`] for that
//! document and never cancels or corrupts sibling work. Completion order
//! under concurrency is nondeterministic, so each worker carries its input
//! index and outcomes are sorted back into input order before returning —
//! the caller's document list and the result rows always line up.
//!
//! Cancellation is cooperative: a [`CancelHandle`] is checked before each
//! document starts. Workers already in flight finish normally; documents
//! that never started are skipped and get no fabricated outcome.

use crate::config::AnalysisConfig;
use crate::error::{DocumentError, ExtractError};
use crate::output::{BatchResult, BatchStats, DocumentOutcome, ExtractedRecord, FailureRecord};
use crate::pipeline::input::{AnalysisProfile, AnalysisRequest, DocumentInput};
use crate::pipeline::invoke::{invoke_with_retry, GeminiInvoker, ModelInvoker};
use crate::pipeline::parse;
use crate::prompts;
use futures::stream::{self, StreamExt};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Cooperative cancellation for batch runs.
///
/// Clone the handle freely; all clones share one flag. Calling
/// [`cancel`](Self::cancel) stops documents that have not started yet.
/// In-flight model calls are allowed to finish — there is no guarantee of
/// immediate stop.
#[derive(Clone, Default)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelHandle")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Analyze a single document.
///
/// This is the primary single-document entry point. The call suspends for
/// the duration of the remote invocation (seconds to minutes); hosts keep
/// their interactive surface responsive by awaiting it from a worker task
/// and ticking a coarse progress indicator on a fixed cadence.
///
/// # Errors
/// Any per-document failure propagates directly as
/// [`ExtractError::Document`]; fatal setup errors (no API key, bad config)
/// use their own variants.
pub async fn analyze(
    request: AnalysisRequest,
    config: &AnalysisConfig,
) -> Result<ExtractedRecord, ExtractError> {
    let invoker = resolve_invoker(config)?;
    let instructions = prompts::build_instructions(&request.profile);
    let file_name = request.document.file_name.clone();

    if let Some(cb) = &config.progress_callback {
        cb.on_document_start(&file_name, 0, 1);
    }

    match run_document(invoker.as_ref(), &request.document, &instructions, config).await {
        Ok(record) => {
            if let Some(cb) = &config.progress_callback {
                cb.on_document_complete(&file_name, 0, 1, record.fields.len());
            }
            Ok(record)
        }
        Err(e) => {
            if let Some(cb) = &config.progress_callback {
                cb.on_document_error(&file_name, 0, 1, &e.to_string());
            }
            Err(e.into())
        }
    }
}

/// Synchronous wrapper around [`analyze`].
///
/// Creates a temporary tokio runtime internally.
pub fn analyze_sync(
    request: AnalysisRequest,
    config: &AnalysisConfig,
) -> Result<ExtractedRecord, ExtractError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| ExtractError::Internal(format!("Failed to create tokio runtime: {e}")))?
        .block_on(analyze(request, config))
}

/// Analyze a batch of documents sharing one [`AnalysisProfile`].
///
/// Returns `Ok(BatchResult)` even when every document failed — per-document
/// errors are contained as [`FailureRecord`]s and never abort the batch.
/// For non-cancelled runs the outcome count always equals the input count.
///
/// # Errors
/// Fatal only: no invoker could be resolved.
pub async fn analyze_batch(
    documents: Vec<DocumentInput>,
    profile: &AnalysisProfile,
    config: &AnalysisConfig,
) -> Result<BatchResult, ExtractError> {
    let start = Instant::now();
    let invoker = resolve_invoker(config)?;
    let instructions = Arc::new(prompts::build_instructions(profile));
    let total = documents.len();
    info!("Starting batch of {} documents", total);

    if let Some(cb) = &config.progress_callback {
        cb.on_batch_start(total);
    }

    let collected: Vec<Option<(usize, DocumentOutcome)>> =
        stream::iter(documents.into_iter().enumerate().map(|(index, document)| {
            let invoker = Arc::clone(&invoker);
            let instructions = Arc::clone(&instructions);
            let config = config.clone();
            async move {
                // Checked at worker start: cancellation must stop documents
                // that have not begun, while in-flight calls finish.
                if config.cancel.as_ref().is_some_and(|c| c.is_cancelled()) {
                    debug!("'{}': skipped (cancelled)", document.file_name);
                    return None;
                }

                if let Some(cb) = &config.progress_callback {
                    cb.on_document_start(&document.file_name, index, total);
                }

                let outcome =
                    match run_document(invoker.as_ref(), &document, &instructions, &config).await {
                        Ok(record) => {
                            if let Some(cb) = &config.progress_callback {
                                cb.on_document_complete(
                                    &document.file_name,
                                    index,
                                    total,
                                    record.fields.len(),
                                );
                            }
                            DocumentOutcome::Extracted(record)
                        }
                        Err(error) => {
                            warn!("'{}': {}", document.file_name, error);
                            if let Some(cb) = &config.progress_callback {
                                cb.on_document_error(
                                    &document.file_name,
                                    index,
                                    total,
                                    &error.to_string(),
                                );
                            }
                            DocumentOutcome::Failed(FailureRecord {
                                file_name: document.file_name.clone(),
                                error,
                            })
                        }
                    };

                Some((index, outcome))
            }
        }))
        .buffer_unordered(config.concurrency)
        .collect()
        .await;

    // Reassemble into input order: completion order is nondeterministic.
    let mut indexed: Vec<(usize, DocumentOutcome)> = collected.into_iter().flatten().collect();
    indexed.sort_by_key(|(index, _)| *index);
    let outcomes: Vec<DocumentOutcome> = indexed.into_iter().map(|(_, o)| o).collect();

    let extracted = outcomes.iter().filter(|o| !o.is_failure()).count();
    let failed = outcomes.len() - extracted;
    let skipped = total - outcomes.len();

    let result = BatchResult {
        state: BatchResult::state_for(extracted, failed, skipped),
        stats: BatchStats {
            total_documents: total,
            extracted,
            failed,
            skipped,
            total_duration_ms: start.elapsed().as_millis() as u64,
        },
        outcomes,
    };

    info!(
        "Batch finished: {}/{} extracted, {} failed, {} skipped, {}ms",
        extracted, total, failed, skipped, result.stats.total_duration_ms
    );

    if let Some(cb) = &config.progress_callback {
        cb.on_batch_complete(total, extracted);
    }

    Ok(result)
}

/// Write a batch result as pretty-printed JSON.
///
/// Uses atomic write (temp file + rename) to prevent partial files.
pub async fn write_batch_json(
    result: &BatchResult,
    output_path: impl AsRef<Path>,
) -> Result<(), ExtractError> {
    let path = output_path.as_ref();
    let json = serde_json::to_vec_pretty(result)
        .map_err(|e| ExtractError::Internal(format!("serialise batch result: {e}")))?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ExtractError::OutputWriteFailed {
                    path: path.to_path_buf(),
                    source: e,
                })?;
        }
    }

    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, &json)
        .await
        .map_err(|e| ExtractError::OutputWriteFailed {
            path: path.to_path_buf(),
            source: e,
        })?;

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| ExtractError::OutputWriteFailed {
            path: path.to_path_buf(),
            source: e,
        })?;

    Ok(())
}

// ── Internal helpers ─────────────────────────────────────────────────────

/// Run one document through invoke + parse, timing the whole pipeline.
async fn run_document(
    invoker: &dyn ModelInvoker,
    document: &DocumentInput,
    instructions: &str,
    config: &AnalysisConfig,
) -> Result<ExtractedRecord, DocumentError> {
    let start = Instant::now();

    let (raw, retries) = invoke_with_retry(
        invoker,
        document,
        instructions,
        config.max_retries,
        config.retry_backoff_ms,
        config.api_timeout_secs,
    )
    .await?;

    let parsed = parse::parse_reply(&raw)?;

    debug!(
        "'{}': {} fields in {}ms ({} retries)",
        document.file_name,
        parsed.fields.len(),
        start.elapsed().as_millis(),
        retries
    );

    Ok(ExtractedRecord {
        file_name: document.file_name.clone(),
        fields: parsed.fields,
        evidence: parsed.evidence,
        retries,
        duration_ms: start.elapsed().as_millis() as u64,
    })
}

/// Resolve the model invoker, from most-specific to least-specific.
///
/// 1. **Pre-built invoker** (`config.invoker`) — the caller constructed it
///    entirely; used as-is. Useful in tests or for custom middleware.
/// 2. **Explicit API key** (`config.api_key`) — build a [`GeminiInvoker`]
///    against `config.api_base`.
/// 3. **Environment** — `GEMINI_API_KEY`, then `GOOGLE_API_KEY`.
fn resolve_invoker(config: &AnalysisConfig) -> Result<Arc<dyn ModelInvoker>, ExtractError> {
    if let Some(invoker) = &config.invoker {
        return Ok(Arc::clone(invoker));
    }

    let key = config
        .api_key
        .clone()
        .or_else(|| std::env::var("GEMINI_API_KEY").ok().filter(|k| !k.is_empty()))
        .or_else(|| std::env::var("GOOGLE_API_KEY").ok().filter(|k| !k.is_empty()))
        .ok_or_else(|| ExtractError::ProviderNotConfigured {
            hint: "Set GEMINI_API_KEY (or GOOGLE_API_KEY), pass an explicit api_key, \
                   or inject a pre-built invoker."
                .to_string(),
        })?;

    Ok(Arc::new(
        GeminiInvoker::new(key, config.model.clone())
            .with_api_base(config.api_base.clone())
            .with_temperature(config.temperature)
            .with_max_output_tokens(config.max_output_tokens),
    ))
}
