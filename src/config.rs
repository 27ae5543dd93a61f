//! Configuration types for analysis runs.
//!
//! All run behaviour is controlled through [`AnalysisConfig`], built via
//! its [`AnalysisConfigBuilder`]. Keeping every knob in one struct makes
//! it trivial to share configs across tasks and to diff two runs to
//! understand why their outputs differ.
//!
//! # Design choice: builder over constructor
//! A twelve-field constructor is unreadable and breaks on every new field.
//! The builder lets callers set only what they care about and rely on
//! documented defaults for the rest.

use crate::analyze::CancelHandle;
use crate::error::ExtractError;
use crate::pipeline::invoke::{ModelInvoker, DEFAULT_API_BASE, DEFAULT_MODEL};
use crate::progress::ProgressCallback;
use std::fmt;
use std::sync::Arc;

/// Configuration for single-document and batch analysis.
///
/// Built via [`AnalysisConfig::builder()`] or [`AnalysisConfig::default()`].
///
/// # Example
/// ```rust
/// use draw2struct::AnalysisConfig;
///
/// let config = AnalysisConfig::builder()
///     .model("gemini-2.5-pro")
///     .concurrency(3)
///     .max_retries(2)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct AnalysisConfig {
    /// Model identifier. Default: `gemini-2.5-pro`.
    pub model: String,

    /// Explicit API key. If `None`, `GEMINI_API_KEY` then `GOOGLE_API_KEY`
    /// are read from the environment when the invoker is resolved.
    pub api_key: Option<String>,

    /// REST endpoint base. Default: the public Gemini API. Point it at a
    /// regional deployment or a local stub for testing.
    pub api_base: String,

    /// Number of concurrent model calls in batch mode. Default: 5.
    ///
    /// Model APIs are network-bound, not CPU-bound, so a small pool cuts
    /// wall-clock time substantially. The cap is deliberately modest to
    /// respect upstream rate limits; lower it if you see 429s.
    pub concurrency: usize,

    /// Sampling temperature. Default: 0.1.
    ///
    /// Low temperature keeps the model deterministic and faithful to what
    /// is printed on the drawing — exactly what field extraction wants.
    pub temperature: f32,

    /// Maximum tokens the model may generate per document. Default: 4096.
    pub max_output_tokens: usize,

    /// Maximum retry attempts on a transient model failure. Default: 3.
    ///
    /// Permanent errors (bad API key, refusals, unparseable replies) are
    /// not retried — they surface immediately.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds (exponential backoff). Default: 500.
    ///
    /// Doubles after each attempt: 500 ms → 1 s → 2 s. Exponential backoff
    /// avoids the thundering-herd problem where concurrent workers retry
    /// simultaneously against a recovering endpoint.
    pub retry_backoff_ms: u64,

    /// Per-model-call timeout in seconds. Default: 60.
    ///
    /// A timed-out document fails like any other; it never stalls the
    /// rest of the batch.
    pub api_timeout_secs: u64,

    /// Pre-constructed invoker. Takes precedence over `api_key`/env
    /// resolution. This is also the test seam.
    pub invoker: Option<Arc<dyn ModelInvoker>>,

    /// Per-document progress events. Default: none.
    pub progress_callback: Option<ProgressCallback>,

    /// Cooperative cancellation for batch runs. Default: none.
    pub cancel: Option<CancelHandle>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            api_key: None,
            api_base: DEFAULT_API_BASE.to_string(),
            concurrency: 5,
            temperature: 0.1,
            max_output_tokens: 4096,
            max_retries: 3,
            retry_backoff_ms: 500,
            api_timeout_secs: 60,
            invoker: None,
            progress_callback: None,
            cancel: None,
        }
    }
}

impl fmt::Debug for AnalysisConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalysisConfig")
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("api_base", &self.api_base)
            .field("concurrency", &self.concurrency)
            .field("temperature", &self.temperature)
            .field("max_output_tokens", &self.max_output_tokens)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("invoker", &self.invoker.as_ref().map(|_| "<dyn ModelInvoker>"))
            .finish()
    }
}

impl AnalysisConfig {
    /// Create a new builder for `AnalysisConfig`.
    pub fn builder() -> AnalysisConfigBuilder {
        AnalysisConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`AnalysisConfig`].
pub struct AnalysisConfigBuilder {
    config: AnalysisConfig,
}

impl AnalysisConfigBuilder {
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = Some(key.into());
        self
    }

    pub fn api_base(mut self, base: impl Into<String>) -> Self {
        self.config.api_base = base.into();
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_output_tokens(mut self, n: usize) -> Self {
        self.config.max_output_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn invoker(mut self, invoker: Arc<dyn ModelInvoker>) -> Self {
        self.config.invoker = Some(invoker);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    pub fn cancel(mut self, handle: CancelHandle) -> Self {
        self.config.cancel = Some(handle);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<AnalysisConfig, ExtractError> {
        let c = &self.config;
        if c.model.trim().is_empty() {
            return Err(ExtractError::InvalidConfig("Model must not be empty".into()));
        }
        if c.concurrency == 0 {
            return Err(ExtractError::InvalidConfig("Concurrency must be ≥ 1".into()));
        }
        if c.api_timeout_secs == 0 {
            return Err(ExtractError::InvalidConfig(
                "API timeout must be ≥ 1 second".into(),
            ));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = AnalysisConfig::default();
        assert_eq!(c.model, "gemini-2.5-pro");
        assert_eq!(c.concurrency, 5);
        assert_eq!(c.max_retries, 3);
        assert_eq!(c.retry_backoff_ms, 500);
        assert_eq!(c.api_timeout_secs, 60);
        assert!(c.invoker.is_none());
    }

    #[test]
    fn builder_clamps_concurrency() {
        let c = AnalysisConfig::builder().concurrency(0).build().unwrap();
        assert_eq!(c.concurrency, 1);
    }

    #[test]
    fn builder_clamps_temperature() {
        let c = AnalysisConfig::builder().temperature(9.0).build().unwrap();
        assert_eq!(c.temperature, 2.0);
    }

    #[test]
    fn empty_model_rejected() {
        let result = AnalysisConfig::builder().model("  ").build();
        assert!(matches!(result, Err(ExtractError::InvalidConfig(_))));
    }

    #[test]
    fn zero_timeout_rejected() {
        let result = AnalysisConfig::builder().api_timeout_secs(0).build();
        assert!(matches!(result, Err(ExtractError::InvalidConfig(_))));
    }

    #[test]
    fn debug_redacts_api_key() {
        let c = AnalysisConfig::builder().api_key("sk-secret").build().unwrap();
        let debug = format!("{c:?}");
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("<redacted>"));
    }
}
