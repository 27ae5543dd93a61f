//! Progress-callback trait for per-document analysis events.
//!
//! Inject an [`Arc<dyn AnalysisProgressCallback>`] via
//! [`crate::config::AnalysisConfigBuilder::progress_callback`] to receive
//! real-time events as documents move through the pipeline.
//!
//! This is the single non-blocking feedback abstraction shared by both
//! operating modes: a batch fan-out reports per-document completion, and a
//! single-document run still fires start/complete so a host can animate a
//! coarse indicator during a multi-second remote call (the model reports
//! no real progress, so hosts tick on a fixed cadence).
//!
//! # Why callbacks instead of channels?
//!
//! The callback approach is the least-invasive integration point: callers
//! can forward events to a Tokio channel, a WebSocket, or a terminal
//! progress bar without the library knowing how the host communicates. The
//! trait is `Send + Sync` because documents are processed concurrently.

use std::sync::Arc;

/// Called by the analysis pipeline as it processes each document.
///
/// All methods have default no-op implementations so callers only override
/// what they care about.
///
/// # Thread safety
///
/// `on_document_start`, `on_document_complete`, and `on_document_error`
/// may be called concurrently from different tasks. Implementations must
/// protect shared mutable state (e.g. `Mutex`, `AtomicUsize`).
pub trait AnalysisProgressCallback: Send + Sync {
    /// Called once before any document is submitted.
    fn on_batch_start(&self, total_documents: usize) {
        let _ = total_documents;
    }

    /// Called just before a document's model request is sent.
    fn on_document_start(&self, file_name: &str, index: usize, total: usize) {
        let _ = (file_name, index, total);
    }

    /// Called when a document yields an extracted record.
    ///
    /// `field_count` is the number of fields the model returned.
    fn on_document_complete(&self, file_name: &str, index: usize, total: usize, field_count: usize) {
        let _ = (file_name, index, total, field_count);
    }

    /// Called when a document fails after retries are exhausted.
    fn on_document_error(&self, file_name: &str, index: usize, total: usize, error: &str) {
        let _ = (file_name, index, total, error);
    }

    /// Called once after every non-skipped document has been attempted.
    fn on_batch_complete(&self, total_documents: usize, success_count: usize) {
        let _ = (total_documents, success_count);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl AnalysisProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::AnalysisConfig`].
pub type ProgressCallback = Arc<dyn AnalysisProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct TrackingCallback {
        starts: AtomicUsize,
        completes: AtomicUsize,
        errors: AtomicUsize,
    }

    impl AnalysisProgressCallback for TrackingCallback {
        fn on_document_start(&self, _file: &str, _index: usize, _total: usize) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn on_document_complete(&self, _file: &str, _index: usize, _total: usize, _n: usize) {
            self.completes.fetch_add(1, Ordering::SeqCst);
        }

        fn on_document_error(&self, _file: &str, _index: usize, _total: usize, _e: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_batch_start(3);
        cb.on_document_start("a.pdf", 0, 3);
        cb.on_document_complete("a.pdf", 0, 3, 7);
        cb.on_document_error("b.pdf", 1, 3, "timeout");
        cb.on_batch_complete(3, 2);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback {
            starts: AtomicUsize::new(0),
            completes: AtomicUsize::new(0),
            errors: AtomicUsize::new(0),
        };

        tracker.on_document_start("a.pdf", 0, 2);
        tracker.on_document_complete("a.pdf", 0, 2, 5);
        tracker.on_document_start("b.pdf", 1, 2);
        tracker.on_document_error("b.pdf", 1, 2, "refused");

        assert_eq!(tracker.starts.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.completes.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.errors.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn arc_dyn_callback_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ProgressCallback>();
    }
}
