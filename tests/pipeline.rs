//! End-to-end pipeline tests against an injected mock invoker.
//!
//! These exercise the full batch path (prompt build, invoke with retry,
//! parse, reassembly, stats) without any network access.

use async_trait::async_trait;
use draw2struct::{
    analyze, analyze_batch, write_batch_json, AnalysisConfig, AnalysisProfile, AnalysisRequest,
    BatchState, CancelHandle, DocumentError, DocumentInput, ExtractionItem, ExtractionSchema,
    MimeType, ModelInvoker,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn pdf_doc(name: &str) -> DocumentInput {
    DocumentInput::new(name, b"%PDF-1.4 test payload".to_vec(), MimeType::Pdf)
}

fn harness_profile() -> AnalysisProfile {
    AnalysisProfile {
        schema: ExtractionSchema::new(vec![
            ExtractionItem::new("Part Number", "title block"),
            ExtractionItem::named("Material"),
        ]),
        customer_context: "Automotive OEM".into(),
        component_context: "Door harness".into(),
        want_evidence: false,
    }
}

fn config_with(invoker: Arc<dyn ModelInvoker>) -> AnalysisConfig {
    AnalysisConfig::builder()
        .invoker(invoker)
        .max_retries(0)
        .retry_backoff_ms(0)
        .build()
        .expect("valid config")
}

/// Replies per file name; files not in the map get a refusal.
struct ScriptedInvoker {
    replies: HashMap<String, Result<String, DocumentError>>,
}

#[async_trait]
impl ModelInvoker for ScriptedInvoker {
    async fn invoke(
        &self,
        document: &DocumentInput,
        _instructions: &str,
    ) -> Result<String, DocumentError> {
        self.replies
            .get(&document.file_name)
            .cloned()
            .unwrap_or(Err(DocumentError::Refusal))
    }
}

#[tokio::test]
async fn batch_isolates_failures_and_preserves_input_order() {
    let mut replies = HashMap::new();
    replies.insert(
        "a.pdf".to_string(),
        Ok(r#"{"Part Number": "PN-1", "Material": "PA66"}"#.to_string()),
    );
    replies.insert(
        "b.pdf".to_string(),
        Err(DocumentError::Upstream {
            status: Some(400),
            detail: "bad request".into(),
            retries: 0,
        }),
    );
    replies.insert(
        "c.pdf".to_string(),
        Ok(r#"{"Part Number": "PN-3", "Material": null}"#.to_string()),
    );

    let config = config_with(Arc::new(ScriptedInvoker { replies }));
    let documents = vec![pdf_doc("a.pdf"), pdf_doc("b.pdf"), pdf_doc("c.pdf")];

    let result = analyze_batch(documents, &harness_profile(), &config)
        .await
        .expect("batch must not abort on per-document failure");

    assert_eq!(result.outcomes.len(), 3);
    assert_eq!(result.state, BatchState::PartiallyFailed);
    assert_eq!(result.stats.extracted, 2);
    assert_eq!(result.stats.failed, 1);
    assert_eq!(result.stats.skipped, 0);

    // Input order, regardless of completion order.
    let names: Vec<&str> = result.outcomes.iter().map(|o| o.file_name()).collect();
    assert_eq!(names, vec!["a.pdf", "b.pdf", "c.pdf"]);

    assert!(!result.outcomes[0].is_failure());
    assert!(result.outcomes[1].is_failure());
    assert!(!result.outcomes[2].is_failure());

    let record = result.outcomes[0].record().unwrap();
    assert_eq!(record.fields["Part Number"], "PN-1");

    // Explicit null from the model survives as JSON null.
    let record = result.outcomes[2].record().unwrap();
    assert!(record.fields["Material"].is_null());
}

#[tokio::test]
async fn batch_of_pure_failures_still_completes() {
    let config = config_with(Arc::new(ScriptedInvoker {
        replies: HashMap::new(),
    }));
    let documents = vec![pdf_doc("a.pdf"), pdf_doc("b.pdf")];

    let result = analyze_batch(documents, &harness_profile(), &config)
        .await
        .unwrap();

    assert_eq!(result.state, BatchState::Completed);
    assert_eq!(result.stats.extracted, 0);
    assert_eq!(result.stats.failed, 2);
    assert!(result.outcomes.iter().all(|o| o.is_failure()));
}

/// Tracks the number of simultaneously running invocations.
struct GaugeInvoker {
    current: AtomicUsize,
    high_water: AtomicUsize,
}

#[async_trait]
impl ModelInvoker for GaugeInvoker {
    async fn invoke(
        &self,
        _document: &DocumentInput,
        _instructions: &str,
    ) -> Result<String, DocumentError> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.high_water.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok("{}".to_string())
    }
}

#[tokio::test(start_paused = true)]
async fn batch_never_exceeds_concurrency_cap() {
    let gauge = Arc::new(GaugeInvoker {
        current: AtomicUsize::new(0),
        high_water: AtomicUsize::new(0),
    });
    let config = AnalysisConfig::builder()
        .invoker(Arc::clone(&gauge) as Arc<dyn ModelInvoker>)
        .concurrency(3)
        .max_retries(0)
        .build()
        .unwrap();

    let documents: Vec<DocumentInput> =
        (0..10).map(|i| pdf_doc(&format!("d{i}.pdf"))).collect();

    let result = analyze_batch(documents, &harness_profile(), &config)
        .await
        .unwrap();

    assert_eq!(result.stats.extracted, 10);
    let peak = gauge.high_water.load(Ordering::SeqCst);
    assert!(peak <= 3, "peak concurrency {peak} exceeded the cap of 3");
    assert!(peak >= 2, "expected overlapping invocations, saw peak {peak}");
}

/// Cancels the shared handle during its first invocation.
struct CancellingInvoker {
    handle: CancelHandle,
}

#[async_trait]
impl ModelInvoker for CancellingInvoker {
    async fn invoke(
        &self,
        _document: &DocumentInput,
        _instructions: &str,
    ) -> Result<String, DocumentError> {
        self.handle.cancel();
        tokio::time::sleep(Duration::from_millis(10)).await;
        Ok(r#"{"Part Number": "PN-1"}"#.to_string())
    }
}

#[tokio::test(start_paused = true)]
async fn cancellation_skips_unstarted_documents() {
    let handle = CancelHandle::new();
    let config = AnalysisConfig::builder()
        .invoker(Arc::new(CancellingInvoker {
            handle: handle.clone(),
        }))
        .concurrency(1)
        .max_retries(0)
        .cancel(handle)
        .build()
        .unwrap();

    let documents = vec![pdf_doc("a.pdf"), pdf_doc("b.pdf"), pdf_doc("c.pdf")];
    let result = analyze_batch(documents, &harness_profile(), &config)
        .await
        .unwrap();

    // In-flight document finishes; the rest are skipped with no
    // fabricated outcome rows.
    assert_eq!(result.state, BatchState::Cancelled);
    assert_eq!(result.outcomes.len(), 1);
    assert_eq!(result.outcomes[0].file_name(), "a.pdf");
    assert_eq!(result.stats.extracted, 1);
    assert_eq!(result.stats.failed, 0);
    assert_eq!(result.stats.skipped, 2);
}

#[tokio::test]
async fn evidence_reply_splits_into_fields_and_evidence() {
    let mut replies = HashMap::new();
    replies.insert(
        "a.pdf".to_string(),
        Ok(r#"```json
{"results": {"Part Number": "PN-7", "Material": "Copper"},
 "evidence": {"Part Number": "title block, lower right", "Material": "note 4"}}
```"#
            .to_string()),
    );
    let config = config_with(Arc::new(ScriptedInvoker { replies }));

    let mut profile = harness_profile();
    profile.want_evidence = true;

    let record = analyze(AnalysisRequest::new(pdf_doc("a.pdf"), profile), &config)
        .await
        .expect("extraction succeeds");

    assert_eq!(record.fields["Part Number"], "PN-7");
    assert!(!record.fields.contains_key("results"));
    let evidence = record.evidence.expect("evidence requested and returned");
    assert_eq!(evidence["Material"], "note 4");
}

#[tokio::test]
async fn empty_schema_batch_is_a_valid_run() {
    let mut replies = HashMap::new();
    replies.insert("a.pdf".to_string(), Ok("{}".to_string()));
    let config = config_with(Arc::new(ScriptedInvoker { replies }));

    let profile = AnalysisProfile {
        schema: ExtractionSchema::new(vec![ExtractionItem::named("   ")]),
        customer_context: String::new(),
        component_context: String::new(),
        want_evidence: false,
    };

    let result = analyze_batch(vec![pdf_doc("a.pdf")], &profile, &config)
        .await
        .unwrap();

    assert_eq!(result.stats.extracted, 1);
    let record = result.outcomes[0].record().unwrap();
    assert!(record.fields.is_empty());
}

#[tokio::test]
async fn invalid_document_fails_before_any_invocation() {
    struct PanickingInvoker;

    #[async_trait]
    impl ModelInvoker for PanickingInvoker {
        async fn invoke(
            &self,
            _document: &DocumentInput,
            _instructions: &str,
        ) -> Result<String, DocumentError> {
            panic!("must not be called for an invalid document");
        }
    }

    let config = config_with(Arc::new(PanickingInvoker));
    // Claims PDF, carries a PNG signature.
    let bogus = DocumentInput::new(
        "fake.pdf",
        vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A],
        MimeType::Pdf,
    );

    let result = analyze_batch(vec![bogus], &harness_profile(), &config)
        .await
        .unwrap();

    assert_eq!(result.stats.failed, 1);
    let failure = result.outcomes[0].failure().unwrap();
    assert!(matches!(failure.error, DocumentError::Invalid { .. }));
}

/// Fails with a transient error until `succeed_after` attempts were made.
struct FlakyInvoker {
    attempts: Mutex<usize>,
    succeed_after: usize,
}

#[async_trait]
impl ModelInvoker for FlakyInvoker {
    async fn invoke(
        &self,
        _document: &DocumentInput,
        _instructions: &str,
    ) -> Result<String, DocumentError> {
        let mut attempts = self.attempts.lock().unwrap();
        *attempts += 1;
        if *attempts <= self.succeed_after {
            Err(DocumentError::Upstream {
                status: Some(503),
                detail: "overloaded".into(),
                retries: 0,
            })
        } else {
            Ok(r#"{"Part Number": "PN-9"}"#.to_string())
        }
    }
}

#[tokio::test(start_paused = true)]
async fn transient_failures_are_retried_and_counted() {
    let config = AnalysisConfig::builder()
        .invoker(Arc::new(FlakyInvoker {
            attempts: Mutex::new(0),
            succeed_after: 2,
        }))
        .max_retries(3)
        .retry_backoff_ms(100)
        .build()
        .unwrap();

    let result = analyze_batch(vec![pdf_doc("a.pdf")], &harness_profile(), &config)
        .await
        .unwrap();

    assert_eq!(result.stats.extracted, 1);
    let record = result.outcomes[0].record().unwrap();
    assert_eq!(record.retries, 2);
}

#[tokio::test]
async fn table_layout_matches_schema_order() {
    let mut replies = HashMap::new();
    replies.insert(
        "a.pdf".to_string(),
        Ok(r#"{"Part Number": "PN-1", "Material": "PA66"}"#.to_string()),
    );
    let config = config_with(Arc::new(ScriptedInvoker { replies }));
    let profile = harness_profile();

    let result = analyze_batch(
        vec![pdf_doc("a.pdf"), pdf_doc("broken.pdf")],
        &profile,
        &config,
    )
    .await
    .unwrap();

    let table = result.to_table(&profile.schema);
    assert_eq!(table.columns, vec!["File", "Part Number", "Material", "Error"]);
    assert_eq!(table.rows.len(), 2);

    assert_eq!(table.rows[0][0], "a.pdf");
    assert_eq!(table.rows[0][1], "PN-1");
    assert_eq!(table.rows[0][3], "");

    // Failure row: empty field cells, populated error cell.
    assert_eq!(table.rows[1][0], "broken.pdf");
    assert_eq!(table.rows[1][1], "");
    assert!(!table.rows[1][3].is_empty());
}

#[tokio::test]
async fn batch_json_written_atomically() {
    let mut replies = HashMap::new();
    replies.insert(
        "a.pdf".to_string(),
        Ok(r#"{"Part Number": "PN-1"}"#.to_string()),
    );
    let config = config_with(Arc::new(ScriptedInvoker { replies }));

    let result = analyze_batch(vec![pdf_doc("a.pdf")], &harness_profile(), &config)
        .await
        .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out").join("results.json");
    write_batch_json(&result, &path).await.unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    let round_trip: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(round_trip["stats"]["extracted"], 1);
    assert!(!dir.path().join("out").join("results.json.tmp").exists());

    drop(dir);
}
