//! End-to-end pipeline scenarios over an in-memory database.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use chunkmill::config::EngineConfig;
use chunkmill::embedding::{EmbeddingClient, EmbeddingError, EmbeddingResponse, HashingClient};
use chunkmill::enrich::HeuristicEnricher;
use chunkmill::pipeline::{
    BatchCoordinator, CancelFlag, PipelineOrchestrator, ProcessOutcome, SessionStatus,
    SessionStore,
};
use chunkmill::store::{ChunkStore, DocumentStatus};

/// Delegates to the hashing client while counting calls; any text containing
/// the poison marker fails every attempt.
struct CountingClient {
    inner: HashingClient,
    calls: AtomicU32,
}

const POISON: &str = "UNEMBEDDABLE";

impl CountingClient {
    fn new(dims: usize) -> Self {
        Self {
            inner: HashingClient::new("hashing-v1", dims),
            calls: AtomicU32::new(0),
        }
    }

    fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingClient for CountingClient {
    async fn embed(&self, text: &str) -> Result<EmbeddingResponse, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if text.contains(POISON) {
            return Err(EmbeddingError::Provider("permanent refusal".to_string()));
        }
        self.inner.embed(text).await
    }
}

fn fast_config() -> EngineConfig {
    EngineConfig {
        chunk_size: 80,
        chunk_overlap: 16,
        batch_workers: 4,
        embed_max_retries: 2,
        embed_backoff_ms: 1,
        embedding_dimension: 16,
        ..EngineConfig::default()
    }
}

async fn build_orchestrator(client: Arc<CountingClient>) -> Arc<PipelineOrchestrator> {
    let store = ChunkStore::open_in_memory().await.unwrap();
    Arc::new(PipelineOrchestrator::new(
        store,
        client,
        Arc::new(HeuristicEnricher),
        SessionStore::new(),
        fast_config(),
    ))
}

fn report_text(topic: &str) -> String {
    format!(
        "Summary of {topic}. The review covered revenue, staffing, and open risks. \
         Totals were reconciled against the ledger and no discrepancies remained. \
         Follow-up items were assigned to the owning teams with due dates."
    )
}

#[tokio::test]
async fn document_flows_to_complete_and_both_indexes() {
    let client = Arc::new(CountingClient::new(16));
    let orchestrator = build_orchestrator(Arc::clone(&client)).await;

    orchestrator
        .submit("report-1", &report_text("the first quarter"), &[], None)
        .await
        .unwrap();
    let outcome = orchestrator.process_document("report-1", None).await.unwrap();
    let ProcessOutcome::Completed(summary) = outcome else {
        panic!("expected completion, got {outcome:?}");
    };
    assert!(summary.inserted > 0);

    let row = orchestrator.store().document("report-1").await.unwrap();
    assert_eq!(row.status, DocumentStatus::Complete);

    // Keyword index sees the committed chunks.
    let hits = orchestrator.search("ledger", 10).await.unwrap();
    assert!(!hits.is_empty());

    // Every chunk got a vector and its metadata stamped.
    let chunks = orchestrator.store().get_chunks("report-1").await.unwrap();
    assert!(chunks.iter().all(|c| c.indexed_at.is_some()));
    assert!(chunks.iter().all(|c| c.embedding_model.is_some()));
    assert_eq!(client.call_count() as usize, chunks.len());

    // Enrichment ran on every inserted chunk.
    assert!(chunks.iter().all(|c| c.section_type.is_some()));

    let semantic = orchestrator
        .semantic_search("reconciled ledger totals", 5)
        .await
        .unwrap();
    assert!(!semantic.is_empty());
}

#[tokio::test]
async fn unchanged_rerun_makes_no_embedding_calls() {
    let client = Arc::new(CountingClient::new(16));
    let orchestrator = build_orchestrator(Arc::clone(&client)).await;
    let text = report_text("an unchanged document");

    orchestrator.submit("doc", &text, &[], None).await.unwrap();
    orchestrator.process_document("doc", None).await.unwrap();
    let first_calls = client.call_count();
    assert!(first_calls > 0);

    orchestrator.submit("doc", &text, &[], None).await.unwrap();
    let outcome = orchestrator.process_document("doc", None).await.unwrap();
    let ProcessOutcome::Completed(summary) = outcome else {
        panic!("expected completion, got {outcome:?}");
    };
    assert_eq!(summary.inserted, 0);
    assert_eq!(summary.updated, 0);
    assert!(summary.unchanged > 0);
    assert_eq!(client.call_count(), first_calls);

    let metrics = orchestrator.metrics_snapshot();
    assert_eq!(metrics.embeddings_skipped as usize, summary.unchanged);
}

#[tokio::test]
async fn editing_one_chunk_reembeds_only_that_chunk() {
    let client = Arc::new(CountingClient::new(16));
    let orchestrator = build_orchestrator(Arc::clone(&client)).await;

    let paragraphs = [
        "alpha section original wording here",
        "beta section stays identical",
        "gamma section stays identical",
    ];
    let text = paragraphs.join(". ");
    orchestrator.submit("doc", &text, &[], None).await.unwrap();
    orchestrator.process_document("doc", None).await.unwrap();
    let baseline = client.call_count();

    // Same-length replacement keeps every later chunk boundary identical.
    let edited = text.replace("original wording", "modified wording");
    orchestrator.submit("doc", &edited, &[], None).await.unwrap();
    let outcome = orchestrator.process_document("doc", None).await.unwrap();
    let ProcessOutcome::Completed(summary) = outcome else {
        panic!("expected completion, got {outcome:?}");
    };

    assert_eq!(summary.updated as u32 + summary.inserted as u32, client.call_count() - baseline);
    assert!(summary.unchanged > 0);

    // The old wording is gone from search, the new one present.
    assert!(orchestrator.search("original", 10).await.unwrap().is_empty());
    assert!(!orchestrator.search("modified", 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn batch_isolates_embedding_failures_to_their_documents() {
    let client = Arc::new(CountingClient::new(16));
    let orchestrator = build_orchestrator(Arc::clone(&client)).await;
    let session = orchestrator.sessions().create();

    for i in 0..10 {
        let text = if i == 3 || i == 7 {
            format!("{POISON} {}", report_text("a poisoned document"))
        } else {
            report_text(&format!("document number {i}"))
        };
        orchestrator
            .submit(&format!("doc-{i}"), &text, &[], Some(session))
            .await
            .unwrap();
    }

    let stats = BatchCoordinator::new(Arc::clone(&orchestrator))
        .run(Some(session), &CancelFlag::new())
        .await
        .unwrap();
    assert_eq!(stats.processed, 8);
    assert_eq!(stats.failed, 2);
    assert_eq!(stats.skipped, 0);

    let progress = orchestrator.get_session_progress(session).unwrap();
    assert_eq!(progress.total, 10);
    assert_eq!(progress.processed, 8);
    assert_eq!(progress.failed, 2);
    assert_eq!(progress.status, SessionStatus::Complete);
    let mut failed_docs: Vec<&str> = progress
        .failures
        .iter()
        .map(|f| f.document_id.as_str())
        .collect();
    failed_docs.sort_unstable();
    assert_eq!(failed_docs, vec!["doc-3", "doc-7"]);
    assert!(progress.failures.iter().all(|f| f.stage == "indexing"));

    // Failed documents record the stage on their rows and keep their chunks
    // visible in keyword search; only the vectors are missing.
    let row = orchestrator.store().document("doc-3").await.unwrap();
    assert_eq!(row.status, DocumentStatus::Failed);
    assert_eq!(row.failed_stage, Some(DocumentStatus::Indexing));
    let pending = orchestrator
        .store()
        .chunks_pending_embedding("doc-3")
        .await
        .unwrap();
    assert!(!pending.is_empty());
}

#[tokio::test]
async fn storage_failure_during_indexing_marks_the_document_failed() {
    let client = Arc::new(CountingClient::new(16));
    let orchestrator = build_orchestrator(Arc::clone(&client)).await;

    for i in 0..2 {
        orchestrator
            .submit(&format!("doc-{i}"), &report_text("a vector casualty"), &[], None)
            .await
            .unwrap();
    }
    // Break the vector write path out of band; chunk rows and postings are
    // unaffected, so only the INDEXING stage can fail.
    orchestrator
        .store()
        .connection()
        .call(|conn| {
            conn.execute("DROP TABLE chunk_vectors", [])?;
            Ok::<_, tokio_rusqlite::rusqlite::Error>(())
        })
        .await
        .unwrap();

    let stats = BatchCoordinator::new(Arc::clone(&orchestrator))
        .run(None, &CancelFlag::new())
        .await
        .unwrap();

    // The storage failures stay scoped to their documents instead of
    // aborting the batch.
    assert_eq!(stats.failed, 2);
    assert_eq!(stats.processed, 0);
    for i in 0..2 {
        let row = orchestrator
            .store()
            .document(&format!("doc-{i}"))
            .await
            .unwrap();
        assert_eq!(row.status, DocumentStatus::Failed);
        assert_eq!(row.failed_stage, Some(DocumentStatus::Indexing));
        assert!(row.failure.is_some());
    }
    // Keyword search still works from the untouched postings.
    assert!(!orchestrator.search("casualty", 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn reset_tears_down_all_derived_state() {
    let client = Arc::new(CountingClient::new(16));
    let orchestrator = build_orchestrator(Arc::clone(&client)).await;

    orchestrator
        .submit("doc", &report_text("a resettable document"), &[], None)
        .await
        .unwrap();
    orchestrator.process_document("doc", None).await.unwrap();
    assert!(!orchestrator.search("ledger", 10).await.unwrap().is_empty());

    orchestrator.reset_document("doc").await.unwrap();

    let row = orchestrator.store().document("doc").await.unwrap();
    assert_eq!(row.status, DocumentStatus::Pending);
    assert!(orchestrator.store().get_chunks("doc").await.unwrap().is_empty());
    assert!(orchestrator.search("ledger", 10).await.unwrap().is_empty());
    assert!(
        orchestrator
            .semantic_search("reconciled ledger totals", 5)
            .await
            .unwrap()
            .is_empty()
    );

    // The document is processable again from scratch.
    let outcome = orchestrator.process_document("doc", None).await.unwrap();
    assert!(matches!(outcome, ProcessOutcome::Completed(_)));
}

#[tokio::test]
async fn failed_document_can_be_resubmitted_and_recover() {
    let client = Arc::new(CountingClient::new(16));
    let orchestrator = build_orchestrator(Arc::clone(&client)).await;

    orchestrator
        .submit("doc", &format!("{POISON} cannot embed this"), &[], None)
        .await
        .unwrap();
    let outcome = orchestrator.process_document("doc", None).await.unwrap();
    assert!(matches!(
        outcome,
        ProcessOutcome::Failed {
            stage: DocumentStatus::Indexing,
            ..
        }
    ));

    // Resubmission clears the failure and requeues.
    orchestrator
        .submit("doc", &report_text("a recovered document"), &[], None)
        .await
        .unwrap();
    let row = orchestrator.store().document("doc").await.unwrap();
    assert_eq!(row.status, DocumentStatus::Pending);
    assert!(row.failure.is_none());

    let outcome = orchestrator.process_document("doc", None).await.unwrap();
    assert!(matches!(outcome, ProcessOutcome::Completed(_)));
}

#[tokio::test]
async fn processing_a_claimed_document_is_skipped() {
    let client = Arc::new(CountingClient::new(16));
    let orchestrator = build_orchestrator(Arc::clone(&client)).await;

    orchestrator
        .submit("doc", "short text", &[], None)
        .await
        .unwrap();
    assert!(orchestrator.store().claim_pending("doc").await.unwrap());

    let outcome = orchestrator.process_document("doc", None).await.unwrap();
    assert_eq!(outcome, ProcessOutcome::Skipped);
}

#[tokio::test]
async fn on_disk_database_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("chunkmill.db");
    let config = EngineConfig {
        database_path: path.clone(),
        ..fast_config()
    };

    {
        let orchestrator = PipelineOrchestrator::open(
            config.clone(),
            Arc::new(HashingClient::new("hashing-v1", 16)),
            Arc::new(HeuristicEnricher),
            SessionStore::new(),
        )
        .await
        .unwrap();
        orchestrator
            .submit("doc", &report_text("a durable document"), &[], None)
            .await
            .unwrap();
        orchestrator.process_document("doc", None).await.unwrap();
    }

    let reopened = PipelineOrchestrator::open(
        config,
        Arc::new(HashingClient::new("hashing-v1", 16)),
        Arc::new(HeuristicEnricher),
        SessionStore::new(),
    )
    .await
    .unwrap();
    let row = reopened.store().document("doc").await.unwrap();
    assert_eq!(row.status, DocumentStatus::Complete);
    assert!(!reopened.search("ledger", 10).await.unwrap().is_empty());
    assert!(
        !reopened
            .semantic_search("ledger totals", 5)
            .await
            .unwrap()
            .is_empty()
    );
}
