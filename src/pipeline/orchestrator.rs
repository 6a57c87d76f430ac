//! Per-document pipeline state machine.
//!
//! Every document moves PENDING -> EXTRACTING -> CLEANING -> CHUNKING ->
//! ENRICHING -> INDEXING -> COMPLETE. A stage failure moves it to FAILED with
//! the stage and reason on the row; failures are confined to the one document
//! and reported through the session rather than propagated as errors.

use std::sync::Arc;

use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::chunking::{self, content_hash};
use crate::config::EngineConfig;
use crate::embedding::{EmbeddingClient, RetryPolicy, embed_with_retry};
use crate::enrich::Enricher;
use crate::metrics::{IngestMetrics, MetricsSnapshot};
use crate::pipeline::clean::clean_pages;
use crate::pipeline::session::SessionStore;
use crate::pipeline::types::{DocumentFailure, PipelineError, ProcessOutcome};
use crate::store::{
    ChunkStore, DocumentStatus, NewChunk, ReconcileReport, SearchConfig, SearchHit, SearchIndex,
    UpsertSummary,
};
use crate::vector::{ScoredChunk, VectorIndex};

/// Coordinates the full ingestion pipeline over one database.
///
/// The orchestrator owns long-lived handles to the store, both indexes, the
/// embedding client, and the metrics registry. Construct it once near process
/// start and share it through an `Arc`; batch workers clone nothing but the
/// `Arc`.
pub struct PipelineOrchestrator {
    store: ChunkStore,
    search: SearchIndex,
    vectors: VectorIndex,
    embedder: Arc<dyn EmbeddingClient>,
    enricher: Arc<dyn Enricher>,
    sessions: SessionStore,
    metrics: Arc<IngestMetrics>,
    rate_budget: Arc<Semaphore>,
    retry_policy: RetryPolicy,
    config: EngineConfig,
}

impl PipelineOrchestrator {
    /// Build an orchestrator over an already-open store.
    pub fn new(
        store: ChunkStore,
        embedder: Arc<dyn EmbeddingClient>,
        enricher: Arc<dyn Enricher>,
        sessions: SessionStore,
        config: EngineConfig,
    ) -> Self {
        let search = SearchIndex::new(store.connection().clone(), config.search());
        let vectors = VectorIndex::new(store.connection().clone());
        let rate_budget = Arc::new(Semaphore::new(config.embed_concurrency));
        let retry_policy = config.retry_policy();
        Self {
            store,
            search,
            vectors,
            embedder,
            enricher,
            sessions,
            metrics: Arc::new(IngestMetrics::new()),
            rate_budget,
            retry_policy,
            config,
        }
    }

    /// Open the configured database and build an orchestrator over it.
    pub async fn open(
        config: EngineConfig,
        embedder: Arc<dyn EmbeddingClient>,
        enricher: Arc<dyn Enricher>,
        sessions: SessionStore,
    ) -> Result<Self, PipelineError> {
        let store = ChunkStore::open(&config.database_path).await?;
        Ok(Self::new(store, embedder, enricher, sessions, config))
    }

    /// Underlying chunk store.
    pub fn store(&self) -> &ChunkStore {
        &self.store
    }

    /// Session registry shared with callers.
    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Current metrics snapshot.
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Active configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Submit a document for processing, registering it with `session_id`.
    ///
    /// Resubmitting an existing id requeues it as PENDING with the new text;
    /// stored chunks stay in place so an unchanged resubmission short-circuits
    /// during chunk upsert.
    pub async fn submit(
        &self,
        document_id: &str,
        text: &str,
        page_offsets: &[usize],
        session_id: Option<Uuid>,
    ) -> Result<(), PipelineError> {
        let session_str = session_id.map(|id| id.to_string());
        self.store
            .upsert_document(document_id, text, page_offsets, session_str.as_deref())
            .await?;
        if let Some(session_id) = session_id {
            self.sessions.register_document(session_id);
        }
        tracing::debug!(document_id, session = ?session_id, "Document submitted");
        Ok(())
    }

    /// Claim and run one document through all stages.
    ///
    /// Returns [`ProcessOutcome::Skipped`] when the document is not PENDING,
    /// which is how claim contention between workers surfaces. Stage failures
    /// come back as [`ProcessOutcome::Failed`], already recorded on the
    /// document row and the session.
    pub async fn process_document(
        &self,
        document_id: &str,
        session_id: Option<Uuid>,
    ) -> Result<ProcessOutcome, PipelineError> {
        if !self.store.claim_pending(document_id).await? {
            tracing::debug!(document_id, "Claim contention, skipping");
            return Ok(ProcessOutcome::Skipped);
        }

        match self.run_stages(document_id).await {
            Ok(summary) => {
                self.store
                    .set_status(document_id, DocumentStatus::Complete)
                    .await?;
                self.metrics
                    .record_document((summary.inserted + summary.updated) as u64);
                if let Some(session_id) = session_id {
                    self.sessions.record_processed(session_id);
                }
                tracing::info!(
                    document_id,
                    inserted = summary.inserted,
                    updated = summary.updated,
                    unchanged = summary.unchanged,
                    deleted = summary.deleted,
                    "Document processed"
                );
                Ok(ProcessOutcome::Completed(summary))
            }
            Err((stage, reason)) => {
                self.store.mark_failed(document_id, stage, &reason).await?;
                self.metrics.record_failure();
                if let Some(session_id) = session_id {
                    self.sessions.record_failed(
                        session_id,
                        DocumentFailure {
                            document_id: document_id.to_string(),
                            stage: stage.as_str().to_string(),
                            reason: reason.clone(),
                        },
                    );
                }
                tracing::warn!(document_id, stage = %stage, reason, "Document failed");
                Ok(ProcessOutcome::Failed { stage, reason })
            }
        }
    }

    /// Run the stages after a successful claim.
    ///
    /// Every failure inside a stage, storage errors included, comes back as
    /// `(stage, reason)` so it stays scoped to this one document; sibling
    /// documents in a batch are never affected.
    async fn run_stages(
        &self,
        document_id: &str,
    ) -> Result<UpsertSummary, (DocumentStatus, String)> {
        // EXTRACTING: the claim moved the row here; load what was submitted.
        let row = self
            .store
            .document(document_id)
            .await
            .map_err(|err| (DocumentStatus::Extracting, err.to_string()))?;

        self.enter_stage(document_id, DocumentStatus::Cleaning)
            .await?;
        let (cleaned, page_offsets) = clean_pages(&row.text, &row.page_offsets);

        self.enter_stage(document_id, DocumentStatus::Chunking)
            .await?;
        let slices = chunking::chunk(&cleaned, &page_offsets, &self.config.chunking())
            .map_err(|err| (DocumentStatus::Chunking, err.to_string()))?;
        let new_chunks: Vec<NewChunk> = slices
            .iter()
            .map(|slice| NewChunk {
                index: slice.index,
                text: slice.text.clone(),
                start_char: slice.start_char,
                end_char: slice.end_char,
                page_number: slice.page_number,
                content_hash: content_hash(&slice.text),
            })
            .collect();
        // An upsert failure already rolled its transaction back, leaving the
        // prior chunk set intact.
        let summary = self
            .store
            .upsert_chunks(document_id, &new_chunks)
            .await
            .map_err(|err| (DocumentStatus::Chunking, err.to_string()))?;
        self.metrics
            .record_skipped_embeddings(summary.unchanged as u64);

        self.enter_stage(document_id, DocumentStatus::Enriching)
            .await?;
        for slice in &slices {
            if !summary.touched_indices.contains(&slice.index) {
                continue;
            }
            let enrichment = self.enricher.enrich(&slice.text);
            self.store
                .update_enrichment(document_id, slice.index, &enrichment)
                .await
                .map_err(|err| (DocumentStatus::Enriching, err.to_string()))?;
        }

        self.enter_stage(document_id, DocumentStatus::Indexing)
            .await?;
        let pending = self
            .store
            .chunks_pending_embedding(document_id)
            .await
            .map_err(|err| (DocumentStatus::Indexing, err.to_string()))?;
        let mut failed_indices: Vec<usize> = Vec::new();
        let mut last_reason = String::new();
        for chunk in &pending {
            match embed_with_retry(
                self.embedder.as_ref(),
                &self.rate_budget,
                &self.retry_policy,
                &chunk.text,
            )
            .await
            {
                Ok(response) => {
                    self.vectors
                        .upsert(chunk.id, &response.vector, &response.model, response.dims)
                        .await
                        .map_err(|err| (DocumentStatus::Indexing, err.to_string()))?;
                    self.metrics.record_embeddings(1);
                }
                Err(err) => {
                    failed_indices.push(chunk.chunk_index);
                    last_reason = err.to_string();
                }
            }
        }
        if !failed_indices.is_empty() {
            return Err((
                DocumentStatus::Indexing,
                format!(
                    "embedding exhausted retries for chunk indices {failed_indices:?}: {last_reason}"
                ),
            ));
        }

        Ok(summary)
    }

    /// Advance to `stage`, attributing a failed transition to that stage.
    async fn enter_stage(
        &self,
        document_id: &str,
        stage: DocumentStatus,
    ) -> Result<(), (DocumentStatus, String)> {
        self.store
            .set_status(document_id, stage)
            .await
            .map_err(|err| (stage, err.to_string()))
    }

    /// Keyword search over all committed chunks.
    pub async fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchHit>, PipelineError> {
        Ok(self.search.search(query, top_k).await?)
    }

    /// Semantic search: embed the query text and rank stored vectors.
    pub async fn semantic_search(
        &self,
        text: &str,
        top_k: usize,
    ) -> Result<Vec<ScoredChunk>, PipelineError> {
        let response = embed_with_retry(
            self.embedder.as_ref(),
            &self.rate_budget,
            &self.retry_policy,
            text,
        )
        .await?;
        Ok(self.vectors.query(&response.vector, top_k).await?)
    }

    /// Tear down a document's derived state and return it to PENDING.
    pub async fn reset_document(&self, document_id: &str) -> Result<(), PipelineError> {
        // Verify existence first so resets of unknown ids are explicit errors.
        self.store.document(document_id).await?;
        self.store.reset_document(document_id).await?;
        tracing::info!(document_id, "Document reset to pending");
        Ok(())
    }

    /// Rebuild the keyword index from chunk rows, the drift-repair path.
    pub async fn rebuild_search_index(&self) -> Result<ReconcileReport, PipelineError> {
        Ok(self.search.rebuild().await?)
    }

    /// Progress snapshot for `session_id`.
    pub fn get_session_progress(
        &self,
        session_id: Uuid,
    ) -> Result<crate::pipeline::types::SessionProgress, PipelineError> {
        self.sessions
            .progress(session_id)
            .ok_or(PipelineError::SessionNotFound {
                session_id: session_id.to_string(),
            })
    }

    /// BM25 parameters currently in effect.
    pub fn search_config(&self) -> SearchConfig {
        self.config.search()
    }
}
