//! Thread-safe counters describing ingestion activity.

use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counters shared across pipeline workers.
#[derive(Default)]
pub struct IngestMetrics {
    documents_processed: AtomicU64,
    documents_failed: AtomicU64,
    chunks_upserted: AtomicU64,
    embeddings_generated: AtomicU64,
    embeddings_skipped: AtomicU64,
}

impl IngestMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a document that completed the pipeline, with its chunk churn.
    pub fn record_document(&self, chunks_upserted: u64) {
        self.documents_processed.fetch_add(1, Ordering::Relaxed);
        self.chunks_upserted
            .fetch_add(chunks_upserted, Ordering::Relaxed);
    }

    /// Record a document that failed a pipeline stage.
    pub fn record_failure(&self) {
        self.documents_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record embeddings produced by a provider call.
    pub fn record_embeddings(&self, count: u64) {
        self.embeddings_generated.fetch_add(count, Ordering::Relaxed);
    }

    /// Record embeddings avoided because the chunk hash was unchanged.
    pub fn record_skipped_embeddings(&self, count: u64) {
        self.embeddings_skipped.fetch_add(count, Ordering::Relaxed);
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            documents_processed: self.documents_processed.load(Ordering::Relaxed),
            documents_failed: self.documents_failed.load(Ordering::Relaxed),
            chunks_upserted: self.chunks_upserted.load(Ordering::Relaxed),
            embeddings_generated: self.embeddings_generated.load(Ordering::Relaxed),
            embeddings_skipped: self.embeddings_skipped.load(Ordering::Relaxed),
        }
    }
}

/// Immutable view of ingestion counters used for reporting.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Documents that reached COMPLETE since startup.
    pub documents_processed: u64,
    /// Documents that ended in FAILED since startup.
    pub documents_failed: u64,
    /// Chunk rows inserted or updated across all documents.
    pub chunks_upserted: u64,
    /// Embedding vectors produced by provider calls.
    pub embeddings_generated: u64,
    /// Embedding calls avoided by content-hash dedup.
    pub embeddings_skipped: u64,
}
