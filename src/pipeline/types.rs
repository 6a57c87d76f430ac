//! Shared pipeline data types.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::embedding::EmbeddingError;
use crate::store::{DocumentStatus, SearchError, StoreError, UpsertSummary};
use crate::vector::VectorError;

/// Infrastructure errors surfaced by the orchestrator.
///
/// Stage failures on individual documents are not errors at this level; they
/// are reported through [`ProcessOutcome::Failed`] and the session's failure
/// list.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Chunk store operation failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Keyword search failed.
    #[error(transparent)]
    Search(#[from] SearchError),
    /// Vector index operation failed.
    #[error(transparent)]
    Vector(#[from] VectorError),
    /// Embedding a search query failed after retries.
    #[error("query embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),
    /// Progress was requested for an unknown session.
    #[error("unknown session: {session_id}")]
    SessionNotFound {
        /// Session identifier that was looked up.
        session_id: String,
    },
    /// A worker task was cancelled or panicked.
    #[error("worker task failed: {0}")]
    Worker(String),
}

/// Result of processing one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// All stages finished; the upsert summary describes the chunk churn.
    Completed(UpsertSummary),
    /// The document was not PENDING, typically because another worker claimed it.
    Skipped,
    /// A stage failed; the document row records the same stage and reason.
    Failed {
        /// Stage that failed.
        stage: DocumentStatus,
        /// Failure description.
        reason: String,
    },
}

/// One recorded per-document failure within a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentFailure {
    /// Document that failed.
    pub document_id: String,
    /// Stage name at which it failed.
    pub stage: String,
    /// Failure description.
    pub reason: String,
}

/// Aggregate state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Documents remain unfinished.
    InProgress,
    /// Every registered document reached a terminal state.
    Complete,
}

/// Progress snapshot for one ingestion session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionProgress {
    /// Documents registered with the session.
    pub total: usize,
    /// Documents that reached COMPLETE.
    pub processed: usize,
    /// Documents that ended FAILED.
    pub failed: usize,
    /// Derived overall status.
    pub status: SessionStatus,
    /// Per-document failure records.
    pub failures: Vec<DocumentFailure>,
}

/// Counters for one batch run.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchStats {
    /// Documents that completed.
    pub processed: usize,
    /// Documents that failed a stage.
    pub failed: usize,
    /// Documents skipped because another worker held the claim.
    pub skipped: usize,
    /// Wall-clock duration of the run.
    pub elapsed: Duration,
}

/// Shared cancellation flag checked between documents.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Create a new, unset flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. In-flight documents still run to completion.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
