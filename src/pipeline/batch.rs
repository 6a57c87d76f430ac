//! Bounded-concurrency batch runs over pending documents.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::pipeline::orchestrator::PipelineOrchestrator;
use crate::pipeline::types::{BatchStats, CancelFlag, PipelineError, ProcessOutcome};

/// Fans pending documents out over a bounded worker pool.
pub struct BatchCoordinator {
    orchestrator: Arc<PipelineOrchestrator>,
}

impl BatchCoordinator {
    /// Build a coordinator over a shared orchestrator.
    pub fn new(orchestrator: Arc<PipelineOrchestrator>) -> Self {
        Self { orchestrator }
    }

    /// Process every PENDING document, in ascending-id order.
    ///
    /// At most `batch_workers` documents run at once. A document's stage
    /// failure never aborts the run, and a claim lost to another worker counts
    /// as skipped. Cancellation is honored between documents only; documents
    /// already dispatched always complete or fail first.
    pub async fn run(
        &self,
        session_id: Option<Uuid>,
        cancel: &CancelFlag,
    ) -> Result<BatchStats, PipelineError> {
        let started = Instant::now();
        let pending = self.orchestrator.store().list_pending().await?;
        tracing::info!(documents = pending.len(), "Batch run starting");

        let workers = Arc::new(Semaphore::new(
            self.orchestrator.config().batch_workers.max(1),
        ));
        let mut tasks = JoinSet::new();

        for document_id in pending {
            if cancel.is_cancelled() {
                tracing::info!("Batch run cancelled, leaving remaining documents pending");
                break;
            }
            // Waiting for a permit before spawning keeps dispatch in id order
            // and makes the cancellation check meaningful under load.
            let permit = workers
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| PipelineError::Worker("worker pool closed".to_string()))?;
            let orchestrator = Arc::clone(&self.orchestrator);
            tasks.spawn(async move {
                let outcome = orchestrator.process_document(&document_id, session_id).await;
                drop(permit);
                outcome
            });
        }

        let mut stats = BatchStats {
            processed: 0,
            failed: 0,
            skipped: 0,
            elapsed: started.elapsed(),
        };
        while let Some(joined) = tasks.join_next().await {
            let outcome = joined.map_err(|err| PipelineError::Worker(err.to_string()))??;
            match outcome {
                ProcessOutcome::Completed(_) => stats.processed += 1,
                ProcessOutcome::Failed { .. } => stats.failed += 1,
                ProcessOutcome::Skipped => stats.skipped += 1,
            }
        }
        stats.elapsed = started.elapsed();

        tracing::info!(
            processed = stats.processed,
            failed = stats.failed,
            skipped = stats.skipped,
            elapsed_ms = stats.elapsed.as_millis() as u64,
            "Batch run finished"
        );
        Ok(stats)
    }
}
