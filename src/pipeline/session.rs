//! In-memory session progress tracking.
//!
//! The store is passed explicitly to every component that reports progress,
//! so tests and embedders can inspect sessions without reaching for a global.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use uuid::Uuid;

use crate::pipeline::types::{DocumentFailure, SessionProgress, SessionStatus};

#[derive(Debug, Default)]
struct SessionState {
    total: usize,
    processed: usize,
    failed: usize,
    failures: Vec<DocumentFailure>,
}

/// Shared registry of ingestion sessions.
#[derive(Debug, Clone, Default)]
pub struct SessionStore {
    inner: Arc<Mutex<HashMap<Uuid, SessionState>>>,
}

impl SessionStore {
    /// Create an empty session registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new session and return its identifier.
    pub fn create(&self) -> Uuid {
        let id = Uuid::new_v4();
        self.lock().insert(id, SessionState::default());
        id
    }

    /// Register one more document with a session.
    pub fn register_document(&self, session_id: Uuid) {
        self.lock().entry(session_id).or_default().total += 1;
    }

    /// Record a document that completed.
    pub fn record_processed(&self, session_id: Uuid) {
        self.lock().entry(session_id).or_default().processed += 1;
    }

    /// Record a document that failed, with its failure details.
    pub fn record_failed(&self, session_id: Uuid, failure: DocumentFailure) {
        let mut sessions = self.lock();
        let state = sessions.entry(session_id).or_default();
        state.failed += 1;
        state.failures.push(failure);
    }

    /// Snapshot a session's progress, `None` for unknown sessions.
    pub fn progress(&self, session_id: Uuid) -> Option<SessionProgress> {
        let sessions = self.lock();
        let state = sessions.get(&session_id)?;
        let status = if state.total > 0 && state.processed + state.failed >= state.total {
            SessionStatus::Complete
        } else {
            SessionStatus::InProgress
        };
        Some(SessionProgress {
            total: state.total,
            processed: state.processed,
            failed: state.failed,
            status,
            failures: state.failures.clone(),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, SessionState>> {
        // Counter updates cannot leave the map inconsistent, so a poisoned
        // lock is still safe to read.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
