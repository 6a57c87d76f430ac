//! Relational chunk storage and the transactionally-maintained search index.
//!
//! Both live in one SQLite database. Chunk mutations and full-text posting
//! maintenance always execute inside the same transaction, so the two
//! structures cannot diverge past a rolled-back write. The vector store shares
//! the database file but deliberately not the transaction boundary; see
//! [`crate::vector`].

pub mod chunk_store;
pub mod search;

pub use chunk_store::{
    ChunkRecord, ChunkStore, DocumentRow, DocumentStatus, NewChunk, StoreError, UpsertSummary,
};
pub use search::{ReconcileReport, SearchConfig, SearchError, SearchHit, SearchIndex};

/// Current timestamp formatted for row storage.
pub(crate) fn current_timestamp_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}
