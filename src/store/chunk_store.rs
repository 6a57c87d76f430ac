//! SQLite-backed source of truth for documents and chunks.
//!
//! All chunk mutations run as single transactions that also maintain the
//! full-text postings (see [`crate::store::search`]). A failure anywhere in an
//! upsert rolls the whole transaction back, so readers never observe a partial
//! chunk set or a search index that disagrees with committed rows.

use std::collections::BTreeMap;
use std::path::Path;

use thiserror::Error;
use tokio_rusqlite::Connection;

use crate::enrich::ChunkEnrichment;
use crate::store::{current_timestamp_rfc3339, search};

/// Errors returned by the chunk store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying SQLite operation failed; the current transaction was rolled back.
    #[error("storage operation failed: {0}")]
    Storage(#[from] tokio_rusqlite::Error),
    /// Search-index maintenance failed; the enclosing chunk transaction was rolled back.
    #[error("search index maintenance failed: {reason}")]
    IndexSync {
        /// Description of the failing posting operation.
        reason: String,
    },
    /// The requested document does not exist.
    #[error("document not found: {document_id}")]
    DocumentNotFound {
        /// Identifier that was looked up.
        document_id: String,
    },
}

/// Lifecycle state of a document in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentStatus {
    /// Submitted, waiting for a worker to claim it.
    Pending,
    /// Claimed; raw text is being loaded.
    Extracting,
    /// Text normalization in progress.
    Cleaning,
    /// Splitting and upserting chunks.
    Chunking,
    /// Applying enrichment metadata to touched chunks.
    Enriching,
    /// Generating embeddings and writing vectors.
    Indexing,
    /// All stages finished.
    Complete,
    /// A stage failed; see `failed_stage` and `failure` on the row.
    Failed,
}

impl DocumentStatus {
    /// Stable string form stored in the database.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Extracting => "extracting",
            Self::Cleaning => "cleaning",
            Self::Chunking => "chunking",
            Self::Enriching => "enriching",
            Self::Indexing => "indexing",
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "extracting" => Some(Self::Extracting),
            "cleaning" => Some(Self::Cleaning),
            "chunking" => Some(Self::Chunking),
            "enriching" => Some(Self::Enriching),
            "indexing" => Some(Self::Indexing),
            "complete" => Some(Self::Complete),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stored document row.
#[derive(Debug, Clone)]
pub struct DocumentRow {
    /// Caller-supplied document identifier.
    pub id: String,
    /// Raw submitted text.
    pub text: String,
    /// Starting character offset of each page, ascending.
    pub page_offsets: Vec<usize>,
    /// Current lifecycle status.
    pub status: DocumentStatus,
    /// Stage recorded when the document last failed.
    pub failed_stage: Option<DocumentStatus>,
    /// Failure reason recorded alongside `failed_stage`.
    pub failure: Option<String>,
    /// Session that last touched the document.
    pub session_id: Option<String>,
    /// Last modification timestamp, RFC3339.
    pub updated_at: String,
}

/// Chunk content handed to [`ChunkStore::upsert_chunks`].
#[derive(Debug, Clone)]
pub struct NewChunk {
    /// Zero-based position within the document.
    pub index: usize,
    /// Chunk text.
    pub text: String,
    /// Inclusive start character offset.
    pub start_char: usize,
    /// Exclusive end character offset.
    pub end_char: usize,
    /// One-based page number, when known.
    pub page_number: Option<u32>,
    /// Deterministic digest of `text`.
    pub content_hash: String,
}

/// Fully materialized chunk row.
#[derive(Debug, Clone)]
pub struct ChunkRecord {
    /// Row id; the key shared with search postings and vector rows.
    pub id: i64,
    /// Owning document.
    pub document_id: String,
    /// Zero-based position within the document.
    pub chunk_index: usize,
    /// Chunk text.
    pub text: String,
    /// Inclusive start character offset.
    pub start_char: usize,
    /// Exclusive end character offset.
    pub end_char: usize,
    /// One-based page number, when known.
    pub page_number: Option<u32>,
    /// Deterministic digest of `text`.
    pub content_hash: String,
    /// Search-token count, maintained with the postings.
    pub token_count: usize,
    /// Detected section type, set by enrichment.
    pub section_type: Option<String>,
    /// Detected topic, set by enrichment.
    pub topic: Option<String>,
    /// Whether the chunk appears to contain tabular layout.
    pub has_tables: bool,
    /// Whether the chunk appears to contain monetary amounts.
    pub has_amounts: bool,
    /// Entity metadata captured during enrichment.
    pub entities: Option<serde_json::Value>,
    /// Model that produced the stored embedding, if any.
    pub embedding_model: Option<String>,
    /// Dimensionality of the stored embedding, if any.
    pub embedding_dimensions: Option<usize>,
    /// Set when the vector write succeeded; `None` means not yet embedded.
    pub indexed_at: Option<String>,
}

/// Outcome of one atomic upsert.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpsertSummary {
    /// Indices inserted for the first time.
    pub inserted: usize,
    /// Indices whose content hash changed and were rewritten.
    pub updated: usize,
    /// Indices left untouched, embedding state included.
    pub unchanged: usize,
    /// Stale indices removed.
    pub deleted: usize,
    /// Chunk indices that were inserted or updated and need enrichment.
    pub touched_indices: Vec<usize>,
}

/// Handle to the chunk database.
#[derive(Clone)]
pub struct ChunkStore {
    conn: Connection,
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS documents (
    id            TEXT PRIMARY KEY,
    text          TEXT NOT NULL,
    page_offsets  TEXT NOT NULL DEFAULT '[]',
    status        TEXT NOT NULL DEFAULT 'pending',
    failed_stage  TEXT,
    failure       TEXT,
    session_id    TEXT,
    created_at    TEXT NOT NULL,
    updated_at    TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS chunks (
    id                   INTEGER PRIMARY KEY AUTOINCREMENT,
    document_id          TEXT NOT NULL REFERENCES documents(id),
    chunk_index          INTEGER NOT NULL,
    text                 TEXT NOT NULL,
    start_char           INTEGER NOT NULL,
    end_char             INTEGER NOT NULL,
    page_number          INTEGER,
    content_hash         TEXT NOT NULL,
    token_count          INTEGER NOT NULL DEFAULT 0,
    section_type         TEXT,
    topic                TEXT,
    has_tables           INTEGER NOT NULL DEFAULT 0,
    has_amounts          INTEGER NOT NULL DEFAULT 0,
    entities             TEXT,
    embedding_model      TEXT,
    embedding_dimensions INTEGER,
    indexed_at           TEXT,
    UNIQUE(document_id, chunk_index)
);
CREATE INDEX IF NOT EXISTS idx_chunks_document ON chunks(document_id);
CREATE TABLE IF NOT EXISTS search_terms (
    term      TEXT PRIMARY KEY,
    doc_count INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS search_postings (
    term      TEXT NOT NULL,
    chunk_id  INTEGER NOT NULL,
    term_freq INTEGER NOT NULL,
    PRIMARY KEY (term, chunk_id)
);
CREATE INDEX IF NOT EXISTS idx_postings_chunk ON search_postings(chunk_id);
CREATE TABLE IF NOT EXISTS chunk_vectors (
    chunk_id INTEGER PRIMARY KEY,
    vector   BLOB NOT NULL,
    model    TEXT NOT NULL,
    dims     INTEGER NOT NULL
);
";

impl ChunkStore {
    /// Open (and bootstrap) the database at `path`.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path)
            .await
            .map_err(tokio_rusqlite::Error::from)?;
        Self::bootstrap(conn).await
    }

    /// Open a private in-memory database, used by tests.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(tokio_rusqlite::Error::from)?;
        Self::bootstrap(conn).await
    }

    async fn bootstrap(conn: Connection) -> Result<Self, StoreError> {
        conn.call(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;
        Ok(Self { conn })
    }

    /// Shared connection handle; cloned by the search and vector indexes.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Insert a document or requeue an existing one with fresh text.
    ///
    /// Requeueing clears any recorded failure and returns the document to
    /// PENDING; previously stored chunks stay in place so an unchanged
    /// resubmission short-circuits during the next upsert.
    pub async fn upsert_document(
        &self,
        document_id: &str,
        text: &str,
        page_offsets: &[usize],
        session_id: Option<&str>,
    ) -> Result<(), StoreError> {
        let document_id = document_id.to_string();
        let text = text.to_string();
        let offsets =
            serde_json::to_string(page_offsets).unwrap_or_else(|_| "[]".to_string());
        let session_id = session_id.map(str::to_string);
        let now = current_timestamp_rfc3339();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO documents (id, text, page_offsets, status, session_id, created_at, updated_at)
                     VALUES (?1, ?2, ?3, 'pending', ?4, ?5, ?5)
                     ON CONFLICT(id) DO UPDATE SET
                         text = excluded.text,
                         page_offsets = excluded.page_offsets,
                         status = 'pending',
                         failed_stage = NULL,
                         failure = NULL,
                         session_id = excluded.session_id,
                         updated_at = excluded.updated_at",
                    (&document_id, &text, &offsets, &session_id, &now),
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Fetch a document row.
    pub async fn document(&self, document_id: &str) -> Result<DocumentRow, StoreError> {
        let id = document_id.to_string();
        let row = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, text, page_offsets, status, failed_stage, failure, session_id, updated_at
                     FROM documents WHERE id = ?1",
                )?;
                let mut rows = stmt.query([&id])?;
                let Some(row) = rows.next()? else {
                    return Ok(None);
                };
                let offsets: String = row.get(2)?;
                let status: String = row.get(3)?;
                let failed_stage: Option<String> = row.get(4)?;
                Ok(Some(DocumentRow {
                    id: row.get(0)?,
                    text: row.get(1)?,
                    page_offsets: serde_json::from_str(&offsets).unwrap_or_default(),
                    status: DocumentStatus::parse(&status).unwrap_or(DocumentStatus::Pending),
                    failed_stage: failed_stage.as_deref().and_then(DocumentStatus::parse),
                    failure: row.get(5)?,
                    session_id: row.get(6)?,
                    updated_at: row.get(7)?,
                }))
            })
            .await?;
        row.ok_or_else(|| StoreError::DocumentNotFound {
            document_id: document_id.to_string(),
        })
    }

    /// Claim a PENDING document for processing.
    ///
    /// The conditional status transition is the sole cross-worker coordination
    /// point: exactly one concurrent caller observes `true`.
    pub async fn claim_pending(&self, document_id: &str) -> Result<bool, StoreError> {
        let id = document_id.to_string();
        let now = current_timestamp_rfc3339();
        let changed = self
            .conn
            .call(move |conn| {
                let changed = conn.execute(
                    "UPDATE documents SET status = 'extracting', updated_at = ?2
                     WHERE id = ?1 AND status = 'pending'",
                    (&id, &now),
                )?;
                Ok(changed)
            })
            .await?;
        Ok(changed == 1)
    }

    /// Advance a document to `status`.
    pub async fn set_status(
        &self,
        document_id: &str,
        status: DocumentStatus,
    ) -> Result<(), StoreError> {
        let id = document_id.to_string();
        let now = current_timestamp_rfc3339();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE documents SET status = ?2, updated_at = ?3 WHERE id = ?1",
                    (&id, status.as_str(), &now),
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Record a stage failure and move the document to FAILED.
    pub async fn mark_failed(
        &self,
        document_id: &str,
        stage: DocumentStatus,
        reason: &str,
    ) -> Result<(), StoreError> {
        let id = document_id.to_string();
        let reason = reason.to_string();
        let now = current_timestamp_rfc3339();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE documents SET status = 'failed', failed_stage = ?2, failure = ?3, updated_at = ?4
                     WHERE id = ?1",
                    (&id, stage.as_str(), &reason, &now),
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// All PENDING document ids in ascending order, for reproducible batch runs.
    pub async fn list_pending(&self) -> Result<Vec<String>, StoreError> {
        let ids = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id FROM documents WHERE status = 'pending' ORDER BY id ASC",
                )?;
                let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
                let mut ids = Vec::new();
                for row in rows {
                    ids.push(row?);
                }
                Ok(ids)
            })
            .await?;
        Ok(ids)
    }

    /// Reconcile the stored chunk set with `new_chunks` in one transaction.
    ///
    /// Stale indices are deleted (rows, postings, vectors), changed hashes are
    /// rewritten with enrichment and embedding state cleared, unchanged hashes
    /// are left completely alone so their embeddings survive, and new indices
    /// are inserted. Posting maintenance shares the transaction; if it fails
    /// the prior chunk set remains fully intact.
    pub async fn upsert_chunks(
        &self,
        document_id: &str,
        new_chunks: &[NewChunk],
    ) -> Result<UpsertSummary, StoreError> {
        let document_id = document_id.to_string();
        let chunks = new_chunks.to_vec();
        let now = current_timestamp_rfc3339();
        let outcome = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;

                // (chunk_index) -> (row id, content hash) for the prior set.
                let mut existing: BTreeMap<usize, (i64, String)> = BTreeMap::new();
                {
                    let mut stmt = tx.prepare(
                        "SELECT id, chunk_index, content_hash FROM chunks WHERE document_id = ?1",
                    )?;
                    let rows = stmt.query_map([&document_id], |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, i64>(1)? as usize,
                            row.get::<_, String>(2)?,
                        ))
                    })?;
                    for row in rows {
                        let (id, index, hash) = row?;
                        existing.insert(index, (id, hash));
                    }
                }

                let incoming: BTreeMap<usize, &NewChunk> =
                    chunks.iter().map(|chunk| (chunk.index, chunk)).collect();

                let mut summary = UpsertSummary::default();

                for (&index, &(chunk_id, _)) in &existing {
                    if !incoming.contains_key(&index) {
                        if let Err(err) = search::remove_postings(&tx, chunk_id) {
                            return Ok(Err(err.to_string()));
                        }
                        tx.execute("DELETE FROM chunk_vectors WHERE chunk_id = ?1", [chunk_id])?;
                        tx.execute("DELETE FROM chunks WHERE id = ?1", [chunk_id])?;
                        summary.deleted += 1;
                    }
                }

                for chunk in &chunks {
                    match existing.get(&chunk.index) {
                        Some((_, hash)) if *hash == chunk.content_hash => {
                            summary.unchanged += 1;
                        }
                        Some(&(chunk_id, _)) => {
                            let tokens = search::tokenize(&chunk.text);
                            tx.execute(
                                "UPDATE chunks SET
                                     text = ?2, start_char = ?3, end_char = ?4, page_number = ?5,
                                     content_hash = ?6, token_count = ?7,
                                     section_type = NULL, topic = NULL,
                                     has_tables = 0, has_amounts = 0, entities = NULL,
                                     embedding_model = NULL, embedding_dimensions = NULL,
                                     indexed_at = NULL
                                 WHERE id = ?1",
                                (
                                    chunk_id,
                                    &chunk.text,
                                    chunk.start_char as i64,
                                    chunk.end_char as i64,
                                    chunk.page_number,
                                    &chunk.content_hash,
                                    tokens.len() as i64,
                                ),
                            )?;
                            if let Err(err) = search::remove_postings(&tx, chunk_id)
                                .and_then(|()| search::add_postings(&tx, chunk_id, &tokens))
                            {
                                return Ok(Err(err.to_string()));
                            }
                            tx.execute(
                                "DELETE FROM chunk_vectors WHERE chunk_id = ?1",
                                [chunk_id],
                            )?;
                            summary.updated += 1;
                            summary.touched_indices.push(chunk.index);
                        }
                        None => {
                            let tokens = search::tokenize(&chunk.text);
                            tx.execute(
                                "INSERT INTO chunks
                                     (document_id, chunk_index, text, start_char, end_char,
                                      page_number, content_hash, token_count)
                                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                                (
                                    &document_id,
                                    chunk.index as i64,
                                    &chunk.text,
                                    chunk.start_char as i64,
                                    chunk.end_char as i64,
                                    chunk.page_number,
                                    &chunk.content_hash,
                                    tokens.len() as i64,
                                ),
                            )?;
                            let chunk_id = tx.last_insert_rowid();
                            if let Err(err) = search::add_postings(&tx, chunk_id, &tokens) {
                                return Ok(Err(err.to_string()));
                            }
                            summary.inserted += 1;
                            summary.touched_indices.push(chunk.index);
                        }
                    }
                }

                tx.execute(
                    "UPDATE documents SET updated_at = ?2 WHERE id = ?1",
                    (&document_id, &now),
                )?;
                tx.commit()?;
                Ok(Ok(summary))
            })
            .await?;

        outcome.map_err(|reason| StoreError::IndexSync { reason })
    }

    /// All chunks of a document, ordered by index.
    pub async fn get_chunks(&self, document_id: &str) -> Result<Vec<ChunkRecord>, StoreError> {
        let id = document_id.to_string();
        let chunks = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {CHUNK_COLUMNS} FROM chunks WHERE document_id = ?1 ORDER BY chunk_index ASC",
                ))?;
                let mut rows = stmt.query([&id])?;
                let mut chunks = Vec::new();
                while let Some(row) = rows.next()? {
                    chunks.push(map_chunk_row(row)?);
                }
                Ok(chunks)
            })
            .await?;
        Ok(chunks)
    }

    /// Chunks of a document that still await a successful vector write.
    pub async fn chunks_pending_embedding(
        &self,
        document_id: &str,
    ) -> Result<Vec<ChunkRecord>, StoreError> {
        let id = document_id.to_string();
        let chunks = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {CHUNK_COLUMNS} FROM chunks
                     WHERE document_id = ?1 AND indexed_at IS NULL
                     ORDER BY chunk_index ASC",
                ))?;
                let mut rows = stmt.query([&id])?;
                let mut chunks = Vec::new();
                while let Some(row) = rows.next()? {
                    chunks.push(map_chunk_row(row)?);
                }
                Ok(chunks)
            })
            .await?;
        Ok(chunks)
    }

    /// Store enrichment metadata for one chunk.
    pub async fn update_enrichment(
        &self,
        document_id: &str,
        chunk_index: usize,
        enrichment: &ChunkEnrichment,
    ) -> Result<(), StoreError> {
        let id = document_id.to_string();
        let section_type = enrichment.section_type.clone();
        let topic = enrichment.topic.clone();
        let has_tables = enrichment.has_tables;
        let has_amounts = enrichment.has_amounts;
        let entities = enrichment
            .entities
            .as_ref()
            .map(|value| value.to_string());
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE chunks SET section_type = ?3, topic = ?4, has_tables = ?5,
                         has_amounts = ?6, entities = ?7
                     WHERE document_id = ?1 AND chunk_index = ?2",
                    (
                        &id,
                        chunk_index as i64,
                        &section_type,
                        &topic,
                        has_tables,
                        has_amounts,
                        &entities,
                    ),
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Remove every chunk of a document, cascading to postings and vectors.
    pub async fn clear_chunks(&self, document_id: &str) -> Result<usize, StoreError> {
        let id = document_id.to_string();
        let removed = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let chunk_ids: Vec<i64> = {
                    let mut stmt =
                        tx.prepare("SELECT id FROM chunks WHERE document_id = ?1")?;
                    let rows = stmt.query_map([&id], |row| row.get(0))?;
                    let mut ids = Vec::new();
                    for row in rows {
                        ids.push(row?);
                    }
                    ids
                };
                for chunk_id in &chunk_ids {
                    search::remove_postings(&tx, *chunk_id)?;
                    tx.execute("DELETE FROM chunk_vectors WHERE chunk_id = ?1", [chunk_id])?;
                }
                tx.execute("DELETE FROM chunks WHERE document_id = ?1", [&id])?;
                tx.commit()?;
                Ok(chunk_ids.len())
            })
            .await?;
        Ok(removed)
    }

    /// Tear down a document's derived state and return it to PENDING.
    pub async fn reset_document(&self, document_id: &str) -> Result<(), StoreError> {
        self.clear_chunks(document_id).await?;
        let id = document_id.to_string();
        let now = current_timestamp_rfc3339();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE documents SET status = 'pending', failed_stage = NULL,
                         failure = NULL, updated_at = ?2
                     WHERE id = ?1",
                    (&id, &now),
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Delete a document and everything derived from it.
    pub async fn delete_document(&self, document_id: &str) -> Result<(), StoreError> {
        self.clear_chunks(document_id).await?;
        let id = document_id.to_string();
        self.conn
            .call(move |conn| {
                conn.execute("DELETE FROM documents WHERE id = ?1", [&id])?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Fetch a single chunk row by its id.
    pub async fn chunk_by_id(&self, chunk_id: i64) -> Result<Option<ChunkRecord>, StoreError> {
        let chunk = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {CHUNK_COLUMNS} FROM chunks WHERE id = ?1",
                ))?;
                let mut rows = stmt.query([chunk_id])?;
                match rows.next()? {
                    Some(row) => Ok(Some(map_chunk_row(row)?)),
                    None => Ok(None),
                }
            })
            .await?;
        Ok(chunk)
    }
}

const CHUNK_COLUMNS: &str = "id, document_id, chunk_index, text, start_char, end_char, \
     page_number, content_hash, token_count, section_type, topic, has_tables, has_amounts, \
     entities, embedding_model, embedding_dimensions, indexed_at";

fn map_chunk_row(
    row: &tokio_rusqlite::Row<'_>,
) -> Result<ChunkRecord, tokio_rusqlite::rusqlite::Error> {
    let entities: Option<String> = row.get(13)?;
    Ok(ChunkRecord {
        id: row.get(0)?,
        document_id: row.get(1)?,
        chunk_index: row.get::<_, i64>(2)? as usize,
        text: row.get(3)?,
        start_char: row.get::<_, i64>(4)? as usize,
        end_char: row.get::<_, i64>(5)? as usize,
        page_number: row.get(6)?,
        content_hash: row.get(7)?,
        token_count: row.get::<_, i64>(8)? as usize,
        section_type: row.get(9)?,
        topic: row.get(10)?,
        has_tables: row.get(11)?,
        has_amounts: row.get(12)?,
        entities: entities.and_then(|raw| serde_json::from_str(&raw).ok()),
        embedding_model: row.get(14)?,
        embedding_dimensions: row.get::<_, Option<i64>>(15)?.map(|v| v as usize),
        indexed_at: row.get(16)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::content_hash;

    fn make_chunk(index: usize, text: &str) -> NewChunk {
        NewChunk {
            index,
            text: text.to_string(),
            start_char: index * 100,
            end_char: index * 100 + text.chars().count(),
            page_number: None,
            content_hash: content_hash(text),
        }
    }

    #[tokio::test]
    async fn upsert_inserts_new_chunks() {
        let store = ChunkStore::open_in_memory().await.unwrap();
        store
            .upsert_document("doc-1", "text", &[], None)
            .await
            .unwrap();
        let summary = store
            .upsert_chunks("doc-1", &[make_chunk(0, "alpha"), make_chunk(1, "beta")])
            .await
            .unwrap();

        assert_eq!(summary.inserted, 2);
        assert_eq!(summary.updated, 0);
        assert_eq!(summary.deleted, 0);
        assert_eq!(summary.touched_indices, vec![0, 1]);

        let chunks = store.get_chunks("doc-1").await.unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[1].text, "beta");
        assert!(chunks[0].indexed_at.is_none());
    }

    #[tokio::test]
    async fn reupsert_unchanged_is_idempotent() {
        let store = ChunkStore::open_in_memory().await.unwrap();
        store
            .upsert_document("doc-1", "text", &[], None)
            .await
            .unwrap();
        let chunks = [make_chunk(0, "alpha"), make_chunk(1, "beta")];
        store.upsert_chunks("doc-1", &chunks).await.unwrap();

        let summary = store.upsert_chunks("doc-1", &chunks).await.unwrap();
        assert_eq!(summary.unchanged, 2);
        assert_eq!(summary.inserted, 0);
        assert_eq!(summary.updated, 0);
        assert!(summary.touched_indices.is_empty());
    }

    #[tokio::test]
    async fn changed_hash_updates_only_that_index() {
        let store = ChunkStore::open_in_memory().await.unwrap();
        store
            .upsert_document("doc-1", "text", &[], None)
            .await
            .unwrap();
        store
            .upsert_chunks(
                "doc-1",
                &[
                    make_chunk(0, "alpha"),
                    make_chunk(1, "beta"),
                    make_chunk(2, "gamma"),
                ],
            )
            .await
            .unwrap();

        let summary = store
            .upsert_chunks(
                "doc-1",
                &[
                    make_chunk(0, "alpha"),
                    make_chunk(1, "edited"),
                    make_chunk(2, "gamma"),
                ],
            )
            .await
            .unwrap();
        assert_eq!(summary.updated, 1);
        assert_eq!(summary.unchanged, 2);
        assert_eq!(summary.touched_indices, vec![1]);

        let chunks = store.get_chunks("doc-1").await.unwrap();
        assert_eq!(chunks[1].text, "edited");
        assert_eq!(chunks[1].content_hash, content_hash("edited"));
    }

    #[tokio::test]
    async fn shrinking_chunk_set_deletes_stale_indices() {
        let store = ChunkStore::open_in_memory().await.unwrap();
        store
            .upsert_document("doc-1", "text", &[], None)
            .await
            .unwrap();
        store
            .upsert_chunks(
                "doc-1",
                &[
                    make_chunk(0, "alpha"),
                    make_chunk(1, "beta"),
                    make_chunk(2, "gamma"),
                ],
            )
            .await
            .unwrap();

        let summary = store
            .upsert_chunks("doc-1", &[make_chunk(0, "alpha")])
            .await
            .unwrap();
        assert_eq!(summary.deleted, 2);
        assert_eq!(store.get_chunks("doc-1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn duplicate_chunk_index_rolls_back_entirely() {
        let store = ChunkStore::open_in_memory().await.unwrap();
        store
            .upsert_document("doc-1", "text", &[], None)
            .await
            .unwrap();
        store
            .upsert_chunks("doc-1", &[make_chunk(0, "alpha")])
            .await
            .unwrap();

        let defective = vec![
            make_chunk(1, "beta"),
            make_chunk(1, "duplicate index"),
        ];
        let err = store.upsert_chunks("doc-1", &defective).await.unwrap_err();
        assert!(matches!(err, StoreError::Storage(_)));

        // Prior chunk set fully intact.
        let chunks = store.get_chunks("doc-1").await.unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "alpha");
    }

    #[tokio::test]
    async fn claim_pending_is_exclusive() {
        let store = ChunkStore::open_in_memory().await.unwrap();
        store
            .upsert_document("doc-1", "text", &[], None)
            .await
            .unwrap();

        assert!(store.claim_pending("doc-1").await.unwrap());
        assert!(!store.claim_pending("doc-1").await.unwrap());

        let row = store.document("doc-1").await.unwrap();
        assert_eq!(row.status, DocumentStatus::Extracting);
    }

    #[tokio::test]
    async fn reset_returns_document_to_pending_without_chunks() {
        let store = ChunkStore::open_in_memory().await.unwrap();
        store
            .upsert_document("doc-1", "text", &[], None)
            .await
            .unwrap();
        store
            .upsert_chunks("doc-1", &[make_chunk(0, "alpha")])
            .await
            .unwrap();
        store
            .set_status("doc-1", DocumentStatus::Complete)
            .await
            .unwrap();

        store.reset_document("doc-1").await.unwrap();
        let row = store.document("doc-1").await.unwrap();
        assert_eq!(row.status, DocumentStatus::Pending);
        assert!(store.get_chunks("doc-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn mark_failed_records_stage_and_reason() {
        let store = ChunkStore::open_in_memory().await.unwrap();
        store
            .upsert_document("doc-1", "text", &[], None)
            .await
            .unwrap();
        store
            .mark_failed("doc-1", DocumentStatus::Indexing, "provider unavailable")
            .await
            .unwrap();

        let row = store.document("doc-1").await.unwrap();
        assert_eq!(row.status, DocumentStatus::Failed);
        assert_eq!(row.failed_stage, Some(DocumentStatus::Indexing));
        assert_eq!(row.failure.as_deref(), Some("provider unavailable"));
    }

    #[tokio::test]
    async fn missing_document_is_an_explicit_error() {
        let store = ChunkStore::open_in_memory().await.unwrap();
        let err = store.document("nope").await.unwrap_err();
        assert!(matches!(err, StoreError::DocumentNotFound { .. }));
    }
}
