//! Eventually-consistent embedding store with cosine nearest-neighbor queries.
//!
//! Vectors share the SQLite file with the chunk store but not its transaction
//! boundary: a vector write is its own small transaction that also stamps the
//! chunk row's embedding metadata and `indexed_at`. Until that write succeeds
//! the chunk stays visibly un-embedded (`indexed_at IS NULL`) and will be
//! retried by the indexing stage.

use thiserror::Error;
use tokio_rusqlite::Connection;

use crate::store::current_timestamp_rfc3339;

/// Errors returned by the vector index.
#[derive(Debug, Error)]
pub enum VectorError {
    /// Underlying SQLite operation failed.
    #[error("storage operation failed: {0}")]
    Storage(#[from] tokio_rusqlite::Error),
    /// Query vector dimensionality does not match the stored vectors.
    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimensionality of the stored vectors.
        expected: usize,
        /// Dimensionality of the supplied vector.
        actual: usize,
    },
    /// A vector was supplied whose length disagrees with its declared dims.
    #[error("vector length {actual} does not match declared dimensions {declared}")]
    MalformedVector {
        /// Dimensions declared by the caller.
        declared: usize,
        /// Actual element count of the vector.
        actual: usize,
    },
}

/// One ranked semantic hit.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    /// Chunk row id.
    pub chunk_id: i64,
    /// Cosine similarity in `[-1, 1]`.
    pub score: f32,
}

/// Handle over the embedding rows.
#[derive(Clone)]
pub struct VectorIndex {
    conn: Connection,
}

impl VectorIndex {
    /// Build a vector handle over the store's connection.
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    /// Write (or replace) a chunk's vector and stamp its embedding metadata.
    pub async fn upsert(
        &self,
        chunk_id: i64,
        vector: &[f32],
        model: &str,
        dims: usize,
    ) -> Result<(), VectorError> {
        if vector.len() != dims {
            return Err(VectorError::MalformedVector {
                declared: dims,
                actual: vector.len(),
            });
        }
        let blob = encode_vector(vector);
        let model = model.to_string();
        let now = current_timestamp_rfc3339();
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                tx.execute(
                    "INSERT INTO chunk_vectors (chunk_id, vector, model, dims)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(chunk_id) DO UPDATE SET
                         vector = excluded.vector,
                         model = excluded.model,
                         dims = excluded.dims",
                    (chunk_id, &blob, &model, dims as i64),
                )?;
                tx.execute(
                    "UPDATE chunks SET embedding_model = ?2, embedding_dimensions = ?3,
                         indexed_at = ?4
                     WHERE id = ?1",
                    (chunk_id, &model, dims as i64, &now),
                )?;
                tx.commit()?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Remove a chunk's vector and clear its embedding metadata.
    pub async fn delete(&self, chunk_id: i64) -> Result<(), VectorError> {
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                tx.execute("DELETE FROM chunk_vectors WHERE chunk_id = ?1", [chunk_id])?;
                tx.execute(
                    "UPDATE chunks SET embedding_model = NULL, embedding_dimensions = NULL,
                         indexed_at = NULL
                     WHERE id = ?1",
                    [chunk_id],
                )?;
                tx.commit()?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Rank stored vectors by cosine similarity against `query`.
    pub async fn query(
        &self,
        query: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredChunk>, VectorError> {
        let query = query.to_vec();
        let outcome = self
            .conn
            .call(move |conn| {
                let mut stmt =
                    conn.prepare("SELECT chunk_id, vector, dims FROM chunk_vectors")?;
                let rows = stmt.query_map([], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, Vec<u8>>(1)?,
                        row.get::<_, i64>(2)? as usize,
                    ))
                })?;

                let mut scored = Vec::new();
                for row in rows {
                    let (chunk_id, blob, dims) = row?;
                    if dims != query.len() {
                        return Ok(Err(VectorError::DimensionMismatch {
                            expected: dims,
                            actual: query.len(),
                        }));
                    }
                    let vector = decode_vector(&blob);
                    scored.push(ScoredChunk {
                        chunk_id,
                        score: cosine_similarity(&query, &vector),
                    });
                }

                scored.sort_by(|a, b| {
                    b.score
                        .partial_cmp(&a.score)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then(a.chunk_id.cmp(&b.chunk_id))
                });
                scored.truncate(top_k);
                Ok(Ok(scored))
            })
            .await?;
        outcome
    }

    /// Number of stored vectors, used by reconciliation checks.
    pub async fn count(&self) -> Result<usize, VectorError> {
        let count: i64 = self
            .conn
            .call(|conn| {
                let count =
                    conn.query_row("SELECT COUNT(*) FROM chunk_vectors", [], |row| row.get(0))?;
                Ok(count)
            })
            .await?;
        Ok(count as usize)
    }
}

fn encode_vector(vector: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        blob.extend_from_slice(&value.to_le_bytes());
    }
    blob
}

fn decode_vector(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|bytes| f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
        .collect()
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 { 0.0 } else { dot / denom }
}
