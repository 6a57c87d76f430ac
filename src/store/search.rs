//! Full-text index over chunk text, ranked with BM25.
//!
//! Postings live in the same SQLite database as the chunks and are only ever
//! written through [`add_postings`]/[`remove_postings`] from inside a chunk
//! mutation transaction, which is what keeps the two structures consistent.
//! Queries are read-only; ranking happens in process so the saturation (`k1`)
//! and length-normalization (`b`) parameters stay tunable.

use std::collections::HashMap;

use thiserror::Error;
use tokio_rusqlite::{Connection, OptionalExtension, Transaction};
use unicode_segmentation::UnicodeSegmentation;

/// Errors returned by keyword search.
#[derive(Debug, Error)]
pub enum SearchError {
    /// The query text could not be parsed into terms.
    #[error("invalid query syntax: {0}")]
    QuerySyntax(String),
    /// Underlying SQLite read failed.
    #[error("storage operation failed: {0}")]
    Storage(#[from] tokio_rusqlite::Error),
}

/// Ranking parameters for BM25.
#[derive(Debug, Clone, Copy)]
pub struct SearchConfig {
    /// Term-frequency saturation. Higher values let repeated terms keep
    /// contributing to the score for longer.
    pub k1: f64,
    /// Length normalization strength in `[0, 1]`. At `1.0` long chunks are
    /// fully penalized; at `0.0` chunk length is ignored.
    pub b: f64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self { k1: 1.2, b: 0.75 }
    }
}

/// One ranked keyword hit.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    /// Chunk row id.
    pub chunk_id: i64,
    /// BM25 relevance score.
    pub score: f64,
}

/// Counts produced by a full index rebuild, used to confirm repair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Chunk rows reindexed.
    pub chunks: usize,
    /// Posting rows written.
    pub postings: usize,
    /// Distinct terms indexed.
    pub terms: usize,
}

/// Lowercased word tokens for indexing and querying.
pub fn tokenize(text: &str) -> Vec<String> {
    text.unicode_words()
        .map(|word| word.to_lowercase())
        .collect()
}

/// Add postings for a chunk inside the caller's transaction.
pub(crate) fn add_postings(
    tx: &Transaction<'_>,
    chunk_id: i64,
    tokens: &[String],
) -> Result<(), tokio_rusqlite::rusqlite::Error> {
    let mut frequencies: HashMap<&str, i64> = HashMap::new();
    for token in tokens {
        *frequencies.entry(token.as_str()).or_insert(0) += 1;
    }

    for (term, freq) in frequencies {
        tx.execute(
            "INSERT INTO search_postings (term, chunk_id, term_freq) VALUES (?1, ?2, ?3)",
            (term, chunk_id, freq),
        )?;
        tx.execute(
            "INSERT INTO search_terms (term, doc_count) VALUES (?1, 1)
             ON CONFLICT(term) DO UPDATE SET doc_count = doc_count + 1",
            [term],
        )?;
    }
    Ok(())
}

/// Remove a chunk's postings inside the caller's transaction.
///
/// The terms to decrement are read back from the postings table, so callers
/// never need the chunk's previous text.
pub(crate) fn remove_postings(
    tx: &Transaction<'_>,
    chunk_id: i64,
) -> Result<(), tokio_rusqlite::rusqlite::Error> {
    tx.execute(
        "UPDATE search_terms SET doc_count = doc_count - 1
         WHERE term IN (SELECT term FROM search_postings WHERE chunk_id = ?1)",
        [chunk_id],
    )?;
    tx.execute(
        "DELETE FROM search_postings WHERE chunk_id = ?1",
        [chunk_id],
    )?;
    tx.execute("DELETE FROM search_terms WHERE doc_count <= 0", [])?;
    Ok(())
}

/// Read-side handle over the keyword index.
#[derive(Clone)]
pub struct SearchIndex {
    conn: Connection,
    config: SearchConfig,
}

impl SearchIndex {
    /// Build a search handle over the store's connection.
    pub fn new(conn: Connection, config: SearchConfig) -> Self {
        Self { conn, config }
    }

    /// Rank chunks for `query` and return the best `top_k` hits.
    ///
    /// Query syntax: whitespace-separated terms; double quotes are validated
    /// for balance, then stripped, and all terms are scored as a bag of words.
    /// A chunk matching any term ranks, with more matching terms scoring
    /// higher. Unbalanced quotes or a query with no usable terms fail with
    /// [`SearchError::QuerySyntax`]; queries never change index state.
    pub async fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchHit>, SearchError> {
        let terms = parse_query(query)?;
        let config = self.config;
        let hits = self
            .conn
            .call(move |conn| {
                let (total_chunks, avg_length): (i64, f64) = conn.query_row(
                    "SELECT COUNT(*), COALESCE(AVG(token_count), 0.0) FROM chunks",
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )?;
                if total_chunks == 0 {
                    return Ok(Vec::new());
                }

                let mut scores: HashMap<i64, f64> = HashMap::new();
                for term in &terms {
                    let doc_count: i64 = conn
                        .query_row(
                            "SELECT doc_count FROM search_terms WHERE term = ?1",
                            [term],
                            |row| row.get(0),
                        )
                        .optional()?
                        .unwrap_or(0);
                    if doc_count == 0 {
                        continue;
                    }
                    let idf = (1.0
                        + (total_chunks as f64 - doc_count as f64 + 0.5)
                            / (doc_count as f64 + 0.5))
                        .ln();

                    let mut stmt = conn.prepare(
                        "SELECT p.chunk_id, p.term_freq, c.token_count
                         FROM search_postings p JOIN chunks c ON c.id = p.chunk_id
                         WHERE p.term = ?1",
                    )?;
                    let rows = stmt.query_map([term], |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, i64>(1)? as f64,
                            row.get::<_, i64>(2)? as f64,
                        ))
                    })?;
                    for row in rows {
                        let (chunk_id, term_freq, length) = row?;
                        let norm = 1.0 - config.b + config.b * length / avg_length.max(1.0);
                        let score =
                            idf * term_freq * (config.k1 + 1.0) / (term_freq + config.k1 * norm);
                        *scores.entry(chunk_id).or_insert(0.0) += score;
                    }
                }

                let mut hits: Vec<SearchHit> = scores
                    .into_iter()
                    .map(|(chunk_id, score)| SearchHit { chunk_id, score })
                    .collect();
                hits.sort_by(|a, b| {
                    b.score
                        .partial_cmp(&a.score)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then(a.chunk_id.cmp(&b.chunk_id))
                });
                hits.truncate(top_k);
                Ok(hits)
            })
            .await?;
        Ok(hits)
    }

    /// Rebuild every posting from the chunk rows, the repair path for drift
    /// detected after out-of-band data changes.
    pub async fn rebuild(&self) -> Result<ReconcileReport, SearchError> {
        let report = self
            .conn
            .call(|conn| {
                let tx = conn.transaction()?;
                tx.execute("DELETE FROM search_postings", [])?;
                tx.execute("DELETE FROM search_terms", [])?;

                let chunks: Vec<(i64, String)> = {
                    let mut stmt = tx.prepare("SELECT id, text FROM chunks")?;
                    let rows =
                        stmt.query_map([], |row| Ok((row.get(0)?, row.get::<_, String>(1)?)))?;
                    let mut chunks = Vec::new();
                    for row in rows {
                        chunks.push(row?);
                    }
                    chunks
                };

                for (chunk_id, text) in &chunks {
                    let tokens = tokenize(text);
                    tx.execute(
                        "UPDATE chunks SET token_count = ?2 WHERE id = ?1",
                        (chunk_id, tokens.len() as i64),
                    )?;
                    add_postings(&tx, *chunk_id, &tokens)?;
                }

                let postings: i64 =
                    tx.query_row("SELECT COUNT(*) FROM search_postings", [], |row| row.get(0))?;
                let terms: i64 =
                    tx.query_row("SELECT COUNT(*) FROM search_terms", [], |row| row.get(0))?;
                tx.commit()?;
                Ok(ReconcileReport {
                    chunks: chunks.len(),
                    postings: postings as usize,
                    terms: terms as usize,
                })
            })
            .await?;
        Ok(report)
    }
}

/// Parse query text into lowercase terms. Double quotes must balance; they
/// carry no phrase semantics beyond that and are dropped before tokenizing.
fn parse_query(query: &str) -> Result<Vec<String>, SearchError> {
    if query.matches('"').count() % 2 != 0 {
        return Err(SearchError::QuerySyntax(
            "unbalanced double quote".to_string(),
        ));
    }
    let stripped = query.replace('"', " ");
    let terms = tokenize(&stripped);
    if terms.is_empty() {
        return Err(SearchError::QuerySyntax(
            "query contains no searchable terms".to_string(),
        ));
    }
    Ok(terms)
}
