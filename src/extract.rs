//! Document extraction seam and the bundled plain-text extractor.
//!
//! Extraction turns an on-disk source into page-structured text. The pipeline
//! only depends on the [`Extractor`] trait, so richer format support plugs in
//! without touching ingestion.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

/// Errors raised while extracting a document.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// The source file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// Path that failed to read.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
    /// The source file is not valid UTF-8 text.
    #[error("{path} is not valid UTF-8 text")]
    NotText {
        /// Path that failed to decode.
        path: PathBuf,
    },
}

/// One page of extracted text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageText {
    /// One-based page number.
    pub number: u32,
    /// Page text as extracted.
    pub text: String,
    /// Character count of the page text.
    pub char_count: usize,
}

/// Aggregate counts for an extraction run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExtractionStats {
    /// Total characters across all pages.
    pub char_count: usize,
    /// Number of pages found.
    pub page_count: usize,
}

/// Result of extracting one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedDocument {
    /// The whole document as one string, pages joined in order.
    pub full_text: String,
    /// Per-page text in page order.
    pub pages: Vec<PageText>,
    /// Aggregate counts.
    pub stats: ExtractionStats,
}

impl ExtractedDocument {
    /// Starting character offset of each page within `full_text`.
    pub fn page_offsets(&self) -> Vec<usize> {
        let mut offsets = Vec::with_capacity(self.pages.len());
        let mut cursor = 0usize;
        for page in &self.pages {
            offsets.push(cursor);
            cursor += page.char_count;
        }
        offsets
    }
}

/// Turns a source file into page-structured text.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Extract the document at `path`.
    async fn extract(&self, path: &Path) -> Result<ExtractedDocument, ExtractionError>;
}

/// Extractor for UTF-8 text files. Form feeds (`\x0C`) mark page breaks.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainTextExtractor;

#[async_trait]
impl Extractor for PlainTextExtractor {
    async fn extract(&self, path: &Path) -> Result<ExtractedDocument, ExtractionError> {
        let bytes = tokio::fs::read(path).await.map_err(|source| ExtractionError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let text = String::from_utf8(bytes).map_err(|_| ExtractionError::NotText {
            path: path.to_path_buf(),
        })?;
        Ok(document_from_text(&text))
    }
}

/// Build an [`ExtractedDocument`] from already-loaded text.
pub fn document_from_text(text: &str) -> ExtractedDocument {
    let mut pages = Vec::new();
    let mut full_text = String::with_capacity(text.len());
    for (idx, page) in text.split('\x0C').enumerate() {
        full_text.push_str(page);
        pages.push(PageText {
            number: (idx + 1) as u32,
            text: page.to_string(),
            char_count: page.chars().count(),
        });
    }
    let stats = ExtractionStats {
        char_count: full_text.chars().count(),
        page_count: pages.len(),
    };
    ExtractedDocument {
        full_text,
        pages,
        stats,
    }
}
