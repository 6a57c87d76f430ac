//! Optional per-chunk metadata enrichment.
//!
//! Enrichment is a pluggable seam between chunk persistence and embedding.
//! Implementations classify a chunk's text and the pipeline writes the result
//! back onto the row. Failures here are recorded but never block indexing.

use serde::{Deserialize, Serialize};

/// Metadata attached to a chunk by an [`Enricher`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkEnrichment {
    /// Coarse structural label, e.g. "heading", "table", "paragraph".
    pub section_type: Option<String>,
    /// Short topic label for the chunk.
    pub topic: Option<String>,
    /// Whether the chunk appears to contain tabular data.
    pub has_tables: bool,
    /// Whether the chunk mentions monetary amounts.
    pub has_amounts: bool,
    /// Named entities extracted from the text, stored as JSON.
    pub entities: Option<serde_json::Value>,
}

/// Classifies chunk text into [`ChunkEnrichment`] metadata.
///
/// Implementations must be cheap enough to run inline during ingestion or
/// defer the heavy work themselves.
pub trait Enricher: Send + Sync {
    /// Produce metadata for one chunk of text.
    fn enrich(&self, text: &str) -> ChunkEnrichment;
}

/// Enricher that attaches no metadata. Used when enrichment is disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEnricher;

impl Enricher for NoopEnricher {
    fn enrich(&self, _text: &str) -> ChunkEnrichment {
        ChunkEnrichment::default()
    }
}

/// Rule-based enricher covering the common structural signals.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeuristicEnricher;

impl Enricher for HeuristicEnricher {
    fn enrich(&self, text: &str) -> ChunkEnrichment {
        let trimmed = text.trim();
        let has_tables = looks_tabular(trimmed);
        let has_amounts = mentions_amounts(trimmed);

        let section_type = if trimmed.is_empty() {
            None
        } else if has_tables {
            Some("table".to_string())
        } else if is_heading_like(trimmed) {
            Some("heading".to_string())
        } else {
            Some("paragraph".to_string())
        };

        ChunkEnrichment {
            section_type,
            topic: None,
            has_tables,
            has_amounts,
            entities: None,
        }
    }
}

/// Several lines sharing pipe or tab separators read as a table.
fn looks_tabular(text: &str) -> bool {
    let separated = text
        .lines()
        .filter(|line| line.contains('|') || line.contains('\t'))
        .count();
    separated >= 2
}

fn mentions_amounts(text: &str) -> bool {
    if text.contains('$') || text.contains('€') || text.contains('£') {
        return true;
    }
    // Digit groups punctuated like money, e.g. 1,250.00.
    text.split_whitespace().any(|word| {
        let word = word.trim_matches(|c: char| !c.is_ascii_digit());
        word.contains(|c: char| c.is_ascii_digit())
            && word.chars().all(|c| c.is_ascii_digit() || c == ',' || c == '.')
            && (word.contains(',') || word.contains('.'))
            && word.len() >= 5
    })
}

fn is_heading_like(text: &str) -> bool {
    let mut lines = text.lines();
    let first = match lines.next() {
        Some(line) => line.trim(),
        None => return false,
    };
    lines.next().is_none()
        && first.chars().count() <= 80
        && !first.ends_with('.')
        && !first.is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_attaches_nothing() {
        let meta = NoopEnricher.enrich("Quarterly totals were up.");
        assert_eq!(meta, ChunkEnrichment::default());
    }

    #[test]
    fn detects_tables() {
        let text = "name | total\nwidgets | 14\ngadgets | 9";
        let meta = HeuristicEnricher.enrich(text);
        assert!(meta.has_tables);
        assert_eq!(meta.section_type.as_deref(), Some("table"));
    }

    #[test]
    fn detects_amounts() {
        let meta = HeuristicEnricher.enrich("The invoice came to $1,250.00 in March.");
        assert!(meta.has_amounts);
        assert!(!meta.has_tables);
    }

    #[test]
    fn short_single_line_is_a_heading() {
        let meta = HeuristicEnricher.enrich("Quarterly Review");
        assert_eq!(meta.section_type.as_deref(), Some("heading"));
    }

    #[test]
    fn prose_is_a_paragraph() {
        let meta = HeuristicEnricher
            .enrich("The review covered three quarters of activity. Results were mixed.");
        assert_eq!(meta.section_type.as_deref(), Some("paragraph"));
        assert!(!meta.has_amounts);
    }
}
