//! Sliding-window text splitter with reproducible boundary snapping.
//!
//! The splitter walks the character stream in windows of `chunk_size`,
//! advancing by `chunk_size - chunk_overlap` each step. Near each cut it
//! prefers the closest whitespace or sentence break within a slack of
//! `chunk_size / 10` characters (backward first, then forward); when no break
//! exists inside the slack, it cuts hard. Because the snap rule only depends
//! on the input text and the configuration, identical input always yields
//! identical boundaries.

use thiserror::Error;

/// Errors raised while validating chunking parameters.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChunkingError {
    /// Chunk size of zero can never produce a window.
    #[error("chunk size must be greater than zero")]
    InvalidChunkSize,
    /// Overlap at or above the chunk size would prevent the window from advancing.
    #[error("chunk overlap ({overlap}) must be smaller than chunk size ({chunk_size})")]
    OverlapTooLarge {
        /// Configured overlap in characters.
        overlap: usize,
        /// Configured chunk size in characters.
        chunk_size: usize,
    },
}

/// Character-based window configuration for the splitter.
#[derive(Debug, Clone, Copy)]
pub struct ChunkingConfig {
    /// Maximum window length in characters.
    pub chunk_size: usize,
    /// Characters shared between consecutive windows.
    pub chunk_overlap: usize,
}

impl ChunkingConfig {
    /// Validate the configuration before any chunk is produced.
    pub fn validate(&self) -> Result<(), ChunkingError> {
        if self.chunk_size == 0 {
            return Err(ChunkingError::InvalidChunkSize);
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(ChunkingError::OverlapTooLarge {
                overlap: self.chunk_overlap,
                chunk_size: self.chunk_size,
            });
        }
        Ok(())
    }

    /// Boundary-snap slack in characters (one tenth of the window).
    pub fn slack(&self) -> usize {
        self.chunk_size / 10
    }
}

/// One addressable slice of a document produced by [`chunk`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSlice {
    /// Zero-based, contiguous position within the document.
    pub index: usize,
    /// Slice text.
    pub text: String,
    /// Inclusive character offset where the slice starts.
    pub start_char: usize,
    /// Exclusive character offset where the slice ends.
    pub end_char: usize,
    /// One-based page the slice starts on, when page offsets were supplied.
    pub page_number: Option<u32>,
}

/// Split `text` into ordered, overlapping chunks.
///
/// `page_offsets` holds the starting character offset of each page in
/// ascending order; pass an empty slice when pagination is unknown. The
/// function is pure: it touches no storage and is safe to re-run.
///
/// Empty input yields zero chunks. Text no longer than `chunk_size` yields a
/// single chunk covering everything.
///
/// # Errors
///
/// Returns [`ChunkingError`] when the configuration is invalid; no chunk is
/// produced in that case.
///
/// # Examples
///
/// ```
/// use chunkmill::chunking::{ChunkingConfig, chunk};
///
/// let config = ChunkingConfig { chunk_size: 1000, chunk_overlap: 200 };
/// let text = "x".repeat(2500);
/// let chunks = chunk(&text, &[], &config).unwrap();
/// let starts: Vec<usize> = chunks.iter().map(|c| c.start_char).collect();
/// assert_eq!(starts, vec![0, 800, 1600, 2400]);
/// ```
pub fn chunk(
    text: &str,
    page_offsets: &[usize],
    config: &ChunkingConfig,
) -> Result<Vec<ChunkSlice>, ChunkingError> {
    config.validate()?;

    if text.is_empty() {
        return Ok(Vec::new());
    }

    // Char index -> byte index, with a sentinel for the end of the text.
    let chars: Vec<char> = text.chars().collect();
    let char_to_byte: Vec<usize> = text
        .char_indices()
        .map(|(byte_idx, _)| byte_idx)
        .chain(std::iter::once(text.len()))
        .collect();
    let char_count = chars.len();

    if char_count <= config.chunk_size {
        return Ok(vec![make_slice(
            text,
            &char_to_byte,
            page_offsets,
            0,
            0,
            char_count,
        )]);
    }

    let mut slices = Vec::new();
    let mut start = 0usize;
    let mut index = 0usize;

    while start < char_count {
        let nominal = start + config.chunk_size;
        let (end, next_start) = if nominal < char_count {
            let snapped = snap_boundary(&chars, nominal, start, config);
            (snapped, snapped - config.chunk_overlap)
        } else {
            // Remainder window: cap at the end but keep the nominal advance so
            // trailing starts stay on the regular grid.
            (char_count, nominal - config.chunk_overlap)
        };

        slices.push(make_slice(
            text,
            &char_to_byte,
            page_offsets,
            index,
            start,
            end,
        ));
        index += 1;

        if next_start <= start {
            break;
        }
        start = next_start;
    }

    Ok(slices)
}

/// Whitespace or sentence terminator that a cut may rest after.
fn is_break(c: char) -> bool {
    c.is_whitespace() || matches!(c, '.' | '!' | '?')
}

/// Move the cut at `nominal` to the nearest break within the slack.
///
/// A cut at position `e` is on a break when the character at `e - 1` is a
/// break character. Backward candidates are preferred; the cut never moves to
/// or before `start + overlap` so the window always advances.
fn snap_boundary(
    chars: &[char],
    nominal: usize,
    start: usize,
    config: &ChunkingConfig,
) -> usize {
    let slack = config.slack();
    let floor = (start + config.chunk_overlap + 1).max(nominal.saturating_sub(slack));

    let mut candidate = nominal;
    while candidate >= floor {
        if is_break(chars[candidate - 1]) {
            return candidate;
        }
        candidate -= 1;
    }

    let ceiling = (nominal + slack).min(chars.len());
    for candidate in (nominal + 1)..=ceiling {
        if is_break(chars[candidate - 1]) {
            return candidate;
        }
    }

    nominal
}

fn make_slice(
    text: &str,
    char_to_byte: &[usize],
    page_offsets: &[usize],
    index: usize,
    start: usize,
    end: usize,
) -> ChunkSlice {
    let page_number = if page_offsets.is_empty() {
        None
    } else {
        Some(page_offsets.partition_point(|&offset| offset <= start) as u32)
    };
    ChunkSlice {
        index,
        text: text[char_to_byte[start]..char_to_byte[end]].to_string(),
        start_char: start,
        end_char: end,
        page_number,
    }
}
