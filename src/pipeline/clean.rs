//! Text normalization applied before chunking.

/// Normalize extracted text for chunking.
///
/// Line endings become `\n`, control characters other than newline and tab
/// are dropped, trailing whitespace is trimmed per line, and runs of blank
/// lines collapse to a single blank line.
pub fn clean_text(text: &str) -> String {
    let unified = text.replace("\r\n", "\n").replace('\r', "\n");
    let stripped: String = unified
        .chars()
        .filter(|&c| c == '\n' || c == '\t' || !c.is_control())
        .collect();

    let mut cleaned = String::with_capacity(stripped.len());
    let mut blank_run = 0usize;
    for line in stripped.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        cleaned.push_str(line);
        cleaned.push('\n');
    }
    while cleaned.ends_with('\n') {
        cleaned.pop();
    }
    cleaned
}

/// Clean a document page by page, returning the cleaned text and the starting
/// character offset of each page within it.
///
/// Cleaning removes characters, so offsets computed against the raw text
/// would drift; recomputing them per cleaned page keeps chunk page
/// attribution exact. Pages are joined with a newline so words never merge
/// across a page break. An empty offset list cleans the text as one page.
pub fn clean_pages(text: &str, page_offsets: &[usize]) -> (String, Vec<usize>) {
    if page_offsets.is_empty() {
        return (clean_text(text), Vec::new());
    }

    let chars: Vec<char> = text.chars().collect();
    let mut cleaned = String::with_capacity(text.len());
    let mut offsets = Vec::with_capacity(page_offsets.len());
    let mut cursor = 0usize;

    for (idx, &start) in page_offsets.iter().enumerate() {
        let start = start.min(chars.len());
        let end = page_offsets
            .get(idx + 1)
            .copied()
            .unwrap_or(chars.len())
            .clamp(start, chars.len());
        let page: String = chars[start..end].iter().collect();
        let cleaned_page = clean_text(&page);

        if idx > 0 {
            cleaned.push('\n');
            cursor += 1;
        }
        offsets.push(cursor);
        cursor += cleaned_page.chars().count();
        cleaned.push_str(&cleaned_page);
    }

    (cleaned, offsets)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unifies_line_endings() {
        assert_eq!(clean_text("a\r\nb\rc"), "a\nb\nc");
    }

    #[test]
    fn strips_control_characters_but_keeps_tabs() {
        assert_eq!(clean_text("a\u{0}b\u{7}c\td"), "abc\td");
    }

    #[test]
    fn collapses_blank_runs() {
        assert_eq!(clean_text("one\n\n\n\ntwo"), "one\n\ntwo");
    }

    #[test]
    fn trims_trailing_whitespace_per_line() {
        assert_eq!(clean_text("line one   \nline two\t"), "line one\nline two");
    }

    #[test]
    fn is_idempotent() {
        let messy = "head\r\n\r\n\r\n  body line  \r\ntail\u{8}";
        let once = clean_text(messy);
        assert_eq!(clean_text(&once), once);
    }

    #[test]
    fn clean_pages_without_offsets_matches_clean_text() {
        let text = "one\r\ntwo\u{0}";
        let (cleaned, offsets) = clean_pages(text, &[]);
        assert_eq!(cleaned, clean_text(text));
        assert!(offsets.is_empty());
    }

    #[test]
    fn clean_pages_recomputes_offsets_after_character_removal() {
        // Page one loses two characters to cleaning (a NUL and a CR), so the
        // raw offset of page two (8) no longer points at its first character.
        let text = "ab\u{0}cd\r\n\nPage two";
        let (cleaned, offsets) = clean_pages(text, &[0, 8]);

        assert_eq!(cleaned, "abcd\nPage two");
        assert_eq!(offsets, vec![0, 5]);
        let page_two_start = offsets[1];
        let tail: String = cleaned.chars().skip(page_two_start).collect();
        assert_eq!(tail, "Page two");
    }

    #[test]
    fn clean_pages_keeps_adjacent_pages_from_merging() {
        let (cleaned, offsets) = clean_pages("ends without break\u{0}next page", &[0, 19]);
        assert_eq!(cleaned, "ends without break\nnext page");
        assert_eq!(offsets, vec![0, 19]);
    }
}
