//! Boundary-aware document chunker.
//!
//! Splits extracted text into overlapping chunks whose boundaries land on
//! structural markers (numbered clauses, ARTICLE/SECTION headings, paragraph
//! breaks) whenever one exists inside the size window, falling back to
//! sentence ends and finally to a hard split at the size limit. Hard splits
//! are flagged on the chunk so the pipeline can log the degraded-quality
//! event; they are never fatal.
//!
//! Invariants:
//! - the union of chunk spans covers the input exactly (first starts at 0,
//!   last ends at `text.len()`, each chunk starts at or before its
//!   predecessor's end);
//! - consecutive chunks share up to `overlap_words` words of context;
//! - identical input and config produce byte-identical boundaries.

use std::sync::OnceLock;

use regex::Regex;
use uuid::Uuid;

use crate::config::AnalysisConfig;

use super::types::Chunk;

/// A structural marker detected in the document.
struct SectionHeader {
    position: usize,
    title: String,
}

fn header_patterns() -> &'static Vec<Regex> {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            // Numbered clause: "12. Limitation of Liability", "3.2 Fees"
            r"(?m)^\s{0,3}(\d+(?:\.\d+)*\.?\s+[A-Z][^\n]{2,80})",
            // "ARTICLE IV ..." / "SECTION 7 ..."
            r"(?mi)^\s{0,3}((?:ARTICLE|SECTION)\s+(?:[IVXLC]+|\d+)\b[^\n]{0,60})",
            // Common standalone legal headings
            r"(?mi)^\s{0,3}((?:DEFINITIONS?|TERMINATION|LIABILITY|INDEMNIFICATION|CONFIDENTIALITY|GOVERNING\s+LAW|WARRANTIES)[^\n]{0,40})$",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("invalid header pattern"))
        .collect()
    })
}

/// Single pass over the text collecting all structural markers, sorted by
/// position.
fn section_headers(text: &str) -> Vec<SectionHeader> {
    let mut headers: Vec<SectionHeader> = Vec::new();
    for pattern in header_patterns() {
        for captures in pattern.captures_iter(text) {
            if let Some(m) = captures.get(1) {
                headers.push(SectionHeader {
                    position: m.start(),
                    title: m.as_str().trim().to_string(),
                });
            }
        }
    }
    headers.sort_by_key(|h| h.position);
    headers.dedup_by_key(|h| h.position);
    headers
}

/// Split a document's text into chunks per the configured policy.
///
/// Returns an empty vec for blank input (the pipeline treats that as a
/// document-fatal condition).
pub fn chunk_text(text: &str, config: &AnalysisConfig) -> Vec<Chunk> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let len = text.len();
    let max = config.max_chunk_chars.max(64);
    let headers = section_headers(text);

    // Small documents become a single full-coverage chunk.
    if len <= max {
        return vec![make_chunk(text, 0, 0, len, &headers, config, false)];
    }

    let mut chunks = Vec::new();
    let mut start = 0usize;
    let mut index = 0usize;

    loop {
        let hard_end = floor_char_boundary(text, (start + max).min(len));
        if hard_end >= len {
            chunks.push(make_chunk(text, index, start, len, &headers, config, false));
            break;
        }

        let search_from = floor_char_boundary(text, start + max / 2);
        let (end, hard_split) = match find_boundary(text, search_from, hard_end, &headers) {
            Some(boundary) => (boundary, false),
            None => (hard_end, true),
        };

        chunks.push(make_chunk(text, index, start, end, &headers, config, hard_split));

        if end >= len {
            break;
        }

        // The overlap may not reach back past the midpoint of the previous
        // chunk, so every iteration advances by at least half a window.
        let overlapped = back_up_words(text, end, config.overlap_words);
        let min_start = floor_char_boundary(text, start + max / 2).min(end);
        start = overlapped.max(min_start);
        index += 1;
    }

    chunks
}

/// Pick the best split point inside `(search_from, hard_end]`.
///
/// Preference order: structural header, paragraph break, sentence end, line
/// break. Returns `None` when the window contains none of these.
fn find_boundary(
    text: &str,
    search_from: usize,
    hard_end: usize,
    headers: &[SectionHeader],
) -> Option<usize> {
    // 1. Last structural header inside the window: the header starts the
    //    next chunk.
    if let Some(pos) = headers
        .iter()
        .map(|h| h.position)
        .filter(|&p| p > search_from && p <= hard_end)
        .last()
    {
        return Some(pos);
    }

    let window = &text[search_from..hard_end];

    // 2. Last paragraph break.
    if let Some(rel) = window.rfind("\n\n") {
        return Some(search_from + rel + 2);
    }

    // 3. Last sentence end.
    if let Some(rel) = window.rfind(". ") {
        return Some(search_from + rel + 2);
    }

    // 4. Last line break.
    window.rfind('\n').map(|rel| search_from + rel + 1)
}

fn make_chunk(
    text: &str,
    index: usize,
    start: usize,
    end: usize,
    headers: &[SectionHeader],
    config: &AnalysisConfig,
    hard_split: bool,
) -> Chunk {
    Chunk {
        id: Uuid::new_v4(),
        index,
        start,
        end,
        page_range: page_range(start, end, config.chars_per_page),
        section: section_for(headers, start),
        overlap_words: if index == 0 { 0 } else { config.overlap_words },
        hard_split,
    }
}

/// Estimated page range for display, ~`chars_per_page` characters per page.
pub fn page_range(start: usize, end: usize, chars_per_page: usize) -> String {
    let per_page = chars_per_page.max(1);
    let first = start / per_page + 1;
    let last = (end.saturating_sub(1) / per_page + 1).max(first);
    if first == last {
        format!("{first}")
    } else {
        format!("{first}-{last}")
    }
}

/// Nearest section heading at or before `position`, truncated for display.
fn section_for(headers: &[SectionHeader], position: usize) -> Option<String> {
    headers
        .iter()
        .take_while(|h| h.position <= position)
        .last()
        .map(|h| {
            let mut title = h.title.clone();
            if title.len() > 60 {
                title.truncate(floor_char_boundary(&title, 60));
            }
            title
        })
}

/// Walk back `words` whitespace-separated words from `pos`, returning the
/// byte index where the overlap window begins.
fn back_up_words(text: &str, pos: usize, words: usize) -> usize {
    if words == 0 {
        return pos;
    }
    let mut counted = 0usize;
    let mut in_word = false;
    let mut word_start = pos;
    for (idx, ch) in text[..pos].char_indices().rev() {
        if ch.is_whitespace() {
            if in_word {
                counted += 1;
                if counted >= words {
                    return word_start;
                }
                in_word = false;
            }
        } else {
            in_word = true;
            word_start = idx;
        }
    }
    0
}

/// Largest char boundary at or below `index`.
fn floor_char_boundary(text: &str, mut index: usize) -> usize {
    if index >= text.len() {
        return text.len();
    }
    while index > 0 && !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}
