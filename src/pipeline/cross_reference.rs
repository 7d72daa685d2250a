//! Cross-reference validation across a document's chunks.
//!
//! Runs only after every chunk has reached a terminal status (the join
//! barrier guarantees the findings set is complete). Scans the available
//! chunks for relationships that span chunk boundaries: structural
//! references (section/clause/article mentions resolving in another chunk),
//! shared legal-term categories, and numeric values that should agree but
//! don't. Disagreements become findings of category
//! "cross-reference inconsistency"; shared terms annotate existing findings
//! with links.
//!
//! Chunks that errored are excluded from scanning — validation covers only
//! available data and the result is flagged as reduced-confidence.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use uuid::Uuid;

use super::types::{Chunk, Finding, Severity};

/// Category attached to findings produced by this stage.
pub const INCONSISTENCY_CATEGORY: &str = "cross-reference inconsistency";

/// Outcome counters for activity reporting.
#[derive(Debug, Clone, Default)]
pub struct CrossRefSummary {
    pub structural_links: usize,
    pub term_links: usize,
    pub inconsistencies: usize,
    /// Set when some chunks errored and validation ran on partial data.
    pub reduced_confidence: bool,
}

struct TermCategory {
    category: &'static str,
    pattern: &'static str,
}

const TERM_CATEGORIES: &[TermCategory] = &[
    TermCategory { category: "liability", pattern: r"(?i)\bliabilit" },
    TermCategory { category: "indemnification", pattern: r"(?i)\bindemnif" },
    TermCategory { category: "termination", pattern: r"(?i)\bterminat" },
    TermCategory { category: "payment", pattern: r"(?i)\b(?:payment|fees?|invoice)\b" },
    TermCategory { category: "confidentiality", pattern: r"(?i)\bconfidential" },
    TermCategory { category: "governing_law", pattern: r"(?i)\bgoverning\s+law\b" },
];

fn term_regexes() -> &'static Vec<Regex> {
    static REGEXES: OnceLock<Vec<Regex>> = OnceLock::new();
    REGEXES.get_or_init(|| {
        TERM_CATEGORIES
            .iter()
            .map(|t| Regex::new(t.pattern).expect("invalid term pattern"))
            .collect()
    })
}

fn structural_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(section|clause|article|exhibit|schedule|paragraph)\s+(\d+(?:\.\d+)*|[ivxlc]+)\b")
            .expect("invalid structural pattern")
    })
}

fn liability_amount_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)liabilit[^.\n]{0,80}?\$\s?([\d][\d,]*)").expect("invalid amount pattern")
    })
}

fn notice_period_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(\d{1,4})\s+(?:calendar\s+|business\s+)?days[’']?\s+(?:prior\s+)?(?:written\s+)?notice")
            .expect("invalid notice pattern")
    })
}

/// A numeric value observed in a chunk, keyed by its document offset so the
/// same occurrence seen through two overlapping chunk windows counts once.
struct ValueOccurrence {
    value: u64,
    doc_start: usize,
    doc_end: usize,
    chunk_index: usize,
}

/// Validate relationships across the available chunks of one document.
///
/// Appends inconsistency findings to `findings` and annotates existing
/// findings with cross-reference links. Pure and deterministic.
pub fn validate(
    text: &str,
    chunks: &[Chunk],
    failed_chunks: &[usize],
    findings: &mut Vec<Finding>,
) -> CrossRefSummary {
    let mut summary = CrossRefSummary {
        reduced_confidence: !failed_chunks.is_empty(),
        ..Default::default()
    };

    let active: Vec<&Chunk> = chunks
        .iter()
        .filter(|c| !failed_chunks.contains(&c.index))
        .collect();
    if active.len() < 2 {
        return summary;
    }

    summary.structural_links = count_structural_links(text, &active);
    summary.term_links = link_term_findings(text, &active, findings);

    let mut inconsistencies = Vec::new();
    detect_value_conflicts(
        text,
        &active,
        liability_amount_regex(),
        Severity::High,
        "Conflicting liability limits referenced across sections",
        |v| format!("${v}"),
        &mut inconsistencies,
    );
    detect_value_conflicts(
        text,
        &active,
        notice_period_regex(),
        Severity::Medium,
        "Inconsistent notice periods referenced across sections",
        |v| format!("{v} days"),
        &mut inconsistencies,
    );

    summary.inconsistencies = inconsistencies.len();
    findings.extend(inconsistencies);
    summary
}

/// Count structural references (e.g. "Section 4.2") that appear in more than
/// one chunk — a mention in one chunk resolving in another.
fn count_structural_links(text: &str, active: &[&Chunk]) -> usize {
    let mut marker_chunks: BTreeMap<(String, String), Vec<usize>> = BTreeMap::new();

    for chunk in active {
        for captures in structural_regex().captures_iter(chunk.slice(text)) {
            let kind = captures[1].to_ascii_lowercase();
            let id = captures[2].to_ascii_lowercase();
            let entry = marker_chunks.entry((kind, id)).or_default();
            if !entry.contains(&chunk.index) {
                entry.push(chunk.index);
            }
        }
    }

    marker_chunks
        .values()
        .filter(|chunks| chunks.len() > 1)
        .map(|chunks| chunks.len() * (chunks.len() - 1) / 2)
        .sum()
}

/// Annotate findings whose chunks share a legal-term category with links to
/// each other. Returns the number of links created.
fn link_term_findings(text: &str, active: &[&Chunk], findings: &mut [Finding]) -> usize {
    let mut links = 0usize;

    for (term, regex) in TERM_CATEGORIES.iter().zip(term_regexes()) {
        let matching_chunks: Vec<&&Chunk> = active
            .iter()
            .filter(|c| regex.is_match(c.slice(text)))
            .collect();
        if matching_chunks.len() < 2 {
            continue;
        }

        // First finding of this category per matching chunk.
        let mut per_chunk: Vec<Uuid> = Vec::new();
        for chunk in &matching_chunks {
            if let Some(f) = findings
                .iter()
                .find(|f| f.category == term.category && f.chunk_ids.contains(&chunk.id))
            {
                per_chunk.push(f.id);
            }
        }
        per_chunk.dedup();

        for pair in per_chunk.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            for finding in findings.iter_mut() {
                if finding.id == a && !finding.related.contains(&b) {
                    finding.related.push(b);
                }
                if finding.id == b && !finding.related.contains(&a) {
                    finding.related.push(a);
                }
            }
            links += 1;
        }
    }

    links
}

/// Find occurrences of a captured numeric value across chunks; when distinct
/// values disagree, emit an inconsistency finding pointing at both sites.
fn detect_value_conflicts(
    text: &str,
    active: &[&Chunk],
    regex: &Regex,
    severity: Severity,
    description: &str,
    format_value: impl Fn(u64) -> String,
    out: &mut Vec<Finding>,
) {
    let mut occurrences: Vec<ValueOccurrence> = Vec::new();

    for chunk in active {
        for captures in regex.captures_iter(chunk.slice(text)) {
            let Some(whole) = captures.get(0) else { continue };
            let digits: String = captures[1].chars().filter(|c| c.is_ascii_digit()).collect();
            let Ok(value) = digits.parse::<u64>() else { continue };
            let doc_start = chunk.start + whole.start();
            // The overlap window shows the same occurrence to both
            // neighbors; count it once.
            if occurrences.iter().any(|o| o.doc_start == doc_start) {
                continue;
            }
            occurrences.push(ValueOccurrence {
                value,
                doc_start,
                doc_end: chunk.start + whole.end(),
                chunk_index: chunk.index,
            });
        }
    }

    let Some(first) = occurrences.first() else { return };
    let Some(conflict) = occurrences.iter().find(|o| o.value != first.value) else {
        return;
    };

    let first_chunk = active.iter().find(|c| c.index == first.chunk_index);
    let conflict_chunk = active.iter().find(|c| c.index == conflict.chunk_index);
    let (Some(first_chunk), Some(conflict_chunk)) = (first_chunk, conflict_chunk) else {
        return;
    };

    out.push(Finding {
        id: Uuid::new_v4(),
        severity,
        category: INCONSISTENCY_CATEGORY.to_string(),
        description: format!(
            "{description}: {} (pages {}) vs {} (pages {})",
            format_value(first.value),
            first_chunk.page_range,
            format_value(conflict.value),
            conflict_chunk.page_range
        ),
        evidence: text[first.doc_start..first.doc_end].to_string(),
        evidence_start: first.doc_start,
        evidence_end: first.doc_end,
        location: format!("pages {}", first_chunk.page_range),
        confidence: 0.8,
        chunk_ids: vec![first_chunk.id, conflict_chunk.id],
        related: Vec::new(),
    });
}
