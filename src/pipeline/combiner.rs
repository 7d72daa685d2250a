//! Result combination — merges a document's findings into one ordered report.
//!
//! The overlap window between adjacent chunks makes both neighbors see the
//! same clause, so the same risk is often reported twice with near-identical
//! evidence spans. Two findings are duplicates when their evidence spans
//! overlap by more than the configured fraction of the shorter span; the
//! higher-confidence one survives and provenance chunk references are
//! merged.
//!
//! This module is the single place allowed to produce a document's final
//! report; the document pipeline writes it exactly once together with the
//! terminal status.

use chrono::Utc;

use super::cross_reference::CrossRefSummary;
use super::types::{
    Chunk, ChunkOutcome, DocumentReport, Finding, ReportSummary, Severity, UnanalyzedRange,
};

/// Merge, de-duplicate and order a document's findings into its report.
pub fn combine(
    document_id: uuid::Uuid,
    filename: &str,
    chunks: &[Chunk],
    outcomes: &[ChunkOutcome],
    findings: Vec<Finding>,
    xref: &CrossRefSummary,
    duplicate_overlap_threshold: f32,
    duration_ms: u64,
) -> DocumentReport {
    let mut findings = deduplicate(findings, duplicate_overlap_threshold);

    // Severity high→low, then document position of first evidence.
    findings.sort_by(|a, b| {
        a.severity
            .rank()
            .cmp(&b.severity.rank())
            .then(a.evidence_start.cmp(&b.evidence_start))
    });

    let unanalyzed: Vec<UnanalyzedRange> = outcomes
        .iter()
        .filter_map(|outcome| match outcome {
            ChunkOutcome::Failed {
                chunk_index,
                reason,
                ..
            } => Some(UnanalyzedRange {
                chunk_index: *chunk_index,
                page_range: chunks
                    .get(*chunk_index)
                    .map(|c| c.page_range.clone())
                    .unwrap_or_else(|| "?".into()),
                reason: reason.clone(),
            }),
            ChunkOutcome::Analyzed { .. } => None,
        })
        .collect();

    let confidences: Vec<f32> = outcomes
        .iter()
        .filter_map(|outcome| match outcome {
            ChunkOutcome::Analyzed { confidence, .. } => Some(*confidence),
            ChunkOutcome::Failed { .. } => None,
        })
        .collect();
    let average_confidence = if confidences.is_empty() {
        0.0
    } else {
        confidences.iter().sum::<f32>() / confidences.len() as f32
    };

    let count = |severity: Severity| findings.iter().filter(|f| f.severity == severity).count();

    let summary = ReportSummary {
        chunks_total: chunks.len(),
        chunks_failed: unanalyzed.len(),
        high_count: count(Severity::High),
        medium_count: count(Severity::Medium),
        low_count: count(Severity::Low),
        cross_reference_links: xref.structural_links + xref.term_links,
        average_confidence,
        reduced_confidence: xref.reduced_confidence,
        duration_ms,
    };

    DocumentReport {
        document_id,
        filename: filename.to_string(),
        findings,
        unanalyzed,
        summary,
        generated_at: Utc::now(),
    }
}

/// Collapse findings whose evidence spans overlap beyond the threshold.
pub fn deduplicate(mut findings: Vec<Finding>, threshold: f32) -> Vec<Finding> {
    findings.sort_by_key(|f| (f.evidence_start, f.evidence_end));

    let mut kept: Vec<Finding> = Vec::new();
    'next: for finding in findings {
        for existing in kept.iter_mut() {
            if is_duplicate(existing, &finding, threshold) {
                merge_duplicate(existing, finding);
                continue 'next;
            }
        }
        kept.push(finding);
    }
    kept
}

fn is_duplicate(a: &Finding, b: &Finding, threshold: f32) -> bool {
    let overlap = a
        .evidence_end
        .min(b.evidence_end)
        .saturating_sub(a.evidence_start.max(b.evidence_start));
    if overlap == 0 {
        return false;
    }
    let shorter = a.span_len().min(b.span_len()).max(1);
    overlap as f32 / shorter as f32 > threshold
}

/// Keep the higher-confidence duplicate's content, merge provenance.
fn merge_duplicate(existing: &mut Finding, other: Finding) {
    let (mut winner, loser) = if other.confidence > existing.confidence {
        (other, existing.clone())
    } else {
        (existing.clone(), other)
    };

    for id in loser.chunk_ids {
        if !winner.chunk_ids.contains(&id) {
            winner.chunk_ids.push(id);
        }
    }
    for id in loser.related {
        if !winner.related.contains(&id) {
            winner.related.push(id);
        }
    }
    *existing = winner;
}

/// Render a document report as display-ready text.
pub fn render_report(report: &DocumentReport) -> String {
    let mut out = String::new();
    let s = &report.summary;

    out.push_str(&format!("CONTRACT RISK REPORT — {}\n", report.filename));
    out.push_str(&format!(
        "Sections analyzed: {} of {} | Findings: {} high / {} medium / {} low | Average confidence: {:.0}%\n",
        s.chunks_total - s.chunks_failed,
        s.chunks_total,
        s.high_count,
        s.medium_count,
        s.low_count,
        s.average_confidence * 100.0
    ));
    if s.reduced_confidence {
        out.push_str("Note: some sections could not be analyzed; coverage is incomplete.\n");
    }

    for (severity, title) in [
        (Severity::High, "HIGH RISK"),
        (Severity::Medium, "MEDIUM RISK"),
        (Severity::Low, "LOW RISK"),
    ] {
        let group: Vec<&Finding> = report
            .findings
            .iter()
            .filter(|f| f.severity == severity)
            .collect();
        if group.is_empty() {
            continue;
        }
        out.push_str(&format!("\n{title}\n"));
        for (i, finding) in group.iter().enumerate() {
            out.push_str(&format!(
                "{}. [{}] {} ({}) — confidence {:.0}%\n",
                i + 1,
                finding.category,
                finding.description,
                finding.location,
                finding.confidence * 100.0
            ));
            out.push_str(&format!("   Evidence: \"{}\"\n", excerpt(&finding.evidence, 200)));
        }
    }

    if !report.unanalyzed.is_empty() {
        out.push('\n');
        for range in &report.unanalyzed {
            out.push_str(&format!(
                "could not be analyzed: pages {}, reason: {}\n",
                range.page_range, range.reason
            ));
        }
    }

    out
}

/// Combine per-document reports into one unified batch report.
pub fn render_unified_report(
    reports: &[&DocumentReport],
    failed_documents: &[(String, String)],
    duration_ms: u64,
) -> String {
    if reports.is_empty() && failed_documents.is_empty() {
        return "No documents were analyzed.".to_string();
    }

    let high: usize = reports.iter().map(|r| r.summary.high_count).sum();
    let medium: usize = reports.iter().map(|r| r.summary.medium_count).sum();
    let low: usize = reports.iter().map(|r| r.summary.low_count).sum();

    let mut out = String::new();
    out.push_str("UNIFIED RED FLAG ANALYSIS\n\n");
    out.push_str("Executive summary\n");
    out.push_str(&format!(
        "- Documents analyzed: {} ({} failed)\n",
        reports.len(),
        failed_documents.len()
    ));
    out.push_str(&format!(
        "- Findings across all documents: {high} high / {medium} medium / {low} low\n"
    ));
    out.push_str(&format!(
        "- Processing time: {:.1}s\n",
        duration_ms as f64 / 1000.0
    ));

    for report in reports {
        out.push_str(&format!("\n--- {} ---\n", report.filename));
        out.push_str(&render_report(report));
    }

    if !failed_documents.is_empty() {
        out.push_str("\nDocuments that could not be analyzed\n");
        for (filename, reason) in failed_documents {
            out.push_str(&format!("- {filename}: {reason}\n"));
        }
    }

    out
}

/// Char-boundary-safe excerpt with ellipsis.
fn excerpt(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut cut = max;
    while cut > 0 && !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}...", &text[..cut])
}
