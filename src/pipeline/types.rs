//! Core types for the multi-document analysis pipeline.
//!
//! These types model the full lifecycle:
//! Upload → Chunks → Chunk Outcomes → Cross-References → Report → Snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ═══════════════════════════════════════════
// Severity
// ═══════════════════════════════════════════

/// Risk severity of a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    High,
    Medium,
    Low,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "high" => Some(Self::High),
            "medium" => Some(Self::Medium),
            "low" => Some(Self::Low),
            _ => None,
        }
    }

    /// Sort rank, high first.
    pub fn rank(&self) -> u8 {
        match self {
            Self::High => 0,
            Self::Medium => 1,
            Self::Low => 2,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ═══════════════════════════════════════════
// Finding ("red flag")
// ═══════════════════════════════════════════

/// A single identified risk with evidence and provenance.
///
/// `evidence` is always a verbatim excerpt of the source document and
/// `evidence_start..evidence_end` are its byte offsets in the parent text,
/// so duplicates created by overlapping chunk windows can be identified by
/// span overlap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub id: Uuid,
    pub severity: Severity,
    pub category: String,
    pub description: String,
    pub evidence: String,
    pub evidence_start: usize,
    pub evidence_end: usize,
    /// Page range / section context for display.
    pub location: String,
    pub confidence: f32,
    /// Chunks this finding was observed in (merged when duplicates collapse).
    pub chunk_ids: Vec<Uuid>,
    /// Cross-reference links to related findings.
    #[serde(default)]
    pub related: Vec<Uuid>,
}

impl Finding {
    /// Length of the evidence span in bytes.
    pub fn span_len(&self) -> usize {
        self.evidence_end.saturating_sub(self.evidence_start)
    }
}

// ═══════════════════════════════════════════
// Chunk
// ═══════════════════════════════════════════

/// Per-chunk runtime status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStatus {
    Idle,
    Processing,
    Completed,
    Error,
}

impl ChunkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

/// A bounded slice of a document's text, analyzed as an independent unit.
///
/// Chunks are views: `start..end` are byte offsets into the parent text and
/// the chunk never carries its own copy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: Uuid,
    pub index: usize,
    pub start: usize,
    pub end: usize,
    /// Estimated page range, e.g. "3-5".
    pub page_range: String,
    /// Nearest preceding section heading, when one exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    /// Words shared with the preceding chunk.
    pub overlap_words: usize,
    /// True when no structural marker was found and the split was forced.
    pub hard_split: bool,
}

impl Chunk {
    /// The chunk's view into its parent text.
    pub fn slice<'a>(&self, text: &'a str) -> &'a str {
        &text[self.start..self.end]
    }
}

/// Mutable runtime state tracked per chunk for status snapshots.
#[derive(Debug, Clone)]
pub struct ChunkRuntime {
    pub status: ChunkStatus,
    pub findings_count: usize,
    pub confidence: f32,
    pub duration_ms: u64,
    pub failure: Option<String>,
}

impl ChunkRuntime {
    pub fn idle() -> Self {
        Self {
            status: ChunkStatus::Idle,
            findings_count: 0,
            confidence: 0.0,
            duration_ms: 0,
            failure: None,
        }
    }
}

/// Tagged per-task result collected at the join barrier.
///
/// A chunk task always resolves to one of these — an individual failure is
/// captured here instead of propagating to sibling tasks.
#[derive(Debug, Clone)]
pub enum ChunkOutcome {
    Analyzed {
        chunk_index: usize,
        chunk_id: Uuid,
        findings: Vec<Finding>,
        confidence: f32,
        duration_ms: u64,
    },
    Failed {
        chunk_index: usize,
        chunk_id: Uuid,
        reason: String,
        duration_ms: u64,
    },
}

impl ChunkOutcome {
    pub fn chunk_index(&self) -> usize {
        match self {
            Self::Analyzed { chunk_index, .. } | Self::Failed { chunk_index, .. } => *chunk_index,
        }
    }
}

// ═══════════════════════════════════════════
// Document lifecycle
// ═══════════════════════════════════════════

/// Pipeline stage of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStage {
    Created,
    Extracting,
    Chunking,
    Analyzing,
    CrossReferencing,
    Combining,
    Completed,
    Failed,
}

impl DocumentStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Extracting => "extracting",
            Self::Chunking => "chunking",
            Self::Analyzing => "analyzing",
            Self::CrossReferencing => "cross_referencing",
            Self::Combining => "combining",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Coarse client-facing status derived from the stage.
    pub fn status(&self) -> DocumentStatus {
        match self {
            Self::Created => DocumentStatus::Pending,
            Self::Extracting => DocumentStatus::Uploading,
            Self::Chunking | Self::Analyzing | Self::CrossReferencing | Self::Combining => {
                DocumentStatus::Analyzing
            }
            Self::Completed => DocumentStatus::Completed,
            Self::Failed => DocumentStatus::Failed,
        }
    }
}

/// Coarse document status exposed to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Pending,
    Uploading,
    Analyzing,
    Completed,
    Failed,
}

/// Progress percentage for a document, derived from stage and chunk state.
pub fn document_progress(stage: DocumentStage, chunks_terminal: usize, chunks_total: usize) -> f32 {
    match stage {
        DocumentStage::Created => 0.0,
        DocumentStage::Extracting => 5.0,
        DocumentStage::Chunking => 15.0,
        DocumentStage::Analyzing => {
            if chunks_total == 0 {
                20.0
            } else {
                20.0 + 70.0 * (chunks_terminal as f32 / chunks_total as f32)
            }
        }
        DocumentStage::CrossReferencing => 92.0,
        DocumentStage::Combining => 97.0,
        DocumentStage::Completed | DocumentStage::Failed => 100.0,
    }
}

// ═══════════════════════════════════════════
// Batch lifecycle
// ═══════════════════════════════════════════

/// Overall status of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Pending,
    Running,
    Completed,
    FailedPartial,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::FailedPartial => "failed_partial",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::FailedPartial)
    }
}

/// One uploaded document as accepted at submission.
#[derive(Debug, Clone)]
pub struct DocumentUpload {
    pub filename: String,
    pub declared_type: String,
    pub content: Vec<u8>,
}

// ═══════════════════════════════════════════
// Report
// ═══════════════════════════════════════════

/// A document range that could not be analyzed, surfaced explicitly in the
/// report instead of being silently omitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnanalyzedRange {
    pub chunk_index: usize,
    pub page_range: String,
    pub reason: String,
}

/// Aggregate counters for a document report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub chunks_total: usize,
    pub chunks_failed: usize,
    pub high_count: usize,
    pub medium_count: usize,
    pub low_count: usize,
    pub cross_reference_links: usize,
    pub average_confidence: f32,
    /// Set when some chunks failed and validation ran on partial data.
    pub reduced_confidence: bool,
    pub duration_ms: u64,
}

/// The final merged report for one document. Written exactly once, by the
/// result combiner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentReport {
    pub document_id: Uuid,
    pub filename: String,
    pub findings: Vec<Finding>,
    pub unanalyzed: Vec<UnanalyzedRange>,
    pub summary: ReportSummary,
    pub generated_at: DateTime<Utc>,
}

// ═══════════════════════════════════════════
// Snapshots (read-only status views)
// ═══════════════════════════════════════════

/// Point-in-time view of one chunk, safe to serve at any poll rate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkSnapshot {
    pub chunk_id: Uuid,
    pub chunk_index: usize,
    pub page_range: String,
    pub status: ChunkStatus,
    pub findings_count: usize,
    pub confidence: f32,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

/// Point-in-time view of one document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentSnapshot {
    pub document_id: Uuid,
    pub filename: String,
    pub stage: DocumentStage,
    pub status: DocumentStatus,
    pub progress: f32,
    pub chunks: Vec<ChunkSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

/// Point-in-time view of a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSnapshot {
    pub batch_id: Uuid,
    pub status: BatchStatus,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub total_documents: usize,
    pub completed_count: usize,
    pub failed_count: usize,
    pub progress: f32,
    pub documents: Vec<DocumentSnapshot>,
}

/// Per-document entry in the final results payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentResult {
    pub document_id: Uuid,
    pub filename: String,
    pub status: DocumentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<DocumentReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

/// Final results for a terminal batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResults {
    pub batch_id: Uuid,
    pub status: BatchStatus,
    pub total_documents: usize,
    pub completed_count: usize,
    pub failed_count: usize,
    pub duration_ms: u64,
    pub documents: Vec<DocumentResult>,
    /// Combined report across all completed documents.
    pub unified_report: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_roundtrip() {
        for severity in [Severity::High, Severity::Medium, Severity::Low] {
            assert_eq!(Severity::from_str(severity.as_str()), Some(severity));
        }
    }

    #[test]
    fn severity_parse_is_case_insensitive() {
        assert_eq!(Severity::from_str("HIGH"), Some(Severity::High));
        assert_eq!(Severity::from_str(" Medium "), Some(Severity::Medium));
        assert_eq!(Severity::from_str("critical"), None);
    }

    #[test]
    fn severity_rank_orders_high_first() {
        assert!(Severity::High.rank() < Severity::Medium.rank());
        assert!(Severity::Medium.rank() < Severity::Low.rank());
    }

    #[test]
    fn severity_serde_snake_case() {
        let json = serde_json::to_string(&Severity::High).unwrap();
        assert_eq!(json, "\"high\"");
    }

    #[test]
    fn chunk_slice_is_a_view() {
        let text = "0123456789";
        let chunk = Chunk {
            id: Uuid::new_v4(),
            index: 0,
            start: 2,
            end: 7,
            page_range: "1-1".into(),
            section: None,
            overlap_words: 0,
            hard_split: false,
        };
        assert_eq!(chunk.slice(text), "23456");
    }

    #[test]
    fn stage_status_mapping() {
        assert_eq!(DocumentStage::Created.status(), DocumentStatus::Pending);
        assert_eq!(DocumentStage::Extracting.status(), DocumentStatus::Uploading);
        assert_eq!(DocumentStage::Analyzing.status(), DocumentStatus::Analyzing);
        assert_eq!(
            DocumentStage::CrossReferencing.status(),
            DocumentStatus::Analyzing
        );
        assert_eq!(DocumentStage::Completed.status(), DocumentStatus::Completed);
        assert_eq!(DocumentStage::Failed.status(), DocumentStatus::Failed);
    }

    #[test]
    fn terminal_stages() {
        assert!(DocumentStage::Completed.is_terminal());
        assert!(DocumentStage::Failed.is_terminal());
        assert!(!DocumentStage::Analyzing.is_terminal());
    }

    #[test]
    fn progress_increases_through_stages() {
        let early = document_progress(DocumentStage::Chunking, 0, 0);
        let mid = document_progress(DocumentStage::Analyzing, 2, 4);
        let late = document_progress(DocumentStage::Combining, 4, 4);
        assert!(early < mid);
        assert!(mid < late);
        assert_eq!(document_progress(DocumentStage::Completed, 4, 4), 100.0);
    }

    #[test]
    fn progress_scales_with_terminal_chunks() {
        let none = document_progress(DocumentStage::Analyzing, 0, 8);
        let half = document_progress(DocumentStage::Analyzing, 4, 8);
        let all = document_progress(DocumentStage::Analyzing, 8, 8);
        assert!(none < half && half < all);
        assert!((all - 90.0).abs() < 0.01);
    }

    #[test]
    fn batch_status_terminal() {
        assert!(BatchStatus::Completed.is_terminal());
        assert!(BatchStatus::FailedPartial.is_terminal());
        assert!(!BatchStatus::Running.is_terminal());
        assert!(!BatchStatus::Pending.is_terminal());
    }

    #[test]
    fn finding_span_len() {
        let finding = Finding {
            id: Uuid::new_v4(),
            severity: Severity::High,
            category: "liability".into(),
            description: "test".into(),
            evidence: "evidence".into(),
            evidence_start: 100,
            evidence_end: 150,
            location: "1-1".into(),
            confidence: 0.9,
            chunk_ids: vec![],
            related: vec![],
        };
        assert_eq!(finding.span_len(), 50);
    }
}
