//! Per-document pipeline state machine.
//!
//! Sequences extraction → chunking → parallel chunk analysis →
//! cross-reference validation → result combination, appending one activity
//! record at every transition. The analyzing stage fans out one task per
//! chunk into a `JoinSet` and the transition to cross-referencing is a join
//! barrier: every chunk task must reach a terminal per-chunk status (success
//! or error) before validation begins. A chunk failure is captured as a
//! tagged outcome and never aborts its siblings.
//!
//! All writes to the shared batch state are guarded: once a document is
//! terminal (completed, failed, or force-failed by the batch timeout), late
//! results are discarded.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::monitor::{ActivityLevel, ActivityStatus, AgentActivity};

use super::chunker;
use super::combiner;
use super::cross_reference;
use super::error::PipelineError;
use super::scheduler::{BatchEntry, PipelineDeps};
use super::types::{
    document_progress, Chunk, ChunkOutcome, ChunkRuntime, ChunkStatus, DocumentReport,
    DocumentStage, DocumentUpload, Finding, Severity,
};

// Stage names shown in activity entries.
pub const STAGE_SCHEDULER: &str = "Batch Scheduler";
pub const STAGE_PIPELINE: &str = "Document Pipeline";
pub const STAGE_CHUNKER: &str = "Chunker";
pub const STAGE_ANALYZER: &str = "Chunk Analyzer";
pub const STAGE_CROSS_REFERENCE: &str = "Cross-Reference Validator";
pub const STAGE_COMBINER: &str = "Result Combiner";

/// Mutable per-document state, owned by the batch entry and mutated only by
/// this document's pipeline task.
#[derive(Debug)]
pub struct DocumentRecord {
    pub id: Uuid,
    pub filename: String,
    pub declared_type: String,
    /// Raw upload bytes; taken when extraction runs.
    pub content: Vec<u8>,
    /// Extracted text. Chunks are views into this.
    pub text: Option<Arc<str>>,
    pub stage: DocumentStage,
    pub chunks: Vec<Chunk>,
    pub chunk_states: Vec<ChunkRuntime>,
    pub report: Option<DocumentReport>,
    pub failure: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl DocumentRecord {
    pub fn new(upload: DocumentUpload) -> Self {
        Self {
            id: Uuid::new_v4(),
            filename: upload.filename,
            declared_type: upload.declared_type,
            content: upload.content,
            text: None,
            stage: DocumentStage::Created,
            chunks: Vec::new(),
            chunk_states: Vec::new(),
            report: None,
            failure: None,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn progress(&self) -> f32 {
        let terminal = self
            .chunk_states
            .iter()
            .filter(|c| c.status.is_terminal())
            .count();
        document_progress(self.stage, terminal, self.chunk_states.len())
    }
}

/// Run one document through the full pipeline. Holds a concurrency permit
/// for the whole run so at most `max_concurrent_documents` documents are
/// past the queue at once.
pub(crate) async fn run_document(
    entry: Arc<BatchEntry>,
    doc_index: usize,
    deps: PipelineDeps,
    semaphore: Arc<Semaphore>,
) {
    let _permit = match semaphore.acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => return,
    };

    let started = Instant::now();

    // The batch timeout may have force-failed this document while it queued.
    let Some((doc_id, filename, declared_type, content)) = begin(&entry, doc_index) else {
        return;
    };

    deps.activity.record(
        AgentActivity::new(
            STAGE_PIPELINE,
            ActivityStatus::Processing,
            format!("Starting analysis of {filename}"),
        )
        .with_batch(entry.id)
        .with_document(doc_id),
    );

    let config = entry.config.clone();
    let instructions = entry.instructions.clone();

    // Extraction via the external collaborator boundary.
    let text: Arc<str> = match deps.extractor.extract(&filename, &declared_type, &content) {
        Ok(text) => Arc::from(text),
        Err(e) => {
            fail_document(&entry, doc_index, &deps, PipelineError::from(e).plain_reason());
            return;
        }
    };
    drop(content);
    with_doc(&entry, doc_index, |doc| doc.text = Some(text.clone()));

    // Chunking.
    if !transition(&entry, doc_index, DocumentStage::Chunking) {
        return;
    }
    deps.activity.record(
        AgentActivity::new(
            STAGE_CHUNKER,
            ActivityStatus::Processing,
            format!("Splitting {filename} into clause-aware sections"),
        )
        .with_batch(entry.id)
        .with_document(doc_id),
    );

    let chunks = chunker::chunk_text(&text, &config);
    if chunks.is_empty() {
        fail_document(&entry, doc_index, &deps, PipelineError::NoChunks.plain_reason());
        return;
    }

    let hard_splits = chunks.iter().filter(|c| c.hard_split).count();
    if hard_splits > 0 {
        // Degraded quality, not fatal: no structural marker inside the
        // window, so the split landed at the size limit.
        deps.activity.record(
            AgentActivity::new(
                STAGE_CHUNKER,
                ActivityStatus::Processing,
                format!(
                    "{hard_splits} section(s) of {filename} had no clause boundary and were split at the size limit"
                ),
            )
            .with_level(ActivityLevel::Warning)
            .with_batch(entry.id)
            .with_document(doc_id),
        );
    }

    with_doc(&entry, doc_index, |doc| {
        doc.chunks = chunks.clone();
        doc.chunk_states = vec![ChunkRuntime::idle(); chunks.len()];
    });
    deps.activity.record(
        AgentActivity::new(
            STAGE_CHUNKER,
            ActivityStatus::Completed,
            format!(
                "Created {} chunks for {filename} (pages {})",
                chunks.len(),
                chunker::page_range(0, text.len(), config.chars_per_page)
            ),
        )
        .with_batch(entry.id)
        .with_document(doc_id),
    );

    // Fan-out: one task per chunk, all concurrent.
    if !transition(&entry, doc_index, DocumentStage::Analyzing) {
        return;
    }
    let total = chunks.len();
    deps.activity.record(
        AgentActivity::new(
            STAGE_ANALYZER,
            ActivityStatus::Processing,
            format!("Analyzing {total} sections of {filename} concurrently"),
        )
        .with_batch(entry.id)
        .with_document(doc_id),
    );

    let mut tasks: JoinSet<ChunkOutcome> = JoinSet::new();
    for chunk in chunks.iter().cloned() {
        tasks.spawn(run_chunk_task(
            entry.clone(),
            doc_index,
            chunk,
            total,
            text.clone(),
            instructions.clone(),
            deps.clone(),
        ));
    }

    // Join barrier: collect every tagged outcome, success or error, before
    // moving on.
    let mut outcomes: Vec<ChunkOutcome> = Vec::with_capacity(total);
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(outcome) => outcomes.push(outcome),
            Err(e) => tracing::warn!(error = %e, "Chunk task did not run to completion"),
        }
    }
    reconcile_missing_outcomes(&entry, doc_index, &chunks, &mut outcomes);
    outcomes.sort_by_key(|o| o.chunk_index());

    // Batch timeout fired mid-flight: this document is terminal, results
    // are discarded.
    if is_terminal(&entry, doc_index) {
        return;
    }

    // Cross-reference validation over the complete outcome set.
    if !transition(&entry, doc_index, DocumentStage::CrossReferencing) {
        return;
    }
    deps.activity.record(
        AgentActivity::new(
            STAGE_CROSS_REFERENCE,
            ActivityStatus::Processing,
            format!("Checking consistency across {total} sections of {filename}"),
        )
        .with_batch(entry.id)
        .with_document(doc_id),
    );

    let mut findings: Vec<Finding> = outcomes
        .iter()
        .filter_map(|o| match o {
            ChunkOutcome::Analyzed { findings, .. } => Some(findings.clone()),
            ChunkOutcome::Failed { .. } => None,
        })
        .flatten()
        .collect();
    let failed_indices: Vec<usize> = outcomes
        .iter()
        .filter_map(|o| match o {
            ChunkOutcome::Failed { chunk_index, .. } => Some(*chunk_index),
            ChunkOutcome::Analyzed { .. } => None,
        })
        .collect();

    let xref = cross_reference::validate(&text, &chunks, &failed_indices, &mut findings);
    deps.activity.record(
        AgentActivity::new(
            STAGE_CROSS_REFERENCE,
            ActivityStatus::Completed,
            format!(
                "Cross-reference validation of {filename} complete: {} relationships, {} inconsistencies",
                xref.structural_links + xref.term_links,
                xref.inconsistencies
            ),
        )
        .with_level(if xref.inconsistencies > 0 {
            ActivityLevel::Warning
        } else {
            ActivityLevel::Success
        })
        .with_batch(entry.id)
        .with_document(doc_id),
    );

    // Result combination writes the report and the terminal status.
    if !transition(&entry, doc_index, DocumentStage::Combining) {
        return;
    }
    deps.activity.record(
        AgentActivity::new(
            STAGE_COMBINER,
            ActivityStatus::Processing,
            format!("Merging findings for {filename} into a unified report"),
        )
        .with_batch(entry.id)
        .with_document(doc_id),
    );

    let report = combiner::combine(
        doc_id,
        &filename,
        &chunks,
        &outcomes,
        findings,
        &xref,
        config.duplicate_overlap_threshold,
        started.elapsed().as_millis() as u64,
    );
    let summary = report.summary.clone();
    if !complete_document(&entry, doc_index, report) {
        return;
    }

    deps.activity.record(
        AgentActivity::new(
            STAGE_PIPELINE,
            ActivityStatus::Completed,
            format!(
                "Analysis of {filename} complete: {} findings ({} high risk), {} of {} sections analyzed",
                summary.high_count + summary.medium_count + summary.low_count,
                summary.high_count,
                summary.chunks_total - summary.chunks_failed,
                summary.chunks_total
            ),
        )
        .with_batch(entry.id)
        .with_document(doc_id),
    );
}

/// Analyze one chunk as an isolated failure unit, returning a tagged outcome
/// either way.
async fn run_chunk_task(
    entry: Arc<BatchEntry>,
    doc_index: usize,
    chunk: Chunk,
    total: usize,
    text: Arc<str>,
    instructions: String,
    deps: PipelineDeps,
) -> ChunkOutcome {
    let started = Instant::now();
    let position = format!("Chunk {} of {total} (pages {})", chunk.index + 1, chunk.page_range);
    let doc_id = with_doc(&entry, doc_index, |doc| doc.id).unwrap_or_default();

    mark_chunk(&entry, doc_index, chunk.index, |state| {
        state.status = ChunkStatus::Processing;
    });
    deps.activity.record(
        AgentActivity::new(
            STAGE_ANALYZER,
            ActivityStatus::Processing,
            match &chunk.section {
                Some(section) => format!("{position}: analyzing \"{section}\""),
                None => format!("{position}: analyzing"),
            },
        )
        .with_batch(entry.id)
        .with_document(doc_id)
        .with_chunk(chunk.id),
    );

    match deps
        .analyzer
        .analyze(&chunk, chunk.slice(&text), &instructions)
        .await
    {
        Ok(analyzed) => {
            if analyzed.retrieval_degraded {
                deps.activity.record(
                    AgentActivity::new(
                        STAGE_ANALYZER,
                        ActivityStatus::Processing,
                        format!("{position}: legal context retrieval unavailable, analyzed without augmented context"),
                    )
                    .with_level(ActivityLevel::Warning)
                    .with_batch(entry.id)
                    .with_document(doc_id)
                    .with_chunk(chunk.id),
                );
            }

            let duration_ms = started.elapsed().as_millis() as u64;
            mark_chunk(&entry, doc_index, chunk.index, |state| {
                state.status = ChunkStatus::Completed;
                state.findings_count = analyzed.findings.len();
                state.confidence = analyzed.confidence;
                state.duration_ms = duration_ms;
            });

            let top = analyzed.findings.iter().map(|f| f.severity).min_by_key(Severity::rank);
            let message = match top {
                Some(severity) => format!(
                    "{position}: {} findings — {severity} risk detected",
                    analyzed.findings.len()
                ),
                None => format!("{position}: no findings"),
            };
            deps.activity.record(
                AgentActivity::new(STAGE_ANALYZER, ActivityStatus::Completed, message)
                    .with_batch(entry.id)
                    .with_document(doc_id)
                    .with_chunk(chunk.id),
            );

            ChunkOutcome::Analyzed {
                chunk_index: chunk.index,
                chunk_id: chunk.id,
                findings: analyzed.findings,
                confidence: analyzed.confidence,
                duration_ms,
            }
        }
        Err(failure) => {
            let duration_ms = started.elapsed().as_millis() as u64;
            let reason = failure.plain_reason();
            mark_chunk(&entry, doc_index, chunk.index, |state| {
                state.status = ChunkStatus::Error;
                state.duration_ms = duration_ms;
                state.failure = Some(reason.clone());
            });
            deps.activity.record(
                AgentActivity::new(
                    STAGE_ANALYZER,
                    ActivityStatus::Error,
                    format!("{position} could not be analyzed: {reason}"),
                )
                .with_batch(entry.id)
                .with_document(doc_id)
                .with_chunk(chunk.id),
            );

            ChunkOutcome::Failed {
                chunk_index: chunk.index,
                chunk_id: chunk.id,
                reason,
                duration_ms,
            }
        }
    }
}

// ═══════════════════════════════════════════
// Guarded state access
// ═══════════════════════════════════════════

fn with_doc<R>(
    entry: &BatchEntry,
    doc_index: usize,
    f: impl FnOnce(&mut DocumentRecord) -> R,
) -> Option<R> {
    let mut state = entry.state.write().unwrap_or_else(|e| e.into_inner());
    state.documents.get_mut(doc_index).map(f)
}

/// Move a created document into extraction, taking its raw bytes. Returns
/// `None` when the document is already terminal (force-failed while queued).
fn begin(entry: &BatchEntry, doc_index: usize) -> Option<(Uuid, String, String, Vec<u8>)> {
    with_doc(entry, doc_index, |doc| {
        if doc.stage.is_terminal() {
            return None;
        }
        doc.stage = DocumentStage::Extracting;
        doc.started_at = Some(Utc::now());
        Some((
            doc.id,
            doc.filename.clone(),
            doc.declared_type.clone(),
            std::mem::take(&mut doc.content),
        ))
    })
    .flatten()
}

/// Advance the stage unless the document already reached a terminal state.
fn transition(entry: &BatchEntry, doc_index: usize, stage: DocumentStage) -> bool {
    with_doc(entry, doc_index, |doc| {
        if doc.stage.is_terminal() {
            false
        } else {
            doc.stage = stage;
            true
        }
    })
    .unwrap_or(false)
}

fn is_terminal(entry: &BatchEntry, doc_index: usize) -> bool {
    with_doc(entry, doc_index, |doc| doc.stage.is_terminal()).unwrap_or(true)
}

fn mark_chunk(
    entry: &BatchEntry,
    doc_index: usize,
    chunk_index: usize,
    f: impl FnOnce(&mut ChunkRuntime),
) {
    with_doc(entry, doc_index, |doc| {
        if doc.stage.is_terminal() {
            return;
        }
        if let Some(state) = doc.chunk_states.get_mut(chunk_index) {
            f(state);
        }
    });
}

/// Mark a document failed (document-fatal error). The batch continues.
fn fail_document(entry: &BatchEntry, doc_index: usize, deps: &PipelineDeps, reason: String) {
    let recorded = with_doc(entry, doc_index, |doc| {
        if doc.stage.is_terminal() {
            return None;
        }
        doc.stage = DocumentStage::Failed;
        doc.failure = Some(reason.clone());
        doc.completed_at = Some(Utc::now());
        Some((doc.id, doc.filename.clone()))
    })
    .flatten();

    if let Some((doc_id, filename)) = recorded {
        deps.activity.record(
            AgentActivity::new(
                STAGE_PIPELINE,
                ActivityStatus::Error,
                format!("Analysis of {filename} failed: {reason}"),
            )
            .with_batch(entry.id)
            .with_document(doc_id),
        );
    }
}

/// Write the final report and the completed status. Refused once terminal,
/// so late results against a timed-out document are discarded.
fn complete_document(entry: &BatchEntry, doc_index: usize, report: DocumentReport) -> bool {
    with_doc(entry, doc_index, |doc| {
        if doc.stage.is_terminal() {
            return false;
        }
        doc.report = Some(report);
        doc.stage = DocumentStage::Completed;
        doc.completed_at = Some(Utc::now());
        true
    })
    .unwrap_or(false)
}

/// A panicked or aborted chunk task leaves no outcome; record a terminal
/// error for any chunk still without one so the join barrier invariant
/// (every chunk terminal) holds for the stages downstream.
fn reconcile_missing_outcomes(
    entry: &BatchEntry,
    doc_index: usize,
    chunks: &[Chunk],
    outcomes: &mut Vec<ChunkOutcome>,
) {
    for chunk in chunks {
        if outcomes.iter().any(|o| o.chunk_index() == chunk.index) {
            continue;
        }
        let reason = "the analysis task stopped unexpectedly".to_string();
        mark_chunk(entry, doc_index, chunk.index, |state| {
            state.status = ChunkStatus::Error;
            state.failure = Some(reason.clone());
        });
        outcomes.push(ChunkOutcome::Failed {
            chunk_index: chunk.index,
            chunk_id: chunk.id,
            reason,
            duration_ms: 0,
        });
    }
}
