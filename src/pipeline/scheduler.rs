//! Batch scheduler — accepts document batches, bounds pipeline concurrency,
//! and serves status/result queries.
//!
//! `submit` validates the batch synchronously (count, per-document size,
//! declared type) and rejects over-limit batches with a descriptive error
//! before any pipeline exists. Accepted batches run as a background driver
//! task: one document pipeline per document, gated by a semaphore sized to
//! `max_concurrent_documents`, under a wall-clock budget. On budget expiry
//! every non-terminal document is force-failed with reason "timeout" and
//! in-flight tasks are aborted; late results are discarded by the guarded
//! state writes in the document pipeline.
//!
//! `status` and `results` read snapshots out of the shared state and never
//! wait on in-flight work. Terminal batches are evicted after a retention
//! window or an explicit clear.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::config::{AnalysisConfig, BatchOverrides};
use crate::monitor::{ActivityLevel, ActivityStatus, ActivityLog, AgentActivity};

use super::analysis::ChunkAnalyzer;
use super::combiner;
use super::document::{self, DocumentRecord, STAGE_SCHEDULER};
use super::error::SubmitError;
use super::extract::{is_supported_type, TextExtractor};
use super::types::{
    BatchResults, BatchSnapshot, BatchStatus, ChunkSnapshot, DocumentResult, DocumentSnapshot,
    DocumentStage, DocumentUpload,
};

/// Default analysis instructions when the client supplies none.
const DEFAULT_INSTRUCTIONS: &str =
    "Identify red flags: provisions that create legal, financial or operational risk.";

/// Shared state of one accepted batch.
pub(crate) struct BatchEntry {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    /// Effective config (defaults + per-batch overrides).
    pub config: AnalysisConfig,
    pub instructions: String,
    pub state: RwLock<BatchState>,
}

pub(crate) struct BatchState {
    pub status: BatchStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub documents: Vec<DocumentRecord>,
}

/// Collaborators handed to every pipeline task.
#[derive(Clone)]
pub(crate) struct PipelineDeps {
    pub analyzer: Arc<ChunkAnalyzer>,
    pub extractor: Arc<dyn TextExtractor>,
    pub activity: Arc<ActivityLog>,
}

/// Why results are not available.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResultsError {
    #[error("Batch not found")]
    NotFound,

    #[error("Batch is not finished: {completed} completed, {failed} failed of {total} documents")]
    NotReady {
        completed: usize,
        failed: usize,
        total: usize,
    },
}

/// Accepts batches and serves status/result queries over them.
pub struct BatchScheduler {
    config: AnalysisConfig,
    analyzer: Arc<ChunkAnalyzer>,
    extractor: Arc<dyn TextExtractor>,
    activity: Arc<ActivityLog>,
    batches: RwLock<HashMap<Uuid, Arc<BatchEntry>>>,
}

impl BatchScheduler {
    pub fn new(
        config: AnalysisConfig,
        analyzer: Arc<ChunkAnalyzer>,
        extractor: Arc<dyn TextExtractor>,
    ) -> Self {
        let activity = Arc::new(ActivityLog::new(config.activity_log_capacity));
        Self {
            config,
            analyzer,
            extractor,
            activity,
            batches: RwLock::new(HashMap::new()),
        }
    }

    /// The shared activity log, for the polling endpoint.
    pub fn activity(&self) -> Arc<ActivityLog> {
        self.activity.clone()
    }

    /// Number of batches currently held (running or awaiting eviction).
    pub fn active_batches(&self) -> usize {
        self.batches
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Validate and accept a batch, spawning its driver task.
    ///
    /// Rejections happen synchronously, before any pipeline is created. Must
    /// be called from within a tokio runtime.
    pub fn submit(
        &self,
        uploads: Vec<DocumentUpload>,
        instructions: Option<String>,
        overrides: Option<BatchOverrides>,
    ) -> Result<Uuid, SubmitError> {
        self.evict_expired();

        let config = match overrides {
            Some(overrides) => self.config.with_overrides(&overrides)?,
            None => self.config.clone(),
        };

        if uploads.is_empty() {
            return Err(SubmitError::EmptyBatch);
        }
        if uploads.len() > config.max_documents_per_batch {
            return Err(SubmitError::TooManyDocuments {
                count: uploads.len(),
                max: config.max_documents_per_batch,
            });
        }
        for upload in &uploads {
            if upload.content.len() > config.max_document_bytes {
                return Err(SubmitError::FileTooLarge {
                    filename: upload.filename.clone(),
                    bytes: upload.content.len(),
                    max: config.max_document_bytes,
                });
            }
            if !is_supported_type(&upload.declared_type) {
                return Err(SubmitError::UnsupportedType {
                    filename: upload.filename.clone(),
                    declared_type: upload.declared_type.clone(),
                });
            }
        }

        let documents: Vec<DocumentRecord> =
            uploads.into_iter().map(DocumentRecord::new).collect();
        let document_count = documents.len();

        let entry = Arc::new(BatchEntry {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            config,
            instructions: instructions
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_INSTRUCTIONS.to_string()),
            state: RwLock::new(BatchState {
                status: BatchStatus::Pending,
                started_at: None,
                completed_at: None,
                documents,
            }),
        });
        let batch_id = entry.id;

        self.batches
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(batch_id, entry.clone());

        self.activity.record(
            AgentActivity::new(
                STAGE_SCHEDULER,
                ActivityStatus::Processing,
                format!(
                    "Accepted batch {} with {document_count} document(s)",
                    short_id(batch_id)
                ),
            )
            .with_batch(batch_id)
            .milestone(),
        );
        tracing::info!(
            batch_id = %batch_id,
            documents = document_count,
            max_concurrent = entry.config.max_concurrent_documents,
            "Batch accepted"
        );

        let deps = PipelineDeps {
            analyzer: self.analyzer.clone(),
            extractor: self.extractor.clone(),
            activity: self.activity.clone(),
        };
        tokio::spawn(run_batch(entry, deps));

        Ok(batch_id)
    }

    /// Current snapshot of a batch. Reads state, never waits.
    pub fn status(&self, batch_id: Uuid) -> Option<BatchSnapshot> {
        let entry = self
            .batches
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&batch_id)
            .cloned()?;

        let state = entry.state.read().unwrap_or_else(|e| e.into_inner());
        let documents: Vec<DocumentSnapshot> = state
            .documents
            .iter()
            .map(|doc| DocumentSnapshot {
                document_id: doc.id,
                filename: doc.filename.clone(),
                stage: doc.stage,
                status: doc.stage.status(),
                progress: doc.progress(),
                chunks: doc
                    .chunks
                    .iter()
                    .zip(&doc.chunk_states)
                    .map(|(chunk, runtime)| ChunkSnapshot {
                        chunk_id: chunk.id,
                        chunk_index: chunk.index,
                        page_range: chunk.page_range.clone(),
                        status: runtime.status,
                        findings_count: runtime.findings_count,
                        confidence: runtime.confidence,
                        duration_ms: runtime.duration_ms,
                        failure: runtime.failure.clone(),
                    })
                    .collect(),
                failure: doc.failure.clone(),
            })
            .collect();

        let total = documents.len();
        let progress = if total == 0 {
            0.0
        } else {
            documents.iter().map(|d| d.progress).sum::<f32>() / total as f32
        };

        Some(BatchSnapshot {
            batch_id,
            status: state.status,
            created_at: entry.created_at,
            started_at: state.started_at,
            completed_at: state.completed_at,
            total_documents: total,
            completed_count: count_stage(&state, DocumentStage::Completed),
            failed_count: count_stage(&state, DocumentStage::Failed),
            progress,
            documents,
        })
    }

    /// Final reports, available only once the batch is terminal. Never
    /// returns partial data.
    pub fn results(&self, batch_id: Uuid) -> Result<BatchResults, ResultsError> {
        let entry = self
            .batches
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&batch_id)
            .cloned()
            .ok_or(ResultsError::NotFound)?;

        let state = entry.state.read().unwrap_or_else(|e| e.into_inner());
        let total = state.documents.len();
        let completed = count_stage(&state, DocumentStage::Completed);
        let failed = count_stage(&state, DocumentStage::Failed);

        if !state.status.is_terminal() {
            return Err(ResultsError::NotReady {
                completed,
                failed,
                total,
            });
        }

        let documents: Vec<DocumentResult> = state
            .documents
            .iter()
            .map(|doc| DocumentResult {
                document_id: doc.id,
                filename: doc.filename.clone(),
                status: doc.stage.status(),
                report: doc.report.clone(),
                failure: doc.failure.clone(),
            })
            .collect();

        let reports: Vec<&super::types::DocumentReport> = state
            .documents
            .iter()
            .filter_map(|doc| doc.report.as_ref())
            .collect();
        let failures: Vec<(String, String)> = state
            .documents
            .iter()
            .filter(|doc| doc.stage == DocumentStage::Failed)
            .map(|doc| {
                (
                    doc.filename.clone(),
                    doc.failure.clone().unwrap_or_else(|| "unknown".into()),
                )
            })
            .collect();

        let duration_ms = match (state.started_at, state.completed_at) {
            (Some(start), Some(end)) => (end - start).num_milliseconds().max(0) as u64,
            _ => 0,
        };

        Ok(BatchResults {
            batch_id,
            status: state.status,
            total_documents: total,
            completed_count: completed,
            failed_count: failed,
            duration_ms,
            documents,
            unified_report: combiner::render_unified_report(&reports, &failures, duration_ms),
        })
    }

    /// Explicitly remove a batch. Returns false when it was not held.
    pub fn clear(&self, batch_id: Uuid) -> bool {
        let removed = self
            .batches
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&batch_id)
            .is_some();
        if removed {
            tracing::info!(batch_id = %batch_id, "Batch cleared");
        }
        removed
    }

    /// Drop terminal batches past the retention window. Runs inline on
    /// submit; cheap enough that no background sweeper is needed.
    fn evict_expired(&self) {
        let retention = self.config.batch_retention_secs as i64;
        let now = Utc::now();
        let mut batches = self.batches.write().unwrap_or_else(|e| e.into_inner());
        batches.retain(|_, entry| {
            let state = entry.state.read().unwrap_or_else(|e| e.into_inner());
            match (state.status.is_terminal(), state.completed_at) {
                (true, Some(completed_at)) => (now - completed_at).num_seconds() < retention,
                _ => true,
            }
        });
    }
}

fn count_stage(state: &BatchState, stage: DocumentStage) -> usize {
    state.documents.iter().filter(|d| d.stage == stage).count()
}

fn short_id(id: Uuid) -> String {
    id.to_string().chars().take(8).collect()
}

/// Drive one batch: fan out document pipelines under the concurrency bound
/// and the wall-clock budget, then settle the terminal batch status.
async fn run_batch(entry: Arc<BatchEntry>, deps: PipelineDeps) {
    let started = Instant::now();
    let document_count = {
        let mut state = entry.state.write().unwrap_or_else(|e| e.into_inner());
        state.status = BatchStatus::Running;
        state.started_at = Some(Utc::now());
        state.documents.len()
    };

    deps.activity.record(
        AgentActivity::new(
            STAGE_SCHEDULER,
            ActivityStatus::Processing,
            format!(
                "Starting analysis of {document_count} document(s), up to {} in parallel",
                entry.config.max_concurrent_documents
            ),
        )
        .with_batch(entry.id),
    );

    let semaphore = Arc::new(Semaphore::new(entry.config.max_concurrent_documents));
    let mut handles = Vec::with_capacity(document_count);
    for doc_index in 0..document_count {
        handles.push(tokio::spawn(document::run_document(
            entry.clone(),
            doc_index,
            deps.clone(),
            semaphore.clone(),
        )));
    }

    let budget = Duration::from_secs(entry.config.batch_timeout_secs);
    let all_done = async {
        for handle in &mut handles {
            let _ = handle.await;
        }
    };
    if tokio::time::timeout(budget, all_done).await.is_err() {
        tracing::warn!(
            batch_id = %entry.id,
            budget_secs = entry.config.batch_timeout_secs,
            "Batch exceeded its processing budget"
        );
        for handle in &handles {
            handle.abort();
        }
        mark_timed_out(&entry, &deps);
    }

    finalize(&entry, &deps, started.elapsed());
}

/// Force-fail every non-terminal document with reason "timeout". In-flight
/// chunk work was aborted; anything that still lands is discarded by the
/// guarded writes.
fn mark_timed_out(entry: &BatchEntry, deps: &PipelineDeps) {
    let mut failed: Vec<(Uuid, String)> = Vec::new();
    {
        let mut state = entry.state.write().unwrap_or_else(|e| e.into_inner());
        for doc in &mut state.documents {
            if doc.stage.is_terminal() {
                continue;
            }
            doc.stage = DocumentStage::Failed;
            doc.failure = Some("timeout".into());
            doc.completed_at = Some(Utc::now());
            for chunk in &mut doc.chunk_states {
                if !chunk.status.is_terminal() {
                    chunk.status = super::types::ChunkStatus::Error;
                    chunk.failure = Some("timeout".into());
                }
            }
            failed.push((doc.id, doc.filename.clone()));
        }
    }

    for (doc_id, filename) in failed {
        deps.activity.record(
            AgentActivity::new(
                STAGE_SCHEDULER,
                ActivityStatus::Error,
                format!("Analysis of {filename} stopped: batch processing budget exceeded"),
            )
            .with_batch(entry.id)
            .with_document(doc_id),
        );
    }
}

fn finalize(entry: &BatchEntry, deps: &PipelineDeps, elapsed: Duration) {
    let (completed, failed, total, status) = {
        let mut state = entry.state.write().unwrap_or_else(|e| e.into_inner());
        let completed = count_stage(&state, DocumentStage::Completed);
        let failed = count_stage(&state, DocumentStage::Failed);
        let status = if failed > 0 {
            BatchStatus::FailedPartial
        } else {
            BatchStatus::Completed
        };
        state.status = status;
        state.completed_at = Some(Utc::now());
        (completed, failed, state.documents.len(), status)
    };

    deps.activity.record(
        AgentActivity::new(
            STAGE_SCHEDULER,
            if failed > 0 {
                ActivityStatus::Error
            } else {
                ActivityStatus::Completed
            },
            format!(
                "Batch {} finished in {:.1}s: {completed} of {total} documents analyzed, {failed} failed",
                short_id(entry.id),
                elapsed.as_secs_f64()
            ),
        )
        .with_level(if failed > 0 {
            ActivityLevel::Warning
        } else {
            ActivityLevel::Success
        })
        .with_batch(entry.id)
        .milestone(),
    );
    tracing::info!(
        batch_id = %entry.id,
        completed,
        failed,
        status = status.as_str(),
        duration_ms = elapsed.as_millis() as u64,
        "Batch finished"
    );
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::pipeline::analysis::{
        AnalysisClient, AnalysisOutcome, AnalysisRequest, HeuristicAnalyzer, RawFinding,
    };
    use crate::pipeline::error::AnalysisFailure;
    use crate::pipeline::extract::PlainTextExtractor;

    fn upload(filename: &str, text: &str) -> DocumentUpload {
        DocumentUpload {
            filename: filename.into(),
            declared_type: "text/plain".into(),
            content: text.as_bytes().to_vec(),
        }
    }

    fn scheduler_with(client: Arc<dyn AnalysisClient>, config: AnalysisConfig) -> BatchScheduler {
        let analyzer = Arc::new(ChunkAnalyzer::new(
            client,
            config.max_retries,
            config.retry_base_delay_ms,
        ));
        BatchScheduler::new(config, analyzer, Arc::new(PlainTextExtractor))
    }

    fn default_scheduler() -> BatchScheduler {
        scheduler_with(Arc::new(HeuristicAnalyzer), AnalysisConfig::default())
    }

    async fn wait_terminal(scheduler: &BatchScheduler, batch_id: Uuid) -> BatchSnapshot {
        for _ in 0..100_000 {
            if let Some(snapshot) = scheduler.status(batch_id) {
                if snapshot.status.is_terminal() {
                    return snapshot;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("batch {batch_id} never reached a terminal state");
    }

    // ── Synchronous validation ─────────────────────────────────

    #[tokio::test]
    async fn twelve_documents_rejected_with_zero_pipelines() {
        let scheduler = default_scheduler();
        let uploads: Vec<DocumentUpload> = (0..12)
            .map(|i| upload(&format!("doc{i}.txt"), "Some contract text."))
            .collect();

        let err = scheduler.submit(uploads, None, None).unwrap_err();
        assert_eq!(err, SubmitError::TooManyDocuments { count: 12, max: 10 });
        assert_eq!(scheduler.active_batches(), 0, "no pipeline may be created");
        assert!(scheduler.activity().is_empty());
    }

    #[tokio::test]
    async fn oversized_document_rejected() {
        let config = AnalysisConfig {
            max_document_bytes: 64,
            ..AnalysisConfig::default()
        };
        let scheduler = scheduler_with(Arc::new(HeuristicAnalyzer), config);
        let big = upload("big.txt", &"x".repeat(100));

        let err = scheduler.submit(vec![big], None, None).unwrap_err();
        assert!(matches!(err, SubmitError::FileTooLarge { bytes: 100, .. }));
        assert_eq!(scheduler.active_batches(), 0);
    }

    #[tokio::test]
    async fn unsupported_type_rejected() {
        let scheduler = default_scheduler();
        let pdf = DocumentUpload {
            filename: "scan.pdf".into(),
            declared_type: "application/pdf".into(),
            content: b"%PDF-1.4".to_vec(),
        };

        let err = scheduler.submit(vec![pdf], None, None).unwrap_err();
        assert!(matches!(err, SubmitError::UnsupportedType { .. }));
        assert_eq!(scheduler.active_batches(), 0);
    }

    #[tokio::test]
    async fn empty_batch_rejected() {
        let scheduler = default_scheduler();
        let err = scheduler.submit(vec![], None, None).unwrap_err();
        assert_eq!(err, SubmitError::EmptyBatch);
    }

    // ── End-to-end completion ──────────────────────────────────

    #[tokio::test]
    async fn batch_completes_and_serves_results() {
        let scheduler = default_scheduler();
        let batch_id = scheduler
            .submit(
                vec![
                    upload("nda.txt", "All services are provided as-is. Customer shall indemnify provider."),
                    upload("msa.txt", "Provider may terminate immediately at any time without notice."),
                ],
                Some("flag risky clauses".into()),
                None,
            )
            .unwrap();

        let snapshot = wait_terminal(&scheduler, batch_id).await;
        assert_eq!(snapshot.status, BatchStatus::Completed);
        assert_eq!(snapshot.completed_count, 2);
        assert_eq!(snapshot.failed_count, 0);
        assert_eq!(snapshot.progress, 100.0);

        let results = scheduler.results(batch_id).unwrap();
        assert_eq!(results.documents.len(), 2);
        assert!(results.documents.iter().all(|d| d.report.is_some()));
        assert!(results.unified_report.contains("nda.txt"));
        assert!(results.unified_report.contains("msa.txt"));
    }

    #[tokio::test]
    async fn results_not_ready_while_running() {
        struct NeverFinishes;
        #[async_trait]
        impl AnalysisClient for NeverFinishes {
            async fn analyze(
                &self,
                _request: AnalysisRequest<'_>,
            ) -> Result<AnalysisOutcome, AnalysisFailure> {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(AnalysisOutcome { findings: vec![], confidence: None })
            }
        }

        let scheduler = scheduler_with(Arc::new(NeverFinishes), AnalysisConfig::default());
        let batch_id = scheduler
            .submit(vec![upload("a.txt", "Some contract text here.")], None, None)
            .unwrap();

        // Status is an immediate snapshot; results must refuse with NotReady.
        tokio::task::yield_now().await;
        let snapshot = scheduler.status(batch_id).expect("snapshot");
        assert!(!snapshot.status.is_terminal());
        assert!(matches!(
            scheduler.results(batch_id),
            Err(ResultsError::NotReady { total: 1, .. })
        ));
    }

    #[tokio::test]
    async fn unknown_batch_is_not_found() {
        let scheduler = default_scheduler();
        assert!(scheduler.status(Uuid::new_v4()).is_none());
        assert_eq!(scheduler.results(Uuid::new_v4()), Err(ResultsError::NotFound));
        assert!(!scheduler.clear(Uuid::new_v4()));
    }

    #[tokio::test]
    async fn failed_document_is_absorbed_and_reported() {
        let scheduler = default_scheduler();
        let bad = DocumentUpload {
            filename: "broken.txt".into(),
            declared_type: "text/plain".into(),
            content: vec![0xFF, 0xFE, 0x00],
        };
        let batch_id = scheduler
            .submit(
                vec![bad, upload("fine.txt", "Liability is unlimited under this agreement.")],
                None,
                None,
            )
            .unwrap();

        let snapshot = wait_terminal(&scheduler, batch_id).await;
        assert_eq!(snapshot.status, BatchStatus::FailedPartial);
        assert_eq!(snapshot.completed_count, 1);
        assert_eq!(snapshot.failed_count, 1);

        let results = scheduler.results(batch_id).unwrap();
        let broken = results
            .documents
            .iter()
            .find(|d| d.filename == "broken.txt")
            .unwrap();
        assert!(broken.report.is_none());
        assert!(broken.failure.is_some());
        assert!(results.unified_report.contains("broken.txt"));
    }

    // ── Concurrency bound ──────────────────────────────────────

    /// Client that tracks how many documents are analyzed at once. Test
    /// documents are single-chunk, so chunk concurrency equals document
    /// concurrency.
    struct GaugeClient {
        current: AtomicUsize,
        max_seen: AtomicUsize,
    }

    #[async_trait]
    impl AnalysisClient for GaugeClient {
        async fn analyze(
            &self,
            _request: AnalysisRequest<'_>,
        ) -> Result<AnalysisOutcome, AnalysisFailure> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_seen.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            Ok(AnalysisOutcome {
                findings: vec![],
                confidence: Some(0.7),
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn concurrency_never_exceeds_configured_bound() {
        let gauge = Arc::new(GaugeClient {
            current: AtomicUsize::new(0),
            max_seen: AtomicUsize::new(0),
        });
        let scheduler = scheduler_with(gauge.clone(), AnalysisConfig::default());

        let uploads: Vec<DocumentUpload> = (0..8)
            .map(|i| upload(&format!("doc{i}.txt"), "Short single-chunk contract text."))
            .collect();
        let batch_id = scheduler
            .submit(
                uploads,
                None,
                Some(BatchOverrides {
                    max_concurrent_documents: Some(5),
                    ..Default::default()
                }),
            )
            .unwrap();

        let snapshot = wait_terminal(&scheduler, batch_id).await;
        assert_eq!(snapshot.completed_count, 8);
        let max_seen = gauge.max_seen.load(Ordering::SeqCst);
        assert!(
            max_seen <= 5,
            "{max_seen} documents ran concurrently, bound is 5"
        );
        assert!(max_seen >= 2, "expected some parallelism, saw {max_seen}");
    }

    // ── Timeout ────────────────────────────────────────────────

    struct StallingClient;

    #[async_trait]
    impl AnalysisClient for StallingClient {
        async fn analyze(
            &self,
            _request: AnalysisRequest<'_>,
        ) -> Result<AnalysisOutcome, AnalysisFailure> {
            tokio::time::sleep(Duration::from_secs(7200)).await;
            Ok(AnalysisOutcome { findings: vec![], confidence: None })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn budget_expiry_force_fails_with_timeout_reason() {
        let scheduler = scheduler_with(Arc::new(StallingClient), AnalysisConfig::default());
        let batch_id = scheduler
            .submit(
                vec![
                    upload("slow1.txt", "Contract text one for analysis."),
                    upload("slow2.txt", "Contract text two for analysis."),
                ],
                None,
                Some(BatchOverrides {
                    batch_timeout_secs: Some(2),
                    ..Default::default()
                }),
            )
            .unwrap();

        let snapshot = wait_terminal(&scheduler, batch_id).await;
        assert_eq!(snapshot.status, BatchStatus::FailedPartial);
        assert_eq!(snapshot.failed_count, 2);
        for doc in &snapshot.documents {
            assert_eq!(doc.stage, DocumentStage::Failed);
            assert_eq!(doc.failure.as_deref(), Some("timeout"));
        }

        let results = scheduler.results(batch_id).unwrap();
        assert!(results
            .documents
            .iter()
            .all(|d| d.failure.as_deref() == Some("timeout")));
    }

    // ── Retention & clear ──────────────────────────────────────

    #[tokio::test]
    async fn clear_removes_batch() {
        let scheduler = default_scheduler();
        let batch_id = scheduler
            .submit(vec![upload("a.txt", "Some text.")], None, None)
            .unwrap();
        wait_terminal(&scheduler, batch_id).await;

        assert!(scheduler.clear(batch_id));
        assert!(scheduler.status(batch_id).is_none());
        assert_eq!(scheduler.results(batch_id), Err(ResultsError::NotFound));
    }

    #[tokio::test]
    async fn terminal_batches_evicted_after_retention() {
        let config = AnalysisConfig {
            batch_retention_secs: 0,
            ..AnalysisConfig::default()
        };
        let scheduler = scheduler_with(Arc::new(HeuristicAnalyzer), config);
        let first = scheduler
            .submit(vec![upload("a.txt", "Some text.")], None, None)
            .unwrap();
        wait_terminal(&scheduler, first).await;

        // Eviction runs on the next submit.
        let _second = scheduler
            .submit(vec![upload("b.txt", "More text.")], None, None)
            .unwrap();
        assert!(
            scheduler.status(first).is_none(),
            "terminal batch past retention must be evicted"
        );
    }

    #[tokio::test]
    async fn running_batches_survive_eviction() {
        let config = AnalysisConfig {
            batch_retention_secs: 0,
            ..AnalysisConfig::default()
        };
        let scheduler = scheduler_with(Arc::new(StallingClient), config);
        let running = scheduler
            .submit(vec![upload("slow.txt", "Some text.")], None, None)
            .unwrap();
        tokio::task::yield_now().await;

        let _other = scheduler
            .submit(vec![upload("b.txt", "More text.")], None, None)
            .unwrap();
        assert!(
            scheduler.status(running).is_some(),
            "non-terminal batches must never be evicted"
        );
    }
}
