//! Shared activity log — the append-only record of every pipeline decision.
//!
//! Every component writes one entry per state transition; a polling status
//! endpoint reads snapshots. The log is bounded (oldest entries evicted) so
//! long-running batches cannot grow it without limit, and batch-level
//! milestone entries survive eviction so a late poller still sees the
//! submit/completion markers.
//!
//! Writers never block readers beyond the short critical section of the
//! `RwLock`; no entry is mutated after it is recorded.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Milestone entries kept beyond the bounded window.
const MILESTONE_CAPACITY: usize = 64;

/// Coarse status carried by an activity entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityStatus {
    Processing,
    Completed,
    Error,
}

impl ActivityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }
}

/// Display level for an activity entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// One append-only record of a pipeline transition or decision.
///
/// `message` is display-ready for direct rendering by a polling client;
/// internal error text never lands here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentActivity {
    /// Monotonic sequence number, assigned at record time.
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    /// Stage name, e.g. "Chunk Analyzer" or "Batch Scheduler".
    pub stage: String,
    pub status: ActivityStatus,
    pub level: ActivityLevel,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_id: Option<Uuid>,
    /// Milestones survive window eviction (batch submit/completion).
    #[serde(default)]
    pub milestone: bool,
}

impl AgentActivity {
    pub fn new(stage: &str, status: ActivityStatus, message: impl Into<String>) -> Self {
        let level = match status {
            ActivityStatus::Processing => ActivityLevel::Info,
            ActivityStatus::Completed => ActivityLevel::Success,
            ActivityStatus::Error => ActivityLevel::Error,
        };
        Self {
            seq: 0,
            timestamp: Utc::now(),
            stage: stage.to_string(),
            status,
            level,
            message: message.into(),
            progress: None,
            batch_id: None,
            document_id: None,
            chunk_id: None,
            milestone: false,
        }
    }

    pub fn with_level(mut self, level: ActivityLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_progress(mut self, progress: f32) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_batch(mut self, batch_id: Uuid) -> Self {
        self.batch_id = Some(batch_id);
        self
    }

    pub fn with_document(mut self, document_id: Uuid) -> Self {
        self.document_id = Some(document_id);
        self
    }

    pub fn with_chunk(mut self, chunk_id: Uuid) -> Self {
        self.chunk_id = Some(chunk_id);
        self
    }

    pub fn milestone(mut self) -> Self {
        self.milestone = true;
        self
    }
}

struct LogWindow {
    entries: VecDeque<AgentActivity>,
    milestones: VecDeque<AgentActivity>,
}

/// Bounded, append-only activity log shared by all pipelines.
pub struct ActivityLog {
    window: RwLock<LogWindow>,
    capacity: usize,
    next_seq: AtomicU64,
}

impl ActivityLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            window: RwLock::new(LogWindow {
                entries: VecDeque::with_capacity(capacity.min(1024)),
                milestones: VecDeque::new(),
            }),
            capacity: capacity.max(1),
            next_seq: AtomicU64::new(1),
        }
    }

    /// Append an entry, evicting the oldest once capacity is reached.
    pub fn record(&self, mut activity: AgentActivity) {
        activity.seq = self.next_seq.fetch_add(1, Ordering::Relaxed);

        let mut window = self.window.write().unwrap_or_else(|e| e.into_inner());
        if activity.milestone {
            if window.milestones.len() >= MILESTONE_CAPACITY {
                window.milestones.pop_front();
            }
            window.milestones.push_back(activity.clone());
        }
        if window.entries.len() >= self.capacity {
            window.entries.pop_front();
        }
        window.entries.push_back(activity);
    }

    /// Most recent entries, newest first, optionally filtered to one batch.
    ///
    /// Milestone entries that already scrolled out of the bounded window are
    /// merged back in so pollers never lose the batch markers.
    pub fn recent(&self, limit: usize, batch_id: Option<Uuid>) -> Vec<AgentActivity> {
        let window = self.window.read().unwrap_or_else(|e| e.into_inner());

        let matches = |a: &AgentActivity| batch_id.is_none() || a.batch_id == batch_id;

        let mut result: Vec<AgentActivity> = window
            .entries
            .iter()
            .rev()
            .filter(|a| matches(a))
            .take(limit)
            .cloned()
            .collect();

        let present: std::collections::HashSet<u64> = result.iter().map(|a| a.seq).collect();
        for milestone in window.milestones.iter().rev() {
            if matches(milestone) && !present.contains(&milestone.seq) {
                result.push(milestone.clone());
            }
        }
        result.sort_by(|a, b| b.seq.cmp(&a.seq));
        result
    }

    /// Number of entries currently in the bounded window.
    pub fn len(&self) -> usize {
        let window = self.window.read().unwrap_or_else(|e| e.into_inner());
        window.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(message: &str) -> AgentActivity {
        AgentActivity::new("Test Stage", ActivityStatus::Processing, message)
    }

    #[test]
    fn records_and_returns_newest_first() {
        let log = ActivityLog::new(10);
        log.record(entry("first"));
        log.record(entry("second"));
        log.record(entry("third"));

        let recent = log.recent(10, None);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].message, "third");
        assert_eq!(recent[2].message, "first");
    }

    #[test]
    fn evicts_oldest_at_capacity() {
        let log = ActivityLog::new(3);
        for i in 0..5 {
            log.record(entry(&format!("entry {i}")));
        }
        assert_eq!(log.len(), 3);

        let recent = log.recent(10, None);
        assert_eq!(recent[0].message, "entry 4");
        assert_eq!(recent[2].message, "entry 2");
    }

    #[test]
    fn limit_caps_result_size() {
        let log = ActivityLog::new(10);
        for i in 0..8 {
            log.record(entry(&format!("entry {i}")));
        }
        assert_eq!(log.recent(3, None).len(), 3);
    }

    #[test]
    fn filters_by_batch() {
        let log = ActivityLog::new(10);
        let batch_a = Uuid::new_v4();
        let batch_b = Uuid::new_v4();
        log.record(entry("a1").with_batch(batch_a));
        log.record(entry("b1").with_batch(batch_b));
        log.record(entry("a2").with_batch(batch_a));

        let only_a = log.recent(10, Some(batch_a));
        assert_eq!(only_a.len(), 2);
        assert!(only_a.iter().all(|e| e.batch_id == Some(batch_a)));
    }

    #[test]
    fn milestones_survive_eviction() {
        let log = ActivityLog::new(3);
        log.record(entry("batch submitted").milestone());
        for i in 0..6 {
            log.record(entry(&format!("chunk {i}")));
        }

        let recent = log.recent(10, None);
        assert!(
            recent.iter().any(|e| e.message == "batch submitted"),
            "milestone should be merged back after eviction"
        );
    }

    #[test]
    fn batch_milestones_survive_when_window_holds_other_batches() {
        let log = ActivityLog::new(3);
        let old_batch = Uuid::new_v4();
        log.record(entry("old batch submitted").with_batch(old_batch).milestone());
        for i in 0..5 {
            log.record(entry(&format!("other {i}")).with_batch(Uuid::new_v4()));
        }

        let recent = log.recent(10, Some(old_batch));
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].message, "old batch submitted");
    }

    #[test]
    fn seq_is_monotonic() {
        let log = ActivityLog::new(10);
        log.record(entry("a"));
        log.record(entry("b"));
        let recent = log.recent(10, None);
        assert!(recent[0].seq > recent[1].seq);
    }

    #[test]
    fn entries_are_never_mutated() {
        let log = ActivityLog::new(10);
        log.record(entry("stable"));
        let first = log.recent(1, None)[0].clone();
        log.record(entry("later"));
        let again = log
            .recent(10, None)
            .into_iter()
            .find(|e| e.message == "stable")
            .unwrap();
        assert_eq!(first.seq, again.seq);
        assert_eq!(first.timestamp, again.timestamp);
    }
}
