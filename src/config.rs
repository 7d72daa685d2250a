use serde::{Deserialize, Serialize};

use crate::pipeline::error::SubmitError;

/// Application-level constants
pub const APP_NAME: &str = "Lexiscan";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default tracing filter when RUST_LOG is not set.
pub fn default_log_filter() -> &'static str {
    "lexiscan=info,tower_http=warn"
}

/// Tunables for the analysis orchestration core.
///
/// One instance is built at startup; each batch gets an effective copy with
/// any per-batch overrides applied (see [`BatchOverrides`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Maximum documents accepted in a single batch.
    pub max_documents_per_batch: usize,
    /// Maximum size of a single uploaded document in bytes.
    pub max_document_bytes: usize,
    /// How many document pipelines may run at once within a batch.
    pub max_concurrent_documents: usize,
    /// Maximum chunk size in characters before a split is forced.
    pub max_chunk_chars: usize,
    /// Word overlap shared between consecutive chunks.
    pub overlap_words: usize,
    /// Characters per estimated page (used for page-range display).
    pub chars_per_page: usize,
    /// Retries for transient analysis failures before a chunk is marked error.
    pub max_retries: u32,
    /// Base delay for exponential retry backoff.
    pub retry_base_delay_ms: u64,
    /// Per-request timeout for the external analysis collaborator.
    pub analysis_timeout_secs: u64,
    /// Wall-clock budget for a whole batch.
    pub batch_timeout_secs: u64,
    /// Two findings are duplicates when their evidence spans overlap by more
    /// than this fraction of the shorter span.
    pub duplicate_overlap_threshold: f32,
    /// Bounded capacity of the shared activity log.
    pub activity_log_capacity: usize,
    /// Terminal batches are evicted after this many seconds.
    pub batch_retention_secs: u64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            max_documents_per_batch: 10,
            max_document_bytes: 10 * 1024 * 1024,
            max_concurrent_documents: 5,
            max_chunk_chars: 6000,
            overlap_words: 200,
            chars_per_page: 2500,
            max_retries: 2,
            retry_base_delay_ms: 500,
            analysis_timeout_secs: 30,
            batch_timeout_secs: 300,
            duplicate_overlap_threshold: 0.5,
            activity_log_capacity: 500,
            batch_retention_secs: 3600,
        }
    }
}

impl AnalysisConfig {
    /// Build the effective per-batch config from client-supplied overrides.
    pub fn with_overrides(&self, overrides: &BatchOverrides) -> Result<Self, SubmitError> {
        let mut effective = self.clone();

        if let Some(n) = overrides.max_concurrent_documents {
            if n == 0 {
                return Err(SubmitError::InvalidConfig(
                    "max_concurrent_documents must be at least 1".into(),
                ));
            }
            effective.max_concurrent_documents = n;
        }
        if let Some(secs) = overrides.batch_timeout_secs {
            if secs == 0 {
                return Err(SubmitError::InvalidConfig(
                    "batch_timeout_secs must be at least 1".into(),
                ));
            }
            effective.batch_timeout_secs = secs;
        }
        if let Some(t) = overrides.duplicate_overlap_threshold {
            if !(0.0..=1.0).contains(&t) {
                return Err(SubmitError::InvalidConfig(
                    "duplicate_overlap_threshold must be within [0, 1]".into(),
                ));
            }
            effective.duplicate_overlap_threshold = t;
        }

        Ok(effective)
    }
}

/// Per-batch config overrides accepted at submission.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchOverrides {
    pub max_concurrent_documents: Option<usize>,
    pub batch_timeout_secs: Option<u64>,
    pub duplicate_overlap_threshold: Option<f32>,
}
