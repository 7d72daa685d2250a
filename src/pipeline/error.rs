//! Error taxonomy for the orchestration core.
//!
//! Split by the boundary the failure belongs to: `SubmitError` is rejected
//! synchronously before any pipeline exists, `ExtractError` and
//! `AnalysisFailure` belong to the collaborator seams, `PipelineError` is a
//! document-fatal condition absorbed by the batch scheduler. Failures never
//! propagate past the unit that owns them.

use thiserror::Error;

/// Batch validation failures, rejected before any pipeline is created.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SubmitError {
    #[error("Batch contains no documents")]
    EmptyBatch,

    #[error("Batch contains {count} documents, maximum is {max}")]
    TooManyDocuments { count: usize, max: usize },

    #[error("Document '{filename}' is {bytes} bytes, maximum is {max} bytes")]
    FileTooLarge {
        filename: String,
        bytes: usize,
        max: usize,
    },

    #[error("Document '{filename}' has unsupported type '{declared_type}'")]
    UnsupportedType {
        filename: String,
        declared_type: String,
    },

    #[error("Invalid batch configuration: {0}")]
    InvalidConfig(String),
}

/// Text extraction failures at the collaborator boundary.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExtractError {
    #[error("Unsupported document type: {0}")]
    UnsupportedType(String),

    #[error("Document is not valid UTF-8 text: {0}")]
    Encoding(String),

    #[error("Document contains no extractable text")]
    EmptyText,
}

/// Typed failures from the external analysis collaborator.
///
/// Transient variants are retried within the chunk's retry budget; the rest
/// mark the chunk `error` immediately.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnalysisFailure {
    #[error("Analysis request timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("Analysis service rate limit exceeded")]
    RateLimited,

    #[error("Cannot reach analysis service at {0}")]
    Connection(String),

    #[error("Analysis service error: {0}")]
    Service(String),

    #[error("Analysis service returned a malformed response: {0}")]
    MalformedOutput(String),
}

impl AnalysisFailure {
    /// Whether a retry within the budget is worthwhile.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::RateLimited | Self::Connection(_) | Self::Service(_)
        )
    }

    /// Plain-language reason suitable for activity entries and reports.
    pub fn plain_reason(&self) -> String {
        match self {
            Self::Timeout { .. } => "the analysis service did not respond in time".into(),
            Self::RateLimited => "the analysis service is temporarily overloaded".into(),
            Self::Connection(_) => "the analysis service could not be reached".into(),
            Self::Service(_) => "the analysis service reported an internal problem".into(),
            Self::MalformedOutput(_) => "the analysis service returned an unreadable result".into(),
        }
    }
}

/// Document-fatal conditions: the document is marked failed, the batch
/// continues with its remaining documents.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error(transparent)]
    Extraction(#[from] ExtractError),

    #[error("Document produced no analyzable chunks")]
    NoChunks,
}

impl PipelineError {
    /// Plain-language reason suitable for activity entries and reports.
    pub fn plain_reason(&self) -> String {
        match self {
            Self::Extraction(ExtractError::UnsupportedType(t)) => {
                format!("the document type '{t}' could not be read")
            }
            Self::Extraction(ExtractError::Encoding(_)) => {
                "the document text could not be decoded".into()
            }
            Self::Extraction(ExtractError::EmptyText) | Self::NoChunks => {
                "the document contains no readable text".into()
            }
        }
    }
}
