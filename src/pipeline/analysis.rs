//! Chunk analysis — the fan-out unit and its collaborator seams.
//!
//! The external analysis collaborator (an LLM service) sits behind the
//! [`AnalysisClient`] trait; the optional retrieval collaborator (RAG) sits
//! behind [`RetrievalClient`]. Both are opaque to the core: whatever comes
//! back is defensively validated before it is trusted — severities must
//! parse, confidences are clamped to [0, 1], and every finding's evidence
//! must occur verbatim in the chunk text or the finding is dropped.
//!
//! [`ChunkAnalyzer`] wraps a client with the retry budget: transient
//! failures (timeout, rate limit, service error) are retried with
//! exponential backoff; anything still failing becomes the chunk's terminal
//! error without touching sibling chunks.

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::AnalysisFailure;
use super::types::{Chunk, Finding, Severity};

// ═══════════════════════════════════════════
// Collaborator contracts
// ═══════════════════════════════════════════

/// A ranked context snippet from the retrieval collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextSnippet {
    pub source: String,
    pub text: String,
    pub score: f32,
}

/// Input for a single chunk analysis call.
#[derive(Debug, Clone)]
pub struct AnalysisRequest<'a> {
    pub chunk_text: &'a str,
    pub instructions: &'a str,
    pub context: &'a [ContextSnippet],
}

/// A finding as returned by the collaborator, before validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawFinding {
    pub severity: String,
    #[serde(default)]
    pub category: String,
    pub description: String,
    #[serde(default)]
    pub evidence: String,
    #[serde(default)]
    pub confidence: Option<f32>,
}

/// Untrusted output of one analysis call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisOutcome {
    pub findings: Vec<RawFinding>,
    #[serde(default)]
    pub confidence: Option<f32>,
}

/// External analysis collaborator (LLM call). Treated as opaque.
#[async_trait]
pub trait AnalysisClient: Send + Sync {
    async fn analyze(&self, request: AnalysisRequest<'_>)
        -> Result<AnalysisOutcome, AnalysisFailure>;
}

/// Optional retrieval collaborator (RAG). Absence degrades gracefully.
#[async_trait]
pub trait RetrievalClient: Send + Sync {
    async fn retrieve(&self, topic: &str) -> Result<Vec<ContextSnippet>, AnalysisFailure>;
}

// ═══════════════════════════════════════════
// HTTP analysis client
// ═══════════════════════════════════════════

#[derive(Serialize)]
struct AnalyzeHttpRequest<'a> {
    model: &'a str,
    instructions: &'a str,
    chunk: &'a str,
    context: &'a [ContextSnippet],
}

/// JSON client for a remote analysis service.
pub struct HttpAnalysisClient {
    base_url: String,
    model: String,
    client: reqwest::Client,
    timeout_secs: u64,
}

impl HttpAnalysisClient {
    pub fn new(base_url: &str, model: &str, timeout_secs: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            client,
            timeout_secs,
        }
    }
}

#[async_trait]
impl AnalysisClient for HttpAnalysisClient {
    async fn analyze(
        &self,
        request: AnalysisRequest<'_>,
    ) -> Result<AnalysisOutcome, AnalysisFailure> {
        let url = format!("{}/v1/analyze", self.base_url);
        let body = AnalyzeHttpRequest {
            model: &self.model,
            instructions: request.instructions,
            chunk: request.chunk_text,
            context: request.context,
        };

        let response = self.client.post(&url).json(&body).send().await.map_err(|e| {
            if e.is_timeout() {
                AnalysisFailure::Timeout {
                    secs: self.timeout_secs,
                }
            } else if e.is_connect() {
                AnalysisFailure::Connection(self.base_url.clone())
            } else {
                AnalysisFailure::Service(e.to_string())
            }
        })?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(AnalysisFailure::RateLimited);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AnalysisFailure::Service(format!("{status}: {body}")));
        }

        response
            .json::<AnalysisOutcome>()
            .await
            .map_err(|e| AnalysisFailure::MalformedOutput(e.to_string()))
    }
}

// ═══════════════════════════════════════════
// Heuristic analyzer
// ═══════════════════════════════════════════

struct HeuristicRule {
    severity: Severity,
    category: &'static str,
    description: &'static str,
    pattern: &'static str,
}

const HEURISTIC_RULES: &[HeuristicRule] = &[
    HeuristicRule {
        severity: Severity::High,
        category: "liability",
        description: "Unlimited liability exposure",
        pattern: r"(?i)unlimited liability|liability (?:is|shall be) unlimited",
    },
    HeuristicRule {
        severity: Severity::High,
        category: "liability",
        description: "Broad exclusion of consequential damages",
        pattern: r"(?i)(?:excludes?|exclusion of|not (?:be )?liable for|waives?)[^.\n]{0,60}(?:consequential|indirect|incidental|punitive) damages",
    },
    HeuristicRule {
        severity: Severity::High,
        category: "warranty",
        description: "Services provided without warranties",
        pattern: r#"(?i)provided ["“]?as[- ]is["”]?|disclaims? (?:all|any) warrant"#,
    },
    HeuristicRule {
        severity: Severity::High,
        category: "termination",
        description: "One-sided immediate termination right",
        pattern: r"(?i)terminat\w*[^.\n]{0,60}(?:immediately|without (?:prior )?notice|at any time)",
    },
    HeuristicRule {
        severity: Severity::Medium,
        category: "indemnification",
        description: "Indemnification obligation requires review",
        pattern: r"(?i)\bindemnif(?:y|ies|ied|ication)\b",
    },
    HeuristicRule {
        severity: Severity::Medium,
        category: "payment",
        description: "Unilateral fee modification right",
        pattern: r"(?i)fees?[^.\n]{0,60}(?:subject to change|may (?:be )?(?:chang|modif|increas|adjust))",
    },
    HeuristicRule {
        severity: Severity::Medium,
        category: "dispute_resolution",
        description: "Dispute resolution limits legal options",
        pattern: r"(?i)binding arbitration|class action waiver|waives? (?:any )?(?:right to a )?jury",
    },
    HeuristicRule {
        severity: Severity::Medium,
        category: "renewal",
        description: "Automatic renewal clause",
        pattern: r"(?i)automatic(?:ally)? renews?\w*",
    },
    HeuristicRule {
        severity: Severity::Low,
        category: "governing_law",
        description: "Governing law and venue provision",
        pattern: r"(?i)governing law|governed by the laws of",
    },
    HeuristicRule {
        severity: Severity::Low,
        category: "confidentiality",
        description: "Confidentiality obligation present",
        pattern: r"(?i)\bconfidential(?:ity)?\b",
    },
];

/// Maximum findings emitted per chunk by the heuristic analyzer.
const MAX_HEURISTIC_FINDINGS: usize = 8;

fn heuristic_regexes() -> &'static Vec<Regex> {
    static REGEXES: OnceLock<Vec<Regex>> = OnceLock::new();
    REGEXES.get_or_init(|| {
        HEURISTIC_RULES
            .iter()
            .map(|r| Regex::new(r.pattern).expect("invalid heuristic pattern"))
            .collect()
    })
}

/// Deterministic keyword analyzer, used when no external analysis service is
/// configured and by tests. Same input always produces the same findings.
pub struct HeuristicAnalyzer;

#[async_trait]
impl AnalysisClient for HeuristicAnalyzer {
    async fn analyze(
        &self,
        request: AnalysisRequest<'_>,
    ) -> Result<AnalysisOutcome, AnalysisFailure> {
        let text = request.chunk_text;
        let mut findings = Vec::new();

        'rules: for (rule, regex) in HEURISTIC_RULES.iter().zip(heuristic_regexes()) {
            for m in regex.find_iter(text).take(2) {
                let (s, e) = sentence_around(text, m.start(), m.end());
                findings.push(RawFinding {
                    severity: rule.severity.as_str().to_string(),
                    category: rule.category.to_string(),
                    description: rule.description.to_string(),
                    evidence: text[s..e].trim().to_string(),
                    confidence: Some(default_confidence(rule.severity)),
                });
                if findings.len() >= MAX_HEURISTIC_FINDINGS {
                    break 'rules;
                }
            }
        }

        Ok(AnalysisOutcome {
            findings,
            confidence: None,
        })
    }
}

fn default_confidence(severity: Severity) -> f32 {
    match severity {
        Severity::High => 0.9,
        Severity::Medium => 0.75,
        Severity::Low => 0.6,
    }
}

/// Expand a match to the sentence containing it.
fn sentence_around(text: &str, start: usize, end: usize) -> (usize, usize) {
    let bytes = text.as_bytes();
    let mut s = start;
    while s > 0 {
        if bytes[s - 1] == b'\n' || (s >= 2 && bytes[s - 2] == b'.' && bytes[s - 1] == b' ') {
            break;
        }
        s -= 1;
    }
    let mut e = end;
    while e < bytes.len() {
        if bytes[e] == b'\n' {
            break;
        }
        if bytes[e] == b'.' {
            e += 1;
            break;
        }
        e += 1;
    }
    while s > 0 && !text.is_char_boundary(s) {
        s -= 1;
    }
    while e < text.len() && !text.is_char_boundary(e) {
        e += 1;
    }
    (s, e)
}

// ═══════════════════════════════════════════
// Chunk analyzer (retry + validation wrapper)
// ═══════════════════════════════════════════

/// Validated result of analyzing one chunk.
#[derive(Debug, Clone)]
pub struct AnalyzedChunk {
    pub findings: Vec<Finding>,
    pub confidence: f32,
    /// Findings dropped because they failed validation or grounding.
    pub dropped: usize,
    /// True when the retrieval collaborator failed and analysis proceeded
    /// without augmented context.
    pub retrieval_degraded: bool,
}

/// Wraps the analysis collaborator with retries, retrieval and validation.
pub struct ChunkAnalyzer {
    client: std::sync::Arc<dyn AnalysisClient>,
    retrieval: Option<std::sync::Arc<dyn RetrievalClient>>,
    max_retries: u32,
    retry_base_delay: Duration,
}

impl ChunkAnalyzer {
    pub fn new(client: std::sync::Arc<dyn AnalysisClient>, max_retries: u32, retry_base_delay_ms: u64) -> Self {
        Self {
            client,
            retrieval: None,
            max_retries,
            retry_base_delay: Duration::from_millis(retry_base_delay_ms),
        }
    }

    pub fn with_retrieval(mut self, retrieval: std::sync::Arc<dyn RetrievalClient>) -> Self {
        self.retrieval = Some(retrieval);
        self
    }

    /// Analyze one chunk. Transient failures are retried within the budget;
    /// the returned error is terminal for this chunk only.
    pub async fn analyze(
        &self,
        chunk: &Chunk,
        chunk_text: &str,
        instructions: &str,
    ) -> Result<AnalyzedChunk, AnalysisFailure> {
        let (context, retrieval_degraded) = match &self.retrieval {
            Some(retrieval) => match retrieval.retrieve(chunk_text).await {
                Ok(snippets) => (snippets, false),
                Err(e) => {
                    tracing::warn!(
                        chunk_index = chunk.index,
                        error = %e,
                        "Retrieval unavailable, analyzing without augmented context"
                    );
                    (Vec::new(), true)
                }
            },
            None => (Vec::new(), false),
        };

        let request = AnalysisRequest {
            chunk_text,
            instructions,
            context: &context,
        };

        let mut attempt = 0u32;
        let outcome = loop {
            match self.client.analyze(request.clone()).await {
                Ok(outcome) => break outcome,
                Err(failure) if failure.is_transient() && attempt < self.max_retries => {
                    let delay = self.retry_base_delay * 2u32.saturating_pow(attempt);
                    tracing::debug!(
                        chunk_index = chunk.index,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %failure,
                        "Transient analysis failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(failure) => return Err(failure),
            }
        };

        let (findings, dropped) = ground_findings(outcome.findings, chunk, chunk_text);
        if dropped > 0 {
            tracing::debug!(
                chunk_index = chunk.index,
                dropped,
                "Dropped findings that failed validation or grounding"
            );
        }

        let confidence = outcome
            .confidence
            .map(|c| c.clamp(0.0, 1.0))
            .unwrap_or_else(|| confidence_from_findings(&findings));

        Ok(AnalyzedChunk {
            findings,
            confidence,
            dropped,
            retrieval_degraded,
        })
    }
}

/// Validate collaborator output against the chunk it claims to describe.
///
/// A finding survives only if its severity parses, its evidence is non-empty
/// and occurs verbatim in the chunk text. Surviving findings get document
/// offsets for their evidence span and the chunk's provenance.
fn ground_findings(
    raw: Vec<RawFinding>,
    chunk: &Chunk,
    chunk_text: &str,
) -> (Vec<Finding>, usize) {
    let mut findings = Vec::new();
    let mut dropped = 0usize;

    for item in raw {
        let Some(severity) = Severity::from_str(&item.severity) else {
            dropped += 1;
            continue;
        };
        let evidence = item.evidence.trim();
        if evidence.is_empty() {
            dropped += 1;
            continue;
        }
        let Some(pos) = chunk_text.find(evidence) else {
            dropped += 1;
            continue;
        };

        let category = if item.category.trim().is_empty() {
            "general".to_string()
        } else {
            item.category.trim().to_string()
        };

        let location = match &chunk.section {
            Some(section) => format!("pages {}, {}", chunk.page_range, section),
            None => format!("pages {}", chunk.page_range),
        };

        findings.push(Finding {
            id: Uuid::new_v4(),
            severity,
            category,
            description: item.description.trim().to_string(),
            evidence: evidence.to_string(),
            evidence_start: chunk.start + pos,
            evidence_end: chunk.start + pos + evidence.len(),
            location,
            confidence: item
                .confidence
                .map(|c| c.clamp(0.0, 1.0))
                .unwrap_or_else(|| default_confidence(severity)),
            chunk_ids: vec![chunk.id],
            related: Vec::new(),
        });
    }

    (findings, dropped)
}

/// Severity-weighted confidence when the collaborator does not supply one.
pub fn confidence_from_findings(findings: &[Finding]) -> f32 {
    if findings.is_empty() {
        return 0.5;
    }
    let total: f32 = findings
        .iter()
        .map(|f| match f.severity {
            Severity::High => 1.0,
            Severity::Medium => 0.7,
            Severity::Low => 0.3,
        })
        .sum();
    (total / findings.len() as f32).min(0.95)
}
