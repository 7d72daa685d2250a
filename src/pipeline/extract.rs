//! Text extraction boundary.
//!
//! The core never performs format-specific parsing — extraction is a
//! collaborator behind the [`TextExtractor`] trait. The built-in
//! implementation handles plain text and markdown; everything else is
//! rejected at submission as an unsupported type.

use super::error::ExtractError;

/// Declared types the built-in extractor accepts.
const SUPPORTED_TYPES: &[&str] = &[
    "text/plain",
    "text/markdown",
    "txt",
    "md",
    "text",
    "markdown",
];

/// Collaborator boundary: raw file bytes + declared type → plain text.
pub trait TextExtractor: Send + Sync {
    fn extract(
        &self,
        filename: &str,
        declared_type: &str,
        bytes: &[u8],
    ) -> Result<String, ExtractError>;
}

/// Whether a declared type can be handled at all. Checked synchronously at
/// batch submission so unsupported uploads never create a pipeline.
pub fn is_supported_type(declared_type: &str) -> bool {
    let normalized = declared_type.trim().to_ascii_lowercase();
    SUPPORTED_TYPES.contains(&normalized.as_str())
}

/// Built-in extractor for plain text and markdown documents.
pub struct PlainTextExtractor;

impl TextExtractor for PlainTextExtractor {
    fn extract(
        &self,
        filename: &str,
        declared_type: &str,
        bytes: &[u8],
    ) -> Result<String, ExtractError> {
        if !is_supported_type(declared_type) {
            return Err(ExtractError::UnsupportedType(declared_type.to_string()));
        }

        let raw = std::str::from_utf8(bytes)
            .map_err(|e| ExtractError::Encoding(format!("{filename}: {e}")))?;

        let text = sanitize_text(raw);
        if text.trim().is_empty() {
            return Err(ExtractError::EmptyText);
        }

        tracing::debug!(
            filename,
            declared_type,
            text_length = text.len(),
            "Text extraction complete"
        );

        Ok(text)
    }
}

/// Strip control characters that would corrupt chunk offsets or display,
/// keeping newlines and tabs. Normalizes CRLF to LF.
fn sanitize_text(raw: &str) -> String {
    raw.replace("\r\n", "\n")
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect()
}
