//! Capability contracts: the only ways the core reaches outside itself
//!
//! - `TextExtractor` turns a binary document into text.
//! - `StructuredGenerator` turns a prompt and a target schema into a record.
//!
//! Both are injected; nothing in the core constructs a concrete provider.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::error::{GenerationError, UnextractableDocument};

/// Extracts text from a binary document.
pub trait TextExtractor: Send + Sync {
    fn name(&self) -> &'static str;

    fn extract_text(&self, document: &[u8]) -> Result<String, UnextractableDocument>;
}

/// A prompt plus the schema the answer must conform to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Name of the target shape (e.g. "invoice")
    pub schema_name: String,
    /// JSON Schema of the expected object
    pub schema: Value,
    /// Instructions for the model
    pub system_prompt: String,
    /// The content to extract from
    pub content: String,
    /// Set on the re-prompt after a failed attempt
    pub strict: bool,
}

/// Structured-output capability (an LLM behind a schema-constrained API).
#[async_trait]
pub trait StructuredGenerator: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(&self, request: &GenerationRequest) -> Result<Value, GenerationError>;
}

/// Run one generation with a bounded wait. Elapsed time becomes
/// [`GenerationError::Timeout`], never an unbounded stall.
pub async fn generate_within(
    generator: &dyn StructuredGenerator,
    request: &GenerationRequest,
    timeout: Duration,
) -> Result<Value, GenerationError> {
    match tokio::time::timeout(timeout, generator.generate(request)).await {
        Ok(result) => result,
        Err(_) => Err(GenerationError::Timeout(timeout.as_millis() as u64)),
    }
}

/// Text extractor for documents that already carry text: UTF-8 (with or
/// without BOM) and UTF-16 with BOM. Anything else is unextractable.
#[derive(Debug, Clone)]
pub struct PlainTextExtractor {
    /// Minimum share of printable characters for decoded text to count
    pub min_printable_ratio: f64,
}

impl Default for PlainTextExtractor {
    fn default() -> Self {
        Self {
            min_printable_ratio: 0.9,
        }
    }
}

impl PlainTextExtractor {
    fn decode(document: &[u8]) -> Result<String, UnextractableDocument> {
        if let Some(rest) = document.strip_prefix(&[0xEF, 0xBB, 0xBF]) {
            return String::from_utf8(rest.to_vec())
                .map_err(|_| UnextractableDocument::new("invalid UTF-8 after byte order mark"));
        }

        let utf16 = match document {
            [0xFF, 0xFE, rest @ ..] => Some((rest, true)),
            [0xFE, 0xFF, rest @ ..] => Some((rest, false)),
            _ => None,
        };
        if let Some((rest, little_endian)) = utf16 {
            if rest.len() % 2 != 0 {
                return Err(UnextractableDocument::new("truncated UTF-16 content"));
            }
            let units: Vec<u16> = rest
                .chunks_exact(2)
                .map(|pair| {
                    if little_endian {
                        u16::from_le_bytes([pair[0], pair[1]])
                    } else {
                        u16::from_be_bytes([pair[0], pair[1]])
                    }
                })
                .collect();
            return String::from_utf16(&units)
                .map_err(|_| UnextractableDocument::new("invalid UTF-16 content"));
        }

        String::from_utf8(document.to_vec())
            .map_err(|_| UnextractableDocument::new("content is not text"))
    }
}

impl TextExtractor for PlainTextExtractor {
    fn name(&self) -> &'static str {
        "plain-text"
    }

    fn extract_text(&self, document: &[u8]) -> Result<String, UnextractableDocument> {
        let text = Self::decode(document)?;
        self.accept(&text)
    }
}

impl PlainTextExtractor {
    /// Trimmed `text`, provided it is non-empty and mostly printable.
    pub fn accept(&self, text: &str) -> Result<String, UnextractableDocument> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(UnextractableDocument::new("no text content"));
        }

        let total = trimmed.chars().count();
        let printable = trimmed
            .chars()
            .filter(|c| !c.is_control() || c.is_whitespace())
            .count();
        if (printable as f64) / (total as f64) < self.min_printable_ratio {
            return Err(UnextractableDocument::new("content is mostly control bytes"));
        }

        Ok(trimmed.to_string())
    }
}
