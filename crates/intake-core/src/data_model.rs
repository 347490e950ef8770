//! Data Model: RawInput, ClassificationResult, ExtractionRecord, ContextEntry
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use uuid::Uuid;

/// Structural kind of an input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputFormat {
    Structured,
    Communication,
    Document,
}

impl InputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Structured => "structured",
            Self::Communication => "communication",
            Self::Document => "document",
        }
    }

    /// Parse a format name or a common alias (`json`, `email`, `pdf`).
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "structured" | "json" => Some(Self::Structured),
            "communication" | "email" | "eml" | "text" => Some(Self::Communication),
            "document" | "pdf" | "doc" => Some(Self::Document),
            _ => None,
        }
    }
}

impl fmt::Display for InputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Business purpose of an input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Invoice,
    Rfq,
    Complaint,
    Regulation,
    Unknown,
}

impl Intent {
    /// Intents that can be detected from markers.
    pub const KNOWN: [Intent; 4] = [
        Intent::Invoice,
        Intent::Rfq,
        Intent::Complaint,
        Intent::Regulation,
    ];

    pub const ALL: [Intent; 5] = [
        Intent::Invoice,
        Intent::Rfq,
        Intent::Complaint,
        Intent::Regulation,
        Intent::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Invoice => "invoice",
            Self::Rfq => "rfq",
            Self::Complaint => "complaint",
            Self::Regulation => "regulation",
            Self::Unknown => "unknown",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        let normalized = name.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "invoice" | "bill" => Some(Self::Invoice),
            "rfq" | "request_for_quote" | "request_for_quotation" | "quote_request" => {
                Some(Self::Rfq)
            }
            "complaint" => Some(Self::Complaint),
            "regulation" | "regulatory" | "compliance" => Some(Self::Regulation),
            "unknown" | "other" => Some(Self::Unknown),
            _ => None,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Content of a raw input, as received.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum InputContent {
    Text(String),
    Bytes(Vec<u8>),
}

impl InputContent {
    /// Text view of the content, when it is (or decodes as) UTF-8.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Bytes(bytes) => std::str::from_utf8(bytes).ok(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Bytes(bytes) => bytes,
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }
}

/// One input to classify. Created per invocation and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawInput {
    pub content: InputContent,
    /// Hint from the caller (file extension, API field)
    pub declared_format: Option<InputFormat>,
    pub received_at: DateTime<Utc>,
    /// File name the content was read from, if any
    pub source_name: Option<String>,
}

impl RawInput {
    pub fn text(text: impl Into<String>) -> Self {
        Self::new(InputContent::Text(text.into()))
    }

    pub fn bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self::new(InputContent::Bytes(bytes.into()))
    }

    fn new(content: InputContent) -> Self {
        Self {
            content,
            declared_format: None,
            received_at: Utc::now(),
            source_name: None,
        }
    }

    pub fn with_declared_format(mut self, format: InputFormat) -> Self {
        self.declared_format = Some(format);
        self
    }

    pub fn with_source_name(mut self, name: impl Into<String>) -> Self {
        self.source_name = Some(name.into());
        self
    }

    pub fn with_received_at(mut self, received_at: DateTime<Utc>) -> Self {
        self.received_at = received_at;
        self
    }
}

/// Outcome of classification. UNKNOWN is a valid terminal intent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub format: InputFormat,
    pub intent: Intent,
    /// Always within [0, 1]
    pub confidence: f64,
}

impl ClassificationResult {
    pub fn new(format: InputFormat, intent: Intent, confidence: f64) -> Self {
        let confidence = if confidence.is_finite() {
            confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            format,
            intent,
            confidence,
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.intent == Intent::Unknown
    }
}

/// Why a field was flagged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    /// Required by the schema but absent
    Missing,
    /// Present but empty or structurally wrong
    Invalid,
    /// Could not be coerced to the declared type; raw value kept
    Uncoercible,
    /// Not declared by the schema; value kept
    Unexpected,
    /// The structured-output capability could not produce it
    Unresolved,
}

/// Which step of the generation state machine produced a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationPhase {
    /// Extracted by direct lookup, no generation involved
    Direct,
    Attempt,
    Retry,
    Degraded,
}

pub type FieldMap = BTreeMap<String, Value>;
pub type Anomalies = BTreeMap<String, AnomalyKind>;

/// Normalized fields extracted from one input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionRecord {
    pub intent: Intent,
    pub fields: FieldMap,
    pub anomalies: Anomalies,
    pub source_format: InputFormat,
    pub extracted_at: DateTime<Utc>,
    pub generation: GenerationPhase,
}

impl ExtractionRecord {
    pub fn builder(intent: Intent, source_format: InputFormat) -> RecordBuilder {
        RecordBuilder {
            intent,
            source_format,
            fields: FieldMap::new(),
            anomalies: Anomalies::new(),
        }
    }

    /// Record with no fields and every named field flagged unresolved.
    pub fn degraded<'a>(
        intent: Intent,
        source_format: InputFormat,
        field_names: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        let mut builder = Self::builder(intent, source_format);
        for name in field_names {
            builder.flag(name, AnomalyKind::Unresolved);
        }
        builder.finish(GenerationPhase::Degraded)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn anomaly_fields(&self) -> BTreeSet<&str> {
        self.anomalies.keys().map(String::as_str).collect()
    }

    pub fn is_flagged(&self, name: &str) -> bool {
        self.anomalies.contains_key(name)
    }

    pub fn is_clean(&self) -> bool {
        self.anomalies.is_empty()
    }
}

/// Incremental construction of an [`ExtractionRecord`]; the record itself
/// is immutable once finished.
#[derive(Debug, Clone)]
pub struct RecordBuilder {
    intent: Intent,
    source_format: InputFormat,
    fields: FieldMap,
    anomalies: Anomalies,
}

impl RecordBuilder {
    pub fn field(&mut self, name: impl Into<String>, value: Value) -> &mut Self {
        self.fields.insert(name.into(), value);
        self
    }

    /// Flag a field. The first reason recorded for a field wins.
    pub fn flag(&mut self, name: impl Into<String>, kind: AnomalyKind) -> &mut Self {
        self.anomalies.entry(name.into()).or_insert(kind);
        self
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn is_flagged(&self, name: &str) -> bool {
        self.anomalies.contains_key(name)
    }

    pub fn finish(self, generation: GenerationPhase) -> ExtractionRecord {
        ExtractionRecord {
            intent: self.intent,
            fields: self.fields,
            anomalies: self.anomalies,
            source_format: self.source_format,
            extracted_at: Utc::now(),
            generation,
        }
    }
}

/// Where an entry came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Origin {
    /// Format detected at the top level, before any document fallback
    pub format: InputFormat,
    pub received_at: DateTime<Utc>,
    /// `<format>_<uuid>`
    pub source_id: String,
}

impl Origin {
    pub fn for_input(raw: &RawInput, format: InputFormat) -> Self {
        Self {
            format,
            received_at: raw.received_at,
            source_id: format!("{}_{}", format, Uuid::new_v4()),
        }
    }
}

/// One persisted step of a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextEntry {
    pub conversation_id: String,
    /// 0-based position within the conversation
    pub sequence: u64,
    pub classification: ClassificationResult,
    pub extraction: ExtractionRecord,
    pub origin: Origin,
    pub appended_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_intent_aliases() {
        assert_eq!(Intent::parse("RFQ"), Some(Intent::Rfq));
        assert_eq!(Intent::parse("request for quote"), Some(Intent::Rfq));
        assert_eq!(Intent::parse("other"), Some(Intent::Unknown));
        assert_eq!(Intent::parse("memo"), None);
    }

    #[test]
    fn test_confidence_is_clamped() {
        let c = ClassificationResult::new(InputFormat::Structured, Intent::Invoice, 1.7);
        assert_eq!(c.confidence, 1.0);
        let c = ClassificationResult::new(InputFormat::Structured, Intent::Invoice, f64::NAN);
        assert_eq!(c.confidence, 0.0);
    }

    #[test]
    fn test_builder_keeps_first_anomaly_reason() {
        let mut builder = ExtractionRecord::builder(Intent::Invoice, InputFormat::Structured);
        builder
            .field("total", json!("12x"))
            .flag("total", AnomalyKind::Uncoercible)
            .flag("total", AnomalyKind::Missing);
        let record = builder.finish(GenerationPhase::Direct);

        assert_eq!(record.anomalies["total"], AnomalyKind::Uncoercible);
        assert_eq!(record.get("total"), Some(&json!("12x")));
        assert!(!record.is_clean());
    }

    #[test]
    fn test_degraded_record() {
        let record = ExtractionRecord::degraded(
            Intent::Rfq,
            InputFormat::Communication,
            ["quantity", "items", "sender"],
        );
        assert!(record.fields.is_empty());
        assert_eq!(
            record.anomaly_fields().into_iter().collect::<Vec<_>>(),
            vec!["items", "quantity", "sender"]
        );
        assert_eq!(record.generation, GenerationPhase::Degraded);
    }

    #[test]
    fn test_bytes_content_text_view() {
        assert_eq!(InputContent::Bytes(b"hello".to_vec()).as_text(), Some("hello"));
        assert_eq!(InputContent::Bytes(vec![0xff, 0xfe, 0x00]).as_text(), None);
    }

    #[test]
    fn test_origin_source_id_prefix() {
        let raw = RawInput::text("{}");
        let origin = Origin::for_input(&raw, InputFormat::Structured);
        assert!(origin.source_id.starts_with("structured_"));
        assert_eq!(origin.received_at, raw.received_at);
    }
}
