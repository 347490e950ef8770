//! Intake Router: classification and routing of raw inputs
//!
//! Detects the format of an input, scores intent markers, and hands the input
//! to the agent that handles its format.
//!
//! # Example
//!
//! ```ignore
//! use intake_core::RawInput;
//! use intake_router::{AgentKind, RoutingEngine};
//!
//! let engine = RoutingEngine::default();
//! let raw = RawInput::text("Subject: RFQ request\nBody: We need 500 units");
//! let (classification, handle) = engine.classify_and_route(&raw)?;
//! assert_eq!(handle.kind, AgentKind::Communication);
//! ```

pub mod entities;
pub mod format;
pub mod grammar;
pub mod matcher;
pub mod normalizer;

use intake_core::{
    ClassificationResult, Component, InputFormat, IntakeError, Intent, PdfTextExtractor,
    RawInput, Stage, StageEvent, StageOutcome, TextExtractor,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

pub use entities::{Entity, Header, Urgency};
pub use format::Detected;
pub use grammar::MarkerGrammar;
pub use matcher::{Decision, Evidence, IntentScore};

/// How many times extracted document text may be re-classified.
pub const MAX_DOCUMENT_REDIRECTS: usize = 1;

/// Default confidence below which the intent is UNKNOWN
pub const DEFAULT_MIN_CONFIDENCE: f64 = 0.6;

/// Which agent handles an input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Structured,
    Communication,
}

impl AgentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Structured => "structured",
            Self::Communication => "communication",
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Routing decision: the agent and the text it should work on
#[derive(Debug, Clone, PartialEq)]
pub struct AgentHandle {
    pub kind: AgentKind,
    /// Decoded text (extracted text for documents)
    pub payload: String,
    /// Format detected at the top level; DOCUMENT whenever the extractor ran
    pub detected_format: InputFormat,
    /// Times the input went through the text extractor
    pub redirects: usize,
}

/// Classification-and-routing engine
#[derive(Clone)]
pub struct RoutingEngine {
    markers: Arc<MarkerGrammar>,
    extractor: Arc<dyn TextExtractor>,
    min_confidence: f64,
}

impl fmt::Debug for RoutingEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoutingEngine")
            .field("markers", &self.markers.version)
            .field("extractor", &self.extractor.name())
            .field("min_confidence", &self.min_confidence)
            .finish()
    }
}

impl Default for RoutingEngine {
    fn default() -> Self {
        Self::new(MarkerGrammar::builtin(), Arc::new(PdfTextExtractor::default()))
    }
}

impl RoutingEngine {
    pub fn new(markers: MarkerGrammar, extractor: Arc<dyn TextExtractor>) -> Self {
        Self {
            markers: Arc::new(markers),
            extractor,
            min_confidence: DEFAULT_MIN_CONFIDENCE,
        }
    }

    pub fn with_min_confidence(mut self, min_confidence: f64) -> Self {
        self.min_confidence = min_confidence.clamp(0.0, 1.0);
        self
    }

    pub fn min_confidence(&self) -> f64 {
        self.min_confidence
    }

    pub fn markers(&self) -> &MarkerGrammar {
        &self.markers
    }

    /// Classify an input and pick its agent.
    ///
    /// A declared DOCUMENT goes straight to the text extractor; a declared
    /// STRUCTURED goes to the structured agent even when it does not parse
    /// (the agent then reports a malformed payload). Any other hint is
    /// checked against the content.
    pub fn classify_and_route(
        &self,
        raw: &RawInput,
    ) -> Result<(ClassificationResult, AgentHandle), IntakeError> {
        let result = self.route(raw);

        match &result {
            Ok((classification, handle)) => {
                StageEvent::new(Stage::Classify, Component::Engine, StageOutcome::Succeeded)
                    .with_detail(format!(
                        "format={} intent={} confidence={:.4} agent={} redirects={}",
                        classification.format,
                        classification.intent,
                        classification.confidence,
                        handle.kind,
                        handle.redirects
                    ))
                    .emit();
            }
            Err(err) => {
                StageEvent::new(Stage::Classify, Component::Engine, StageOutcome::Failed)
                    .with_detail(err.to_string())
                    .emit();
            }
        }

        result
    }

    /// Classification alone, same rules as [`Self::classify_and_route`].
    pub fn classify(&self, raw: &RawInput) -> Result<ClassificationResult, IntakeError> {
        self.classify_and_route(raw).map(|(classification, _)| classification)
    }

    fn route(&self, raw: &RawInput) -> Result<(ClassificationResult, AgentHandle), IntakeError> {
        let routed = match (raw.declared_format, raw.content.as_text()) {
            (Some(InputFormat::Document), _) | (_, None) => None,
            (Some(InputFormat::Structured), Some(text)) => {
                let classification = self.route_declared_structured(text);
                let mut handle = handle_for_structured(&classification, text, 0);
                // Unparseable declared payloads go to the structured agent, which rejects them
                if format::parse_structured(text).is_none() {
                    handle.kind = AgentKind::Structured;
                }
                Some((classification, handle))
            }
            (declared, Some(text)) => {
                self.route_text(text, 0, declared == Some(InputFormat::Communication))
            }
        };
        if let Some(routed) = routed {
            return Ok(routed);
        }

        // DOCUMENT: the extractor must yield text before anything else
        let mut document = raw.content.as_bytes().to_vec();
        let mut redirects = 0;
        loop {
            let text = self
                .extractor
                .extract_text(&document)
                .map_err(|e| IntakeError::UnroutableInput(e.reason))?;
            redirects += 1;
            tracing::debug!(
                target: "intake::engine",
                extractor = self.extractor.name(),
                chars = text.chars().count(),
                "document text extracted"
            );

            if let Some((classification, mut handle)) = self.route_text(&text, redirects, false) {
                handle.detected_format = InputFormat::Document;
                return Ok((classification, handle));
            }
            if redirects >= MAX_DOCUMENT_REDIRECTS {
                let evidence = Evidence {
                    text: normalizer::normalize(&text),
                    ..Default::default()
                };
                let classification = self.decide(InputFormat::Document, &evidence);
                let handle = AgentHandle {
                    kind: AgentKind::Communication,
                    payload: text,
                    detected_format: InputFormat::Document,
                    redirects,
                };
                return Ok((classification, handle));
            }
            document = text.into_bytes();
        }
    }

    /// Route decoded text when it is structured or a communication. `None`
    /// means it is a document.
    fn route_text(
        &self,
        text: &str,
        redirects: usize,
        declared_communication: bool,
    ) -> Option<(ClassificationResult, AgentHandle)> {
        match format::detect(text) {
            Detected::Structured(value) => {
                let evidence = Evidence {
                    text: normalizer::flatten_structured(&value),
                    subject: None,
                    keys: normalizer::structured_keys(&value),
                    discriminators: normalizer::discriminator_values(&value),
                };
                let classification = self.decide(InputFormat::Structured, &evidence);
                let handle = handle_for_structured(&classification, text, redirects);
                Some((classification, handle))
            }
            Detected::Communication(headers) => Some(self.route_communication(text, &headers, redirects)),
            Detected::Document if declared_communication => {
                Some(self.route_communication(text, &[], redirects))
            }
            Detected::Document => None,
        }
    }

    fn route_communication(
        &self,
        text: &str,
        headers: &[Header],
        redirects: usize,
    ) -> (ClassificationResult, AgentHandle) {
        let evidence = Evidence {
            text: normalizer::normalize(text),
            subject: entities::header_value(headers, "subject").map(normalizer::normalize),
            ..Default::default()
        };
        let classification = self.decide(InputFormat::Communication, &evidence);
        let handle = AgentHandle {
            kind: AgentKind::Communication,
            payload: text.to_string(),
            detected_format: InputFormat::Communication,
            redirects,
        };
        (classification, handle)
    }

    /// The caller vouched for a structured payload; score whatever parses,
    /// or the raw text when nothing does.
    fn route_declared_structured(&self, text: &str) -> ClassificationResult {
        let evidence = match format::parse_structured(text) {
            Some(value) => Evidence {
                text: normalizer::flatten_structured(&value),
                subject: None,
                keys: normalizer::structured_keys(&value),
                discriminators: normalizer::discriminator_values(&value),
            },
            None => Evidence {
                text: normalizer::normalize(text),
                ..Default::default()
            },
        };
        self.decide(InputFormat::Structured, &evidence)
    }

    fn decide(&self, format: InputFormat, evidence: &Evidence) -> ClassificationResult {
        let decision = matcher::decide(evidence, &self.markers, self.min_confidence);
        tracing::debug!(
            target: "intake::engine",
            format = %format,
            intent = %decision.intent,
            confidence = decision.confidence,
            scores = ?decision
                .scores
                .iter()
                .map(|s| (s.intent.as_str(), s.score))
                .collect::<Vec<_>>(),
            "intent scored"
        );
        ClassificationResult::new(format, decision.intent, decision.confidence)
    }
}

/// Structured payloads go to the structured agent unless their intent is
/// UNKNOWN, which the communication agent handles.
fn handle_for_structured(
    classification: &ClassificationResult,
    text: &str,
    redirects: usize,
) -> AgentHandle {
    let kind = if classification.intent == Intent::Unknown {
        AgentKind::Communication
    } else {
        AgentKind::Structured
    };
    AgentHandle {
        kind,
        payload: text.to_string(),
        detected_format: InputFormat::Structured,
        redirects,
    }
}
