//! Communication (free-text) extraction agent.
//!
//! Extraction goes through the structured-output capability under an
//! explicit state machine:
//!
//! ```text
//! ATTEMPT --fail--> RETRY (strict prompt) --fail--> DEGRADED
//!    |                 |
//!    ok                ok
//!    v                 v
//!  record            record
//! ```
//!
//! A degraded record has no fields and every schema field flagged
//! `unresolved`; generation failures never leave this module.

use async_trait::async_trait;
use intake_core::{
    generate_within, ExtractionRecord, GenerationError, GenerationPhase, GenerationRequest,
    InputFormat, IntakeError, Intent, StructuredGenerator,
};
use intake_router::entities::{self, Header};
use intake_router::AgentKind;
use intake_schema::IntentSchema;
use intake_schema::SchemaRegistry;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

use crate::coerce::apply_schema;
use crate::prompts::PromptRenderer;
use crate::ExtractionAgent;

/// Longest content handed to the capability, in characters
pub const MAX_CONTENT_CHARS: usize = 12_000;

/// Where the generation state machine stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationState {
    Attempt,
    Retry,
    Degraded,
}

impl GenerationState {
    /// Transition taken when the current call fails
    pub fn on_failure(self) -> Self {
        match self {
            Self::Attempt => Self::Retry,
            Self::Retry | Self::Degraded => Self::Degraded,
        }
    }

    pub fn phase(self) -> GenerationPhase {
        match self {
            Self::Attempt => GenerationPhase::Attempt,
            Self::Retry => GenerationPhase::Retry,
            Self::Degraded => GenerationPhase::Degraded,
        }
    }
}

/// Agent for COMMUNICATION inputs and free text from documents
#[derive(Clone)]
pub struct CommunicationAgent {
    registry: Arc<SchemaRegistry>,
    prompts: Arc<PromptRenderer>,
    generator: Arc<dyn StructuredGenerator>,
    timeout: Duration,
}

impl CommunicationAgent {
    pub fn new(
        registry: Arc<SchemaRegistry>,
        prompts: Arc<PromptRenderer>,
        generator: Arc<dyn StructuredGenerator>,
        timeout: Duration,
    ) -> Self {
        Self {
            registry,
            prompts,
            generator,
            timeout,
        }
    }

    async fn generate(
        &self,
        schema: &IntentSchema,
        content: &str,
        state: GenerationState,
    ) -> Result<Map<String, Value>, GenerationError> {
        let strict = state == GenerationState::Retry;
        let system_prompt = self
            .prompts
            .extraction_prompt(schema, strict)
            .map_err(|e| GenerationError::Transport(e.to_string()))?;

        let request = GenerationRequest {
            schema_name: schema.intent.as_str().to_string(),
            schema: schema.json_schema(),
            system_prompt,
            content: content.to_string(),
            strict,
        };

        let answer = generate_within(self.generator.as_ref(), &request, self.timeout).await?;
        let mapping = into_mapping(answer)?;

        if !schema.fields.is_empty() && !mapping.keys().any(|k| schema.resolve_key(k).is_some()) {
            return Err(GenerationError::SchemaViolation(format!(
                "no key of the answer belongs to the {} schema",
                schema.intent
            )));
        }
        Ok(mapping)
    }

    /// Extract free text that was classified as `source_format`, which is
    /// DOCUMENT for extracted text that never showed communication markers.
    pub async fn extract_as(
        &self,
        payload: &str,
        intent: Intent,
        source_format: InputFormat,
    ) -> ExtractionRecord {
        let schema = self.registry.get(intent);
        let content = prepare_content(payload);
        let mut state = GenerationState::Attempt;

        loop {
            match state {
                GenerationState::Attempt | GenerationState::Retry => {
                    match self.generate(schema, &content, state).await {
                        Ok(mapping) => {
                            let record =
                                build_record(mapping, schema, payload, source_format, state.phase());
                            tracing::debug!(
                                target: "intake::agent::communication",
                                intent = %intent,
                                phase = ?record.generation,
                                anomalies = ?record.anomaly_fields(),
                                "communication extracted"
                            );
                            return record;
                        }
                        Err(err) => {
                            let next = state.on_failure();
                            tracing::warn!(
                                target: "intake::agent::communication",
                                intent = %intent,
                                state = ?state,
                                next = ?next,
                                error = %err,
                                "generation failed"
                            );
                            state = next;
                        }
                    }
                }
                GenerationState::Degraded => {
                    return ExtractionRecord::degraded(intent, source_format, schema.field_names());
                }
            }
        }
    }
}

#[async_trait]
impl ExtractionAgent for CommunicationAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::Communication
    }

    async fn extract(&self, payload: &str, intent: Intent) -> Result<ExtractionRecord, IntakeError> {
        Ok(self.extract_as(payload, intent, InputFormat::Communication).await)
    }
}

/// Trimmed, line endings unified, capped at [`MAX_CONTENT_CHARS`].
fn prepare_content(text: &str) -> String {
    let unified = text.replace("\r\n", "\n");
    let trimmed = unified.trim();
    match trimmed.char_indices().nth(MAX_CONTENT_CHARS) {
        Some((cut, _)) => trimmed[..cut].to_string(),
        None => trimmed.to_string(),
    }
}

/// The answer as a mapping. Models sometimes wrap the object in a string.
fn into_mapping(answer: Value) -> Result<Map<String, Value>, GenerationError> {
    match answer {
        Value::Object(map) => Ok(map),
        Value::String(text) => match serde_json::from_str::<Value>(text.trim()) {
            Ok(Value::Object(map)) => Ok(map),
            _ => Err(GenerationError::MalformedOutput("answer is not a JSON object".into())),
        },
        other => Err(GenerationError::MalformedOutput(format!(
            "expected a JSON object, got {}",
            match other {
                Value::Array(_) => "a list",
                Value::Null => "null",
                _ => "a scalar",
            }
        ))),
    }
}

/// Explicit header sender and urgency markers win over the capability.
fn build_record(
    mut mapping: Map<String, Value>,
    schema: &IntentSchema,
    text: &str,
    source_format: InputFormat,
    phase: GenerationPhase,
) -> ExtractionRecord {
    let headers = entities::parse_headers(text);

    if schema.declares("sender") {
        if let Some(sender) = header_sender(&headers) {
            override_field(&mut mapping, schema, "sender", Value::String(sender));
        }
    }
    if schema.declares("urgency") {
        if let Some(urgency) = entities::explicit_urgency(text) {
            override_field(&mut mapping, schema, "urgency", Value::String(urgency.to_string()));
        }
    }

    let mut builder = ExtractionRecord::builder(schema.intent, source_format);
    apply_schema(&mapping, schema, &mut builder);
    builder.finish(phase)
}

/// Address in the `From:`/`Sender:` header, or the header text itself.
fn header_sender(headers: &[Header]) -> Option<String> {
    let value = entities::header_value(headers, "from")
        .or_else(|| entities::header_value(headers, "sender"))?;
    if value.is_empty() {
        return None;
    }
    Some(entities::sender_email(&format!("From: {}", value)).unwrap_or_else(|| value.to_string()))
}

fn override_field(mapping: &mut Map<String, Value>, schema: &IntentSchema, name: &str, value: Value) {
    mapping.retain(|key, _| schema.resolve_key(key).map_or(true, |f| f.name != name));
    mapping.insert(name.to_string(), value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use intake_core::testing::{Scripted, ScriptedGenerator};
    use intake_core::AnomalyKind;
    use serde_json::json;

    const RFQ_MAIL: &str = "Subject: RFQ Request\nBody: We need 500 units";

    fn agent(generator: ScriptedGenerator) -> (CommunicationAgent, Arc<ScriptedGenerator>) {
        let generator = Arc::new(generator);
        let agent = CommunicationAgent::new(
            Arc::new(SchemaRegistry::builtin()),
            Arc::new(PromptRenderer::builtin().unwrap()),
            generator.clone(),
            Duration::from_millis(50),
        );
        (agent, generator)
    }

    #[test]
    fn test_state_transitions() {
        assert_eq!(GenerationState::Attempt.on_failure(), GenerationState::Retry);
        assert_eq!(GenerationState::Retry.on_failure(), GenerationState::Degraded);
        assert_eq!(GenerationState::Degraded.on_failure(), GenerationState::Degraded);
    }

    #[tokio::test]
    async fn test_first_attempt_succeeds() {
        let (agent, generator) = agent(ScriptedGenerator::new(vec![Scripted::Respond(json!({
            "items": ["bolts"],
            "quantity": "500",
            "urgency": "medium",
            "sender": null
        }))]));

        let record = agent.extract(RFQ_MAIL, Intent::Rfq).await.unwrap();
        assert_eq!(record.generation, GenerationPhase::Attempt);
        assert_eq!(record.get("quantity"), Some(&json!(500)));
        assert_eq!(record.get("urgency"), Some(&json!("medium")));
        assert!(record.is_clean());

        let calls = generator.calls();
        assert_eq!(calls.len(), 1);
        assert!(!calls[0].strict);
        assert_eq!(calls[0].schema_name, "rfq");
    }

    #[tokio::test]
    async fn test_malformed_then_retry() {
        let (agent, generator) = agent(ScriptedGenerator::new(vec![
            Scripted::Respond(json!("sure! here is the data")),
            Scripted::Respond(json!({"items": "bolts", "quantity": 500})),
        ]));

        let record = agent.extract(RFQ_MAIL, Intent::Rfq).await.unwrap();
        assert_eq!(record.generation, GenerationPhase::Retry);
        assert_eq!(record.get("items"), Some(&json!(["bolts"])));

        let calls = generator.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[1].strict);
        assert_ne!(calls[0].system_prompt, calls[1].system_prompt);
    }

    #[tokio::test]
    async fn test_two_timeouts_degrade() {
        let (agent, generator) = agent(ScriptedGenerator::new(vec![Scripted::Hang, Scripted::Hang]));

        let record = agent.extract(RFQ_MAIL, Intent::Rfq).await.unwrap();
        assert_eq!(record.generation, GenerationPhase::Degraded);
        assert!(record.fields.is_empty());

        let schema = SchemaRegistry::builtin();
        for name in schema.get(Intent::Rfq).field_names() {
            assert_eq!(record.anomalies.get(name), Some(&AnomalyKind::Unresolved), "{}", name);
        }
        assert_eq!(generator.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_schema_violation_counts_as_failure() {
        let (agent, _) = agent(ScriptedGenerator::new(vec![
            Scripted::Respond(json!({"answer": 42})),
            Scripted::Respond(json!({"complaint_text": "arrived broken", "customer": "Pat"})),
        ]));

        let record = agent.extract("The kettle arrived broken.", Intent::Complaint).await.unwrap();
        assert_eq!(record.generation, GenerationPhase::Retry);
        assert_eq!(record.get("customer"), Some(&json!("Pat")));
    }

    #[tokio::test]
    async fn test_header_sender_and_explicit_urgency_win() {
        let mail = "From: Dana Reyes <Dana@Buyer.example>\nSubject: RFQ\n\nURGENT: need 20 pallets of cement.";
        let (agent, _) = agent(ScriptedGenerator::new(vec![Scripted::Respond(json!({
            "from": "someone@else.example",
            "priority": "low",
            "items": ["cement"],
            "quantity": 20
        }))]));

        let record = agent.extract(mail, Intent::Rfq).await.unwrap();
        assert_eq!(record.get("sender"), Some(&json!("dana@buyer.example")));
        assert_eq!(record.get("urgency"), Some(&json!("high")));
        assert!(record.get("from").is_none());
        assert!(record.get("priority").is_none());
    }

    #[tokio::test]
    async fn test_document_text_keeps_document_format() {
        let (agent, _) = agent(ScriptedGenerator::new(vec![
            Scripted::Respond(json!({"title": "Labeling rules", "effective_date": "2025-01-01"})),
            Scripted::Hang,
            Scripted::Hang,
        ]));

        let record = agent
            .extract_as("Labeling rules apply from 2025-01-01.", Intent::Regulation, InputFormat::Document)
            .await;
        assert_eq!(record.source_format, InputFormat::Document);
        assert_eq!(record.generation, GenerationPhase::Attempt);

        let degraded = agent
            .extract_as("Labeling rules apply from 2025-01-01.", Intent::Regulation, InputFormat::Document)
            .await;
        assert_eq!(degraded.generation, GenerationPhase::Degraded);
        assert_eq!(degraded.source_format, InputFormat::Document);
    }

    #[test]
    fn test_content_is_capped() {
        let long = "x".repeat(MAX_CONTENT_CHARS + 10);
        assert_eq!(prepare_content(&long).chars().count(), MAX_CONTENT_CHARS);
        assert_eq!(prepare_content("a\r\nb \n"), "a\nb");
    }
}
