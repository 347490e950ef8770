//! Structured-payload extraction agent.
//!
//! Direct lookup: the payload already is a mapping, so extraction is alias
//! resolution plus coercion. The structured-output capability is only used to
//! tidy fields the schema marks `normalize`, and its failure never costs
//! more than an `unresolved` anomaly on that field.

use async_trait::async_trait;
use intake_core::{
    generate_within, AnomalyKind, ExtractionRecord, GenerationPhase, GenerationRequest,
    InputFormat, IntakeError, Intent, RecordBuilder, StructuredGenerator,
};
use intake_router::{format::parse_structured, AgentKind};
use intake_schema::{FieldSpec, IntentSchema, SchemaRegistry};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;

use crate::coerce::apply_schema;
use crate::prompts::PromptRenderer;
use crate::ExtractionAgent;

/// Capability access for `normalize` fields
#[derive(Clone)]
struct Refiner {
    generator: Arc<dyn StructuredGenerator>,
    prompts: Arc<PromptRenderer>,
    timeout: Duration,
}

/// Agent for inputs detected as STRUCTURED
#[derive(Clone)]
pub struct StructuredAgent {
    registry: Arc<SchemaRegistry>,
    refiner: Option<Refiner>,
}

impl StructuredAgent {
    /// Agent without field refinement.
    pub fn new(registry: Arc<SchemaRegistry>) -> Self {
        Self {
            registry,
            refiner: None,
        }
    }

    /// Refine `normalize` fields through `generator`, each call bounded by
    /// `timeout`.
    pub fn with_refinement(
        mut self,
        generator: Arc<dyn StructuredGenerator>,
        prompts: Arc<PromptRenderer>,
        timeout: Duration,
    ) -> Self {
        self.refiner = Some(Refiner {
            generator,
            prompts,
            timeout,
        });
        self
    }

    async fn refine(&self, refiner: &Refiner, schema: &IntentSchema, builder: &mut RecordBuilder) {
        let candidates: Vec<(&FieldSpec, String)> = schema
            .fields
            .iter()
            .filter(|field| field.normalize && !builder.is_flagged(&field.name))
            .filter_map(|field| {
                let raw = builder.get(&field.name)?.as_str()?.to_string();
                Some((field, raw))
            })
            .collect();

        for (field, raw) in candidates {
            match refine_field(refiner, schema, field, &raw).await {
                Ok(refined) => {
                    builder.field(field.name.clone(), Value::String(refined));
                }
                Err(reason) => {
                    tracing::warn!(
                        target: "intake::agent::structured",
                        intent = %schema.intent,
                        field = %field.name,
                        reason = %reason,
                        "field left raw"
                    );
                    builder.flag(field.name.clone(), AnomalyKind::Unresolved);
                }
            }
        }
    }
}

#[async_trait]
impl ExtractionAgent for StructuredAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::Structured
    }

    async fn extract(&self, payload: &str, intent: Intent) -> Result<ExtractionRecord, IntakeError> {
        let parsed = parse_payload(payload)?;
        let schema = self.registry.get(intent);

        let mut builder = ExtractionRecord::builder(intent, InputFormat::Structured);
        match parsed {
            Payload::Mapping(mapping) => apply_schema(&mapping, schema, &mut builder),
            Payload::Other(value) => keep_unmapped(value, schema, &mut builder),
        }

        if let Some(refiner) = &self.refiner {
            self.refine(refiner, schema, &mut builder).await;
        }

        let record = builder.finish(GenerationPhase::Direct);
        tracing::debug!(
            target: "intake::agent::structured",
            intent = %intent,
            fields = record.fields.len(),
            anomalies = ?record.anomaly_fields(),
            "payload extracted"
        );
        Ok(record)
    }
}

/// Field holding a payload that is valid JSON but not a mapping
pub const RAW_PAYLOAD_FIELD: &str = "payload";

/// A parsed structured payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Mapping(Map<String, Value>),
    /// A JSON list that is not one mapping: a batch of records, a list of values
    Other(Value),
}

/// Parse a payload. A list holding exactly one mapping is that mapping.
/// Only text that is not a JSON object or list is malformed.
pub fn parse_payload(payload: &str) -> Result<Payload, IntakeError> {
    let value = parse_structured(payload)
        .ok_or_else(|| IntakeError::MalformedPayload("payload is not a JSON object or list".into()))?;

    Ok(match value {
        Value::Object(map) => Payload::Mapping(map),
        Value::Array(mut items) if items.len() == 1 && items[0].is_object() => match items.pop() {
            Some(Value::Object(map)) => Payload::Mapping(map),
            Some(other) => Payload::Other(Value::Array(vec![other])),
            None => Payload::Other(Value::Array(Vec::new())),
        },
        other => Payload::Other(other),
    })
}

/// Keep a non-mapping payload whole under [`RAW_PAYLOAD_FIELD`]; every
/// required field is missing.
fn keep_unmapped(value: Value, schema: &IntentSchema, builder: &mut RecordBuilder) {
    builder
        .field(RAW_PAYLOAD_FIELD, value)
        .flag(RAW_PAYLOAD_FIELD, AnomalyKind::Unexpected);
    for field in schema.required_fields() {
        builder.flag(field.name.clone(), AnomalyKind::Missing);
    }
}

async fn refine_field(
    refiner: &Refiner,
    schema: &IntentSchema,
    field: &FieldSpec,
    raw: &str,
) -> Result<String, String> {
    let system_prompt = refiner
        .prompts
        .normalize_prompt(schema, field)
        .map_err(|e| e.to_string())?;

    let request = GenerationRequest {
        schema_name: format!("{}.{}", schema.intent, field.name),
        schema: json!({
            "type": "object",
            "properties": { "value": { "type": ["string", "null"] } },
            "required": ["value"],
        }),
        system_prompt,
        content: raw.to_string(),
        strict: false,
    };

    let answer = generate_within(refiner.generator.as_ref(), &request, refiner.timeout)
        .await
        .map_err(|e| e.to_string())?;

    match answer.get("value").and_then(Value::as_str).map(str::trim) {
        Some(value) if !value.is_empty() => Ok(value.to_string()),
        _ => Err("no normalized value returned".into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use intake_core::testing::{Scripted, ScriptedGenerator};
    use intake_core::GenerationError;

    fn agent() -> StructuredAgent {
        StructuredAgent::new(Arc::new(SchemaRegistry::builtin()))
    }

    fn refining(generator: ScriptedGenerator) -> StructuredAgent {
        agent().with_refinement(
            Arc::new(generator),
            Arc::new(PromptRenderer::builtin().unwrap()),
            Duration::from_millis(50),
        )
    }

    #[tokio::test]
    async fn test_invoice_missing_date() {
        let record = agent()
            .extract(r#"{"type":"invoice","vendor":"ABC Corp","total":1200}"#, Intent::Invoice)
            .await
            .unwrap();

        assert_eq!(record.get("vendor"), Some(&json!("ABC Corp")));
        assert_eq!(record.get("total"), Some(&json!(1200)));
        assert_eq!(record.anomaly_fields().into_iter().collect::<Vec<_>>(), vec!["date"]);
        assert_eq!(record.generation, GenerationPhase::Direct);
    }

    #[tokio::test]
    async fn test_malformed_payload() {
        let err = agent().extract("vendor: ABC", Intent::Invoice).await.unwrap_err();
        assert!(matches!(err, IntakeError::MalformedPayload(_)));

        let err = agent().extract("{\"vendor\": ", Intent::Invoice).await.unwrap_err();
        assert!(matches!(err, IntakeError::MalformedPayload(_)));
    }

    #[tokio::test]
    async fn test_batch_payload_is_kept_and_flagged() {
        let batch = r#"[{"vendor": "ABC Corp", "total": 1200}, {"vendor": "XYZ Ltd", "total": 80}]"#;
        let record = agent().extract(batch, Intent::Invoice).await.unwrap();

        assert_eq!(record.fields.len(), 1);
        assert_eq!(record.get(RAW_PAYLOAD_FIELD).and_then(Value::as_array).map(Vec::len), Some(2));
        assert_eq!(record.anomalies.get(RAW_PAYLOAD_FIELD), Some(&AnomalyKind::Unexpected));
        for name in ["vendor", "total", "date"] {
            assert_eq!(record.anomalies.get(name), Some(&AnomalyKind::Missing), "{}", name);
        }
        assert!(SchemaRegistry::builtin().get(Intent::Invoice).admits(&record));

        let record = agent().extract("[1, 2]", Intent::Invoice).await.unwrap();
        assert_eq!(record.get(RAW_PAYLOAD_FIELD), Some(&json!([1, 2])));
    }

    #[tokio::test]
    async fn test_single_item_list_unwraps() {
        let record = agent()
            .extract(r#"[{"customer": "Pat", "complaint": "late"}]"#, Intent::Complaint)
            .await
            .unwrap();
        assert_eq!(record.get("complaint_text"), Some(&json!("late")));
        assert!(record.is_clean());
    }

    #[tokio::test]
    async fn test_unlisted_keys_are_kept_and_flagged() {
        let record = agent()
            .extract(r#"{"room": "B2", "from": "ops@site.example"}"#, Intent::Complaint)
            .await
            .unwrap();
        assert_eq!(record.get("sender"), Some(&json!("ops@site.example")));
        assert_eq!(record.get("room"), Some(&json!("B2")));
        assert_eq!(record.anomalies.get("room"), Some(&AnomalyKind::Unexpected));
        assert_eq!(record.anomalies.get("customer"), Some(&AnomalyKind::Missing));
    }

    #[tokio::test]
    async fn test_refinement_replaces_normalize_fields() {
        let generator = ScriptedGenerator::new(vec![Scripted::Respond(json!({"value": "ABC Corporation"}))]);
        let record = refining(generator)
            .extract(r#"{"vendor":"  abc corp. ","total":"$10","date":"2024-02-01"}"#, Intent::Invoice)
            .await
            .unwrap();

        assert_eq!(record.get("vendor"), Some(&json!("ABC Corporation")));
        assert!(record.is_clean());
    }

    #[tokio::test]
    async fn test_refinement_timeout_leaves_raw_value() {
        let generator = ScriptedGenerator::new(vec![Scripted::Hang]);
        let record = refining(generator)
            .extract(r#"{"vendor":"abc corp","total":10,"date":"2024-02-01"}"#, Intent::Invoice)
            .await
            .unwrap();

        assert_eq!(record.get("vendor"), Some(&json!("abc corp")));
        assert_eq!(record.anomalies.get("vendor"), Some(&AnomalyKind::Unresolved));
    }

    #[tokio::test]
    async fn test_refinement_failure_leaves_raw_value() {
        let generator = ScriptedGenerator::new(vec![Scripted::Fail(GenerationError::Transport(
            "connection reset".into(),
        ))]);
        let record = refining(generator)
            .extract(r#"{"customer":"pat lee","complaint_text":"broken"}"#, Intent::Complaint)
            .await
            .unwrap();

        assert_eq!(record.get("customer"), Some(&json!("pat lee")));
        assert_eq!(record.anomalies.get("customer"), Some(&AnomalyKind::Unresolved));
    }
}
