//! Intake Agents: turn routed content into validated extraction records
//!
//! Two agents share one contract ([`ExtractionAgent`]):
//!
//! - [`StructuredAgent`] resolves and coerces the keys of a parsed payload.
//! - [`CommunicationAgent`] asks the structured-output capability for the
//!   intent's shape, retrying once with a stricter prompt and degrading to
//!   an all-unresolved record when that also fails.
//!
//! # Example
//!
//! ```ignore
//! use intake_agents::{AgentSet, generators::HeuristicGenerator};
//!
//! let agents = AgentSet::new(registry, prompts, Arc::new(HeuristicGenerator::new()), DEFAULT_GENERATION_TIMEOUT);
//! let record = agents.extract(&handle, &classification).await?;
//! ```

pub mod coerce;
pub mod communication;
pub mod generators;
pub mod prompts;
pub mod structured;

use async_trait::async_trait;
use intake_core::{ClassificationResult, ExtractionRecord, IntakeError, Intent, StructuredGenerator};
use intake_router::{AgentHandle, AgentKind};
use intake_schema::SchemaRegistry;
use std::sync::Arc;
use std::time::Duration;

pub use coerce::{apply_schema, coerce, CoercionError};
pub use communication::{CommunicationAgent, GenerationState, MAX_CONTENT_CHARS};
pub use prompts::PromptRenderer;
pub use structured::StructuredAgent;

/// Bound on one structured-output call
pub const DEFAULT_GENERATION_TIMEOUT: Duration = Duration::from_secs(20);

/// Turns content of one format into an [`ExtractionRecord`] for an intent.
#[async_trait]
pub trait ExtractionAgent: Send + Sync {
    fn kind(&self) -> AgentKind;

    async fn extract(&self, payload: &str, intent: Intent) -> Result<ExtractionRecord, IntakeError>;
}

/// One agent per [`AgentKind`], sharing registry, prompts and capability
#[derive(Clone)]
pub struct AgentSet {
    structured: StructuredAgent,
    communication: CommunicationAgent,
}

impl AgentSet {
    pub fn new(
        registry: Arc<SchemaRegistry>,
        prompts: Arc<PromptRenderer>,
        generator: Arc<dyn StructuredGenerator>,
        timeout: Duration,
    ) -> Self {
        let structured = StructuredAgent::new(registry.clone()).with_refinement(
            generator.clone(),
            prompts.clone(),
            timeout,
        );
        let communication = CommunicationAgent::new(registry, prompts, generator, timeout);
        Self {
            structured,
            communication,
        }
    }

    pub fn agent(&self, kind: AgentKind) -> &dyn ExtractionAgent {
        match kind {
            AgentKind::Structured => &self.structured,
            AgentKind::Communication => &self.communication,
        }
    }

    /// Run the agent the engine picked on the payload it prepared. The
    /// record takes its intent and source format from `classification`.
    pub async fn extract(
        &self,
        handle: &AgentHandle,
        classification: &ClassificationResult,
    ) -> Result<ExtractionRecord, IntakeError> {
        match handle.kind {
            AgentKind::Structured => {
                self.structured
                    .extract(&handle.payload, classification.intent)
                    .await
            }
            AgentKind::Communication => Ok(self
                .communication
                .extract_as(&handle.payload, classification.intent, classification.format)
                .await),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use intake_core::testing::ScriptedGenerator;
    use intake_core::{GenerationPhase, InputFormat};
    use serde_json::json;

    fn agents(generator: ScriptedGenerator) -> AgentSet {
        AgentSet::new(
            Arc::new(SchemaRegistry::builtin()),
            Arc::new(PromptRenderer::builtin().unwrap()),
            Arc::new(generator),
            Duration::from_millis(50),
        )
    }

    #[test]
    fn test_agent_per_kind() {
        let set = agents(ScriptedGenerator::default());
        assert_eq!(set.agent(AgentKind::Structured).kind(), AgentKind::Structured);
        assert_eq!(set.agent(AgentKind::Communication).kind(), AgentKind::Communication);
    }

    #[tokio::test]
    async fn test_extract_follows_handle() {
        let set = agents(ScriptedGenerator::always(json!({"quantity": 500, "items": ["bolts"]})));
        let handle = AgentHandle {
            kind: AgentKind::Communication,
            payload: "Subject: RFQ Request\nBody: We need 500 units".into(),
            detected_format: InputFormat::Communication,
            redirects: 0,
        };

        let classification = ClassificationResult::new(InputFormat::Communication, Intent::Rfq, 0.8);
        let record = set.extract(&handle, &classification).await.unwrap();
        assert_eq!(record.source_format, InputFormat::Communication);
        assert_eq!(record.generation, GenerationPhase::Attempt);
        assert_eq!(record.get("quantity"), Some(&json!(500)));
    }

    #[tokio::test]
    async fn test_extract_records_classified_format() {
        let set = agents(ScriptedGenerator::always(json!({"title": "Labeling rules"})));
        let handle = AgentHandle {
            kind: AgentKind::Communication,
            payload: "Labeling rules apply from 2025-01-01.".into(),
            detected_format: InputFormat::Document,
            redirects: 1,
        };

        let classification = ClassificationResult::new(InputFormat::Document, Intent::Regulation, 0.7);
        let record = set.extract(&handle, &classification).await.unwrap();
        assert_eq!(record.source_format, classification.format);
        assert_eq!(record.intent, Intent::Regulation);
    }
}
