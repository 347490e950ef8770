//! Stage events: the structured log shape every component emits
//!
//! Each component logs to its own tracing target so a subscriber can split
//! them into one stream per component.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Classify,
    Extract,
    Persist,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Classify => "classify",
            Self::Extract => "extract",
            Self::Persist => "persist",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    Engine,
    StructuredAgent,
    CommunicationAgent,
    Store,
    Pipeline,
}

impl Component {
    /// Tracing target of this component's stream.
    pub fn target(&self) -> &'static str {
        match self {
            Self::Engine => "intake::engine",
            Self::StructuredAgent => "intake::agent::structured",
            Self::CommunicationAgent => "intake::agent::communication",
            Self::Store => "intake::store",
            Self::Pipeline => "intake::pipeline",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageOutcome {
    Succeeded,
    /// Record produced with anomalies
    Partial,
    /// Record produced after generation gave up
    Degraded,
    Failed,
}

impl StageOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Partial => "partial",
            Self::Degraded => "degraded",
            Self::Failed => "failed",
        }
    }
}

/// `{stage, conversation_id, outcome, anomalies}` plus the emitting component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageEvent {
    pub stage: Stage,
    pub component: Component,
    pub conversation_id: Option<String>,
    pub outcome: StageOutcome,
    #[serde(default)]
    pub anomalies: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub at: DateTime<Utc>,
}

impl StageEvent {
    pub fn new(stage: Stage, component: Component, outcome: StageOutcome) -> Self {
        Self {
            stage,
            component,
            conversation_id: None,
            outcome,
            anomalies: Vec::new(),
            detail: None,
            at: Utc::now(),
        }
    }

    pub fn for_conversation(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    pub fn with_anomalies<I, S>(mut self, anomalies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.anomalies = anomalies.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Write the event to the component's tracing stream.
    pub fn emit(&self) {
        macro_rules! emit_to {
            ($target:literal) => {
                match self.outcome {
                    StageOutcome::Failed => tracing::warn!(
                        target: $target,
                        stage = self.stage.as_str(),
                        conversation_id = self.conversation_id.as_deref().unwrap_or("-"),
                        outcome = self.outcome.as_str(),
                        anomalies = ?self.anomalies,
                        detail = self.detail.as_deref().unwrap_or(""),
                        "stage event"
                    ),
                    _ => tracing::info!(
                        target: $target,
                        stage = self.stage.as_str(),
                        conversation_id = self.conversation_id.as_deref().unwrap_or("-"),
                        outcome = self.outcome.as_str(),
                        anomalies = ?self.anomalies,
                        detail = self.detail.as_deref().unwrap_or(""),
                        "stage event"
                    ),
                }
            };
        }

        match self.component {
            Component::Engine => emit_to!("intake::engine"),
            Component::StructuredAgent => emit_to!("intake::agent::structured"),
            Component::CommunicationAgent => emit_to!("intake::agent::communication"),
            Component::Store => emit_to!("intake::store"),
            Component::Pipeline => emit_to!("intake::pipeline"),
        }
    }
}
