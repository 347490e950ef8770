//! Pipeline runner: classify → extract → persist for one input
use intake_agents::generators::{HeuristicGenerator, OpenAiCompatibleGenerator};
use intake_agents::{AgentSet, PromptRenderer};
use intake_context::{conversation_id_for, ContextStore, FileBackend, KvBackend, MemoryBackend};
use intake_core::{
    ClassificationResult, Component, ContextEntry, ExtractionRecord, GenerationPhase,
    IntakeError, Origin, PdfTextExtractor, RawInput, Stage, StageEvent, StageOutcome,
    StoreError, StructuredGenerator,
};
use intake_router::{AgentHandle, AgentKind, MarkerGrammar, RoutingEngine};
use intake_schema::SchemaRegistry;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;

use crate::config::{GenerationConfig, IntakeConfig, Provider, StoreBackendKind};
use crate::trace::{StageTimer, StageTrace};

/// A record that was computed but not yet persisted.
#[derive(Debug, Clone, Serialize)]
pub struct PendingRecord {
    pub conversation_id: String,
    pub classification: ClassificationResult,
    pub extraction: ExtractionRecord,
    pub origin: Origin,
    pub agent: AgentKind,
    pub redirects: usize,
    pub trace: Vec<StageTrace>,
    #[serde(skip)]
    events: Vec<StageEvent>,
}

/// Result of a completed invocation.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessOutcome {
    #[serde(flatten)]
    pub entry: ContextEntry,
    pub agent: AgentKind,
    pub redirects: usize,
    pub trace: Vec<StageTrace>,
}

impl ProcessOutcome {
    pub fn conversation_id(&self) -> &str {
        &self.entry.conversation_id
    }

    pub fn record(&self) -> &ExtractionRecord {
        &self.entry.extraction
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    /// No record exists: routing or payload parsing failed.
    #[error(transparent)]
    Rejected(#[from] IntakeError),

    /// The record exists but the store refused it; retry with
    /// [`Pipeline::persist`].
    #[error("STORE/{source} (record for {conversation} kept)", conversation = .pending.conversation_id)]
    NotPersisted {
        pending: Box<PendingRecord>,
        source: StoreError,
    },
}

impl PipelineError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Rejected(err) => err.code(),
            Self::NotPersisted { .. } => "store_unavailable",
        }
    }

    pub fn pending(&self) -> Option<&PendingRecord> {
        match self {
            Self::NotPersisted { pending, .. } => Some(pending),
            Self::Rejected(_) => None,
        }
    }

    pub fn into_pending(self) -> Option<PendingRecord> {
        match self {
            Self::NotPersisted { pending, .. } => Some(*pending),
            Self::Rejected(_) => None,
        }
    }
}

/// The wired pipeline. Every collaborator is injected; nothing is global.
#[derive(Clone)]
pub struct Pipeline {
    engine: RoutingEngine,
    agents: AgentSet,
    store: Arc<ContextStore>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("engine", &self.engine)
            .field("store", &self.store)
            .finish()
    }
}

impl Pipeline {
    pub fn new(engine: RoutingEngine, agents: AgentSet, store: Arc<ContextStore>) -> Self {
        Self {
            engine,
            agents,
            store,
        }
    }

    /// Assemble a pipeline from configuration.
    pub async fn from_config(config: &IntakeConfig) -> Result<Self, IntakeError> {
        let markers = match &config.classification.markers_path {
            Some(path) => MarkerGrammar::load(path)?,
            None => MarkerGrammar::builtin(),
        };
        let registry = Arc::new(match &config.schemas.path {
            Some(path) => SchemaRegistry::load(path)?,
            None => SchemaRegistry::builtin(),
        });
        let prompts = Arc::new(match &config.prompts.path {
            Some(path) => PromptRenderer::load(path)?,
            None => PromptRenderer::builtin()?,
        });
        let generator = build_generator(&config.generation)?;

        let engine = RoutingEngine::new(markers, Arc::new(PdfTextExtractor::default()))
            .with_min_confidence(config.classification.min_confidence);
        let agents = AgentSet::new(registry, prompts, generator, config.generation.timeout());

        let backend: Arc<dyn KvBackend> = match config.store.backend {
            StoreBackendKind::Memory => Arc::new(MemoryBackend::new()),
            StoreBackendKind::File => Arc::new(FileBackend::open(&config.store.path).await?),
        };

        Ok(Self::new(engine, agents, Arc::new(ContextStore::new(backend))))
    }

    pub fn engine(&self) -> &RoutingEngine {
        &self.engine
    }

    pub fn store(&self) -> &Arc<ContextStore> {
        &self.store
    }

    /// Run one input end to end.
    ///
    /// Classification and extraction finish before anything is written, so a
    /// rejected input leaves no trace in the store.
    pub async fn process(
        &self,
        raw: &RawInput,
        conversation_hint: Option<&str>,
    ) -> Result<ProcessOutcome, PipelineError> {
        let timer = StageTimer::start(Stage::Classify, raw.content.as_bytes());
        let (classification, handle) = self.engine.classify_and_route(raw).map_err(|err| {
            self.reject(Stage::Classify, Component::Engine, &err);
            err
        })?;
        let classify_trace = timer.finish(&to_bytes(&classification));
        let classify_event = StageEvent::new(Stage::Classify, Component::Engine, StageOutcome::Succeeded)
            .with_detail(format!(
                "format={} intent={} confidence={:.4}",
                classification.format, classification.intent, classification.confidence
            ));

        let component = agent_component(handle.kind);
        let timer = StageTimer::start(Stage::Extract, handle.payload.as_bytes());
        let extraction = self
            .agents
            .extract(&handle, &classification)
            .await
            .map_err(|err| {
                self.reject(Stage::Extract, component, &err);
                err
            })?;
        let extract_trace = timer.finish(&record_digest(&extraction));
        let extract_event = extraction_event(&handle, &extraction);
        extract_event.emit();

        let mut pending = PendingRecord {
            conversation_id: String::new(),
            classification,
            origin: Origin::for_input(raw, handle.detected_format),
            extraction,
            agent: handle.kind,
            redirects: handle.redirects,
            trace: vec![classify_trace, extract_trace],
            events: vec![classify_event, extract_event],
        };

        match self.store.get_or_create_conversation(conversation_hint).await {
            Ok(id) => pending.conversation_id = id,
            Err(source) => {
                pending.conversation_id = conversation_id_for(conversation_hint);
                return Err(self.not_persisted(pending, source));
            }
        }

        self.persist(pending).await
    }

    /// Append a computed record. Also the retry path after
    /// [`PipelineError::NotPersisted`]; extraction is never recomputed.
    pub async fn persist(&self, pending: PendingRecord) -> Result<ProcessOutcome, PipelineError> {
        let timer = StageTimer::start(Stage::Persist, &record_digest(&pending.extraction));

        let appended = self
            .store
            .append(
                &pending.conversation_id,
                pending.classification,
                pending.extraction.clone(),
                pending.origin.clone(),
            )
            .await;

        let entry = match appended {
            Ok(entry) => entry,
            Err(source) => return Err(self.not_persisted(pending, source)),
        };

        let persist_trace =
            timer.finish(format!("{}#{}", entry.conversation_id, entry.sequence).as_bytes());
        let persist_event = StageEvent::new(Stage::Persist, Component::Store, StageOutcome::Succeeded)
            .for_conversation(entry.conversation_id.clone())
            .with_detail(format!("sequence={}", entry.sequence));
        persist_event.emit();

        for event in pending.events.into_iter().chain(std::iter::once(persist_event)) {
            let event = event.for_conversation(entry.conversation_id.clone());
            if let Err(err) = self.store.record_event(&entry.conversation_id, &event).await {
                tracing::warn!(
                    target: "intake::pipeline",
                    conversation_id = %entry.conversation_id,
                    stage = event.stage.as_str(),
                    error = %err,
                    "stage event not stored"
                );
            }
        }

        let mut trace = pending.trace;
        trace.push(persist_trace);

        tracing::info!(
            target: "intake::pipeline",
            conversation_id = %entry.conversation_id,
            sequence = entry.sequence,
            format = %entry.classification.format,
            intent = %entry.classification.intent,
            agent = %pending.agent,
            anomalies = entry.extraction.anomalies.len(),
            "input processed"
        );

        Ok(ProcessOutcome {
            entry,
            agent: pending.agent,
            redirects: pending.redirects,
            trace,
        })
    }

    /// Stored entries of a conversation.
    pub async fn history(&self, conversation_id: &str) -> Result<Vec<ContextEntry>, IntakeError> {
        Ok(self.store.read(conversation_id).await?)
    }

    fn reject(&self, stage: Stage, component: Component, err: &IntakeError) {
        StageEvent::new(stage, component, StageOutcome::Failed)
            .with_detail(err.to_string())
            .emit();
    }

    fn not_persisted(&self, pending: PendingRecord, source: StoreError) -> PipelineError {
        StageEvent::new(Stage::Persist, Component::Store, StageOutcome::Failed)
            .for_conversation(pending.conversation_id.clone())
            .with_anomalies(pending.extraction.anomalies.keys().cloned())
            .with_detail(source.to_string())
            .emit();
        PipelineError::NotPersisted {
            pending: Box::new(pending),
            source,
        }
    }
}

/// Structured-output capability named by the configuration.
pub fn build_generator(config: &GenerationConfig) -> Result<Arc<dyn StructuredGenerator>, IntakeError> {
    let api_key = std::env::var(&config.api_key_env)
        .ok()
        .filter(|key| !key.trim().is_empty());

    let generator: Arc<dyn StructuredGenerator> = match (config.provider, api_key) {
        (Provider::Heuristic, _) | (Provider::Auto, None) => Arc::new(HeuristicGenerator::new()),
        (Provider::Openai, None) => {
            return Err(IntakeError::ConfigError(format!(
                "provider openai needs an API key in {}",
                config.api_key_env
            )))
        }
        (_, Some(key)) => Arc::new(
            OpenAiCompatibleGenerator::new(key)
                .with_base_url(config.base_url.clone())
                .with_model(config.model.clone())
                .with_temperature(config.temperature),
        ),
    };

    tracing::debug!(target: "intake::pipeline", generator = generator.name(), "structured-output capability selected");
    Ok(generator)
}

fn agent_component(kind: AgentKind) -> Component {
    match kind {
        AgentKind::Structured => Component::StructuredAgent,
        AgentKind::Communication => Component::CommunicationAgent,
    }
}

fn extraction_event(handle: &AgentHandle, record: &ExtractionRecord) -> StageEvent {
    let outcome = if record.generation == GenerationPhase::Degraded {
        StageOutcome::Degraded
    } else if record.is_clean() {
        StageOutcome::Succeeded
    } else {
        StageOutcome::Partial
    };
    StageEvent::new(Stage::Extract, agent_component(handle.kind), outcome)
        .with_anomalies(record.anomalies.keys().cloned())
        .with_detail(format!(
            "generation={:?} fields={}",
            record.generation,
            record.fields.len()
        ))
}

fn to_bytes<T: Serialize>(value: &T) -> Vec<u8> {
    serde_json::to_vec(value).unwrap_or_default()
}

/// Record content without its timestamp, so equal extractions hash equal.
fn record_digest(record: &ExtractionRecord) -> Vec<u8> {
    to_bytes(&json!({
        "intent": record.intent,
        "fields": record.fields,
        "anomalies": record.anomalies,
        "source_format": record.source_format,
        "generation": record.generation,
    }))
}
