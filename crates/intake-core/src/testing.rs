//! Test doubles for the capability traits.
//!
//! Deterministic stand-ins for the structured-output capability and the text
//! extractor, so engine and agent behavior can be tested without a model.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use crate::capability::{GenerationRequest, StructuredGenerator, TextExtractor};
use crate::error::{GenerationError, UnextractableDocument};

/// One scripted reaction of a [`ScriptedGenerator`].
#[derive(Debug, Clone)]
pub enum Scripted {
    Respond(Value),
    Fail(GenerationError),
    /// Never answers; only a caller-side timeout ends the call
    Hang,
}

/// Structured generator that replays a script, one step per call.
///
/// Once the script is exhausted every call fails with a transport error.
#[derive(Debug, Default)]
pub struct ScriptedGenerator {
    script: Mutex<VecDeque<Scripted>>,
    calls: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    pub fn new(script: Vec<Scripted>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Generator that answers every call with the same value.
    pub fn always(value: Value) -> Self {
        Self::new(vec![Scripted::Respond(value); 16])
    }

    /// Requests received so far, in order.
    pub fn calls(&self) -> Vec<GenerationRequest> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl StructuredGenerator for ScriptedGenerator {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<Value, GenerationError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(request.clone());
        }
        let step = self.script.lock().ok().and_then(|mut s| s.pop_front());

        match step {
            Some(Scripted::Respond(value)) => Ok(value),
            Some(Scripted::Fail(err)) => Err(err),
            Some(Scripted::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(GenerationError::Transport("hung call resumed".into()))
            }
            None => Err(GenerationError::Transport("script exhausted".into())),
        }
    }
}

/// Text extractor with a fixed answer.
#[derive(Debug, Clone)]
pub struct StaticTextExtractor {
    answer: Result<String, UnextractableDocument>,
}

impl StaticTextExtractor {
    pub fn yielding(text: impl Into<String>) -> Self {
        Self {
            answer: Ok(text.into()),
        }
    }

    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            answer: Err(UnextractableDocument::new(reason)),
        }
    }
}

impl TextExtractor for StaticTextExtractor {
    fn name(&self) -> &'static str {
        "static"
    }

    fn extract_text(&self, _document: &[u8]) -> Result<String, UnextractableDocument> {
        self.answer.clone()
    }
}
