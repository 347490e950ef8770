//! Structured-output capability over an OpenAI-compatible
//! chat-completions endpoint (OpenAI, Groq, local gateways).

use async_trait::async_trait;
use intake_core::{GenerationError, GenerationRequest, StructuredGenerator};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const DEFAULT_BASE_URL: &str = "https://api.groq.com/openai/v1";
pub const DEFAULT_MODEL: &str = "llama-3.3-70b-versatile";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    response_format: Value,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponseRaw {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Client for `POST {base_url}/chat/completions` in JSON mode.
#[derive(Clone)]
pub struct OpenAiCompatibleGenerator {
    http_client: Client,
    api_key: String,
    base_url: String,
    model: String,
    temperature: f32,
}

impl std::fmt::Debug for OpenAiCompatibleGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatibleGenerator")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish()
    }
}

impl OpenAiCompatibleGenerator {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            http_client: Client::new(),
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            temperature: 0.0,
        }
    }

    /// Set a custom base URL (OpenAI, proxies, local gateways).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// The schema rides in the system message; JSON mode guarantees the
    /// answer parses, the agent checks that it conforms.
    fn system_message(request: &GenerationRequest) -> String {
        format!(
            "{}\n\nJSON Schema of the answer ({}):\n{}",
            request.system_prompt.trim_end(),
            request.schema_name,
            serde_json::to_string_pretty(&request.schema).unwrap_or_default()
        )
    }
}

#[async_trait]
impl StructuredGenerator for OpenAiCompatibleGenerator {
    fn name(&self) -> &str {
        "openai-compatible"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<Value, GenerationError> {
        let start = std::time::Instant::now();
        let system = Self::system_message(request);
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.content,
                },
            ],
            temperature: self.temperature,
            response_format: json!({ "type": "json_object" }),
        };

        let response = self
            .http_client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(target: "intake::agent", error = %e, "generation request failed");
                GenerationError::Transport(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            tracing::warn!(target: "intake::agent", status = %status, error = %error_text, "generation API error");
            return Err(GenerationError::Transport(format!("HTTP {}: {}", status, error_text)));
        }

        let chat: ChatResponseRaw = response
            .json()
            .await
            .map_err(|e| GenerationError::MalformedOutput(e.to_string()))?;

        let content = chat
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| GenerationError::MalformedOutput("empty completion".into()))?;

        tracing::debug!(
            target: "intake::agent",
            model = %self.model,
            schema = %request.schema_name,
            strict = request.strict,
            duration_ms = start.elapsed().as_millis() as u64,
            "generation completed"
        );

        serde_json::from_str(strip_fences(&content))
            .map_err(|e| GenerationError::MalformedOutput(format!("answer is not JSON: {}", e)))
    }
}

/// Some models wrap JSON in ```json fences even in JSON mode.
fn strip_fences(content: &str) -> &str {
    let trimmed = content.trim();
    trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(trimmed)
}
