//! API Handlers
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use intake_core::{InputFormat, IntakeError, RawInput, INTAKE_VERSION};
use intake_pipeline::{PipelineError, ProcessOutcome};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::AppState;

/// Body of `POST /v1/process`. Exactly one of `content` and `bytes`.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProcessRequest {
    /// Text, or an inline structured payload (object or array)
    #[serde(default)]
    pub content: Option<Value>,
    /// Raw document bytes
    #[serde(default)]
    pub bytes: Option<Vec<u8>>,
    /// Format hint: structured, communication, document (or json, email, pdf)
    #[serde(default)]
    pub format: Option<String>,
    /// Conversation hint; same hint, same conversation
    #[serde(default)]
    pub conversation: Option<String>,
    #[serde(default)]
    pub source_name: Option<String>,
}

impl ProcessRequest {
    pub fn into_raw(self) -> Result<RawInput, ApiError> {
        let mut raw = match (self.content, self.bytes) {
            (Some(Value::String(text)), None) => RawInput::text(text),
            (Some(value @ (Value::Object(_) | Value::Array(_))), None) => RawInput::text(value.to_string()),
            (None, Some(bytes)) => RawInput::bytes(bytes),
            (Some(_), None) => {
                return Err(ApiError::bad_request("content must be a string, an object or an array"))
            }
            _ => return Err(ApiError::bad_request("exactly one of content and bytes is required")),
        };

        if let Some(format) = self.format.as_deref() {
            let declared = InputFormat::parse(format)
                .ok_or_else(|| ApiError::bad_request(format!("unknown format '{}'", format)))?;
            raw = raw.with_declared_format(declared);
        }
        if let Some(name) = self.source_name {
            raw = raw.with_source_name(name);
        }
        Ok(raw)
    }
}

/// Error response: status plus `{error, message, ...}` body.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: Value,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            body: json!({ "error": "bad_request", "message": message.into() }),
        }
    }

    fn not_found(what: &str) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            body: json!({ "error": "not_found", "message": format!("no {}", what) }),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<IntakeError> for ApiError {
    fn from(err: IntakeError) -> Self {
        let status = match &err {
            IntakeError::UnroutableInput(_)
            | IntakeError::MalformedPayload(_)
            | IntakeError::UnextractableDocument(_) => StatusCode::UNPROCESSABLE_ENTITY,
            IntakeError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            IntakeError::GenerationFailure(_)
            | IntakeError::SchemaError(_)
            | IntakeError::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            body: json!({ "error": err.code(), "message": err.to_string() }),
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Rejected(err) => err.into(),
            PipelineError::NotPersisted { pending, source } => Self {
                status: StatusCode::SERVICE_UNAVAILABLE,
                body: json!({
                    "error": "store_unavailable",
                    "message": source.to_string(),
                    "record": pending,
                }),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

pub async fn process(
    State(state): State<AppState>,
    Json(request): Json<ProcessRequest>,
) -> Result<Json<ProcessOutcome>, ApiError> {
    let hint = request.conversation.clone();
    let raw = request.into_raw()?;

    match state.pipeline.process(&raw, hint.as_deref()).await {
        Ok(outcome) => {
            let record = outcome.record();
            let intent = record.intent.as_str();
            let generation = serde_json::to_value(record.generation)
                .ok()
                .and_then(|v| v.as_str().map(String::from))
                .unwrap_or_default();
            state
                .metrics
                .inputs
                .with_label_values(&[outcome.entry.classification.format.as_str(), intent, &generation])
                .inc();
            for kind in record.anomalies.values() {
                let kind = serde_json::to_value(kind)
                    .ok()
                    .and_then(|v| v.as_str().map(String::from))
                    .unwrap_or_default();
                state.metrics.anomalies.with_label_values(&[intent, &kind]).inc();
            }
            Ok(Json(outcome))
        }
        Err(err) => {
            state.metrics.rejections.with_label_values(&[err.code()]).inc();
            tracing::warn!(target: "intake::pipeline", code = err.code(), error = %err, "request not processed");
            Err(err.into())
        }
    }
}

pub async fn get_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let store = state.pipeline.store();
    let meta = store.conversation(&id).await.map_err(IntakeError::from)?;
    let entries = store.read(&id).await.map_err(IntakeError::from)?;
    if meta.is_none() && entries.is_empty() {
        return Err(ApiError::not_found("such conversation"));
    }
    Ok(Json(json!({
        "conversation_id": id,
        "created_at": meta.map(|m| m.created_at),
        "entries": entries,
    })))
}

pub async fn get_events(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let store = state.pipeline.store();
    let events = store.events(&id).await.map_err(IntakeError::from)?;
    if events.is_empty() && store.conversation(&id).await.map_err(IntakeError::from)?.is_none() {
        return Err(ApiError::not_found("such conversation"));
    }
    Ok(Json(json!({ "conversation_id": id, "events": events })))
}

pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "version": INTAKE_VERSION,
            "store": state.pipeline.store().backend_name(),
        })),
    )
}

pub async fn metrics(State(state): State<AppState>) -> Response {
    match state.metrics.encode() {
        Ok(text) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inline_object_becomes_text() {
        let request = ProcessRequest {
            content: Some(json!({"type": "invoice"})),
            format: Some("json".into()),
            ..Default::default()
        };
        let raw = request.into_raw().unwrap();
        assert_eq!(raw.content.as_text(), Some(r#"{"type":"invoice"}"#));
        assert_eq!(raw.declared_format, Some(InputFormat::Structured));
    }

    #[test]
    fn test_request_shape_errors() {
        let both = ProcessRequest {
            content: Some(json!("a")),
            bytes: Some(vec![1]),
            ..Default::default()
        };
        assert_eq!(both.into_raw().unwrap_err().status(), StatusCode::BAD_REQUEST);

        let number = ProcessRequest {
            content: Some(json!(4)),
            ..Default::default()
        };
        assert!(number.into_raw().is_err());

        let bad_format = ProcessRequest {
            content: Some(json!("a")),
            format: Some("spreadsheet".into()),
            ..Default::default()
        };
        assert!(bad_format.into_raw().is_err());
    }

    #[test]
    fn test_error_statuses() {
        let err: ApiError = IntakeError::UnroutableInput("empty".into()).into();
        assert_eq!(err.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let err: ApiError = IntakeError::ConfigError("x".into()).into();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
