//! Unified Error Model
//!
//! Fatal errors decide whether a record exists at all; anything about a
//! single field is an anomaly on the record, never an error.
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IntakeError {
    /// No format could be determined for the input.
    #[error("ROUTE/UNROUTABLE: {0}")]
    UnroutableInput(String),

    /// The structured payload could not be parsed into a mapping.
    #[error("PAYLOAD/MALFORMED: {0}")]
    MalformedPayload(String),

    #[error("GENERATION/{0}")]
    GenerationFailure(#[from] GenerationError),

    #[error("DOCUMENT/{0}")]
    UnextractableDocument(#[from] UnextractableDocument),

    /// The record was computed but could not be persisted.
    #[error("STORE/{0}")]
    StoreUnavailable(#[from] StoreError),

    #[error("SCHEMA/{0}")]
    SchemaError(String),

    #[error("CONFIG/{0}")]
    ConfigError(String),
}

impl IntakeError {
    /// Short machine-readable code, used by the CLI exit mapping and the API.
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnroutableInput(_) => "unroutable_input",
            Self::MalformedPayload(_) => "malformed_payload",
            Self::GenerationFailure(_) => "generation_failure",
            Self::UnextractableDocument(_) => "unextractable_document",
            Self::StoreUnavailable(_) => "store_unavailable",
            Self::SchemaError(_) => "schema_error",
            Self::ConfigError(_) => "config_error",
        }
    }

    /// Generation failures are absorbed by the retry/degrade state machine.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::GenerationFailure(_))
    }
}

/// Failure of the structured-output capability.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GenerationError {
    #[error("TIMEOUT: no response within {0} ms")]
    Timeout(u64),

    #[error("MALFORMED_OUTPUT: {0}")]
    MalformedOutput(String),

    #[error("SCHEMA_VIOLATION: {0}")]
    SchemaViolation(String),

    #[error("TRANSPORT: {0}")]
    Transport(String),
}

/// Failure of the key-value backing capability.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("UNAVAILABLE: {0}")]
    Unavailable(String),

    #[error("CORRUPT: {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

/// Failure of the text extractor capability.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("UNEXTRACTABLE: {reason}")]
pub struct UnextractableDocument {
    pub reason: String,
}

impl UnextractableDocument {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, IntakeError>;
