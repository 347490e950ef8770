//! Intake Core: data model, error taxonomy and capability contracts
//!
//! Shared vocabulary of the intake pipeline: what an input is, what a
//! classification and an extraction record look like, and the narrow
//! capabilities (text extraction, structured generation) the engine and the
//! agents are allowed to call.

pub mod capability;
pub mod data_model;
pub mod error;
pub mod pdf;
pub mod stage;
pub mod testing;

pub use capability::{
    generate_within, GenerationRequest, PlainTextExtractor, StructuredGenerator, TextExtractor,
};
pub use data_model::{
    AnomalyKind, Anomalies, ClassificationResult, ContextEntry, ExtractionRecord, FieldMap,
    GenerationPhase, InputContent, InputFormat, Intent, Origin, RawInput, RecordBuilder,
};
pub use pdf::PdfTextExtractor;
pub use error::{GenerationError, IntakeError, Result, StoreError, UnextractableDocument};
pub use stage::{Component, Stage, StageEvent, StageOutcome};

/// Engine version reported by the CLI and the API
pub const INTAKE_VERSION: &str = env!("CARGO_PKG_VERSION");
