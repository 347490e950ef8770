//! Intake Pipeline: wires the engine, the agents and the context store
//!
//! # Pipeline Flow
//!
//! ```text
//! RawInput → classify → route → extract → persist → ContextEntry
//!               ↓          ↓        ↓          ↓
//!          (format,    AgentKind  Record   append + events
//!           intent)
//! ```
//!
//! Routing and payload failures reject the input before any store write.
//! A store failure after extraction hands the computed record back in
//! [`PipelineError::NotPersisted`] so [`Pipeline::persist`] can retry.

pub mod config;
mod runner;
pub mod trace;

pub use config::{
    ClassificationConfig, GenerationConfig, IntakeConfig, PathConfig, Provider, StoreBackendKind,
    StoreConfig, CONFIG_ENV,
};
pub use runner::{build_generator, PendingRecord, Pipeline, PipelineError, ProcessOutcome};
pub use trace::{hash_bytes, StageTrace};
