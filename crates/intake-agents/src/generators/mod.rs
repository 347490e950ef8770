//! Structured-output capability adapters

pub mod heuristic;
pub mod openai;

pub use heuristic::HeuristicGenerator;
pub use openai::OpenAiCompatibleGenerator;
