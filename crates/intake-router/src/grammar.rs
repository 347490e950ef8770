//! Intent-marker grammar loading and compilation.
//!
//! Supports the intent-markers.yaml format with:
//! - Weighted phrases (whole-word, case-insensitive)
//! - Weighted regex patterns
//! - Weighted structured keys
//! - Discriminator values (`"type": "invoice"`)

use intake_core::{IntakeError, Intent};
use intake_schema::canonical_key;
use serde::Deserialize;
use std::collections::BTreeMap;

const BUILTIN_MARKERS: &str = include_str!("../../../grammars/intent-markers.yaml");

lazy_static::lazy_static! {
    static ref BUILTIN: MarkerGrammar = MarkerGrammar::from_yaml(BUILTIN_MARKERS)
        .expect("built-in intent markers are valid");
}

/// Top-level marker file structure
#[derive(Debug, Clone, Deserialize)]
pub struct MarkerFile {
    pub version: String,
    #[serde(default = "default_discriminator_weight")]
    pub discriminator_weight: f64,
    #[serde(default = "default_subject_multiplier")]
    pub subject_multiplier: f64,
    #[serde(default = "default_saturation")]
    pub saturation: f64,
    pub intents: BTreeMap<String, IntentMarkers>,
}

fn default_discriminator_weight() -> f64 {
    3.0
}

fn default_subject_multiplier() -> f64 {
    1.5
}

fn default_saturation() -> f64 {
    1.5
}

/// Markers of one intent. Ordered maps keep scoring order stable.
#[derive(Debug, Clone, Deserialize)]
pub struct IntentMarkers {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub discriminators: Vec<String>,
    #[serde(default)]
    pub phrases: BTreeMap<String, f64>,
    #[serde(default)]
    pub patterns: BTreeMap<String, f64>,
    #[serde(default)]
    pub keys: BTreeMap<String, f64>,
}

/// A compiled marker with its weight
#[derive(Debug, Clone)]
pub struct CompiledMarker {
    pub original: String,
    pub regex: regex::Regex,
    pub weight: f64,
}

/// Compiled markers of one intent
#[derive(Debug, Clone)]
pub struct CompiledIntent {
    pub intent: Intent,
    pub description: String,
    pub discriminators: Vec<String>,
    pub phrases: Vec<CompiledMarker>,
    pub patterns: Vec<CompiledMarker>,
    pub keys: Vec<(String, f64)>,
}

/// Compiled grammar ready for scoring
#[derive(Debug, Clone)]
pub struct MarkerGrammar {
    pub version: String,
    pub discriminator_weight: f64,
    pub subject_multiplier: f64,
    pub saturation: f64,
    /// In [`Intent::KNOWN`] order
    pub intents: Vec<CompiledIntent>,
}

impl MarkerGrammar {
    /// Markers shipped in `grammars/intent-markers.yaml`.
    pub fn builtin() -> Self {
        BUILTIN.clone()
    }

    /// Load and compile markers from a YAML file
    pub fn load(path: &str) -> Result<Self, IntakeError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            IntakeError::ConfigError(format!("failed to read marker file {}: {}", path, e))
        })?;
        Self::from_yaml(&content)
    }

    /// Compile markers from YAML content
    pub fn from_yaml(yaml: &str) -> Result<Self, IntakeError> {
        let file: MarkerFile = serde_yaml::from_str(yaml)
            .map_err(|e| IntakeError::ConfigError(format!("failed to parse marker YAML: {}", e)))?;

        if file.saturation <= 0.0 {
            return Err(IntakeError::ConfigError(
                "marker saturation must be positive".into(),
            ));
        }

        let mut intents = Vec::new();
        for (name, markers) in file.intents {
            let intent = Intent::parse(&name)
                .ok_or_else(|| IntakeError::ConfigError(format!("unknown intent '{}'", name)))?;
            if !intent.is_known() {
                return Err(IntakeError::ConfigError(
                    "UNKNOWN is the absence of markers and cannot declare any".into(),
                ));
            }
            intents.push(compile_intent(intent, markers)?);
        }

        intents.sort_by_key(|c| Intent::KNOWN.iter().position(|i| *i == c.intent));

        Ok(MarkerGrammar {
            version: file.version,
            discriminator_weight: file.discriminator_weight,
            subject_multiplier: file.subject_multiplier,
            saturation: file.saturation,
            intents,
        })
    }
}

impl Default for MarkerGrammar {
    fn default() -> Self {
        Self::builtin()
    }
}

fn compile_intent(intent: Intent, markers: IntentMarkers) -> Result<CompiledIntent, IntakeError> {
    let phrases = markers
        .phrases
        .iter()
        .map(|(phrase, weight)| {
            let pattern = format!(r"\b{}\b", regex::escape(&phrase.to_lowercase()));
            compile_marker(phrase, &pattern, *weight)
        })
        .collect::<Result<Vec<_>, _>>()?;

    let patterns = markers
        .patterns
        .iter()
        .map(|(pattern, weight)| compile_marker(pattern, pattern, *weight))
        .collect::<Result<Vec<_>, _>>()?;

    let keys = markers
        .keys
        .iter()
        .map(|(key, weight)| (canonical_key(key), *weight))
        .collect();

    let discriminators = markers
        .discriminators
        .iter()
        .map(|d| canonical_key(d))
        .chain(std::iter::once(intent.as_str().to_string()))
        .collect();

    Ok(CompiledIntent {
        intent,
        description: markers.description,
        discriminators,
        phrases,
        patterns,
        keys,
    })
}

fn compile_marker(original: &str, pattern: &str, weight: f64) -> Result<CompiledMarker, IntakeError> {
    if !weight.is_finite() || weight < 0.0 {
        return Err(IntakeError::ConfigError(format!(
            "marker '{}' has invalid weight {}",
            original, weight
        )));
    }

    let regex = regex::RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|e| IntakeError::ConfigError(format!("invalid marker '{}': {}", original, e)))?;

    Ok(CompiledMarker {
        original: original.to_string(),
        regex,
        weight,
    })
}
