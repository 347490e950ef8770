//! Configuration: YAML file, `.env`, then `INTAKE_*` overrides
//!
//! ```yaml
//! classification:
//!   min_confidence: 0.6
//!   markers_path: grammars/intent-markers.yaml
//! schemas:
//!   path: grammars/intent-schemas.yaml
//! prompts:
//!   path: grammars/extraction-prompts.yaml
//! generation:
//!   provider: auto          # auto | heuristic | openai
//!   base_url: https://api.groq.com/openai/v1
//!   model: llama-3.3-70b-versatile
//!   api_key_env: GROQ_API_KEY
//!   timeout_ms: 20000
//!   temperature: 0.0
//! store:
//!   backend: file           # memory | file
//!   path: .intake/store
//! ```

use intake_agents::generators::openai::{DEFAULT_BASE_URL, DEFAULT_MODEL};
use intake_core::IntakeError;
use intake_router::DEFAULT_MIN_CONFIDENCE;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Environment variable naming the config file
pub const CONFIG_ENV: &str = "INTAKE_CONFIG";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct IntakeConfig {
    pub classification: ClassificationConfig,
    pub schemas: PathConfig,
    pub prompts: PathConfig,
    pub generation: GenerationConfig,
    pub store: StoreConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClassificationConfig {
    pub min_confidence: f64,
    /// Marker grammar file; the built-in grammar when absent
    pub markers_path: Option<String>,
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self {
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            markers_path: None,
        }
    }
}

/// Optional override of a built-in data file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct PathConfig {
    pub path: Option<String>,
}

/// Which structured-output capability to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    /// `openai` when the API key variable is set, `heuristic` otherwise
    #[default]
    Auto,
    Heuristic,
    Openai,
}

impl Provider {
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "auto" => Some(Self::Auto),
            "heuristic" | "offline" => Some(Self::Heuristic),
            "openai" | "groq" => Some(Self::Openai),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GenerationConfig {
    pub provider: Provider,
    pub base_url: String,
    pub model: String,
    /// Name of the variable holding the API key (never the key itself)
    pub api_key_env: String,
    pub timeout_ms: u64,
    pub temperature: f32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: Provider::Auto,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key_env: "GROQ_API_KEY".to_string(),
            timeout_ms: 20_000,
            temperature: 0.0,
        }
    }
}

impl GenerationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackendKind {
    Memory,
    #[default]
    File,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    pub backend: StoreBackendKind,
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackendKind::File,
            path: ".intake/store".to_string(),
        }
    }
}

fn config_error(message: impl Into<String>) -> IntakeError {
    IntakeError::ConfigError(message.into())
}

impl IntakeConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self, IntakeError> {
        let config: Self = serde_yaml::from_str(yaml)
            .map_err(|e| config_error(format!("failed to parse config YAML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`, else from `INTAKE_CONFIG`, else defaults; then
    /// apply `INTAKE_*` overrides. `.env` is read first when present.
    pub fn load(path: Option<&str>) -> Result<Self, IntakeError> {
        let _ = dotenvy::dotenv();

        let path = path
            .map(String::from)
            .or_else(|| std::env::var(CONFIG_ENV).ok().filter(|p| !p.is_empty()));

        let mut config = match &path {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .map_err(|e| config_error(format!("cannot read {}: {}", path, e)))?;
                Self::from_yaml(&text)?
            }
            None => Self::default(),
        };

        config.apply_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        tracing::debug!(
            target: "intake::pipeline",
            config_path = path.as_deref().unwrap_or("-"),
            provider = ?config.generation.provider,
            store = ?config.store.backend,
            "configuration loaded"
        );
        Ok(config)
    }

    /// Apply `INTAKE_*` variables found through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), IntakeError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("INTAKE_MIN_CONFIDENCE") {
            self.classification.min_confidence = parse_number(&v, "INTAKE_MIN_CONFIDENCE")?;
        }
        if let Some(v) = get("INTAKE_MARKERS_PATH") {
            self.classification.markers_path = Some(v);
        }
        if let Some(v) = get("INTAKE_SCHEMAS_PATH") {
            self.schemas.path = Some(v);
        }
        if let Some(v) = get("INTAKE_PROMPTS_PATH") {
            self.prompts.path = Some(v);
        }
        if let Some(v) = get("INTAKE_PROVIDER") {
            self.generation.provider =
                Provider::parse(&v).ok_or_else(|| config_error(format!("unknown provider '{}'", v)))?;
        }
        if let Some(v) = get("INTAKE_BASE_URL") {
            self.generation.base_url = v;
        }
        if let Some(v) = get("INTAKE_MODEL") {
            self.generation.model = v;
        }
        if let Some(v) = get("INTAKE_API_KEY_ENV") {
            self.generation.api_key_env = v;
        }
        if let Some(v) = get("INTAKE_TIMEOUT_MS") {
            self.generation.timeout_ms = parse_number(&v, "INTAKE_TIMEOUT_MS")?;
        }
        if let Some(v) = get("INTAKE_TEMPERATURE") {
            self.generation.temperature = parse_number(&v, "INTAKE_TEMPERATURE")?;
        }
        if let Some(v) = get("INTAKE_STORE_BACKEND") {
            self.store.backend = match v.trim().to_ascii_lowercase().as_str() {
                "memory" => StoreBackendKind::Memory,
                "file" => StoreBackendKind::File,
                other => return Err(config_error(format!("unknown store backend '{}'", other))),
            };
        }
        if let Some(v) = get("INTAKE_STORE_PATH") {
            self.store.path = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), IntakeError> {
        let c = self.classification.min_confidence;
        if !(0.0..=1.0).contains(&c) {
            return Err(config_error(format!("min_confidence must be within [0, 1], got {}", c)));
        }
        if self.generation.timeout_ms == 0 {
            return Err(config_error("generation.timeout_ms must be positive"));
        }
        if self.store.backend == StoreBackendKind::File && self.store.path.trim().is_empty() {
            return Err(config_error("store.path is required for the file backend"));
        }
        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(value: &str, name: &str) -> Result<T, IntakeError> {
    value
        .trim()
        .parse()
        .map_err(|_| config_error(format!("{} is not a valid number: '{}'", name, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = IntakeConfig::default();
        assert_eq!(config.classification.min_confidence, 0.6);
        assert_eq!(config.generation.provider, Provider::Auto);
        assert_eq!(config.generation.model, "llama-3.3-70b-versatile");
        assert_eq!(config.generation.timeout(), Duration::from_secs(20));
        assert_eq!(config.store.backend, StoreBackendKind::File);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = IntakeConfig::from_yaml(
            "generation:\n  provider: heuristic\n  timeout_ms: 500\nstore:\n  backend: memory\n",
        )
        .unwrap();
        assert_eq!(config.generation.provider, Provider::Heuristic);
        assert_eq!(config.generation.timeout_ms, 500);
        assert_eq!(config.generation.api_key_env, "GROQ_API_KEY");
        assert_eq!(config.store.backend, StoreBackendKind::Memory);
        assert_eq!(config.classification.min_confidence, 0.6);
    }

    #[test]
    fn test_invalid_yaml_is_config_error() {
        let err = IntakeConfig::from_yaml("classification:\n  min_confidence: 2.0\n").unwrap_err();
        assert!(matches!(err, IntakeError::ConfigError(_)));

        let err = IntakeConfig::from_yaml("generaton:\n  model: x\n").unwrap_err();
        assert!(err.to_string().starts_with("CONFIG/"));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("INTAKE_MIN_CONFIDENCE", "0.75"),
            ("INTAKE_PROVIDER", "openai"),
            ("INTAKE_TIMEOUT_MS", "1500"),
            ("INTAKE_STORE_BACKEND", "memory"),
            ("INTAKE_MODEL", ""),
        ]
        .into_iter()
        .collect();

        let mut config = IntakeConfig::default();
        config
            .apply_overrides(|name| env.get(name).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.classification.min_confidence, 0.75);
        assert_eq!(config.generation.provider, Provider::Openai);
        assert_eq!(config.generation.timeout_ms, 1500);
        assert_eq!(config.store.backend, StoreBackendKind::Memory);
        assert_eq!(config.generation.model, "llama-3.3-70b-versatile");
    }

    #[test]
    fn test_bad_override_is_rejected() {
        let mut config = IntakeConfig::default();
        let err = config
            .apply_overrides(|name| (name == "INTAKE_TIMEOUT_MS").then(|| "soon".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("INTAKE_TIMEOUT_MS"));
    }
}
