//! Schema Registry: loading and lookup of intent schemas
//!
//! Supports the intent-schemas.yaml format with:
//! - One field list per intent
//! - Common fields appended to every intent
//! - Aliases, required flags and closed value sets per field

use intake_core::{ExtractionRecord, IntakeError, Intent};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::{HashMap, HashSet};

use crate::field::{canonical_key, FieldSpec};

const BUILTIN_SCHEMAS: &str = include_str!("../../../grammars/intent-schemas.yaml");

lazy_static::lazy_static! {
    static ref BUILTIN: SchemaRegistry = SchemaRegistry::from_yaml(BUILTIN_SCHEMAS)
        .expect("built-in intent schemas are valid");
}

/// Top-level schema file structure
#[derive(Debug, Clone, Deserialize)]
pub struct SchemaFile {
    pub version: String,
    #[serde(default)]
    pub common_fields: Vec<FieldSpec>,
    pub intents: HashMap<String, IntentEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IntentEntry {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
}

/// Expected shape of one intent.
#[derive(Debug, Clone, PartialEq)]
pub struct IntentSchema {
    pub intent: Intent,
    pub description: String,
    pub fields: Vec<FieldSpec>,
}

impl IntentSchema {
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Resolve a payload key (name or alias, any case) to its field.
    pub fn resolve_key(&self, key: &str) -> Option<&FieldSpec> {
        self.field(key)
            .or_else(|| self.fields.iter().find(|f| f.matches_key(key)))
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    pub fn required_fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.iter().filter(|f| f.required)
    }

    pub fn declares(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    /// JSON Schema handed to the structured-output capability.
    pub fn json_schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .fields
            .iter()
            .map(|f| (f.name.clone(), f.json_schema()))
            .collect();
        let required: Vec<&str> = self.required_fields().map(|f| f.name.as_str()).collect();

        json!({
            "title": self.intent.as_str(),
            "description": self.description,
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Keys of `record` that are neither declared nor flagged as anomalies.
    pub fn conformance_violations<'r>(&self, record: &'r ExtractionRecord) -> Vec<&'r str> {
        record
            .fields
            .keys()
            .filter(|key| !self.declares(key) && !record.is_flagged(key))
            .map(String::as_str)
            .collect()
    }

    /// Every field key is declared, or flagged as an anomaly.
    pub fn admits(&self, record: &ExtractionRecord) -> bool {
        record.intent == self.intent && self.conformance_violations(record).is_empty()
    }
}

/// Intent schemas, one per [`Intent`] including UNKNOWN.
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    pub version: String,
    schemas: HashMap<Intent, IntentSchema>,
}

impl SchemaRegistry {
    /// Schemas shipped in `grammars/intent-schemas.yaml`.
    pub fn builtin() -> Self {
        BUILTIN.clone()
    }

    /// Load and validate schemas from a YAML file
    pub fn load(path: &str) -> Result<Self, IntakeError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            IntakeError::SchemaError(format!("failed to read schema file {}: {}", path, e))
        })?;
        Self::from_yaml(&content)
    }

    /// Build schemas from YAML content
    pub fn from_yaml(yaml: &str) -> Result<Self, IntakeError> {
        let file: SchemaFile = serde_yaml::from_str(yaml)
            .map_err(|e| IntakeError::SchemaError(format!("failed to parse schema YAML: {}", e)))?;

        let mut schemas = HashMap::new();
        for (name, entry) in file.intents {
            let intent = Intent::parse(&name)
                .ok_or_else(|| IntakeError::SchemaError(format!("unknown intent '{}'", name)))?;
            let schema = build_schema(intent, entry.description, entry.fields, &file.common_fields)?;
            schemas.insert(intent, schema);
        }

        // Intents the file does not mention still get the common fields
        for intent in Intent::ALL {
            if !schemas.contains_key(&intent) {
                let schema = build_schema(intent, String::new(), Vec::new(), &file.common_fields)?;
                schemas.insert(intent, schema);
            }
        }

        Ok(Self {
            version: file.version,
            schemas,
        })
    }

    pub fn get(&self, intent: Intent) -> &IntentSchema {
        // Construction fills every intent
        &self.schemas[&intent]
    }

    pub fn intents(&self) -> impl Iterator<Item = Intent> + '_ {
        Intent::ALL.into_iter().filter(|i| self.schemas.contains_key(i))
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

fn build_schema(
    intent: Intent,
    description: String,
    mut fields: Vec<FieldSpec>,
    common: &[FieldSpec],
) -> Result<IntentSchema, IntakeError> {
    for field in common {
        if !fields.iter().any(|f| f.name == field.name) {
            fields.push(field.clone());
        }
    }

    let mut seen = HashSet::new();
    for field in &fields {
        for key in std::iter::once(&field.name).chain(field.aliases.iter()) {
            if !seen.insert(canonical_key(key)) {
                return Err(IntakeError::SchemaError(format!(
                    "key '{}' is declared twice in the {} schema",
                    key, intent
                )));
            }
        }
        for value in &field.one_of {
            if value != &value.to_lowercase() {
                return Err(IntakeError::SchemaError(format!(
                    "allowed value '{}' of {}.{} must be lowercase",
                    value, intent, field.name
                )));
            }
        }
    }

    Ok(IntentSchema {
        intent,
        description,
        fields,
    })
}
