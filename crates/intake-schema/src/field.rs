//! Field specifications
use serde::Deserialize;
use serde_json::{json, Value};

/// Declared type of a schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Integer,
    Number,
    Boolean,
    /// ISO date, `YYYY-MM-DD`
    Date,
    Email,
    List,
    Object,
    Any,
}

impl FieldType {
    /// JSON Schema fragment for this type.
    pub fn json_schema(&self) -> Value {
        match self {
            Self::String => json!({ "type": "string" }),
            Self::Integer => json!({ "type": "integer" }),
            Self::Number => json!({ "type": "number" }),
            Self::Boolean => json!({ "type": "boolean" }),
            Self::Date => json!({ "type": "string", "format": "date" }),
            Self::Email => json!({ "type": "string", "format": "email" }),
            Self::List => json!({ "type": "array" }),
            Self::Object => json!({ "type": "object" }),
            Self::Any => json!({}),
        }
    }
}

/// One expected field of an intent.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub description: String,
    /// Alternate keys accepted from structured payloads
    #[serde(default)]
    pub aliases: Vec<String>,
    /// Free-form value the structured-output capability may tidy up
    #[serde(default)]
    pub normalize: bool,
    /// Closed set of allowed (lowercase) values
    #[serde(default)]
    pub one_of: Vec<String>,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: false,
            description: String::new(),
            aliases: Vec::new(),
            normalize: false,
            one_of: Vec::new(),
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Whether `key` names this field, directly or through an alias.
    pub fn matches_key(&self, key: &str) -> bool {
        let key = canonical_key(key);
        canonical_key(&self.name) == key || self.aliases.iter().any(|a| canonical_key(a) == key)
    }

    pub fn json_schema(&self) -> Value {
        let mut schema = self.field_type.json_schema();
        if let Value::Object(map) = &mut schema {
            if !self.description.is_empty() {
                map.insert("description".into(), json!(self.description));
            }
            if !self.one_of.is_empty() {
                map.insert("enum".into(), json!(self.one_of));
            }
        }
        schema
    }
}

/// Lowercase, with spaces and hyphens folded to underscores.
pub fn canonical_key(key: &str) -> String {
    key.trim()
        .chars()
        .map(|c| match c {
            ' ' | '-' => '_',
            other => other.to_ascii_lowercase(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alias_matching() {
        let mut spec = FieldSpec::new("total", FieldType::Number);
        spec.aliases = vec!["total_amount".into(), "amount due".into()];

        assert!(spec.matches_key("Total"));
        assert!(spec.matches_key("total-amount"));
        assert!(spec.matches_key("AMOUNT_DUE"));
        assert!(!spec.matches_key("subtotal"));
    }

    #[test]
    fn test_field_json_schema() {
        let mut spec = FieldSpec::new("urgency", FieldType::String);
        spec.one_of = vec!["low".into(), "high".into()];
        let schema = spec.json_schema();

        assert_eq!(schema["type"], "string");
        assert_eq!(schema["enum"][1], "high");
        assert_eq!(FieldType::Date.json_schema()["format"], "date");
    }
}
