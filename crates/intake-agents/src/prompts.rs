//! Prompt templates for the structured-output capability.
//!
//! Loads the extraction-prompts.yaml format (named Handlebars templates) and
//! renders them against an intent schema. Custom helpers:
//! - join: Join array with separator
//! - upper: Uppercase a string
//! - default: Fallback for missing values

use handlebars::{
    Context, Handlebars, Helper, HelperDef, HelperResult, Output, RenderContext,
};
use intake_core::IntakeError;
use intake_schema::{FieldSpec, FieldType, IntentSchema};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;

const BUILTIN_PROMPTS: &str = include_str!("../../../grammars/extraction-prompts.yaml");

/// Template of the first communication attempt
pub const EXTRACT: &str = "extract";
/// Template of the stricter re-prompt
pub const EXTRACT_STRICT: &str = "extract_strict";
/// Template for refining a single `normalize` field
pub const NORMALIZE_FIELD: &str = "normalize_field";

const REQUIRED_TEMPLATES: [&str; 3] = [EXTRACT, EXTRACT_STRICT, NORMALIZE_FIELD];

/// Top-level prompts file structure
#[derive(Debug, Clone, Deserialize)]
pub struct PromptFile {
    pub version: String,
    pub prompts: BTreeMap<String, PromptTemplate>,
}

/// A single prompt definition
#[derive(Debug, Clone, Deserialize)]
pub struct PromptTemplate {
    #[serde(default)]
    pub description: String,
    pub template: String,
}

impl PromptFile {
    pub fn from_yaml(yaml: &str) -> Result<Self, IntakeError> {
        serde_yaml::from_str(yaml)
            .map_err(|e| IntakeError::ConfigError(format!("failed to parse prompts YAML: {}", e)))
    }
}

/// Compiled prompts with registered helpers
#[derive(Debug, Clone)]
pub struct PromptRenderer {
    handlebars: Handlebars<'static>,
}

impl PromptRenderer {
    /// Prompts shipped in `grammars/extraction-prompts.yaml`.
    pub fn builtin() -> Result<Self, IntakeError> {
        Self::from_yaml(BUILTIN_PROMPTS)
    }

    /// Load from a file path
    pub fn load(path: &str) -> Result<Self, IntakeError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            IntakeError::ConfigError(format!("failed to read prompts file {}: {}", path, e))
        })?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, IntakeError> {
        Self::new(PromptFile::from_yaml(yaml)?)
    }

    /// Compile every template; all three extraction templates must exist.
    pub fn new(file: PromptFile) -> Result<Self, IntakeError> {
        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(false);
        // Prompts are plain text, not HTML
        handlebars.register_escape_fn(handlebars::no_escape);

        handlebars.register_helper("join", Box::new(JoinHelper));
        handlebars.register_helper("upper", Box::new(UpperHelper));
        handlebars.register_helper("default", Box::new(DefaultHelper));

        for (name, prompt) in &file.prompts {
            handlebars
                .register_template_string(name, &prompt.template)
                .map_err(|e| {
                    IntakeError::ConfigError(format!("invalid prompt template '{}': {}", name, e))
                })?;
        }

        for name in REQUIRED_TEMPLATES {
            if !handlebars.has_template(name) {
                return Err(IntakeError::ConfigError(format!(
                    "prompts file is missing the '{}' template",
                    name
                )));
            }
        }

        Ok(Self { handlebars })
    }

    /// System prompt for extracting `schema`'s intent; `strict` selects the
    /// re-prompt.
    pub fn extraction_prompt(&self, schema: &IntentSchema, strict: bool) -> Result<String, IntakeError> {
        let data = json!({
            "intent": schema.intent.as_str(),
            "description": schema.description,
            "fields": schema.fields.iter().map(field_context).collect::<Vec<_>>(),
            "attempt": if strict { 2 } else { 1 },
        });
        let name = if strict { EXTRACT_STRICT } else { EXTRACT };
        self.render(name, &data)
    }

    /// System prompt for refining one field of `schema`.
    pub fn normalize_prompt(&self, schema: &IntentSchema, field: &FieldSpec) -> Result<String, IntakeError> {
        let data = json!({
            "intent": schema.intent.as_str(),
            "field": field_context(field),
        });
        self.render(NORMALIZE_FIELD, &data)
    }

    /// Render a named template with data
    pub fn render(&self, name: &str, data: &Value) -> Result<String, IntakeError> {
        self.handlebars
            .render(name, data)
            .map_err(|e| IntakeError::ConfigError(format!("failed to render prompt '{}': {}", name, e)))
    }
}

fn field_context(field: &FieldSpec) -> Value {
    json!({
        "name": field.name,
        "type": type_label(field.field_type),
        "required": field.required,
        "description": field.description,
        "one_of": field.one_of,
    })
}

fn type_label(field_type: FieldType) -> &'static str {
    match field_type {
        FieldType::String => "string",
        FieldType::Integer => "integer",
        FieldType::Number => "number",
        FieldType::Boolean => "boolean",
        FieldType::Date => "date",
        FieldType::Email => "email address",
        FieldType::List => "list",
        FieldType::Object => "object",
        FieldType::Any => "any",
    }
}

// ============================================================================
// Custom Helpers
// ============================================================================

/// Join an array with a separator
struct JoinHelper;

impl HelperDef for JoinHelper {
    fn call<'reg: 'rc, 'rc>(
        &self,
        h: &Helper<'rc>,
        _r: &'reg Handlebars<'reg>,
        _ctx: &'rc Context,
        _rc: &mut RenderContext<'reg, 'rc>,
        out: &mut dyn Output,
    ) -> HelperResult {
        let separator = h.param(1).and_then(|v| v.value().as_str()).unwrap_or(", ");

        if let Some(items) = h.param(0).and_then(|v| v.value().as_array()) {
            let strings: Vec<String> = items
                .iter()
                .map(|v| v.as_str().map(String::from).unwrap_or_else(|| v.to_string()))
                .collect();
            out.write(&strings.join(separator))?;
        }
        Ok(())
    }
}

/// Uppercase a string value
struct UpperHelper;

impl HelperDef for UpperHelper {
    fn call<'reg: 'rc, 'rc>(
        &self,
        h: &Helper<'rc>,
        _r: &'reg Handlebars<'reg>,
        _ctx: &'rc Context,
        _rc: &mut RenderContext<'reg, 'rc>,
        out: &mut dyn Output,
    ) -> HelperResult {
        let text = h.param(0).and_then(|v| v.value().as_str()).unwrap_or("");
        out.write(&text.to_uppercase())?;
        Ok(())
    }
}

/// First param unless it is null or empty, else the second
struct DefaultHelper;

impl HelperDef for DefaultHelper {
    fn call<'reg: 'rc, 'rc>(
        &self,
        h: &Helper<'rc>,
        _r: &'reg Handlebars<'reg>,
        _ctx: &'rc Context,
        _rc: &mut RenderContext<'reg, 'rc>,
        out: &mut dyn Output,
    ) -> HelperResult {
        let value = h.param(0).map(|v| v.value());
        let fallback = h.param(1).and_then(|v| v.value().as_str()).unwrap_or("");

        match value {
            Some(Value::String(s)) if !s.is_empty() => out.write(s)?,
            Some(Value::Null) | None => out.write(fallback)?,
            Some(Value::String(_)) => out.write(fallback)?,
            Some(other) => out.write(&other.to_string())?,
        }
        Ok(())
    }
}
