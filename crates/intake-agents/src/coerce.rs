//! Value coercion and schema validation shared by both agents.
//!
//! Unambiguous values are converted to the declared field type; anything
//! else is kept raw and flagged. Nothing here fails a whole record.

use intake_core::{AnomalyKind, RecordBuilder};
use intake_router::entities;
use intake_schema::{is_discriminator, FieldSpec, FieldType, IntentSchema};
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{Map, Number, Value};
use thiserror::Error;

lazy_static! {
    /// "1,200", "500 units", "12.0"
    static ref LEADING_INTEGER: Regex = Regex::new(
        r"(?i)^\s*(-?\d[\d,]*)(?:\.0+)?\s*[a-z]*\s*$"
    ).unwrap();

    /// "$1,200.50", "1200 USD", "EUR 300"
    static ref AMOUNT: Regex = Regex::new(
        r"(?i)^\s*(?:[$€£]|usd|eur|gbp|inr)?\s*(-?\d[\d,]*(?:\.\d+)?)\s*(?:usd|eur|gbp|inr)?\s*$"
    ).unwrap();

    static ref LIST_SEPARATOR: Regex = Regex::new(r"[,;\n]").unwrap();
}

/// Why a value could not take its declared type
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoercionError {
    /// Wrong shape altogether (an object where a number belongs)
    #[error("SHAPE: expected {expected}, found {found}")]
    Shape { expected: &'static str, found: &'static str },

    /// Right shape, but the content does not read as the type
    #[error("UNPARSEABLE: '{value}' is not a valid {expected}")]
    Unparseable { expected: &'static str, value: String },

    #[error("NOT_ALLOWED: '{value}' is not one of {allowed:?}")]
    NotAllowed { value: String, allowed: Vec<String> },
}

impl CoercionError {
    /// Anomaly recorded for a field that failed with this error
    pub fn anomaly(&self) -> AnomalyKind {
        match self {
            Self::Shape { .. } => AnomalyKind::Invalid,
            Self::Unparseable { .. } | Self::NotAllowed { .. } => AnomalyKind::Uncoercible,
        }
    }
}

/// Null, blank strings and empty lists mean "not stated".
pub fn is_absent(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

/// Coerce a present value to the field's declared type.
pub fn coerce(value: &Value, field: &FieldSpec) -> Result<Value, CoercionError> {
    let coerced = match field.field_type {
        FieldType::String => to_string(value)?,
        FieldType::Integer => to_integer(value)?,
        FieldType::Number => to_number(value)?,
        FieldType::Boolean => to_boolean(value)?,
        FieldType::Date => to_date(value)?,
        FieldType::Email => to_email(value)?,
        FieldType::List => to_list(value),
        FieldType::Object => match value {
            Value::Object(_) => value.clone(),
            other => return Err(shape("object", other)),
        },
        FieldType::Any => value.clone(),
    };

    if field.one_of.is_empty() {
        return Ok(coerced);
    }
    let lowered = coerced.as_str().map(|s| s.trim().to_lowercase());
    match lowered {
        Some(v) if field.one_of.contains(&v) => Ok(Value::String(v)),
        _ => Err(CoercionError::NotAllowed {
            value: display(&coerced),
            allowed: field.one_of.clone(),
        }),
    }
}

/// Fold a mapping into `builder` under `schema`.
///
/// Keys resolve through names and aliases; discriminators are dropped;
/// undeclared keys are kept and flagged `unexpected`; absent required
/// fields are flagged `missing`.
pub fn apply_schema(mapping: &Map<String, Value>, schema: &IntentSchema, builder: &mut RecordBuilder) {
    // Exact field names first, so an alias never shadows the real key
    let (direct, aliased): (Vec<_>, Vec<_>) = mapping
        .iter()
        .filter(|(key, _)| !is_discriminator(key))
        .partition(|(key, _)| schema.declares(key));

    for (key, value) in direct.into_iter().chain(aliased) {
        let Some(field) = schema.resolve_key(key) else {
            builder.field(key.clone(), value.clone());
            builder.flag(key.clone(), AnomalyKind::Unexpected);
            continue;
        };

        if is_absent(value) {
            continue;
        }
        if builder.has_field(&field.name) {
            // Same field under a second alias; keep the duplicate visible
            builder.field(key.clone(), value.clone());
            builder.flag(key.clone(), AnomalyKind::Unexpected);
            continue;
        }

        match coerce(value, field) {
            Ok(coerced) => {
                builder.field(field.name.clone(), coerced);
            }
            Err(err) => {
                tracing::debug!(
                    target: "intake::agent",
                    field = %field.name,
                    error = %err,
                    "field kept raw"
                );
                builder.field(field.name.clone(), value.clone());
                builder.flag(field.name.clone(), err.anomaly());
            }
        }
    }

    for field in schema.required_fields() {
        if !builder.has_field(&field.name) {
            builder.flag(field.name.clone(), AnomalyKind::Missing);
        }
    }
}

fn to_string(value: &Value) -> Result<Value, CoercionError> {
    match value {
        Value::String(s) => Ok(Value::String(s.trim().to_string())),
        Value::Number(n) => Ok(Value::String(n.to_string())),
        Value::Bool(b) => Ok(Value::String(b.to_string())),
        other => Err(shape("string", other)),
    }
}

fn to_integer(value: &Value) -> Result<Value, CoercionError> {
    match value {
        Value::Number(n) if n.is_i64() || n.is_u64() => Ok(value.clone()),
        Value::Number(n) => match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f.abs() < 9.0e15 => Ok(Value::from(f as i64)),
            _ => Err(unparseable("integer", value)),
        },
        Value::String(s) => LEADING_INTEGER
            .captures(s)
            .and_then(|cap| cap[1].replace(',', "").parse::<i64>().ok())
            .map(Value::from)
            .ok_or_else(|| unparseable("integer", value)),
        other => Err(shape("integer", other)),
    }
}

fn to_number(value: &Value) -> Result<Value, CoercionError> {
    match value {
        Value::Number(_) => Ok(value.clone()),
        Value::String(s) => AMOUNT
            .captures(s)
            .and_then(|cap| cap[1].replace(',', "").parse::<f64>().ok())
            .and_then(number_value)
            .ok_or_else(|| unparseable("number", value)),
        other => Err(shape("number", other)),
    }
}

/// Whole amounts stay integers so `1200` does not turn into `1200.0`.
fn number_value(f: f64) -> Option<Value> {
    if f.fract() == 0.0 && f.abs() < 9.0e15 {
        Some(Value::from(f as i64))
    } else {
        Number::from_f64(f).map(Value::Number)
    }
}

fn to_boolean(value: &Value) -> Result<Value, CoercionError> {
    match value {
        Value::Bool(_) => Ok(value.clone()),
        Value::Number(n) => match n.as_i64() {
            Some(0) => Ok(Value::Bool(false)),
            Some(1) => Ok(Value::Bool(true)),
            _ => Err(unparseable("boolean", value)),
        },
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "yes" | "y" | "true" | "1" => Ok(Value::Bool(true)),
            "no" | "n" | "false" | "0" => Ok(Value::Bool(false)),
            _ => Err(unparseable("boolean", value)),
        },
        other => Err(shape("boolean", other)),
    }
}

fn to_date(value: &Value) -> Result<Value, CoercionError> {
    match value {
        Value::String(s) => entities::parse_date(s)
            .map(Value::String)
            .ok_or_else(|| unparseable("date", value)),
        Value::Number(_) => Err(unparseable("date", value)),
        other => Err(shape("date", other)),
    }
}

fn to_email(value: &Value) -> Result<Value, CoercionError> {
    match value {
        Value::String(s) => entities::extract_entities(s)
            .into_iter()
            .find_map(|e| match e {
                entities::Entity::Email(address) => Some(Value::String(address)),
                _ => None,
            })
            .ok_or_else(|| unparseable("email address", value)),
        other => Err(shape("email address", other)),
    }
}

fn to_list(value: &Value) -> Value {
    match value {
        Value::Array(_) => value.clone(),
        Value::String(s) => Value::Array(
            LIST_SEPARATOR
                .split(s)
                .map(|part| part.trim().trim_start_matches(&['-', '*'][..]).trim())
                .filter(|part| !part.is_empty())
                .map(|part| Value::String(part.to_string()))
                .collect(),
        ),
        other => Value::Array(vec![other.clone()]),
    }
}

fn shape(expected: &'static str, found: &Value) -> CoercionError {
    CoercionError::Shape {
        expected,
        found: kind_of(found),
    }
}

fn unparseable(expected: &'static str, value: &Value) -> CoercionError {
    CoercionError::Unparseable {
        expected,
        value: display(value),
    }
}

fn display(value: &Value) -> String {
    value
        .as_str()
        .map(String::from)
        .unwrap_or_else(|| value.to_string())
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}
