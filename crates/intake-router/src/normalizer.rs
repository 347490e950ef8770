//! Text normalization for intent matching.
//!
//! Normalizes input before markers are scanned:
//! - Lowercase conversion
//! - Whitespace normalization
//! - Expansion of contractions
//! - Business abbreviations (`r.f.q.`, `inv #`, `pls`)
//!
//! Structured payloads are flattened into the same text form so one set of
//! markers serves every format.

use intake_schema::{canonical_key, is_discriminator};
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;

lazy_static! {
    /// Contractions and their expansions, so "doesn't work" matches "does not work"
    static ref CONTRACTIONS: Vec<(&'static str, &'static str)> = vec![
        ("can't", "cannot"),
        ("won't", "will not"),
        ("don't", "do not"),
        ("doesn't", "does not"),
        ("didn't", "did not"),
        ("isn't", "is not"),
        ("aren't", "are not"),
        ("wasn't", "was not"),
        ("haven't", "have not"),
        ("hasn't", "has not"),
        ("i'm", "i am"),
        ("we're", "we are"),
        ("it's", "it is"),
        ("we've", "we have"),
        ("i'd", "i would"),
        ("we'd", "we would"),
    ];

    /// Business abbreviations, matched on word boundaries
    static ref ABBREVIATIONS: Vec<(Regex, &'static str)> = vec![
        (Regex::new(r"\br\.f\.q\.?").unwrap(), "rfq"),
        (Regex::new(r"\breq(?:uest)?\.? for quote\b").unwrap(), "request for quote"),
        (Regex::new(r"\binv\.?\s*#").unwrap(), "invoice #"),
        (Regex::new(r"\binv\.? no\b").unwrap(), "invoice no"),
        (Regex::new(r"\bpls\b|\bplz\b").unwrap(), "please"),
        (Regex::new(r"\bqty\b").unwrap(), "quantity"),
        (Regex::new(r"\bamt\b").unwrap(), "amount"),
        (Regex::new(r"\breg\.? ").unwrap(), "regulation "),
    ];

    /// Curly quotes that would defeat the contraction table
    static ref SMART_QUOTES: Regex = Regex::new(r"[\u{2018}\u{2019}\u{02BC}]").unwrap();

    /// Multiple whitespace pattern
    static ref MULTI_SPACE: Regex = Regex::new(r"\s+").unwrap();
}

/// Normalize text for marker matching
pub fn normalize(text: &str) -> String {
    let mut result = text.to_lowercase();
    result = SMART_QUOTES.replace_all(&result, "'").into_owned();

    for (contraction, expansion) in CONTRACTIONS.iter() {
        result = result.replace(contraction, expansion);
    }

    for (pattern, expansion) in ABBREVIATIONS.iter() {
        result = pattern.replace_all(&result, *expansion).into_owned();
    }

    MULTI_SPACE.replace_all(result.trim(), " ").into_owned()
}

/// Flatten a structured payload into scannable text: keys (with underscores
/// spelled as spaces) followed by scalar values, depth first.
pub fn flatten_structured(value: &Value) -> String {
    let mut parts = Vec::new();
    flatten_into(value, &mut parts);
    normalize(&parts.join(" "))
}

fn flatten_into(value: &Value, parts: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            for (key, inner) in map {
                parts.push(canonical_key(key).replace('_', " "));
                flatten_into(inner, parts);
            }
        }
        Value::Array(items) => {
            for item in items {
                flatten_into(item, parts);
            }
        }
        Value::String(s) => parts.push(s.clone()),
        Value::Number(n) => parts.push(n.to_string()),
        Value::Bool(_) | Value::Null => {}
    }
}

/// Canonical keys of a structured payload at every depth, discriminators
/// excluded.
pub fn structured_keys(value: &Value) -> Vec<String> {
    let mut keys = Vec::new();
    collect_keys(value, &mut keys);
    keys.sort();
    keys.dedup();
    keys
}

fn collect_keys(value: &Value, keys: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            for (key, inner) in map {
                if !is_discriminator(key) {
                    keys.push(canonical_key(key));
                }
                collect_keys(inner, keys);
            }
        }
        Value::Array(items) => items.iter().for_each(|item| collect_keys(item, keys)),
        _ => {}
    }
}

/// Values of top-level discriminator keys (`"type": "invoice"`), normalized.
pub fn discriminator_values(value: &Value) -> Vec<String> {
    let mut values: Vec<String> = match value {
        Value::Object(map) => map
            .iter()
            .filter(|(key, _)| is_discriminator(key))
            .filter_map(|(_, v)| v.as_str())
            .map(canonical_key)
            .collect(),
        // A batch is typed by its records
        Value::Array(items) => items
            .iter()
            .filter(|item| item.is_object())
            .flat_map(discriminator_values)
            .collect(),
        _ => Vec::new(),
    };
    values.sort();
    values.dedup();
    values
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_basic_normalization() {
        assert_eq!(normalize("  Invoice   ATTACHED  "), "invoice attached");
        assert_eq!(normalize("It doesn\u{2019}t work"), "it does not work");
    }

    #[test]
    fn test_abbreviation_expansion() {
        assert_eq!(normalize("R.F.Q. for bolts"), "rfq for bolts");
        assert_eq!(normalize("Inv #4411 attached"), "invoice #4411 attached");
        assert_eq!(normalize("pls send qty"), "please send quantity");
    }

    #[test]
    fn test_flatten_structured() {
        let payload = json!({"type": "invoice", "Total Amount": 1200, "items": [{"name": "bolts"}]});
        let text = flatten_structured(&payload);
        assert!(text.contains("invoice"));
        assert!(text.contains("total amount 1200"));
        assert!(text.contains("name bolts"));
    }

    #[test]
    fn test_structured_keys_skip_discriminators() {
        let payload = json!({"type": "invoice", "vendor": "ABC", "line-items": [{"sku": "1"}]});
        assert_eq!(structured_keys(&payload), vec!["line_items", "sku", "vendor"]);
        assert_eq!(discriminator_values(&payload), vec!["invoice"]);
    }

    #[test]
    fn test_batch_discriminators_come_from_records() {
        let batch = json!([{"type": "invoice", "total": 1}, {"type": "Invoice", "total": 2}, "note"]);
        assert_eq!(discriminator_values(&batch), vec!["invoice"]);
        assert!(discriminator_values(&json!([1, 2])).is_empty());
    }
}
