//! Offline structured-output capability.
//!
//! Fills schema properties from regex-level entities: header sender,
//! explicit urgency, quantities, amounts, dates, bullet lists. Deterministic
//! and never fails, so it is the default when no model is configured.

use async_trait::async_trait;
use intake_core::{GenerationError, GenerationRequest, StructuredGenerator};
use intake_router::entities::{self, Urgency};
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{json, Map, Value};

lazy_static! {
    static ref DISPLAY_NAME: Regex = Regex::new(r#"^\s*"?([^"<@]+?)"?\s*<[^>]+>\s*$"#).unwrap();
    static ref ITEMS_OF: Regex = Regex::new(
        r"(?i)\d[\d,]*\s*(?:units?|pcs|pieces|boxes|cases|pallets?|kg|tons?)\s+of\s+([^.,;\n]+)"
    ).unwrap();
    static ref BULLET: Regex = Regex::new(r"(?m)^\s*(?:[-*•]|\d+[.)])\s+(.+?)\s*$").unwrap();
    static ref INVOICE_NUMBER: Regex = Regex::new(
        r"(?i)\binvoice\s*(?:#|no\.?|number)\s*:?\s*([a-z0-9][a-z0-9-]*)"
    ).unwrap();
    static ref RFQ_NUMBER: Regex = Regex::new(
        r"(?i)\brfq\s*(?:#|no\.?|number)\s*:?\s*([a-z0-9][a-z0-9-]*)"
    ).unwrap();
    static ref ORDER_NUMBER: Regex = Regex::new(r"(?i)\border\s*(?:#|no\.?|number)?\s*:?\s*(\d[\w-]*)").unwrap();
    static ref COMPLAINT_ID: Regex = Regex::new(
        r"(?i)\b(?:complaint|ticket|case)\s*(?:#|no\.?|id|number)\s*:?\s*([a-z0-9][a-z0-9-]*)"
    ).unwrap();
    static ref SECTION: Regex = Regex::new(r"(?i)\b(?:section|article|clause)\s+(\d+(?:\.\d+)*)").unwrap();
    static ref SENTENCE_END: Regex = Regex::new(r"[.!?](?:\s|$)").unwrap();
}

/// Longest summary produced, in characters
const SUMMARY_CHARS: usize = 200;

/// Regex-driven stand-in for a language model
#[derive(Debug, Clone, Default)]
pub struct HeuristicGenerator;

impl HeuristicGenerator {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl StructuredGenerator for HeuristicGenerator {
    fn name(&self) -> &str {
        "heuristic"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<Value, GenerationError> {
        let properties = request
            .schema
            .get("properties")
            .and_then(Value::as_object)
            .ok_or_else(|| GenerationError::SchemaViolation("schema has no properties".into()))?;

        // Single-field normalization request
        if properties.len() == 1 && properties.contains_key("value") {
            return Ok(json!({ "value": tidy(&request.content) }));
        }

        let text = request.content.as_str();
        let reading = Reading::new(text);
        let answer: Map<String, Value> = properties
            .iter()
            .map(|(name, property)| (name.clone(), reading.field(name, property)))
            .collect();
        Ok(Value::Object(answer))
    }
}

/// Everything the heuristics read from one text, computed once
struct Reading<'t> {
    text: &'t str,
    headers: Vec<entities::Header>,
    body: String,
    dates: Vec<String>,
}

impl<'t> Reading<'t> {
    fn new(text: &'t str) -> Self {
        Self {
            text,
            headers: entities::parse_headers(text),
            body: entities::body_text(text),
            dates: entities::extract_dates(text),
        }
    }

    fn header(&self, name: &str) -> Option<&str> {
        entities::header_value(&self.headers, name).filter(|v| !v.is_empty())
    }

    fn field(&self, name: &str, property: &Value) -> Value {
        let value = match name {
            "sender" => entities::sender_email(self.text).map(Value::from),
            "urgency" => Some(Value::from(
                entities::explicit_urgency(self.text)
                    .unwrap_or(Urgency::Medium)
                    .as_str(),
            )),
            "summary" => self.summary().map(Value::from),
            "vendor" | "customer" | "requester" | "authority" => self.display_name().map(Value::from),
            "title" => self
                .header("subject")
                .map(String::from)
                .or_else(|| first_line(&self.body))
                .map(Value::from),
            "complaint_text" | "requirements" => non_empty(&self.body).map(Value::from),
            "items" => self.items().map(Value::from),
            "line_items" => self.bullets().map(Value::from),
            "invoice_number" => capture(&INVOICE_NUMBER, self.text).map(Value::from),
            "rfq_number" => capture(&RFQ_NUMBER, self.text).map(Value::from),
            "order_number" => capture(&ORDER_NUMBER, self.text).map(Value::from),
            "complaint_id" => capture(&COMPLAINT_ID, self.text).map(Value::from),
            "section" => capture(&SECTION, self.text).map(Value::from),
            "currency" => entities::largest_amount(self.text).map(|(_, c)| Value::from(c)),
            "due_date" => self.dates.get(1).cloned().map(Value::from),
            _ => self.by_type(property),
        };
        value.unwrap_or(Value::Null)
    }

    /// Fallback on the declared JSON type
    fn by_type(&self, property: &Value) -> Option<Value> {
        let declared = property.get("type").and_then(Value::as_str).unwrap_or("");
        let format = property.get("format").and_then(Value::as_str).unwrap_or("");

        match (declared, format) {
            ("string", "date") => self.dates.first().cloned().map(Value::from),
            ("string", "email") => entities::sender_email(self.text).map(Value::from),
            ("integer", _) => entities::first_quantity(self.text).map(|(n, _)| Value::from(n)),
            ("number", _) => entities::largest_amount(self.text).and_then(|(amount, _)| {
                serde_json::Number::from_f64(amount).map(Value::Number)
            }),
            ("array", _) => self.bullets().map(Value::from),
            _ => None,
        }
    }

    fn display_name(&self) -> Option<String> {
        let from = self.header("from").or_else(|| self.header("sender"))?;
        DISPLAY_NAME
            .captures(from)
            .map(|cap| cap[1].trim().to_string())
            .filter(|name| !name.is_empty())
    }

    fn summary(&self) -> Option<String> {
        let body = non_empty(&self.body).or_else(|| self.header("subject").map(String::from))?;
        let flat = body.split_whitespace().collect::<Vec<_>>().join(" ");
        let first = match SENTENCE_END.find(&flat) {
            Some(end) => flat[..end.start() + 1].to_string(),
            None => flat,
        };
        Some(first.chars().take(SUMMARY_CHARS).collect())
    }

    fn items(&self) -> Option<Vec<String>> {
        let named: Vec<String> = ITEMS_OF
            .captures_iter(self.text)
            .map(|cap| cap[1].trim().to_string())
            .filter(|item| !item.is_empty())
            .collect();
        if !named.is_empty() {
            return Some(named);
        }
        self.bullets()
    }

    fn bullets(&self) -> Option<Vec<String>> {
        let bullets: Vec<String> = BULLET
            .captures_iter(&self.body)
            .map(|cap| cap[1].to_string())
            .collect();
        (!bullets.is_empty()).then_some(bullets)
    }
}

/// Trimmed, inner whitespace collapsed, trailing punctuation dropped
fn tidy(raw: &str) -> Value {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    let cleaned = collapsed.trim_end_matches(&[',', ';', ':'][..]).trim();
    if cleaned.is_empty() {
        Value::Null
    } else {
        Value::from(cleaned)
    }
}

fn capture(pattern: &Regex, text: &str) -> Option<String> {
    pattern.captures(text).map(|cap| cap[1].to_string())
}

fn first_line(text: &str) -> Option<String> {
    text.lines().map(str::trim).find(|l| !l.is_empty()).map(String::from)
}

fn non_empty(text: &str) -> Option<String> {
    let trimmed = text.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use intake_core::Intent;
    use intake_schema::SchemaRegistry;

    fn request(intent: Intent, content: &str) -> GenerationRequest {
        let registry = SchemaRegistry::builtin();
        GenerationRequest {
            schema_name: intent.as_str().into(),
            schema: registry.get(intent).json_schema(),
            system_prompt: String::new(),
            content: content.into(),
            strict: false,
        }
    }

    #[tokio::test]
    async fn test_rfq_email() {
        let answer = HeuristicGenerator::new()
            .generate(&request(Intent::Rfq, "Subject: RFQ Request\nBody: We need 500 units of M8 bolts"))
            .await
            .unwrap();

        assert_eq!(answer["quantity"], 500);
        assert_eq!(answer["items"], json!(["M8 bolts"]));
        assert_eq!(answer["urgency"], "medium");
        assert_eq!(answer["sender"], Value::Null);
        assert_eq!(answer["summary"], "We need 500 units of M8 bolts");
    }

    #[tokio::test]
    async fn test_invoice_text() {
        let text = "From: Billing <ap@acme.example>\nSubject: Invoice #INV-77\n\nInvoice date: 2024-05-02\nTotal due: $1,250.00 by 2024-06-01.";
        let answer = HeuristicGenerator::new()
            .generate(&request(Intent::Invoice, text))
            .await
            .unwrap();

        assert_eq!(answer["sender"], "ap@acme.example");
        assert_eq!(answer["vendor"], "Billing");
        assert_eq!(answer["invoice_number"], "INV-77");
        assert_eq!(answer["total"], 1250.0);
        assert_eq!(answer["currency"], "USD");
        assert_eq!(answer["date"], "2024-05-02");
        assert_eq!(answer["due_date"], "2024-06-01");
    }

    #[tokio::test]
    async fn test_normalize_request() {
        let request = GenerationRequest {
            schema_name: "invoice.vendor".into(),
            schema: json!({"type": "object", "properties": {"value": {"type": "string"}}}),
            system_prompt: String::new(),
            content: "  ABC   Corp, ".into(),
            strict: false,
        };
        let answer = HeuristicGenerator::new().generate(&request).await.unwrap();
        assert_eq!(answer["value"], "ABC Corp");
    }

    #[tokio::test]
    async fn test_deterministic() {
        let generator = HeuristicGenerator::new();
        let req = request(Intent::Complaint, "Dear team,\nOrder #5521 arrived broken.\nRegards,\nPat");
        let first = generator.generate(&req).await.unwrap();
        let second = generator.generate(&req).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first["order_number"], "5521");
    }
}
