//! Entity extraction from communications and documents.
//!
//! Extracts structured entities from text:
//! - Header lines (`From:`, `Subject:`, ...)
//! - Email addresses
//! - Quantities (`500 units`)
//! - Money amounts (`$1,200.50`, `300 EUR`)
//! - Dates (ISO, `03/14/2024`, `March 14, 2024`)
//! - Urgency markers

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

lazy_static! {
    /// Header-like line at the start of a line
    static ref HEADER_LINE: Regex = Regex::new(
        r"(?im)^[ \t]*(from|to|cc|bcc|subject|sender|reply-to|date|body)[ \t]*:[ \t]*(.*)$"
    ).unwrap();

    /// `Body:` marker and everything after it
    static ref BODY: Regex = Regex::new(r"(?ims)^[ \t]*body[ \t]*:(.*)").unwrap();

    static ref EMAIL: Regex = Regex::new(
        r"(?i)\b[a-z0-9._%+-]+@[a-z0-9.-]+\.[a-z]{2,}\b"
    ).unwrap();

    static ref QUANTITY: Regex = Regex::new(
        r"(?i)\b(\d[\d,]*)\s*(units?|pcs|pieces|items|boxes|cases|pallets?|kg|tons?|liters?|litres?)\b"
    ).unwrap();

    static ref MONEY_PREFIX: Regex = Regex::new(
        r"([$€£])\s?(\d[\d,]*(?:\.\d+)?)"
    ).unwrap();

    static ref MONEY_SUFFIX: Regex = Regex::new(
        r"(?i)\b(\d[\d,]*(?:\.\d+)?)\s?(usd|eur|gbp|inr)\b"
    ).unwrap();

    static ref ISO_DATE: Regex = Regex::new(r"\b(\d{4})-(\d{2})-(\d{2})\b").unwrap();

    static ref SLASH_DATE: Regex = Regex::new(r"\b(\d{1,2})/(\d{1,2})/(\d{4})\b").unwrap();

    static ref LONG_DATE: Regex = Regex::new(
        r"(?i)\b(january|february|march|april|may|june|july|august|september|october|november|december)\s+(\d{1,2})(?:st|nd|rd|th)?,?\s+(\d{4})\b"
    ).unwrap();

    /// Urgency markers, most urgent level first
    static ref URGENCY_MARKERS: Vec<(Urgency, Regex)> = vec![
        (Urgency::Critical, Regex::new(
            r"(?i)\b(critical|emergency|immediately|right away|production (?:is )?down|safety hazard)\b"
        ).unwrap()),
        (Urgency::High, Regex::new(
            r"(?i)\b(urgent|urgently|asap|as soon as possible|high priority|priority:\s*high|time[- ]sensitive)\b"
        ).unwrap()),
        (Urgency::Medium, Regex::new(
            r"(?i)\b(soon|this week|by end of (?:the )?week|at your earliest convenience|priority:\s*medium)\b"
        ).unwrap()),
        (Urgency::Low, Regex::new(
            r"(?i)\b(no rush|not urgent|whenever convenient|low priority|priority:\s*low|fyi|for your information)\b"
        ).unwrap()),
    ];
}

/// Urgency level of a communication
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    Low,
    Medium,
    High,
    Critical,
}

impl Urgency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" | "normal" => Some(Self::Medium),
            "high" | "urgent" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

impl fmt::Display for Urgency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A header line of a communication
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// Lowercase header name
    pub name: String,
    pub value: String,
}

/// An extracted entity
#[derive(Debug, Clone, PartialEq)]
pub enum Entity {
    Email(String),
    Quantity { value: u64, unit: String },
    Money { amount: f64, currency: String },
    /// ISO `YYYY-MM-DD`
    Date(String),
}

/// Extract all entities from text
pub fn extract_entities(text: &str) -> Vec<Entity> {
    let mut entities = Vec::new();

    for m in EMAIL.find_iter(text) {
        entities.push(Entity::Email(m.as_str().to_lowercase()));
    }

    for cap in QUANTITY.captures_iter(text) {
        if let Some(value) = parse_integer(&cap[1]) {
            entities.push(Entity::Quantity {
                value,
                unit: cap[2].to_lowercase(),
            });
        }
    }

    entities.extend(extract_money(text));
    entities.extend(extract_dates(text).into_iter().map(Entity::Date));
    entities
}

/// Header lines in order of appearance
pub fn parse_headers(text: &str) -> Vec<Header> {
    HEADER_LINE
        .captures_iter(text)
        .map(|cap| Header {
            name: cap[1].to_lowercase(),
            value: cap[2].trim().to_string(),
        })
        .collect()
}

/// First header value with the given (lowercase) name
pub fn header_value<'h>(headers: &'h [Header], name: &str) -> Option<&'h str> {
    headers
        .iter()
        .find(|h| h.name == name)
        .map(|h| h.value.as_str())
}

/// Text after the header block: the `Body:` value when present, otherwise
/// the non-header lines.
pub fn body_text(text: &str) -> String {
    if let Some(cap) = BODY.captures(text) {
        return cap[1].trim().to_string();
    }

    text.lines()
        .filter(|line| !HEADER_LINE.is_match(line))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Sender address: `From:`/`Sender:`/`Reply-To:` headers first, then the
/// first address anywhere in the text.
pub fn sender_email(text: &str) -> Option<String> {
    let headers = parse_headers(text);
    ["from", "sender", "reply-to"]
        .iter()
        .filter_map(|name| header_value(&headers, name))
        .find_map(|value| EMAIL.find(value))
        .or_else(|| EMAIL.find(text))
        .map(|m| m.as_str().to_lowercase())
}

/// Most urgent explicit marker in the text
pub fn explicit_urgency(text: &str) -> Option<Urgency> {
    URGENCY_MARKERS
        .iter()
        .find(|(_, pattern)| pattern.is_match(text))
        .map(|(level, _)| *level)
}

/// First quantity in the text
pub fn first_quantity(text: &str) -> Option<(u64, String)> {
    extract_entities(text).into_iter().find_map(|e| match e {
        Entity::Quantity { value, unit } => Some((value, unit)),
        _ => None,
    })
}

/// Largest money amount in the text, with its currency code
pub fn largest_amount(text: &str) -> Option<(f64, String)> {
    extract_money(text)
        .into_iter()
        .filter_map(|e| match e {
            Entity::Money { amount, currency } => Some((amount, currency)),
            _ => None,
        })
        .fold(None, |best: Option<(f64, String)>, (amount, currency)| match best {
            Some((top, _)) if top >= amount => best,
            _ => Some((amount, currency)),
        })
}

/// Dates in order of appearance, as ISO strings
pub fn extract_dates(text: &str) -> Vec<String> {
    let mut found: Vec<(usize, String)> = Vec::new();

    for cap in ISO_DATE.captures_iter(text) {
        if let Some(date) = iso_date(&cap[1], &cap[2], &cap[3]) {
            found.push((cap.get(0).map_or(0, |m| m.start()), date));
        }
    }
    // Month first, as in "03/14/2024"
    for cap in SLASH_DATE.captures_iter(text) {
        if let Some(date) = iso_date(&cap[3], &cap[1], &cap[2]) {
            found.push((cap.get(0).map_or(0, |m| m.start()), date));
        }
    }
    for cap in LONG_DATE.captures_iter(text) {
        let month = month_number(&cap[1]);
        if let Some(date) = iso_date(&cap[3], &month.to_string(), &cap[2]) {
            found.push((cap.get(0).map_or(0, |m| m.start()), date));
        }
    }

    found.sort_by_key(|(pos, _)| *pos);
    found.into_iter().map(|(_, date)| date).collect()
}

/// Parse a date in any recognized form into `YYYY-MM-DD`
pub fn parse_date(value: &str) -> Option<String> {
    extract_dates(value.trim()).into_iter().next()
}

fn extract_money(text: &str) -> Vec<Entity> {
    let mut money = Vec::new();
    for cap in MONEY_PREFIX.captures_iter(text) {
        if let Some(amount) = parse_amount(&cap[2]) {
            let currency = match &cap[1] {
                "€" => "EUR",
                "£" => "GBP",
                _ => "USD",
            };
            money.push(Entity::Money {
                amount,
                currency: currency.to_string(),
            });
        }
    }
    for cap in MONEY_SUFFIX.captures_iter(text) {
        if let Some(amount) = parse_amount(&cap[1]) {
            money.push(Entity::Money {
                amount,
                currency: cap[2].to_uppercase(),
            });
        }
    }
    money
}

fn parse_integer(raw: &str) -> Option<u64> {
    raw.replace(',', "").parse().ok()
}

fn parse_amount(raw: &str) -> Option<f64> {
    raw.replace(',', "").parse().ok()
}

fn month_number(name: &str) -> u32 {
    const MONTHS: [&str; 12] = [
        "january", "february", "march", "april", "may", "june", "july", "august", "september",
        "october", "november", "december",
    ];
    let lower = name.to_lowercase();
    MONTHS
        .iter()
        .position(|m| *m == lower)
        .map_or(0, |i| i as u32 + 1)
}

fn iso_date(year: &str, month: &str, day: &str) -> Option<String> {
    let year: u32 = year.parse().ok()?;
    let month: u32 = month.parse().ok()?;
    let day: u32 = day.parse().ok()?;
    if !(1..=12).contains(&month) || !(1..=31).contains(&day) {
        return None;
    }
    Some(format!("{:04}-{:02}-{:02}", year, month, day))
}

#[cfg(test)]
mod tests {
    use super::*;

    const RFQ_MAIL: &str = "From: Dana Reyes <dana@buyer.example>\nSubject: RFQ request\nBody: We need 500 units of M8 bolts by 2024-07-01. Urgent.";

    #[test]
    fn test_header_parsing() {
        let headers = parse_headers(RFQ_MAIL);
        assert_eq!(headers.len(), 3);
        assert_eq!(header_value(&headers, "subject"), Some("RFQ request"));
        assert_eq!(
            body_text(RFQ_MAIL),
            "We need 500 units of M8 bolts by 2024-07-01. Urgent."
        );
    }

    #[test]
    fn test_sender_prefers_from_header() {
        let text = "From: dana@buyer.example\nBody: cc ops@seller.example";
        assert_eq!(sender_email(text), Some("dana@buyer.example".into()));
        assert_eq!(sender_email("no address here"), None);
    }

    #[test]
    fn test_quantity_extraction() {
        assert_eq!(first_quantity(RFQ_MAIL), Some((500, "units".into())));
        assert_eq!(first_quantity("ship 1,200 pcs"), Some((1200, "pcs".into())));
    }

    #[test]
    fn test_money_extraction() {
        let (amount, currency) = largest_amount("Subtotal $1,000.00, total $1,200.50").unwrap();
        assert_eq!(amount, 1200.5);
        assert_eq!(currency, "USD");
        assert_eq!(largest_amount("due: 300 eur").unwrap().1, "EUR");
    }

    #[test]
    fn test_date_forms() {
        assert_eq!(parse_date("2024-03-14"), Some("2024-03-14".into()));
        assert_eq!(parse_date("03/14/2024"), Some("2024-03-14".into()));
        assert_eq!(parse_date("March 14th, 2024"), Some("2024-03-14".into()));
        assert_eq!(parse_date("next tuesday"), None);
    }

    #[test]
    fn test_explicit_urgency_takes_most_urgent() {
        assert_eq!(explicit_urgency(RFQ_MAIL), Some(Urgency::High));
        assert_eq!(
            explicit_urgency("No rush, but production is down"),
            Some(Urgency::Critical)
        );
        assert_eq!(explicit_urgency("Hello there"), None);
    }
}
