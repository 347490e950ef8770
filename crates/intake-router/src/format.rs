//! Format detection.
//!
//! Precedence, strongest signal first:
//! 1. Parses as a JSON object or array: STRUCTURED
//! 2. Header lines (`From:`, `Subject:`, ...) or a salutation plus a
//!    sign-off: COMMUNICATION
//! 3. Anything else: DOCUMENT (needs the text extractor)

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;

use crate::entities::{parse_headers, Header};

lazy_static! {
    static ref SALUTATION: Regex = Regex::new(
        r"(?im)^[ \t]*(dear|hi|hello|good (?:morning|afternoon|evening))\b[^\n]*,?[ \t]*$"
    ).unwrap();

    static ref SIGN_OFF: Regex = Regex::new(
        r"(?im)^[ \t]*(best regards|kind regards|regards|sincerely|best|thanks|thank you|cheers)[ \t]*,?[ \t]*$"
    ).unwrap();
}

/// Headers that mark a communication on their own. `Date:` and `Body:` only
/// count next to one of these.
const ADDRESS_HEADERS: [&str; 6] = ["from", "sender", "to", "cc", "subject", "reply-to"];

/// Result of inspecting a piece of text
#[derive(Debug, Clone, PartialEq)]
pub enum Detected {
    Structured(Value),
    Communication(Vec<Header>),
    Document,
}

/// Detect the format of decoded text
pub fn detect(text: &str) -> Detected {
    if let Some(value) = parse_structured(text) {
        return Detected::Structured(value);
    }

    let headers = parse_headers(text);
    if headers.iter().any(|h| ADDRESS_HEADERS.contains(&h.name.as_str())) {
        return Detected::Communication(headers);
    }

    if SALUTATION.is_match(text) && SIGN_OFF.is_match(text) {
        return Detected::Communication(headers);
    }

    Detected::Document
}

/// JSON object or array; scalars do not count as structured payloads.
pub fn parse_structured(text: &str) -> Option<Value> {
    let trimmed = text.trim_start_matches('\u{feff}').trim();
    if !(trimmed.starts_with('{') || trimmed.starts_with('[')) {
        return None;
    }
    serde_json::from_str::<Value>(trimmed)
        .ok()
        .filter(|v| v.is_object() || v.is_array())
}
