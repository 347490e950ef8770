//! Intake Schema: the expected shape of each intent
//!
//! Leaf dependency of the engine and the agents. Every intent, UNKNOWN
//! included, has a schema; agents validate extracted mappings against it and
//! the structured-output capability receives it as the target shape.

pub mod field;
pub mod registry;

pub use field::{canonical_key, FieldSpec, FieldType};
pub use registry::{IntentSchema, SchemaFile, SchemaRegistry};

/// Payload keys that name the intent instead of carrying data. The engine
/// reads them for intent detection; agents drop them before validation.
pub const DISCRIMINATOR_KEYS: [&str; 4] = ["type", "intent", "kind", "document_type"];

pub fn is_discriminator(key: &str) -> bool {
    let key = canonical_key(key);
    DISCRIMINATOR_KEYS.contains(&key.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discriminator_keys() {
        assert!(is_discriminator("Type"));
        assert!(is_discriminator("document-type"));
        assert!(!is_discriminator("vendor"));
    }
}
