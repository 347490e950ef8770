//! Integration tests for intake-router with the real marker grammar file.
//!
//! These tests run the full classify-and-route path over realistic inputs
//! using grammars/intent-markers.yaml as loaded from disk.

use intake_core::testing::StaticTextExtractor;
use intake_core::{InputFormat, IntakeError, Intent, PdfTextExtractor, RawInput};
use intake_router::{AgentKind, MarkerGrammar, RoutingEngine, MAX_DOCUMENT_REDIRECTS};
use proptest::prelude::*;
use std::sync::Arc;

/// Path to the marker file relative to the workspace root
const MARKERS_PATH: &str = "grammars/intent-markers.yaml";

fn markers_path() -> String {
    let manifest_dir = std::env::var("CARGO_MANIFEST_DIR").unwrap();
    let workspace_root = std::path::Path::new(&manifest_dir)
        .parent()
        .unwrap()
        .parent()
        .unwrap();
    workspace_root.join(MARKERS_PATH).to_string_lossy().to_string()
}

fn engine() -> RoutingEngine {
    let markers = MarkerGrammar::load(&markers_path()).unwrap();
    RoutingEngine::new(markers, Arc::new(PdfTextExtractor::default()))
}

// =============================================================================
// Structured payloads
// =============================================================================

#[test]
fn test_invoice_payload() {
    let raw = RawInput::text(r#"{"type": "invoice", "vendor": "ABC Corp", "total": 1200}"#);
    let (classification, handle) = engine().classify_and_route(&raw).unwrap();

    assert_eq!(classification.format, InputFormat::Structured);
    assert_eq!(classification.intent, Intent::Invoice);
    assert!(classification.confidence > 0.9);
    assert_eq!(handle.kind, AgentKind::Structured);
}

#[test]
fn test_payload_intent_from_keys_alone() {
    let raw = RawInput::text(
        r#"{"rfq_number": "Q-88", "requested_items": ["bolts"], "quantity": 40, "deadline": "2024-08-01"}"#,
    );
    let classification = engine().classify(&raw).unwrap();
    assert_eq!(classification.intent, Intent::Rfq);
}

#[test]
fn test_payload_without_markers_is_unknown() {
    let raw = RawInput::text(r#"{"temperature": 21.5, "room": "B2"}"#);
    let (classification, handle) = engine().classify_and_route(&raw).unwrap();

    assert_eq!(classification.format, InputFormat::Structured);
    assert_eq!(classification.intent, Intent::Unknown);
    assert!(classification.confidence < 0.6);
    assert_eq!(handle.kind, AgentKind::Communication);
    assert_eq!(handle.payload, r#"{"temperature": 21.5, "room": "B2"}"#);
}

// =============================================================================
// Communications
// =============================================================================

#[test]
fn test_rfq_email() {
    let raw = RawInput::text("Subject: RFQ request\nBody: We need 500 units");
    let (classification, handle) = engine().classify_and_route(&raw).unwrap();

    assert_eq!(classification.format, InputFormat::Communication);
    assert_eq!(classification.intent, Intent::Rfq);
    assert!(classification.confidence >= 0.6 && classification.confidence < 1.0);
    assert_eq!(handle.kind, AgentKind::Communication);
}

#[test]
fn test_complaint_email() {
    let raw = RawInput::text(
        "From: pat@customer.example\nSubject: Order #5521\n\nThe blender arrived damaged and does not work. I want a refund.",
    );
    let classification = engine().classify(&raw).unwrap();
    assert_eq!(classification.intent, Intent::Complaint);
}

#[test]
fn test_regulation_notice() {
    let raw = RawInput::text(
        "From: compliance@agency.example\nSubject: New labeling regulation\n\nAll suppliers must comply with Section 4.2 effective January 1, 2025.",
    );
    let classification = engine().classify(&raw).unwrap();
    assert_eq!(classification.intent, Intent::Regulation);
}

#[test]
fn test_casual_email_is_unknown() {
    let raw = RawInput::text("From: sam@team.example\nSubject: lunch\n\nAre we still on for tomorrow?");
    let classification = engine().classify(&raw).unwrap();
    assert_eq!(classification.format, InputFormat::Communication);
    assert_eq!(classification.intent, Intent::Unknown);
}

// =============================================================================
// Documents
// =============================================================================

#[test]
fn test_unreadable_document_is_unroutable() {
    let raw = RawInput::bytes(vec![0x89, 0x50, 0x4E, 0x47, 0x00, 0x00, 0xFF, 0xD8, 0xC3, 0x28])
        .with_declared_format(InputFormat::Document);
    let err = engine().classify_and_route(&raw).unwrap_err();
    assert!(matches!(err, IntakeError::UnroutableInput(_)));
    assert_eq!(err.code(), "unroutable_input");
}

#[test]
fn test_extractor_failure_is_unroutable() {
    let engine = RoutingEngine::new(
        MarkerGrammar::load(&markers_path()).unwrap(),
        Arc::new(StaticTextExtractor::failing("encrypted PDF")),
    );
    let raw = RawInput::bytes(b"%PDF-1.4".to_vec());
    let err = engine.classify(&raw).unwrap_err();
    assert!(err.to_string().contains("encrypted PDF"));
}

#[test]
fn test_document_yielding_json_routes_to_structured() {
    let engine = RoutingEngine::new(
        MarkerGrammar::load(&markers_path()).unwrap(),
        Arc::new(StaticTextExtractor::yielding(r#"{"type": "complaint", "customer": "Pat"}"#)),
    );
    let raw = RawInput::bytes(b"%PDF-1.4".to_vec()).with_declared_format(InputFormat::Document);
    let (classification, handle) = engine.classify_and_route(&raw).unwrap();

    assert_eq!(classification.format, InputFormat::Structured);
    assert_eq!(classification.intent, Intent::Complaint);
    assert_eq!(handle.kind, AgentKind::Structured);
    assert_eq!(handle.redirects, MAX_DOCUMENT_REDIRECTS);
}

/// One-page PDF with a single line of text.
fn pdf_with_text(text: &str) -> Vec<u8> {
    use lopdf::{dictionary, Document, Object, Stream};

    let mut doc = Document::with_version("1.4");
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let content = format!("BT /F1 12 Tf 72 720 Td ({}) Tj ET", text);
    let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        "Contents" => content_id,
        "Resources" => dictionary! { "Font" => dictionary! { "F1" => font_id } },
    });
    let pages_id = doc.add_object(dictionary! {
        "Type" => "Pages",
        "Kids" => vec![page_id.into()],
        "Count" => 1,
    });
    if let Ok(Object::Dictionary(page)) = doc.get_object_mut(page_id) {
        page.set("Parent", pages_id);
    }
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut buf = Vec::new();
    doc.save_to(&mut buf).unwrap();
    buf
}

#[test]
fn test_pdf_document_is_classified_from_its_text() {
    let raw = RawInput::bytes(pdf_with_text("Invoice total 1200 USD"))
        .with_declared_format(InputFormat::Document);
    let (classification, handle) = engine().classify_and_route(&raw).unwrap();

    assert_eq!(classification.format, InputFormat::Document);
    assert_eq!(classification.intent, Intent::Invoice);
    assert_eq!(handle.kind, AgentKind::Communication);
    assert_eq!(handle.redirects, 1);
    assert!(handle.payload.contains("1200 USD"), "got: {}", handle.payload);
}

#[test]
fn test_pdf_without_declared_format_is_detected() {
    let raw = RawInput::bytes(pdf_with_text("Invoice total 1200 USD"));
    let (classification, _) = engine().classify_and_route(&raw).unwrap();

    assert_eq!(classification.format, InputFormat::Document);
    assert_eq!(classification.intent, Intent::Invoice);
}

#[test]
fn test_plain_prose_goes_through_extractor() {
    let raw = RawInput::text("Please find the updated compliance standards for 2025 below.");
    let (classification, handle) = engine().classify_and_route(&raw).unwrap();

    assert_eq!(classification.format, InputFormat::Document);
    assert_eq!(handle.kind, AgentKind::Communication);
    assert_eq!(handle.redirects, 1);
}

// =============================================================================
// Properties
// =============================================================================

proptest! {
    #[test]
    fn prop_classification_is_deterministic(text in "\\PC{0,200}") {
        let engine = engine();
        let raw = RawInput::text(text);
        let first = engine.classify_and_route(&raw);
        let second = engine.classify_and_route(&raw);
        match (first, second) {
            (Ok(a), Ok(b)) => prop_assert_eq!(a, b),
            (Err(a), Err(b)) => prop_assert_eq!(a.to_string(), b.to_string()),
            _ => prop_assert!(false, "outcomes differ"),
        }
    }

    #[test]
    fn prop_confidence_in_unit_range(
        subject in "[a-zA-Z ]{0,40}",
        body in "[a-zA-Z0-9 .,$]{0,120}",
    ) {
        let raw = RawInput::text(format!("Subject: {}\nBody: {}", subject, body));
        let classification = engine().classify(&raw).unwrap();
        prop_assert!((0.0..=1.0).contains(&classification.confidence));
        if classification.confidence < 0.6 {
            prop_assert_eq!(classification.intent, Intent::Unknown);
        }
    }
}
