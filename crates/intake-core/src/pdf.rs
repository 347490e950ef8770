//! PDF text extraction.
use std::panic::{self, AssertUnwindSafe};

use crate::capability::{PlainTextExtractor, TextExtractor};
use crate::error::UnextractableDocument;

/// Leading bytes of every PDF file
pub const PDF_MAGIC: &[u8] = b"%PDF-";

/// Text extractor for PDFs with an embedded text layer, using the
/// pdf-extract crate. Content that is not a PDF goes to the plain-text
/// extractor.
#[derive(Debug, Clone, Default)]
pub struct PdfTextExtractor {
    plain: PlainTextExtractor,
}

impl PdfTextExtractor {
    pub fn new(plain: PlainTextExtractor) -> Self {
        Self { plain }
    }

    fn extract_pdf(&self, document: &[u8]) -> Result<String, UnextractableDocument> {
        // pdf-extract panics on some malformed fonts and streams
        let extracted = panic::catch_unwind(AssertUnwindSafe(|| {
            pdf_extract::extract_text_from_mem(document)
        }))
        .map_err(|_| UnextractableDocument::new("PDF text layer could not be decoded"))?
        .map_err(|e| UnextractableDocument::new(format!("PDF parsing failed: {}", e)))?;

        tracing::debug!(
            target: "intake::engine",
            bytes = document.len(),
            chars = extracted.chars().count(),
            "PDF text layer extracted"
        );
        self.plain
            .accept(&extracted)
            .map_err(|e| UnextractableDocument::new(format!("PDF has no usable text layer ({})", e.reason)))
    }
}

impl TextExtractor for PdfTextExtractor {
    fn name(&self) -> &'static str {
        "pdf"
    }

    fn extract_text(&self, document: &[u8]) -> Result<String, UnextractableDocument> {
        if is_pdf(document) {
            self.extract_pdf(document)
        } else {
            self.plain.extract_text(document)
        }
    }
}

/// Whether `document` starts with the PDF header, ignoring leading whitespace.
pub fn is_pdf(document: &[u8]) -> bool {
    let start = document
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(document.len());
    document[start..].starts_with(PDF_MAGIC)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// One-page PDF whose content stream shows `text` in Helvetica.
    fn make_pdf(text: &str) -> Vec<u8> {
        use lopdf::dictionary;
        use lopdf::{Document, Object, Stream};

        let mut doc = Document::with_version("1.4");
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        });
        let content = format!("BT /F1 12 Tf 100 700 Td ({}) Tj ET", text);
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
    fn test_pdf_text_layer_is_extracted() {
        let pdf = make_pdf("Invoice total 1200 USD");
        assert!(is_pdf(&pdf));

        let text = PdfTextExtractor::default().extract_text(&pdf).unwrap();
        assert!(text.contains("Invoice total 1200 USD"), "got: {}", text);
    }

    #[test]
    fn test_leading_whitespace_before_header() {
        let mut pdf = b"\r\n".to_vec();
        pdf.extend(make_pdf("Request for quote 500 units"));
        assert!(is_pdf(&pdf));

        let text = PdfTextExtractor::default().extract_text(&pdf).unwrap();
        assert!(text.contains("500 units"), "got: {}", text);
    }

    #[test]
    fn test_broken_pdf_is_unextractable() {
        let err = PdfTextExtractor::default()
            .extract_text(b"%PDF-1.7\n%\xe2\xe3\xcf\xd3\nnot really a pdf")
            .unwrap_err();
        assert!(err.reason.contains("PDF"), "{}", err.reason);
    }

    #[test]
    fn test_non_pdf_falls_back_to_plain_text() {
        let extractor = PdfTextExtractor::default();
        assert_eq!(extractor.extract_text(b"  plain notes \n").unwrap(), "plain notes");
        assert!(extractor.extract_text(&[0x00, 0xff, 0x01, 0x02]).is_err());
        assert!(!is_pdf(b"notes %PDF-"));
    }
}
