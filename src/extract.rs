//! Default parse step: document bytes to plain text.
//!
//! The content type is sniffed from the filename extension, falling back to
//! magic bytes, then dispatched to a PDF or OOXML extractor. Plain text and
//! Markdown pass through as UTF-8. [`parse_document`] wraps the result in a
//! [`NewArtifact`] for the ingestion cache.

use std::io::Read;

use serde_json::json;
use thiserror::Error;

use refinery_core::models::NewArtifact;
use refinery_core::Error;

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_PPTX: &str =
    "application/vnd.openxmlformats-officedocument.presentationml.presentation";
pub const MIME_TEXT: &str = "text/plain";
pub const MIME_MARKDOWN: &str = "text/markdown";

/// Zip-bomb guard for a single decompressed entry.
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("unsupported content-type: {0}")]
    UnsupportedContentType(String),
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("OOXML extraction failed: {0}")]
    Ooxml(String),
    #[error("text is not valid UTF-8: {0}")]
    Text(#[from] std::str::Utf8Error),
    #[error("document contains no extractable text")]
    Empty,
}

/// Content type for `filename`, or from the leading bytes when the
/// extension is missing or unknown.
pub fn sniff_content_type(filename: &str, bytes: &[u8]) -> Option<&'static str> {
    let ext = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase());
    let by_ext = match ext.as_deref() {
        Some("pdf") => Some(MIME_PDF),
        Some("docx") => Some(MIME_DOCX),
        Some("pptx") => Some(MIME_PPTX),
        Some("txt") => Some(MIME_TEXT),
        Some("md") | Some("markdown") => Some(MIME_MARKDOWN),
        _ => None,
    };
    by_ext.or_else(|| {
        if bytes.starts_with(b"%PDF-") {
            Some(MIME_PDF)
        } else if bytes.starts_with(b"PK\x03\x04") {
            // Bare zip: only Word documents are assumed.
            Some(MIME_DOCX)
        } else if std::str::from_utf8(bytes).is_ok() {
            Some(MIME_TEXT)
        } else {
            None
        }
    })
}

/// Extracts plain text from `bytes` of the given content type.
pub fn extract_text(bytes: &[u8], content_type: &str) -> Result<String, ExtractError> {
    match content_type {
        MIME_PDF => extract_pdf(bytes),
        MIME_DOCX => extract_docx(bytes),
        MIME_PPTX => extract_pptx(bytes),
        MIME_TEXT | MIME_MARKDOWN => Ok(std::str::from_utf8(bytes)?.to_string()),
        _ => Err(ExtractError::UnsupportedContentType(
            content_type.to_string(),
        )),
    }
}

/// Parse an uploaded document into a record payload.
///
/// Every failure is reported as [`Error::Parse`]. Extraction is CPU-bound
/// and runs on the blocking pool.
pub async fn parse_document(bytes: Vec<u8>, filename: String) -> refinery_core::Result<NewArtifact> {
    let name = filename.clone();
    let parsed = tokio::task::spawn_blocking(move || -> Result<(String, &'static str), ExtractError> {
        let content_type = sniff_content_type(&name, &bytes)
            .ok_or_else(|| ExtractError::UnsupportedContentType("application/octet-stream".to_string()))?;
        let text = extract_text(&bytes, content_type)?;
        if text.trim().is_empty() {
            return Err(ExtractError::Empty);
        }
        Ok((text, content_type))
    })
    .await
    .map_err(|e| Error::Parse {
        filename: filename.clone(),
        message: format!("extraction task failed: {}", e),
    })?;

    let (text, content_type) = parsed.map_err(|e| Error::Parse {
        filename: filename.clone(),
        message: e.to_string(),
    })?;

    tracing::debug!(filename = %filename, content_type, chars = text.len(), "document parsed");
    Ok(NewArtifact {
        filename,
        display_name: None,
        parsed: Some(json!({
            "content_type": content_type,
            "text": text.trim(),
        })),
        vector: None,
    })
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
}

fn read_zip_entry_bounded(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
    name: &str,
    max_bytes: u64,
) -> Result<Vec<u8>, ExtractError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    let mut out = Vec::new();
    entry
        .take(max_bytes)
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    if out.len() as u64 >= max_bytes {
        return Err(ExtractError::Ooxml(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, max_bytes
        )));
    }
    Ok(out)
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    let doc_xml = read_zip_entry_bounded(&mut archive, "word/document.xml", MAX_XML_ENTRY_BYTES)?;
    extract_t_elements(&doc_xml)
}

fn extract_pptx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    let mut slide_names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("ppt/slides/slide") && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    slide_names.sort_by_key(|name| {
        name.trim_start_matches("ppt/slides/slide")
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });
    let mut out = String::new();
    for name in slide_names {
        let xml = read_zip_entry_bounded(&mut archive, &name, MAX_XML_ENTRY_BYTES)?;
        let text = extract_t_elements(&xml)?;
        if !out.is_empty() && !text.is_empty() {
            out.push(' ');
        }
        out.push_str(&text);
    }
    Ok(out)
}

/// Concatenated text of every `<*:t>` element (`w:t` in Word, `a:t` in
/// slides).
fn extract_t_elements(xml: &[u8]) -> Result<String, ExtractError> {
    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                if e.local_name().as_ref() == b"t" {
                    if let Ok(quick_xml::events::Event::Text(te)) = reader.read_event_into(&mut buf)
                    {
                        out.push_str(te.unescape().unwrap_or_default().as_ref());
                    }
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}
