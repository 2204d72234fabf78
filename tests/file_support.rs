//! Integration tests for document parsing through the ingestion cache.
//!
//! PDF and DOCX uploads are parsed once, stored with their content type,
//! and answered from the cache afterwards; unparseable bytes store nothing.

use std::sync::Arc;

use doc_refinery::cache::IngestionCache;
use doc_refinery::commands::open_store;
use doc_refinery::config::Config;
use doc_refinery::extract::{parse_document, MIME_DOCX, MIME_PDF};
use refinery_core::Error;
use tempfile::TempDir;

/// Minimal valid PDF containing the text "pdf test phrase".
/// Body first, then an xref with correct byte offsets so pdf-extract can
/// parse it.
fn minimal_pdf_with_phrase() -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n");
    let o1 = out.len();
    out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");
    let o2 = out.len();
    out.extend_from_slice(b"2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj\n");
    let o3 = out.len();
    out.extend_from_slice(b"3 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R /Resources << /Font << /F1 5 0 R >> >> >> endobj\n");
    let o4 = out.len();
    out.extend_from_slice(b"4 0 obj << /Length 43 >> stream\nBT /F1 12 Tf 100 700 Td (pdf test phrase) Tj ET\nendstream endobj\n");
    let o5 = out.len();
    out.extend_from_slice(
        b"5 0 obj << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> endobj\n",
    );
    let xref_start = out.len();
    out.extend_from_slice(b"xref\n0 6\n");
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    for offset in [o1, o2, o3, o4, o5] {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(b"trailer << /Size 6 /Root 1 0 R >>\nstartxref\n");
    out.extend_from_slice(format!("{}\n", xref_start).as_bytes());
    out.extend_from_slice(b"%%EOF\n");
    out
}

fn minimal_docx_with_text(phrase: &str) -> Vec<u8> {
    use std::io::Write;
    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
        zip.start_file(
            "word/document.xml",
            zip::write::SimpleFileOptions::default(),
        )
        .unwrap();
        let xml = format!(
            "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body><w:p><w:r><w:t>{}</w:t></w:r></w:p></w:body></w:document>",
            phrase
        );
        zip.write_all(xml.as_bytes()).unwrap();
        zip.finish().unwrap();
    }
    buf
}

async fn setup_cache(tmp: &TempDir) -> IngestionCache {
    let config = Config::minimal(tmp.path().join("files.sqlite"));
    let store = open_store(&config).await.unwrap();
    IngestionCache::new(store, &config.cache)
}

#[tokio::test]
async fn pdf_is_parsed_and_stored() {
    let tmp = TempDir::new().unwrap();
    let cache = setup_cache(&tmp).await;
    let pdf = minimal_pdf_with_phrase();

    let owned = pdf.clone();
    let resolution = cache
        .resolve(&pdf, "parser", move || parse_document(owned, "cv.pdf".to_string()))
        .await
        .unwrap();
    assert!(!resolution.was_cached);

    let parsed = resolution.record.parsed.unwrap();
    assert_eq!(parsed["content_type"], MIME_PDF);
    assert!(parsed["text"].as_str().unwrap().contains("pdf test phrase"));
}

#[tokio::test]
async fn docx_is_parsed_once() {
    let tmp = TempDir::new().unwrap();
    let cache = setup_cache(&tmp).await;
    let docx = minimal_docx_with_text("office test phrase");

    let owned = docx.clone();
    let first = cache
        .resolve(&docx, "parser", move || parse_document(owned, "cv.docx".to_string()))
        .await
        .unwrap();
    let parsed = first.record.parsed.clone().unwrap();
    assert_eq!(parsed["content_type"], MIME_DOCX);
    assert_eq!(parsed["text"], "office test phrase");

    let again = cache
        .resolve(&docx, "parser", || async {
            Err(Error::InvalidInput(
                "a live record must not be parsed again".to_string(),
            ))
        })
        .await
        .unwrap();
    assert!(again.was_cached);
    assert_eq!(again.record.id, first.record.id);
}

#[tokio::test]
async fn renamed_copy_of_same_bytes_is_deduplicated() {
    let tmp = TempDir::new().unwrap();
    let cache = setup_cache(&tmp).await;
    let docx = minimal_docx_with_text("same bytes");

    let a = docx.clone();
    let first = cache
        .resolve(&docx, "parser", move || parse_document(a, "a.docx".to_string()))
        .await
        .unwrap();
    let b = docx.clone();
    let second = cache
        .resolve(&docx, "parser", move || parse_document(b, "b.docx".to_string()))
        .await
        .unwrap();

    assert!(second.was_cached);
    assert_eq!(second.record.filename, "a.docx");
    assert_eq!(second.record.id, first.record.id);
}

#[tokio::test]
async fn corrupt_docx_stores_nothing() {
    let tmp = TempDir::new().unwrap();
    let cache = setup_cache(&tmp).await;
    let bytes = b"PK\x03\x04 truncated".to_vec();

    let owned = bytes.clone();
    let err = cache
        .resolve(&bytes, "parser", move || parse_document(owned, "cv.docx".to_string()))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Parse { .. }), "got {:?}", err);
    assert_eq!(cache.store().count().await.unwrap(), 0);
}

#[tokio::test]
async fn concurrent_uploads_of_one_file_share_a_record() {
    let tmp = TempDir::new().unwrap();
    let cache = Arc::new(setup_cache(&tmp).await);
    let docx = minimal_docx_with_text("race");

    let mut handles = Vec::new();
    for i in 0..10 {
        let cache = cache.clone();
        let bytes = docx.clone();
        handles.push(tokio::spawn(async move {
            let owned = bytes.clone();
            cache
                .resolve(&bytes, "parser", move || {
                    parse_document(owned, format!("copy-{}.docx", i))
                })
                .await
        }));
    }

    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await.unwrap().unwrap().record.id);
    }
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 1);
    assert_eq!(cache.store().count().await.unwrap(), 1);
}
