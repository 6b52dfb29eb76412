//! Attachment text extraction.
//!
//! Saved PDF and DOCX attachments are turned into plain text and written
//! next to the attachment under `extracted-text/`. DOCX bodies are read from
//! `word/document.xml`; PDFs go through `pdf-extract` on a blocking thread.

use std::io::{Cursor, Read};
use std::sync::Arc;

use quick_xml::Reader;
use quick_xml::events::Event;
use tracing::{debug, info, warn};

use crate::error::{ExtractError, PipelineError, StorageError};
use crate::pipeline::types::AttachmentEvent;
use crate::storage::{BlobStore, keys};

/// Supported document formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Docx,
}

impl DocumentKind {
    /// Pick the format from a key or filename extension, case-insensitively.
    pub fn from_name(name: &str) -> Option<Self> {
        let lower = name.to_ascii_lowercase();
        if lower.ends_with(".pdf") {
            Some(Self::Pdf)
        } else if lower.ends_with(".docx") {
            Some(Self::Docx)
        } else {
            None
        }
    }
}

/// Converts document bytes into plain text.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextExtractor;

impl TextExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Extract text from a document whose format is given by `name`.
    pub async fn extract(&self, name: &str, data: Vec<u8>) -> Result<String, ExtractError> {
        match DocumentKind::from_name(name) {
            Some(DocumentKind::Docx) => docx_text(&data),
            Some(DocumentKind::Pdf) => pdf_text(data).await,
            None => Err(ExtractError::Unsupported(name.to_string())),
        }
    }
}

/// Text of every `<w:t>` run, one line per `<w:p>` paragraph.
pub fn docx_text(data: &[u8]) -> Result<String, ExtractError> {
    let mut archive =
        zip::ZipArchive::new(Cursor::new(data)).map_err(|e| ExtractError::Docx(e.to_string()))?;
    let mut xml = String::new();
    archive
        .by_name("word/document.xml")
        .map_err(|e| ExtractError::Docx(e.to_string()))?
        .read_to_string(&mut xml)
        .map_err(|e| ExtractError::Docx(e.to_string()))?;

    document_xml_text(&xml)
}

fn document_xml_text(xml: &str) -> Result<String, ExtractError> {
    let mut reader = Reader::from_str(xml);
    let mut paragraphs: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut in_text = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) if e.name().as_ref() == b"w:t" => in_text = true,
            Ok(Event::End(e)) => match e.name().as_ref() {
                b"w:t" => in_text = false,
                b"w:p" => paragraphs.push(std::mem::take(&mut current)),
                _ => {}
            },
            Ok(Event::Empty(e)) if e.name().as_ref() == b"w:tab" => current.push('\t'),
            Ok(Event::Text(t)) if in_text => {
                let text = t.decode().map_err(|e| ExtractError::Docx(e.to_string()))?;
                current.push_str(&text);
            }
            Ok(Event::GeneralRef(r)) if in_text => {
                if let Ok(Some(ch)) = r.resolve_char_ref() {
                    current.push(ch);
                } else {
                    let name = r.decode().map_err(|e| ExtractError::Docx(e.to_string()))?;
                    if let Some(value) = quick_xml::escape::resolve_predefined_entity(&name) {
                        current.push_str(value);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(ExtractError::Docx(e.to_string())),
        }
    }
    if !current.is_empty() {
        paragraphs.push(current);
    }

    Ok(paragraphs.join("\n"))
}

async fn pdf_text(data: Vec<u8>) -> Result<String, ExtractError> {
    tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&data))
        .await
        .map_err(|e| ExtractError::Pdf(format!("extraction task failed: {e}")))?
        .map_err(|e| ExtractError::Pdf(e.to_string()))
}

// ── Queue handler ───────────────────────────────────────────────────

/// Handles `attachments` queue events.
pub struct AttachmentTextHandler {
    blobs: Arc<dyn BlobStore>,
    extractor: TextExtractor,
}

impl AttachmentTextHandler {
    pub fn new(blobs: Arc<dyn BlobStore>) -> Self {
        Self {
            blobs,
            extractor: TextExtractor::new(),
        }
    }

    /// Extract one attachment. Returns the key the text was written to.
    ///
    /// Only a failure to read the attachment is an error, so the event is
    /// redelivered. Unreadable documents are logged and skipped.
    pub async fn handle_event(
        &self,
        event: &AttachmentEvent,
    ) -> Result<Option<String>, PipelineError> {
        let key = event.key.as_str();
        let Some(text_key) = keys::extracted_text(key) else {
            debug!(key, "Ignoring object outside attachments/");
            return Ok(None);
        };

        let data = self.blobs.get(key).await.map_err(|e| match e {
            StorageError::NotFound { .. } => PipelineError::Extraction {
                key: key.to_string(),
                reason: e.to_string(),
            },
            other => PipelineError::Storage(other),
        })?;

        let text = match self.extractor.extract(key, data).await {
            Ok(text) => text,
            Err(e) => {
                warn!(key, error = %e, "Text extraction failed");
                String::new()
            }
        };

        if text.trim().is_empty() {
            info!(key, "No text extracted");
            return Ok(None);
        }

        self.blobs.put(&text_key, text.as_bytes()).await?;
        info!(key, text_key = %text_key, chars = text.chars().count(), "Extracted text saved");
        Ok(Some(text_key))
    }
}
