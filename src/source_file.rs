//! Handler for filesystem files.
//!
//! Dispatches on MIME type: the plain-text family is decoded directly,
//! binary document formats go through a [`DocumentConverter`] on a
//! blocking thread, and anything else is not extractable.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::convert::DocumentConverter;
use crate::error::{ExtractionError, Result};
use crate::models::{ExtractionPayload, FileRecord, LanguageSignals, FILE_SOURCE};
use crate::sanitize::{decode, sanitize};
use crate::sources::{checksum, SourceHandler};
use crate::store::FileCatalog;

pub const FILE_EXTRACTION_METHOD: &str = "file_extraction";

/// Default cap on the size of a file read for extraction.
pub const DEFAULT_MAX_FILE_BYTES: u64 = 50 * 1024 * 1024;

const TEXT_APPLICATION_TYPES: &[&str] = &[
    "application/json",
    "application/xml",
    "application/yaml",
    "application/x-yaml",
    "application/csv",
    "application/x-ndjson",
];

/// Strip parameters and lowercase, e.g. `Text/Plain; charset=utf-8` -> `text/plain`.
fn essence(mime_type: &str) -> String {
    mime_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Whether a MIME type is read verbatim as text.
pub fn is_text_mime(mime_type: &str) -> bool {
    let mime = essence(mime_type);
    mime.starts_with("text/")
        || TEXT_APPLICATION_TYPES.contains(&mime.as_str())
        || mime.ends_with("+json")
        || mime.ends_with("+xml")
}

pub struct FileHandler {
    catalog: Arc<dyn FileCatalog>,
    converter: Arc<dyn DocumentConverter>,
    max_file_bytes: u64,
}

impl FileHandler {
    pub fn new(catalog: Arc<dyn FileCatalog>, converter: Arc<dyn DocumentConverter>) -> Self {
        Self {
            catalog,
            converter,
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
        }
    }

    pub fn with_max_file_bytes(mut self, max_file_bytes: u64) -> Self {
        self.max_file_bytes = max_file_bytes;
        self
    }

    async fn find(&self, source_id: i64) -> Result<FileRecord> {
        self.catalog
            .find_file(source_id)
            .await
            .map_err(ExtractionError::store)?
            .ok_or_else(|| ExtractionError::not_found(FILE_SOURCE, source_id))
    }

    fn too_large(&self, source_id: i64, size: u64) -> Option<ExtractionError> {
        (size > self.max_file_bytes).then(|| {
            ExtractionError::not_extractable(
                FILE_SOURCE,
                source_id,
                format!("{} bytes exceeds limit of {}", size, self.max_file_bytes),
            )
        })
    }

    async fn convert(&self, file: &FileRecord, bytes: Vec<u8>, mime: String) -> Result<String> {
        let converter = self.converter.clone();
        let format = mime.clone();
        let converted = tokio::task::spawn_blocking(move || converter.convert(&bytes, &mime)).await;

        let failed = |message: String| ExtractionError::ConversionFailed {
            source_type: FILE_SOURCE.to_string(),
            source_id: file.id,
            format: format.clone(),
            message,
        };

        match converted {
            Ok(Ok(text)) if text.trim().is_empty() => {
                Err(failed("converter produced no text".to_string()))
            }
            Ok(Ok(text)) => Ok(text),
            Ok(Err(e)) => Err(failed(e.to_string())),
            Err(e) => Err(failed(format!("converter task aborted: {}", e))),
        }
    }
}

#[async_trait]
impl SourceHandler for FileHandler {
    fn source_type(&self) -> &str {
        FILE_SOURCE
    }

    async fn extract_text(
        &self,
        source_id: i64,
        metadata: &Map<String, Value>,
        _force: bool,
    ) -> Result<ExtractionPayload> {
        let file = self.find(source_id).await?;
        if let Some(err) = self.too_large(source_id, file.size) {
            warn!(source_id, size = file.size, "skipping oversized file");
            return Err(err);
        }

        let bytes = self
            .catalog
            .read_file(&file)
            .await
            .map_err(ExtractionError::store)?;
        if let Some(err) = self.too_large(source_id, bytes.len() as u64) {
            warn!(source_id, size = bytes.len(), "skipping oversized file");
            return Err(err);
        }
        if bytes.is_empty() {
            return Err(ExtractionError::not_extractable(
                FILE_SOURCE,
                source_id,
                "zero-length content",
            ));
        }

        let mime = essence(&file.mime_type);
        let raw = if is_text_mime(&mime) {
            decode(&bytes)
        } else if self.converter.supports(&mime) {
            self.convert(&file, bytes, mime.clone()).await?
        } else {
            warn!(source_id, mime_type = %file.mime_type, "unsupported mime type");
            return Err(ExtractionError::not_extractable(
                FILE_SOURCE,
                source_id,
                format!("unsupported mime type {}", file.mime_type),
            ));
        };

        let text = sanitize(&raw);
        debug!(source_id, mime_type = %mime, length = text.len(), "file text extracted");

        Ok(ExtractionPayload {
            source_type: FILE_SOURCE.to_string(),
            source_id,
            length: text.len(),
            checksum: checksum(&text),
            text,
            method: FILE_EXTRACTION_METHOD.to_string(),
            owner: file.owner.clone(),
            organisation: file.organisation.clone(),
            language: LanguageSignals::default(),
            metadata: metadata.clone(),
            property_offsets: Vec::new(),
        })
    }

    async fn source_metadata(&self, source_id: i64) -> Result<Map<String, Value>> {
        let file = self.find(source_id).await?;
        let mut meta = Map::new();
        meta.insert("path".into(), json!(file.path));
        meta.insert("name".into(), json!(file.name));
        meta.insert("mime_type".into(), json!(file.mime_type));
        meta.insert("size".into(), json!(file.size));
        if let Some(modified) = file.modified_at {
            meta.insert("modified_at".into(), json!(modified.to_rfc3339()));
        }
        Ok(meta)
    }

    async fn source_timestamp(&self, source_id: i64) -> DateTime<Utc> {
        match self.catalog.find_file(source_id).await {
            Ok(Some(FileRecord {
                modified_at: Some(ts),
                ..
            })) => ts,
            Ok(_) => Utc::now(),
            Err(e) => {
                debug!(source_id, error = %e, "file timestamp lookup failed, using now");
                Utc::now()
            }
        }
    }
}
