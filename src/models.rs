//! Core data models used throughout the extraction pipeline.
//!
//! These types represent the sources, extraction payloads and persisted
//! chunks that flow between handlers, the orchestrator and the chunk store.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Source type tag for filesystem files.
pub const FILE_SOURCE: &str = "file";
/// Source type tag for register objects.
pub const OBJECT_SOURCE: &str = "object";

/// Chunk index reserved for the synthetic metadata chunk.
pub const METADATA_CHUNK_INDEX: i64 = -1;

/// Identifies one extraction unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceKey {
    pub source_type: String,
    pub source_id: i64,
}

impl SourceKey {
    pub fn new(source_type: impl Into<String>, source_id: i64) -> Self {
        Self {
            source_type: source_type.into(),
            source_id,
        }
    }

    pub fn file(source_id: i64) -> Self {
        Self::new(FILE_SOURCE, source_id)
    }

    pub fn object(source_id: i64) -> Self {
        Self::new(OBJECT_SOURCE, source_id)
    }
}

impl fmt::Display for SourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source_type, self.source_id)
    }
}

/// Best-effort language signals attached to a payload and its chunks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LanguageSignals {
    pub language: Option<String>,
    pub language_level: Option<String>,
    pub language_confidence: Option<f64>,
    pub detection_method: Option<String>,
}

/// Where in a flattened object a property's text begins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyOffset {
    pub path: String,
    pub start: usize,
}

/// Normalized result of extracting one source. Built fresh per attempt
/// and discarded once its chunks are persisted.
#[derive(Debug, Clone)]
pub struct ExtractionPayload {
    pub source_type: String,
    pub source_id: i64,
    pub text: String,
    pub length: usize,
    pub checksum: String,
    pub method: String,
    pub owner: Option<String>,
    pub organisation: Option<String>,
    pub language: LanguageSignals,
    pub metadata: Map<String, Value>,
    /// Property start offsets for structured sources, sorted by `start`.
    pub property_offsets: Vec<PropertyOffset>,
}

impl ExtractionPayload {
    pub fn key(&self) -> SourceKey {
        SourceKey::new(self.source_type.clone(), self.source_id)
    }
}

/// Tagged description of where a chunk's text came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum PositionReference {
    TextRange { start: usize, end: usize },
    PropertyPath { path: String },
    Metadata,
}

/// A persisted slice of a source's extracted text.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// Store-assigned row id; `None` until persisted.
    pub id: Option<i64>,
    pub uuid: String,
    pub source_type: String,
    pub source_id: i64,
    pub chunk_index: i64,
    pub text_content: String,
    pub start_offset: usize,
    pub end_offset: usize,
    pub position_reference: PositionReference,
    pub language: LanguageSignals,
    pub overlap_size: usize,
    pub checksum: String,
    pub indexed: bool,
    pub vectorized: bool,
    pub embedding_provider: Option<String>,
    pub owner: Option<String>,
    pub organisation: Option<String>,
    /// Modification time of the source when it was extracted.
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Chunk {
    pub fn key(&self) -> SourceKey {
        SourceKey::new(self.source_type.clone(), self.source_id)
    }

    pub fn is_metadata(&self) -> bool {
        self.chunk_index == METADATA_CHUNK_INDEX
    }
}

/// A file as known to the file catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub id: i64,
    pub path: String,
    pub name: String,
    pub mime_type: String,
    pub size: u64,
    pub modified_at: Option<DateTime<Utc>>,
    pub owner: Option<String>,
    pub organisation: Option<String>,
}

/// A register object as known to the object catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectRecord {
    pub id: i64,
    pub uuid: String,
    pub version: Option<String>,
    pub schema_id: Option<i64>,
    pub register_id: Option<i64>,
    /// The object's structured data.
    pub data: Map<String, Value>,
    pub owner: Option<String>,
    pub organisation: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Title and description of a schema or register.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: i64,
    pub title: Option<String>,
    pub description: Option<String>,
}

/// Result of a single `extract_source` call.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractionOutcome {
    /// Existing chunks are at least as new as the source.
    UpToDate,
    Extracted {
        /// Content chunks written, excluding the metadata chunk.
        chunks: usize,
        checksum: String,
        entities: Option<RecognitionSummary>,
    },
}

/// Counts returned by the entity recognizer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RecognitionSummary {
    pub entities_found: usize,
    pub relations_created: usize,
}

/// `{succeeded, failed, total}` triple returned by every batch operation.
///
/// `succeeded` is reported as `discovered`, `processed` or `retried`
/// depending on the operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub total: usize,
}

/// Aggregate counts reported by `stats`. Any count that could not be
/// computed is zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExtractionStats {
    pub total_sources: i64,
    pub untracked_sources: i64,
    pub chunked_sources: i64,
    pub failed_sources: i64,
    pub total_chunks: i64,
    pub entities: i64,
    pub entity_relations: i64,
}
