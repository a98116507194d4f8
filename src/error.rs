//! Error taxonomy for the extraction pipeline.
//!
//! Single-source operations return [`ExtractionError`]; batch operations
//! catch it per source and fold it into their summary counts. Store and
//! collaborator traits use `anyhow::Result` and are wrapped here at the
//! orchestrator boundary.

use thiserror::Error;

/// Boxed error used as the `source` of wrapped store failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised while extracting a single source.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// The source id does not resolve in its backing store.
    #[error("{source_type} source {source_id} not found")]
    NotFound { source_type: String, source_id: i64 },

    /// The source resolved but cannot yield text (unsupported format, empty content).
    #[error("{source_type} source {source_id} is not extractable: {reason}")]
    NotExtractable {
        source_type: String,
        source_id: i64,
        reason: String,
    },

    /// A document converter failed or produced no output.
    #[error("converting {source_type} source {source_id} as {format} failed: {message}")]
    ConversionFailed {
        source_type: String,
        source_id: i64,
        format: String,
        message: String,
    },

    /// Sanitization left nothing to chunk.
    #[error("{source_type} source {source_id} produced no text after sanitization")]
    EmptyExtraction { source_type: String, source_id: i64 },

    /// The chunk replacement transaction failed and was rolled back.
    #[error("persisting chunks for {source_type} source {source_id} failed: {source}")]
    Persistence {
        source_type: String,
        source_id: i64,
        #[source]
        source: BoxError,
    },

    /// No handler is registered for the requested source type.
    #[error("unknown source type: {0}")]
    UnknownSourceType(String),

    /// A read against the chunk store or a catalog failed.
    #[error("store lookup failed: {0}")]
    Store(#[source] BoxError),
}

impl ExtractionError {
    pub fn not_found(source_type: &str, source_id: i64) -> Self {
        ExtractionError::NotFound {
            source_type: source_type.to_string(),
            source_id,
        }
    }

    pub fn not_extractable(source_type: &str, source_id: i64, reason: impl Into<String>) -> Self {
        ExtractionError::NotExtractable {
            source_type: source_type.to_string(),
            source_id,
            reason: reason.into(),
        }
    }

    pub fn store(err: anyhow::Error) -> Self {
        ExtractionError::Store(err.into())
    }

    /// Short machine-readable tag, used in failure ledgers and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ExtractionError::NotFound { .. } => "not_found",
            ExtractionError::NotExtractable { .. } => "not_extractable",
            ExtractionError::ConversionFailed { .. } => "conversion_failed",
            ExtractionError::EmptyExtraction { .. } => "empty_extraction",
            ExtractionError::Persistence { .. } => "persistence_failure",
            ExtractionError::UnknownSourceType(_) => "unknown_source_type",
            ExtractionError::Store(_) => "store",
        }
    }
}

pub type Result<T> = std::result::Result<T, ExtractionError>;
