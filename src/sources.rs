//! Source handler abstraction and registry.
//!
//! A [`SourceHandler`] knows how to turn one kind of source into an
//! [`ExtractionPayload`]. The orchestrator only talks to handlers through
//! this trait and looks them up by type tag in a [`HandlerRegistry`], so a
//! new source type is one more `register` call.
//!
//! ```text
//! ┌──────────────────────────────────────┐
//! │           HandlerRegistry            │
//! │  ┌──────────────┐ ┌───────────────┐  │
//! │  │ FileHandler  │ │ ObjectHandler │  │
//! │  │   "file"     │ │   "object"    │  │
//! │  └──────────────┘ └───────────────┘  │
//! └──────────────────┬───────────────────┘
//!                    ▼
//!        ExtractionService::extract_source
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::chunk::ChunkSpan;
use crate::error::{ExtractionError, Result};
use crate::extraction::is_stale;
use crate::models::{ExtractionPayload, PositionReference, SourceKey};
use crate::store::ChunkStore;

/// SHA-256 of `text`, lowercase hex.
pub fn checksum(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// One kind of extractable source.
///
/// # Contract
///
/// - [`extract_text`](SourceHandler::extract_text) returns sanitized text
///   together with its checksum, or fails with `NotFound`,
///   `NotExtractable` or `ConversionFailed`.
/// - [`source_metadata`](SourceHandler::source_metadata) fails with
///   `NotFound` when the id does not resolve.
/// - [`source_timestamp`](SourceHandler::source_timestamp) never fails; a
///   source without a reliable modification time reports the current time.
#[async_trait]
pub trait SourceHandler: Send + Sync {
    /// Discriminator tag, e.g. `"file"`.
    fn source_type(&self) -> &str;

    async fn extract_text(
        &self,
        source_id: i64,
        metadata: &Map<String, Value>,
        force: bool,
    ) -> Result<ExtractionPayload>;

    async fn source_metadata(&self, source_id: i64) -> Result<Map<String, Value>>;

    async fn source_timestamp(&self, source_id: i64) -> DateTime<Utc>;

    /// Whether the source needs (re-)extraction. Uses the same rule as the
    /// orchestrator.
    async fn needs_extraction(
        &self,
        store: &dyn ChunkStore,
        source_id: i64,
        source_timestamp: DateTime<Utc>,
        force: bool,
    ) -> Result<bool> {
        let key = SourceKey::new(self.source_type(), source_id);
        let latest = store
            .latest_timestamp(&key)
            .await
            .map_err(ExtractionError::store)?;
        Ok(is_stale(latest, source_timestamp, force))
    }

    /// Where `span` came from within the source. Defaults to its byte range.
    fn position_reference(&self, _payload: &ExtractionPayload, span: &ChunkSpan) -> PositionReference {
        PositionReference::TextRange {
            start: span.start_offset,
            end: span.end_offset,
        }
    }
}

/// Handlers keyed by source type.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: BTreeMap<String, Arc<dyn SourceHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any previous one for the same type.
    pub fn register(&mut self, handler: Arc<dyn SourceHandler>) {
        self.handlers
            .insert(handler.source_type().to_string(), handler);
    }

    pub fn get(&self, source_type: &str) -> Result<Arc<dyn SourceHandler>> {
        self.handlers
            .get(source_type)
            .cloned()
            .ok_or_else(|| ExtractionError::UnknownSourceType(source_type.to_string()))
    }

    /// Registered type tags in sorted order.
    pub fn source_types(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Stub(&'static str);

    #[async_trait]
    impl SourceHandler for Stub {
        fn source_type(&self) -> &str {
            self.0
        }

        async fn extract_text(
            &self,
            source_id: i64,
            _metadata: &Map<String, Value>,
            _force: bool,
        ) -> Result<ExtractionPayload> {
            Err(ExtractionError::not_found(self.0, source_id))
        }

        async fn source_metadata(&self, _source_id: i64) -> Result<Map<String, Value>> {
            Ok(Map::new())
        }

        async fn source_timestamp(&self, _source_id: i64) -> DateTime<Utc> {
            Utc::now()
        }
    }

    #[test]
    fn checksum_is_sha256_hex() {
        assert_eq!(
            checksum("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn registry_dispatches_by_type() {
        let mut registry = HandlerRegistry::new();
        registry.register(Arc::new(Stub("object")));
        registry.register(Arc::new(Stub("file")));
        registry.register(Arc::new(Stub("email")));

        assert_eq!(registry.source_types(), vec!["email", "file", "object"]);
        assert_eq!(registry.get("email").unwrap().source_type(), "email");
        let err = registry.get("calendar").err().unwrap();
        assert!(matches!(err, ExtractionError::UnknownSourceType(t) if t == "calendar"));
    }

    #[tokio::test]
    async fn needs_extraction_follows_store_timestamp() {
        let store = crate::memory_store::MemoryStore::new();
        let handler = Stub("file");
        let now = Utc::now();
        assert!(handler.needs_extraction(&store, 1, now, false).await.unwrap());
    }
}
