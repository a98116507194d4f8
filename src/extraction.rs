//! Extraction orchestration.
//!
//! [`ExtractionService`] drives one source through the pipeline:
//!
//! ```text
//! (source_type, source_id, force)
//!   → handler metadata + timestamp
//!   → staleness check (skip when up to date)
//!   → per-source lock, staleness re-check
//!   → extract → sanitize → detect language → chunk
//!   → replace chunks in one transaction (content + metadata chunk)
//!   → release lock
//!   → entity recognition (best effort)
//! ```
//!
//! Batch operations run the single-source path in sequence, count
//! successes and failures, and keep a failure ledger in the store so a
//! broken source is not retried by every `process_pending` call.

use std::sync::Arc;

use chrono::{DateTime, SubsecRound, Utc};
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::chunk::{self, ChunkOptions, ChunkSpan};
use crate::config::ChunkingConfig;
use crate::entity::{EntityRecognizer, NoopRecognizer, RecognitionOptions};
use crate::error::{ExtractionError, Result};
use crate::language::detect_language;
use crate::locks::SourceLocks;
use crate::models::{
    BatchSummary, Chunk, ExtractionOutcome, ExtractionPayload, ExtractionStats, PositionReference,
    RecognitionSummary, SourceKey, METADATA_CHUNK_INDEX,
};
use crate::sanitize::sanitize;
use crate::sources::{checksum, HandlerRegistry, SourceHandler};
use crate::store::{ChunkStore, CountTarget};

/// The staleness rule shared by handlers and the orchestrator.
///
/// A source needs extraction when forced, when it has never been chunked,
/// or when its latest chunk snapshot predates the source's modification
/// time. Chunk timestamps have second precision, so the source time is
/// truncated before comparing.
pub fn is_stale(latest: Option<DateTime<Utc>>, source_timestamp: DateTime<Utc>, force: bool) -> bool {
    match latest {
        _ if force => true,
        None => true,
        Some(latest) => latest < source_timestamp.trunc_subsecs(0),
    }
}

/// Run a best-effort step: log its error and carry on without a value.
pub fn log_and_continue<T>(result: anyhow::Result<T>, key: &SourceKey, step: &str) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(source = %key, step, error = %e, "best-effort step failed");
            None
        }
    }
}

pub struct ExtractionService {
    store: Arc<dyn ChunkStore>,
    handlers: HandlerRegistry,
    chunking: ChunkingConfig,
    recognizer: Arc<dyn EntityRecognizer>,
    recognition: RecognitionOptions,
    locks: SourceLocks,
}

impl ExtractionService {
    pub fn new(store: Arc<dyn ChunkStore>, handlers: HandlerRegistry) -> Self {
        Self {
            store,
            handlers,
            chunking: ChunkingConfig::default(),
            recognizer: Arc::new(NoopRecognizer),
            recognition: RecognitionOptions::default(),
            locks: SourceLocks::new(),
        }
    }

    pub fn with_chunking(mut self, chunking: ChunkingConfig) -> Self {
        self.chunking = chunking;
        self
    }

    pub fn with_recognizer(
        mut self,
        recognizer: Arc<dyn EntityRecognizer>,
        options: RecognitionOptions,
    ) -> Self {
        self.recognizer = recognizer;
        self.recognition = options;
        self
    }

    pub fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    pub fn store(&self) -> &Arc<dyn ChunkStore> {
        &self.store
    }

    /// Chunker options used for `source_type`.
    pub fn chunk_options(&self, source_type: &str) -> ChunkOptions {
        self.chunking.options_for(source_type)
    }

    /// Split text directly, without touching any source.
    pub fn chunk_document(&self, text: &str, options: &ChunkOptions) -> Vec<ChunkSpan> {
        chunk::chunk_document(text, options)
    }

    /// Extract, chunk and persist one source.
    ///
    /// Returns [`ExtractionOutcome::UpToDate`] without writing anything when
    /// the stored chunks are at least as new as the source and `force` is
    /// false.
    pub async fn extract_source(
        &self,
        source_type: &str,
        source_id: i64,
        force: bool,
    ) -> Result<ExtractionOutcome> {
        let handler = self.handlers.get(source_type)?;
        let key = SourceKey::new(source_type, source_id);

        let metadata = handler.source_metadata(source_id).await?;
        let source_ts = handler.source_timestamp(source_id).await.trunc_subsecs(0);

        if !handler
            .needs_extraction(self.store.as_ref(), source_id, source_ts, force)
            .await?
        {
            debug!(source = %key, "chunks up to date, skipping");
            return Ok(ExtractionOutcome::UpToDate);
        }

        let guard = self.locks.acquire(&key).await;
        // Another call may have finished this source while we waited.
        if !handler
            .needs_extraction(self.store.as_ref(), source_id, source_ts, force)
            .await?
        {
            debug!(source = %key, "extracted concurrently, skipping");
            return Ok(ExtractionOutcome::UpToDate);
        }

        let mut payload = handler.extract_text(source_id, &metadata, force).await?;
        let text = sanitize(&payload.text);
        if text.is_empty() {
            return Err(ExtractionError::EmptyExtraction {
                source_type: source_type.to_string(),
                source_id,
            });
        }
        if text != payload.text {
            // Offsets computed by the handler no longer apply.
            payload.property_offsets.clear();
            payload.checksum = checksum(&text);
            payload.length = text.len();
            payload.text = text;
        }
        payload.language = detect_language(&payload.text);

        let options = self.chunk_options(source_type);
        let spans = chunk::chunk_document(&payload.text, &options);
        let chunks = self.build_chunks(handler.as_ref(), &payload, &spans, source_ts);

        self.store
            .replace_chunks(&key, &chunks)
            .await
            .map_err(|e| ExtractionError::Persistence {
                source_type: source_type.to_string(),
                source_id,
                source: e.into(),
            })?;
        drop(guard);

        info!(
            source = %key,
            chunks = spans.len(),
            length = payload.length,
            language = payload.language.language.as_deref().unwrap_or("none"),
            "source extracted"
        );

        let entities = self.recognize(&key).await;
        Ok(ExtractionOutcome::Extracted {
            chunks: spans.len(),
            checksum: payload.checksum,
            entities,
        })
    }

    async fn recognize(&self, key: &SourceKey) -> Option<RecognitionSummary> {
        let result = self
            .recognizer
            .process_source_chunks(&key.source_type, key.source_id, &self.recognition)
            .await;
        log_and_continue(result, key, "entity_recognition")
    }

    /// Content chunks with provenance, followed by the metadata chunk.
    fn build_chunks(
        &self,
        handler: &dyn SourceHandler,
        payload: &ExtractionPayload,
        spans: &[ChunkSpan],
        source_ts: DateTime<Utc>,
    ) -> Vec<Chunk> {
        let now = Utc::now();
        let chunk = |index: i64, text: String, start, end, position, overlap| Chunk {
            id: None,
            uuid: Uuid::new_v4().to_string(),
            source_type: payload.source_type.clone(),
            source_id: payload.source_id,
            chunk_index: index,
            text_content: text,
            start_offset: start,
            end_offset: end,
            position_reference: position,
            language: payload.language.clone(),
            overlap_size: overlap,
            checksum: payload.checksum.clone(),
            indexed: false,
            vectorized: false,
            embedding_provider: None,
            owner: payload.owner.clone(),
            organisation: payload.organisation.clone(),
            created_at: source_ts,
            updated_at: now,
        };

        let mut chunks = Vec::with_capacity(spans.len() + 1);
        for (i, span) in spans.iter().enumerate() {
            let overlap = match i.checked_sub(1).map(|p| &spans[p]) {
                Some(prev) => prev.end_offset.saturating_sub(span.start_offset),
                None => 0,
            };
            chunks.push(chunk(
                i as i64,
                span.text.clone(),
                span.start_offset,
                span.end_offset,
                handler.position_reference(payload, span),
                overlap,
            ));
        }

        let summary = json!({
            "source_type": payload.source_type,
            "source_id": payload.source_id,
            "checksum": payload.checksum,
            "length": payload.length,
            "method": payload.method,
            "chunks": spans.len(),
            "language": payload.language,
            "owner": payload.owner,
            "organisation": payload.organisation,
            "metadata": payload.metadata,
        });
        chunks.push(chunk(
            METADATA_CHUNK_INDEX,
            summary.to_string(),
            0,
            payload.length,
            PositionReference::Metadata,
            0,
        ));
        chunks
    }

    /// Resolve the metadata of up to `limit` untracked sources without
    /// extracting them. Sources that cannot be resolved go to the failure
    /// ledger.
    pub async fn discover_and_queue(&self, limit: usize) -> Result<BatchSummary> {
        let keys = self
            .store
            .untracked_sources(limit)
            .await
            .map_err(ExtractionError::store)?;

        let mut summary = BatchSummary::default();
        for key in keys {
            summary.total += 1;
            let resolved = match self.handlers.get(&key.source_type) {
                Ok(handler) => handler.source_metadata(key.source_id).await.map(|_| ()),
                Err(e) => Err(e),
            };
            match resolved {
                Ok(()) => summary.succeeded += 1,
                Err(e) => {
                    summary.failed += 1;
                    self.note_failure(&key, &e).await;
                }
            }
        }

        info!(
            discovered = summary.succeeded,
            failed = summary.failed,
            total = summary.total,
            "discovery finished"
        );
        Ok(summary)
    }

    /// Extract up to `limit` untracked sources.
    pub async fn process_pending(&self, limit: usize) -> Result<BatchSummary> {
        let keys = self
            .store
            .untracked_sources(limit)
            .await
            .map_err(ExtractionError::store)?;
        let summary = self.run_batch(keys, false).await;
        info!(
            processed = summary.succeeded,
            failed = summary.failed,
            total = summary.total,
            "pending sources processed"
        );
        Ok(summary)
    }

    /// Force re-extraction of up to `limit` sources from the failure ledger.
    pub async fn retry_failed(&self, limit: usize) -> Result<BatchSummary> {
        let keys = self
            .store
            .failed_sources(limit)
            .await
            .map_err(ExtractionError::store)?;
        let summary = self.run_batch(keys, true).await;
        info!(
            retried = summary.succeeded,
            failed = summary.failed,
            total = summary.total,
            "failed sources retried"
        );
        Ok(summary)
    }

    async fn run_batch(&self, keys: Vec<SourceKey>, force: bool) -> BatchSummary {
        let mut summary = BatchSummary::default();
        for key in keys {
            summary.total += 1;
            match self.extract_source(&key.source_type, key.source_id, force).await {
                Ok(_) => {
                    summary.succeeded += 1;
                    log_and_continue(self.store.clear_failure(&key).await, &key, "clear_failure");
                }
                Err(e) => {
                    summary.failed += 1;
                    self.note_failure(&key, &e).await;
                }
            }
        }
        summary
    }

    async fn note_failure(&self, key: &SourceKey, err: &ExtractionError) {
        warn!(source = %key, kind = err.kind(), error = %err, "source failed");
        let message = format!("{}: {}", err.kind(), err);
        log_and_continue(
            self.store.record_failure(key, &message).await,
            key,
            "record_failure",
        );
    }

    /// Aggregate counts. A count that cannot be computed is reported as zero.
    pub async fn stats(&self) -> ExtractionStats {
        let mut stats = ExtractionStats::default();
        for target in CountTarget::ALL {
            let n = match self.store.count(target).await {
                Ok(n) => n,
                Err(e) => {
                    debug!(target = target.as_str(), error = %e, "count unavailable");
                    0
                }
            };
            match target {
                CountTarget::Sources => stats.total_sources = n,
                CountTarget::UntrackedSources => stats.untracked_sources = n,
                CountTarget::ChunkedSources => stats.chunked_sources = n,
                CountTarget::FailedSources => stats.failed_sources = n,
                CountTarget::Chunks => stats.total_chunks = n,
                CountTarget::Entities => stats.entities = n,
                CountTarget::EntityRelations => stats.entity_relations = n,
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn staleness_rule() {
        let t = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        assert!(is_stale(None, t, false));
        assert!(is_stale(Some(t), t, true));
        assert!(!is_stale(Some(t), t, false));
        assert!(!is_stale(Some(t + Duration::seconds(5)), t, false));
        assert!(is_stale(Some(t), t + Duration::seconds(1), false));
    }

    #[test]
    fn staleness_ignores_subseconds() {
        let t = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let fractional = t + Duration::milliseconds(750);
        assert!(!is_stale(Some(t), fractional, false));
    }

    #[test]
    fn log_and_continue_swallows_errors() {
        let key = SourceKey::file(1);
        assert_eq!(log_and_continue(Ok(3), &key, "step"), Some(3));
        let failed: Option<i32> = log_and_continue(Err(anyhow::anyhow!("nope")), &key, "step");
        assert_eq!(failed, None);
    }
}
