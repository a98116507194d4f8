//! Storage abstractions for the extraction pipeline.
//!
//! [`ChunkStore`] is the persistence boundary for chunks and the failure
//! ledger. [`FileCatalog`] and [`ObjectCatalog`] are the lookups source
//! handlers use to reach their backing data. Implementations must be
//! `Send + Sync` so one store can be shared across concurrent extractions.
//!
//! Two implementations ship with the crate:
//! [`SqliteStore`](crate::sqlite_store::SqliteStore) and
//! [`MemoryStore`](crate::memory_store::MemoryStore).

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{CatalogEntry, Chunk, FileRecord, ObjectRecord, SourceKey};

/// Things `stats` can count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CountTarget {
    /// Every source known to the catalogs.
    Sources,
    /// Sources with no chunks or with chunks older than the source.
    UntrackedSources,
    /// Sources with at least one chunk.
    ChunkedSources,
    /// Sources currently in the failure ledger.
    FailedSources,
    Chunks,
    Entities,
    EntityRelations,
}

impl CountTarget {
    pub const ALL: [CountTarget; 7] = [
        CountTarget::Sources,
        CountTarget::UntrackedSources,
        CountTarget::ChunkedSources,
        CountTarget::FailedSources,
        CountTarget::Chunks,
        CountTarget::Entities,
        CountTarget::EntityRelations,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CountTarget::Sources => "sources",
            CountTarget::UntrackedSources => "untracked_sources",
            CountTarget::ChunkedSources => "chunked_sources",
            CountTarget::FailedSources => "failed_sources",
            CountTarget::Chunks => "chunks",
            CountTarget::Entities => "entities",
            CountTarget::EntityRelations => "entity_relations",
        }
    }
}

/// Persistence boundary for chunks.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`latest_timestamp`](ChunkStore::latest_timestamp) | Newest source snapshot time among a source's chunks |
/// | [`replace_chunks`](ChunkStore::replace_chunks) | Atomically swap a source's chunk set |
/// | [`chunks_for_source`](ChunkStore::chunks_for_source) | Read a source's chunks in index order |
/// | [`untracked_sources`](ChunkStore::untracked_sources) | Sources lacking current chunks |
/// | [`record_failure`](ChunkStore::record_failure) | Add a source to the failure ledger |
/// | [`clear_failure`](ChunkStore::clear_failure) | Remove a source from the failure ledger |
/// | [`failed_sources`](ChunkStore::failed_sources) | Read the failure ledger |
/// | [`count`](ChunkStore::count) | Row counts for statistics |
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Latest `created_at` among the source's chunks, or `None` when the
    /// source has never been chunked. Chunks carry the source's
    /// modification time in `created_at`, so this is the snapshot time of
    /// the most recent extraction.
    async fn latest_timestamp(&self, key: &SourceKey) -> Result<Option<DateTime<Utc>>>;

    /// Delete every chunk of `key` and insert `chunks` in one transaction.
    ///
    /// On error nothing changes: either the previous chunk set is intact or,
    /// for a first extraction, no chunks exist.
    async fn replace_chunks(&self, key: &SourceKey, chunks: &[Chunk]) -> Result<()>;

    /// All chunks of a source ordered by `chunk_index` (metadata chunk first).
    async fn chunks_for_source(&self, key: &SourceKey) -> Result<Vec<Chunk>>;

    /// Up to `limit` sources that have no chunks or whose chunks predate the
    /// source's modification time, excluding sources in the failure ledger.
    ///
    /// A source without a modification time counts as tracked once it has
    /// chunks. Its handler reports the current time as its timestamp, so
    /// only a single-source `extract_source` call refreshes it; batches and
    /// the untracked statistic leave it alone.
    async fn untracked_sources(&self, limit: usize) -> Result<Vec<SourceKey>>;

    async fn record_failure(&self, key: &SourceKey, message: &str) -> Result<()>;

    async fn clear_failure(&self, key: &SourceKey) -> Result<()>;

    /// Up to `limit` sources from the failure ledger, oldest failure first.
    async fn failed_sources(&self, limit: usize) -> Result<Vec<SourceKey>>;

    async fn count(&self, target: CountTarget) -> Result<i64>;
}

/// Lookup of files by id.
#[async_trait]
pub trait FileCatalog: Send + Sync {
    async fn find_file(&self, id: i64) -> Result<Option<FileRecord>>;

    /// Read the file's content.
    async fn read_file(&self, file: &FileRecord) -> Result<Vec<u8>>;
}

/// Lookup of register objects and their schema/register descriptions.
#[async_trait]
pub trait ObjectCatalog: Send + Sync {
    async fn find_object(&self, id: i64) -> Result<Option<ObjectRecord>>;

    async fn find_schema(&self, id: i64) -> Result<Option<CatalogEntry>>;

    async fn find_register(&self, id: i64) -> Result<Option<CatalogEntry>>;
}
