//! In-memory store for tests and embedding.
//!
//! Implements [`ChunkStore`], [`FileCatalog`] and [`ObjectCatalog`] over
//! `BTreeMap`/`Vec` behind `std::sync::RwLock`. Chunk replacement stages
//! the new set and swaps it in only when every insert succeeded, which
//! gives the same all-or-nothing behaviour as the SQLite transaction.
//!
//! Two hooks support pipeline tests: [`MemoryStore::chunk_writes`] counts
//! calls that modified chunk rows, and
//! [`MemoryStore::fail_inserts_after`] makes the next replacement fail
//! part-way through its inserts.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, RwLock};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::extraction::is_stale;
use crate::models::{CatalogEntry, Chunk, FileRecord, ObjectRecord, SourceKey};
use crate::store::{ChunkStore, CountTarget, FileCatalog, ObjectCatalog};

struct StoredFile {
    record: FileRecord,
    content: Vec<u8>,
}

struct FailureEntry {
    message: String,
    attempts: u32,
    seq: u64,
}

/// In-memory implementation of every storage trait.
pub struct MemoryStore {
    files: RwLock<BTreeMap<i64, StoredFile>>,
    objects: RwLock<BTreeMap<i64, ObjectRecord>>,
    schemas: RwLock<BTreeMap<i64, CatalogEntry>>,
    registers: RwLock<BTreeMap<i64, CatalogEntry>>,
    chunks: RwLock<Vec<Chunk>>,
    failures: RwLock<BTreeMap<SourceKey, FailureEntry>>,
    next_chunk_id: AtomicI64,
    failure_seq: AtomicU64,
    chunk_writes: AtomicUsize,
    fail_inserts_after: Mutex<Option<usize>>,
    catalog_lookups_fail: Mutex<bool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            files: RwLock::new(BTreeMap::new()),
            objects: RwLock::new(BTreeMap::new()),
            schemas: RwLock::new(BTreeMap::new()),
            registers: RwLock::new(BTreeMap::new()),
            chunks: RwLock::new(Vec::new()),
            failures: RwLock::new(BTreeMap::new()),
            next_chunk_id: AtomicI64::new(1),
            failure_seq: AtomicU64::new(0),
            chunk_writes: AtomicUsize::new(0),
            fail_inserts_after: Mutex::new(None),
            catalog_lookups_fail: Mutex::new(false),
        }
    }

    pub fn add_file(&self, record: FileRecord, content: impl Into<Vec<u8>>) {
        self.files.write().unwrap().insert(
            record.id,
            StoredFile {
                record,
                content: content.into(),
            },
        );
    }

    /// Replace a file's content and modification time.
    pub fn update_file(&self, id: i64, content: impl Into<Vec<u8>>, modified_at: DateTime<Utc>) {
        if let Some(stored) = self.files.write().unwrap().get_mut(&id) {
            stored.content = content.into();
            stored.record.size = stored.content.len() as u64;
            stored.record.modified_at = Some(modified_at);
        }
    }

    pub fn add_object(&self, record: ObjectRecord) {
        self.objects.write().unwrap().insert(record.id, record);
    }

    pub fn add_schema(&self, entry: CatalogEntry) {
        self.schemas.write().unwrap().insert(entry.id, entry);
    }

    pub fn add_register(&self, entry: CatalogEntry) {
        self.registers.write().unwrap().insert(entry.id, entry);
    }

    /// Number of calls that modified chunk rows.
    pub fn chunk_writes(&self) -> usize {
        self.chunk_writes.load(Ordering::SeqCst)
    }

    /// Make the next `replace_chunks` fail after staging `inserts` chunks.
    pub fn fail_inserts_after(&self, inserts: Option<usize>) {
        *self.fail_inserts_after.lock().unwrap() = inserts;
    }

    /// Make schema and register lookups return errors.
    pub fn fail_catalog_lookups(&self, fail: bool) {
        *self.catalog_lookups_fail.lock().unwrap() = fail;
    }

    fn latest_for(chunks: &[Chunk], key: &SourceKey) -> Option<DateTime<Utc>> {
        chunks
            .iter()
            .filter(|c| c.source_type == key.source_type && c.source_id == key.source_id)
            .map(|c| c.created_at)
            .max()
    }

    /// Every known source paired with its modification time.
    fn all_sources(&self) -> Vec<(SourceKey, Option<DateTime<Utc>>)> {
        let files = self.files.read().unwrap();
        let objects = self.objects.read().unwrap();
        files
            .values()
            .map(|f| (SourceKey::file(f.record.id), f.record.modified_at))
            .chain(
                objects
                    .values()
                    .map(|o| (SourceKey::object(o.id), o.updated_at)),
            )
            .collect()
    }

    /// Same rule as the SQLite `UNTRACKED` predicate: never chunked, or
    /// stale by [`is_stale`]. A chunked source without a modification time
    /// counts as tracked.
    fn is_untracked(chunks: &[Chunk], key: &SourceKey, modified_at: Option<DateTime<Utc>>) -> bool {
        match (Self::latest_for(chunks, key), modified_at) {
            (None, _) => true,
            (latest @ Some(_), Some(modified)) => is_stale(latest, modified, false),
            (Some(_), None) => false,
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChunkStore for MemoryStore {
    async fn latest_timestamp(&self, key: &SourceKey) -> Result<Option<DateTime<Utc>>> {
        let chunks = self.chunks.read().unwrap();
        Ok(Self::latest_for(&chunks, key))
    }

    async fn replace_chunks(&self, key: &SourceKey, chunks: &[Chunk]) -> Result<()> {
        let fail_after = self.fail_inserts_after.lock().unwrap().take();

        let mut staged = Vec::with_capacity(chunks.len());
        for (inserted, chunk) in chunks.iter().enumerate() {
            if fail_after == Some(inserted) {
                bail!("injected failure after {} inserts for {}", inserted, key);
            }
            if chunk.source_type != key.source_type || chunk.source_id != key.source_id {
                bail!("chunk {} does not belong to {}", chunk.uuid, key);
            }
            if staged.iter().any(|c: &Chunk| c.chunk_index == chunk.chunk_index) {
                bail!("duplicate chunk index {} for {}", chunk.chunk_index, key);
            }
            let mut stored = chunk.clone();
            stored.id = Some(self.next_chunk_id.fetch_add(1, Ordering::SeqCst));
            staged.push(stored);
        }

        let mut all = self.chunks.write().unwrap();
        all.retain(|c| !(c.source_type == key.source_type && c.source_id == key.source_id));
        all.extend(staged);
        self.chunk_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn chunks_for_source(&self, key: &SourceKey) -> Result<Vec<Chunk>> {
        let chunks = self.chunks.read().unwrap();
        let mut out: Vec<Chunk> = chunks
            .iter()
            .filter(|c| c.source_type == key.source_type && c.source_id == key.source_id)
            .cloned()
            .collect();
        out.sort_by_key(|c| c.chunk_index);
        Ok(out)
    }

    async fn untracked_sources(&self, limit: usize) -> Result<Vec<SourceKey>> {
        let sources = self.all_sources();
        let chunks = self.chunks.read().unwrap();
        let failures = self.failures.read().unwrap();
        Ok(sources
            .into_iter()
            .filter(|(key, modified)| {
                !failures.contains_key(key) && Self::is_untracked(&chunks, key, *modified)
            })
            .map(|(key, _)| key)
            .take(limit)
            .collect())
    }

    async fn record_failure(&self, key: &SourceKey, message: &str) -> Result<()> {
        let seq = self.failure_seq.fetch_add(1, Ordering::SeqCst);
        let mut failures = self.failures.write().unwrap();
        let entry = failures.entry(key.clone()).or_insert(FailureEntry {
            message: String::new(),
            attempts: 0,
            seq,
        });
        entry.message = message.to_string();
        entry.attempts += 1;
        Ok(())
    }

    async fn clear_failure(&self, key: &SourceKey) -> Result<()> {
        self.failures.write().unwrap().remove(key);
        Ok(())
    }

    async fn failed_sources(&self, limit: usize) -> Result<Vec<SourceKey>> {
        let failures = self.failures.read().unwrap();
        let mut entries: Vec<(&SourceKey, &FailureEntry)> = failures.iter().collect();
        entries.sort_by_key(|(_, f)| f.seq);
        Ok(entries
            .into_iter()
            .take(limit)
            .map(|(k, _)| k.clone())
            .collect())
    }

    async fn count(&self, target: CountTarget) -> Result<i64> {
        let n = match target {
            CountTarget::Sources => self.all_sources().len(),
            CountTarget::UntrackedSources => {
                let sources = self.all_sources();
                let chunks = self.chunks.read().unwrap();
                sources
                    .iter()
                    .filter(|(key, modified)| Self::is_untracked(&chunks, key, *modified))
                    .count()
            }
            CountTarget::ChunkedSources => {
                let chunks = self.chunks.read().unwrap();
                let mut keys: Vec<SourceKey> = chunks.iter().map(|c| c.key()).collect();
                keys.sort();
                keys.dedup();
                keys.len()
            }
            CountTarget::FailedSources => self.failures.read().unwrap().len(),
            CountTarget::Chunks => self.chunks.read().unwrap().len(),
            CountTarget::Entities | CountTarget::EntityRelations => {
                return Err(anyhow!(
                    "{} are not tracked by the memory store",
                    target.as_str()
                ))
            }
        };
        Ok(n as i64)
    }
}

#[async_trait]
impl FileCatalog for MemoryStore {
    async fn find_file(&self, id: i64) -> Result<Option<FileRecord>> {
        Ok(self
            .files
            .read()
            .unwrap()
            .get(&id)
            .map(|f| f.record.clone()))
    }

    async fn read_file(&self, file: &FileRecord) -> Result<Vec<u8>> {
        self.files
            .read()
            .unwrap()
            .get(&file.id)
            .map(|f| f.content.clone())
            .ok_or_else(|| anyhow!("file {} has no content", file.id))
    }
}

#[async_trait]
impl ObjectCatalog for MemoryStore {
    async fn find_object(&self, id: i64) -> Result<Option<ObjectRecord>> {
        Ok(self.objects.read().unwrap().get(&id).cloned())
    }

    async fn find_schema(&self, id: i64) -> Result<Option<CatalogEntry>> {
        if *self.catalog_lookups_fail.lock().unwrap() {
            bail!("schema lookup unavailable");
        }
        Ok(self.schemas.read().unwrap().get(&id).cloned())
    }

    async fn find_register(&self, id: i64) -> Result<Option<CatalogEntry>> {
        if *self.catalog_lookups_fail.lock().unwrap() {
            bail!("register lookup unavailable");
        }
        Ok(self.registers.read().unwrap().get(&id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LanguageSignals, PositionReference};

    fn chunk(key: &SourceKey, index: i64, created_at: DateTime<Utc>) -> Chunk {
        Chunk {
            id: None,
            uuid: uuid::Uuid::new_v4().to_string(),
            source_type: key.source_type.clone(),
            source_id: key.source_id,
            chunk_index: index,
            text_content: format!("chunk {}", index),
            start_offset: 0,
            end_offset: 0,
            position_reference: PositionReference::Metadata,
            language: LanguageSignals::default(),
            overlap_size: 0,
            checksum: "abc".into(),
            indexed: false,
            vectorized: false,
            embedding_provider: None,
            owner: None,
            organisation: None,
            created_at,
            updated_at: created_at,
        }
    }

    #[tokio::test]
    async fn replace_is_all_or_nothing() {
        let store = MemoryStore::new();
        let key = SourceKey::file(1);
        let t = Utc::now();
        store
            .replace_chunks(&key, &[chunk(&key, -1, t), chunk(&key, 0, t)])
            .await
            .unwrap();

        store.fail_inserts_after(Some(2));
        let next = vec![chunk(&key, -1, t), chunk(&key, 0, t), chunk(&key, 1, t)];
        assert!(store.replace_chunks(&key, &next).await.is_err());

        let kept = store.chunks_for_source(&key).await.unwrap();
        assert_eq!(kept.len(), 2);
        assert_eq!(store.chunk_writes(), 1);
    }

    #[tokio::test]
    async fn assigns_ids_and_orders_by_index() {
        let store = MemoryStore::new();
        let key = SourceKey::object(9);
        let t = Utc::now();
        store
            .replace_chunks(&key, &[chunk(&key, 1, t), chunk(&key, -1, t), chunk(&key, 0, t)])
            .await
            .unwrap();
        let chunks = store.chunks_for_source(&key).await.unwrap();
        let indices: Vec<i64> = chunks.iter().map(|c| c.chunk_index).collect();
        assert_eq!(indices, vec![-1, 0, 1]);
        assert!(chunks.iter().all(|c| c.id.is_some()));
    }

    #[tokio::test]
    async fn failure_ledger_round_trip() {
        let store = MemoryStore::new();
        store.record_failure(&SourceKey::file(2), "boom").await.unwrap();
        store.record_failure(&SourceKey::file(1), "bang").await.unwrap();
        store.record_failure(&SourceKey::file(2), "boom again").await.unwrap();

        let failed = store.failed_sources(10).await.unwrap();
        assert_eq!(failed, vec![SourceKey::file(2), SourceKey::file(1)]);

        store.clear_failure(&SourceKey::file(2)).await.unwrap();
        assert_eq!(store.count(CountTarget::FailedSources).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn entity_counts_are_unavailable() {
        let store = MemoryStore::new();
        assert!(store.count(CountTarget::Entities).await.is_err());
        assert_eq!(store.count(CountTarget::Chunks).await.unwrap(), 0);
    }
}
