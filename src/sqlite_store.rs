//! SQLite-backed storage.
//!
//! [`SqliteStore`] owns a connection pool and implements every storage
//! trait: [`ChunkStore`] over the `chunks` and `extraction_failures`
//! tables, [`FileCatalog`] over `files` (content is read from disk at the
//! recorded path) and [`ObjectCatalog`] over `objects`, `schemas` and
//! `registers`. It also persists the output of the pattern entity
//! recognizer.
//!
//! Timestamps are stored as Unix seconds.

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::db;
use crate::entity::EntityMention;
use crate::migrate;
use crate::models::{
    CatalogEntry, Chunk, FileRecord, LanguageSignals, ObjectRecord, RecognitionSummary, SourceKey,
};
use crate::store::{ChunkStore, CountTarget, FileCatalog, ObjectCatalog};

/// Every catalog source with its modification time.
const SOURCES: &str = r#"
    SELECT 'file' AS source_type, id AS source_id, modified_at FROM files
    UNION ALL
    SELECT 'object' AS source_type, id AS source_id, updated_at AS modified_at FROM objects
"#;

/// Latest chunk snapshot per source.
const LATEST: &str = r#"
    SELECT source_type, source_id, MAX(created_at) AS latest
    FROM chunks GROUP BY source_type, source_id
"#;

/// Untracked predicate over `SOURCES s` joined with `LATEST c`. Both columns
/// hold whole seconds, so this matches `extraction::is_stale`. A chunked
/// source without a modification time counts as tracked.
const UNTRACKED: &str = "(c.latest IS NULL OR (s.modified_at IS NOT NULL AND c.latest < s.modified_at))";

fn to_datetime(secs: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0).ok_or_else(|| anyhow!("timestamp out of range: {}", secs))
}

fn opt_datetime(secs: Option<i64>) -> Result<Option<DateTime<Utc>>> {
    secs.map(to_datetime).transpose()
}

fn chunk_from_row(row: &SqliteRow) -> Result<Chunk> {
    let position: String = row.try_get("position_reference")?;
    Ok(Chunk {
        id: Some(row.try_get("id")?),
        uuid: row.try_get("uuid")?,
        source_type: row.try_get("source_type")?,
        source_id: row.try_get("source_id")?,
        chunk_index: row.try_get("chunk_index")?,
        text_content: row.try_get("text_content")?,
        start_offset: row.try_get::<i64, _>("start_offset")? as usize,
        end_offset: row.try_get::<i64, _>("end_offset")? as usize,
        position_reference: serde_json::from_str(&position)
            .with_context(|| format!("invalid position reference: {}", position))?,
        language: LanguageSignals {
            language: row.try_get("language")?,
            language_level: row.try_get("language_level")?,
            language_confidence: row.try_get("language_confidence")?,
            detection_method: row.try_get("detection_method")?,
        },
        overlap_size: row.try_get::<i64, _>("overlap_size")? as usize,
        checksum: row.try_get("checksum")?,
        indexed: row.try_get("indexed")?,
        vectorized: row.try_get("vectorized")?,
        embedding_provider: row.try_get("embedding_provider")?,
        owner: row.try_get("owner")?,
        organisation: row.try_get("organisation")?,
        created_at: to_datetime(row.try_get("created_at")?)?,
        updated_at: to_datetime(row.try_get("updated_at")?)?,
    })
}

fn file_from_row(row: &SqliteRow) -> Result<FileRecord> {
    Ok(FileRecord {
        id: row.try_get("id")?,
        path: row.try_get("path")?,
        name: row.try_get("name")?,
        mime_type: row.try_get("mime_type")?,
        size: row.try_get::<i64, _>("size")?.max(0) as u64,
        modified_at: opt_datetime(row.try_get("modified_at")?)?,
        owner: row.try_get("owner")?,
        organisation: row.try_get("organisation")?,
    })
}

fn object_from_row(row: &SqliteRow) -> Result<ObjectRecord> {
    let data_json: String = row.try_get("data_json")?;
    let data: Map<String, Value> =
        serde_json::from_str(&data_json).context("object data is not a JSON object")?;
    Ok(ObjectRecord {
        id: row.try_get("id")?,
        uuid: row.try_get("uuid")?,
        version: row.try_get("version")?,
        schema_id: row.try_get("schema_id")?,
        register_id: row.try_get("register_id")?,
        data,
        owner: row.try_get("owner")?,
        organisation: row.try_get("organisation")?,
        updated_at: opt_datetime(row.try_get("updated_at")?)?,
    })
}

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open the database at `path` and apply migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        let pool = db::connect_path(path).await?;
        migrate::migrate(&pool).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Insert or update a file by path. Returns its id.
    pub async fn upsert_file(&self, file: &FileRecord) -> Result<i64> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO files (path, name, mime_type, size, modified_at, owner, organisation)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(path) DO UPDATE SET
                name = excluded.name,
                mime_type = excluded.mime_type,
                size = excluded.size,
                modified_at = excluded.modified_at,
                owner = excluded.owner,
                organisation = excluded.organisation
            RETURNING id
            "#,
        )
        .bind(&file.path)
        .bind(&file.name)
        .bind(&file.mime_type)
        .bind(file.size as i64)
        .bind(file.modified_at.map(|t| t.timestamp()))
        .bind(&file.owner)
        .bind(&file.organisation)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    pub async fn upsert_schema(&self, entry: &CatalogEntry) -> Result<()> {
        self.upsert_catalog_entry("schemas", entry).await
    }

    pub async fn upsert_register(&self, entry: &CatalogEntry) -> Result<()> {
        self.upsert_catalog_entry("registers", entry).await
    }

    async fn upsert_catalog_entry(&self, table: &str, entry: &CatalogEntry) -> Result<()> {
        let sql = format!(
            "INSERT INTO {} (id, title, description) VALUES (?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET title = excluded.title, description = excluded.description",
            table
        );
        sqlx::query(&sql)
            .bind(entry.id)
            .bind(&entry.title)
            .bind(&entry.description)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn upsert_object(&self, object: &ObjectRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO objects (id, uuid, version, schema_id, register_id, data_json, owner, organisation, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                uuid = excluded.uuid,
                version = excluded.version,
                schema_id = excluded.schema_id,
                register_id = excluded.register_id,
                data_json = excluded.data_json,
                owner = excluded.owner,
                organisation = excluded.organisation,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(object.id)
        .bind(&object.uuid)
        .bind(&object.version)
        .bind(object.schema_id)
        .bind(object.register_id)
        .bind(serde_json::to_string(&object.data)?)
        .bind(&object.owner)
        .bind(&object.organisation)
        .bind(object.updated_at.map(|t| t.timestamp()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Replace the recognized entity mentions of a source.
    ///
    /// `mentions` pairs each mention with the id of the chunk it was found
    /// in. Entities are shared across sources; relations are per chunk.
    pub async fn replace_entity_mentions(
        &self,
        key: &SourceKey,
        mentions: &[(i64, EntityMention)],
        method: &str,
    ) -> Result<RecognitionSummary> {
        let now = Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM entity_relations WHERE source_type = ? AND source_id = ?")
            .bind(&key.source_type)
            .bind(key.source_id)
            .execute(&mut *tx)
            .await?;

        let mut entity_ids = Vec::new();
        let mut relations = 0usize;
        for (chunk_id, mention) in mentions {
            sqlx::query(
                "INSERT INTO entities (entity_type, value, created_at) VALUES (?, ?, ?) \
                 ON CONFLICT(entity_type, value) DO NOTHING",
            )
            .bind(&mention.entity_type)
            .bind(&mention.value)
            .bind(now)
            .execute(&mut *tx)
            .await?;

            let entity_id: i64 =
                sqlx::query_scalar("SELECT id FROM entities WHERE entity_type = ? AND value = ?")
                    .bind(&mention.entity_type)
                    .bind(&mention.value)
                    .fetch_one(&mut *tx)
                    .await?;

            let inserted = sqlx::query(
                r#"
                INSERT INTO entity_relations
                    (entity_id, chunk_id, source_type, source_id, position_start, position_end,
                     confidence, detection_method, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(entity_id, chunk_id, position_start) DO NOTHING
                "#,
            )
            .bind(entity_id)
            .bind(chunk_id)
            .bind(&key.source_type)
            .bind(key.source_id)
            .bind(mention.start as i64)
            .bind(mention.end as i64)
            .bind(mention.confidence)
            .bind(method)
            .bind(now)
            .execute(&mut *tx)
            .await?;

            relations += inserted.rows_affected() as usize;
            if !entity_ids.contains(&entity_id) {
                entity_ids.push(entity_id);
            }
        }

        tx.commit().await?;
        Ok(RecognitionSummary {
            entities_found: entity_ids.len(),
            relations_created: relations,
        })
    }

    async fn count_query(&self, sql: &str) -> Result<i64> {
        Ok(sqlx::query_scalar(sql).fetch_one(&self.pool).await?)
    }
}

#[async_trait]
impl ChunkStore for SqliteStore {
    async fn latest_timestamp(&self, key: &SourceKey) -> Result<Option<DateTime<Utc>>> {
        let latest: Option<i64> = sqlx::query_scalar(
            "SELECT MAX(created_at) FROM chunks WHERE source_type = ? AND source_id = ?",
        )
        .bind(&key.source_type)
        .bind(key.source_id)
        .fetch_one(&self.pool)
        .await?;
        opt_datetime(latest)
    }

    async fn replace_chunks(&self, key: &SourceKey, chunks: &[Chunk]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM chunks WHERE source_type = ? AND source_id = ?")
            .bind(&key.source_type)
            .bind(key.source_id)
            .execute(&mut *tx)
            .await?;

        for chunk in chunks {
            sqlx::query(
                r#"
                INSERT INTO chunks (
                    uuid, source_type, source_id, chunk_index, text_content,
                    start_offset, end_offset, position_reference,
                    language, language_level, language_confidence, detection_method,
                    overlap_size, checksum, indexed, vectorized, embedding_provider,
                    owner, organisation, created_at, updated_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&chunk.uuid)
            .bind(&chunk.source_type)
            .bind(chunk.source_id)
            .bind(chunk.chunk_index)
            .bind(&chunk.text_content)
            .bind(chunk.start_offset as i64)
            .bind(chunk.end_offset as i64)
            .bind(serde_json::to_string(&chunk.position_reference)?)
            .bind(&chunk.language.language)
            .bind(&chunk.language.language_level)
            .bind(chunk.language.language_confidence)
            .bind(&chunk.language.detection_method)
            .bind(chunk.overlap_size as i64)
            .bind(&chunk.checksum)
            .bind(chunk.indexed)
            .bind(chunk.vectorized)
            .bind(&chunk.embedding_provider)
            .bind(&chunk.owner)
            .bind(&chunk.organisation)
            .bind(chunk.created_at.timestamp())
            .bind(chunk.updated_at.timestamp())
            .execute(&mut *tx)
            .await
            .with_context(|| format!("inserting chunk {} of {}", chunk.chunk_index, key))?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn chunks_for_source(&self, key: &SourceKey) -> Result<Vec<Chunk>> {
        let rows = sqlx::query(
            "SELECT * FROM chunks WHERE source_type = ? AND source_id = ? ORDER BY chunk_index ASC",
        )
        .bind(&key.source_type)
        .bind(key.source_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(chunk_from_row).collect()
    }

    async fn untracked_sources(&self, limit: usize) -> Result<Vec<SourceKey>> {
        let sql = format!(
            r#"
            SELECT s.source_type, s.source_id
            FROM ({SOURCES}) s
            LEFT JOIN ({LATEST}) c
                ON c.source_type = s.source_type AND c.source_id = s.source_id
            LEFT JOIN extraction_failures f
                ON f.source_type = s.source_type AND f.source_id = s.source_id
            WHERE f.source_id IS NULL AND {UNTRACKED}
            ORDER BY s.source_type, s.source_id
            LIMIT ?
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| Ok(SourceKey::new(row.try_get::<String, _>(0)?, row.try_get(1)?)))
            .collect()
    }

    async fn record_failure(&self, key: &SourceKey, message: &str) -> Result<()> {
        let now = Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO extraction_failures (source_type, source_id, error, attempts, first_failed_at, last_failed_at)
            VALUES (?, ?, ?, 1, ?, ?)
            ON CONFLICT(source_type, source_id) DO UPDATE SET
                error = excluded.error,
                attempts = attempts + 1,
                last_failed_at = excluded.last_failed_at
            "#,
        )
        .bind(&key.source_type)
        .bind(key.source_id)
        .bind(message)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn clear_failure(&self, key: &SourceKey) -> Result<()> {
        sqlx::query("DELETE FROM extraction_failures WHERE source_type = ? AND source_id = ?")
            .bind(&key.source_type)
            .bind(key.source_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn failed_sources(&self, limit: usize) -> Result<Vec<SourceKey>> {
        let rows = sqlx::query(
            "SELECT source_type, source_id FROM extraction_failures \
             ORDER BY first_failed_at ASC, rowid ASC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| Ok(SourceKey::new(row.try_get::<String, _>(0)?, row.try_get(1)?)))
            .collect()
    }

    async fn count(&self, target: CountTarget) -> Result<i64> {
        match target {
            CountTarget::Sources => {
                self.count_query("SELECT (SELECT COUNT(*) FROM files) + (SELECT COUNT(*) FROM objects)")
                    .await
            }
            CountTarget::UntrackedSources => {
                let sql = format!(
                    "SELECT COUNT(*) FROM ({SOURCES}) s LEFT JOIN ({LATEST}) c \
                     ON c.source_type = s.source_type AND c.source_id = s.source_id \
                     WHERE {UNTRACKED}"
                );
                self.count_query(&sql).await
            }
            CountTarget::ChunkedSources => {
                self.count_query("SELECT COUNT(*) FROM (SELECT DISTINCT source_type, source_id FROM chunks)")
                    .await
            }
            CountTarget::FailedSources => {
                self.count_query("SELECT COUNT(*) FROM extraction_failures").await
            }
            CountTarget::Chunks => self.count_query("SELECT COUNT(*) FROM chunks").await,
            CountTarget::Entities => self.count_query("SELECT COUNT(*) FROM entities").await,
            CountTarget::EntityRelations => {
                self.count_query("SELECT COUNT(*) FROM entity_relations").await
            }
        }
    }
}

#[async_trait]
impl FileCatalog for SqliteStore {
    async fn find_file(&self, id: i64) -> Result<Option<FileRecord>> {
        let row = sqlx::query("SELECT * FROM files WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(file_from_row).transpose()
    }

    async fn read_file(&self, file: &FileRecord) -> Result<Vec<u8>> {
        tokio::fs::read(&file.path)
            .await
            .with_context(|| format!("Failed to read file: {}", file.path))
    }
}

#[async_trait]
impl ObjectCatalog for SqliteStore {
    async fn find_object(&self, id: i64) -> Result<Option<ObjectRecord>> {
        let row = sqlx::query("SELECT * FROM objects WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(object_from_row).transpose()
    }

    async fn find_schema(&self, id: i64) -> Result<Option<CatalogEntry>> {
        let row = sqlx::query("SELECT id, title, description FROM schemas WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| CatalogEntry {
            id: r.get("id"),
            title: r.get("title"),
            description: r.get("description"),
        }))
    }

    async fn find_register(&self, id: i64) -> Result<Option<CatalogEntry>> {
        let row = sqlx::query("SELECT id, title, description FROM registers WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| CatalogEntry {
            id: r.get("id"),
            title: r.get("title"),
            description: r.get("description"),
        }))
    }
}
