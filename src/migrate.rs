use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

const SCHEMA: &[&str] = &[
    // Catalog: files found by the filesystem connector.
    r#"
    CREATE TABLE IF NOT EXISTS files (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        path TEXT NOT NULL UNIQUE,
        name TEXT NOT NULL,
        mime_type TEXT NOT NULL,
        size INTEGER NOT NULL,
        modified_at INTEGER,
        owner TEXT,
        organisation TEXT
    )
    "#,
    // Catalog: register objects and their schema/register descriptions.
    r#"
    CREATE TABLE IF NOT EXISTS schemas (
        id INTEGER PRIMARY KEY,
        title TEXT,
        description TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS registers (
        id INTEGER PRIMARY KEY,
        title TEXT,
        description TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS objects (
        id INTEGER PRIMARY KEY,
        uuid TEXT NOT NULL UNIQUE,
        version TEXT,
        schema_id INTEGER,
        register_id INTEGER,
        data_json TEXT NOT NULL DEFAULT '{}',
        owner TEXT,
        organisation TEXT,
        updated_at INTEGER
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS chunks (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        uuid TEXT NOT NULL UNIQUE,
        source_type TEXT NOT NULL,
        source_id INTEGER NOT NULL,
        chunk_index INTEGER NOT NULL,
        text_content TEXT NOT NULL,
        start_offset INTEGER NOT NULL,
        end_offset INTEGER NOT NULL,
        position_reference TEXT NOT NULL,
        language TEXT,
        language_level TEXT,
        language_confidence REAL,
        detection_method TEXT,
        overlap_size INTEGER NOT NULL DEFAULT 0,
        checksum TEXT NOT NULL,
        indexed INTEGER NOT NULL DEFAULT 0,
        vectorized INTEGER NOT NULL DEFAULT 0,
        embedding_provider TEXT,
        owner TEXT,
        organisation TEXT,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        UNIQUE(source_type, source_id, chunk_index)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_chunks_source ON chunks(source_type, source_id, created_at)",
    r#"
    CREATE TABLE IF NOT EXISTS extraction_failures (
        source_type TEXT NOT NULL,
        source_id INTEGER NOT NULL,
        error TEXT NOT NULL,
        attempts INTEGER NOT NULL DEFAULT 1,
        first_failed_at INTEGER NOT NULL,
        last_failed_at INTEGER NOT NULL,
        PRIMARY KEY (source_type, source_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS entities (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        entity_type TEXT NOT NULL,
        value TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        UNIQUE(entity_type, value)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS entity_relations (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        entity_id INTEGER NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
        chunk_id INTEGER NOT NULL REFERENCES chunks(id) ON DELETE CASCADE,
        source_type TEXT NOT NULL,
        source_id INTEGER NOT NULL,
        position_start INTEGER NOT NULL,
        position_end INTEGER NOT NULL,
        confidence REAL NOT NULL,
        detection_method TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        UNIQUE(entity_id, chunk_id, position_start)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_entity_relations_source ON entity_relations(source_type, source_id)",
];

/// Create every table and index. Idempotent.
pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate(&pool).await?;
    pool.close().await;
    Ok(())
}
