//! Stored chunks of one source.
//!
//! Used by `orx get <type> <id>` to show what an extraction persisted.

use anyhow::{bail, Result};
use serde::Serialize;

use crate::config::Config;
use crate::models::{Chunk, PositionReference, SourceKey};
use crate::sqlite_store::SqliteStore;
use crate::store::ChunkStore;

#[derive(Debug, Clone, Serialize)]
pub struct ChunkResponse {
    pub index: i64,
    pub uuid: String,
    pub start_offset: usize,
    pub end_offset: usize,
    pub overlap_size: usize,
    pub position: PositionReference,
    pub language: Option<String>,
    pub created_at: String, // ISO8601
    pub text: String,
}

impl From<Chunk> for ChunkResponse {
    fn from(chunk: Chunk) -> Self {
        Self {
            index: chunk.chunk_index,
            uuid: chunk.uuid,
            start_offset: chunk.start_offset,
            end_offset: chunk.end_offset,
            overlap_size: chunk.overlap_size,
            position: chunk.position_reference,
            language: chunk.language.language,
            created_at: chunk.created_at.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            text: chunk.text_content,
        }
    }
}

pub async fn get_chunks(store: &dyn ChunkStore, key: &SourceKey) -> Result<Vec<ChunkResponse>> {
    let chunks = store.chunks_for_source(key).await?;
    if chunks.is_empty() {
        bail!("no chunks stored for {}", key);
    }
    Ok(chunks.into_iter().map(ChunkResponse::from).collect())
}

pub async fn run_get(config: &Config, source_type: &str, source_id: i64, json: bool) -> Result<()> {
    let store = SqliteStore::open(&config.db.path).await?;
    let key = SourceKey::new(source_type, source_id);
    let chunks = get_chunks(&store, &key).await;
    store.close().await;
    let chunks = chunks?;

    if json {
        println!("{}", serde_json::to_string_pretty(&chunks)?);
        return Ok(());
    }

    println!("--- {} ---", key);
    if let Some(first) = chunks.first() {
        println!("created_at:   {}", first.created_at);
    }
    println!("chunks:       {}", chunks.len());
    println!();

    for chunk in &chunks {
        let position = serde_json::to_string(&chunk.position)?;
        println!(
            "[chunk {}] {}..{} overlap {} {}",
            chunk.index, chunk.start_offset, chunk.end_offset, chunk.overlap_size, position
        );
        println!("{}", chunk.text);
        println!();
    }
    Ok(())
}
