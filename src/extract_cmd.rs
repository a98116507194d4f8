//! CLI entry points for the extraction pipeline.
//!
//! Each `run_*` function opens the store, builds an [`ExtractionService`]
//! from the configuration, runs one operation and prints a short report to
//! stdout.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;

use crate::chunk::{chunk_document, ChunkOptions, ChunkStrategy};
use crate::config::Config;
use crate::convert::BuiltinConverter;
use crate::entity::{EntityRecognizer, NoopRecognizer, PatternRecognizer};
use crate::extraction::ExtractionService;
use crate::models::{BatchSummary, ExtractionOutcome};
use crate::source_file::FileHandler;
use crate::source_object::ObjectHandler;
use crate::sources::HandlerRegistry;
use crate::sqlite_store::SqliteStore;

/// Wire the SQLite store, both handlers and the configured recognizer
/// into a service.
pub fn build_service(config: &Config, store: &SqliteStore) -> ExtractionService {
    let shared = Arc::new(store.clone());

    let mut handlers = HandlerRegistry::new();
    handlers.register(Arc::new(
        FileHandler::new(shared.clone(), Arc::new(BuiltinConverter))
            .with_max_file_bytes(config.extraction.max_file_bytes),
    ));
    handlers.register(Arc::new(
        ObjectHandler::new(shared.clone()).with_max_depth(config.extraction.object_max_depth),
    ));

    let recognizer: Arc<dyn EntityRecognizer> = if config.entity_recognition.enabled {
        Arc::new(PatternRecognizer::new(store.clone()))
    } else {
        Arc::new(NoopRecognizer)
    };

    ExtractionService::new(shared, handlers)
        .with_chunking(config.chunking.clone())
        .with_recognizer(recognizer, config.entity_recognition.options())
}

async fn open(config: &Config) -> Result<(SqliteStore, ExtractionService)> {
    let store = SqliteStore::open(&config.db.path).await?;
    let service = build_service(config, &store);
    Ok((store, service))
}

pub async fn run_extract(config: &Config, source_type: &str, source_id: i64, force: bool) -> Result<()> {
    let (store, service) = open(config).await?;
    let outcome = service.extract_source(source_type, source_id, force).await;
    store.close().await;
    let outcome =
        outcome.with_context(|| format!("Extraction of {}:{} failed", source_type, source_id))?;

    println!("extract {}:{}", source_type, source_id);
    match outcome {
        ExtractionOutcome::UpToDate => println!("  status: up to date"),
        ExtractionOutcome::Extracted {
            chunks,
            checksum,
            entities,
        } => {
            println!("  status: extracted");
            println!("  chunks: {}", chunks);
            println!("  checksum: {}", checksum);
            if let Some(e) = entities {
                println!("  entities: {}", e.entities_found);
                println!("  relations: {}", e.relations_created);
            }
        }
    }
    println!("ok");
    Ok(())
}

fn print_batch(title: &str, label: &str, summary: &BatchSummary) {
    println!("{}", title);
    println!("  {}: {}", label, summary.succeeded);
    println!("  failed: {}", summary.failed);
    println!("  total: {}", summary.total);
    println!("ok");
}

pub async fn run_discover(config: &Config, limit: usize) -> Result<()> {
    let (store, service) = open(config).await?;
    let summary = service.discover_and_queue(limit).await;
    store.close().await;
    print_batch("discover", "discovered", &summary?);
    Ok(())
}

pub async fn run_pending(config: &Config, limit: usize) -> Result<()> {
    let (store, service) = open(config).await?;
    let summary = service.process_pending(limit).await;
    store.close().await;
    print_batch("pending", "processed", &summary?);
    Ok(())
}

pub async fn run_retry(config: &Config, limit: usize) -> Result<()> {
    let (store, service) = open(config).await?;
    let summary = service.retry_failed(limit).await;
    store.close().await;
    print_batch("retry", "retried", &summary?);
    Ok(())
}

/// `orx chunk`: split a local text file and print the spans.
pub fn run_chunk(
    path: &Path,
    base: ChunkOptions,
    chunk_size: Option<usize>,
    overlap: Option<usize>,
    strategy: Option<ChunkStrategy>,
    json: bool,
) -> Result<()> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let text = crate::sanitize::decode(&bytes);

    let options = ChunkOptions {
        chunk_size: chunk_size.unwrap_or(base.chunk_size),
        chunk_overlap: overlap.unwrap_or(base.chunk_overlap),
        strategy: strategy.unwrap_or(base.strategy),
        ..base
    };
    if options.chunk_size == 0 || options.chunk_overlap >= options.chunk_size {
        anyhow::bail!("--overlap must be smaller than a non-zero --chunk-size");
    }

    let spans = chunk_document(&text, &options);
    if json {
        println!("{}", serde_json::to_string_pretty(&spans)?);
        return Ok(());
    }

    println!(
        "--- {} spans (size {}, overlap {}, {}) ---",
        spans.len(),
        options.chunk_size,
        options.chunk_overlap,
        options.strategy
    );
    for (i, span) in spans.iter().enumerate() {
        println!("[chunk {}] {}..{}", i, span.start_offset, span.end_offset);
        println!("{}", span.text);
        println!();
    }
    Ok(())
}
