//! Pipeline statistics.
//!
//! Prints what the catalogs hold and how much of it has been chunked. Every
//! count is independent; one that cannot be computed shows as zero.

use anyhow::Result;

use crate::config::Config;
use crate::extract_cmd::build_service;
use crate::sqlite_store::SqliteStore;

pub async fn run_stats(config: &Config) -> Result<()> {
    let store = SqliteStore::open(&config.db.path).await?;
    let stats = build_service(config, &store).stats().await;
    store.close().await;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("OpenRegister extraction stats");
    println!("===============================");
    println!();
    println!("  Database:          {}", config.db.path.display());
    println!("  Size:              {}", format_bytes(db_size));
    println!();
    println!("  Sources:           {}", stats.total_sources);
    println!("  Untracked:         {}", stats.untracked_sources);
    println!(
        "  Chunked:           {} ({}%)",
        stats.chunked_sources,
        percent(stats.chunked_sources, stats.total_sources)
    );
    println!("  Failed:            {}", stats.failed_sources);
    println!("  Chunks:            {}", stats.total_chunks);
    println!("  Entities:          {}", stats.entities);
    println!("  Entity relations:  {}", stats.entity_relations);
    println!();
    Ok(())
}

fn percent(part: i64, whole: i64) -> i64 {
    if whole > 0 {
        (part * 100) / whole
    } else {
        0
    }
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_sizes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn percent_of_empty_is_zero() {
        assert_eq!(percent(3, 0), 0);
        assert_eq!(percent(1, 4), 25);
    }
}
