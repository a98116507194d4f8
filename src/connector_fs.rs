//! Filesystem connector.
//!
//! Walks the configured root and records every matching file in the `files`
//! catalog with its MIME type (guessed from the extension), size and
//! modification time. Content is not read here; the file handler reads it
//! at extraction time.

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::Path;
use tracing::debug;
use walkdir::WalkDir;

use crate::config::{Config, FilesystemConnectorConfig};
use crate::convert::{MIME_DOCX, MIME_PDF, MIME_PPTX, MIME_XLSX};
use crate::models::FileRecord;
use crate::sqlite_store::SqliteStore;

/// MIME type for a path, from its extension.
pub fn mime_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "txt" | "log" => "text/plain",
        "md" | "markdown" => "text/markdown",
        "html" | "htm" => "text/html",
        "csv" => "text/csv",
        "json" => "application/json",
        "xml" => "application/xml",
        "yaml" | "yml" => "application/yaml",
        "pdf" => MIME_PDF,
        "docx" => MIME_DOCX,
        "xlsx" => MIME_XLSX,
        "pptx" => MIME_PPTX,
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "zip" => "application/zip",
        _ => "application/octet-stream",
    }
}

/// Walk the configured root and return a record per matching file.
/// Record ids are zero until the catalog assigns them.
pub fn scan_filesystem(fs_config: &FilesystemConnectorConfig) -> Result<Vec<FileRecord>> {
    let root = &fs_config.root;
    if !root.exists() {
        bail!(
            "Filesystem connector root does not exist: {}",
            root.display()
        );
    }
    let root = root
        .canonicalize()
        .with_context(|| format!("Failed to resolve {}", root.display()))?;

    let include_set = build_globset(&fs_config.include_globs)?;

    let mut default_excludes = vec![
        "**/.git/**".to_string(),
        "**/target/**".to_string(),
        "**/node_modules/**".to_string(),
    ];
    default_excludes.extend(fs_config.exclude_globs.clone());
    let exclude_set = build_globset(&default_excludes)?;

    let mut files = Vec::new();
    for entry in WalkDir::new(&root).follow_links(fs_config.follow_symlinks) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(&root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().to_string();
        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }

        let metadata = entry.metadata()?;
        let modified_at = metadata.modified().ok().map(DateTime::<Utc>::from);
        debug!(path = %rel_str, size = metadata.len(), "file found");

        files.push(FileRecord {
            id: 0,
            path: path.to_string_lossy().to_string(),
            name: path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
            mime_type: mime_for_path(path).to_string(),
            size: metadata.len(),
            modified_at,
            owner: fs_config.owner.clone(),
            organisation: fs_config.organisation.clone(),
        });
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}

/// `orx scan`: record the filesystem into the catalog.
pub async fn run_scan(config: &Config) -> Result<()> {
    let fs_config = config
        .connectors
        .filesystem
        .as_ref()
        .ok_or_else(|| anyhow!("Filesystem connector not configured"))?;

    let files = scan_filesystem(fs_config)?;
    let store = SqliteStore::open(&config.db.path).await?;
    for file in &files {
        store.upsert_file(file).await?;
    }
    store.close().await;

    println!("scan filesystem");
    println!("  root: {}", fs_config.root.display());
    println!("  files recorded: {}", files.len());
    println!("ok");
    Ok(())
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn fs_config(root: PathBuf, include: &[&str]) -> FilesystemConnectorConfig {
        FilesystemConnectorConfig {
            root,
            include_globs: include.iter().map(|s| s.to_string()).collect(),
            exclude_globs: vec!["drafts/**".to_string()],
            follow_symlinks: false,
            owner: Some("alice".into()),
            organisation: None,
        }
    }

    #[test]
    fn mime_by_extension() {
        assert_eq!(mime_for_path(Path::new("a/b.MD")), "text/markdown");
        assert_eq!(mime_for_path(Path::new("report.pdf")), MIME_PDF);
        assert_eq!(mime_for_path(Path::new("sheet.xlsx")), MIME_XLSX);
        assert_eq!(mime_for_path(Path::new("noext")), "application/octet-stream");
    }

    #[test]
    fn scan_applies_globs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("docs")).unwrap();
        std::fs::create_dir_all(dir.path().join("drafts")).unwrap();
        std::fs::write(dir.path().join("docs/a.md"), "# A").unwrap();
        std::fs::write(dir.path().join("docs/b.txt"), "b").unwrap();
        std::fs::write(dir.path().join("drafts/c.md"), "c").unwrap();
        std::fs::write(dir.path().join("image.png"), [0u8, 1]).unwrap();

        let files = scan_filesystem(&fs_config(dir.path().to_path_buf(), &["**/*.md", "**/*.txt"]))
            .unwrap();
        let names: Vec<&str> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["a.md", "b.txt"]);
        assert_eq!(files[0].mime_type, "text/markdown");
        assert_eq!(files[0].size, 3);
        assert_eq!(files[0].owner.as_deref(), Some("alice"));
        assert!(files[0].modified_at.is_some());
        assert!(Path::new(&files[0].path).is_absolute());
    }

    #[test]
    fn missing_root_is_an_error() {
        let err = scan_filesystem(&fs_config(PathBuf::from("/nonexistent/orx"), &["**/*"]))
            .unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }
}
