use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::chunk::{ChunkOptions, ChunkStrategy};
use crate::entity::RecognitionOptions;
use crate::source_file::DEFAULT_MAX_FILE_BYTES;
use crate::source_object::DEFAULT_MAX_DEPTH;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub entity_recognition: EntityRecognitionConfig,
    #[serde(default)]
    pub connectors: ConnectorsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default)]
    pub strategy: ChunkStrategy,
    #[serde(default = "default_max_chunks")]
    pub max_chunks_per_source: usize,
    #[serde(default = "default_min_chunk_size")]
    pub min_chunk_size: usize,
    /// Per source type overrides, e.g. `[chunking.sources.object]`.
    #[serde(default)]
    pub sources: BTreeMap<String, ChunkingOverride>,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            strategy: ChunkStrategy::default(),
            max_chunks_per_source: default_max_chunks(),
            min_chunk_size: default_min_chunk_size(),
            sources: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ChunkingOverride {
    pub chunk_size: Option<usize>,
    pub chunk_overlap: Option<usize>,
    pub strategy: Option<ChunkStrategy>,
    pub max_chunks_per_source: Option<usize>,
    pub min_chunk_size: Option<usize>,
}

impl ChunkingConfig {
    /// Chunker options for one source type, with overrides applied.
    pub fn options_for(&self, source_type: &str) -> ChunkOptions {
        let base = ChunkOptions {
            chunk_size: self.chunk_size,
            chunk_overlap: self.chunk_overlap,
            strategy: self.strategy,
            max_chunks: self.max_chunks_per_source,
            min_chunk_size: self.min_chunk_size,
        };
        match self.sources.get(source_type) {
            Some(o) => ChunkOptions {
                chunk_size: o.chunk_size.unwrap_or(base.chunk_size),
                chunk_overlap: o.chunk_overlap.unwrap_or(base.chunk_overlap),
                strategy: o.strategy.unwrap_or(base.strategy),
                max_chunks: o.max_chunks_per_source.unwrap_or(base.max_chunks),
                min_chunk_size: o.min_chunk_size.unwrap_or(base.min_chunk_size),
            },
            None => base,
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    200
}
fn default_max_chunks() -> usize {
    1000
}
fn default_min_chunk_size() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtractionConfig {
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
    #[serde(default = "default_object_max_depth")]
    pub object_max_depth: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
            object_max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

fn default_max_file_bytes() -> u64 {
    DEFAULT_MAX_FILE_BYTES
}
fn default_object_max_depth() -> usize {
    DEFAULT_MAX_DEPTH
}

#[derive(Debug, Deserialize, Clone)]
pub struct EntityRecognitionConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_recognition_method")]
    pub method: String,
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
}

impl Default for EntityRecognitionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            method: default_recognition_method(),
            confidence_threshold: default_confidence_threshold(),
        }
    }
}

impl EntityRecognitionConfig {
    pub fn options(&self) -> RecognitionOptions {
        RecognitionOptions {
            method: self.method.clone(),
            confidence_threshold: self.confidence_threshold,
        }
    }
}

fn default_recognition_method() -> String {
    "hybrid".to_string()
}
fn default_confidence_threshold() -> f64 {
    0.5
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ConnectorsConfig {
    pub filesystem: Option<FilesystemConnectorConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FilesystemConnectorConfig {
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
    /// Owner recorded on every scanned file.
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub organisation: Option<String>,
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*".to_string()]
}

fn validate_chunk_options(label: &str, options: &ChunkOptions) -> Result<()> {
    if options.chunk_size == 0 {
        bail!("{}.chunk_size must be > 0", label);
    }
    if options.chunk_overlap >= options.chunk_size {
        bail!(
            "{}.chunk_overlap ({}) must be smaller than chunk_size ({})",
            label,
            options.chunk_overlap,
            options.chunk_size
        );
    }
    if options.max_chunks == 0 {
        bail!("{}.max_chunks_per_source must be > 0", label);
    }
    Ok(())
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        validate_chunk_options("chunking", &self.chunking.options_for(""))?;
        for source_type in self.chunking.sources.keys() {
            validate_chunk_options(
                &format!("chunking.sources.{}", source_type),
                &self.chunking.options_for(source_type),
            )?;
        }

        if self.extraction.object_max_depth == 0 {
            bail!("extraction.object_max_depth must be > 0");
        }
        if self.extraction.max_file_bytes == 0 {
            bail!("extraction.max_file_bytes must be > 0");
        }

        if !(0.0..=1.0).contains(&self.entity_recognition.confidence_threshold) {
            bail!("entity_recognition.confidence_threshold must be in [0.0, 1.0]");
        }
        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;
    Ok(config)
}
