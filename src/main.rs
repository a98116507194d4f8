//! # OpenRegister Extract CLI (`orx`)
//!
//! ## Usage
//!
//! ```bash
//! orx --config ./config/orx.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `orx init` | Create the SQLite database and run schema migrations |
//! | `orx scan` | Record files under the configured root in the catalog |
//! | `orx import <json>` | Load schemas, registers and objects |
//! | `orx extract <type> <id>` | Extract and chunk one source |
//! | `orx discover` | Resolve sources that have no current chunks |
//! | `orx pending` | Extract sources that have no current chunks |
//! | `orx retry` | Force re-extraction of failed sources |
//! | `orx stats` | Show counts |
//! | `orx get <type> <id>` | Print the stored chunks of a source |
//! | `orx chunk <path>` | Chunk a local file without storing anything |

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use openregister_extract::chunk::{ChunkOptions, ChunkStrategy};
use openregister_extract::{config, connector_fs, connector_objects, extract_cmd, get, migrate, stats};

/// Text extraction and chunking for OpenRegister sources.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/orx.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "orx",
    about = "OpenRegister Extract: text extraction and chunking for register files and objects",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/orx.toml")]
    config: PathBuf,

    /// Enable debug logging (overridden by RUST_LOG).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// Scan the filesystem connector root and record files in the catalog.
    Scan,

    /// Import schemas, registers and objects from a JSON file.
    Import {
        /// Path to the JSON import file.
        path: PathBuf,
    },

    /// Extract, chunk and store one source.
    Extract {
        /// Source type: `file` or `object`.
        source_type: String,
        /// Source id.
        source_id: i64,
        /// Re-extract even when stored chunks are current.
        #[arg(long)]
        force: bool,
    },

    /// Resolve metadata for sources that have no current chunks.
    Discover {
        #[arg(long, default_value_t = 100)]
        limit: usize,
    },

    /// Extract sources that have no current chunks.
    Pending {
        #[arg(long, default_value_t = 100)]
        limit: usize,
    },

    /// Force re-extraction of sources that failed in an earlier batch.
    Retry {
        #[arg(long, default_value_t = 100)]
        limit: usize,
    },

    /// Show source, chunk and entity counts.
    Stats,

    /// Print the stored chunks of a source.
    Get {
        source_type: String,
        source_id: i64,
        /// Print JSON instead of text.
        #[arg(long)]
        json: bool,
    },

    /// Chunk a local file and print the spans. Nothing is stored.
    ///
    /// Uses the `[chunking]` settings from the config file when it can be
    /// read, otherwise the built-in defaults.
    Chunk {
        path: PathBuf,
        #[arg(long)]
        chunk_size: Option<usize>,
        #[arg(long)]
        overlap: Option<usize>,
        /// `fixed_size` or `recursive_character`.
        #[arg(long)]
        strategy: Option<ChunkStrategy>,
        /// Print JSON instead of text.
        #[arg(long)]
        json: bool,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    // Commands that don't require config
    if let Commands::Chunk {
        path,
        chunk_size,
        overlap,
        strategy,
        json,
    } = &cli.command
    {
        let base = config::load_config(&cli.config)
            .map(|c| c.chunking.options_for("file"))
            .unwrap_or_else(|_| ChunkOptions::default());
        return extract_cmd::run_chunk(path, base, *chunk_size, *overlap, *strategy, *json);
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Scan => {
            connector_fs::run_scan(&cfg).await?;
        }
        Commands::Import { path } => {
            connector_objects::run_import(&cfg, &path).await?;
        }
        Commands::Extract {
            source_type,
            source_id,
            force,
        } => {
            extract_cmd::run_extract(&cfg, &source_type, source_id, force).await?;
        }
        Commands::Discover { limit } => {
            extract_cmd::run_discover(&cfg, limit).await?;
        }
        Commands::Pending { limit } => {
            extract_cmd::run_pending(&cfg, limit).await?;
        }
        Commands::Retry { limit } => {
            extract_cmd::run_retry(&cfg, limit).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Get {
            source_type,
            source_id,
            json,
        } => {
            get::run_get(&cfg, &source_type, source_id, json).await?;
        }
        Commands::Chunk { .. } => unreachable!("handled before config loading"),
    }

    Ok(())
}
