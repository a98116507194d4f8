//! # OpenRegister Extract
//!
//! Text extraction and chunking for register data.
//!
//! Sources (files on disk and structured register objects) are turned into
//! sanitized text, split into overlapping chunks and stored with enough
//! provenance to trace every chunk back to its origin. Re-extraction is
//! skipped when stored chunks are newer than the source, and every chunk
//! set is replaced in a single transaction.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌───────────────┐   ┌──────────┐
//! │  Handlers   │──▶│  Sanitizer   │──▶│    Chunker    │──▶│  Chunk   │
//! │ file/object │   │ + language   │   │ recursive/fix │   │  Store   │
//! └─────────────┘   └──────────────┘   └───────────────┘   └────┬─────┘
//!        ▲                                                       │
//!        │              ExtractionService                        ▼
//!   ┌─────────┐                                           ┌────────────┐
//!   │ Catalog │                                           │  Entity    │
//!   │ (SQLite)│                                           │ recognizer │
//!   └─────────┘                                           └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! orx init                     # create database
//! orx scan                     # record files under the configured root
//! orx import objects.json      # load schemas, registers and objects
//! orx pending --limit 100      # extract everything not yet chunked
//! orx get file 1               # show stored chunks
//! orx stats
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Extraction error taxonomy |
//! | [`sanitize`] | Text normalization and byte decoding |
//! | [`chunk`] | Recursive and fixed-size chunking |
//! | [`language`] | Heuristic language detection |
//! | [`convert`] | PDF and OOXML to text |
//! | [`sources`] | Source handler trait and registry |
//! | [`source_file`] | File handler |
//! | [`source_object`] | Register object handler |
//! | [`extraction`] | Extraction orchestration and batch operations |
//! | [`entity`] | Entity recognition |
//! | [`store`] | Storage traits |
//! | [`sqlite_store`] | SQLite storage |
//! | [`memory_store`] | In-memory storage |
//! | [`locks`] | Per-source locking |
//! | [`connector_fs`] | Filesystem scanning |
//! | [`connector_objects`] | Object import |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod chunk;
pub mod config;
pub mod connector_fs;
pub mod connector_objects;
pub mod convert;
pub mod db;
pub mod entity;
pub mod error;
pub mod extract_cmd;
pub mod extraction;
pub mod get;
pub mod language;
pub mod locks;
pub mod memory_store;
pub mod migrate;
pub mod models;
pub mod sanitize;
pub mod source_file;
pub mod source_object;
pub mod sources;
pub mod sqlite_store;
pub mod stats;
pub mod store;

pub use chunk::{chunk_document, ChunkOptions, ChunkSpan, ChunkStrategy};
pub use error::ExtractionError;
pub use extraction::{is_stale, ExtractionService};
