//! Register object import.
//!
//! Loads schemas, registers and objects from a JSON document into the
//! object catalog:
//!
//! ```json
//! {
//!   "schemas":   [{"id": 1, "title": "Organisation", "description": "..."}],
//!   "registers": [{"id": 2, "title": "Publications"}],
//!   "objects":   [{"id": 10, "schema": 1, "register": 2,
//!                  "updated_at": "2024-05-01T12:00:00Z",
//!                  "data": {"name": "Acme"}}]
//! }
//! ```
//!
//! Objects without a `uuid` get a fresh v4 UUID; objects without
//! `updated_at` are stamped with the import time.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::Path;
use uuid::Uuid;

use crate::config::Config;
use crate::models::{CatalogEntry, ObjectRecord};
use crate::sqlite_store::SqliteStore;

#[derive(Debug, Deserialize, Default)]
pub struct ImportFile {
    #[serde(default)]
    pub schemas: Vec<CatalogEntry>,
    #[serde(default)]
    pub registers: Vec<CatalogEntry>,
    #[serde(default)]
    pub objects: Vec<ImportObject>,
}

#[derive(Debug, Deserialize)]
pub struct ImportObject {
    pub id: i64,
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub schema: Option<i64>,
    #[serde(default)]
    pub register: Option<i64>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub organisation: Option<String>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl ImportObject {
    pub fn into_record(self, now: DateTime<Utc>) -> ObjectRecord {
        ObjectRecord {
            id: self.id,
            uuid: self.uuid.unwrap_or_else(|| Uuid::new_v4().to_string()),
            version: self.version,
            schema_id: self.schema,
            register_id: self.register,
            data: self.data,
            owner: self.owner,
            organisation: self.organisation,
            updated_at: Some(self.updated_at.unwrap_or(now)),
        }
    }
}

pub fn parse_import(json: &str) -> Result<ImportFile> {
    serde_json::from_str(json).context("Failed to parse import file")
}

/// Counts written by [`import_into`].
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub schemas: usize,
    pub registers: usize,
    pub objects: usize,
}

pub async fn import_into(store: &SqliteStore, file: ImportFile) -> Result<ImportSummary> {
    let now = Utc::now();
    let mut summary = ImportSummary::default();
    for schema in &file.schemas {
        store.upsert_schema(schema).await?;
        summary.schemas += 1;
    }
    for register in &file.registers {
        store.upsert_register(register).await?;
        summary.registers += 1;
    }
    for object in file.objects {
        let id = object.id;
        store
            .upsert_object(&object.into_record(now))
            .await
            .with_context(|| format!("Failed to import object {}", id))?;
        summary.objects += 1;
    }
    Ok(summary)
}

/// `orx import <path>`.
pub async fn run_import(config: &Config, path: &Path) -> Result<()> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read import file: {}", path.display()))?;
    let file = parse_import(&content)?;

    let store = SqliteStore::open(&config.db.path).await?;
    let summary = import_into(&store, file).await?;
    store.close().await;

    println!("import {}", path.display());
    println!("  schemas: {}", summary.schemas);
    println!("  registers: {}", summary.registers);
    println!("  objects: {}", summary.objects);
    println!("ok");
    Ok(())
}
