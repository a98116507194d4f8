//! Handler for register objects.
//!
//! Objects have no binary content. Their text is rendered from, in order:
//!
//! 1. an identity line (id, UUID, version)
//! 2. the schema title and description, when the lookup succeeds
//! 3. the register title and description, when the lookup succeeds
//! 4. the flattened object data, one `path: value` line per leaf
//! 5. an organisation line, when the object has one
//!
//! Each line is sanitized and the lines are joined with a single space.
//! The handler remembers where every line starts so chunks can point back
//! at the property they were cut from.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::chunk::ChunkSpan;
use crate::error::{ExtractionError, Result};
use crate::models::{
    CatalogEntry, ExtractionPayload, LanguageSignals, ObjectRecord, PositionReference,
    PropertyOffset, OBJECT_SOURCE,
};
use crate::sanitize::sanitize;
use crate::sources::{checksum, SourceHandler};
use crate::store::ObjectCatalog;

pub const OBJECT_EXTRACTION_METHOD: &str = "object_extraction";

/// Default nesting depth below which object data is not rendered.
pub const DEFAULT_MAX_DEPTH: usize = 10;

/// One rendered leaf of an object's data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlatProperty {
    pub path: String,
    pub value: String,
}

impl FlatProperty {
    pub fn line(&self) -> String {
        format!("{}: {}", self.path, self.value)
    }
}

/// Flatten nested object data into dotted-path leaves, in insertion order.
///
/// Strings are trimmed and dropped when empty; numbers and booleans are
/// rendered literally; nulls and empty collections produce nothing. Array
/// elements are keyed by index. Nothing at or below `max_depth` levels of
/// nesting is rendered.
pub fn flatten(data: &Map<String, Value>, max_depth: usize) -> Vec<FlatProperty> {
    let mut out = Vec::new();
    flatten_map(data, "", 0, max_depth, &mut out);
    out
}

/// [`flatten`] rendered as newline-joined `path: value` lines.
pub fn flatten_to_text(data: &Map<String, Value>, max_depth: usize) -> String {
    flatten(data, max_depth)
        .iter()
        .map(FlatProperty::line)
        .collect::<Vec<_>>()
        .join("\n")
}

fn join_path(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", prefix, key)
    }
}

fn flatten_map(
    map: &Map<String, Value>,
    prefix: &str,
    depth: usize,
    max_depth: usize,
    out: &mut Vec<FlatProperty>,
) {
    if depth >= max_depth {
        return;
    }
    for (key, value) in map {
        flatten_value(value, &join_path(prefix, key), depth, max_depth, out);
    }
}

fn flatten_value(
    value: &Value,
    path: &str,
    depth: usize,
    max_depth: usize,
    out: &mut Vec<FlatProperty>,
) {
    let rendered = match value {
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => None,
        Value::Object(nested) => {
            flatten_map(nested, path, depth + 1, max_depth, out);
            None
        }
        Value::Array(items) => {
            if depth + 1 < max_depth {
                for (i, item) in items.iter().enumerate() {
                    flatten_value(item, &join_path(path, &i.to_string()), depth + 1, max_depth, out);
                }
            }
            None
        }
    };
    if let Some(value) = rendered {
        out.push(FlatProperty {
            path: path.to_string(),
            value,
        });
    }
}

fn describe(label: &str, entry: &CatalogEntry) -> Option<String> {
    let parts: Vec<&str> = [entry.title.as_deref(), entry.description.as_deref()]
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    (!parts.is_empty()).then(|| format!("{}: {}", label, parts.join(" - ")))
}

/// Accumulates sanitized segments and their start offsets.
#[derive(Default)]
struct TextBuilder {
    text: String,
    offsets: Vec<PropertyOffset>,
}

impl TextBuilder {
    fn push(&mut self, path: &str, segment: &str) {
        let segment = sanitize(segment);
        if segment.is_empty() {
            return;
        }
        if !self.text.is_empty() {
            self.text.push(' ');
        }
        self.offsets.push(PropertyOffset {
            path: path.to_string(),
            start: self.text.len(),
        });
        self.text.push_str(&segment);
    }
}

pub struct ObjectHandler {
    catalog: Arc<dyn ObjectCatalog>,
    max_depth: usize,
}

impl ObjectHandler {
    pub fn new(catalog: Arc<dyn ObjectCatalog>) -> Self {
        Self {
            catalog,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    async fn find(&self, source_id: i64) -> Result<ObjectRecord> {
        self.catalog
            .find_object(source_id)
            .await
            .map_err(ExtractionError::store)?
            .ok_or_else(|| ExtractionError::not_found(OBJECT_SOURCE, source_id))
    }

    /// Schema or register description. Lookup failures are logged and
    /// leave the line out.
    async fn catalog_line(&self, object: &ObjectRecord, what: &str, id: Option<i64>) -> Option<String> {
        let id = id?;
        let found = if what == "schema" {
            self.catalog.find_schema(id).await
        } else {
            self.catalog.find_register(id).await
        };
        match found {
            Ok(Some(entry)) => describe(&capitalize(what), &entry),
            Ok(None) => {
                debug!(object_id = object.id, what, id, "catalog entry missing");
                None
            }
            Err(e) => {
                warn!(object_id = object.id, what, id, error = %e, "catalog lookup failed");
                None
            }
        }
    }

    async fn render(&self, object: &ObjectRecord) -> TextBuilder {
        let mut builder = TextBuilder::default();

        let mut identity = format!("Object {} UUID {}", object.id, object.uuid);
        if let Some(version) = &object.version {
            identity.push_str(&format!(" version {}", version));
        }
        builder.push("@self.id", &identity);

        if let Some(line) = self.catalog_line(object, "schema", object.schema_id).await {
            builder.push("@self.schema", &line);
        }
        if let Some(line) = self.catalog_line(object, "register", object.register_id).await {
            builder.push("@self.register", &line);
        }

        for property in flatten(&object.data, self.max_depth) {
            builder.push(&property.path, &property.line());
        }

        if let Some(org) = &object.organisation {
            builder.push("@self.organisation", &format!("Organisation: {}", org));
        }
        builder
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[async_trait]
impl SourceHandler for ObjectHandler {
    fn source_type(&self) -> &str {
        OBJECT_SOURCE
    }

    async fn extract_text(
        &self,
        source_id: i64,
        metadata: &Map<String, Value>,
        _force: bool,
    ) -> Result<ExtractionPayload> {
        let object = self.find(source_id).await?;
        let TextBuilder { text, offsets } = self.render(&object).await;
        debug!(source_id, properties = offsets.len(), length = text.len(), "object rendered");

        Ok(ExtractionPayload {
            source_type: OBJECT_SOURCE.to_string(),
            source_id,
            length: text.len(),
            checksum: checksum(&text),
            text,
            method: OBJECT_EXTRACTION_METHOD.to_string(),
            owner: object.owner.clone(),
            organisation: object.organisation.clone(),
            language: LanguageSignals::default(),
            metadata: metadata.clone(),
            property_offsets: offsets,
        })
    }

    async fn source_metadata(&self, source_id: i64) -> Result<Map<String, Value>> {
        let object = self.find(source_id).await?;
        let mut meta = Map::new();
        meta.insert("uuid".into(), json!(object.uuid));
        meta.insert("version".into(), json!(object.version));
        meta.insert("schema_id".into(), json!(object.schema_id));
        meta.insert("register_id".into(), json!(object.register_id));
        if let Some(updated) = object.updated_at {
            meta.insert("updated_at".into(), json!(updated.to_rfc3339()));
        }
        Ok(meta)
    }

    async fn source_timestamp(&self, source_id: i64) -> DateTime<Utc> {
        match self.catalog.find_object(source_id).await {
            Ok(Some(ObjectRecord {
                updated_at: Some(ts),
                ..
            })) => ts,
            Ok(_) => Utc::now(),
            Err(e) => {
                debug!(source_id, error = %e, "object timestamp lookup failed, using now");
                Utc::now()
            }
        }
    }

    /// The property the span starts in.
    fn position_reference(&self, payload: &ExtractionPayload, span: &ChunkSpan) -> PositionReference {
        let idx = payload
            .property_offsets
            .partition_point(|p| p.start <= span.start_offset);
        match idx.checked_sub(1).and_then(|i| payload.property_offsets.get(i)) {
            Some(property) => PositionReference::PropertyPath {
                path: property.path.clone(),
            },
            None => PositionReference::TextRange {
                start: span.start_offset,
                end: span.end_offset,
            },
        }
    }
}
