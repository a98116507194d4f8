//! Entity recognition over stored chunks.
//!
//! Recognition runs after a source's chunks are committed and is never
//! allowed to fail the extraction that triggered it; the orchestrator
//! logs any error and moves on.
//!
//! [`PatternRecognizer`] finds e-mail addresses, URLs, IBANs and phone
//! numbers with regular expressions and records them in the `entities`
//! and `entity_relations` tables. [`NoopRecognizer`] is used when
//! recognition is disabled.

use std::sync::LazyLock;

use anyhow::{bail, Result};
use async_trait::async_trait;
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::models::{RecognitionSummary, SourceKey};
use crate::sqlite_store::SqliteStore;
use crate::store::ChunkStore;

/// Options passed to every recognizer call.
#[derive(Debug, Clone, PartialEq)]
pub struct RecognitionOptions {
    pub method: String,
    /// Mentions below this confidence are discarded.
    pub confidence_threshold: f64,
}

impl Default for RecognitionOptions {
    fn default() -> Self {
        Self {
            method: "hybrid".to_string(),
            confidence_threshold: 0.5,
        }
    }
}

#[async_trait]
pub trait EntityRecognizer: Send + Sync {
    async fn process_source_chunks(
        &self,
        source_type: &str,
        source_id: i64,
        options: &RecognitionOptions,
    ) -> Result<RecognitionSummary>;
}

/// Recognizer that finds nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRecognizer;

#[async_trait]
impl EntityRecognizer for NoopRecognizer {
    async fn process_source_chunks(
        &self,
        _source_type: &str,
        _source_id: i64,
        _options: &RecognitionOptions,
    ) -> Result<RecognitionSummary> {
        Ok(RecognitionSummary::default())
    }
}

/// One entity occurrence within a chunk. Offsets are byte offsets into the
/// chunk's text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityMention {
    pub entity_type: String,
    pub value: String,
    pub start: usize,
    pub end: usize,
    pub confidence: f64,
}

static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9-]+(?:\.[A-Za-z0-9-]+)*\.[A-Za-z]{2,}")
        .expect("valid regex")
});
static URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"https?://[^\s<>"']+"#).expect("valid regex"));
static IBAN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[A-Z]{2}\d{2}(?: ?[A-Z0-9]{4}){2,7}(?: ?[A-Z0-9]{1,3})?\b").expect("valid regex")
});
static PHONE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:\+\d{1,3}[ -]?|\b0)\d{1,4}(?:[ -]?\d{2,4}){2,4}\b").expect("valid regex")
});

/// ISO 13616 check: rearrange, map letters to numbers, remainder mod 97 is 1.
fn iban_is_valid(iban: &str) -> bool {
    if !(15..=34).contains(&iban.len()) || !iban.is_ascii() {
        return false;
    }
    let rearranged = iban[4..].chars().chain(iban[..4].chars());
    let mut remainder = 0u32;
    for c in rearranged {
        let value = match c.to_digit(36) {
            Some(v) => v,
            None => return false,
        };
        remainder = if value < 10 {
            (remainder * 10 + value) % 97
        } else {
            (remainder * 100 + value) % 97
        };
    }
    remainder == 1
}

fn push(found: &mut Vec<EntityMention>, mention: EntityMention) {
    let overlaps = found
        .iter()
        .any(|m| mention.start < m.end && m.start < mention.end);
    if !overlaps {
        found.push(mention);
    }
}

/// Find entity mentions in `text`. Earlier kinds win when matches overlap,
/// in the order e-mail, URL, IBAN, phone.
pub fn detect_entities(text: &str) -> Vec<EntityMention> {
    let mut found: Vec<EntityMention> = Vec::new();

    for m in EMAIL.find_iter(text) {
        push(
            &mut found,
            EntityMention {
                entity_type: "email".into(),
                value: m.as_str().to_lowercase(),
                start: m.start(),
                end: m.end(),
                confidence: 0.95,
            },
        );
    }

    for m in URL.find_iter(text) {
        let url = m.as_str().trim_end_matches(['.', ',', ';', ':', '!', '?', ')']);
        push(
            &mut found,
            EntityMention {
                entity_type: "url".into(),
                value: url.to_string(),
                start: m.start(),
                end: m.start() + url.len(),
                confidence: 0.9,
            },
        );
    }

    for m in IBAN.find_iter(text) {
        let compact: String = m.as_str().chars().filter(|c| !c.is_whitespace()).collect();
        if iban_is_valid(&compact) {
            push(
                &mut found,
                EntityMention {
                    entity_type: "iban".into(),
                    value: compact,
                    start: m.start(),
                    end: m.end(),
                    confidence: 0.95,
                },
            );
        }
    }

    for m in PHONE.find_iter(text) {
        let digits = m.as_str().chars().filter(char::is_ascii_digit).count();
        if (9..=15).contains(&digits) {
            push(
                &mut found,
                EntityMention {
                    entity_type: "phone".into(),
                    value: m.as_str().to_string(),
                    start: m.start(),
                    end: m.end(),
                    confidence: 0.6,
                },
            );
        }
    }

    found.sort_by_key(|m| m.start);
    found
}

/// Regex recognizer that persists into a [`SqliteStore`].
pub struct PatternRecognizer {
    store: SqliteStore,
}

impl PatternRecognizer {
    pub fn new(store: SqliteStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl EntityRecognizer for PatternRecognizer {
    async fn process_source_chunks(
        &self,
        source_type: &str,
        source_id: i64,
        options: &RecognitionOptions,
    ) -> Result<RecognitionSummary> {
        match options.method.as_str() {
            "hybrid" | "regex" => {}
            other => bail!("recognition method '{}' is not available", other),
        }

        let key = SourceKey::new(source_type, source_id);
        let chunks = self.store.chunks_for_source(&key).await?;

        let mut mentions = Vec::new();
        for chunk in chunks.iter().filter(|c| !c.is_metadata()) {
            let Some(chunk_id) = chunk.id else { continue };
            mentions.extend(
                detect_entities(&chunk.text_content)
                    .into_iter()
                    .filter(|m| m.confidence >= options.confidence_threshold)
                    .map(|m| (chunk_id, m)),
            );
        }

        let summary = self
            .store
            .replace_entity_mentions(&key, &mentions, &options.method)
            .await?;
        debug!(
            source_type,
            source_id,
            entities = summary.entities_found,
            relations = summary.relations_created,
            "entities recognized"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(mentions: &[EntityMention]) -> Vec<(&str, &str)> {
        mentions
            .iter()
            .map(|m| (m.entity_type.as_str(), m.value.as_str()))
            .collect()
    }

    #[test]
    fn detects_each_kind() {
        let text = "Mail Info@Acme.nl or visit https://acme.nl/contact. \
                    Bel +31 6 12345678. IBAN NL91 ABNA 0417 1643 00.";
        let found = detect_entities(text);
        assert_eq!(
            kinds(&found),
            vec![
                ("email", "info@acme.nl"),
                ("url", "https://acme.nl/contact"),
                ("phone", "+31 6 12345678"),
                ("iban", "NL91ABNA0417164300"),
            ]
        );
        for m in &found {
            assert!(text.is_char_boundary(m.start) && text.is_char_boundary(m.end));
        }
    }

    #[test]
    fn rejects_invalid_iban() {
        let found = detect_entities("IBAN NL92 ABNA 0417 1643 00");
        assert!(found.iter().all(|m| m.entity_type != "iban"));
    }

    #[test]
    fn iban_checksum() {
        assert!(iban_is_valid("NL91ABNA0417164300"));
        assert!(iban_is_valid("GB82WEST12345698765432"));
        assert!(!iban_is_valid("GB82WEST12345698765433"));
        assert!(!iban_is_valid("NL91"));
    }

    #[test]
    fn short_numbers_are_not_phones() {
        assert!(detect_entities("Room 012 34").is_empty());
    }

    #[tokio::test]
    async fn noop_finds_nothing() {
        let summary = NoopRecognizer
            .process_source_chunks("file", 1, &RecognitionOptions::default())
            .await
            .unwrap();
        assert_eq!(summary, RecognitionSummary::default());
    }
}
