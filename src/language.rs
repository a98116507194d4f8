//! Heuristic language detection.
//!
//! Matches a handful of Dutch and English function words. The result is a
//! weak hint and absence of a language is a normal outcome.

use std::sync::LazyLock;

use regex::Regex;

use crate::models::LanguageSignals;

const HEURISTIC_CONFIDENCE: f64 = 0.35;

static DUTCH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(de|het|een)\b").expect("valid regex"));
static ENGLISH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(the|and|of)\b").expect("valid regex"));

/// Detect a language from function words. Never fails.
pub fn detect_language(text: &str) -> LanguageSignals {
    let language = if DUTCH.is_match(text) {
        Some("nl")
    } else if ENGLISH.is_match(text) {
        Some("en")
    } else {
        None
    };

    match language {
        Some(lang) => LanguageSignals {
            language: Some(lang.to_string()),
            language_level: None,
            language_confidence: Some(HEURISTIC_CONFIDENCE),
            detection_method: Some("heuristic".to_string()),
        },
        None => LanguageSignals {
            detection_method: Some("none".to_string()),
            ..LanguageSignals::default()
        },
    }
}
