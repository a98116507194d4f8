//! Text normalization applied before chunking and storage.
//!
//! [`sanitize`] is total and idempotent: it strips NUL and control
//! characters, replaces characters outside the Basic Multilingual Plane
//! (4-byte UTF-8 sequences, which some storage engines reject) with a space,
//! collapses every whitespace run to a single space and trims the result.
//!
//! Byte sources go through [`decode`] first, which is where invalid
//! encodings are repaired.

use encoding_rs::WINDOWS_1252;

/// Normalize raw extracted text. Never fails.
pub fn sanitize(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_space = false;

    for c in raw.chars() {
        if c == '\0' {
            continue;
        }
        let c = if (c as u32) > 0xFFFF { ' ' } else { c };
        if c.is_whitespace() {
            pending_space = true;
            continue;
        }
        if c.is_control() {
            continue;
        }
        if pending_space && !out.is_empty() {
            out.push(' ');
        }
        pending_space = false;
        out.push(c);
    }

    out
}

/// Decode file bytes into a `String`.
///
/// Valid UTF-8 is taken as-is (minus a leading BOM). Anything else is
/// decoded as Windows-1252, which never fails and matches what legacy
/// office exports usually are.
pub fn decode(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => WINDOWS_1252.decode_without_bom_handling(bytes).0.into_owned(),
    }
}
