//! Text chunker with fixed-size and recursive multi-separator strategies.
//!
//! Splits sanitized text into [`ChunkSpan`]s bounded by `chunk_size` with a
//! configurable overlap between neighbours. Offsets are UTF-8 byte offsets
//! into the cleaned input and always fall on char boundaries.
//!
//! # Algorithm
//!
//! 1. Clean the input: normalize line endings, collapse 3+ newlines to a
//!    single blank line, collapse horizontal whitespace, trim.
//! 2. Input no longer than `chunk_size` becomes exactly one span.
//! 3. [`ChunkStrategy::FixedSize`] slides a window of `chunk_size` bytes,
//!    pulling the end back to the last space when one sits in the final
//!    20% of the window.
//! 4. [`ChunkStrategy::RecursiveCharacter`] splits on the highest-priority
//!    separator present, greedily merges fragments up to `chunk_size`,
//!    seeds each new chunk with the tail of the previous one and recurses
//!    into oversized fragments with the remaining separators. With no
//!    separators left it falls back to the fixed-size window.
//! 5. A trailing span shorter than the minimum size is dropped, and the
//!    result is capped at `max_chunks`.
//!
//! # Example
//!
//! ```rust
//! use openregister_extract::chunk::{chunk_document, ChunkOptions};
//!
//! let spans = chunk_document("short text", &ChunkOptions::default());
//! assert_eq!(spans.len(), 1);
//! assert_eq!((spans[0].start_offset, spans[0].end_offset), (0, 10));
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Separators tried by the recursive strategy, highest priority first.
pub const SEPARATORS: &[&str] = &["\n\n", "\n", ". ", "! ", "? ", "; ", ", ", " "];

/// Splitting strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStrategy {
    FixedSize,
    #[default]
    RecursiveCharacter,
}

impl ChunkStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkStrategy::FixedSize => "fixed_size",
            ChunkStrategy::RecursiveCharacter => "recursive_character",
        }
    }
}

impl fmt::Display for ChunkStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChunkStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fixed_size" | "fixed" => Ok(ChunkStrategy::FixedSize),
            "recursive_character" | "recursive" => Ok(ChunkStrategy::RecursiveCharacter),
            other => Err(format!(
                "unknown chunk strategy '{}': expected fixed_size or recursive_character",
                other
            )),
        }
    }
}

/// Chunker configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkOptions {
    /// Maximum span length in bytes.
    pub chunk_size: usize,
    /// Bytes of the previous span repeated at the start of the next one.
    pub chunk_overlap: usize,
    pub strategy: ChunkStrategy,
    /// Hard cap on spans per document; extra spans are dropped with a warning.
    pub max_chunks: usize,
    /// Trailing spans shorter than this are dropped (see [`ChunkOptions::effective_min_chunk_size`]).
    pub min_chunk_size: usize,
}

impl Default for ChunkOptions {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
            strategy: ChunkStrategy::RecursiveCharacter,
            max_chunks: 1000,
            min_chunk_size: 100,
        }
    }
}

impl ChunkOptions {
    /// The minimum never exceeds a quarter of `chunk_size`, so a small
    /// `chunk_size` cannot discard every trailing span.
    pub fn effective_min_chunk_size(&self) -> usize {
        self.min_chunk_size.min(self.chunk_size / 4)
    }
}

/// One slice of the cleaned input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkSpan {
    pub text: String,
    pub start_offset: usize,
    pub end_offset: usize,
}

/// Split `text` into ordered spans according to `options`.
///
/// Returns an empty `Vec` only when the cleaned input is empty.
pub fn chunk_document(text: &str, options: &ChunkOptions) -> Vec<ChunkSpan> {
    let cleaned = clean_text(text);
    if cleaned.is_empty() {
        return Vec::new();
    }

    let chunk_size = options.chunk_size.max(1);
    if cleaned.len() <= chunk_size {
        let len = cleaned.len();
        return vec![ChunkSpan {
            text: cleaned,
            start_offset: 0,
            end_offset: len,
        }];
    }

    let splitter = Splitter {
        text: &cleaned,
        chunk_size,
        overlap: options.chunk_overlap,
    };
    let mut spans = Vec::new();
    match options.strategy {
        ChunkStrategy::FixedSize => splitter.fixed_size(0, cleaned.len(), &mut spans),
        ChunkStrategy::RecursiveCharacter => {
            splitter.recursive(0, cleaned.len(), SEPARATORS, &mut spans)
        }
    }

    let min = options.effective_min_chunk_size();
    if spans.len() > 1 && spans.last().is_some_and(|s| s.text.len() < min) {
        spans.pop();
    }

    if spans.len() > options.max_chunks {
        warn!(
            produced = spans.len(),
            max_chunks = options.max_chunks,
            "chunk limit exceeded, truncating"
        );
        spans.truncate(options.max_chunks);
    }

    spans
}

/// Normalize line endings and whitespace the way the chunker expects.
///
/// Already-sanitized text passes through unchanged, so span offsets line up
/// with the sanitized text stored on the payload.
pub fn clean_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut newlines = 0usize;
    let mut pending_space = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '\r' {
            if chars.peek() == Some(&'\n') {
                chars.next();
            }
            newlines += 1;
            pending_space = false;
            continue;
        }
        if c == '\n' {
            newlines += 1;
            pending_space = false;
            continue;
        }
        if c.is_whitespace() {
            if newlines == 0 {
                pending_space = true;
            }
            continue;
        }
        if newlines > 0 {
            out.push_str(if newlines >= 2 { "\n\n" } else { "\n" });
        } else if pending_space {
            out.push(' ');
        }
        newlines = 0;
        pending_space = false;
        out.push(c);
    }

    let trimmed = out.trim();
    if trimmed.len() == out.len() {
        out
    } else {
        trimmed.to_string()
    }
}

struct Splitter<'a> {
    text: &'a str,
    chunk_size: usize,
    overlap: usize,
}

impl Splitter<'_> {
    fn fixed_size(&self, start: usize, end: usize, out: &mut Vec<ChunkSpan>) {
        let mut pos = self.skip_whitespace(start, end);
        while pos < end {
            let mut window_end = floor_char_boundary(self.text, (pos + self.chunk_size).min(end));
            if window_end <= pos {
                window_end = next_char_boundary(self.text, pos);
            }

            // Don't cut words when a space sits in the last 20% of the window.
            if window_end < end {
                let window = &self.text[pos..window_end];
                if let Some(space) = window.rfind([' ', '\n']) {
                    if space > 0 && space * 5 >= window.len() * 4 {
                        window_end = pos + space;
                    }
                }
            }

            self.emit(pos, window_end, out);
            if window_end >= end {
                break;
            }

            let window_len = window_end - pos;
            let next = if window_len > self.overlap {
                floor_char_boundary(self.text, window_end - self.overlap)
            } else {
                window_end
            };
            let next = if next <= pos { window_end } else { next };
            pos = self.skip_whitespace(next, end);
        }
    }

    fn recursive(&self, start: usize, end: usize, separators: &[&str], out: &mut Vec<ChunkSpan>) {
        if end - start <= self.chunk_size {
            self.emit(start, end, out);
            return;
        }

        let slice = &self.text[start..end];
        let Some(level) = separators.iter().position(|sep| slice.contains(sep)) else {
            self.fixed_size(start, end, out);
            return;
        };
        let separator = separators[level];
        let lower = &separators[level + 1..];

        let mut current: Option<(usize, usize)> = None;
        for (piece_start, piece_end) in split_pieces(self.text, start, end, separator) {
            if self.text[piece_start..piece_end].trim().is_empty() {
                continue;
            }

            if piece_end - piece_start > self.chunk_size {
                if let Some((cs, ce)) = current.take() {
                    self.emit(cs, ce, out);
                }
                self.recursive(piece_start, piece_end, lower, out);
                continue;
            }

            current = match current {
                Some((cs, _)) if piece_end - cs <= self.chunk_size => Some((cs, piece_end)),
                Some((cs, ce)) => {
                    self.emit(cs, ce, out);
                    Some((self.seed_start(out.last(), piece_start, piece_end), piece_end))
                }
                None => Some((self.seed_start(out.last(), piece_start, piece_end), piece_end)),
            };
        }

        if let Some((cs, ce)) = current {
            self.emit(cs, ce, out);
        }
    }

    /// Where a chunk ending at `piece_end` should start so that it repeats
    /// up to `overlap` bytes from the tail of `previous`.
    fn seed_start(&self, previous: Option<&ChunkSpan>, piece_start: usize, piece_end: usize) -> usize {
        let Some(prev) = previous else {
            return piece_start;
        };
        if self.overlap == 0 || prev.end_offset > piece_start {
            return piece_start;
        }

        let mut seed = prev
            .end_offset
            .saturating_sub(self.overlap)
            .max(prev.start_offset)
            .max(piece_end.saturating_sub(self.chunk_size));
        seed = ceil_char_boundary(self.text, seed);
        if seed >= prev.end_offset {
            return piece_start;
        }

        // Start the seed on a word boundary when one is available.
        if seed > 0 && !self.text[..seed].ends_with(char::is_whitespace) {
            if let Some(ws) = self.text[seed..prev.end_offset].find(char::is_whitespace) {
                seed = next_char_boundary(self.text, seed + ws);
            }
        }

        if seed >= prev.end_offset {
            piece_start
        } else {
            seed
        }
    }

    fn emit(&self, start: usize, end: usize, out: &mut Vec<ChunkSpan>) {
        let slice = &self.text[start..end];
        let trimmed_start = start + (slice.len() - slice.trim_start().len());
        let trimmed_end = start + slice.trim_end().len();
        if trimmed_start >= trimmed_end {
            return;
        }
        out.push(ChunkSpan {
            text: self.text[trimmed_start..trimmed_end].to_string(),
            start_offset: trimmed_start,
            end_offset: trimmed_end,
        });
    }

    fn skip_whitespace(&self, mut pos: usize, end: usize) -> usize {
        while pos < end {
            match self.text[pos..].chars().next() {
                Some(c) if c.is_whitespace() => pos += c.len_utf8(),
                _ => break,
            }
        }
        pos
    }
}

/// Split `text[start..end]` on `separator`, returning absolute byte ranges.
///
/// The non-whitespace part of the separator (the `.` of `". "`) stays with
/// the preceding piece so no content falls between pieces.
fn split_pieces(text: &str, start: usize, end: usize, separator: &str) -> Vec<(usize, usize)> {
    let kept = separator.trim_end().len();
    let mut pieces = Vec::new();
    let mut piece_start = start;
    for (idx, _) in text[start..end].match_indices(separator) {
        let at = start + idx;
        pieces.push((piece_start, at + kept));
        piece_start = at + separator.len();
    }
    pieces.push((piece_start, end));
    pieces
}

/// Snap a byte index back to the nearest char boundary.
fn floor_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Snap a byte index forward to the nearest char boundary.
fn ceil_char_boundary(s: &str, index: usize) -> usize {
    let mut i = index;
    while i < s.len() && !s.is_char_boundary(i) {
        i += 1;
    }
    i.min(s.len())
}

/// Byte index of the char boundary after the char starting at `index`.
fn next_char_boundary(s: &str, index: usize) -> usize {
    s[index..]
        .chars()
        .next()
        .map(|c| index + c.len_utf8())
        .unwrap_or(s.len())
}
