//! Text chunking for the retrieval pipeline.
//!
//! Text is split on the separator hierarchy paragraph → line → sentence →
//! word, keeping every separator attached to the piece before it, and pieces
//! are merged greedily up to the content budget. Only when no separator is
//! left does a piece get cut at a fixed character count. Because pieces are
//! contiguous and nothing is trimmed, the segments always tile the input.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::core::errors::PipelineError;

const SEPARATORS: [&str; 4] = ["\n\n", "\n", ". ", " "];

/// A contiguous slice of a document's extracted text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    /// The text content, including any leading overlap.
    pub text: String,
    /// Storage path of the document this segment was cut from.
    pub document: String,
    /// Sequence position within the document.
    pub position: usize,
    /// Character offset of `text` in the extracted document text.
    pub start_offset: usize,
    /// Number of leading characters shared with the previous segment.
    pub overlap: usize,
}

impl Segment {
    /// The part of the segment not shared with its predecessor.
    pub fn fresh_text(&self) -> &str {
        let start = self
            .text
            .char_indices()
            .nth(self.overlap)
            .map(|(idx, _)| idx)
            .unwrap_or(self.text.len());
        &self.text[start..]
    }

    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

/// Splits extracted text into bounded, optionally overlapping segments.
#[derive(Debug, Clone)]
pub struct TextChunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl TextChunker {
    /// `chunk_size` is the maximum segment length in characters and
    /// `chunk_overlap` the number of characters consecutive segments share.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self, PipelineError> {
        if chunk_size == 0 {
            return Err(PipelineError::Config(
                "chunk_size must be greater than zero".to_string(),
            ));
        }
        if chunk_overlap >= chunk_size {
            return Err(PipelineError::Config(format!(
                "chunk_overlap ({}) must be less than chunk_size ({})",
                chunk_overlap, chunk_size
            )));
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }

    /// Splits `text` into segments in original order.
    ///
    /// Empty input yields no segments; input no longer than `chunk_size`
    /// yields exactly one.
    pub fn split(&self, text: &str, document: &str) -> Vec<Segment> {
        if text.is_empty() {
            return Vec::new();
        }

        let spans = self.spans(text);

        let mut segments = Vec::with_capacity(spans.len());
        let mut consumed_chars = 0;

        for (position, span) in spans.into_iter().enumerate() {
            let overlap = self.chunk_overlap.min(consumed_chars);
            let start = step_back_chars(text, span.start, overlap);
            let fresh_chars = char_len(&text[span.clone()]);

            segments.push(Segment {
                text: text[start..span.end].to_string(),
                document: document.to_string(),
                position,
                start_offset: consumed_chars - overlap,
                overlap,
            });

            consumed_chars += fresh_chars;
        }

        tracing::debug!(
            segments = segments.len(),
            chars = consumed_chars,
            chunk_size = self.chunk_size,
            chunk_overlap = self.chunk_overlap,
            "split document text"
        );

        segments
    }

    /// The first span has no overlap prefix and may use the whole
    /// `chunk_size`; later spans leave room for the prefix.
    fn spans(&self, text: &str) -> Vec<Range<usize>> {
        let mut spans = Vec::new();
        if self.chunk_overlap == 0 {
            collect_spans(text, 0, self.chunk_size, &SEPARATORS, &mut spans);
            return spans;
        }

        let mut leading = Vec::new();
        collect_spans(text, 0, self.chunk_size, &SEPARATORS, &mut leading);
        let Some(first) = leading.into_iter().next() else {
            return spans;
        };

        let rest_start = first.end;
        spans.push(first);
        if rest_start == text.len() {
            return spans;
        }
        collect_spans(
            &text[rest_start..],
            rest_start,
            self.chunk_size - self.chunk_overlap,
            &SEPARATORS,
            &mut spans,
        );
        spans
    }
}

/// Appends byte ranges (offset by `base`) covering `text`, each at most
/// `budget` characters long.
fn collect_spans(
    text: &str,
    base: usize,
    budget: usize,
    separators: &[&str],
    out: &mut Vec<Range<usize>>,
) {
    if text.is_empty() {
        return;
    }
    if char_len(text) <= budget {
        out.push(base..base + text.len());
        return;
    }

    let Some((separator, remaining)) = separators.split_first() else {
        hard_cut(text, base, budget, out);
        return;
    };

    let mut current: Option<(Range<usize>, usize)> = None;

    for piece in split_keeping_separator(text, separator) {
        let piece_len = char_len(&text[piece.clone()]);
        current = match current.take() {
            Some((range, len)) if len + piece_len <= budget => {
                Some((range.start..piece.end, len + piece_len))
            }
            Some((range, len)) => {
                flush(text, base, range, len, budget, remaining, out);
                Some((piece, piece_len))
            }
            None => Some((piece, piece_len)),
        };
    }

    if let Some((range, len)) = current {
        flush(text, base, range, len, budget, remaining, out);
    }
}

fn flush(
    text: &str,
    base: usize,
    range: Range<usize>,
    len: usize,
    budget: usize,
    remaining: &[&str],
    out: &mut Vec<Range<usize>>,
) {
    if len <= budget {
        out.push(base + range.start..base + range.end);
    } else {
        collect_spans(
            &text[range.clone()],
            base + range.start,
            budget,
            remaining,
            out,
        );
    }
}

/// Byte ranges of `text` split after each occurrence of `separator`.
fn split_keeping_separator(text: &str, separator: &str) -> Vec<Range<usize>> {
    let mut pieces = Vec::new();
    let mut start = 0;

    while let Some(pos) = text[start..].find(separator) {
        let end = start + pos + separator.len();
        pieces.push(start..end);
        start = end;
    }

    if start < text.len() {
        pieces.push(start..text.len());
    }

    pieces
}

fn hard_cut(text: &str, base: usize, budget: usize, out: &mut Vec<Range<usize>>) {
    let mut start = 0;
    let mut count = 0;

    for (idx, _) in text.char_indices() {
        if count == budget {
            out.push(base + start..base + idx);
            start = idx;
            count = 0;
        }
        count += 1;
    }

    if start < text.len() {
        out.push(base + start..base + text.len());
    }
}

/// Byte index `n` characters before `end` (clamped to the start of `text`).
fn step_back_chars(text: &str, end: usize, n: usize) -> usize {
    if n == 0 {
        return end;
    }
    text[..end]
        .char_indices()
        .rev()
        .nth(n - 1)
        .map(|(idx, _)| idx)
        .unwrap_or(0)
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}
