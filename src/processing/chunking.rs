//! Character-budgeted chunking with boundary preference and fixed overlap.
//!
//! Chunk boundaries are chosen greedily. Starting at `start`, the window may extend to
//! `start + chunk_size` characters. Unless that reaches the end of the document, the chunker
//! looks backwards inside the window for, in order of preference:
//!
//! 1. a paragraph break (`\n\n`), ending the chunk after the break;
//! 2. a sentence end (`.`, `!` or `?` followed by whitespace), ending after the whitespace;
//! 3. any whitespace character;
//! 4. failing all of the above, the raw character limit.
//!
//! The next chunk starts `overlap` characters before the previous end, so consecutive chunks
//! share exactly `overlap` characters. A boundary is only accepted beyond `start + overlap`,
//! which guarantees forward progress. Offsets are counted in `char`s, not bytes.

use super::types::{Chunk, ChunkingError};
use crate::embedding::Modality;
use crate::store::record_id;

/// Splits cleaned text into overlapping, bounded-size chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextChunker {
    chunk_size: usize,
    overlap: usize,
}

impl TextChunker {
    /// Validate the sizing and build a chunker.
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self, ChunkingError> {
        if chunk_size == 0 {
            return Err(ChunkingError::InvalidChunkSize);
        }
        if overlap >= chunk_size {
            return Err(ChunkingError::InvalidOverlap {
                overlap,
                chunk_size,
            });
        }
        Ok(Self {
            chunk_size,
            overlap,
        })
    }

    /// Maximum chunk length in characters.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Characters shared by consecutive chunks.
    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Split `text` into chunks attributed to `document_id`.
    ///
    /// Returns an empty vector for empty or whitespace-only input.
    pub fn chunk(&self, document_id: &str, text: &str) -> Vec<Chunk> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let chars: Vec<char> = text.chars().collect();
        self.spans(&chars)
            .into_iter()
            .enumerate()
            .map(|(sequence_index, (char_start, char_end))| Chunk {
                id: record_id(document_id, Modality::Text, sequence_index),
                source_document_id: document_id.to_string(),
                sequence_index,
                text: chars[char_start..char_end].iter().collect(),
                char_start,
                char_end,
            })
            .collect()
    }

    fn spans(&self, chars: &[char]) -> Vec<(usize, usize)> {
        let len = chars.len();
        let mut spans = Vec::with_capacity(len / (self.chunk_size - self.overlap) + 1);
        let mut start = 0;

        loop {
            let limit = start + self.chunk_size;
            if limit >= len {
                spans.push((start, len));
                break;
            }
            let end = find_boundary(chars, start + self.overlap, limit);
            spans.push((start, end));
            start = end - self.overlap;
        }

        spans
    }
}

/// Best end position in `(lower, upper]`, falling back to `upper`.
fn find_boundary(chars: &[char], lower: usize, upper: usize) -> usize {
    let candidates = || (lower + 1..=upper).rev();

    candidates()
        .find(|&end| is_paragraph_break(chars, end))
        .or_else(|| candidates().find(|&end| is_sentence_end(chars, end)))
        .or_else(|| candidates().find(|&end| chars[end - 1].is_whitespace()))
        .unwrap_or(upper)
}

fn is_paragraph_break(chars: &[char], end: usize) -> bool {
    end >= 2 && chars[end - 1] == '\n' && chars[end - 2] == '\n'
}

fn is_sentence_end(chars: &[char], end: usize) -> bool {
    end >= 2 && chars[end - 1].is_whitespace() && matches!(chars[end - 2], '.' | '!' | '?')
}
