//! Core data types and error definitions for the ingestion pipeline.

use crate::source::SourceError;
use serde::Serialize;
use thiserror::Error;

/// Errors produced by invalid chunking configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChunkingError {
    /// Ingestion configured an impossible chunk budget.
    #[error("chunk size must be greater than zero")]
    InvalidChunkSize,
    /// Overlap must leave room for new content in every chunk.
    #[error("chunk overlap ({overlap}) must be smaller than chunk size ({chunk_size})")]
    InvalidOverlap {
        /// Requested overlap in characters.
        overlap: usize,
        /// Requested chunk size in characters.
        chunk_size: usize,
    },
}

/// Errors that abort a whole ingestion request.
///
/// Per-chunk and per-image failures never surface here; they are collected in
/// [`IngestionReport::failures`].
#[derive(Debug, Error)]
pub enum ProcessingError {
    /// The document source could not be loaded.
    #[error("Failed to load document: {0}")]
    Source(#[from] SourceError),
    /// Ingestion settings were inconsistent.
    #[error("Invalid ingestion settings: {0}")]
    InvalidSettings(String),
}

/// Bounded text segment derived from a source document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Deterministic identifier, reused as the vector record id.
    pub id: String,
    /// Identifier of the document the chunk was cut from.
    pub source_document_id: String,
    /// Position of the chunk within the document.
    pub sequence_index: usize,
    /// Chunk content.
    pub text: String,
    /// Inclusive start offset in characters.
    pub char_start: usize,
    /// Exclusive end offset in characters.
    pub char_end: usize,
}

/// Item of a document that failed to index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum IngestItem {
    /// Text chunk identified by its sequence index.
    Chunk {
        /// Sequence index of the chunk.
        index: usize,
    },
    /// Image identified by its position in the source.
    Image {
        /// Position of the image in the loaded document.
        index: usize,
    },
}

/// Failure recorded for a single chunk or image.
#[derive(Debug, Clone, Serialize)]
pub struct ItemFailure {
    /// Which item failed.
    pub item: IngestItem,
    /// Rendered error message.
    pub error: String,
    /// Whether a retry could succeed.
    pub transient: bool,
}

/// Per-document ingestion summary.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestionReport {
    /// Identifier derived from the source.
    pub document_id: String,
    /// Source identifier as supplied by the loader.
    pub source: String,
    /// Chunks produced by the chunker.
    pub chunks_total: usize,
    /// Chunks stored in the vector store.
    pub chunks_indexed: usize,
    /// Whitespace-only chunks that were not embedded.
    pub chunks_skipped: usize,
    /// Images present in the source.
    pub images_total: usize,
    /// Images stored in the vector store.
    pub images_indexed: usize,
    /// Failures in chunk order, then image order.
    pub failures: Vec<ItemFailure>,
}

impl IngestionReport {
    /// Number of chunks that failed to index.
    pub fn chunks_failed(&self) -> usize {
        self.failures
            .iter()
            .filter(|failure| matches!(failure.item, IngestItem::Chunk { .. }))
            .count()
    }

    /// Number of images that failed to index.
    pub fn images_failed(&self) -> usize {
        self.failures
            .iter()
            .filter(|failure| matches!(failure.item, IngestItem::Image { .. }))
            .count()
    }

    /// Whether every item was indexed (skipped blank chunks do not count as failures).
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_counts_failures_by_kind() {
        let report = IngestionReport {
            failures: vec![
                ItemFailure {
                    item: IngestItem::Chunk { index: 0 },
                    error: "boom".into(),
                    transient: true,
                },
                ItemFailure {
                    item: IngestItem::Image { index: 1 },
                    error: "bad".into(),
                    transient: false,
                },
                ItemFailure {
                    item: IngestItem::Chunk { index: 3 },
                    error: "boom".into(),
                    transient: true,
                },
            ],
            ..Default::default()
        };
        assert_eq!(report.chunks_failed(), 2);
        assert_eq!(report.images_failed(), 1);
        assert!(!report.is_complete());
    }

    #[test]
    fn item_serializes_with_kind_tag() {
        let value = serde_json::to_value(IngestItem::Image { index: 2 }).unwrap();
        assert_eq!(value, serde_json::json!({ "kind": "image", "index": 2 }));
    }
}
