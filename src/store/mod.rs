//! Vector store contract shared by the Qdrant adapter and the in-memory store.
//!
//! Stores persist [`VectorRecord`]s in one flat namespace whose vectors all share the
//! configured dimension, and answer cosine-similarity queries optionally restricted to a set of
//! modalities. Results are ordered by descending score; equal scores are ordered by upsert
//! recency (newest first), then by record id, so identical queries return identical orderings.

mod memory;

pub use memory::InMemoryVectorStore;

use crate::embedding::{EmbeddingVector, Modality};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;
use uuid::Uuid;

/// Errors returned by vector store implementations.
#[derive(Debug, Error)]
pub enum VectorStoreError {
    /// Base URL failed to parse or normalize.
    #[error("Invalid vector store URL: {0}")]
    InvalidUrl(String),
    /// Transport, authentication or server-side failure; retryable.
    #[error("Vector store unavailable: {0}")]
    ServiceUnavailable(String),
    /// The store rejected the request.
    #[error("Unexpected vector store response ({status}): {body}")]
    UnexpectedStatus {
        /// HTTP status returned by the store.
        status: StatusCode,
        /// Body payload associated with the failing response.
        body: String,
    },
    /// The store answered with a body that could not be decoded.
    #[error("Malformed vector store response: {0}")]
    InvalidResponse(String),
    /// Vector length differs from the index dimension.
    #[error("Vector dimension mismatch: index expects {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimension of the index.
        expected: usize,
        /// Dimension of the offending vector.
        actual: usize,
    },
    /// Queries must ask for at least one result.
    #[error("top_k must be greater than zero")]
    InvalidTopK,
}

impl VectorStoreError {
    /// Whether the failure may succeed on retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ServiceUnavailable(_))
    }
}

impl From<reqwest::Error> for VectorStoreError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_decode() {
            Self::InvalidResponse(error.to_string())
        } else {
            Self::ServiceUnavailable(error.to_string())
        }
    }
}

/// Metadata persisted next to every vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordMetadata {
    /// Source identifier (path, URL, ...) supplied by the loader.
    pub source: String,
    /// Modality that produced the vector.
    pub modality: Modality,
    /// RFC3339 ingestion timestamp.
    pub timestamp: String,
    /// Identifier of the source document.
    pub document_id: String,
    /// Chunk sequence index or image position.
    pub sequence_index: usize,
    /// Zero-shot label for images.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Confidence of the zero-shot label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_confidence: Option<f32>,
    /// Chunk text for text records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_text: Option<String>,
    /// Human-readable file name of the source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    /// File name of the image for image records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_name: Option<String>,
    /// Loader-supplied attributes such as page numbers.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

/// Vector plus metadata, stored under a stable id.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorRecord {
    /// Record identifier; re-upserting the same id replaces the record.
    pub id: String,
    /// Embedding stored for the record.
    pub vector: EmbeddingVector,
    /// Metadata stored alongside the vector.
    pub metadata: RecordMetadata,
}

/// Single nearest-neighbour hit.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    /// Identifier of the matching record.
    pub record_id: String,
    /// Cosine similarity in `[-1, 1]`.
    pub score: f32,
    /// Stored metadata.
    pub metadata: RecordMetadata,
}

/// Record refused because its vector does not fit the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedRecord {
    /// Identifier of the rejected record.
    pub id: String,
    /// Dimension of the index.
    pub expected: usize,
    /// Dimension of the rejected vector.
    pub actual: usize,
}

/// Outcome of an upsert call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpsertSummary {
    /// Records written (inserted or replaced).
    pub upserted: usize,
    /// Records refused for dimension mismatch; the rest of the batch was still written.
    pub rejected: Vec<RejectedRecord>,
}

/// Nearest-neighbour index over a flat namespace.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Dimension every stored and query vector must have.
    fn dimension(&self) -> usize;

    /// Create the namespace and supporting indexes when missing.
    async fn ensure_ready(&self) -> Result<(), VectorStoreError>;

    /// Insert or replace records by id. Valid records are written all-or-nothing.
    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<UpsertSummary, VectorStoreError>;

    /// Return up to `top_k` records ordered by descending cosine similarity.
    ///
    /// An empty `modality_filter` slice is treated the same as `None`.
    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        modality_filter: Option<&[Modality]>,
    ) -> Result<Vec<QueryResult>, VectorStoreError>;

    /// Delete every record ingested from `source`.
    async fn delete_source(&self, source: &str) -> Result<(), VectorStoreError>;

    /// Distinct sources currently stored.
    async fn list_sources(&self) -> Result<BTreeSet<String>, VectorStoreError>;

    /// Drop all records and recreate the empty namespace.
    async fn reset(&self) -> Result<(), VectorStoreError>;
}

/// Deterministic record id for the `index`-th item of a document.
pub fn record_id(document_id: &str, modality: Modality, index: usize) -> String {
    let key = format!("{document_id}:{modality}:{index}");
    Uuid::new_v5(&Uuid::NAMESPACE_OID, key.as_bytes()).to_string()
}

/// Stable SHA-256 hex digest, used for document ids and chunk hashes.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// Candidate with the recency key used for tie-breaking.
pub(crate) struct RankedCandidate {
    pub(crate) result: QueryResult,
    pub(crate) recency: u64,
}

/// Order candidates by score, then recency (newest first), then id, and truncate.
pub(crate) fn rank_candidates(
    mut candidates: Vec<RankedCandidate>,
    top_k: usize,
) -> Vec<QueryResult> {
    candidates.sort_by(|a, b| {
        b.result
            .score
            .total_cmp(&a.result.score)
            .then_with(|| b.recency.cmp(&a.recency))
            .then_with(|| a.result.record_id.cmp(&b.result.record_id))
    });
    candidates
        .into_iter()
        .take(top_k)
        .map(|candidate| candidate.result)
        .collect()
}

/// Reject zero `top_k` and vectors of the wrong dimension.
pub(crate) fn validate_query(
    dimension: usize,
    vector: &[f32],
    top_k: usize,
) -> Result<(), VectorStoreError> {
    if top_k == 0 {
        return Err(VectorStoreError::InvalidTopK);
    }
    if vector.len() != dimension {
        return Err(VectorStoreError::DimensionMismatch {
            expected: dimension,
            actual: vector.len(),
        });
    }
    Ok(())
}

/// Split records into those matching `dimension` and rejections.
pub(crate) fn partition_by_dimension(
    dimension: usize,
    records: Vec<VectorRecord>,
) -> (Vec<VectorRecord>, Vec<RejectedRecord>) {
    let mut accepted = Vec::with_capacity(records.len());
    let mut rejected = Vec::new();
    for record in records {
        if record.vector.dimension() == dimension {
            accepted.push(record);
        } else {
            tracing::warn!(
                id = %record.id,
                expected = dimension,
                actual = record.vector.dimension(),
                "Rejecting record with mismatched dimension"
            );
            rejected.push(RejectedRecord {
                actual: record.vector.dimension(),
                id: record.id,
                expected: dimension,
            });
        }
    }
    (accepted, rejected)
}

/// Deduplicated modality filter; `None` when no restriction applies.
pub(crate) fn normalize_filter(modality_filter: Option<&[Modality]>) -> Option<Vec<Modality>> {
    let set: BTreeSet<Modality> = modality_filter?.iter().copied().collect();
    if set.is_empty() {
        None
    } else {
        Some(set.into_iter().collect())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub(crate) fn metadata(source: &str, modality: Modality, index: usize) -> RecordMetadata {
        RecordMetadata {
            source: source.to_string(),
            modality,
            timestamp: "2025-01-01T00:00:00Z".to_string(),
            document_id: content_hash(source),
            sequence_index: index,
            label: None,
            label_confidence: None,
            chunk_text: Some(format!("chunk {index}")),
            filename: None,
            image_name: None,
            attributes: BTreeMap::new(),
        }
    }

    pub(crate) fn record(id: &str, values: Vec<f32>, modality: Modality) -> VectorRecord {
        VectorRecord {
            id: id.to_string(),
            vector: EmbeddingVector::new(values, modality),
            metadata: metadata("doc.txt", modality, 0),
        }
    }
}
