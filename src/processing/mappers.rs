//! Mapping helpers turning chunks, images and embeddings into vector records.

use crate::{
    embedding::{EmbeddingVector, Modality, ZeroShotLabel},
    processing::{sanitize, types::Chunk},
    source::SourceMetadata,
    store::{RecordMetadata, VectorRecord, content_hash, record_id},
};
use std::collections::HashMap;

/// Stable document identifier derived from the source identifier.
pub(crate) fn document_id(source: &str) -> String {
    content_hash(source.trim())
}

/// Metadata shared by every record of a document.
pub(crate) fn base_metadata(
    document_id: &str,
    source: &SourceMetadata,
    timestamp: &str,
) -> RecordMetadata {
    RecordMetadata {
        source: source.source.trim().to_string(),
        modality: Modality::Text,
        timestamp: timestamp.to_string(),
        document_id: document_id.to_string(),
        sequence_index: 0,
        label: None,
        label_confidence: None,
        chunk_text: None,
        filename: sanitize::sanitize_string(source.filename.as_deref()),
        image_name: None,
        attributes: sanitize::sanitize_attributes(&source.attributes),
    }
}

/// Separate whitespace-only chunks, which are never embedded.
pub(crate) fn split_blank_chunks(chunks: Vec<Chunk>) -> (Vec<Chunk>, usize) {
    let total = chunks.len();
    let kept: Vec<Chunk> = chunks
        .into_iter()
        .filter(|chunk| !chunk.text.trim().is_empty())
        .collect();
    let skipped = total - kept.len();
    (kept, skipped)
}

/// Attribute carrying the number of chunks the document was split into.
pub(crate) const TOTAL_CHUNKS_KEY: &str = "total_chunks";

/// Record for an embedded text chunk out of `total_chunks` produced for its document.
pub(crate) fn text_record(
    base: &RecordMetadata,
    chunk: &Chunk,
    total_chunks: usize,
    vector: EmbeddingVector,
) -> VectorRecord {
    let mut attributes = base.attributes.clone();
    attributes.insert(TOTAL_CHUNKS_KEY.to_string(), total_chunks.to_string());
    VectorRecord {
        id: chunk.id.clone(),
        vector,
        metadata: RecordMetadata {
            modality: Modality::Text,
            sequence_index: chunk.sequence_index,
            chunk_text: Some(chunk.text.clone()),
            attributes,
            ..base.clone()
        },
    }
}

/// Record for an embedded image, carrying its zero-shot label when one was assigned.
pub(crate) fn image_record(
    base: &RecordMetadata,
    index: usize,
    image_name: &str,
    vector: EmbeddingVector,
    label: Option<ZeroShotLabel>,
) -> VectorRecord {
    let (label, label_confidence) = match label {
        Some(ZeroShotLabel { label, confidence }) => (Some(label), Some(confidence)),
        None => (None, None),
    };
    VectorRecord {
        id: record_id(&base.document_id, Modality::Image, index),
        vector,
        metadata: RecordMetadata {
            modality: Modality::Image,
            sequence_index: index,
            image_name: sanitize::sanitize_string(Some(image_name)),
            label,
            label_confidence,
            ..base.clone()
        },
    }
}

/// Lookup from record id back to the item position that produced it.
pub(crate) fn index_by_id<'a>(ids: impl IntoIterator<Item = (&'a str, usize)>) -> HashMap<&'a str, usize> {
    ids.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn chunk(index: usize, text: &str) -> Chunk {
        Chunk {
            id: record_id("doc", Modality::Text, index),
            source_document_id: "doc".into(),
            sequence_index: index,
            text: text.into(),
            char_start: 0,
            char_end: text.chars().count(),
        }
    }

    fn source() -> SourceMetadata {
        let mut attributes = BTreeMap::new();
        attributes.insert("page".to_string(), "2".to_string());
        SourceMetadata {
            source: " docs/guide.md ".into(),
            filename: Some("guide.md".into()),
            attributes,
        }
    }

    #[test]
    fn document_id_is_hash_of_trimmed_source() {
        assert_eq!(document_id(" a.txt "), document_id("a.txt"));
        assert_eq!(document_id("a.txt").len(), 64);
    }

    #[test]
    fn split_blank_chunks_counts_skips() {
        let (kept, skipped) = split_blank_chunks(vec![chunk(0, "alpha"), chunk(1, "  \n"), chunk(2, "beta")]);
        assert_eq!(skipped, 1);
        let indexes: Vec<_> = kept.iter().map(|c| c.sequence_index).collect();
        assert_eq!(indexes, vec![0, 2]);
    }

    #[test]
    fn text_record_carries_chunk_fields() {
        let base = base_metadata("doc", &source(), "2025-01-01T00:00:00Z");
        let chunk = chunk(3, "hello");
        let record = text_record(
            &base,
            &chunk,
            7,
            EmbeddingVector::new(vec![1.0], Modality::Text),
        );
        assert_eq!(record.id, chunk.id);
        assert_eq!(record.metadata.source, "docs/guide.md");
        assert_eq!(record.metadata.sequence_index, 3);
        assert_eq!(record.metadata.chunk_text.as_deref(), Some("hello"));
        assert_eq!(record.metadata.filename.as_deref(), Some("guide.md"));
        assert_eq!(record.metadata.attributes.get("page").map(String::as_str), Some("2"));
        assert_eq!(
            record.metadata.attributes.get(TOTAL_CHUNKS_KEY).map(String::as_str),
            Some("7")
        );
        assert!(!base.attributes.contains_key(TOTAL_CHUNKS_KEY));
    }

    #[test]
    fn image_record_carries_label() {
        let base = base_metadata("doc", &source(), "2025-01-01T00:00:00Z");
        let record = image_record(
            &base,
            1,
            "fig.png",
            EmbeddingVector::new(vec![1.0], Modality::Image),
            Some(ZeroShotLabel {
                label: "chart".into(),
                confidence: 0.8,
            }),
        );
        assert_eq!(record.id, record_id("doc", Modality::Image, 1));
        assert_eq!(record.metadata.modality, Modality::Image);
        assert_eq!(record.metadata.label.as_deref(), Some("chart"));
        assert_eq!(record.metadata.label_confidence, Some(0.8));
        assert_eq!(record.metadata.image_name.as_deref(), Some("fig.png"));
        assert!(record.metadata.chunk_text.is_none());
        assert!(!record.metadata.attributes.contains_key(TOTAL_CHUNKS_KEY));
    }
}
