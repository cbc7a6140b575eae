//! Ingestion pipeline coordinating cleaning, chunking, embedding and vector store writes.

use crate::{
    embedding::{
        EmbeddingError, EmbeddingVector, ImageEmbeddingProvider, TextEmbeddingProvider,
        ZeroShotLabel,
    },
    metrics::{IngestionMetrics, MetricsSnapshot},
    processing::{
        chunking::TextChunker,
        cleaning::TextCleaner,
        mappers::{
            base_metadata, document_id, image_record, index_by_id, split_blank_chunks, text_record,
        },
        types::{Chunk, IngestItem, IngestionReport, ItemFailure, ProcessingError},
    },
    qdrant::current_timestamp_rfc3339,
    source::{DocumentSource, LoadedDocument, LoadedImage},
    store::{RecordMetadata, VectorRecord, VectorStore},
};
use futures_util::stream::{self, StreamExt};
use std::sync::Arc;

/// Default labels offered to the zero-shot image classifier.
pub const DEFAULT_ZERO_SHOT_LABELS: [&str; 7] = [
    "chart",
    "diagram",
    "table",
    "screenshot",
    "photograph",
    "document page",
    "plot",
];

/// Batching and labeling knobs for ingestion.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestionSettings {
    /// Chunks embedded and upserted per batch.
    pub upsert_batch_size: usize,
    /// Batches in flight at once.
    pub max_concurrent_batches: usize,
    /// Candidate labels for image classification; empty disables labeling.
    pub zero_shot_labels: Vec<String>,
}

impl Default for IngestionSettings {
    fn default() -> Self {
        Self {
            upsert_batch_size: 100,
            max_concurrent_batches: 4,
            zero_shot_labels: DEFAULT_ZERO_SHOT_LABELS
                .iter()
                .map(|label| label.to_string())
                .collect(),
        }
    }
}

impl IngestionSettings {
    fn validate(&self) -> Result<(), ProcessingError> {
        if self.upsert_batch_size == 0 {
            return Err(ProcessingError::InvalidSettings(
                "upsert batch size must be greater than zero".into(),
            ));
        }
        if self.max_concurrent_batches == 0 {
            return Err(ProcessingError::InvalidSettings(
                "ingest concurrency must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Items indexed by one unit of work plus the failures it produced.
#[derive(Default)]
struct BatchOutcome {
    indexed: usize,
    failures: Vec<ItemFailure>,
}

impl BatchOutcome {
    fn failed(items: impl IntoIterator<Item = IngestItem>, error: &str, transient: bool) -> Self {
        Self {
            indexed: 0,
            failures: items
                .into_iter()
                .map(|item| ItemFailure {
                    item,
                    error: error.to_string(),
                    transient,
                })
                .collect(),
        }
    }
}

/// Coordinates ingestion of loaded documents into the vector store.
///
/// Construct once near process start with injected providers and store; the pipeline holds
/// no per-document state and can be shared through an `Arc`.
pub struct IngestionPipeline {
    cleaner: TextCleaner,
    chunker: TextChunker,
    text_embedder: Arc<dyn TextEmbeddingProvider>,
    image_embedder: Option<Arc<dyn ImageEmbeddingProvider>>,
    store: Arc<dyn VectorStore>,
    settings: IngestionSettings,
    metrics: Arc<IngestionMetrics>,
}

impl IngestionPipeline {
    /// Assemble a pipeline, rejecting zero batch sizes or concurrency.
    pub fn new(
        cleaner: TextCleaner,
        chunker: TextChunker,
        text_embedder: Arc<dyn TextEmbeddingProvider>,
        image_embedder: Option<Arc<dyn ImageEmbeddingProvider>>,
        store: Arc<dyn VectorStore>,
        settings: IngestionSettings,
    ) -> Result<Self, ProcessingError> {
        settings.validate()?;
        Ok(Self {
            cleaner,
            chunker,
            text_embedder,
            image_embedder,
            store,
            settings,
            metrics: Arc::new(IngestionMetrics::new()),
        })
    }

    /// Load a document from `source` and ingest it.
    pub async fn ingest(
        &self,
        source: &dyn DocumentSource,
    ) -> Result<IngestionReport, ProcessingError> {
        let document = source.load().await?;
        Ok(self.ingest_document(document).await)
    }

    /// Clean, chunk, embed and store a loaded document.
    ///
    /// Individual chunk or image failures are recorded in the report and never abort the
    /// remaining items.
    pub async fn ingest_document(&self, document: LoadedDocument) -> IngestionReport {
        let LoadedDocument {
            text,
            images,
            metadata,
        } = document;
        let doc_id = document_id(&metadata.source);
        let timestamp = current_timestamp_rfc3339();
        let base = base_metadata(&doc_id, &metadata, &timestamp);
        tracing::info!(source = %base.source, document_id = %doc_id, "Ingesting document");

        let cleaned = self.cleaner.clean(&text);
        let chunks = self.chunker.chunk(&doc_id, &cleaned);
        let chunks_total = chunks.len();
        let (chunks, chunks_skipped) = split_blank_chunks(chunks);
        tracing::debug!(
            raw_chars = text.chars().count(),
            cleaned_chars = cleaned.chars().count(),
            chunks = chunks_total,
            skipped = chunks_skipped,
            chunk_size = self.chunker.chunk_size(),
            overlap = self.chunker.overlap(),
            "Chunked document"
        );

        let text_outcome = self.index_chunks(chunks, chunks_total, &base).await;
        let image_outcome = self.index_images(&images, &base).await;

        let mut failures = text_outcome.failures;
        failures.extend(image_outcome.failures);

        let report = IngestionReport {
            document_id: doc_id,
            source: base.source.clone(),
            chunks_total,
            chunks_indexed: text_outcome.indexed,
            chunks_skipped,
            images_total: images.len(),
            images_indexed: image_outcome.indexed,
            failures,
        };

        self.metrics.record_document(
            report.chunks_indexed as u64,
            report.images_indexed as u64,
            report.failures.len() as u64,
        );
        if report.is_complete() {
            tracing::info!(
                source = %report.source,
                chunks = report.chunks_indexed,
                images = report.images_indexed,
                skipped = report.chunks_skipped,
                "Document indexed"
            );
        } else {
            tracing::warn!(
                source = %report.source,
                chunks = report.chunks_indexed,
                images = report.images_indexed,
                chunks_failed = report.chunks_failed(),
                images_failed = report.images_failed(),
                "Document indexed with failures"
            );
        }
        report
    }

    /// Return the current ingestion metrics snapshot.
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    async fn index_chunks(
        &self,
        chunks: Vec<Chunk>,
        total_chunks: usize,
        base: &RecordMetadata,
    ) -> BatchOutcome {
        let batch_size = self.settings.upsert_batch_size;
        let mut batches: Vec<Vec<Chunk>> = Vec::with_capacity(chunks.len().div_ceil(batch_size));
        let mut iter = chunks.into_iter().peekable();
        while iter.peek().is_some() {
            batches.push(iter.by_ref().take(batch_size).collect());
        }

        let mut outcomes: Vec<(usize, BatchOutcome)> = stream::iter(batches.into_iter().enumerate())
            .map(|(batch_index, batch)| async move {
                let outcome = self
                    .index_batch(batch_index, batch, total_chunks, base)
                    .await;
                (batch_index, outcome)
            })
            .buffer_unordered(self.settings.max_concurrent_batches)
            .collect()
            .await;
        outcomes.sort_by_key(|(batch_index, _)| *batch_index);

        outcomes
            .into_iter()
            .fold(BatchOutcome::default(), |mut merged, (_, outcome)| {
                merged.indexed += outcome.indexed;
                merged.failures.extend(outcome.failures);
                merged
            })
    }

    async fn index_batch(
        &self,
        batch_index: usize,
        batch: Vec<Chunk>,
        total_chunks: usize,
        base: &RecordMetadata,
    ) -> BatchOutcome {
        let expected = self.store.dimension();
        let embedded = self.embed_batch(batch_index, &batch).await;

        let mut failures = Vec::new();
        let mut records = Vec::with_capacity(batch.len());
        for (chunk, result) in batch.iter().zip(embedded) {
            match result.and_then(|vector| vector.ensure_dimension(expected).map(|()| vector)) {
                Ok(vector) => records.push(text_record(base, chunk, total_chunks, vector)),
                Err(error) => {
                    tracing::warn!(
                        batch = batch_index,
                        chunk = chunk.sequence_index,
                        error = %error,
                        "Chunk embedding failed"
                    );
                    failures.push(ItemFailure {
                        item: IngestItem::Chunk {
                            index: chunk.sequence_index,
                        },
                        error: error.to_string(),
                        transient: error.is_transient(),
                    });
                }
            }
        }

        let ids: Vec<(String, usize)> = records
            .iter()
            .map(|record| (record.id.clone(), record.metadata.sequence_index))
            .collect();
        let mut outcome = self
            .upsert_records(
                records,
                index_by_id(ids.iter().map(|(id, index)| (id.as_str(), *index))),
                |index| IngestItem::Chunk { index },
                batch_index,
            )
            .await;
        failures.append(&mut outcome.failures);
        sort_failures(&mut failures);
        outcome.failures = failures;
        outcome
    }

    /// Embed a batch in one call, falling back to one call per chunk when the batch fails.
    async fn embed_batch(
        &self,
        batch_index: usize,
        batch: &[Chunk],
    ) -> Vec<Result<EmbeddingVector, EmbeddingError>> {
        let texts: Vec<String> = batch.iter().map(|chunk| chunk.text.clone()).collect();
        match self.text_embedder.embed_texts(texts).await {
            Ok(vectors) if vectors.len() == batch.len() => {
                return vectors.into_iter().map(Ok).collect();
            }
            Ok(vectors) => tracing::warn!(
                batch = batch_index,
                vectors = vectors.len(),
                chunks = batch.len(),
                "Embedding batch returned wrong vector count; retrying per chunk"
            ),
            Err(error) => tracing::warn!(
                batch = batch_index,
                error = %error,
                "Embedding batch failed; retrying per chunk"
            ),
        }

        let mut results = Vec::with_capacity(batch.len());
        for chunk in batch {
            results.push(self.text_embedder.embed_text(&chunk.text).await);
        }
        results
    }

    async fn index_images(&self, images: &[LoadedImage], base: &RecordMetadata) -> BatchOutcome {
        if images.is_empty() {
            return BatchOutcome::default();
        }
        let Some(embedder) = &self.image_embedder else {
            tracing::warn!(
                source = %base.source,
                images = images.len(),
                "No image embedding provider configured; images not indexed"
            );
            return BatchOutcome::failed(
                (0..images.len()).map(|index| IngestItem::Image { index }),
                "no image embedding provider configured",
                false,
            );
        };

        let expected = self.store.dimension();
        let mut failures = Vec::new();
        let mut records = Vec::with_capacity(images.len());
        for (index, image) in images.iter().enumerate() {
            let embedded = embedder
                .embed_image(&image.bytes)
                .await
                .and_then(|vector| vector.ensure_dimension(expected).map(|()| vector));
            let vector = match embedded {
                Ok(vector) => vector,
                Err(error) => {
                    tracing::warn!(image = %image.name, error = %error, "Image embedding failed");
                    failures.push(ItemFailure {
                        item: IngestItem::Image { index },
                        error: error.to_string(),
                        transient: error.is_transient(),
                    });
                    continue;
                }
            };
            let label = self.classify(embedder.as_ref(), image).await;
            records.push(image_record(base, index, &image.name, vector, label));
        }

        let ids: Vec<(String, usize)> = records
            .iter()
            .map(|record| (record.id.clone(), record.metadata.sequence_index))
            .collect();
        let mut outcome = self
            .upsert_records(
                records,
                index_by_id(ids.iter().map(|(id, index)| (id.as_str(), *index))),
                |index| IngestItem::Image { index },
                0,
            )
            .await;
        failures.append(&mut outcome.failures);
        sort_failures(&mut failures);
        outcome.failures = failures;
        outcome
    }

    /// Zero-shot label for an image; classification failures only drop the label.
    async fn classify(
        &self,
        embedder: &dyn ImageEmbeddingProvider,
        image: &LoadedImage,
    ) -> Option<ZeroShotLabel> {
        if self.settings.zero_shot_labels.is_empty() {
            return None;
        }
        match embedder
            .classify_zero_shot(&image.bytes, &self.settings.zero_shot_labels)
            .await
        {
            Ok(label) => {
                tracing::debug!(image = %image.name, label = %label.label, confidence = label.confidence, "Image classified");
                Some(label)
            }
            Err(error) => {
                tracing::warn!(image = %image.name, error = %error, "Zero-shot classification failed; storing without label");
                None
            }
        }
    }

    async fn upsert_records(
        &self,
        records: Vec<VectorRecord>,
        positions: std::collections::HashMap<&str, usize>,
        item: impl Fn(usize) -> IngestItem,
        batch_index: usize,
    ) -> BatchOutcome {
        if records.is_empty() {
            return BatchOutcome::default();
        }
        let count = records.len();
        match self.store.upsert(records).await {
            Ok(summary) => {
                let failures = summary
                    .rejected
                    .iter()
                    .filter_map(|rejected| {
                        let index = *positions.get(rejected.id.as_str())?;
                        Some(ItemFailure {
                            item: item(index),
                            error: format!(
                                "vector dimension mismatch: index expects {}, got {}",
                                rejected.expected, rejected.actual
                            ),
                            transient: false,
                        })
                    })
                    .collect();
                tracing::debug!(
                    batch = batch_index,
                    upserted = summary.upserted,
                    rejected = summary.rejected.len(),
                    "Upserted batch"
                );
                BatchOutcome {
                    indexed: summary.upserted,
                    failures,
                }
            }
            Err(error) => {
                tracing::warn!(batch = batch_index, records = count, error = %error, "Upsert failed");
                let mut indexes: Vec<usize> = positions.values().copied().collect();
                indexes.sort_unstable();
                BatchOutcome::failed(
                    indexes.into_iter().map(item),
                    &error.to_string(),
                    error.is_transient(),
                )
            }
        }
    }
}

fn sort_failures(failures: &mut [ItemFailure]) {
    failures.sort_by_key(|failure| match failure.item {
        IngestItem::Chunk { index } | IngestItem::Image { index } => index,
    });
}
