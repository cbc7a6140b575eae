//! Query-time retrieval: store lookup, threshold filtering, reranking and context assembly.

mod query;

pub use query::{Query, QueryEngine, QueryError};

use crate::embedding::Modality;
use crate::store::{QueryResult, RecordMetadata, VectorStore, VectorStoreError};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised while retrieving context.
#[derive(Debug, Error)]
pub enum RetrievalError {
    /// The vector store failed.
    #[error(transparent)]
    Store(#[from] VectorStoreError),
    /// Retrieval settings are inconsistent.
    #[error("Invalid retrieval settings: {0}")]
    InvalidSettings(String),
}

impl RetrievalError {
    /// Whether the failure may succeed on retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Store(error) if error.is_transient())
    }
}

/// Candidate counts and score cut-off applied to each query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetrievalSettings {
    top_k_initial: usize,
    score_threshold: f32,
    rerank_top_k: usize,
}

impl RetrievalSettings {
    /// Validate `top_k_initial >= rerank_top_k > 0` and a threshold within `[-1, 1]`.
    pub fn new(
        top_k_initial: usize,
        score_threshold: f32,
        rerank_top_k: usize,
    ) -> Result<Self, RetrievalError> {
        if rerank_top_k == 0 {
            return Err(RetrievalError::InvalidSettings(
                "rerank_top_k must be greater than zero".into(),
            ));
        }
        if top_k_initial < rerank_top_k {
            return Err(RetrievalError::InvalidSettings(format!(
                "top_k_initial ({top_k_initial}) must be at least rerank_top_k ({rerank_top_k})"
            )));
        }
        if !(-1.0..=1.0).contains(&score_threshold) {
            return Err(RetrievalError::InvalidSettings(format!(
                "score_threshold {score_threshold} must lie within [-1, 1]"
            )));
        }
        Ok(Self {
            top_k_initial,
            score_threshold,
            rerank_top_k,
        })
    }

    /// Number of candidates requested from the store.
    pub fn top_k_initial(&self) -> usize {
        self.top_k_initial
    }

    /// Minimum score a candidate must reach.
    pub fn score_threshold(&self) -> f32 {
        self.score_threshold
    }

    /// Number of results kept after reranking.
    pub fn rerank_top_k(&self) -> usize {
        self.rerank_top_k
    }
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            top_k_initial: 5,
            score_threshold: 0.0,
            rerank_top_k: 3,
        }
    }
}

/// Reordering step applied between threshold filtering and truncation.
pub trait Reranker: Send + Sync {
    /// Reorder (or prune) candidates already above the score threshold.
    fn rerank(&self, candidates: Vec<QueryResult>) -> Vec<QueryResult>;
}

/// Keeps the store's similarity order.
#[derive(Debug, Default, Clone, Copy)]
pub struct SimilarityRanker;

impl Reranker for SimilarityRanker {
    fn rerank(&self, candidates: Vec<QueryResult>) -> Vec<QueryResult> {
        candidates
    }
}

/// Content handed to the generation stage for one hit.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ContextContent {
    /// Chunk text.
    Text {
        /// Text of the chunk.
        text: String,
    },
    /// Textual stand-in for an image hit.
    Image {
        /// Label and file descriptor.
        descriptor: String,
    },
}

impl ContextContent {
    fn from_metadata(metadata: &RecordMetadata) -> Self {
        match metadata.modality {
            Modality::Text => Self::Text {
                text: metadata.chunk_text.clone().unwrap_or_default(),
            },
            Modality::Image => {
                let label = metadata.label.as_deref().unwrap_or("unknown");
                let name = metadata
                    .image_name
                    .as_deref()
                    .unwrap_or(metadata.source.as_str());
                Self::Image {
                    descriptor: format!("Image Type: {label}\nImage File: {name}"),
                }
            }
        }
    }

    /// Text rendered into the context block.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Text { text } => text,
            Self::Image { descriptor } => descriptor,
        }
    }
}

/// One ranked hit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextItem {
    /// Identifier of the matched record.
    pub record_id: String,
    /// Rendered content.
    pub content: ContextContent,
    /// Metadata stored with the record.
    pub metadata: RecordMetadata,
    /// Cosine similarity to the query.
    pub score: f32,
}

impl From<QueryResult> for ContextItem {
    fn from(result: QueryResult) -> Self {
        Self {
            content: ContextContent::from_metadata(&result.metadata),
            record_id: result.record_id,
            metadata: result.metadata,
            score: result.score,
        }
    }
}

/// Ordered hits for a single query. Empty is a valid outcome.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RetrievalContext {
    items: Vec<ContextItem>,
}

impl RetrievalContext {
    /// Ranked hits, best first.
    pub fn items(&self) -> &[ContextItem] {
        &self.items
    }

    /// Number of hits.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether no hit passed the filters.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Plain context block: one `[Source i: name]` section per hit separated by `---`.
    pub fn render(&self) -> String {
        if self.items.is_empty() {
            return "No relevant documents found.".to_string();
        }

        self.items
            .iter()
            .enumerate()
            .map(|(idx, item)| {
                let metadata = &item.metadata;
                let name = metadata
                    .filename
                    .as_deref()
                    .filter(|value| !value.is_empty())
                    .or_else(|| Some(metadata.source.as_str()).filter(|value| !value.is_empty()))
                    .unwrap_or("Unknown");
                let page = metadata
                    .attributes
                    .get("page")
                    .map(|page| format!(", Page {page}"))
                    .unwrap_or_default();
                format!(
                    "[Source {}: {name}{page}]\n{}",
                    idx + 1,
                    item.content.as_str()
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n---\n\n")
    }
}

impl From<Vec<QueryResult>> for RetrievalContext {
    fn from(results: Vec<QueryResult>) -> Self {
        Self {
            items: results.into_iter().map(ContextItem::from).collect(),
        }
    }
}

/// Threshold, rerank, truncate. The threshold is never relaxed.
pub(crate) fn select(
    candidates: Vec<QueryResult>,
    settings: &RetrievalSettings,
    reranker: &dyn Reranker,
) -> Vec<QueryResult> {
    let passing: Vec<QueryResult> = candidates
        .into_iter()
        .filter(|candidate| candidate.score >= settings.score_threshold)
        .collect();
    let mut ranked = reranker.rerank(passing);
    ranked.truncate(settings.rerank_top_k);
    ranked
}

/// Turns a query vector into a ranked [`RetrievalContext`].
#[derive(Clone)]
pub struct Retriever {
    store: Arc<dyn VectorStore>,
    reranker: Arc<dyn Reranker>,
    settings: RetrievalSettings,
}

impl Retriever {
    /// Retriever that keeps similarity order.
    pub fn new(store: Arc<dyn VectorStore>, settings: RetrievalSettings) -> Self {
        Self::with_reranker(store, settings, Arc::new(SimilarityRanker))
    }

    /// Retriever with a custom reranking stage.
    pub fn with_reranker(
        store: Arc<dyn VectorStore>,
        settings: RetrievalSettings,
        reranker: Arc<dyn Reranker>,
    ) -> Self {
        Self {
            store,
            reranker,
            settings,
        }
    }

    /// Settings applied to every query.
    pub fn settings(&self) -> &RetrievalSettings {
        &self.settings
    }

    /// Query the store and shape the hits into a context.
    pub async fn retrieve(
        &self,
        query_vector: &[f32],
        modality_filter: Option<&[Modality]>,
    ) -> Result<RetrievalContext, RetrievalError> {
        let candidates = self
            .store
            .query(query_vector, self.settings.top_k_initial, modality_filter)
            .await?;
        let candidate_count = candidates.len();
        let selected = select(candidates, &self.settings, self.reranker.as_ref());

        tracing::info!(
            candidates = candidate_count,
            returned = selected.len(),
            threshold = self.settings.score_threshold,
            "Retrieved context"
        );
        for (idx, hit) in selected.iter().enumerate() {
            tracing::debug!(
                rank = idx,
                score = hit.score,
                source = %hit.metadata.source,
                modality = %hit.metadata.modality,
                "Context hit"
            );
        }

        Ok(RetrievalContext::from(selected))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryVectorStore;
    use crate::store::test_support::{metadata, record};

    fn result(id: &str, score: f32) -> QueryResult {
        QueryResult {
            record_id: id.into(),
            score,
            metadata: metadata("doc.txt", Modality::Text, 0),
        }
    }

    fn scores(results: &[QueryResult]) -> Vec<f32> {
        results.iter().map(|r| r.score).collect()
    }

    struct Reverse;

    impl Reranker for Reverse {
        fn rerank(&self, mut candidates: Vec<QueryResult>) -> Vec<QueryResult> {
            candidates.reverse();
            candidates
        }
    }

    #[test]
    fn threshold_then_truncate() {
        let settings = RetrievalSettings::new(5, 0.5, 3).unwrap();
        let candidates = [0.9, 0.7, 0.4, 0.3, 0.1]
            .iter()
            .enumerate()
            .map(|(idx, score)| result(&format!("r{idx}"), *score))
            .collect();
        let selected = select(candidates, &settings, &SimilarityRanker);
        assert_eq!(scores(&selected), vec![0.9, 0.7]);
    }

    #[test]
    fn truncates_to_rerank_top_k() {
        let settings = RetrievalSettings::new(5, 0.0, 2).unwrap();
        let candidates = vec![result("a", 0.9), result("b", 0.8), result("c", 0.7)];
        let selected = select(candidates, &settings, &SimilarityRanker);
        assert_eq!(scores(&selected), vec![0.9, 0.8]);
    }

    #[test]
    fn nothing_passing_threshold_yields_empty() {
        let settings = RetrievalSettings::new(5, 0.95, 3).unwrap();
        let selected = select(vec![result("a", 0.9)], &settings, &SimilarityRanker);
        assert!(selected.is_empty());
    }

    #[test]
    fn reranker_runs_before_truncation() {
        let settings = RetrievalSettings::new(5, 0.5, 2).unwrap();
        let candidates = vec![
            result("a", 0.9),
            result("b", 0.8),
            result("c", 0.7),
            result("d", 0.1),
        ];
        let selected = select(candidates, &settings, &Reverse);
        let ids: Vec<_> = selected.iter().map(|r| r.record_id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b"]);
    }

    #[test]
    fn settings_validation() {
        assert!(RetrievalSettings::new(5, 0.0, 0).is_err());
        assert!(RetrievalSettings::new(2, 0.0, 3).is_err());
        assert!(RetrievalSettings::new(5, 1.5, 3).is_err());
        assert!(RetrievalSettings::new(5, -1.0, 5).is_ok());
        assert_eq!(RetrievalSettings::default(), RetrievalSettings::new(5, 0.0, 3).unwrap());
    }

    #[test]
    fn render_formats_sources_and_images() {
        let mut text = result("t", 0.9);
        text.metadata.chunk_text = Some("Rust ownership rules.".into());
        text.metadata.filename = Some("book.md".into());
        text.metadata.attributes.insert("page".into(), "4".into());

        let mut image = result("i", 0.8);
        image.metadata.modality = Modality::Image;
        image.metadata.label = Some("chart".into());
        image.metadata.image_name = Some("fig1.png".into());

        let context = RetrievalContext::from(vec![text, image]);
        assert_eq!(
            context.render(),
            "[Source 1: book.md, Page 4]\nRust ownership rules.\n\n---\n\n\
             [Source 2: doc.txt]\nImage Type: chart\nImage File: fig1.png"
        );
    }

    #[test]
    fn render_empty_context() {
        let context = RetrievalContext::default();
        assert!(context.is_empty());
        assert_eq!(context.render(), "No relevant documents found.");
    }

    #[tokio::test]
    async fn retrieve_filters_store_results() {
        let store = Arc::new(InMemoryVectorStore::new(2));
        store
            .upsert(vec![
                record("close", vec![1.0, 0.1], Modality::Text),
                record("far", vec![-1.0, 0.0], Modality::Text),
                record("image", vec![1.0, 0.0], Modality::Image),
            ])
            .await
            .unwrap();

        let retriever = Retriever::new(store, RetrievalSettings::new(5, 0.5, 3).unwrap());
        let context = retriever
            .retrieve(&[1.0, 0.0], Some(&[Modality::Text]))
            .await
            .unwrap();
        assert_eq!(context.len(), 1);
        assert_eq!(context.items()[0].record_id, "close");

        let all = retriever.retrieve(&[1.0, 0.0], None).await.unwrap();
        assert_eq!(all.items()[0].record_id, "image");
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn retrieve_surfaces_store_errors() {
        let store = Arc::new(InMemoryVectorStore::new(2));
        let retriever = Retriever::new(store, RetrievalSettings::default());
        let error = retriever.retrieve(&[1.0], None).await.unwrap_err();
        assert!(matches!(
            error,
            RetrievalError::Store(VectorStoreError::DimensionMismatch { .. })
        ));
        assert!(!error.is_transient());
    }
}
