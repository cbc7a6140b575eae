use super::{RetrievalContext, RetrievalError, Retriever};
use crate::embedding::{
    EmbeddingError, EmbeddingVector, ImageEmbeddingProvider, Modality, TextEmbeddingProvider,
};
use crate::fusion::{FusedQueryVector, FusionError, fuse};
use std::sync::Arc;
use thiserror::Error;

/// Errors raised while answering a query.
#[derive(Debug, Error)]
pub enum QueryError {
    /// Embedding a query input failed.
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
    /// The query inputs could not be fused.
    #[error(transparent)]
    Fusion(#[from] FusionError),
    /// The store lookup failed.
    #[error(transparent)]
    Retrieval(#[from] RetrievalError),
    /// The query cannot be served with the configured providers.
    #[error("Invalid query: {0}")]
    InvalidInput(String),
}

impl QueryError {
    /// Whether the failure may succeed on retry.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Embedding(error) => error.is_transient(),
            Self::Retrieval(error) => error.is_transient(),
            Self::Fusion(_) | Self::InvalidInput(_) => false,
        }
    }
}

/// Text and/or image query with an optional modality restriction.
#[derive(Debug, Clone, Default)]
pub struct Query {
    /// Query text; blank text is treated as absent.
    pub text: Option<String>,
    /// Encoded query image.
    pub image: Option<Vec<u8>>,
    /// Restrict hits to these modalities.
    pub modalities: Option<Vec<Modality>>,
}

impl Query {
    /// Text-only query.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    /// Image-only query.
    pub fn image(bytes: Vec<u8>) -> Self {
        Self {
            image: Some(bytes),
            ..Self::default()
        }
    }

    /// Restrict hits to the given modalities.
    pub fn with_modalities(mut self, modalities: Vec<Modality>) -> Self {
        self.modalities = Some(modalities);
        self
    }

    fn text_input(&self) -> Option<&str> {
        self.text.as_deref().filter(|text| !text.trim().is_empty())
    }
}

/// Embeds, fuses and retrieves for a [`Query`].
#[derive(Clone)]
pub struct QueryEngine {
    text_embedder: Arc<dyn TextEmbeddingProvider>,
    image_embedder: Option<Arc<dyn ImageEmbeddingProvider>>,
    retriever: Retriever,
}

impl QueryEngine {
    /// Assemble an engine from injected providers and a retriever.
    pub fn new(
        text_embedder: Arc<dyn TextEmbeddingProvider>,
        image_embedder: Option<Arc<dyn ImageEmbeddingProvider>>,
        retriever: Retriever,
    ) -> Self {
        Self {
            text_embedder,
            image_embedder,
            retriever,
        }
    }

    /// Answer a query with ranked context.
    pub async fn run(&self, query: &Query) -> Result<RetrievalContext, QueryError> {
        let text_vector = match query.text_input() {
            Some(text) => Some(self.text_embedder.embed_text(text).await?),
            None => None,
        };

        let image_vector = match (&query.image, &self.image_embedder) {
            (Some(bytes), Some(embedder)) => Some(embedder.embed_image(bytes).await?),
            (Some(_), None) => {
                return Err(QueryError::InvalidInput(
                    "image query requires an image embedding provider".into(),
                ));
            }
            (None, _) => None,
        };

        let fused = fuse_with_fallback(text_vector.as_ref(), image_vector.as_ref())?;
        tracing::info!(
            components = ?fused.components(),
            dimension = fused.dimension(),
            "Running query"
        );

        Ok(self
            .retriever
            .retrieve(fused.values(), query.modalities.as_deref())
            .await?)
    }
}

/// Fuse both inputs; if they cancel out, fall back to text, then image.
fn fuse_with_fallback(
    text: Option<&EmbeddingVector>,
    image: Option<&EmbeddingVector>,
) -> Result<FusedQueryVector, FusionError> {
    match fuse(text, image) {
        Err(error @ FusionError::DegenerateVector { .. }) if text.is_some() && image.is_some() => {
            tracing::warn!(error = %error, "Fused query vector degenerate; falling back to single modality");
            fuse(text, None)
                .or_else(|_| fuse(None, image))
                .map_err(|_| error)
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::RetrievalSettings;
    use crate::store::test_support::record;
    use crate::store::{InMemoryVectorStore, VectorStore};
    use async_trait::async_trait;

    struct FixedText(Vec<f32>);

    #[async_trait]
    impl TextEmbeddingProvider for FixedText {
        fn dimension(&self) -> usize {
            self.0.len()
        }

        async fn embed_texts(
            &self,
            texts: Vec<String>,
        ) -> Result<Vec<EmbeddingVector>, EmbeddingError> {
            Ok(texts
                .iter()
                .map(|_| EmbeddingVector::new(self.0.clone(), Modality::Text))
                .collect())
        }
    }

    struct FixedImage(Vec<f32>);

    #[async_trait]
    impl ImageEmbeddingProvider for FixedImage {
        fn dimension(&self) -> usize {
            self.0.len()
        }

        async fn embed_image(&self, _image: &[u8]) -> Result<EmbeddingVector, EmbeddingError> {
            Ok(EmbeddingVector::new(self.0.clone(), Modality::Image))
        }

        async fn classify_zero_shot(
            &self,
            _image: &[u8],
            _labels: &[String],
        ) -> Result<crate::embedding::ZeroShotLabel, EmbeddingError> {
            Err(EmbeddingError::EmptyInput)
        }
    }

    async fn engine(text: Vec<f32>, image: Option<Vec<f32>>) -> QueryEngine {
        let store = Arc::new(InMemoryVectorStore::new(2));
        store
            .upsert(vec![
                record("east", vec![1.0, 0.0], Modality::Text),
                record("north", vec![0.0, 1.0], Modality::Image),
                record("west", vec![-1.0, 0.0], Modality::Image),
            ])
            .await
            .unwrap();
        let retriever = Retriever::new(store, RetrievalSettings::new(3, 0.0, 3).unwrap());
        QueryEngine::new(
            Arc::new(FixedText(text)),
            image.map(|values| Arc::new(FixedImage(values)) as Arc<dyn ImageEmbeddingProvider>),
            retriever,
        )
    }

    fn ids(context: &RetrievalContext) -> Vec<&str> {
        context
            .items()
            .iter()
            .map(|item| item.record_id.as_str())
            .collect()
    }

    #[tokio::test]
    async fn text_query_ranks_nearest_first() {
        let engine = engine(vec![1.0, 0.0], None).await;
        let context = engine.run(&Query::text("east please")).await.unwrap();
        assert_eq!(ids(&context), vec!["east", "north"]);
    }

    #[tokio::test]
    async fn multimodal_query_uses_fused_direction() {
        let engine = engine(vec![1.0, 0.0], Some(vec![0.0, 1.0])).await;
        let query = Query {
            text: Some("both".into()),
            image: Some(vec![1, 2, 3]),
            modalities: None,
        };
        let context = engine.run(&query).await.unwrap();
        let top = &context.items()[0];
        assert!((top.score - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-5);
        assert_eq!(context.len(), 2);
    }

    #[tokio::test]
    async fn degenerate_fusion_falls_back_to_text() {
        let engine = engine(vec![1.0, 0.0], Some(vec![-1.0, 0.0])).await;
        let query = Query {
            text: Some("east".into()),
            image: Some(vec![9]),
            modalities: None,
        };
        let context = engine.run(&query).await.unwrap();
        assert_eq!(ids(&context)[0], "east");
    }

    #[tokio::test]
    async fn blank_text_counts_as_absent() {
        let engine = engine(vec![1.0, 0.0], Some(vec![0.0, 1.0])).await;
        let query = Query {
            text: Some("   ".into()),
            image: Some(vec![1]),
            modalities: Some(vec![Modality::Image]),
        };
        let context = engine.run(&query).await.unwrap();
        assert_eq!(ids(&context)[0], "north");
        assert!(
            context
                .items()
                .iter()
                .all(|item| item.metadata.modality == Modality::Image)
        );
    }

    #[tokio::test]
    async fn empty_query_is_invalid() {
        let engine = engine(vec![1.0, 0.0], None).await;
        let error = engine.run(&Query::default()).await.unwrap_err();
        assert!(matches!(error, QueryError::Fusion(FusionError::InvalidInput)));
    }

    #[tokio::test]
    async fn image_query_without_provider_is_rejected() {
        let engine = engine(vec![1.0, 0.0], None).await;
        let error = engine.run(&Query::image(vec![1])).await.unwrap_err();
        assert!(matches!(error, QueryError::InvalidInput(_)));
    }
}
