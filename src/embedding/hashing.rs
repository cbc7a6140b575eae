use super::{
    EmbeddingError, EmbeddingVector, ImageEmbeddingProvider, Modality, TextEmbeddingProvider,
    ZeroShotLabel, pick_zero_shot_label, sanitize_labels,
};
use async_trait::async_trait;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Deterministic feature-hashing embedder for offline runs and tests.
///
/// Text is lower-cased and split into alphanumeric tokens; each token lands in a signed
/// bucket, so texts sharing vocabulary score higher under cosine similarity. Image bytes are
/// hashed as overlapping 4-byte shingles into the same space. Output is L2-normalized.
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    /// Construct an embedder emitting vectors of `dimension` components.
    pub const fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn check_dimension(&self) -> Result<(), EmbeddingError> {
        if self.dimension == 0 {
            return Err(EmbeddingError::InvalidResponse(
                "embedding dimension must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    fn encode_text(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0_f32; self.dimension];
        let lowered = text.to_lowercase();
        let mut any_token = false;
        for token in lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|token| !token.is_empty())
        {
            any_token = true;
            self.accumulate(&mut embedding, token.as_bytes());
        }
        if !any_token {
            self.accumulate(&mut embedding, lowered.trim().as_bytes());
        }
        normalize_in_place(&mut embedding);
        embedding
    }

    fn encode_image(&self, image: &[u8]) -> Vec<f32> {
        let mut embedding = vec![0.0_f32; self.dimension];
        if image.len() < 4 {
            self.accumulate(&mut embedding, image);
        } else {
            for shingle in image.windows(4) {
                self.accumulate(&mut embedding, shingle);
            }
        }
        normalize_in_place(&mut embedding);
        embedding
    }

    fn accumulate(&self, embedding: &mut [f32], feature: &[u8]) {
        let hash = fnv1a(feature);
        let bucket = (hash % self.dimension as u64) as usize;
        // Top bit decides the sign to keep collisions from only adding up.
        let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
        embedding[bucket] += sign;
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET, |hash, byte| {
        (hash ^ u64::from(*byte)).wrapping_mul(FNV_PRIME)
    })
}

fn normalize_in_place(values: &mut [f32]) {
    let norm = super::l2_norm(values);
    if norm > 0.0 {
        for value in values.iter_mut() {
            *value /= norm;
        }
    }
}

#[async_trait]
impl TextEmbeddingProvider for HashingEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_texts(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<EmbeddingVector>, EmbeddingError> {
        self.check_dimension()?;
        if texts.is_empty() || texts.iter().any(|text| text.trim().is_empty()) {
            return Err(EmbeddingError::EmptyInput);
        }
        tracing::trace!(inputs = texts.len(), dimension = self.dimension, "Hashing text embeddings");
        Ok(texts
            .iter()
            .map(|text| EmbeddingVector::new(self.encode_text(text), Modality::Text))
            .collect())
    }
}

#[async_trait]
impl ImageEmbeddingProvider for HashingEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_image(&self, image: &[u8]) -> Result<EmbeddingVector, EmbeddingError> {
        self.check_dimension()?;
        if image.is_empty() {
            return Err(EmbeddingError::EmptyInput);
        }
        Ok(EmbeddingVector::new(self.encode_image(image), Modality::Image))
    }

    async fn classify_zero_shot(
        &self,
        image: &[u8],
        labels: &[String],
    ) -> Result<ZeroShotLabel, EmbeddingError> {
        let labels = sanitize_labels(labels);
        if labels.is_empty() {
            return Err(EmbeddingError::EmptyInput);
        }
        let image_vector = self.embed_image(image).await?;
        let label_vectors = self.embed_texts(labels.clone()).await?;
        pick_zero_shot_label(&image_vector, &labels, &label_vectors)
    }
}
