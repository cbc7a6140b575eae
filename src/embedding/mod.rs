//! Embedding abstractions shared by the text and image providers.
//!
//! Both capabilities map content into the same fixed-dimension space so that a single
//! vector namespace can answer cross-modal queries. Adapters:
//!
//! - [`OllamaTextEmbedder`] calls a local Ollama runtime (`/api/embed`).
//! - [`ClipImageEmbedder`] calls a CLIP embedding service for images and zero-shot labels.
//! - [`HashingEmbedder`] is a deterministic offline provider implementing both capabilities.

mod clip;
mod hashing;
mod ollama;

pub use clip::ClipImageEmbedder;
pub use hashing::HashingEmbedder;
pub use ollama::OllamaTextEmbedder;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// CLIP logit scale applied before the zero-shot softmax.
const ZERO_SHOT_LOGIT_SCALE: f32 = 100.0;

/// Errors raised by embedding providers.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// Caller supplied blank text, empty image bytes, or an empty label set.
    #[error("cannot embed empty input")]
    EmptyInput,
    /// Upstream provider failed (timeout, unreachable, non-success status).
    #[error("embedding service error: {0}")]
    Service(String),
    /// Provider answered but the body could not be interpreted.
    #[error("malformed embedding response: {0}")]
    InvalidResponse(String),
    /// Provider produced a vector of the wrong length for the configured index.
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimension configured for the deployment.
        expected: usize,
        /// Dimension returned by the provider.
        actual: usize,
    },
}

impl EmbeddingError {
    /// Whether the failure may succeed on retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Service(_))
    }
}

/// Content modality of a stored or query vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    /// Vector derived from a text chunk or text query.
    Text,
    /// Vector derived from image bytes.
    Image,
}

impl Modality {
    /// Payload representation used by the vector store.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
        }
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Modality {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "image" => Ok(Self::Image),
            _ => Err(()),
        }
    }
}

/// Fixed-length embedding tagged with the modality that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingVector {
    values: Vec<f32>,
    modality: Modality,
}

impl EmbeddingVector {
    /// Wrap raw provider output.
    pub fn new(values: Vec<f32>, modality: Modality) -> Self {
        Self { values, modality }
    }

    /// Number of components.
    pub fn dimension(&self) -> usize {
        self.values.len()
    }

    /// Modality that produced the vector.
    pub fn modality(&self) -> Modality {
        self.modality
    }

    /// Borrow the raw components.
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Consume the vector, returning its components.
    pub fn into_values(self) -> Vec<f32> {
        self.values
    }

    /// Euclidean norm.
    pub fn norm(&self) -> f32 {
        l2_norm(&self.values)
    }

    /// Fail with [`EmbeddingError::DimensionMismatch`] unless the vector has `expected` components.
    pub fn ensure_dimension(&self, expected: usize) -> Result<(), EmbeddingError> {
        if self.dimension() == expected {
            Ok(())
        } else {
            Err(EmbeddingError::DimensionMismatch {
                expected,
                actual: self.dimension(),
            })
        }
    }
}

/// Best zero-shot label for an image together with its softmax confidence.
#[derive(Debug, Clone, PartialEq)]
pub struct ZeroShotLabel {
    /// Winning candidate label.
    pub label: String,
    /// Softmax probability of the winning label across all candidates.
    pub confidence: f32,
}

/// Text embedding capability.
#[async_trait]
pub trait TextEmbeddingProvider: Send + Sync {
    /// Dimension of every vector this provider emits.
    fn dimension(&self) -> usize;

    /// Embed a batch of texts, returning one vector per input in order.
    async fn embed_texts(&self, texts: Vec<String>)
    -> Result<Vec<EmbeddingVector>, EmbeddingError>;

    /// Embed a single text.
    async fn embed_text(&self, text: &str) -> Result<EmbeddingVector, EmbeddingError> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::EmptyInput);
        }
        let mut vectors = self.embed_texts(vec![text.to_string()]).await?;
        vectors.pop().ok_or_else(|| {
            EmbeddingError::InvalidResponse("provider returned no vectors".to_string())
        })
    }
}

/// Image embedding capability with zero-shot labeling.
#[async_trait]
pub trait ImageEmbeddingProvider: Send + Sync {
    /// Dimension of every vector this provider emits.
    fn dimension(&self) -> usize;

    /// Embed raw image bytes.
    async fn embed_image(&self, image: &[u8]) -> Result<EmbeddingVector, EmbeddingError>;

    /// Classify an image against an open label set.
    async fn classify_zero_shot(
        &self,
        image: &[u8],
        labels: &[String],
    ) -> Result<ZeroShotLabel, EmbeddingError>;
}

/// Euclidean norm of a slice.
pub fn l2_norm(values: &[f32]) -> f32 {
    values.iter().map(|value| value * value).sum::<f32>().sqrt()
}

/// Cosine similarity between two slices, `None` for mismatched lengths or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }

    let mut dot = 0.0_f64;
    let mut norm_a = 0.0_f64;
    let mut norm_b = 0.0_f64;
    for (&x, &y) in a.iter().zip(b.iter()) {
        let x = f64::from(x);
        let y = f64::from(y);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom <= f64::EPSILON {
        return None;
    }
    Some((dot / denom) as f32)
}

/// Pick the label whose embedding is closest to the image embedding.
///
/// Confidence is the softmax over CLIP-scaled cosine similarities. `labels` and
/// `label_vectors` are parallel slices.
pub(crate) fn pick_zero_shot_label(
    image: &EmbeddingVector,
    labels: &[String],
    label_vectors: &[EmbeddingVector],
) -> Result<ZeroShotLabel, EmbeddingError> {
    if labels.is_empty() {
        return Err(EmbeddingError::EmptyInput);
    }
    if labels.len() != label_vectors.len() {
        return Err(EmbeddingError::InvalidResponse(format!(
            "expected {} label vectors, got {}",
            labels.len(),
            label_vectors.len()
        )));
    }

    let logits: Vec<f32> = label_vectors
        .iter()
        .map(|vector| {
            cosine_similarity(image.values(), vector.values()).unwrap_or(0.0)
                * ZERO_SHOT_LOGIT_SCALE
        })
        .collect();

    let (best_index, best_logit) = logits
        .iter()
        .copied()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |best, (idx, logit)| {
            if logit > best.1 { (idx, logit) } else { best }
        });

    let partition: f32 = logits.iter().map(|logit| (logit - best_logit).exp()).sum();

    Ok(ZeroShotLabel {
        label: labels[best_index].clone(),
        confidence: 1.0 / partition,
    })
}

/// Drop blank labels and duplicates, keeping first-seen order.
pub(crate) fn sanitize_labels(labels: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    labels
        .iter()
        .map(|label| label.trim())
        .filter(|label| !label.is_empty())
        .filter(|label| seen.insert(label.to_lowercase()))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_similarity_of_identical_vectors_is_one() {
        let score = cosine_similarity(&[0.3, 0.4], &[0.3, 0.4]).expect("score");
        assert!((score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_similarity_rejects_mismatched_lengths() {
        assert!(cosine_similarity(&[1.0], &[1.0, 0.0]).is_none());
        assert!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]).is_none());
    }

    #[test]
    fn ensure_dimension_reports_mismatch() {
        let vector = EmbeddingVector::new(vec![1.0, 2.0, 3.0], Modality::Text);
        assert!(vector.ensure_dimension(3).is_ok());
        let error = vector.ensure_dimension(4).unwrap_err();
        assert!(matches!(
            error,
            EmbeddingError::DimensionMismatch {
                expected: 4,
                actual: 3
            }
        ));
    }

    #[test]
    fn zero_shot_prefers_closest_label() {
        let image = EmbeddingVector::new(vec![1.0, 0.0], Modality::Image);
        let labels = vec!["chart".to_string(), "photograph".to_string()];
        let vectors = vec![
            EmbeddingVector::new(vec![0.0, 1.0], Modality::Text),
            EmbeddingVector::new(vec![0.9, 0.1], Modality::Text),
        ];
        let picked = pick_zero_shot_label(&image, &labels, &vectors).expect("label");
        assert_eq!(picked.label, "photograph");
        assert!(picked.confidence > 0.5 && picked.confidence <= 1.0);
    }

    #[test]
    fn zero_shot_requires_labels() {
        let image = EmbeddingVector::new(vec![1.0], Modality::Image);
        let error = pick_zero_shot_label(&image, &[], &[]).unwrap_err();
        assert!(matches!(error, EmbeddingError::EmptyInput));
    }

    #[test]
    fn sanitize_labels_trims_and_dedupes() {
        let labels = sanitize_labels(&[
            " chart ".to_string(),
            "Chart".to_string(),
            String::new(),
            "plot".to_string(),
        ]);
        assert_eq!(labels, vec!["chart".to_string(), "plot".to_string()]);
    }

    #[test]
    fn modality_parses_case_insensitively() {
        assert_eq!("Image".parse::<Modality>(), Ok(Modality::Image));
        assert_eq!(" text".parse::<Modality>(), Ok(Modality::Text));
        assert!("audio".parse::<Modality>().is_err());
    }

    #[test]
    fn transient_classification() {
        assert!(EmbeddingError::Service("timeout".into()).is_transient());
        assert!(!EmbeddingError::EmptyInput.is_transient());
    }
}
