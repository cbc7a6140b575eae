//! Cross-modal query fusion.
//!
//! A text vector and an image vector living in the same space are combined by element-wise
//! averaging followed by L2 normalization. A single vector is normalized and passed through.

use crate::embedding::{EmbeddingVector, Modality, l2_norm};
use thiserror::Error;

/// Norm below which a vector is treated as degenerate.
pub const DEGENERATE_NORM_EPSILON: f32 = 1e-6;

/// Errors raised while fusing query vectors.
#[derive(Debug, Error, PartialEq)]
pub enum FusionError {
    /// Neither a text nor an image vector was supplied.
    #[error("fusion requires at least one input vector")]
    InvalidInput,
    /// The two inputs live in spaces of different dimension.
    #[error("cannot fuse vectors of different dimension: text {text}, image {image}")]
    DimensionMismatch {
        /// Dimension of the text vector.
        text: usize,
        /// Dimension of the image vector.
        image: usize,
    },
    /// The vector to normalize has (near-)zero length.
    #[error("degenerate vector: norm {norm} is too small to normalize")]
    DegenerateVector {
        /// Norm observed before normalization.
        norm: f32,
    },
}

/// Normalized query vector produced for a single query. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct FusedQueryVector {
    values: Vec<f32>,
    components: Vec<Modality>,
}

impl FusedQueryVector {
    /// Unit-length query components.
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Number of components.
    pub fn dimension(&self) -> usize {
        self.values.len()
    }

    /// Modalities that contributed to this vector.
    pub fn components(&self) -> &[Modality] {
        &self.components
    }

    /// Whether both modalities were combined.
    pub fn is_multimodal(&self) -> bool {
        self.components.len() > 1
    }
}

/// Fuse an optional text vector with an optional image vector.
pub fn fuse(
    text: Option<&EmbeddingVector>,
    image: Option<&EmbeddingVector>,
) -> Result<FusedQueryVector, FusionError> {
    match (text, image) {
        (None, None) => Err(FusionError::InvalidInput),
        (Some(single), None) | (None, Some(single)) => Ok(FusedQueryVector {
            values: l2_normalize(single.values())?,
            components: vec![single.modality()],
        }),
        (Some(text), Some(image)) => {
            if text.dimension() != image.dimension() {
                return Err(FusionError::DimensionMismatch {
                    text: text.dimension(),
                    image: image.dimension(),
                });
            }
            let average: Vec<f32> = text
                .values()
                .iter()
                .zip(image.values())
                .map(|(a, b)| (a + b) / 2.0)
                .collect();
            let values = l2_normalize(&average)?;
            tracing::debug!(dimension = values.len(), "Fused text and image query vectors");
            Ok(FusedQueryVector {
                values,
                components: vec![text.modality(), image.modality()],
            })
        }
    }
}

/// Scale `values` to unit Euclidean length.
pub fn l2_normalize(values: &[f32]) -> Result<Vec<f32>, FusionError> {
    let norm = l2_norm(values);
    if !norm.is_finite() || norm < DEGENERATE_NORM_EPSILON {
        return Err(FusionError::DegenerateVector { norm });
    }
    Ok(values.iter().map(|value| value / norm).collect())
}
