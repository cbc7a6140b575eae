//! CLIP embedding service adapter for images and zero-shot labels.
//!
//! The service exposes the image and text towers of one CLIP model so that label prompts land in
//! the same space as the image vectors:
//!
//! - `POST {base}/embed/image` with `{ "model", "image": <base64> }` → `{ "embedding": [..] }`
//! - `POST {base}/embed/text` with `{ "model", "input": [..] }` → `{ "embeddings": [[..]] }`

use super::{
    EmbeddingError, EmbeddingVector, ImageEmbeddingProvider, Modality, ZeroShotLabel,
    pick_zero_shot_label, sanitize_labels,
};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::time::Duration;

/// HTTP client for a CLIP embedding service.
pub struct ClipImageEmbedder {
    http: Client,
    base_url: String,
    model: String,
    dimension: usize,
}

#[derive(Debug, Deserialize)]
struct ImageEmbedResponse {
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct TextEmbedResponse {
    #[serde(default)]
    embeddings: Vec<Vec<f32>>,
}

impl ClipImageEmbedder {
    /// Build a client with a per-request timeout.
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        dimension: usize,
        timeout: Duration,
    ) -> Result<Self, EmbeddingError> {
        let http = Client::builder()
            .user_agent("mmrag/clip")
            .timeout(timeout)
            .build()
            .map_err(|error| EmbeddingError::Service(format!("failed to build client: {error}")))?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            model: model.into(),
            dimension,
        })
    }

    async fn post<T: DeserializeOwned>(&self, path: &str, body: Value) -> Result<T, EmbeddingError> {
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), path);
        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|error| {
                EmbeddingError::Service(format!("failed to reach CLIP service at {url}: {error}"))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::Service(format!(
                "CLIP service returned {status}: {body}"
            )));
        }

        response.json().await.map_err(|error| {
            EmbeddingError::InvalidResponse(format!("failed to decode CLIP response: {error}"))
        })
    }

    async fn embed_labels(&self, labels: &[String]) -> Result<Vec<EmbeddingVector>, EmbeddingError> {
        let body: TextEmbedResponse = self
            .post(
                "embed/text",
                json!({
                    "model": self.model,
                    "input": labels,
                }),
            )
            .await?;
        Ok(body
            .embeddings
            .into_iter()
            .map(|values| EmbeddingVector::new(values, Modality::Text))
            .collect())
    }
}

#[async_trait]
impl ImageEmbeddingProvider for ClipImageEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_image(&self, image: &[u8]) -> Result<EmbeddingVector, EmbeddingError> {
        if image.is_empty() {
            return Err(EmbeddingError::EmptyInput);
        }
        tracing::debug!(model = %self.model, bytes = image.len(), "Requesting CLIP image embedding");
        let body: ImageEmbedResponse = self
            .post(
                "embed/image",
                json!({
                    "model": self.model,
                    "image": STANDARD.encode(image),
                }),
            )
            .await?;
        Ok(EmbeddingVector::new(body.embedding, Modality::Image))
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
        let label_vectors = self.embed_labels(&labels).await?;
        pick_zero_shot_label(&image_vector, &labels, &label_vectors)
    }
}
