//! Ollama-backed text embeddings issued directly over HTTP.

use super::{EmbeddingError, EmbeddingVector, Modality, TextEmbeddingProvider};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

/// Text embedding client for the Ollama `/api/embed` endpoint.
pub struct OllamaTextEmbedder {
    http: Client,
    base_url: String,
    model: String,
    dimension: usize,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    #[serde(default)]
    embeddings: Vec<Vec<f32>>,
}

impl OllamaTextEmbedder {
    /// Build a client with a per-request timeout.
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        dimension: usize,
        timeout: Duration,
    ) -> Result<Self, EmbeddingError> {
        let http = Client::builder()
            .user_agent("mmrag/embed")
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

    fn endpoint(&self) -> String {
        format!("{}/api/embed", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl TextEmbeddingProvider for OllamaTextEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_texts(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<EmbeddingVector>, EmbeddingError> {
        if texts.is_empty() || texts.iter().any(|text| text.trim().is_empty()) {
            return Err(EmbeddingError::EmptyInput);
        }

        let expected = texts.len();
        tracing::debug!(model = %self.model, inputs = expected, "Requesting Ollama embeddings");

        let response = self
            .http
            .post(self.endpoint())
            .json(&json!({
                "model": self.model,
                "input": texts,
            }))
            .send()
            .await
            .map_err(|error| {
                EmbeddingError::Service(format!(
                    "failed to reach Ollama at {}: {error}",
                    self.base_url
                ))
            })?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(EmbeddingError::Service(format!(
                "Ollama endpoint {} returned 404 (is model '{}' pulled?)",
                self.endpoint(),
                self.model
            )));
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::Service(format!(
                "Ollama returned {status}: {body}"
            )));
        }

        let body: EmbedResponse = response.json().await.map_err(|error| {
            EmbeddingError::InvalidResponse(format!("failed to decode Ollama response: {error}"))
        })?;

        if body.embeddings.len() != expected {
            return Err(EmbeddingError::InvalidResponse(format!(
                "expected {expected} embeddings, got {}",
                body.embeddings.len()
            )));
        }

        Ok(body
            .embeddings
            .into_iter()
            .map(|values| EmbeddingVector::new(values, Modality::Text))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::POST, MockServer};

    fn client_for(server: &MockServer) -> OllamaTextEmbedder {
        OllamaTextEmbedder::new(
            server.base_url(),
            "nomic-embed-text",
            3,
            Duration::from_secs(5),
        )
        .expect("client")
    }

    #[tokio::test]
    async fn embeds_batch_in_order() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/embed")
                    .json_body_partial(r#"{"model":"nomic-embed-text"}"#);
                then.status(200).json_body(json!({
                    "model": "nomic-embed-text",
                    "embeddings": [[0.1, 0.2, 0.3], [0.4, 0.5, 0.6]]
                }));
            })
            .await;

        let vectors = client_for(&server)
            .embed_texts(vec!["alpha".into(), "beta".into()])
            .await
            .expect("embeddings");

        mock.assert_async().await;
        assert_eq!(vectors.len(), 2);
        assert_eq!(vectors[1].values(), &[0.4, 0.5, 0.6]);
        assert_eq!(vectors[0].modality(), Modality::Text);
    }

    #[tokio::test]
    async fn error_status_maps_to_service_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/embed");
                then.status(503).body("overloaded");
            })
            .await;

        let error = client_for(&server)
            .embed_text("hello")
            .await
            .expect_err("service error");
        assert!(error.is_transient());
        assert!(error.to_string().contains("503"));
    }

    #[tokio::test]
    async fn blank_text_is_rejected_without_request() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/api/embed");
                then.status(200);
            })
            .await;

        let error = client_for(&server).embed_text("   ").await.unwrap_err();
        assert!(matches!(error, EmbeddingError::EmptyInput));
        assert_eq!(mock.hits_async().await, 0);
    }

    #[tokio::test]
    async fn short_response_is_invalid() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/embed");
                then.status(200).json_body(json!({ "embeddings": [[0.1, 0.2, 0.3]] }));
            })
            .await;

        let error = client_for(&server)
            .embed_texts(vec!["a".into(), "b".into()])
            .await
            .unwrap_err();
        assert!(matches!(error, EmbeddingError::InvalidResponse(_)));
    }
}
