//! HTTP client implementing [`VectorStore`] on top of a Qdrant collection.

use crate::embedding::Modality;
use crate::qdrant::{
    filters::{accumulate_source, build_modality_filter, build_source_filter},
    payload::{build_payload, current_micros, metadata_from_payload, upserted_at},
    scroller::stream_payloads,
    types::{QdrantSettings, QueryResponse, QueryResponseResult, ScoredPoint},
};
use crate::store::{
    QueryResult, RankedCandidate, UpsertSummary, VectorRecord, VectorStore, VectorStoreError,
    normalize_filter, partition_by_dimension, rank_candidates, validate_query,
};
use async_trait::async_trait;
use futures_util::{pin_mut, stream::StreamExt};
use reqwest::{Client, Method, StatusCode};
use serde_json::{Value, json};
use std::collections::BTreeSet;

/// Payload fields indexed for filtering.
const PAYLOAD_INDEXES: [(&str, &str); 4] = [
    ("modality", "keyword"),
    ("source", "keyword"),
    ("document_id", "keyword"),
    ("timestamp", "datetime"),
];

/// Qdrant-backed vector store using cosine distance.
pub struct QdrantStore {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    collection: String,
    dimension: usize,
}

impl QdrantStore {
    /// Build a store for the configured collection. No request is issued until first use.
    pub fn new(settings: QdrantSettings) -> Result<Self, VectorStoreError> {
        let client = Client::builder()
            .user_agent("mmrag/0.1")
            .timeout(settings.timeout)
            .build()?;

        let base_url = normalize_base_url(&settings.url).map_err(VectorStoreError::InvalidUrl)?;
        tracing::debug!(
            url = %base_url,
            collection = %settings.collection,
            dimension = settings.dimension,
            has_api_key = %settings
                .api_key
                .as_deref()
                .map(|value| !value.is_empty())
                .unwrap_or(false),
            "Initialized Qdrant HTTP client"
        );

        Ok(Self {
            client,
            base_url,
            api_key: settings.api_key,
            collection: settings.collection,
            dimension: settings.dimension,
        })
    }

    /// Name of the backing collection.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Create the collection with cosine distance and the configured vector size.
    async fn create_collection(&self) -> Result<(), VectorStoreError> {
        let body = json!({
            "vectors": {
                "size": self.dimension,
                "distance": "Cosine"
            }
        });

        let response = self
            .collection_request(Method::PUT, "")
            .json(&body)
            .send()
            .await?;

        self.ensure_success(response, || {
            tracing::info!(collection = %self.collection, dimension = self.dimension, "Collection created");
        })
        .await
    }

    /// Vector size of the existing collection, or `None` when it is missing.
    async fn existing_vector_size(&self) -> Result<Option<Option<usize>>, VectorStoreError> {
        let response = self.collection_request(Method::GET, "").send().await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let body: Value = response.json().await?;
                let size = body
                    .pointer("/result/config/params/vectors/size")
                    .and_then(Value::as_u64)
                    .and_then(|value| usize::try_from(value).ok());
                Ok(Some(size))
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                let error = status_error(status, body);
                tracing::error!(collection = %self.collection, error = %error, "Collection lookup failed");
                Err(error)
            }
        }
    }

    /// Ensure payload indexes exist for filtered fields. Index failures only warn.
    async fn ensure_payload_indexes(&self) -> Result<(), VectorStoreError> {
        for (field, schema) in PAYLOAD_INDEXES {
            let body = json!({
                "field_name": field,
                "field_schema": schema,
            });

            let response = self
                .collection_request(Method::PUT, "index")
                .json(&body)
                .send()
                .await?;

            let status = response.status();
            if status.is_success() || status == StatusCode::CONFLICT {
                tracing::debug!(collection = %self.collection, field, schema, "Payload index ensured");
            } else {
                let body = response.text().await.unwrap_or_default();
                let error = status_error(status, body);
                tracing::warn!(collection = %self.collection, field, schema, error = %error, "Failed to ensure payload index");
            }
        }

        Ok(())
    }

    async fn search_points(
        &self,
        vector: &[f32],
        limit: usize,
        filter: Option<Value>,
    ) -> Result<Vec<ScoredPoint>, VectorStoreError> {
        let mut body = json!({
            "query": vector,
            "limit": limit,
            "with_payload": true,
        });
        if let (Some(filter_value), Some(obj)) = (filter, body.as_object_mut()) {
            obj.insert("filter".into(), filter_value);
        }

        let response = self
            .collection_request(Method::POST, "points/query")
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = status_error(status, body);
            tracing::error!(collection = %self.collection, error = %error, "Qdrant search failed");
            return Err(error);
        }

        let payload: QueryResponse = response.json().await?;
        let points = match payload.result {
            QueryResponseResult::Points(points) => points,
            QueryResponseResult::Object { points } => points,
        };
        Ok(points
            .into_iter()
            .map(|point| ScoredPoint {
                id: stringify_point_id(point.id),
                score: point.score,
                payload: point.payload,
            })
            .collect())
    }

    pub(crate) fn collection_request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let endpoint = if path.is_empty() {
            format!("collections/{}", self.collection)
        } else {
            format!("collections/{}/{path}", self.collection)
        };
        let url = format_endpoint(&self.base_url, &endpoint);
        let mut req = self.client.request(method, url);
        if let Some(api_key) = &self.api_key
            && !api_key.is_empty()
        {
            req = req.header("api-key", api_key);
        }
        req
    }

    async fn ensure_success<F>(
        &self,
        response: reqwest::Response,
        on_success: F,
    ) -> Result<(), VectorStoreError>
    where
        F: FnOnce(),
    {
        if response.status().is_success() {
            on_success();
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = status_error(status, body);
            tracing::error!(collection = %self.collection, error = %error, "Qdrant request failed");
            Err(error)
        }
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn ensure_ready(&self) -> Result<(), VectorStoreError> {
        match self.existing_vector_size().await? {
            None => self.create_collection().await?,
            Some(Some(size)) if size != self.dimension => {
                return Err(VectorStoreError::DimensionMismatch {
                    expected: self.dimension,
                    actual: size,
                });
            }
            Some(_) => {
                tracing::debug!(collection = %self.collection, "Collection already exists");
            }
        }
        self.ensure_payload_indexes().await
    }

    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<UpsertSummary, VectorStoreError> {
        let (accepted, rejected) = partition_by_dimension(self.dimension, records);
        if accepted.is_empty() {
            return Ok(UpsertSummary {
                upserted: 0,
                rejected,
            });
        }

        let now = current_micros();
        let points: Vec<Value> = accepted
            .iter()
            .map(|record| {
                json!({
                    "id": record.id,
                    "vector": record.vector.values(),
                    "payload": build_payload(&record.metadata, now),
                })
            })
            .collect();

        let upserted = points.len();
        let response = self
            .collection_request(Method::PUT, "points")
            .query(&[("wait", true)])
            .json(&json!({ "points": points }))
            .send()
            .await?;

        self.ensure_success(response, || {
            tracing::debug!(collection = %self.collection, points = upserted, "Points upserted");
        })
        .await?;

        Ok(UpsertSummary { upserted, rejected })
    }

    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        modality_filter: Option<&[Modality]>,
    ) -> Result<Vec<QueryResult>, VectorStoreError> {
        validate_query(self.dimension, vector, top_k)?;
        let filter = normalize_filter(modality_filter);
        let filter = build_modality_filter(filter.as_deref());

        // Widen the page until no unseen point can tie the score at the cutoff.
        let mut limit = top_k.saturating_mul(2);
        let points = loop {
            let points = self.search_points(vector, limit, filter.clone()).await?;
            if !tie_may_extend_past(&points, top_k, limit) {
                break points;
            }
            tracing::debug!(
                collection = %self.collection,
                limit,
                "Score tie at cutoff; widening query"
            );
            limit = limit.saturating_mul(2);
        };

        let candidates = points
            .into_iter()
            .map(|point| {
                let recency = upserted_at(point.payload.as_ref());
                let metadata = point
                    .payload
                    .as_ref()
                    .map(metadata_from_payload)
                    .unwrap_or_else(|| metadata_from_payload(&Default::default()));
                RankedCandidate {
                    result: QueryResult {
                        record_id: point.id,
                        score: point.score,
                        metadata,
                    },
                    recency,
                }
            })
            .collect();

        Ok(rank_candidates(candidates, top_k))
    }

    async fn delete_source(&self, source: &str) -> Result<(), VectorStoreError> {
        let response = self
            .collection_request(Method::POST, "points/delete")
            .query(&[("wait", true)])
            .json(&json!({ "filter": build_source_filter(source) }))
            .send()
            .await?;

        self.ensure_success(response, || {
            tracing::info!(collection = %self.collection, source, "Deleted points for source");
        })
        .await
    }

    async fn list_sources(&self) -> Result<BTreeSet<String>, VectorStoreError> {
        let stream = stream_payloads(self, json!(["source"]), None);
        pin_mut!(stream);
        let mut sources = BTreeSet::new();
        while let Some(payload) = stream.next().await {
            accumulate_source(&payload?, &mut sources);
        }
        Ok(sources)
    }

    async fn reset(&self) -> Result<(), VectorStoreError> {
        let response = self.collection_request(Method::DELETE, "").send().await?;
        let status = response.status();
        if !status.is_success() && status != StatusCode::NOT_FOUND {
            let body = response.text().await.unwrap_or_default();
            let error = status_error(status, body);
            tracing::error!(collection = %self.collection, error = %error, "Failed to drop collection");
            return Err(error);
        }
        tracing::info!(collection = %self.collection, "Collection dropped");
        self.ensure_ready().await
    }
}

/// Classify a failing HTTP status: auth, throttling and server faults are retryable.
pub(crate) fn status_error(status: StatusCode, body: String) -> VectorStoreError {
    let retryable = status.is_server_error()
        || matches!(
            status,
            StatusCode::UNAUTHORIZED
                | StatusCode::FORBIDDEN
                | StatusCode::REQUEST_TIMEOUT
                | StatusCode::TOO_MANY_REQUESTS
        );
    if retryable {
        VectorStoreError::ServiceUnavailable(format!("{status}: {body}"))
    } else {
        VectorStoreError::UnexpectedStatus { status, body }
    }
}

fn normalize_base_url(url: &str) -> Result<String, String> {
    let mut parsed = reqwest::Url::parse(url).map_err(|err| err.to_string())?;
    let path = parsed.path().trim_end_matches('/').to_string();
    parsed.set_path(&path);
    Ok(parsed.to_string())
}

fn format_endpoint(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    format!("{base}/{path}")
}

/// Whether a full page ends on the score held by the `top_k`-th point, so more ties may follow.
fn tie_may_extend_past(points: &[ScoredPoint], top_k: usize, limit: usize) -> bool {
    if points.len() < limit || limit == usize::MAX {
        return false;
    }
    match (points.get(top_k.saturating_sub(1)), points.last()) {
        (Some(cutoff), Some(last)) => last.score >= cutoff.score,
        _ => false,
    }
}

fn stringify_point_id(id: Value) -> String {
    match id {
        Value::String(text) => text,
        Value::Number(number) => number.to_string(),
        Value::Object(map) => map
            .get("uuid")
            .map(|value| match value {
                Value::String(uuid) => uuid.clone(),
                other => other.to_string(),
            })
            .unwrap_or_else(|| Value::Object(map).to_string()),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
