//! Settings and wire types used by the Qdrant adapter.

use serde::Deserialize;
use serde_json::{Map, Value};
use std::time::Duration;

/// Connection settings for a Qdrant collection.
#[derive(Debug, Clone)]
pub struct QdrantSettings {
    /// Base URL of the Qdrant HTTP API.
    pub url: String,
    /// Collection used as the vector namespace.
    pub collection: String,
    /// Optional API key sent as the `api-key` header.
    pub api_key: Option<String>,
    /// Vector dimension of the collection.
    pub dimension: usize,
    /// Per-request timeout.
    pub timeout: Duration,
}

/// Scored payload returned by Qdrant queries.
#[derive(Debug, Clone)]
pub(crate) struct ScoredPoint {
    pub(crate) id: String,
    pub(crate) score: f32,
    pub(crate) payload: Option<Map<String, Value>>,
}

#[derive(Deserialize)]
pub(crate) struct QueryResponse {
    pub(crate) result: QueryResponseResult,
}

#[derive(Deserialize)]
#[serde(untagged)]
pub(crate) enum QueryResponseResult {
    Points(Vec<QueryPoint>),
    Object {
        #[serde(default)]
        points: Vec<QueryPoint>,
    },
}

#[derive(Deserialize)]
pub(crate) struct QueryPoint {
    pub(crate) id: Value,
    pub(crate) score: f32,
    #[serde(default)]
    pub(crate) payload: Option<Map<String, Value>>,
}

#[derive(Deserialize)]
pub(crate) struct ScrollResponse {
    pub(crate) result: ScrollResult,
}

#[derive(Deserialize)]
pub(crate) struct ScrollResult {
    #[serde(default)]
    pub(crate) points: Vec<ScrollPoint>,
    #[serde(default)]
    pub(crate) next_page_offset: Option<Value>,
}

#[derive(Deserialize)]
pub(crate) struct ScrollPoint {
    #[serde(default)]
    pub(crate) payload: Option<Map<String, Value>>,
}
