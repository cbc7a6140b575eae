//! Streaming helpers for iterating Qdrant scroll endpoints without manual loops.

use async_stream::try_stream;
use futures_core::Stream;
use reqwest::Method;
use serde_json::{Map, Value, json};

use super::client::{QdrantStore, status_error};
use super::types::ScrollResponse;
use crate::store::VectorStoreError;

const DEFAULT_SCROLL_LIMIT: usize = 512;

/// Stream payloads of the store's collection using the scroll API.
pub(crate) fn stream_payloads<'a>(
    store: &'a QdrantStore,
    with_payload: Value,
    filter: Option<Value>,
) -> impl Stream<Item = Result<Map<String, Value>, VectorStoreError>> + 'a {
    try_stream! {
        let mut offset: Option<Value> = None;
        let filter_body = filter.unwrap_or_else(|| json!({ "must": [] }));

        loop {
            let body = json!({
                "with_payload": with_payload.clone(),
                "with_vector": false,
                "limit": DEFAULT_SCROLL_LIMIT,
                "filter": filter_body.clone(),
                "offset": offset.clone().unwrap_or(Value::Null),
            });

            let response = store
                .collection_request(Method::POST, "points/scroll")
                .json(&body)
                .send()
                .await?;

            let status = response.status();
            if status.is_success() {
                let ScrollResponse { result } = response.json().await?;
                for point in result.points {
                    if let Some(payload) = point.payload {
                        yield payload;
                    }
                }

                match result.next_page_offset {
                    Some(Value::Null) | None => break,
                    Some(next) => offset = Some(next),
                }
            } else {
                let body = response.text().await.unwrap_or_default();
                tracing::error!(collection = store.collection(), status = %status, "Failed to scroll payloads");
                Err(status_error(status, body))?;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::qdrant::QdrantSettings;
    use futures_util::{pin_mut, stream::StreamExt};
    use httpmock::{Method::POST, MockServer};
    use std::time::Duration;

    fn store_for(server: &MockServer) -> QdrantStore {
        QdrantStore::new(QdrantSettings {
            url: server.base_url(),
            collection: "demo".into(),
            api_key: None,
            dimension: 2,
            timeout: Duration::from_secs(5),
        })
        .expect("store")
    }

    #[tokio::test]
    async fn stream_payloads_collects_multiple_pages() {
        let server = MockServer::start_async().await;
        let store = store_for(&server);

        let first = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/collections/demo/points/scroll")
                    .body_contains("\"offset\":null");
                then.status(200).json_body(json!({
                    "result": {
                        "points": [
                            { "payload": { "source": "a.txt" } },
                            { "id": "no-payload" }
                        ],
                        "next_page_offset": "cursor-1"
                    }
                }));
            })
            .await;

        let second = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/collections/demo/points/scroll")
                    .body_contains("\"offset\":\"cursor-1\"");
                then.status(200).json_body(json!({
                    "result": {
                        "points": [
                            { "payload": { "source": "b.txt" } }
                        ],
                        "next_page_offset": null
                    }
                }));
            })
            .await;

        let stream = stream_payloads(&store, json!(["source"]), None);
        pin_mut!(stream);
        let mut items = Vec::new();
        while let Some(item) = stream.next().await {
            items.push(item.expect("payload"));
        }

        first.assert();
        second.assert();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].get("source").and_then(Value::as_str), Some("a.txt"));
        assert_eq!(items[1].get("source").and_then(Value::as_str), Some("b.txt"));
    }

    #[tokio::test]
    async fn stream_surfaces_server_errors_as_transient() {
        let server = MockServer::start_async().await;
        let store = store_for(&server);

        server
            .mock_async(|when, then| {
                when.method(POST).path("/collections/demo/points/scroll");
                then.status(503).body("overloaded");
            })
            .await;

        let stream = stream_payloads(&store, json!(["source"]), None);
        pin_mut!(stream);
        let error = stream
            .next()
            .await
            .expect("item")
            .expect_err("should fail");
        assert!(error.is_transient());
    }
}
