//! Helpers for constructing and decoding Qdrant payloads.

use crate::embedding::Modality;
use crate::store::{RecordMetadata, content_hash};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use time::OffsetDateTime;

/// Payload key holding the upsert time used for recency tie-breaks.
pub(crate) const UPSERTED_AT_KEY: &str = "upserted_at";

/// Build the payload stored alongside a vector.
pub(crate) fn build_payload(metadata: &RecordMetadata, upserted_at: u64) -> Value {
    let mut payload = match serde_json::to_value(metadata) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    };
    payload.insert(UPSERTED_AT_KEY.into(), Value::from(upserted_at));
    if let Some(text) = metadata.chunk_text.as_deref() {
        payload.insert("chunk_hash".into(), Value::String(content_hash(text)));
    }
    Value::Object(payload)
}

/// Decode stored metadata, tolerating missing or malformed optional fields.
pub(crate) fn metadata_from_payload(payload: &Map<String, Value>) -> RecordMetadata {
    RecordMetadata {
        source: string_field(payload, "source").unwrap_or_default(),
        modality: string_field(payload, "modality")
            .and_then(|value| value.parse().ok())
            .unwrap_or(Modality::Text),
        timestamp: string_field(payload, "timestamp").unwrap_or_default(),
        document_id: string_field(payload, "document_id").unwrap_or_default(),
        sequence_index: payload
            .get("sequence_index")
            .and_then(Value::as_u64)
            .and_then(|value| usize::try_from(value).ok())
            .unwrap_or_default(),
        label: string_field(payload, "label"),
        label_confidence: payload
            .get("label_confidence")
            .and_then(Value::as_f64)
            .map(|value| value as f32),
        chunk_text: string_field(payload, "chunk_text"),
        filename: string_field(payload, "filename"),
        image_name: string_field(payload, "image_name"),
        attributes: match payload.get("attributes") {
            Some(Value::Object(map)) => map
                .iter()
                .filter_map(|(key, value)| value.as_str().map(|v| (key.clone(), v.to_string())))
                .collect(),
            _ => BTreeMap::new(),
        },
    }
}

/// Recency key stored in a payload, `0` when absent.
pub(crate) fn upserted_at(payload: Option<&Map<String, Value>>) -> u64 {
    payload
        .and_then(|map| map.get(UPSERTED_AT_KEY))
        .and_then(Value::as_u64)
        .unwrap_or_default()
}

fn string_field(payload: &Map<String, Value>, key: &str) -> Option<String> {
    match payload.get(key) {
        Some(Value::String(value)) if !value.trim().is_empty() => Some(value.clone()),
        _ => None,
    }
}

/// Current timestamp formatted for payload storage.
pub fn current_timestamp_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

/// Microseconds since the Unix epoch.
pub(crate) fn current_micros() -> u64 {
    let nanos = OffsetDateTime::now_utc().unix_timestamp_nanos();
    u64::try_from(nanos / 1_000).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_metadata() -> RecordMetadata {
        let mut attributes = BTreeMap::new();
        attributes.insert("page".to_string(), "3".to_string());
        RecordMetadata {
            source: "docs/manual.pdf".into(),
            modality: Modality::Image,
            timestamp: "2025-01-01T00:00:00Z".into(),
            document_id: "abc".into(),
            sequence_index: 2,
            label: Some("chart".into()),
            label_confidence: Some(0.5),
            chunk_text: None,
            filename: Some("manual.pdf".into()),
            image_name: Some("p3.png".into()),
            attributes,
        }
    }

    #[test]
    fn payload_round_trips_metadata() {
        let metadata = sample_metadata();
        let payload = build_payload(&metadata, 42);
        let map = payload.as_object().expect("object");
        assert_eq!(map["modality"], "image");
        assert_eq!(map[UPSERTED_AT_KEY], 42);
        assert!(!map.contains_key("chunk_text"));
        assert_eq!(metadata_from_payload(map), metadata);
        assert_eq!(upserted_at(Some(map)), 42);
    }

    #[test]
    fn text_payload_carries_chunk_hash() {
        let mut metadata = sample_metadata();
        metadata.modality = Modality::Text;
        metadata.chunk_text = Some("hello".into());
        let payload = build_payload(&metadata, 1);
        assert_eq!(payload["chunk_hash"], content_hash("hello"));
        assert_eq!(payload["chunk_text"], "hello");
    }

    #[test]
    fn sparse_payload_falls_back_to_defaults() {
        let mut map = Map::new();
        map.insert("source".into(), Value::String("a.txt".into()));
        map.insert("modality".into(), Value::String("bogus".into()));
        let metadata = metadata_from_payload(&map);
        assert_eq!(metadata.source, "a.txt");
        assert_eq!(metadata.modality, Modality::Text);
        assert!(metadata.label.is_none());
        assert_eq!(upserted_at(None), 0);
    }

    #[test]
    fn timestamp_is_rfc3339_like() {
        let ts = current_timestamp_rfc3339();
        assert!(ts.contains('T') && ts.ends_with('Z'));
        assert!(current_micros() > 0);
    }
}
