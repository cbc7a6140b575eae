//! Filter helpers for Qdrant queries and payload accumulation.

use std::collections::BTreeSet;

use serde_json::{Map, Value, json};

use crate::embedding::Modality;

/// Compose the query filter restricting results to the given modalities.
pub(crate) fn build_modality_filter(modalities: Option<&[Modality]>) -> Option<Value> {
    let modalities = modalities?;
    if modalities.is_empty() {
        return None;
    }
    let values: Vec<&str> = modalities.iter().map(|modality| modality.as_str()).collect();
    Some(json!({
        "must": [
            {
                "key": "modality",
                "match": { "any": values }
            }
        ]
    }))
}

/// Filter matching every point ingested from `source`.
pub(crate) fn build_source_filter(source: &str) -> Value {
    json!({
        "must": [
            {
                "key": "source",
                "match": { "value": source }
            }
        ]
    })
}

/// Accumulate source identifiers from Qdrant payloads.
pub(crate) fn accumulate_source(payload: &Map<String, Value>, sources: &mut BTreeSet<String>) {
    if let Some(Value::String(source)) = payload.get("source") {
        let trimmed = source.trim();
        if !trimmed.is_empty() {
            sources.insert(trimmed.to_string());
        }
    }
}
