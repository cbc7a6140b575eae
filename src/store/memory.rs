use super::{
    QueryResult, RankedCandidate, UpsertSummary, VectorRecord, VectorStore, VectorStoreError,
    normalize_filter, partition_by_dimension, rank_candidates, validate_query,
};
use crate::embedding::{Modality, cosine_similarity};
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

struct StoredRecord {
    record: VectorRecord,
    revision: u64,
}

/// Brute-force cosine index kept in process memory.
///
/// Suitable for tests and offline runs. Recency for tie-breaking comes from a monotonic
/// revision counter bumped on every write.
pub struct InMemoryVectorStore {
    dimension: usize,
    records: RwLock<HashMap<String, StoredRecord>>,
    revision: AtomicU64,
}

impl InMemoryVectorStore {
    /// Create an empty store for vectors of `dimension` components.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            records: RwLock::new(HashMap::new()),
            revision: AtomicU64::new(0),
        }
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn ensure_ready(&self) -> Result<(), VectorStoreError> {
        Ok(())
    }

    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<UpsertSummary, VectorStoreError> {
        let (accepted, rejected) = partition_by_dimension(self.dimension, records);
        let upserted = accepted.len();

        let mut guard = self.records.write().unwrap_or_else(PoisonError::into_inner);
        for record in accepted {
            let revision = self.revision.fetch_add(1, Ordering::Relaxed) + 1;
            guard.insert(record.id.clone(), StoredRecord { record, revision });
        }

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

        let guard = self.records.read().unwrap_or_else(PoisonError::into_inner);
        let candidates = guard
            .values()
            .filter(|stored| {
                filter
                    .as_ref()
                    .is_none_or(|allowed| allowed.contains(&stored.record.metadata.modality))
            })
            .filter_map(|stored| {
                let score = cosine_similarity(vector, stored.record.vector.values())?;
                Some(RankedCandidate {
                    result: QueryResult {
                        record_id: stored.record.id.clone(),
                        score,
                        metadata: stored.record.metadata.clone(),
                    },
                    recency: stored.revision,
                })
            })
            .collect();

        Ok(rank_candidates(candidates, top_k))
    }

    async fn delete_source(&self, source: &str) -> Result<(), VectorStoreError> {
        let mut guard = self.records.write().unwrap_or_else(PoisonError::into_inner);
        guard.retain(|_, stored| stored.record.metadata.source != source);
        Ok(())
    }

    async fn list_sources(&self) -> Result<BTreeSet<String>, VectorStoreError> {
        let guard = self.records.read().unwrap_or_else(PoisonError::into_inner);
        Ok(guard
            .values()
            .map(|stored| stored.record.metadata.source.clone())
            .collect())
    }

    async fn reset(&self) -> Result<(), VectorStoreError> {
        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::{metadata, record};

    #[tokio::test]
    async fn self_query_returns_record_first_with_unit_score() {
        let store = InMemoryVectorStore::new(3);
        store
            .upsert(vec![
                record("a", vec![1.0, 0.0, 0.0], Modality::Text),
                record("b", vec![0.0, 1.0, 0.0], Modality::Text),
                record("c", vec![0.6, 0.8, 0.0], Modality::Image),
            ])
            .await
            .unwrap();

        let results = store.query(&[0.6, 0.8, 0.0], 3, None).await.unwrap();
        assert_eq!(results[0].record_id, "c");
        assert!((results[0].score - 1.0).abs() < 1e-6);
        assert!(results.windows(2).all(|pair| pair[0].score >= pair[1].score));
    }

    #[tokio::test]
    async fn upsert_is_idempotent_by_id() {
        let store = InMemoryVectorStore::new(2);
        store
            .upsert(vec![record("a", vec![1.0, 0.0], Modality::Text)])
            .await
            .unwrap();
        let mut replacement = record("a", vec![0.0, 1.0], Modality::Text);
        replacement.metadata = metadata("other.txt", Modality::Text, 4);
        store.upsert(vec![replacement]).await.unwrap();

        assert_eq!(store.len(), 1);
        let results = store.query(&[0.0, 1.0], 1, None).await.unwrap();
        assert_eq!(results[0].metadata.source, "other.txt");
        assert!((results[0].score - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn mismatched_records_are_rejected_individually() {
        let store = InMemoryVectorStore::new(2);
        let summary = store
            .upsert(vec![
                record("ok", vec![1.0, 0.0], Modality::Text),
                record("bad", vec![1.0, 0.0, 0.0], Modality::Text),
            ])
            .await
            .unwrap();
        assert_eq!(summary.upserted, 1);
        assert_eq!(summary.rejected.len(), 1);
        assert_eq!(summary.rejected[0].id, "bad");
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn equal_scores_prefer_most_recent_upsert() {
        let store = InMemoryVectorStore::new(2);
        store
            .upsert(vec![record("z-old", vec![1.0, 0.0], Modality::Text)])
            .await
            .unwrap();
        store
            .upsert(vec![record("a-new", vec![2.0, 0.0], Modality::Text)])
            .await
            .unwrap();
        let results = store.query(&[1.0, 0.0], 2, None).await.unwrap();
        let ids: Vec<_> = results.iter().map(|r| r.record_id.as_str()).collect();
        assert_eq!(ids, vec!["a-new", "z-old"]);

        store
            .upsert(vec![record("z-old", vec![1.0, 0.0], Modality::Text)])
            .await
            .unwrap();
        let results = store.query(&[1.0, 0.0], 2, None).await.unwrap();
        assert_eq!(results[0].record_id, "z-old");
    }

    #[tokio::test]
    async fn modality_filter_restricts_results() {
        let store = InMemoryVectorStore::new(2);
        store
            .upsert(vec![
                record("text", vec![1.0, 0.0], Modality::Text),
                record("image", vec![1.0, 0.1], Modality::Image),
            ])
            .await
            .unwrap();
        let results = store
            .query(&[1.0, 0.0], 5, Some(&[Modality::Image]))
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].record_id, "image");
    }

    #[tokio::test]
    async fn query_validates_dimension_and_top_k() {
        let store = InMemoryVectorStore::new(2);
        assert!(matches!(
            store.query(&[1.0], 1, None).await,
            Err(VectorStoreError::DimensionMismatch { .. })
        ));
        assert!(matches!(
            store.query(&[1.0, 0.0], 0, None).await,
            Err(VectorStoreError::InvalidTopK)
        ));
    }

    #[tokio::test]
    async fn delete_list_and_reset() {
        let store = InMemoryVectorStore::new(2);
        let mut other = record("b", vec![0.0, 1.0], Modality::Text);
        other.metadata = metadata("b.txt", Modality::Text, 0);
        store
            .upsert(vec![record("a", vec![1.0, 0.0], Modality::Text), other])
            .await
            .unwrap();

        let sources = store.list_sources().await.unwrap();
        assert_eq!(
            sources.into_iter().collect::<Vec<_>>(),
            vec!["b.txt".to_string(), "doc.txt".to_string()]
        );

        store.delete_source("doc.txt").await.unwrap();
        assert_eq!(store.len(), 1);

        store.reset().await.unwrap();
        assert!(store.is_empty());
    }
}
