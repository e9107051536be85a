//! Process-local [`BaselineStore`] for embedding and tests.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::diagnostics::{BaselineMetric, BaselineStore, StoreError};

type StreamKey = (String, String);

#[derive(Debug, Clone, Copy)]
struct Row {
    metric: BaselineMetric,
    updated_at: DateTime<Utc>,
}

/// Baselines held in memory. Lost on restart and not shared between
/// processes; use [`super::SqliteBaselineStore`] for anything durable.
#[derive(Debug, Default)]
pub struct MemoryBaselineStore {
    rows: RwLock<HashMap<StreamKey, HashMap<String, Row>>>,
}

impl MemoryBaselineStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of (stream, metric) rows held for a tenant.
    pub fn row_count(&self, tenant_id: &str) -> usize {
        let rows = self.rows.read().unwrap_or_else(|p| p.into_inner());
        rows.iter()
            .filter(|((tenant, _), _)| tenant == tenant_id)
            .map(|(_, metrics)| metrics.len())
            .sum()
    }
}

#[async_trait]
impl BaselineStore for MemoryBaselineStore {
    async fn get(
        &self,
        tenant_id: &str,
        stream_id: &str,
    ) -> Result<HashMap<String, BaselineMetric>, StoreError> {
        let rows = self.rows.read().unwrap_or_else(|p| p.into_inner());
        let key = (tenant_id.to_string(), stream_id.to_string());
        Ok(rows
            .get(&key)
            .map(|metrics| {
                metrics
                    .iter()
                    .map(|(name, row)| (name.clone(), row.metric))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn upsert(
        &self,
        tenant_id: &str,
        stream_id: &str,
        metrics: &HashMap<String, BaselineMetric>,
    ) -> Result<(), StoreError> {
        if metrics.is_empty() {
            return Ok(());
        }
        let now = Utc::now();
        let mut rows = self.rows.write().unwrap_or_else(|p| p.into_inner());
        let entry = rows
            .entry((tenant_id.to_string(), stream_id.to_string()))
            .or_default();
        for (name, metric) in metrics {
            entry.insert(
                name.clone(),
                Row {
                    metric: *metric,
                    updated_at: now,
                },
            );
        }
        Ok(())
    }

    async fn cleanup_stale(&self, tenant_id: &str, max_age: Duration) -> Result<u64, StoreError> {
        let Some(cutoff) = super::stale_cutoff(max_age) else {
            return Ok(0);
        };
        let mut rows = self.rows.write().unwrap_or_else(|p| p.into_inner());
        let mut removed = 0u64;
        for ((tenant, _), metrics) in rows.iter_mut() {
            if tenant != tenant_id {
                continue;
            }
            let before = metrics.len();
            metrics.retain(|_, row| row.updated_at >= cutoff);
            removed += (before - metrics.len()) as u64;
        }
        rows.retain(|_, metrics| !metrics.is_empty());
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one(name: &str, average: f64) -> HashMap<String, BaselineMetric> {
        let mut m = HashMap::new();
        m.insert(
            name.to_string(),
            BaselineMetric {
                average,
                sum_squared_deviation: 0.0,
                sample_count: 1,
            },
        );
        m
    }

    #[test]
    fn test_get_missing_is_empty() {
        let store = MemoryBaselineStore::new();
        let got = tokio_test::block_on(store.get("t1", "")).unwrap();
        assert!(got.is_empty());
    }

    #[test]
    fn test_upsert_merges_metrics() {
        let store = MemoryBaselineStore::new();
        tokio_test::block_on(async {
            store.upsert("t1", "", &one("a", 1.0)).await.unwrap();
            store.upsert("t1", "", &one("b", 2.0)).await.unwrap();
            store.upsert("t1", "", &one("a", 3.0)).await.unwrap();
            let got = store.get("t1", "").await.unwrap();
            assert_eq!(got.len(), 2);
            assert_eq!(got["a"].average, 3.0);
        });
        assert_eq!(store.row_count("t1"), 2);
    }

    #[tokio::test]
    async fn test_cleanup_is_per_tenant() {
        let store = MemoryBaselineStore::new();
        store.upsert("t1", "", &one("a", 1.0)).await.unwrap();
        store.upsert("t1", "s1", &one("a", 1.0)).await.unwrap();
        store.upsert("t2", "", &one("a", 1.0)).await.unwrap();

        assert_eq!(store.cleanup_stale("t1", Duration::from_secs(3600)).await.unwrap(), 0);

        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(store.cleanup_stale("t1", Duration::ZERO).await.unwrap(), 2);
        assert_eq!(store.row_count("t1"), 0);
        assert_eq!(store.row_count("t2"), 1);
    }

    #[tokio::test]
    async fn test_cleanup_with_out_of_range_age_removes_nothing() {
        let store = MemoryBaselineStore::new();
        store.upsert("t1", "", &one("a", 1.0)).await.unwrap();
        let removed = store
            .cleanup_stale("t1", Duration::from_secs(100_000_000_000 * 3600))
            .await
            .unwrap();
        assert_eq!(removed, 0);
        assert_eq!(store.row_count("t1"), 1);
    }
}
