use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Deviation, DiagnosticsError, Direction, MetricMap, StoreError};

pub const DEFAULT_SIGMA_LIMIT: f64 = 2.0;
pub const DEFAULT_MIN_SAMPLES: u64 = 5;

/// Welford running statistics for a single metric.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BaselineMetric {
    pub average: f64,
    /// Welford M2 accumulator.
    pub sum_squared_deviation: f64,
    pub sample_count: u64,
}

impl BaselineMetric {
    /// Fold one observation into the running mean and M2.
    pub fn observe(&mut self, value: f64) {
        self.sample_count += 1;
        let delta = value - self.average;
        self.average += delta / self.sample_count as f64;
        let delta2 = value - self.average;
        self.sum_squared_deviation += delta * delta2;
    }

    /// Population standard deviation. Zero below two samples.
    pub fn std_dev(&self) -> f64 {
        if self.sample_count < 2 {
            return 0.0;
        }
        (self.sum_squared_deviation / self.sample_count as f64).sqrt()
    }
}

/// Persistence for baselines, keyed by (tenant, stream) then metric name.
///
/// Implementations must allow concurrent calls for different keys without
/// any locking by the caller.
#[async_trait]
pub trait BaselineStore: Send + Sync {
    async fn get(
        &self,
        tenant_id: &str,
        stream_id: &str,
    ) -> Result<HashMap<String, BaselineMetric>, StoreError>;

    async fn upsert(
        &self,
        tenant_id: &str,
        stream_id: &str,
        metrics: &HashMap<String, BaselineMetric>,
    ) -> Result<(), StoreError>;

    /// Delete the tenant's rows not updated within `max_age`.
    async fn cleanup_stale(&self, tenant_id: &str, max_age: Duration) -> Result<u64, StoreError>;
}

type StreamKey = (String, String);

/// One async mutex per (tenant, stream) with an update in flight. Entries
/// are dropped once no writer holds or waits on them.
#[derive(Default)]
struct WriteLocks {
    locks: std::sync::Mutex<HashMap<StreamKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl WriteLocks {
    async fn acquire(&self, tenant_id: &str, stream_id: &str) -> WriteGuard<'_> {
        let key = (tenant_id.to_string(), stream_id.to_string());
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
            locks.entry(key.clone()).or_default().clone()
        };
        let guard = lock.clone().lock_owned().await;
        WriteGuard {
            locks: self,
            key,
            lock,
            guard: Some(guard),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|p| p.into_inner()).len()
    }
}

struct WriteGuard<'a> {
    locks: &'a WriteLocks,
    key: StreamKey,
    lock: Arc<tokio::sync::Mutex<()>>,
    guard: Option<tokio::sync::OwnedMutexGuard<()>>,
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        self.guard = None;
        let mut locks = self.locks.locks.lock().unwrap_or_else(|p| p.into_inner());
        // The map and this guard are the only holders: nobody is waiting.
        if Arc::strong_count(&self.lock) == 2 {
            locks.remove(&self.key);
        }
    }
}

/// Owns baseline writes and computes deviations against them.
///
/// Updates of the same (tenant, stream) are serialized, so clones of one
/// evaluator may be driven concurrently. Separate evaluators over one store
/// do not coordinate.
///
/// An evaluator built with [`BaselineEvaluator::unconfigured`] has no store;
/// every method is then a no-op that returns empty results.
#[derive(Clone)]
pub struct BaselineEvaluator {
    store: Option<Arc<dyn BaselineStore>>,
    write_locks: Arc<WriteLocks>,
    sigma_limit: f64,
    min_samples: u64,
}

impl std::fmt::Debug for BaselineEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BaselineEvaluator")
            .field("configured", &self.store.is_some())
            .field("sigma_limit", &self.sigma_limit)
            .field("min_samples", &self.min_samples)
            .finish()
    }
}

impl BaselineEvaluator {
    /// Non-positive `sigma_limit` or zero `min_samples` fall back to the
    /// defaults (2.0 and 5).
    pub fn new(store: Arc<dyn BaselineStore>, sigma_limit: f64, min_samples: u64) -> Self {
        let sigma_limit = if sigma_limit > 0.0 {
            sigma_limit
        } else {
            DEFAULT_SIGMA_LIMIT
        };
        let min_samples = if min_samples > 0 {
            min_samples
        } else {
            DEFAULT_MIN_SAMPLES
        };
        Self {
            store: Some(store),
            write_locks: Arc::default(),
            sigma_limit,
            min_samples,
        }
    }

    pub fn unconfigured() -> Self {
        Self {
            store: None,
            write_locks: Arc::default(),
            sigma_limit: DEFAULT_SIGMA_LIMIT,
            min_samples: DEFAULT_MIN_SAMPLES,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.store.is_some()
    }

    pub fn sigma_limit(&self) -> f64 {
        self.sigma_limit
    }

    pub fn min_samples(&self) -> u64 {
        self.min_samples
    }

    /// Fold `metrics` into the stored baselines and persist the whole map.
    ///
    /// This is the only write path. The load, fold and persist run under the
    /// (tenant, stream) write lock.
    pub async fn update(
        &self,
        tenant_id: &str,
        stream_id: &str,
        metrics: &MetricMap,
    ) -> Result<(), DiagnosticsError> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        let _write = self.write_locks.acquire(tenant_id, stream_id).await;
        let mut existing = store
            .get(tenant_id, stream_id)
            .await
            .map_err(DiagnosticsError::LoadBaselines)?;

        for (name, &value) in metrics {
            existing.entry(name.clone()).or_default().observe(value);
        }

        store
            .upsert(tenant_id, stream_id, &existing)
            .await
            .map_err(DiagnosticsError::PersistBaselines)?;
        debug!(tenant_id, stream_id, metrics = metrics.len(), "baselines updated");
        Ok(())
    }

    /// Compare `metrics` against the stored baselines. Read-only.
    ///
    /// Metrics without a baseline, with fewer than `min_samples` samples, or
    /// with zero variance cannot be judged yet and are skipped.
    pub async fn deviations(
        &self,
        tenant_id: &str,
        stream_id: &str,
        metrics: &MetricMap,
    ) -> Result<Vec<Deviation>, DiagnosticsError> {
        let Some(store) = &self.store else {
            return Ok(Vec::new());
        };
        let baselines = store
            .get(tenant_id, stream_id)
            .await
            .map_err(DiagnosticsError::LoadBaselines)?;

        let mut deviations = Vec::new();
        for (name, &current) in metrics {
            let Some(b) = baselines.get(name) else {
                continue;
            };
            if b.sample_count < self.min_samples {
                continue;
            }
            let std_dev = b.std_dev();
            if std_dev == 0.0 {
                continue;
            }
            let diff = current - b.average;
            let sigma = diff.abs() / std_dev;
            if sigma.is_nan() || sigma < self.sigma_limit {
                continue;
            }
            let direction = if diff < 0.0 {
                Direction::Below
            } else {
                Direction::Above
            };
            deviations.push(Deviation {
                metric: name.clone(),
                current,
                baseline: b.average,
                standard_deviation: std_dev,
                sigma,
                direction,
            });
        }
        Ok(deviations)
    }

    /// Remove the tenant's baselines not updated within `max_age`.
    pub async fn cleanup(&self, tenant_id: &str, max_age: Duration) -> Result<u64, DiagnosticsError> {
        let Some(store) = &self.store else {
            return Ok(0);
        };
        let removed = store
            .cleanup_stale(tenant_id, max_age)
            .await
            .map_err(DiagnosticsError::CleanupBaselines)?;
        if removed > 0 {
            debug!(tenant_id, removed, "stale baselines removed");
        }
        Ok(removed)
    }
}
