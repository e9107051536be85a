//! SQLite-backed [`BaselineStore`].

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use rusqlite::params;

use super::Pool;
use crate::diagnostics::{BaselineMetric, BaselineStore, StoreError};

/// One row per (tenant, stream, metric). Blocking SQLite work runs on the
/// blocking thread pool.
#[derive(Clone, Default)]
pub struct SqliteBaselineStore {
    pool: Option<Pool>,
}

impl SqliteBaselineStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool: Some(pool) }
    }

    fn pool(&self) -> Result<Pool, StoreError> {
        self.pool.clone().ok_or(StoreError::Unavailable)
    }
}

/// RFC 3339 with fixed precision so timestamps compare lexicographically.
pub(crate) fn timestamp(at: chrono::DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[async_trait]
impl BaselineStore for SqliteBaselineStore {
    async fn get(
        &self,
        tenant_id: &str,
        stream_id: &str,
    ) -> Result<HashMap<String, BaselineMetric>, StoreError> {
        let pool = self.pool()?;
        let tenant_id = tenant_id.to_string();
        let stream_id = stream_id.to_string();
        tokio::task::spawn_blocking(move || -> Result<_, StoreError> {
            let conn = pool.get()?;
            let mut stmt = conn.prepare(
                "SELECT metric_name, avg_value, m2, sample_count
                 FROM baselines
                 WHERE tenant_id = ?1 AND stream_id = ?2",
            )?;
            let rows = stmt.query_map(params![tenant_id, stream_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    BaselineMetric {
                        average: row.get(1)?,
                        sum_squared_deviation: row.get(2)?,
                        sample_count: row.get::<_, i64>(3)?.max(0) as u64,
                    },
                ))
            })?;

            let mut metrics = HashMap::new();
            for r in rows {
                let (name, metric) = r?;
                metrics.insert(name, metric);
            }
            Ok(metrics)
        })
        .await?
    }

    async fn upsert(
        &self,
        tenant_id: &str,
        stream_id: &str,
        metrics: &HashMap<String, BaselineMetric>,
    ) -> Result<(), StoreError> {
        let pool = self.pool()?;
        if metrics.is_empty() {
            return Ok(());
        }
        let tenant_id = tenant_id.to_string();
        let stream_id = stream_id.to_string();
        let rows: Vec<(String, BaselineMetric)> =
            metrics.iter().map(|(k, v)| (k.clone(), *v)).collect();
        tokio::task::spawn_blocking(move || -> Result<(), StoreError> {
            let mut conn = pool.get()?;
            let now = timestamp(Utc::now());
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO baselines
                        (tenant_id, stream_id, metric_name, avg_value, m2, sample_count, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                     ON CONFLICT (tenant_id, stream_id, metric_name) DO UPDATE SET
                        avg_value = excluded.avg_value,
                        m2 = excluded.m2,
                        sample_count = excluded.sample_count,
                        updated_at = excluded.updated_at",
                )?;
                for (name, m) in &rows {
                    stmt.execute(params![
                        tenant_id,
                        stream_id,
                        name,
                        m.average,
                        m.sum_squared_deviation,
                        i64::try_from(m.sample_count).unwrap_or(i64::MAX),
                        now
                    ])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await?
    }

    async fn cleanup_stale(&self, tenant_id: &str, max_age: Duration) -> Result<u64, StoreError> {
        let pool = self.pool()?;
        let Some(cutoff) = super::stale_cutoff(max_age) else {
            return Ok(0);
        };
        let cutoff = timestamp(cutoff);
        let tenant_id = tenant_id.to_string();
        tokio::task::spawn_blocking(move || -> Result<u64, StoreError> {
            let conn = pool.get()?;
            let removed = conn.execute(
                "DELETE FROM baselines WHERE tenant_id = ?1 AND updated_at < ?2",
                params![tenant_id, cutoff],
            )?;
            Ok(removed as u64)
        })
        .await?
    }
}
