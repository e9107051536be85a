use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::Serialize;
use uuid::Uuid;

use super::baselines::timestamp;
use super::Pool;
use crate::diagnostics::{StreamAnomaly, TriageResult};

/// A surfaced triage decision, as recorded.
#[derive(Debug, Serialize)]
pub struct JournalEntry {
    pub id: Uuid,
    pub tenant_id: String,
    pub result: TriageResult,
    pub stream_anomalies: Vec<StreamAnomaly>,
    pub created_at: DateTime<Utc>,
}

/// Audit log of triage results that were surfaced to a human or agent.
#[derive(Clone)]
pub struct TriageJournal {
    pool: Pool,
}

impl TriageJournal {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn record(
        &self,
        tenant_id: &str,
        result: &TriageResult,
        anomalies: &[StreamAnomaly],
    ) -> Result<Uuid> {
        let conn = self.pool.get()?;
        let id = Uuid::new_v4();
        let result_json = serde_json::to_string(result)?;
        let anomalies_json = serde_json::to_string(anomalies)?;

        conn.execute(
            "INSERT INTO triage_journal
                (id, tenant_id, action, trigger_kind, reason, result_json, anomalies_json, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                id.to_string(),
                tenant_id,
                result.action.to_string(),
                result.trigger_str(),
                result.reason,
                result_json,
                anomalies_json,
                timestamp(Utc::now())
            ],
        )
        .context("failed to record triage result")?;

        Ok(id)
    }

    /// Newest first. Rows that no longer decode are skipped.
    pub fn list_recent(&self, limit: usize) -> Result<Vec<JournalEntry>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT id, tenant_id, result_json, anomalies_json, created_at
             FROM triage_journal ORDER BY created_at DESC LIMIT ?1",
        )?;

        let rows = stmt.query_map([limit as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;

        let mut entries = Vec::new();
        for r in rows {
            let (id, tenant_id, result_json, anomalies_json, created_at) = r?;
            let decoded = (|| -> Result<JournalEntry> {
                Ok(JournalEntry {
                    id: Uuid::parse_str(&id)?,
                    tenant_id,
                    result: serde_json::from_str(&result_json)?,
                    stream_anomalies: serde_json::from_str(&anomalies_json)?,
                    created_at: DateTime::parse_from_rfc3339(&created_at)?.with_timezone(&Utc),
                })
            })();
            match decoded {
                Ok(entry) => entries.push(entry),
                Err(e) => tracing::warn!(%id, error = %e, "skipping undecodable journal entry"),
            }
        }
        Ok(entries)
    }
}
