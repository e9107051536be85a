//! Database schema and migrations.

use anyhow::Result;
use rusqlite::Connection;

/// Run all pending migrations.
pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS baselines (
            tenant_id TEXT NOT NULL,
            stream_id TEXT NOT NULL DEFAULT '',
            metric_name TEXT NOT NULL,
            avg_value REAL NOT NULL DEFAULT 0,
            m2 REAL NOT NULL DEFAULT 0,
            sample_count INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (tenant_id, stream_id, metric_name)
        );

        CREATE TABLE IF NOT EXISTS triage_journal (
            id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL,
            action TEXT NOT NULL,
            trigger_kind TEXT NOT NULL DEFAULT '',
            reason TEXT NOT NULL,
            result_json TEXT NOT NULL,
            anomalies_json TEXT NOT NULL DEFAULT '[]',
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_baselines_tenant_updated ON baselines(tenant_id, updated_at);
        CREATE INDEX IF NOT EXISTS idx_triage_journal_created ON triage_journal(created_at);
        CREATE INDEX IF NOT EXISTS idx_triage_journal_tenant ON triage_journal(tenant_id);

        INSERT OR IGNORE INTO schema_version (version) VALUES (1);",
    )?;

    Ok(())
}
