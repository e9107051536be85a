//! SQLite storage layer -- pool, schema, baseline and journal persistence.

pub mod baselines;
pub mod journal;
pub mod memory;
pub mod schema;

pub use baselines::SqliteBaselineStore;
pub use journal::TriageJournal;
pub use memory::MemoryBaselineStore;

use anyhow::{Context, Result};
use r2d2::Pool as R2D2Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::diagnostics::StoreError;

/// Connection Pool type
pub type Pool = R2D2Pool<SqliteConnectionManager>;

/// Open (or create) the SQLite database and return a connection pool.
pub fn open_pool(path: &str) -> Result<Pool> {
    if let Some(parent) = std::path::Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create database directory {}", parent.display()))?;
        }
    }

    let manager = SqliteConnectionManager::file(path).with_init(|c| {
        c.execute_batch(
            "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA temp_store = MEMORY;
                 PRAGMA foreign_keys = ON;
                 PRAGMA busy_timeout = 5000;",
        )
    });

    let pool = R2D2Pool::new(manager).context("failed to build connection pool")?;

    // Run migrations on a single connection
    let conn = pool.get()?;
    schema::migrate(&conn)?;

    Ok(pool)
}

/// Oldest `updated_at` that still counts as fresh. `None` when `max_age`
/// reaches past the representable date range, so nothing can be stale.
pub(crate) fn stale_cutoff(max_age: std::time::Duration) -> Option<chrono::DateTime<chrono::Utc>> {
    let max_age = chrono::Duration::from_std(max_age).ok()?;
    chrono::Utc::now().checked_sub_signed(max_age)
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::backend(err)
    }
}

impl From<r2d2::Error> for StoreError {
    fn from(err: r2d2::Error) -> Self {
        StoreError::backend(err)
    }
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(err: tokio::task::JoinError) -> Self {
        StoreError::backend(err)
    }
}

#[cfg(test)]
pub(crate) fn test_pool() -> (tempfile::TempDir, Pool) {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("streamhealth.db");
    let pool = open_pool(path.to_str().expect("utf-8 path")).expect("open pool");
    (dir, pool)
}
