//! streamhealth -- deterministic health diagnostics for live streaming.
//!
//! This crate keeps running per-tenant and per-stream baselines, detects
//! statistically significant deviations, matches them against known failure
//! patterns, and triages each heartbeat into ok, flag or investigate.

pub mod api;
pub mod config;
pub mod diagnostics;
pub mod heartbeat;
pub mod storage;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use crate::api::state::AppState;
use crate::config::{AppConfig, LogFormat, LoggingConfig};
use crate::diagnostics::{BaselineEvaluator, BaselineStore};
use crate::heartbeat::Heartbeat;
use crate::storage::{SqliteBaselineStore, TriageJournal};

/// Install the global tracing subscriber. `RUST_LOG` wins over the
/// configured level. Logs go to stderr so command output stays clean.
pub fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    let installed = match logging.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Text => builder.try_init(),
    };
    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

/// Open the database and wire the diagnostics engine around it.
pub fn build_state(config: &AppConfig) -> Result<AppState> {
    let db_path = &config.storage.db_path;
    tracing::info!(%db_path, "initializing database");
    let pool = storage::open_pool(db_path)
        .with_context(|| format!("failed to open database at {db_path}"))?;

    let store: Arc<dyn BaselineStore> = Arc::new(SqliteBaselineStore::new(pool.clone()));
    let evaluator = Arc::new(BaselineEvaluator::new(
        store.clone(),
        config.diagnostics.sigma_limit,
        config.diagnostics.min_samples,
    ));
    let journal = TriageJournal::new(pool);
    let heartbeat = Heartbeat::from_config(config, evaluator, Some(journal.clone()));

    Ok(AppState {
        heartbeat: Arc::new(heartbeat),
        store,
        journal: Some(journal),
    })
}

/// Start the streamhealth daemon and serve the HTTP API until Ctrl-C.
pub async fn serve(config: &AppConfig) -> Result<()> {
    let state = build_state(config)?;

    let heartbeat = state.heartbeat.clone();
    tokio::spawn(async move {
        run_maintenance_loop(heartbeat).await;
    });

    let addr: std::net::SocketAddr = config
        .server
        .bind
        .parse()
        .with_context(|| format!("invalid bind address {}", config.server.bind))?;
    let app = api::router(state);

    tracing::info!(%addr, "streamhealth listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("streamhealth stopped");
    Ok(())
}

const MAINTENANCE_INTERVAL: std::time::Duration = std::time::Duration::from_secs(10 * 60);

/// Periodically drops expired cooldown records so the map tracks only
/// tenants flagged within the current window.
async fn run_maintenance_loop(heartbeat: Arc<Heartbeat>) {
    let mut ticker = tokio::time::interval(MAINTENANCE_INTERVAL);
    loop {
        ticker.tick().await;
        let pruned = heartbeat.prune_cooldown();
        if pruned > 0 {
            tracing::debug!(pruned, "expired flag cooldowns pruned");
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
