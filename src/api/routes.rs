//! API route definitions.

use std::collections::BTreeMap;

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

use super::error::{ApiError, ApiResult};
use super::state::AppState;
use crate::diagnostics::{StreamHealthSample, TENANT_WIDE};
use crate::heartbeat::HealthSnapshot;

const DEFAULT_RECENT_LIMIT: usize = 20;
const MAX_RECENT_LIMIT: usize = 500;

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/tenants/{tenant}/heartbeat", post(heartbeat))
        .route("/tenants/{tenant}/baselines", get(baselines))
        .route("/tenants/{tenant}/streams/analyze", post(analyze_streams))
        .route("/triage/recent", get(triage_recent))
}

fn meta(extra: Value) -> Value {
    let mut meta = json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION")
    });
    if let (Some(m), Value::Object(extra)) = (meta.as_object_mut(), extra) {
        m.extend(extra);
    }
    meta
}

async fn health() -> Json<Value> {
    Json(json!({
        "data": {
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION")
        },
        "meta": meta(json!({}))
    }))
}

#[derive(Debug, Deserialize)]
struct HeartbeatRequest {
    snapshot: HealthSnapshot,
    #[serde(default)]
    streams: Vec<Option<StreamHealthSample>>,
}

async fn heartbeat(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
    Json(req): Json<HeartbeatRequest>,
) -> ApiResult<Json<Value>> {
    let mut snapshot = req.snapshot;
    if !snapshot.tenant_id.is_empty() && snapshot.tenant_id != tenant {
        return Err(ApiError::BadRequest(format!(
            "snapshot tenant {} does not match path tenant {}",
            snapshot.tenant_id, tenant
        )));
    }
    snapshot.tenant_id = tenant;

    let outcome = state
        .heartbeat
        .process_tenant(&snapshot, &req.streams)
        .await?;
    Ok(Json(json!({
        "data": outcome,
        "meta": meta(json!({ "streams": req.streams.len() }))
    })))
}

#[derive(Debug, Deserialize)]
struct BaselineQuery {
    stream: Option<String>,
}

async fn baselines(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
    Query(query): Query<BaselineQuery>,
) -> ApiResult<Json<Value>> {
    let stream = query.stream.unwrap_or_else(|| TENANT_WIDE.to_string());
    let stored = state.store.get(&tenant, &stream).await?;

    let data: BTreeMap<String, Value> = stored
        .into_iter()
        .map(|(name, b)| {
            (
                name,
                json!({
                    "average": b.average,
                    "std_dev": b.std_dev(),
                    "sample_count": b.sample_count,
                }),
            )
        })
        .collect();
    Ok(Json(json!({
        "data": data,
        "meta": meta(json!({ "total": data.len(), "stream": stream }))
    })))
}

async fn analyze_streams(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
    Json(samples): Json<Vec<Option<StreamHealthSample>>>,
) -> ApiResult<Json<Value>> {
    let anomalies = state.heartbeat.analyzer().analyze(&tenant, &samples).await;
    Ok(Json(json!({
        "data": anomalies,
        "meta": meta(json!({ "total": anomalies.len(), "samples": samples.len() }))
    })))
}

#[derive(Debug, Deserialize)]
struct RecentQuery {
    limit: Option<usize>,
}

async fn triage_recent(
    State(state): State<AppState>,
    Query(query): Query<RecentQuery>,
) -> ApiResult<Json<Value>> {
    let journal = state
        .journal
        .clone()
        .ok_or_else(|| ApiError::NotFound("triage journal is not configured".to_string()))?;
    let limit = query
        .limit
        .unwrap_or(DEFAULT_RECENT_LIMIT)
        .clamp(1, MAX_RECENT_LIMIT);

    let entries = tokio::task::spawn_blocking(move || journal.list_recent(limit))
        .await
        .map_err(|e| ApiError::Internal(e.into()))??;
    Ok(Json(json!({
        "data": entries,
        "meta": meta(json!({ "total": entries.len(), "limit": limit }))
    })))
}
