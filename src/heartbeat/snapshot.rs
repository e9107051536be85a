//! Tenant-level health snapshots as delivered by the telemetry pipeline.

use serde::{Deserialize, Serialize};

use crate::diagnostics::metrics::*;
use crate::diagnostics::MetricMap;

/// Aggregated stream health for one tenant over the summary window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamHealthSummary {
    pub avg_bitrate: f64,
    pub avg_fps: f64,
    pub avg_buffer_health: f64,
    pub total_rebuffer_count: u64,
    pub total_issue_count: u64,
}

/// Aggregated client-side quality of experience.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientQoeSummary {
    pub avg_packet_loss_rate: f64,
    pub avg_bandwidth_in: f64,
    pub avg_bandwidth_out: f64,
    pub total_active_sessions: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    #[serde(default)]
    pub tenant_id: String,
    #[serde(default)]
    pub active_streams: u64,
    #[serde(default)]
    pub health: Option<StreamHealthSummary>,
    #[serde(default)]
    pub client_qoe: Option<ClientQoeSummary>,
}

impl HealthSnapshot {
    /// Flatten into the canonical metric names tracked by baselines.
    pub fn metric_map(&self) -> MetricMap {
        let mut m = MetricMap::new();
        if let Some(h) = &self.health {
            m.insert(AVG_BITRATE.to_string(), h.avg_bitrate);
            m.insert(AVG_FPS.to_string(), h.avg_fps);
            m.insert(AVG_BUFFER_HEALTH.to_string(), h.avg_buffer_health);
            m.insert(TOTAL_REBUFFER_COUNT.to_string(), h.total_rebuffer_count as f64);
            m.insert(TOTAL_ISSUE_COUNT.to_string(), h.total_issue_count as f64);
        }
        if let Some(q) = &self.client_qoe {
            m.insert(AVG_PACKET_LOSS.to_string(), q.avg_packet_loss_rate);
            m.insert(AVG_BANDWIDTH_IN.to_string(), q.avg_bandwidth_in);
            m.insert(AVG_BANDWIDTH_OUT.to_string(), q.avg_bandwidth_out);
            m.insert(ACTIVE_SESSIONS.to_string(), q.total_active_sessions as f64);
        }
        m
    }
}
