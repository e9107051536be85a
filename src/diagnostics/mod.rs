//! Streaming health diagnostics: running baselines, deviation correlation,
//! and deterministic triage.
//!
//! Nothing in this module calls out to a model or an external service. The
//! only I/O is the [`BaselineStore`] round trip made by the evaluator.

pub mod baseline;
pub mod cooldown;
pub mod correlator;
pub mod per_stream;
pub mod triage;

pub use baseline::{BaselineEvaluator, BaselineMetric, BaselineStore};
pub use cooldown::{FlagGate, TriageCooldown};
pub use correlator::{correlate, CorrelationPattern, MetricCorrelation};
pub use per_stream::{PerStreamAnalyzer, StreamAnomaly, StreamHealthSample};
pub use triage::{triage, ThresholdViolation, TriageAction, TriageResult, TriageTrigger};

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Metric name to current reading. Ordered so results are deterministic.
pub type MetricMap = BTreeMap<String, f64>;

/// Canonical metric names shared by the heartbeat, correlator and analyzer.
pub mod metrics {
    pub const AVG_BITRATE: &str = "avg_bitrate";
    pub const AVG_FPS: &str = "avg_fps";
    pub const AVG_BUFFER_HEALTH: &str = "avg_buffer_health";
    pub const TOTAL_REBUFFER_COUNT: &str = "total_rebuffer_count";
    pub const TOTAL_ISSUE_COUNT: &str = "total_issue_count";
    pub const AVG_PACKET_LOSS: &str = "avg_packet_loss";
    pub const AVG_BANDWIDTH_IN: &str = "avg_bandwidth_in";
    pub const AVG_BANDWIDTH_OUT: &str = "avg_bandwidth_out";
    pub const ACTIVE_SESSIONS: &str = "active_sessions";
}

/// Stream key of the tenant-wide aggregate baseline.
pub const TENANT_WIDE: &str = "";

/// Errors raised by a [`BaselineStore`] implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("baseline store unavailable")]
    Unavailable,
    #[error("baseline store backend: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl StoreError {
    pub fn backend<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        StoreError::Backend(Box::new(err))
    }
}

/// Errors surfaced by the baseline evaluator.
#[derive(Debug, Error)]
pub enum DiagnosticsError {
    #[error("load baselines: {0}")]
    LoadBaselines(#[source] StoreError),
    #[error("persist baselines: {0}")]
    PersistBaselines(#[source] StoreError),
    #[error("cleanup baselines: {0}")]
    CleanupBaselines(#[source] StoreError),
}

/// Which side of the baseline a reading fell on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Above,
    Below,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Above => "above",
            Direction::Below => "below",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A current reading that sits at least `sigma_limit` standard deviations
/// away from its baseline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deviation {
    pub metric: String,
    pub current: f64,
    pub baseline: f64,
    pub standard_deviation: f64,
    pub sigma: f64,
    pub direction: Direction,
}

impl fmt::Display for Deviation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} (baseline {} ± {}, {:.1}σ {})",
            self.metric,
            compact(self.current),
            compact(self.baseline),
            compact(self.standard_deviation),
            self.sigma,
            self.direction
        )
    }
}

/// Four decimals at most, trailing zeros dropped.
fn compact(v: f64) -> String {
    let s = format!("{:.4}", v);
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        s
    }
}
