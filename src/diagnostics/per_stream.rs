//! Finds the streams of one tenant that deviate most from the tenant-wide
//! baseline.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::metrics::{AVG_BITRATE, AVG_BUFFER_HEALTH, AVG_FPS};
use super::{correlate, BaselineEvaluator, Deviation, MetricCorrelation, MetricMap, TENANT_WIDE};

pub const DEFAULT_MAX_ANOMALOUS_STREAMS: usize = 20;

/// One raw per-stream health record from the telemetry pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamHealthSample {
    #[serde(default)]
    pub stream_id: Option<String>,
    #[serde(default)]
    pub bitrate: f64,
    #[serde(default)]
    pub fps: f64,
    #[serde(default)]
    pub buffer_health: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamAnomaly {
    pub stream_id: String,
    pub max_sigma: f64,
    pub deviations: Vec<Deviation>,
    pub correlations: Vec<MetricCorrelation>,
}

#[derive(Debug, Clone)]
pub struct PerStreamAnalyzer {
    evaluator: Option<Arc<BaselineEvaluator>>,
    max_streams: usize,
}

impl PerStreamAnalyzer {
    pub fn new(evaluator: Arc<BaselineEvaluator>) -> Self {
        Self::with_limit(evaluator, DEFAULT_MAX_ANOMALOUS_STREAMS)
    }

    /// A zero limit falls back to [`DEFAULT_MAX_ANOMALOUS_STREAMS`].
    pub fn with_limit(evaluator: Arc<BaselineEvaluator>, max_streams: usize) -> Self {
        let max_streams = if max_streams == 0 {
            DEFAULT_MAX_ANOMALOUS_STREAMS
        } else {
            max_streams
        };
        Self {
            evaluator: Some(evaluator),
            max_streams,
        }
    }

    /// An analyzer without an evaluator. Always reports nothing.
    pub fn unconfigured() -> Self {
        Self {
            evaluator: None,
            max_streams: DEFAULT_MAX_ANOMALOUS_STREAMS,
        }
    }

    /// Rank the tenant's streams by how far their averaged metrics sit from
    /// the tenant-wide baseline, worst first.
    ///
    /// A stream whose deviations cannot be loaded is skipped; one bad stream
    /// never aborts the batch.
    pub async fn analyze(
        &self,
        tenant_id: &str,
        samples: &[Option<StreamHealthSample>],
    ) -> Vec<StreamAnomaly> {
        let Some(evaluator) = &self.evaluator else {
            return Vec::new();
        };
        if samples.is_empty() || !evaluator.is_configured() {
            return Vec::new();
        }

        let mut anomalies = Vec::new();
        for (stream_id, metrics) in group_by_stream(samples) {
            let deviations = match evaluator.deviations(tenant_id, TENANT_WIDE, &metrics).await {
                Ok(d) => d,
                Err(e) => {
                    warn!(tenant_id, stream_id = %stream_id, error = %e, "per-stream deviation check failed");
                    continue;
                }
            };
            if deviations.is_empty() {
                continue;
            }
            let max_sigma = deviations.iter().map(|d| d.sigma).fold(0.0, f64::max);
            let correlations = correlate(&deviations);
            anomalies.push(StreamAnomaly {
                stream_id,
                max_sigma,
                deviations,
                correlations,
            });
        }

        anomalies.sort_by(|a, b| b.max_sigma.total_cmp(&a.max_sigma));
        anomalies.truncate(self.max_streams);
        anomalies
    }
}

#[derive(Default)]
struct Sums {
    bitrate: f64,
    fps: f64,
    buffer_health: f64,
    count: usize,
}

/// Average each stream's samples into a metric map. Absent records and
/// records without a stream id are skipped.
pub(crate) fn group_by_stream(samples: &[Option<StreamHealthSample>]) -> BTreeMap<String, MetricMap> {
    let mut sums: BTreeMap<&str, Sums> = BTreeMap::new();
    for sample in samples.iter().flatten() {
        let Some(stream_id) = sample.stream_id.as_deref().filter(|s| !s.is_empty()) else {
            continue;
        };
        let s = sums.entry(stream_id).or_default();
        s.bitrate += sample.bitrate;
        s.fps += sample.fps;
        s.buffer_health += sample.buffer_health;
        s.count += 1;
    }

    sums.into_iter()
        .map(|(stream_id, s)| {
            let n = s.count as f64;
            let mut metrics = MetricMap::new();
            metrics.insert(AVG_BITRATE.to_string(), s.bitrate / n);
            metrics.insert(AVG_FPS.to_string(), s.fps / n);
            metrics.insert(AVG_BUFFER_HEALTH.to_string(), s.buffer_health / n);
            (stream_id.to_string(), metrics)
        })
        .collect()
}
