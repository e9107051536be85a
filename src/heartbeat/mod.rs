//! One diagnostics cycle per tenant snapshot: baseline deviations,
//! threshold checks, correlation, triage, then dispatch.

pub mod snapshot;
pub mod thresholds;

pub use snapshot::{ClientQoeSummary, HealthSnapshot, StreamHealthSummary};
pub use thresholds::ThresholdTrigger;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::diagnostics::{
    correlate, triage, BaselineEvaluator, FlagGate, PerStreamAnalyzer, StreamAnomaly,
    StreamHealthSample, TriageAction, TriageCooldown, TriageResult, TENANT_WIDE,
};
use crate::storage::TriageJournal;

/// What one heartbeat decided for a tenant.
#[derive(Debug, Clone, Serialize)]
pub struct HeartbeatOutcome {
    pub tenant_id: String,
    pub triage: TriageResult,
    pub stream_anomalies: Vec<StreamAnomaly>,
    /// False when the result was ok or a flag was held back by the cooldown.
    pub surfaced: bool,
    pub report: String,
}

pub struct Heartbeat {
    evaluator: Arc<BaselineEvaluator>,
    thresholds: ThresholdTrigger,
    cooldown: Option<TriageCooldown>,
    analyzer: PerStreamAnalyzer,
    journal: Option<TriageJournal>,
    stale_max_age: Duration,
}

impl Heartbeat {
    pub fn new(evaluator: Arc<BaselineEvaluator>, thresholds: ThresholdTrigger) -> Self {
        Self {
            analyzer: PerStreamAnalyzer::new(evaluator.clone()),
            evaluator,
            thresholds,
            cooldown: None,
            journal: None,
            stale_max_age: AppConfig::default().diagnostics.stale_baseline_max_age(),
        }
    }

    /// Wire every component from configuration.
    pub fn from_config(
        config: &AppConfig,
        evaluator: Arc<BaselineEvaluator>,
        journal: Option<TriageJournal>,
    ) -> Self {
        let d = &config.diagnostics;
        Self {
            analyzer: PerStreamAnalyzer::with_limit(evaluator.clone(), d.max_anomalous_streams),
            evaluator,
            thresholds: ThresholdTrigger::new(config.thresholds.clone()),
            cooldown: Some(TriageCooldown::new(d.flag_cooldown())),
            journal,
            stale_max_age: d.stale_baseline_max_age(),
        }
    }

    pub fn with_cooldown(mut self, cooldown: TriageCooldown) -> Self {
        self.cooldown = Some(cooldown);
        self
    }

    pub fn with_journal(mut self, journal: TriageJournal) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn evaluator(&self) -> &Arc<BaselineEvaluator> {
        &self.evaluator
    }

    pub fn analyzer(&self) -> &PerStreamAnalyzer {
        &self.analyzer
    }

    /// Forget tenants whose flag cooldown has elapsed.
    pub fn prune_cooldown(&self) -> usize {
        self.cooldown.as_ref().map_or(0, TriageCooldown::prune)
    }

    /// Run the full cycle for one snapshot.
    ///
    /// Deviations are measured against the baseline as it stood before this
    /// snapshot, so the reading under test never dilutes its own reference.
    pub async fn process_tenant(
        &self,
        snapshot: &HealthSnapshot,
        streams: &[Option<StreamHealthSample>],
    ) -> Result<HeartbeatOutcome> {
        let tenant_id = snapshot.tenant_id.as_str();
        let metrics = snapshot.metric_map();

        let deviations = match self
            .evaluator
            .deviations(tenant_id, TENANT_WIDE, &metrics)
            .await
        {
            Ok(d) => d,
            Err(e) => {
                warn!(tenant_id, error = %e, "baseline deviation check failed");
                Vec::new()
            }
        };
        if let Err(e) = self.evaluator.update(tenant_id, TENANT_WIDE, &metrics).await {
            warn!(tenant_id, error = %e, "baseline update failed");
        }

        let violations = self.thresholds.check(snapshot);
        let correlations = correlate(&deviations);
        let result = triage(violations, deviations, correlations);

        if let Err(e) = self.evaluator.cleanup(tenant_id, self.stale_max_age).await {
            warn!(tenant_id, error = %e, "stale baseline cleanup failed");
        }

        let stream_anomalies = if result.action != TriageAction::Ok {
            self.analyzer.analyze(tenant_id, streams).await
        } else {
            Vec::new()
        };

        let surfaced = match result.action {
            TriageAction::Ok => false,
            TriageAction::Investigate => true,
            TriageAction::Flag => self.cooldown.should_flag(tenant_id),
        };

        let report = result.format_report();
        let trigger = result.trigger_str();
        match (result.action, surfaced) {
            (TriageAction::Investigate, _) => info!(
                tenant_id,
                action = %result.action,
                %trigger,
                reason = %result.reason,
                anomalous_streams = stream_anomalies.len(),
                "HEARTBEAT_INVESTIGATION"
            ),
            (TriageAction::Flag, true) => info!(
                tenant_id,
                action = %result.action,
                %trigger,
                reason = %result.reason,
                anomalous_streams = stream_anomalies.len(),
                "HEARTBEAT_FLAG"
            ),
            (TriageAction::Flag, false) => debug!(
                tenant_id,
                reason = %result.reason,
                "flag suppressed by cooldown"
            ),
            (TriageAction::Ok, _) => debug!(tenant_id, "HEARTBEAT_OK"),
        }

        if surfaced {
            if let Some(journal) = &self.journal {
                let journal = journal.clone();
                let tenant = tenant_id.to_string();
                let recorded = result.clone();
                let anomalies = stream_anomalies.clone();
                let written = tokio::task::spawn_blocking(move || {
                    journal.record(&tenant, &recorded, &anomalies)
                })
                .await
                .context("journal task panicked")?;
                if let Err(e) = written {
                    warn!(tenant_id, error = %e, "failed to journal triage result");
                }
            }
        }

        Ok(HeartbeatOutcome {
            tenant_id: tenant_id.to_string(),
            triage: result,
            stream_anomalies,
            surfaced,
            report,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::metrics::{AVG_BITRATE, AVG_FPS};
    use crate::diagnostics::{BaselineMetric, BaselineStore, StoreError, TriageTrigger};
    use std::collections::HashMap;
    use crate::storage::{test_pool, MemoryBaselineStore};

    fn snapshot(fps: f64, bitrate: f64) -> HealthSnapshot {
        HealthSnapshot {
            tenant_id: "t1".to_string(),
            active_streams: 4,
            health: Some(StreamHealthSummary {
                avg_bitrate: bitrate,
                avg_fps: fps,
                avg_buffer_health: 3.0,
                total_rebuffer_count: 0,
                total_issue_count: 0,
            }),
            client_qoe: None,
        }
    }

    fn heartbeat() -> Heartbeat {
        let store = Arc::new(MemoryBaselineStore::new());
        let evaluator = Arc::new(BaselineEvaluator::new(store, 2.0, 5));
        Heartbeat::new(evaluator, ThresholdTrigger::default())
            .with_cooldown(TriageCooldown::default())
    }

    /// Ten healthy cycles with a little jitter so every baseline has variance.
    async fn warm_up(hb: &Heartbeat) {
        for i in 0..10 {
            let jitter = if i % 2 == 0 { 0.5 } else { -0.5 };
            let out = hb
                .process_tenant(&snapshot(30.0 + jitter, 5e6 + jitter * 1e4), &[])
                .await
                .unwrap();
            assert_eq!(out.triage.action, TriageAction::Ok);
            assert!(!out.surfaced);
        }
    }

    #[tokio::test]
    async fn test_first_cycle_is_ok() {
        let hb = heartbeat();
        let out = hb.process_tenant(&snapshot(30.0, 5e6), &[]).await.unwrap();
        assert_eq!(out.triage.action, TriageAction::Ok);
        assert!(out.triage.deviations.is_empty());
        assert!(out.report.starts_with("Action: ok"));
    }

    #[tokio::test]
    async fn test_deviation_measured_before_update() {
        let hb = heartbeat();
        warm_up(&hb).await;

        let out = hb.process_tenant(&snapshot(30.0, 2e6), &[]).await.unwrap();
        assert_eq!(out.triage.action, TriageAction::Flag);
        assert_eq!(out.triage.trigger, Some(TriageTrigger::Baseline));
        let dev = &out.triage.deviations[0];
        assert_eq!(dev.metric, AVG_BITRATE);
        // Baseline still reflects only the warm-up readings.
        assert!((dev.baseline - 5e6).abs() < 1.0);
        assert!(out.surfaced);
    }

    #[tokio::test]
    async fn test_repeated_flag_is_suppressed() {
        let hb = heartbeat();
        warm_up(&hb).await;

        let first = hb.process_tenant(&snapshot(30.0, 2e6), &[]).await.unwrap();
        assert!(first.surfaced);
        let second = hb.process_tenant(&snapshot(30.0, 2e6), &[]).await.unwrap();
        assert_eq!(second.triage.action, TriageAction::Flag);
        assert!(!second.surfaced);
        // Window still open, nothing to prune.
        assert_eq!(hb.prune_cooldown(), 0);
    }

    #[tokio::test]
    async fn test_investigation_bypasses_cooldown() {
        let hb = heartbeat();
        warm_up(&hb).await;

        // FPS and bitrate drop together, both still above the hard limits.
        for _ in 0..2 {
            let out = hb.process_tenant(&snapshot(28.0, 2e6), &[]).await.unwrap();
            assert_eq!(out.triage.action, TriageAction::Investigate);
            assert_eq!(out.triage.trigger, Some(TriageTrigger::Correlation));
            assert!(out.triage.reason.starts_with("Encoder overload: "));
            assert!(out.surfaced);
        }
    }

    #[tokio::test]
    async fn test_threshold_violation_investigates() {
        let hb = heartbeat();
        let out = hb.process_tenant(&snapshot(12.0, 5e6), &[]).await.unwrap();
        assert_eq!(out.triage.action, TriageAction::Investigate);
        assert_eq!(out.triage.trigger, Some(TriageTrigger::Threshold));
        assert_eq!(out.triage.reason, "avg FPS 12.00 < 24.00");
        assert_eq!(out.triage.violations[0].metric, AVG_FPS);
    }

    #[tokio::test]
    async fn test_streams_analyzed_only_when_not_ok() {
        let hb = heartbeat();
        warm_up(&hb).await;

        let streams = vec![
            Some(StreamHealthSample {
                stream_id: Some("bad".to_string()),
                bitrate: 1e6,
                fps: 30.0,
                buffer_health: 3.0,
            }),
            None,
        ];
        let ok = hb
            .process_tenant(&snapshot(30.0, 5e6), &streams)
            .await
            .unwrap();
        assert!(ok.stream_anomalies.is_empty());

        let flagged = hb
            .process_tenant(&snapshot(30.0, 2e6), &streams)
            .await
            .unwrap();
        assert_eq!(flagged.stream_anomalies.len(), 1);
        assert_eq!(flagged.stream_anomalies[0].stream_id, "bad");
    }

    #[tokio::test]
    async fn test_surfaced_results_are_journaled() {
        let (_dir, pool) = test_pool();
        let journal = TriageJournal::new(pool);
        let hb = heartbeat().with_journal(journal.clone());
        warm_up(&hb).await;

        // Second flag is held back by the cooldown and never recorded.
        hb.process_tenant(&snapshot(30.0, 2e6), &[]).await.unwrap();
        hb.process_tenant(&snapshot(30.0, 2e6), &[]).await.unwrap();

        let entries = journal.list_recent(10).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].tenant_id, "t1");
        assert_eq!(entries[0].result.action, TriageAction::Flag);
    }

    #[tokio::test]
    async fn test_unconfigured_evaluator_still_checks_thresholds() {
        let hb = Heartbeat::new(
            Arc::new(BaselineEvaluator::unconfigured()),
            ThresholdTrigger::default(),
        );
        let out = hb.process_tenant(&snapshot(12.0, 5e6), &[]).await.unwrap();
        assert_eq!(out.triage.action, TriageAction::Investigate);
        assert!(out.triage.deviations.is_empty());
        assert!(out.surfaced);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_heartbeats_keep_every_sample() {
        let (_dir, pool) = test_pool();
        let store = Arc::new(crate::storage::SqliteBaselineStore::new(pool));
        let evaluator = Arc::new(BaselineEvaluator::new(store.clone(), 2.0, 5));
        let hb = Arc::new(Heartbeat::new(evaluator, ThresholdTrigger::default()));

        let mut handles = Vec::new();
        for _ in 0..50 {
            let hb = hb.clone();
            handles.push(tokio::spawn(async move {
                hb.process_tenant(&snapshot(30.0, 5e6), &[]).await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }

        let stored = store.get("t1", TENANT_WIDE).await.unwrap();
        assert_eq!(stored[AVG_FPS].sample_count, 50);
        assert_eq!(stored[AVG_BITRATE].sample_count, 50);
    }

    #[tokio::test]
    async fn test_out_of_range_stale_age_does_not_abort_cycle() {
        let mut config = AppConfig::default();
        config.diagnostics.stale_baseline_max_age_hours = 100_000_000_000;
        let store = Arc::new(MemoryBaselineStore::new());
        let evaluator = Arc::new(BaselineEvaluator::new(store.clone(), 2.0, 5));
        let hb = Heartbeat::from_config(&config, evaluator, None);

        let out = hb.process_tenant(&snapshot(30.0, 5e6), &[]).await.unwrap();
        assert_eq!(out.triage.action, TriageAction::Ok);
        assert_eq!(store.row_count("t1"), 5);
    }

    struct UnavailableStore;

    #[async_trait::async_trait]
    impl BaselineStore for UnavailableStore {
        async fn get(
            &self,
            _: &str,
            _: &str,
        ) -> Result<HashMap<String, BaselineMetric>, StoreError> {
            Err(StoreError::Unavailable)
        }

        async fn upsert(
            &self,
            _: &str,
            _: &str,
            _: &HashMap<String, BaselineMetric>,
        ) -> Result<(), StoreError> {
            Err(StoreError::Unavailable)
        }

        async fn cleanup_stale(&self, _: &str, _: Duration) -> Result<u64, StoreError> {
            Err(StoreError::Unavailable)
        }
    }

    #[tokio::test]
    async fn test_store_failures_degrade_to_thresholds_only() {
        let evaluator = Arc::new(BaselineEvaluator::new(Arc::new(UnavailableStore), 2.0, 5));
        let hb = Heartbeat::new(evaluator, ThresholdTrigger::default());

        let ok = hb.process_tenant(&snapshot(30.0, 5e6), &[]).await.unwrap();
        assert_eq!(ok.triage.action, TriageAction::Ok);

        let bad = hb.process_tenant(&snapshot(12.0, 5e6), &[]).await.unwrap();
        assert_eq!(bad.triage.trigger, Some(TriageTrigger::Threshold));
    }
}
