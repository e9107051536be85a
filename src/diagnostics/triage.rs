//! Deterministic triage over thresholds, deviations and correlations.

use std::fmt::{self, Write as _};

use serde::{Deserialize, Serialize};

use super::{Deviation, MetricCorrelation};

/// Correlations at or above this confidence warrant an investigation.
pub const INVESTIGATE_CONFIDENCE: f64 = 0.5;

/// A metric that crossed a hard operational limit. Produced elsewhere.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdViolation {
    pub metric: String,
    pub value: f64,
    pub limit: f64,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriageAction {
    Ok,
    Flag,
    Investigate,
}

impl fmt::Display for TriageAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TriageAction::Ok => "ok",
            TriageAction::Flag => "flag",
            TriageAction::Investigate => "investigate",
        })
    }
}

/// Which rule produced a non-ok action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriageTrigger {
    Threshold,
    Baseline,
    Correlation,
}

impl fmt::Display for TriageTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TriageTrigger::Threshold => "threshold",
            TriageTrigger::Baseline => "baseline",
            TriageTrigger::Correlation => "correlation",
        })
    }
}

/// The decision plus everything that led to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriageResult {
    pub action: TriageAction,
    /// `None` only when the action is `Ok`.
    pub trigger: Option<TriageTrigger>,
    pub reason: String,
    pub violations: Vec<ThresholdViolation>,
    pub deviations: Vec<Deviation>,
    pub correlations: Vec<MetricCorrelation>,
}

impl TriageResult {
    pub fn trigger_str(&self) -> String {
        self.trigger.map(|t| t.to_string()).unwrap_or_default()
    }

    /// Multi-line summary for humans.
    pub fn format_report(&self) -> String {
        let mut b = String::new();
        // Writing into a String cannot fail.
        let _ = writeln!(b, "Action: {}", self.action);
        let _ = writeln!(b, "Trigger: {}", self.trigger_str());
        let _ = writeln!(b, "Reason: {}", self.reason);
        if !self.violations.is_empty() {
            b.push_str("\nThreshold Violations:\n");
            for v in &self.violations {
                let _ = writeln!(b, "- {}", v.message);
            }
        }
        if !self.deviations.is_empty() {
            b.push_str("\nBaseline Deviations:\n");
            for d in &self.deviations {
                let _ = writeln!(b, "- {d}");
            }
        }
        if !self.correlations.is_empty() {
            b.push_str("\nCorrelations:\n");
            for c in &self.correlations {
                let _ = writeln!(b, "- {} (confidence {:.2})", c.hypothesis, c.confidence);
            }
        }
        b
    }
}

/// Decide what to do. The first matching rule wins:
///
/// 1. any threshold violation investigates;
/// 2. the first correlation with confidence >= 0.5 investigates;
/// 3. two or more deviations flag;
/// 4. a single deviation flags;
/// 5. otherwise everything is ok.
pub fn triage(
    violations: Vec<ThresholdViolation>,
    deviations: Vec<Deviation>,
    correlations: Vec<MetricCorrelation>,
) -> TriageResult {
    let (action, trigger, reason) = decide(&violations, &deviations, &correlations);
    TriageResult {
        action,
        trigger,
        reason,
        violations,
        deviations,
        correlations,
    }
}

fn decide(
    violations: &[ThresholdViolation],
    deviations: &[Deviation],
    correlations: &[MetricCorrelation],
) -> (TriageAction, Option<TriageTrigger>, String) {
    if !violations.is_empty() {
        let messages: Vec<&str> = violations.iter().map(|v| v.message.as_str()).collect();
        return (
            TriageAction::Investigate,
            Some(TriageTrigger::Threshold),
            messages.join(", "),
        );
    }

    if let Some(c) = correlations
        .iter()
        .find(|c| c.confidence >= INVESTIGATE_CONFIDENCE)
    {
        return (
            TriageAction::Investigate,
            Some(TriageTrigger::Correlation),
            c.hypothesis.clone(),
        );
    }

    match deviations {
        [] => (
            TriageAction::Ok,
            None,
            "all metrics within baseline".to_string(),
        ),
        [only] => (TriageAction::Flag, Some(TriageTrigger::Baseline), only.to_string()),
        many => (
            TriageAction::Flag,
            Some(TriageTrigger::Baseline),
            format!("{} metrics deviated from baseline", many.len()),
        ),
    }
}
