//! Matches sets of deviations against a fixed catalog of failure modes.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use super::metrics::*;
use super::{Deviation, Direction};

/// A known failure mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationPattern {
    NetworkDegradation,
    EncoderOverload,
    ViewerSideIssues,
    IngestInstability,
    CdnPressure,
}

impl CorrelationPattern {
    pub fn as_str(&self) -> &'static str {
        match self {
            CorrelationPattern::NetworkDegradation => "network_degradation",
            CorrelationPattern::EncoderOverload => "encoder_overload",
            CorrelationPattern::ViewerSideIssues => "viewer_side_issues",
            CorrelationPattern::IngestInstability => "ingest_instability",
            CorrelationPattern::CdnPressure => "cdn_pressure",
        }
    }

    /// Sentence-case label, e.g. "Encoder overload".
    pub fn label(&self) -> String {
        let spaced = self.as_str().replace('_', " ");
        let mut chars = spaced.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => spaced,
        }
    }
}

impl fmt::Display for CorrelationPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A matched failure hypothesis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricCorrelation {
    pub pattern: CorrelationPattern,
    pub confidence: f64,
    pub signals: Vec<String>,
    pub hypothesis: String,
}

#[derive(Debug, Clone, Copy)]
struct Signal {
    metric: &'static str,
    direction: Direction,
}

const fn above(metric: &'static str) -> Signal {
    Signal {
        metric,
        direction: Direction::Above,
    }
}

const fn below(metric: &'static str) -> Signal {
    Signal {
        metric,
        direction: Direction::Below,
    }
}

struct PatternDef {
    pattern: CorrelationPattern,
    signals: &'static [Signal],
    /// Alternatives for one extra expected signal; the first present one is
    /// credited once the fixed signals have matched at least twice.
    either: &'static [Signal],
    /// Metrics whose absence strengthens this hypothesis.
    absence_boost: &'static [&'static str],
}

impl PatternDef {
    fn expected(&self) -> usize {
        self.signals.len() + usize::from(!self.either.is_empty())
    }
}

const MIN_MATCHED: usize = 2;
const ABSENCE_BOOST: f64 = 0.1;

static CATALOG: &[PatternDef] = &[
    PatternDef {
        pattern: CorrelationPattern::NetworkDegradation,
        signals: &[
            above(AVG_PACKET_LOSS),
            below(AVG_BANDWIDTH_IN),
            below(AVG_BUFFER_HEALTH),
        ],
        either: &[],
        absence_boost: &[],
    },
    PatternDef {
        pattern: CorrelationPattern::EncoderOverload,
        signals: &[below(AVG_FPS), below(AVG_BITRATE)],
        either: &[],
        absence_boost: &[AVG_PACKET_LOSS],
    },
    PatternDef {
        pattern: CorrelationPattern::ViewerSideIssues,
        signals: &[below(AVG_BUFFER_HEALTH), above(TOTAL_REBUFFER_COUNT)],
        either: &[],
        absence_boost: &[AVG_BANDWIDTH_OUT],
    },
    PatternDef {
        pattern: CorrelationPattern::IngestInstability,
        signals: &[
            below(AVG_BITRATE),
            below(AVG_FPS),
            above(TOTAL_ISSUE_COUNT),
        ],
        either: &[],
        absence_boost: &[],
    },
    PatternDef {
        pattern: CorrelationPattern::CdnPressure,
        signals: &[above(AVG_BANDWIDTH_OUT), above(ACTIVE_SESSIONS)],
        either: &[above(TOTAL_REBUFFER_COUNT), below(AVG_BUFFER_HEALTH)],
        absence_boost: &[],
    },
];

/// Match deviations to known failure hypotheses.
///
/// Pure function. Patterns are evaluated independently and returned in
/// catalog order; several may match the same deviation set.
pub fn correlate(deviations: &[Deviation]) -> Vec<MetricCorrelation> {
    if deviations.is_empty() {
        return Vec::new();
    }

    let by_signal: HashMap<(&str, Direction), &Deviation> = deviations
        .iter()
        .map(|d| ((d.metric.as_str(), d.direction), d))
        .collect();
    let deviated: HashSet<&str> = deviations.iter().map(|d| d.metric.as_str()).collect();
    let lookup = |s: &Signal| by_signal.get(&(s.metric, s.direction)).copied();

    let mut results = Vec::new();
    for def in CATALOG {
        let fixed: Vec<&Deviation> = def.signals.iter().filter_map(lookup).collect();
        let mut matched = fixed.clone();
        if matched.len() >= MIN_MATCHED {
            if let Some(d) = def.either.iter().find_map(lookup) {
                matched.push(d);
            }
        }
        if matched.len() < MIN_MATCHED {
            continue;
        }

        let mut confidence = matched.len() as f64 / def.expected() as f64;
        for metric in def.absence_boost {
            if !deviated.contains(metric) {
                confidence = (confidence + ABSENCE_BOOST).min(1.0);
            }
        }

        results.push(MetricCorrelation {
            pattern: def.pattern,
            confidence,
            signals: matched.iter().map(|d| d.to_string()).collect(),
            hypothesis: hypothesis(def.pattern, &fixed),
        });
    }
    results
}

/// Built from the fixed signals only; a credited alternative shows up in
/// `signals` but not here.
fn hypothesis(pattern: CorrelationPattern, matched: &[&Deviation]) -> String {
    let parts: Vec<String> = matched
        .iter()
        .map(|d| format!("{} {:.1}σ {} baseline", d.metric, d.sigma, d.direction))
        .collect();
    format!("{}: {}", pattern.label(), parts.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dev(metric: &str, sigma: f64, direction: Direction) -> Deviation {
        Deviation {
            metric: metric.to_string(),
            current: 0.0,
            baseline: 0.0,
            standard_deviation: 1.0,
            sigma,
            direction,
        }
    }

    fn find(results: &[MetricCorrelation], pattern: CorrelationPattern) -> Option<&MetricCorrelation> {
        results.iter().find(|r| r.pattern == pattern)
    }

    #[test]
    fn test_correlate_empty() {
        assert!(correlate(&[]).is_empty());
        assert!(correlate(&Vec::new()).is_empty());
    }

    #[test]
    fn test_network_degradation_partial_match() {
        let devs = vec![
            dev(AVG_PACKET_LOSS, 8.0, Direction::Above),
            dev(AVG_BUFFER_HEALTH, 5.0, Direction::Below),
        ];
        let results = correlate(&devs);
        let r = find(&results, CorrelationPattern::NetworkDegradation).expect("network_degradation");
        assert!((r.confidence - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(r.signals.len(), 2);
        assert_eq!(
            r.hypothesis,
            "Network degradation: avg_packet_loss 8.0σ above baseline, avg_buffer_health 5.0σ below baseline"
        );
    }

    #[test]
    fn test_encoder_overload_absence_boost() {
        let devs = vec![
            dev(AVG_FPS, 10.0, Direction::Below),
            dev(AVG_BITRATE, 12.5, Direction::Below),
        ];
        let results = correlate(&devs);
        let r = find(&results, CorrelationPattern::EncoderOverload).expect("encoder_overload");
        // Complete match plus a capped boost.
        assert_eq!(r.confidence, 1.0);
        // fps and bitrate are two of ingest instability's three signals.
        let ingest = find(&results, CorrelationPattern::IngestInstability).expect("ingest_instability");
        assert!((ingest.confidence - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_encoder_overload_without_boost_when_packet_loss_deviates() {
        let devs = vec![
            dev(AVG_FPS, 10.0, Direction::Below),
            dev(AVG_BITRATE, 12.5, Direction::Below),
            dev(AVG_PACKET_LOSS, 3.0, Direction::Above),
        ];
        let results = correlate(&devs);
        let r = find(&results, CorrelationPattern::EncoderOverload).unwrap();
        assert_eq!(r.confidence, 1.0);
    }

    #[test]
    fn test_viewer_side_boost_applies_to_partial_base() {
        let devs = vec![
            dev(AVG_BUFFER_HEALTH, 4.0, Direction::Below),
            dev(TOTAL_REBUFFER_COUNT, 6.0, Direction::Above),
        ];
        let results = correlate(&devs);
        let r = find(&results, CorrelationPattern::ViewerSideIssues).unwrap();
        assert_eq!(r.confidence, 1.0);

        let mut with_bandwidth = devs.clone();
        with_bandwidth.push(dev(AVG_BANDWIDTH_OUT, 3.0, Direction::Below));
        let results = correlate(&with_bandwidth);
        let r = find(&results, CorrelationPattern::ViewerSideIssues).unwrap();
        assert_eq!(r.confidence, 1.0);
    }

    #[test]
    fn test_cdn_pressure_flexible_signal() {
        let devs = vec![
            dev(AVG_BANDWIDTH_OUT, 5.0, Direction::Above),
            dev(ACTIVE_SESSIONS, 20.0, Direction::Above),
        ];
        let r = find(&correlate(&devs), CorrelationPattern::CdnPressure).cloned().unwrap();
        assert!((r.confidence - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(r.signals.len(), 2);

        let mut with_rebuffer = devs.clone();
        with_rebuffer.push(dev(AVG_BUFFER_HEALTH, 3.0, Direction::Below));
        with_rebuffer.push(dev(TOTAL_REBUFFER_COUNT, 8.3, Direction::Above));
        let r = find(&correlate(&with_rebuffer), CorrelationPattern::CdnPressure).cloned().unwrap();
        assert_eq!(r.confidence, 1.0);
        assert_eq!(r.signals.len(), 3);
        // Rebuffer count is preferred over buffer health.
        assert!(r.signals[2].starts_with(TOTAL_REBUFFER_COUNT));
        assert_eq!(
            r.hypothesis,
            "Cdn pressure: avg_bandwidth_out 5.0σ above baseline, active_sessions 20.0σ above baseline"
        );

        let mut with_buffer = devs;
        with_buffer.push(dev(AVG_BUFFER_HEALTH, 3.0, Direction::Below));
        let r = find(&correlate(&with_buffer), CorrelationPattern::CdnPressure).cloned().unwrap();
        assert!(r.signals[2].starts_with(AVG_BUFFER_HEALTH));
    }

    #[test]
    fn test_cdn_pressure_needs_two_fixed_signals() {
        let devs = vec![
            dev(AVG_BANDWIDTH_OUT, 5.0, Direction::Above),
            dev(TOTAL_REBUFFER_COUNT, 8.3, Direction::Above),
        ];
        assert!(find(&correlate(&devs), CorrelationPattern::CdnPressure).is_none());
    }

    #[test]
    fn test_single_signal_never_matches() {
        let devs = vec![dev(AVG_FPS, 5.0, Direction::Below)];
        assert!(correlate(&devs).is_empty());
    }

    #[test]
    fn test_wrong_direction_does_not_match() {
        let devs = vec![
            dev(AVG_FPS, 5.0, Direction::Above),
            dev(AVG_BITRATE, 5.0, Direction::Above),
        ];
        assert!(correlate(&devs).is_empty());
    }

    #[test]
    fn test_unknown_metrics_ignored() {
        let devs = vec![
            dev("cpu_temp", 9.0, Direction::Above),
            dev("disk_io", 9.0, Direction::Above),
        ];
        assert!(correlate(&devs).is_empty());
    }

    #[test]
    fn test_overlapping_patterns() {
        let devs = vec![
            dev(AVG_FPS, 10.0, Direction::Below),
            dev(AVG_BITRATE, 12.5, Direction::Below),
            dev(AVG_BUFFER_HEALTH, 5.0, Direction::Below),
            dev(TOTAL_REBUFFER_COUNT, 15.0, Direction::Above),
        ];
        let results = correlate(&devs);
        assert!(find(&results, CorrelationPattern::EncoderOverload).is_some());
        assert!(find(&results, CorrelationPattern::ViewerSideIssues).is_some());
        // Catalog order is preserved.
        let order: Vec<_> = results.iter().map(|r| r.pattern).collect();
        assert_eq!(
            order,
            vec![
                CorrelationPattern::EncoderOverload,
                CorrelationPattern::ViewerSideIssues,
                CorrelationPattern::IngestInstability,
            ]
        );
    }

    #[test]
    fn test_pattern_label() {
        assert_eq!(CorrelationPattern::CdnPressure.label(), "Cdn pressure");
        assert_eq!(CorrelationPattern::ViewerSideIssues.to_string(), "viewer_side_issues");
    }
}
