//! Hard-limit checks that produce [`ThresholdViolation`]s.

use super::snapshot::HealthSnapshot;
use crate::config::ThresholdConfig;
use crate::diagnostics::metrics::*;
use crate::diagnostics::ThresholdViolation;

/// Checks a snapshot against operator-configured limits. No side effects;
/// the heartbeat decides what to do with the violations.
#[derive(Debug, Clone, Default)]
pub struct ThresholdTrigger {
    limits: ThresholdConfig,
}

impl ThresholdTrigger {
    pub fn new(limits: ThresholdConfig) -> Self {
        Self { limits }
    }

    pub fn check(&self, snapshot: &HealthSnapshot) -> Vec<ThresholdViolation> {
        let Some(health) = &snapshot.health else {
            return Vec::new();
        };
        if self.limits.consider_active_only && snapshot.active_streams == 0 {
            return Vec::new();
        }
        let l = &self.limits;
        let mut violations = Vec::new();

        // Zero readings mean "not reported", not "collapsed".
        if health.avg_buffer_health > 0.0 && health.avg_buffer_health < l.warning_buffer_health {
            violations.push(ThresholdViolation {
                metric: AVG_BUFFER_HEALTH.to_string(),
                value: health.avg_buffer_health,
                limit: l.warning_buffer_health,
                message: format!(
                    "buffer health {:.2} < {:.2}",
                    health.avg_buffer_health, l.warning_buffer_health
                ),
            });
        }
        if health.avg_fps > 0.0 && health.avg_fps < l.warning_fps {
            violations.push(ThresholdViolation {
                metric: AVG_FPS.to_string(),
                value: health.avg_fps,
                limit: l.warning_fps,
                message: format!("avg FPS {:.2} < {:.2}", health.avg_fps, l.warning_fps),
            });
        }
        if health.avg_bitrate > 0.0 && health.avg_bitrate < l.warning_bitrate {
            violations.push(ThresholdViolation {
                metric: AVG_BITRATE.to_string(),
                value: health.avg_bitrate,
                limit: l.warning_bitrate,
                message: format!(
                    "avg bitrate {:.2} < {:.2}",
                    health.avg_bitrate, l.warning_bitrate
                ),
            });
        }
        if health.total_issue_count >= l.warning_issue_count {
            violations.push(ThresholdViolation {
                metric: TOTAL_ISSUE_COUNT.to_string(),
                value: health.total_issue_count as f64,
                limit: l.warning_issue_count as f64,
                message: format!(
                    "issue count {} >= {}",
                    health.total_issue_count, l.warning_issue_count
                ),
            });
        }
        if let Some(qoe) = &snapshot.client_qoe {
            if qoe.avg_packet_loss_rate >= l.warning_packet_loss {
                violations.push(ThresholdViolation {
                    metric: AVG_PACKET_LOSS.to_string(),
                    value: qoe.avg_packet_loss_rate,
                    limit: l.warning_packet_loss,
                    message: format!(
                        "packet loss {:.4} >= {:.4}",
                        qoe.avg_packet_loss_rate, l.warning_packet_loss
                    ),
                });
            }
        }
        violations
    }
}
