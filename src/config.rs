//! TOML configuration for the streamhealth daemon and CLI.
//!
//! Every section is optional and falls back to compiled-in defaults. The
//! file is looked up from an explicit path, then the `STREAMHEALTH_CONFIG`
//! environment variable, then the standard system location.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::diagnostics::baseline::{DEFAULT_MIN_SAMPLES, DEFAULT_SIGMA_LIMIT};
use crate::diagnostics::per_stream::DEFAULT_MAX_ANOMALOUS_STREAMS;

pub const CONFIG_ENV: &str = "STREAMHEALTH_CONFIG";
pub const SYSTEM_CONFIG_PATH: &str = "/etc/streamhealth/streamhealth.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,
    #[serde(default)]
    pub thresholds: ThresholdConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// An explicit path must load. Without one, try `STREAMHEALTH_CONFIG`,
    /// then the system path, then defaults.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "STREAMHEALTH_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let system_path = Path::new(SYSTEM_CONFIG_PATH);
        if system_path.exists() {
            match Self::load(system_path) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => {
                    warn!(
                        path = %system_path.display(),
                        error = %e,
                        "system config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Ok(Self::default())
    }
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the SQLite database file.
    pub db_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: "data/streamhealth.db".to_string(),
        }
    }
}

/// Statistical and policy knobs for the diagnostics engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsConfig {
    /// Standard deviations from baseline that count as a deviation.
    pub sigma_limit: f64,
    /// Samples a baseline needs before it can judge a reading.
    pub min_samples: u64,
    /// Window during which repeated flag notifications are suppressed.
    pub flag_cooldown_secs: u64,
    /// Cap on streams reported by the per-stream analyzer.
    pub max_anomalous_streams: usize,
    /// Baselines not updated for this long are removed.
    pub stale_baseline_max_age_hours: u64,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            sigma_limit: DEFAULT_SIGMA_LIMIT,
            min_samples: DEFAULT_MIN_SAMPLES,
            flag_cooldown_secs: 2 * 60 * 60,
            max_anomalous_streams: DEFAULT_MAX_ANOMALOUS_STREAMS,
            stale_baseline_max_age_hours: 7 * 24,
        }
    }
}

impl DiagnosticsConfig {
    pub fn flag_cooldown(&self) -> Duration {
        Duration::from_secs(self.flag_cooldown_secs)
    }

    pub fn stale_baseline_max_age(&self) -> Duration {
        Duration::from_secs(self.stale_baseline_max_age_hours.saturating_mul(3600))
    }
}

/// Hard operational limits checked against each tenant snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    pub warning_buffer_health: f64,
    pub warning_fps: f64,
    pub warning_bitrate: f64,
    pub warning_issue_count: u64,
    pub warning_packet_loss: f64,
    /// Skip threshold checks for tenants with no active streams.
    pub consider_active_only: bool,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            warning_buffer_health: 1.5,
            warning_fps: 24.0,
            warning_bitrate: 800_000.0,
            warning_issue_count: 1,
            warning_packet_loss: 0.02,
            consider_active_only: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.diagnostics.sigma_limit, 2.0);
        assert_eq!(cfg.diagnostics.min_samples, 5);
        assert_eq!(cfg.diagnostics.flag_cooldown(), Duration::from_secs(7200));
        assert_eq!(cfg.diagnostics.max_anomalous_streams, 20);
        assert_eq!(
            cfg.diagnostics.stale_baseline_max_age(),
            Duration::from_secs(7 * 24 * 3600)
        );
        assert_eq!(cfg.thresholds.warning_fps, 24.0);
        assert_eq!(cfg.logging.format, LogFormat::Text);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let cfg: AppConfig = toml::from_str(
            r#"
            [diagnostics]
            sigma_limit = 3.0
            max_anomalous_streams = 5

            [logging]
            format = "json"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.diagnostics.sigma_limit, 3.0);
        assert_eq!(cfg.diagnostics.max_anomalous_streams, 5);
        assert_eq!(cfg.diagnostics.min_samples, 5);
        assert_eq!(cfg.logging.format, LogFormat::Json);
        assert_eq!(cfg.logging.level, "info");
        assert_eq!(cfg.server.bind, "0.0.0.0:8080");
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[storage]\ndb_path = \"/tmp/x.db\"").unwrap();
        let cfg = AppConfig::resolve(Some(file.path())).unwrap();
        assert_eq!(cfg.storage.db_path, "/tmp/x.db");
    }

    #[test]
    fn test_explicit_missing_file_is_an_error() {
        assert!(AppConfig::resolve(Some(Path::new("/nonexistent/streamhealth.toml"))).is_err());
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[diagnostics\nsigma_limit = ").unwrap();
        assert!(AppConfig::load(file.path()).is_err());
    }
}
