use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use streamhealth::config::AppConfig;
use streamhealth::diagnostics::{StreamHealthSample, TENANT_WIDE};
use streamhealth::heartbeat::HealthSnapshot;

#[derive(Parser)]
#[command(
    name = "streamhealth",
    about = "Deterministic health diagnostics for live streaming",
    version,
    long_about = None
)]
struct Cli {
    /// Path to a TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database path (overrides [storage] db_path)
    #[arg(long, global = true)]
    db: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon (HTTP API)
    Serve {
        /// Bind address (overrides [server] bind)
        #[arg(long)]
        bind: Option<String>,
    },

    /// Run one heartbeat cycle for a snapshot file and print the triage report
    Check {
        /// Tenant the snapshot belongs to
        #[arg(long)]
        tenant: String,

        /// JSON file holding a tenant health snapshot
        #[arg(long)]
        snapshot: PathBuf,

        /// JSON file holding an array of per-stream health samples
        #[arg(long)]
        streams: Option<PathBuf>,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Print stored baselines for a tenant
    Baselines {
        #[arg(long)]
        tenant: String,

        /// Stream id; omit for the tenant-wide baseline
        #[arg(long)]
        stream: Option<String>,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Remove baselines not updated recently
    Cleanup {
        #[arg(long)]
        tenant: String,

        /// Maximum age in hours (defaults to [diagnostics] stale_baseline_max_age_hours)
        #[arg(long)]
        max_age_hours: Option<u64>,
    },
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::resolve(cli.config.as_deref())?;
    if let Some(db) = cli.db {
        config.storage.db_path = db;
    }
    streamhealth::init_tracing(&config.logging);

    match cli.command {
        Commands::Serve { bind } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            tracing::info!(bind = %config.server.bind, "starting streamhealth daemon");
            streamhealth::serve(&config).await?;
        }
        Commands::Check {
            tenant,
            snapshot,
            streams,
            json,
        } => {
            let mut snap: HealthSnapshot = read_json(&snapshot)?;
            snap.tenant_id = tenant;
            let samples: Vec<Option<StreamHealthSample>> = match &streams {
                Some(path) => read_json(path)?,
                None => Vec::new(),
            };

            let state = streamhealth::build_state(&config)?;
            let outcome = state.heartbeat.process_tenant(&snap, &samples).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else {
                println!("\n=== streamhealth triage: {} ===", outcome.tenant_id);
                println!("{}", outcome.report);
                if !outcome.stream_anomalies.is_empty() {
                    println!("\nAnomalous streams:");
                    for a in &outcome.stream_anomalies {
                        println!(" - {} (max {:.1}σ)", a.stream_id, a.max_sigma);
                        for d in &a.deviations {
                            println!("     {}", d);
                        }
                    }
                }
                if outcome.triage.action != streamhealth::diagnostics::TriageAction::Ok
                    && !outcome.surfaced
                {
                    println!("\n(flag suppressed by cooldown)");
                }
                println!();
            }
        }
        Commands::Baselines {
            tenant,
            stream,
            json,
        } => {
            let state = streamhealth::build_state(&config)?;
            let stream = stream.unwrap_or_else(|| TENANT_WIDE.to_string());
            let stored = state.store.get(&tenant, &stream).await?;
            let mut rows: Vec<_> = stored.into_iter().collect();
            rows.sort_by(|a, b| a.0.cmp(&b.0));

            if json {
                let map: std::collections::BTreeMap<_, _> = rows.into_iter().collect();
                println!("{}", serde_json::to_string_pretty(&map)?);
            } else if rows.is_empty() {
                println!("No baselines found.");
            } else {
                println!("{:<22} | {:>14} | {:>12} | Samples", "Metric", "Average", "Std dev");
                println!("{:-<22}-|-{:->14}-|-{:->12}-|-{:-<7}", "", "", "", "");
                for (name, b) in rows {
                    println!(
                        "{:<22} | {:>14.4} | {:>12.4} | {}",
                        name,
                        b.average,
                        b.std_dev(),
                        b.sample_count
                    );
                }
            }
        }
        Commands::Cleanup {
            tenant,
            max_age_hours,
        } => {
            let max_age = match max_age_hours {
                Some(h) => Duration::from_secs(h.saturating_mul(3600)),
                None => config.diagnostics.stale_baseline_max_age(),
            };
            let state = streamhealth::build_state(&config)?;
            let removed = state
                .heartbeat
                .evaluator()
                .cleanup(&tenant, max_age)
                .await?;
            println!("Removed {} stale baseline(s) for tenant '{}'.", removed, tenant);
        }
    }

    Ok(())
}
