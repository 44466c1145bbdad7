//! Aggregator service.
//!
//! Loads the engine configuration, wires the engine, starts the
//! scheduler, and logs job and pipeline statistics until SIGINT.

use anyhow::{Context, Result};
use chrono::Utc;
use dealhawk_core::{Engine, EngineConfig};
use dotenv::dotenv;
use std::env;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const STATS_LOG_INTERVAL: Duration = Duration::from_secs(5 * 60);

fn load_config() -> Result<EngineConfig> {
    match env::var("DEALHAWK_CONFIG") {
        Ok(path) => {
            info!("Loading engine config from {}", path);
            EngineConfig::from_file(&path)
                .with_context(|| format!("failed to load config from {path}"))
        }
        Err(_) => {
            warn!("DEALHAWK_CONFIG not set, using defaults (no sources configured)");
            Ok(EngineConfig::default())
        }
    }
}

fn log_stats(engine: &Engine, started_at: chrono::DateTime<Utc>) {
    let uptime = Utc::now() - started_at;
    let metrics = engine.metrics();
    info!(
        "Uptime {}m: {} fetched, {} malformed, {} duplicates, {} indexed, {} store errors",
        uptime.num_minutes(),
        metrics.fetched,
        metrics.malformed_dropped,
        metrics.duplicates_collapsed,
        metrics.indexed,
        metrics.store_write_errors
    );
    for job in engine.job_snapshots() {
        info!(
            "Job {}: runs={} ok={} failed={} avg={:.0}ms next={}",
            job.name,
            job.stats.total_runs,
            job.stats.successful_runs,
            job.stats.failed_runs,
            job.stats.avg_run_time_ms,
            job.next_run.format("%H:%M:%S")
        );
        if let Some(err) = &job.stats.last_error {
            warn!("Job {} last error: {}", job.name, err);
        }
    }
    for (source, stats) in engine.source_stats() {
        if stats.consecutive_failures > 0 {
            warn!(
                "Source {}: {} consecutive failures, last error: {}",
                source,
                stats.consecutive_failures,
                stats.last_error.as_deref().unwrap_or("unknown")
            );
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = load_config()?;
    let engine = Engine::new(config).context("failed to build engine")?;
    let started_at = Utc::now();
    engine.start();

    let mut stats_timer = tokio::time::interval(STATS_LOG_INTERVAL);
    stats_timer.tick().await; // First tick fires immediately; skip it.
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("SIGINT received, shutting down");
                break;
            }
            _ = stats_timer.tick() => log_stats(&engine, started_at),
        }
    }

    engine.stop().await;
    log_stats(&engine, started_at);
    Ok(())
}
