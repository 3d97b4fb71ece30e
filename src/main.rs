//! HERMES — Heuristic Evaluation and Routed Market Execution System
//!
//! Entry point. Loads configuration, initialises structured logging,
//! restores learned thresholds from disk (or starts fresh), and runs
//! the evaluate→decide→dispatch pipeline with graceful shutdown.

use anyhow::Result;
use std::sync::Arc;
use tracing::info;

use hermes::collab::{Executor, MarketSnapshotProvider, SimulatedExecutor, SimulatedFeed};
use hermes::config::AppConfig;
use hermes::dashboard;
use hermes::engine::PipelineCoordinator;

const BANNER: &str = r#"
 _   _ _____ ____  __  __ _____ ____
| | | | ____|  _ \|  \/  | ____/ ___|
| |_| |  _| | |_) | |\/| |  _| \___ \
|  _  | |___|  _ <| |  | | |___ ___) |
|_| |_|_____|_| \_\_|  |_|_____|____/

  Heuristic Evaluation and Routed Market Execution System
  v0.1.0 — Opportunity Pipeline
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cfg = AppConfig::load("config.toml")?;

    init_logging();

    println!("{BANNER}");
    info!(
        pipeline = %cfg.pipeline.name,
        intake_interval_secs = cfg.pipeline.intake_interval_secs,
        n_max = cfg.pipeline.n_max,
        workers = cfg.workers.registry.len(),
        "HERMES starting up"
    );

    // Simulated collaborators until live feed/venue integrations land.
    let feed = Arc::new(SimulatedFeed::new());
    let executor = Arc::new(SimulatedExecutor::new());
    info!("No live collaborators configured — running with simulated feed and executor");

    let coordinator = PipelineCoordinator::new(
        cfg.clone(),
        feed as Arc<dyn MarketSnapshotProvider>,
        executor as Arc<dyn Executor>,
    )?;

    // Restore learned thresholds from a previous session, if any.
    coordinator.restore()?;

    if cfg.dashboard.enabled {
        dashboard::spawn_dashboard(Arc::clone(&coordinator), cfg.dashboard.port)?;
    }

    coordinator.start()?;
    info!("Pipeline running. Press Ctrl+C to stop.");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received.");
    coordinator.stop().await?;

    let status = coordinator.status();
    info!(
        received = status.counts.opportunities_received,
        executed = status.counts.executions_succeeded,
        failed = status.counts.executions_failed,
        threshold_version = status.thresholds.version,
        "HERMES shut down cleanly."
    );
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("hermes=info"));

    let json_logging = std::env::var("HERMES_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt().with_env_filter(env_filter).with_target(true).init();
    }
}
