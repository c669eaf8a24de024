//! Training binary for regenesis-neat.
//!
//! Connects a steady-state evolution population to the ameba server and
//! runs until interrupted, checkpointing on an interval and on shutdown.
//!
//! Usage: `regenesis-neat [target_pop_size]`
//!
//! ## Environment Variables
//!
//! - `LOG_FORMAT=json` — structured JSON output (production)
//! - `RUST_LOG=info` — log level filter

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::info;

use regenesis_neat::checkpoint::{spawn_checkpoint_task, CheckpointSource, CheckpointStore};
use regenesis_neat::config::RunConfig;
use regenesis_neat::genome::FeedForwardRepr;
use regenesis_neat::stats::{spawn_stats_task, RunStats};
use regenesis_neat::{
    init_tracing, AgentRuntime, Environment, EvolverError, FeedForwardCapability,
    PopulationController, WsEnvironment,
};

/// Optional TOML config next to the binary; defaults apply without it.
const CONFIG_PATH: &str = "regenesis.toml";

#[tokio::main]
async fn main() -> Result<(), EvolverError> {
    init_tracing()?;

    let config_path = Path::new(CONFIG_PATH);
    let config = if config_path.exists() {
        RunConfig::from_file(config_path)?
    } else {
        RunConfig::default()
    };
    let args: Vec<String> = std::env::args().collect();
    let config = config.with_cli_pop_size(args.get(1).map(String::as_str));
    config.validate()?;
    let config = Arc::new(config);

    info!(
        target_pop_size = config.target_pop_size,
        server = %config.server_url,
        "starting training run"
    );

    // Restore (or start) the population.
    let store = CheckpointStore::new(&config.checkpoint_path);
    let (state, source) = store.load::<FeedForwardRepr>();
    if source != CheckpointSource::Fresh {
        if let Some(best) = state.best() {
            info!(
                id = best.id,
                fitness = best.fitness.unwrap_or(0.0),
                generation = state.generation,
                "resuming; best genome so far"
            );
        }
    }

    let capability = Arc::new(FeedForwardCapability::default());
    let controller =
        PopulationController::from_state(Arc::clone(&capability), Arc::clone(&config), state);
    let stats = RunStats::new();
    let environment: Arc<dyn Environment> =
        Arc::new(WsEnvironment::new(config.server_url.clone()));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let checkpoint_task = spawn_checkpoint_task(
        store.clone(),
        controller.clone(),
        Duration::from_secs(config.checkpoint_interval_secs),
        shutdown_tx.subscribe(),
    );
    let stats_task = spawn_stats_task(
        stats.clone(),
        controller.clone(),
        Duration::from_secs(config.stats_interval_secs),
        shutdown_tx.subscribe(),
    );

    let runtime = AgentRuntime::new(
        controller.clone(),
        environment,
        capability,
        Arc::clone(&config),
        stats,
    );
    let fleet = tokio::spawn(async move { runtime.run(shutdown_rx).await });

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| EvolverError::Other(format!("signal handler failed: {e}")))?;
    info!("interrupt received, shutting down");

    let _ = shutdown_tx.send(true);
    if let Err(e) = fleet.await {
        tracing::error!(error = %e, "fleet task panicked during shutdown");
    }
    // The checkpoint task writes a final snapshot on its way out.
    let _ = checkpoint_task.await;
    let _ = stats_task.await;

    // A shutdown must always leave a current checkpoint, even if the
    // periodic task died earlier in the run.
    match controller.snapshot() {
        Ok(state) => {
            if let Err(e) = store.save(&state) {
                tracing::warn!(error = %e, "final checkpoint save failed");
            }
        }
        Err(e) => tracing::error!(error = %e, "final snapshot unavailable"),
    }

    let summary = controller.summary();
    info!(
        population = summary.population,
        evaluated = summary.evaluated,
        best_fitness = summary.best_fitness.unwrap_or(0.0),
        generation = summary.generation,
        "training run stopped"
    );
    Ok(())
}
