//! # regenesis-neat
//!
//! A steady-state neuroevolution client for the Re-Genesis ameba server.
//!
//! ## Architecture
//!
//! A bounded pool of agents is always alive against the remote environment.
//! When one dies, its fitness is recorded and a freshly-bred replacement
//! immediately takes the freed slot:
//!
//! ```text
//! AgentRuntime ──get_genome()──► PopulationController ──► Breeder
//!      │                               │
//!      │ WebSocket episode             │ PopulationStore
//!      │                               │
//!      └──report_death(id, fit)───────►│◄── CheckpointStore (periodic)
//! ```

// ── Lint policy (aerospace-grade) ─────────────────────────────────────────
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::todo)]
#![deny(missing_docs)]

use thiserror::Error;
use tracing_subscriber::EnvFilter;

pub mod agent;
pub mod checkpoint;
pub mod config;
pub mod genome;
pub mod population;
pub mod protocol;
pub mod stats;

// Re-exports for convenience
pub use agent::runtime::AgentRuntime;
pub use agent::session::{Environment, WsEnvironment};
pub use genome::{FeedForwardCapability, Genome, GenomeCapability};
pub use population::controller::PopulationController;

/// Initialise the global tracing subscriber.
///
/// Reads the `LOG_FORMAT` environment variable to choose output format:
/// - `"json"` — structured JSON output for production log aggregators
/// - anything else (including unset) — human-readable pretty output
///   for local development
///
/// Filter level is controlled by `RUST_LOG` (e.g. `RUST_LOG=info`).
///
/// # Errors
///
/// Returns [`EvolverError::Other`] if the global subscriber has already
/// been set (e.g. by a previous call or a test harness).
pub fn init_tracing() -> Result<(), EvolverError> {
    let format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());

    let result = match format.as_str() {
        "json" => tracing_subscriber::fmt()
            .json()
            .with_env_filter(EnvFilter::from_default_env())
            .with_current_span(true)
            .with_span_list(true)
            .try_init(),
        _ => tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(EnvFilter::from_default_env())
            .try_init(),
    };

    result.map_err(|e| EvolverError::Other(format!("tracing init failed: {e}")))
}

/// Top-level errors for the evolution client.
///
/// Every error surface is mapped to a variant here. All variants implement
/// `std::error::Error` via [`thiserror`].
#[derive(Debug, Error)]
pub enum EvolverError {
    /// A population-controller operation failed.
    #[error(transparent)]
    Population(#[from] population::PopulationError),

    /// An agent session against the environment failed.
    #[error(transparent)]
    Agent(#[from] agent::AgentError),

    /// A checkpoint could not be saved or restored.
    #[error(transparent)]
    Checkpoint(#[from] checkpoint::CheckpointError),

    /// A configuration value is missing or invalid.
    #[error(transparent)]
    Config(#[from] config::ConfigError),

    /// Catch-all for errors that do not fit a specific variant.
    #[error("{0}")]
    Other(String),
}
