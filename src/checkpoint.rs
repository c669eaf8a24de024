//! # CheckpointStore — crash-safe population persistence
//!
//! ## Responsibility
//! Serialize the durable population state to disk on a fixed interval and
//! on controlled shutdown, and restore it on startup through a fallback
//! chain: versioned native format → legacy unwrapped layout → fresh empty
//! population.
//!
//! ## Guarantees
//! - Atomic: every save writes a temp file and renames it over the old
//!   checkpoint, so a crash mid-write never corrupts the previous one
//! - Versioned: the schema carries an explicit version and every field has
//!   a serde default — no reactive attribute probing on load
//! - Counter-safe: `next_id` is validated and repaired (`max(id)+1`) after
//!   any successful load
//! - Non-fatal: load never errors; a broken file degrades to a warning and
//!   a fresh population
//!
//! ## NOT Responsible For
//! - Deciding what is durable (see: `population::store::PopulationState`)
//! - The active set (ephemeral by design; restarts begin with none)

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::genome::GenomeCapability;
use crate::population::controller::PopulationController;
use crate::population::store::PopulationState;

/// Current checkpoint schema version.
pub const SCHEMA_VERSION: u32 = 1;

/// Errors specific to checkpoint saving.
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// Filesystem write or rename failed.
    #[error("checkpoint I/O failed at {path}: {source}")]
    Io {
        /// Path involved in the failure.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The population state could not be serialized.
    #[error("checkpoint serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Where a restored population came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointSource {
    /// Parsed from the current versioned schema.
    Native,
    /// Parsed from the legacy unwrapped layout.
    Legacy,
    /// Nothing usable on disk; starting empty.
    Fresh,
}

/// On-disk shape of a checkpoint: explicit version plus the population.
#[derive(Debug, Deserialize)]
struct CheckpointFile<R> {
    /// Schema version this file was written with.
    schema_version: u32,
    /// The durable population state.
    population: PopulationState<R>,
}

/// Borrowing twin of [`CheckpointFile`] used on the save path.
#[derive(Serialize)]
struct CheckpointFileRef<'a, R> {
    schema_version: u32,
    population: &'a PopulationState<R>,
}

/// Durable store for one population's checkpoint artifact.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    /// Create a store writing to the given path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The checkpoint artifact path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persist the state with write-temp-then-rename discipline.
    ///
    /// # Errors
    ///
    /// - [`CheckpointError::Serialize`] if the state cannot be encoded
    /// - [`CheckpointError::Io`] on write or rename failure
    pub fn save<R: Serialize>(&self, state: &PopulationState<R>) -> Result<(), CheckpointError> {
        let file = CheckpointFileRef {
            schema_version: SCHEMA_VERSION,
            population: state,
        };
        let encoded = serde_json::to_vec(&file)?;

        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, &encoded).map_err(|source| CheckpointError::Io {
            path: tmp.clone(),
            source,
        })?;
        std::fs::rename(&tmp, &self.path).map_err(|source| CheckpointError::Io {
            path: self.path.clone(),
            source,
        })?;
        Ok(())
    }

    /// Restore a population, falling back through the recovery chain.
    ///
    /// Never fails: an unreadable or unparseable file is logged and
    /// replaced with a fresh empty population. On any successful parse the
    /// id counter is validated and repaired before the state is returned.
    pub fn load<R: DeserializeOwned>(&self) -> (PopulationState<R>, CheckpointSource) {
        let raw = match std::fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %self.path.display(), "no checkpoint found, starting fresh");
                return (PopulationState::default(), CheckpointSource::Fresh);
            }
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "checkpoint unreadable, starting fresh"
                );
                return (PopulationState::default(), CheckpointSource::Fresh);
            }
        };

        // Native versioned format first.
        if let Ok(file) = serde_json::from_slice::<CheckpointFile<R>>(&raw) {
            let mut state = file.population;
            if state.repair_next_id() {
                tracing::warn!(next_id = state.next_id, "repaired id counter on load");
            }
            tracing::info!(
                genomes = state.len(),
                generation = state.generation,
                schema_version = file.schema_version,
                "checkpoint restored"
            );
            return (state, CheckpointSource::Native);
        }

        // Legacy layout: the population state at the top level, unwrapped
        // and unversioned (possibly without a persisted id counter).
        if let Ok(mut state) = serde_json::from_slice::<PopulationState<R>>(&raw) {
            if state.repair_next_id() {
                tracing::warn!(next_id = state.next_id, "repaired id counter on legacy load");
            }
            tracing::warn!(
                genomes = state.len(),
                "legacy checkpoint restored; next save migrates to the current schema"
            );
            return (state, CheckpointSource::Legacy);
        }

        tracing::warn!(
            path = %self.path.display(),
            "checkpoint corrupt in all known formats, starting fresh"
        );
        (PopulationState::default(), CheckpointSource::Fresh)
    }
}

/// Spawn the periodic checkpoint task.
///
/// Saves a committed snapshot every `interval`, and once more when the
/// shutdown signal fires. Snapshot cloning happens under the controller
/// lock; file I/O runs on the blocking pool.
pub fn spawn_checkpoint_task<C: GenomeCapability>(
    store: CheckpointStore,
    controller: PopulationController<C>,
    interval: std::time::Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = tokio::time::sleep(interval) => {
                    save_snapshot(&store, &controller).await;
                }
                _ = shutdown_rx.changed() => {
                    tracing::info!("checkpoint task shutting down, saving final snapshot");
                    save_snapshot(&store, &controller).await;
                    break;
                }
            }
        }
    })
}

/// Take a snapshot and persist it on the blocking pool; failures are
/// logged, never propagated — a failed save must not stop training.
async fn save_snapshot<C: GenomeCapability>(
    store: &CheckpointStore,
    controller: &PopulationController<C>,
) {
    let state = match controller.snapshot() {
        Ok(state) => state,
        Err(e) => {
            tracing::error!(error = %e, "snapshot failed, skipping checkpoint");
            return;
        }
    };
    let store = store.clone();
    let genomes = state.len();
    let result = tokio::task::spawn_blocking(move || store.save(&state)).await;
    match result {
        Ok(Ok(())) => tracing::debug!(genomes, "checkpoint saved"),
        Ok(Err(e)) => tracing::warn!(error = %e, "checkpoint save failed"),
        Err(e) => tracing::warn!(error = %e, "checkpoint task join failed"),
    }
}
