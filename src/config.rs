//! # Run configuration
//!
//! ## Responsibility
//! Parse and validate the client's runtime configuration: target population
//! size, server URL, episode limits, breeder/cull tuning, checkpoint and
//! stats cadence. Loadable from a TOML file, overridable by the single CLI
//! positional argument (target population size).
//!
//! ## Guarantees
//! - Every field has either a required value or a documented default
//! - Validated: semantic constraints checked before a config is accepted
//! - Deterministic: same TOML input always produces the same `RunConfig`
//!
//! ## NOT Responsible For
//! - Checkpoint file formats (see: `checkpoint`)
//! - Wire message shapes (see: `protocol`)

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors specific to configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("cannot read config file {path}: {source}")]
    Read {
        /// Path that failed to open.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The config file is not valid TOML for this schema.
    #[error("cannot parse config file {path}: {source}")]
    Parse {
        /// Path that failed to parse.
        path: PathBuf,
        /// Underlying TOML error.
        source: toml::de::Error,
    },

    /// A field value violates a semantic constraint.
    #[error("invalid config value for {field}: {reason}")]
    InvalidValue {
        /// Name of the offending field.
        field: String,
        /// Why the value was rejected.
        reason: String,
    },
}

// ── Default value functions ──────────────────────────────────────────────

/// Default target concurrent population: 5 agents.
fn default_target_pop_size() -> usize {
    5
}

/// Default environment endpoint.
fn default_server_url() -> String {
    "wss://re-genes.is/ws/join?species=NEAT_Evo".to_string()
}

/// Default episode tick ceiling (anti-camping timeout): 2000 ticks.
fn default_max_ticks() -> u64 {
    2000
}

/// Default cull trigger: population may grow to 2× the target before a
/// cull pass runs.
fn default_cull_trigger_factor() -> f64 {
    2.0
}

/// Default cull fraction: the lowest 20% by fitness are removed.
fn default_cull_fraction() -> f64 {
    0.2
}

/// Default tournament size for parent selection.
fn default_tournament_size() -> usize {
    3
}

/// Default compatibility distance threshold for species assignment.
fn default_compat_threshold() -> f64 {
    3.0
}

/// Default fitness weight per tick survived.
fn default_tick_weight() -> f64 {
    1.0
}

/// Default fitness weight per unit of energy gained. Deliberately heavier
/// than the tick weight so idle survival cannot dominate active foraging.
fn default_energy_weight() -> f64 {
    2.0
}

/// Default checkpoint file path.
fn default_checkpoint_path() -> PathBuf {
    PathBuf::from("neat-checkpoint.json")
}

/// Default checkpoint interval: 30 seconds.
fn default_checkpoint_interval_secs() -> u64 {
    30
}

/// Default stats reporting interval: 15 seconds.
fn default_stats_interval_secs() -> u64 {
    15
}

/// Default stagger between agent task starts: 250ms, so a refill burst
/// doesn't hammer the environment with simultaneous connections.
fn default_spawn_stagger_ms() -> u64 {
    250
}

/// Default breeder RNG seed.
fn default_rng_seed() -> u64 {
    0x5eed_a11e_1e57_ed01
}

// ── RunConfig ────────────────────────────────────────────────────────────

/// Root configuration for a training run.
///
/// Deserialized from a TOML file (all fields optional with defaults) and
/// validated before use. The single CLI positional argument overrides
/// `target_pop_size`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunConfig {
    /// Number of agents kept concurrently alive against the environment.
    #[serde(default = "default_target_pop_size")]
    pub target_pop_size: usize,

    /// WebSocket endpoint of the environment server.
    #[serde(default = "default_server_url")]
    pub server_url: String,

    /// Maximum ticks per episode before the agent is forcibly retired.
    #[serde(default = "default_max_ticks")]
    pub max_ticks: u64,

    /// Population is culled once it exceeds `cull_trigger_factor ×
    /// target_pop_size`. Fixed constant in the original client; kept
    /// configurable since no derivation for the value is known.
    #[serde(default = "default_cull_trigger_factor")]
    pub cull_trigger_factor: f64,

    /// Fraction of the population (lowest fitness first) removed per cull
    /// pass. Active genomes are always retained.
    #[serde(default = "default_cull_fraction")]
    pub cull_fraction: f64,

    /// Tournament size for parent selection.
    #[serde(default = "default_tournament_size")]
    pub tournament_size: usize,

    /// Compatibility distance threshold for species assignment.
    #[serde(default = "default_compat_threshold")]
    pub compat_threshold: f64,

    /// Fitness contribution per tick survived.
    #[serde(default = "default_tick_weight")]
    pub tick_weight: f64,

    /// Fitness contribution per unit of energy gained during the episode.
    #[serde(default = "default_energy_weight")]
    pub energy_weight: f64,

    /// Path of the checkpoint artifact (atomically replaced on each save).
    #[serde(default = "default_checkpoint_path")]
    pub checkpoint_path: PathBuf,

    /// Seconds between periodic checkpoint saves.
    #[serde(default = "default_checkpoint_interval_secs")]
    pub checkpoint_interval_secs: u64,

    /// Seconds between periodic stats reports.
    #[serde(default = "default_stats_interval_secs")]
    pub stats_interval_secs: u64,

    /// Milliseconds between agent task starts when refilling the pool.
    #[serde(default = "default_spawn_stagger_ms")]
    pub spawn_stagger_ms: u64,

    /// Seed for the breeder's deterministic RNG.
    #[serde(default = "default_rng_seed")]
    pub rng_seed: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            target_pop_size: default_target_pop_size(),
            server_url: default_server_url(),
            max_ticks: default_max_ticks(),
            cull_trigger_factor: default_cull_trigger_factor(),
            cull_fraction: default_cull_fraction(),
            tournament_size: default_tournament_size(),
            compat_threshold: default_compat_threshold(),
            tick_weight: default_tick_weight(),
            energy_weight: default_energy_weight(),
            checkpoint_path: default_checkpoint_path(),
            checkpoint_interval_secs: default_checkpoint_interval_secs(),
            stats_interval_secs: default_stats_interval_secs(),
            spawn_stagger_ms: default_spawn_stagger_ms(),
            rng_seed: default_rng_seed(),
        }
    }
}

impl RunConfig {
    /// Load a config from a TOML file and validate it.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::Read`] if the file cannot be read
    /// - [`ConfigError::Parse`] if the TOML is invalid
    /// - [`ConfigError::InvalidValue`] if validation fails
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check all semantic constraints.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] naming the first offending
    /// field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.target_pop_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "target_pop_size".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        if self.cull_trigger_factor < 1.0 {
            return Err(ConfigError::InvalidValue {
                field: "cull_trigger_factor".to_string(),
                reason: "must be at least 1.0".to_string(),
            });
        }
        if !(0.0..1.0).contains(&self.cull_fraction) {
            return Err(ConfigError::InvalidValue {
                field: "cull_fraction".to_string(),
                reason: "must be in [0.0, 1.0)".to_string(),
            });
        }
        if self.tournament_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "tournament_size".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        if self.max_ticks == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_ticks".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }

    /// Apply the CLI positional argument (target population size) on top
    /// of this config.
    ///
    /// Invalid or absent values fall back to the configured size with a
    /// warning, matching the documented CLI contract: the process never
    /// refuses to start over a malformed argument.
    pub fn with_cli_pop_size(mut self, arg: Option<&str>) -> Self {
        match arg {
            Some(raw) => match raw.parse::<usize>() {
                Ok(n) if n > 0 => {
                    self.target_pop_size = n;
                }
                _ => {
                    tracing::warn!(
                        arg = raw,
                        fallback = self.target_pop_size,
                        "invalid population size argument, using fallback"
                    );
                }
            },
            None => {
                tracing::info!(
                    target_pop_size = self.target_pop_size,
                    "no population size argument, using default"
                );
            }
        }
        self
    }

    /// The population ceiling above which a cull pass is triggered.
    #[allow(clippy::cast_precision_loss, clippy::cast_sign_loss, clippy::cast_possible_truncation)]
    pub fn cull_trigger_size(&self) -> usize {
        (self.cull_trigger_factor * self.target_pop_size as f64) as usize
    }
}
