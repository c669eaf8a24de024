//! # RunStats — training-run counters and the periodic reporter
//!
//! ## Responsibility
//! Accumulate cheap in-process counters from the agent fleet (episodes,
//! fitness aggregates, action distribution, connection failures) and emit
//! a structured summary line on a fixed interval.
//!
//! ## Guarantees
//! - Cloning a [`RunStats`] shares the same counters; any fleet task can
//!   record without plumbing
//! - Recording never blocks on I/O; the mutex guards plain arithmetic
//! - A poisoned lock degrades to a dropped sample, never a panic
//!
//! ## NOT Responsible For
//! - Population composition numbers (the controller's `summary()` owns
//!   those; the reporter task merges both views into one log line)

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::genome::GenomeCapability;
use crate::population::controller::PopulationController;
use crate::protocol::{ActionKind, Direction};

#[derive(Debug, Default)]
struct Inner {
    episodes: u64,
    fitness_sum: f64,
    best_fitness: Option<f64>,
    moves_up: u64,
    moves_down: u64,
    moves_left: u64,
    moves_right: u64,
    stays: u64,
    session_failures: u64,
}

/// Shared counter sink for one training run. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct RunStats {
    inner: Arc<Mutex<Inner>>,
}

/// Point-in-time copy of the counters, as returned by [`RunStats::sample`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatsSample {
    /// Episodes completed since the last reset.
    pub episodes: u64,
    /// Sum of episode fitness since the last reset.
    pub fitness_sum: f64,
    /// Best single-episode fitness since the last reset.
    pub best_fitness: Option<f64>,
    /// Moves sent upward.
    pub moves_up: u64,
    /// Moves sent downward.
    pub moves_down: u64,
    /// Moves sent leftward.
    pub moves_left: u64,
    /// Moves sent rightward.
    pub moves_right: u64,
    /// Actions sent that held position.
    pub stays: u64,
    /// Sessions that failed before the first tick.
    pub session_failures: u64,
}

impl StatsSample {
    /// Mean episode fitness, or `None` with no completed episodes.
    pub fn avg_fitness(&self) -> Option<f64> {
        if self.episodes == 0 {
            None
        } else {
            Some(self.fitness_sum / self.episodes as f64)
        }
    }

    /// Total move actions across all four directions.
    pub fn moves(&self) -> u64 {
        self.moves_up + self.moves_down + self.moves_left + self.moves_right
    }
}

impl RunStats {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one completed episode and its final fitness.
    pub fn record_episode(&self, fitness: f64) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        inner.episodes += 1;
        inner.fitness_sum += fitness;
        inner.best_fitness = Some(match inner.best_fitness {
            Some(best) => best.max(fitness),
            None => fitness,
        });
    }

    /// Record one action sent to the server.
    pub fn record_action(&self, action: ActionKind, direction: Direction) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        match action {
            ActionKind::Move => match direction {
                Direction::UP => inner.moves_up += 1,
                Direction::DOWN => inner.moves_down += 1,
                Direction::LEFT => inner.moves_left += 1,
                Direction::RIGHT => inner.moves_right += 1,
            },
            ActionKind::Stay => inner.stays += 1,
        }
    }

    /// Record a session that died before its first tick.
    pub fn record_session_failure(&self) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        inner.session_failures += 1;
    }

    /// Copy the current counters without resetting them.
    pub fn sample(&self) -> StatsSample {
        let Ok(inner) = self.inner.lock() else {
            return StatsSample {
                episodes: 0,
                fitness_sum: 0.0,
                best_fitness: None,
                moves_up: 0,
                moves_down: 0,
                moves_left: 0,
                moves_right: 0,
                stays: 0,
                session_failures: 0,
            };
        };
        Self::copy_of(&inner)
    }

    /// Copy the counters and zero them, starting a new reporting window.
    pub fn sample_and_reset(&self) -> StatsSample {
        let Ok(mut inner) = self.inner.lock() else {
            return self.sample();
        };
        let sample = Self::copy_of(&inner);
        *inner = Inner::default();
        sample
    }

    fn copy_of(inner: &Inner) -> StatsSample {
        StatsSample {
            episodes: inner.episodes,
            fitness_sum: inner.fitness_sum,
            best_fitness: inner.best_fitness,
            moves_up: inner.moves_up,
            moves_down: inner.moves_down,
            moves_left: inner.moves_left,
            moves_right: inner.moves_right,
            stays: inner.stays,
            session_failures: inner.session_failures,
        }
    }
}

/// Spawn the periodic stats reporter.
///
/// Each interval it drains the window counters, merges the controller's
/// population summary, and emits one structured `info` line.
pub fn spawn_stats_task<C: GenomeCapability>(
    stats: RunStats,
    controller: PopulationController<C>,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = tokio::time::sleep(interval) => {
                    report(&stats, &controller);
                }
                _ = shutdown_rx.changed() => {
                    report(&stats, &controller);
                    break;
                }
            }
        }
    })
}

fn report<C: GenomeCapability>(stats: &RunStats, controller: &PopulationController<C>) {
    let window = stats.sample_and_reset();
    let summary = controller.summary();
    tracing::info!(
        episodes = window.episodes,
        avg_fitness = window.avg_fitness().unwrap_or(0.0),
        best_fitness = window.best_fitness.unwrap_or(0.0),
        moves = window.moves(),
        moves_up = window.moves_up,
        moves_down = window.moves_down,
        moves_left = window.moves_left,
        moves_right = window.moves_right,
        stays = window.stays,
        session_failures = window.session_failures,
        population = summary.population,
        active = summary.active,
        evaluated = summary.evaluated,
        all_time_best = summary.best_fitness.unwrap_or(0.0),
        generation = summary.generation,
        "training window"
    );
}
