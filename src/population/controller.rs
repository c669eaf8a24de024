//! # PopulationController — atomic lifecycle transitions
//!
//! ## Responsibility
//! Own the population store and the active set, and expose the only two
//! operations agents may use: `get_genome` and `report_death`. Triggers
//! speciation refreshes before breeding and cull passes when the
//! population outgrows its bound.
//!
//! ## Guarantees
//! - Thread-safe: all state behind one `Arc<Mutex<Inner>>`
//! - Atomic: every transition completes under the lock with no await
//!   points, so transitions never interleave
//! - Exclusive: `get_genome` never hands out an id that is already active
//! - Forgiving: `report_death` with an unknown id logs and returns; it is
//!   never fatal to a live training run
//!
//! ## NOT Responsible For
//! - Running episodes (see: `agent`)
//! - Persistence (see: `checkpoint` — it only consumes `snapshot`)

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::config::RunConfig;
use crate::genome::{Genome, GenomeCapability, GenomeId};
use crate::population::breeder::Breeder;
use crate::population::store::{PopulationState, PopulationStore};
use crate::population::PopulationError;

/// Aggregate view of the population for stats reporting.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PopulationSummary {
    /// Total genomes in the store.
    pub population: usize,
    /// Genomes currently assigned to live agents.
    pub active: usize,
    /// Genomes carrying a fitness value.
    pub evaluated: usize,
    /// Best fitness seen, if anything has been evaluated.
    pub best_fitness: Option<f64>,
    /// Mean fitness over evaluated genomes.
    pub avg_fitness: Option<f64>,
    /// Advisory generation counter.
    pub generation: u64,
    /// Next id the store will allocate.
    pub next_id: GenomeId,
}

struct Inner<C: GenomeCapability> {
    store: PopulationStore<C::Repr>,
    active: HashSet<GenomeId>,
    breeder: Breeder,
    species_counter: u64,
}

/// Steady-state population controller.
///
/// Cheap to clone — all clones share the same inner state via
/// `Arc<Mutex<_>>`. The capability is shared immutably alongside the lock
/// so genetic operations never require locking it.
pub struct PopulationController<C: GenomeCapability> {
    capability: Arc<C>,
    config: Arc<RunConfig>,
    inner: Arc<Mutex<Inner<C>>>,
}

impl<C: GenomeCapability> Clone for PopulationController<C> {
    fn clone(&self) -> Self {
        Self {
            capability: Arc::clone(&self.capability),
            config: Arc::clone(&self.config),
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: GenomeCapability> PopulationController<C> {
    /// Create a controller over a fresh, empty population.
    pub fn new(capability: Arc<C>, config: Arc<RunConfig>) -> Self {
        Self::from_state(capability, config, PopulationState::default())
    }

    /// Create a controller over a previously-persisted population.
    ///
    /// The id counter is validated and repaired if the loaded state is
    /// inconsistent; the active set always starts empty.
    pub fn from_state(
        capability: Arc<C>,
        config: Arc<RunConfig>,
        state: PopulationState<C::Repr>,
    ) -> Self {
        let species_counter = state.species.values().max().map_or(0, |max| max + 1);
        let breeder = Breeder::new(config.tournament_size, config.rng_seed);
        Self {
            capability,
            config,
            inner: Arc::new(Mutex::new(Inner {
                store: PopulationStore::from_state(state),
                active: HashSet::new(),
                breeder,
                species_counter,
            })),
        }
    }

    /// Claim the next genome to simulate.
    ///
    /// Priority order:
    /// 1. a genome that was bred but never run (unset fitness, not
    ///    active) — e.g. left over from a crash-recovery gap;
    /// 2. otherwise a speciation pass refreshes the breeding pool and a
    ///    freshly-bred child is inserted.
    ///
    /// A cull pass runs whenever the population exceeds
    /// `cull_trigger_factor × target_pop_size` after insertion, removing
    /// at least the overshoot, so the population is back within the bound
    /// on return even at the smallest target sizes.
    ///
    /// # Errors
    ///
    /// Returns [`PopulationError::LockPoisoned`] if the internal lock is
    /// poisoned.
    pub fn get_genome(&self) -> Result<Genome<C::Repr>, PopulationError> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| PopulationError::LockPoisoned)?;

        // 1. Reuse bred-but-never-run genomes first.
        if let Some(id) = inner.store.unevaluated_unassigned(&inner.active) {
            if let Some(genome) = inner.store.get(id).cloned() {
                inner.active.insert(id);
                tracing::debug!(id, "reusing unevaluated genome");
                return Ok(genome);
            }
        }

        // 2. Breed. Refresh species first so the selection pool reflects
        //    current fitness information.
        Self::refresh_species(self.capability.as_ref(), &mut inner, self.config.compat_threshold);

        let child = {
            let Inner { store, breeder, .. } = &mut *inner;
            breeder.breed(self.capability.as_ref(), store)
        };
        inner.store.insert(child.clone());
        inner.active.insert(child.id);

        let trigger = self.config.cull_trigger_size();
        if inner.store.state.len() > trigger {
            let excess = inner.store.state.len() - trigger;
            let Inner { store, active, .. } = &mut *inner;
            let removed = store.cull(self.config.cull_fraction, excess, active);
            tracing::info!(
                removed = removed.len(),
                population = store.state.len(),
                "cull pass completed"
            );
        }

        Ok(child)
    }

    /// Record a death: set the genome's fitness and release its slot.
    ///
    /// Idempotent and forgiving — an unknown id (the genome may have been
    /// culled across a restart boundary) is logged and ignored.
    pub fn report_death(&self, id: GenomeId, fitness: f64) {
        let Ok(mut inner) = self.inner.lock() else {
            tracing::error!(id, "controller lock poisoned during report_death");
            return;
        };
        inner.active.remove(&id);
        if inner.store.set_fitness(id, fitness) {
            tracing::debug!(id, fitness, "death recorded");
        } else {
            tracing::warn!(id, fitness, "death reported for unknown genome, ignoring");
        }
    }

    /// Clone the committed durable state for checkpointing.
    ///
    /// # Errors
    ///
    /// Returns [`PopulationError::LockPoisoned`] if the internal lock is
    /// poisoned.
    pub fn snapshot(&self) -> Result<PopulationState<C::Repr>, PopulationError> {
        let inner = self
            .inner
            .lock()
            .map_err(|_| PopulationError::LockPoisoned)?;
        Ok(inner.store.state.clone())
    }

    /// Aggregate stats for reporting.
    pub fn summary(&self) -> PopulationSummary {
        let Ok(inner) = self.inner.lock() else {
            return PopulationSummary::default();
        };
        let fitnesses: Vec<f64> = inner
            .store
            .state
            .genomes
            .values()
            .filter_map(|g| g.fitness)
            .collect();
        #[allow(clippy::cast_precision_loss)]
        let avg = if fitnesses.is_empty() {
            None
        } else {
            Some(fitnesses.iter().sum::<f64>() / fitnesses.len() as f64)
        };
        PopulationSummary {
            population: inner.store.state.len(),
            active: inner.active.len(),
            evaluated: fitnesses.len(),
            best_fitness: inner.store.state.best().and_then(|g| g.fitness),
            avg_fitness: avg,
            generation: inner.store.state.generation,
            next_id: inner.store.state.next_id,
        }
    }

    /// Number of genomes currently assigned to live agents.
    pub fn active_count(&self) -> usize {
        self.inner.lock().map_or(0, |inner| inner.active.len())
    }

    /// Greedy representative clustering by compatibility distance.
    ///
    /// Each genome joins the first existing species whose representative
    /// is within the threshold, otherwise founds a new one. Runs before
    /// every breed so assignments track fitness churn; the generation
    /// counter advances with each pass.
    fn refresh_species(capability: &C, inner: &mut Inner<C>, threshold: f64) {
        let mut representatives: Vec<(u64, GenomeId)> = Vec::new();
        let mut assignment = std::collections::BTreeMap::new();

        let ids: Vec<GenomeId> = inner.store.state.genomes.keys().copied().collect();
        for id in ids {
            let Some(genome) = inner.store.get(id) else {
                continue;
            };
            let mut assigned = None;
            for &(species_id, rep_id) in &representatives {
                if let Some(rep) = inner.store.get(rep_id) {
                    if capability.distance(&genome.repr, &rep.repr) < threshold {
                        assigned = Some(species_id);
                        break;
                    }
                }
            }
            let species_id = assigned.unwrap_or_else(|| {
                let fresh = inner.species_counter;
                inner.species_counter += 1;
                representatives.push((fresh, id));
                fresh
            });
            assignment.insert(id, species_id);
        }

        inner.store.state.species = assignment;
        inner.store.state.generation += 1;
    }
}
