//! # Breeder — tournament selection and offspring creation
//!
//! ## Responsibility
//! Produce the next genome to evaluate: tournament-select two parents from
//! the fitness-bearing pool, crossover, mutate, and stamp the child with a
//! freshly allocated id. Handles the bootstrap case where nothing has been
//! evaluated yet.
//!
//! ## Guarantees
//! - Children are always unevaluated (`fitness == None`)
//! - Ids come exclusively from the store's authoritative counter
//! - Deterministic: the same seed and call sequence breed the same genomes
//!
//! ## NOT Responsible For
//! - Deciding *when* to breed (see: `controller`)
//! - Culling (see: `store`)

use crate::genome::{Genome, GenomeCapability, GenomeId, XorShift64};
use crate::population::store::PopulationStore;

/// Tournament breeder over a population store.
#[derive(Debug)]
pub struct Breeder {
    /// Genomes sampled per tournament.
    tournament_size: usize,
    /// Deterministic PRNG for selection, crossover, and mutation.
    rng: XorShift64,
}

impl Breeder {
    /// Create a breeder with the given tournament size and RNG seed.
    pub fn new(tournament_size: usize, seed: u64) -> Self {
        Self {
            tournament_size: tournament_size.max(1),
            rng: XorShift64::new(seed),
        }
    }

    /// Breed one child genome.
    ///
    /// With no fitness-bearing genomes available (fresh population or one
    /// recovered from a checkpoint that held only unevaluated genomes),
    /// selection is skipped entirely and a brand-new, unmutated
    /// default-initialized genome is allocated instead.
    pub fn breed<C: GenomeCapability>(
        &mut self,
        capability: &C,
        store: &mut PopulationStore<C::Repr>,
    ) -> Genome<C::Repr> {
        let pool = store.evaluated_ids();

        if pool.is_empty() {
            let repr = capability.default_repr(&mut self.rng);
            let id = store.allocate_id();
            tracing::debug!(id, "bootstrap: allocated default genome");
            return Genome::new(id, repr);
        }

        let p1 = self.tournament(store, &pool);
        let p2 = self.tournament(store, &pool);

        let mut child_repr = match (store.get(p1), store.get(p2)) {
            (Some(a), Some(b)) => capability.crossover(&a.repr, &b.repr, &mut self.rng),
            // Pool ids come from the store, so this arm is unreachable.
            _ => capability.default_repr(&mut self.rng),
        };
        capability.mutate(&mut child_repr, &mut self.rng);

        let id = store.allocate_id();
        tracing::debug!(id, parent_a = p1, parent_b = p2, "bred child genome");
        Genome::new(id, child_repr)
    }

    /// One tournament: sample `k` distinct entrants from the pool (without
    /// replacement within the tournament), return the fittest. Pools
    /// smaller than `k` enter everyone.
    fn tournament<R>(&mut self, store: &PopulationStore<R>, pool: &[GenomeId]) -> GenomeId {
        let k = self.tournament_size.min(pool.len());
        let mut entrants: Vec<GenomeId> = Vec::with_capacity(k);
        while entrants.len() < k {
            let candidate = pool[self.rng.next_index(pool.len())];
            if !entrants.contains(&candidate) {
                entrants.push(candidate);
            }
        }

        let mut best = entrants[0];
        let mut best_fitness = f64::NEG_INFINITY;
        for id in entrants {
            let fitness = store
                .get(id)
                .and_then(|g| g.fitness)
                .unwrap_or(f64::NEG_INFINITY);
            if fitness > best_fitness {
                best_fitness = fitness;
                best = id;
            }
        }
        best
    }
}
