//! # PopulationStore — genomes, ids, species assignment
//!
//! ## Responsibility
//! Hold every known genome (evaluated or not), the authoritative monotonic
//! id counter, the advisory generation counter, and the species map. The
//! cull pass lives here because it is pure store surgery.
//!
//! ## Guarantees
//! - `next_id > max(id in genomes)` at all times; ids never reused
//! - `repair_next_id` restores the invariant after any deserialization
//! - Deterministic iteration (`BTreeMap`), so selection and culling are
//!   reproducible given the same state
//!
//! ## NOT Responsible For
//! - Who is currently active (the controller owns the active set)
//! - Breeding (see: `breeder`)
//! - Persistence formats (see: `checkpoint`)

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::genome::{Genome, GenomeId};

/// The durable portion of the population: exactly what a checkpoint holds.
///
/// The active set is deliberately absent — active assignment is ephemeral
/// and reconstructed empty on restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PopulationState<R> {
    /// All known genomes by id.
    #[serde(default = "BTreeMap::new")]
    pub genomes: BTreeMap<GenomeId, Genome<R>>,
    /// Advisory counter, incremented on every speciation pass.
    #[serde(default)]
    pub generation: u64,
    /// Species assignment from the most recent speciation pass.
    #[serde(default = "BTreeMap::new")]
    pub species: BTreeMap<GenomeId, u64>,
    /// Authoritative source for new ids. An explicit, persisted integer —
    /// never an in-memory sequence that a checkpoint cannot capture.
    #[serde(default)]
    pub next_id: GenomeId,
}

impl<R> Default for PopulationState<R> {
    fn default() -> Self {
        Self {
            genomes: BTreeMap::new(),
            generation: 0,
            species: BTreeMap::new(),
            next_id: 0,
        }
    }
}

impl<R> PopulationState<R> {
    /// Validate or reconstruct `next_id` after deserialization.
    ///
    /// Any loaded counter that is not strictly greater than every existing
    /// id is replaced with `max(id) + 1`. A checkpoint written by an older
    /// schema (no counter at all) deserializes to 0 and is repaired here.
    pub fn repair_next_id(&mut self) -> bool {
        let required = self.genomes.keys().max().map_or(0, |max| max + 1);
        if self.next_id < required {
            self.next_id = required;
            return true;
        }
        false
    }

    /// Number of genomes in the store.
    pub fn len(&self) -> usize {
        self.genomes.len()
    }

    /// Whether the store holds no genomes.
    pub fn is_empty(&self) -> bool {
        self.genomes.is_empty()
    }

    /// The highest-fitness evaluated genome, if any.
    pub fn best(&self) -> Option<&Genome<R>> {
        self.genomes
            .values()
            .filter(|g| g.fitness.is_some())
            .max_by(|a, b| {
                a.fitness
                    .partial_cmp(&b.fitness)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
    }
}

/// Mutable store operations used by the controller and breeder.
///
/// A thin owner around [`PopulationState`]; the split keeps the serialized
/// shape free of any runtime-only bookkeeping.
#[derive(Debug, Default)]
pub struct PopulationStore<R> {
    /// The durable state.
    pub state: PopulationState<R>,
}

impl<R> PopulationStore<R> {
    /// Create an empty store (ids start at 0).
    pub fn new() -> Self {
        Self {
            state: PopulationState::default(),
        }
    }

    /// Adopt a loaded state, repairing the id counter.
    pub fn from_state(mut state: PopulationState<R>) -> Self {
        if state.repair_next_id() {
            tracing::warn!(
                next_id = state.next_id,
                "repaired id counter from loaded state"
            );
        }
        Self { state }
    }

    /// Allocate the next genome id, advancing the authoritative counter.
    pub fn allocate_id(&mut self) -> GenomeId {
        let id = self.state.next_id;
        self.state.next_id += 1;
        id
    }

    /// Insert a genome. The caller is responsible for having allocated the
    /// id through [`Self::allocate_id`].
    pub fn insert(&mut self, genome: Genome<R>) {
        self.state.genomes.insert(genome.id, genome);
    }

    /// Look up a genome by id.
    pub fn get(&self, id: GenomeId) -> Option<&Genome<R>> {
        self.state.genomes.get(&id)
    }

    /// Assign fitness to a genome. Returns `false` if the id is unknown
    /// (e.g. culled across a restart boundary).
    pub fn set_fitness(&mut self, id: GenomeId, fitness: f64) -> bool {
        match self.state.genomes.get_mut(&id) {
            Some(genome) => {
                genome.fitness = Some(fitness);
                true
            }
            None => false,
        }
    }

    /// Ids of all fitness-bearing genomes, ascending.
    pub fn evaluated_ids(&self) -> Vec<GenomeId> {
        self.state
            .genomes
            .values()
            .filter(|g| g.fitness.is_some())
            .map(|g| g.id)
            .collect()
    }

    /// Lowest-id genome that was bred but never run and is not currently
    /// assigned — the crash-recovery leftovers `get_genome` reuses first.
    pub fn unevaluated_unassigned(&self, active: &HashSet<GenomeId>) -> Option<GenomeId> {
        self.state
            .genomes
            .values()
            .find(|g| g.fitness.is_none() && !active.contains(&g.id))
            .map(|g| g.id)
    }

    /// Remove the lowest-fitness slice of the population.
    ///
    /// Sorts ascending by fitness (unset = worst) and removes
    /// `max(floor(fraction × len), excess)` genomes from the bottom,
    /// skipping over any active id and continuing up the ranking in its
    /// place. A live agent is never invalidated mid-episode, and the
    /// removal count is met whenever enough inactive genomes exist.
    ///
    /// `excess` is how far the population currently overshoots its bound;
    /// it forces a removal even when the fractional floor rounds to zero
    /// at small population sizes.
    ///
    /// Returns the removed ids.
    #[allow(clippy::cast_precision_loss, clippy::cast_sign_loss, clippy::cast_possible_truncation)]
    pub fn cull(&mut self, fraction: f64, excess: usize, active: &HashSet<GenomeId>) -> Vec<GenomeId> {
        let total = self.state.genomes.len();
        let slice = ((fraction * total as f64).floor() as usize).max(excess);
        if slice == 0 {
            return Vec::new();
        }

        let mut ranked: Vec<(GenomeId, f64)> = self
            .state
            .genomes
            .values()
            .map(|g| (g.id, g.fitness.unwrap_or(f64::NEG_INFINITY)))
            .collect();
        ranked.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

        let removed: Vec<GenomeId> = ranked
            .into_iter()
            .map(|(id, _)| id)
            .filter(|id| !active.contains(id))
            .take(slice)
            .collect();

        for id in &removed {
            self.state.genomes.remove(id);
            self.state.species.remove(id);
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Store = PopulationStore<Vec<f64>>;

    fn genome(id: GenomeId, fitness: Option<f64>) -> Genome<Vec<f64>> {
        Genome {
            id,
            fitness,
            repr: vec![],
        }
    }

    fn store_with(genomes: Vec<Genome<Vec<f64>>>) -> Store {
        let mut state = PopulationState::default();
        for g in genomes {
            state.genomes.insert(g.id, g);
        }
        state.repair_next_id();
        PopulationStore { state }
    }

    #[test]
    fn test_allocate_id_is_monotonic() {
        let mut store = Store::new();
        assert_eq!(store.allocate_id(), 0);
        assert_eq!(store.allocate_id(), 1);
        assert_eq!(store.allocate_id(), 2);
        assert_eq!(store.state.next_id, 3);
    }

    #[test]
    fn test_next_id_exceeds_max_after_insert() {
        let mut store = Store::new();
        let id = store.allocate_id();
        store.insert(genome(id, None));
        assert!(store.state.next_id > id);
    }

    #[test]
    fn test_repair_next_id_fixes_stale_counter() {
        let mut state = PopulationState::<Vec<f64>>::default();
        state.genomes.insert(7, genome(7, Some(1.0)));
        state.next_id = 3; // inconsistent: 3 <= 7
        assert!(state.repair_next_id());
        assert_eq!(state.next_id, 8);
    }

    #[test]
    fn test_repair_next_id_keeps_valid_counter() {
        let mut state = PopulationState::<Vec<f64>>::default();
        state.genomes.insert(2, genome(2, None));
        state.next_id = 10;
        assert!(!state.repair_next_id());
        assert_eq!(state.next_id, 10);
    }

    #[test]
    fn test_set_fitness_unknown_id_returns_false() {
        let mut store = Store::new();
        assert!(!store.set_fitness(99, 1.0));
    }

    #[test]
    fn test_set_fitness_known_id() {
        let mut store = store_with(vec![genome(0, None)]);
        assert!(store.set_fitness(0, 12.5));
        assert_eq!(store.get(0).and_then(|g| g.fitness), Some(12.5));
    }

    #[test]
    fn test_unevaluated_unassigned_skips_active() {
        let store = store_with(vec![genome(0, None), genome(1, None), genome(2, Some(5.0))]);
        let mut active = HashSet::new();
        active.insert(0);
        assert_eq!(store.unevaluated_unassigned(&active), Some(1));
    }

    #[test]
    fn test_unevaluated_unassigned_none_when_all_evaluated() {
        let store = store_with(vec![genome(0, Some(1.0)), genome(1, Some(2.0))]);
        assert_eq!(store.unevaluated_unassigned(&HashSet::new()), None);
    }

    #[test]
    fn test_cull_removes_exactly_floor_of_fraction() {
        // 11 genomes, 20% → floor(2.2) = 2 removed.
        let genomes: Vec<_> = (0..11).map(|i| genome(i, Some(i as f64))).collect();
        let mut store = store_with(genomes);
        let removed = store.cull(0.2, 0, &HashSet::new());
        assert_eq!(removed, vec![0, 1]);
        assert_eq!(store.state.len(), 9);
    }

    #[test]
    fn test_cull_treats_unset_fitness_as_worst() {
        let mut store = store_with(vec![
            genome(0, Some(-100.0)),
            genome(1, None),
            genome(2, Some(1.0)),
            genome(3, Some(2.0)),
            genome(4, Some(3.0)),
        ]);
        // floor(5 * 0.2) = 1: the unevaluated genome ranks below -100.
        let removed = store.cull(0.2, 0, &HashSet::new());
        assert_eq!(removed, vec![1]);
    }

    #[test]
    fn test_cull_never_removes_active() {
        let genomes: Vec<_> = (0..10).map(|i| genome(i, Some(i as f64))).collect();
        let mut store = store_with(genomes);
        let mut active = HashSet::new();
        active.insert(0); // the very worst genome is live
        let removed = store.cull(0.2, 0, &active);
        // The skip moves up the ranking: the next two worst go instead.
        assert_eq!(removed, vec![1, 2]);
        assert!(store.get(0).is_some());
    }

    #[test]
    fn test_cull_stops_when_only_active_remain() {
        let genomes: Vec<_> = (0..5).map(|i| genome(i, Some(i as f64))).collect();
        let mut store = store_with(genomes);
        let active: HashSet<GenomeId> = (0..5).collect();
        assert!(store.cull(0.2, 1, &active).is_empty());
        assert_eq!(store.state.len(), 5);
    }

    #[test]
    fn test_cull_excess_forces_removal_below_fraction_floor() {
        // 3 genomes: floor(3 * 0.2) = 0, but an excess of 1 still removes
        // the worst inactive genome.
        let mut store = store_with(vec![
            genome(0, Some(1.0)),
            genome(1, Some(2.0)),
            genome(2, None),
        ]);
        let mut active = HashSet::new();
        active.insert(2);
        let removed = store.cull(0.2, 1, &active);
        assert_eq!(removed, vec![0]);
        assert_eq!(store.state.len(), 2);
    }

    #[test]
    fn test_cull_noop_on_tiny_population() {
        let mut store = store_with(vec![genome(0, Some(1.0))]);
        assert!(store.cull(0.2, 0, &HashSet::new()).is_empty());
        assert_eq!(store.state.len(), 1);
    }

    #[test]
    fn test_cull_drops_species_assignment_of_removed() {
        let genomes: Vec<_> = (0..10).map(|i| genome(i, Some(i as f64))).collect();
        let mut store = store_with(genomes);
        store.state.species.insert(0, 0);
        store.state.species.insert(9, 1);
        store.cull(0.2, 0, &HashSet::new());
        assert!(!store.state.species.contains_key(&0));
        assert!(store.state.species.contains_key(&9));
    }

    #[test]
    fn test_best_picks_highest_fitness() {
        let store = store_with(vec![genome(0, Some(1.0)), genome(1, Some(9.0)), genome(2, None)]);
        assert_eq!(store.state.best().map(|g| g.id), Some(1));
    }

    #[test]
    fn test_best_none_when_unevaluated() {
        let store = store_with(vec![genome(0, None)]);
        assert!(store.state.best().is_none());
    }

    #[test]
    fn test_state_serde_roundtrip_preserves_counter() {
        let mut store = store_with(vec![genome(0, Some(3.0)), genome(1, None)]);
        store.state.next_id = 5;
        store.state.generation = 2;
        let json = serde_json::to_string(&store.state).expect("test: serialize");
        let back: PopulationState<Vec<f64>> =
            serde_json::from_str(&json).expect("test: deserialize");
        assert_eq!(back.next_id, 5);
        assert_eq!(back.generation, 2);
        assert_eq!(back.genomes.len(), 2);
        assert_eq!(back.genomes.get(&0).and_then(|g| g.fitness), Some(3.0));
    }

    #[test]
    fn test_state_missing_fields_deserialize_to_defaults() {
        // An older schema that only persisted the genome map.
        let json = r#"{"genomes":{}}"#;
        let state: PopulationState<Vec<f64>> =
            serde_json::from_str(json).expect("test: sparse state parses");
        assert_eq!(state.next_id, 0);
        assert_eq!(state.generation, 0);
        assert!(state.species.is_empty());
    }
}
