//! # Genome capability — pluggable evolvable representation
//!
//! ## Responsibility
//! Define the capability interface the population core depends on
//! (default-initialization, crossover, mutation, compatibility distance,
//! network evaluation) and ship one concrete implementation: a fixed-topology
//! feedforward network over a flat weight vector.
//!
//! ## Guarantees
//! - Opaque: the core never inspects `Repr` internals
//! - Deterministic: all stochastic operations draw from a caller-supplied
//!   seedable PRNG
//! - Serializable: `Repr` round-trips through serde for checkpointing
//!
//! ## NOT Responsible For
//! - Genome lifecycle, ids, or fitness bookkeeping (see: `population`)
//! - Input encoding from raw observations (see: `protocol`)

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Monotonically-assigned, never-reused genome identifier.
pub type GenomeId = u64;

/// An evolvable individual: id, optional fitness, opaque representation.
///
/// Fitness transitions from `None` to `Some` exactly once, when the agent
/// driving this genome dies. A genome is never re-evaluated in place;
/// steady-state replacement breeds a successor instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Genome<R> {
    /// Unique id, allocated from the store's authoritative counter.
    pub id: GenomeId,
    /// Evaluated fitness; `None` until the genome's single evaluation ends.
    pub fitness: Option<f64>,
    /// Opaque evolvable representation.
    pub repr: R,
}

impl<R> Genome<R> {
    /// Create an unevaluated genome.
    pub fn new(id: GenomeId, repr: R) -> Self {
        Self {
            id,
            fitness: None,
            repr,
        }
    }
}

/// Deterministic xorshift64 PRNG used for breeding and mutation.
///
/// Given the same seed and call sequence, results are reproducible — the
/// same discipline the rest of the crate relies on for deterministic tests.
#[derive(Debug, Clone)]
pub struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    /// Create a new PRNG. A zero seed is remapped to 1 (xorshift fixpoint).
    pub fn new(seed: u64) -> Self {
        Self {
            state: if seed == 0 { 1 } else { seed },
        }
    }

    /// Next raw 64-bit value.
    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    /// Uniform value in `[0, 1)`.
    #[allow(clippy::cast_precision_loss)]
    pub fn next_f64(&mut self) -> f64 {
        (self.next_u64() % 1_000_000) as f64 / 1_000_000.0
    }

    /// Uniform index in `[0, modulus)`. Returns 0 for a zero modulus.
    #[allow(clippy::cast_possible_truncation)]
    pub fn next_index(&mut self, modulus: usize) -> usize {
        if modulus == 0 {
            return 0;
        }
        (self.next_u64() as usize) % modulus
    }
}

/// Capability interface for an evolvable policy representation.
///
/// The population core is generic over this trait and treats `Repr` as a
/// black box: it allocates ids, tracks fitness, and asks the capability for
/// everything genetic.
pub trait GenomeCapability: Send + Sync + 'static {
    /// Opaque representation evolved by this capability.
    type Repr: Clone + std::fmt::Debug + Send + Sync + Serialize + DeserializeOwned + 'static;

    /// A brand-new, unmutated default-initialized representation
    /// (the bootstrap path when no evaluated genome exists yet).
    fn default_repr(&self, rng: &mut XorShift64) -> Self::Repr;

    /// Combine two parents into a child representation.
    fn crossover(&self, a: &Self::Repr, b: &Self::Repr, rng: &mut XorShift64) -> Self::Repr;

    /// Mutate a representation in place.
    fn mutate(&self, repr: &mut Self::Repr, rng: &mut XorShift64);

    /// Compatibility distance between two representations, used for
    /// species clustering.
    fn distance(&self, a: &Self::Repr, b: &Self::Repr) -> f64;

    /// Evaluate the policy network: observation inputs to action outputs.
    fn activate(&self, repr: &Self::Repr, inputs: &[f64]) -> Vec<f64>;
}

// ---------------------------------------------------------------------------
// FeedForwardCapability
// ---------------------------------------------------------------------------

/// Flat weight vector for a fixed-topology feedforward network.
///
/// Layout: `[input→hidden weights, hidden biases, hidden→output weights,
/// output biases]`, sized by the owning [`FeedForwardCapability`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedForwardRepr {
    /// All connection weights and biases, flattened.
    pub weights: Vec<f64>,
}

/// Fixed-topology feedforward network capability.
///
/// The default shape matches the original policy: 11 sensor inputs
/// (bias, energy, reserve, scent×4, wall×4), one tanh hidden layer,
/// 5 outputs (move UP/DOWN/LEFT/RIGHT, stay).
#[derive(Debug, Clone)]
pub struct FeedForwardCapability {
    /// Number of sensor inputs.
    pub inputs: usize,
    /// Hidden layer width.
    pub hidden: usize,
    /// Number of action outputs.
    pub outputs: usize,
    /// Per-gene mutation probability.
    pub mutation_rate: f64,
    /// Mutation noise scale.
    pub mutation_strength: f64,
}

impl Default for FeedForwardCapability {
    fn default() -> Self {
        Self {
            inputs: 11,
            hidden: 16,
            outputs: 5,
            mutation_rate: 0.1,
            mutation_strength: 0.5,
        }
    }
}

impl FeedForwardCapability {
    /// Total gene count for this topology.
    pub fn gene_count(&self) -> usize {
        self.inputs * self.hidden + self.hidden + self.hidden * self.outputs + self.outputs
    }
}

impl GenomeCapability for FeedForwardCapability {
    type Repr = FeedForwardRepr;

    fn default_repr(&self, rng: &mut XorShift64) -> FeedForwardRepr {
        let weights = (0..self.gene_count())
            .map(|_| (rng.next_f64() - 0.5) * 2.0)
            .collect();
        FeedForwardRepr { weights }
    }

    fn crossover(&self, a: &FeedForwardRepr, b: &FeedForwardRepr, rng: &mut XorShift64) -> FeedForwardRepr {
        // Uniform crossover, gene by gene. If the parents disagree on
        // length (should not happen within one capability), the shorter
        // parent's tail is taken from the longer.
        let len = a.weights.len().max(b.weights.len());
        let weights = (0..len)
            .map(|i| {
                let va = a.weights.get(i).copied();
                let vb = b.weights.get(i).copied();
                match (va, vb) {
                    (Some(x), Some(y)) => {
                        if rng.next_index(2) == 0 {
                            x
                        } else {
                            y
                        }
                    }
                    (Some(x), None) | (None, Some(x)) => x,
                    (None, None) => 0.0,
                }
            })
            .collect();
        FeedForwardRepr { weights }
    }

    fn mutate(&self, repr: &mut FeedForwardRepr, rng: &mut XorShift64) {
        for w in &mut repr.weights {
            if rng.next_f64() < self.mutation_rate {
                let noise = (rng.next_f64() - 0.5) * 2.0 * self.mutation_strength;
                *w += noise;
            }
        }
    }

    fn distance(&self, a: &FeedForwardRepr, b: &FeedForwardRepr) -> f64 {
        let len = a.weights.len().max(b.weights.len());
        if len == 0 {
            return 0.0;
        }
        let sum: f64 = (0..len)
            .map(|i| {
                let x = a.weights.get(i).copied().unwrap_or(0.0);
                let y = b.weights.get(i).copied().unwrap_or(0.0);
                (x - y).abs()
            })
            .sum();
        #[allow(clippy::cast_precision_loss)]
        {
            sum / len as f64
        }
    }

    fn activate(&self, repr: &FeedForwardRepr, inputs: &[f64]) -> Vec<f64> {
        let w = &repr.weights;
        let ih_end = self.inputs * self.hidden;
        let bh_end = ih_end + self.hidden;
        let ho_end = bh_end + self.hidden * self.outputs;

        let mut hidden_acts = vec![0.0; self.hidden];
        for (h, act) in hidden_acts.iter_mut().enumerate() {
            let mut sum = w.get(bh_end - self.hidden + h).copied().unwrap_or(0.0);
            for (i, &x) in inputs.iter().take(self.inputs).enumerate() {
                sum += x * w.get(i * self.hidden + h).copied().unwrap_or(0.0);
            }
            *act = sum.tanh();
        }

        let mut outputs = vec![0.0; self.outputs];
        for (o, out) in outputs.iter_mut().enumerate() {
            let mut sum = w.get(ho_end + o).copied().unwrap_or(0.0);
            for (h, &act) in hidden_acts.iter().enumerate() {
                sum += act * w.get(bh_end + h * self.outputs + o).copied().unwrap_or(0.0);
            }
            *out = sum;
        }
        outputs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cap() -> FeedForwardCapability {
        FeedForwardCapability::default()
    }

    #[test]
    fn test_xorshift_deterministic() {
        let mut a = XorShift64::new(42);
        let mut b = XorShift64::new(42);
        for _ in 0..100 {
            assert_eq!(a.next_u64(), b.next_u64());
        }
    }

    #[test]
    fn test_xorshift_zero_seed_remapped() {
        let mut rng = XorShift64::new(0);
        // A true zero state would be stuck at zero forever.
        assert_ne!(rng.next_u64(), 0);
    }

    #[test]
    fn test_next_index_in_range() {
        let mut rng = XorShift64::new(7);
        for _ in 0..1000 {
            assert!(rng.next_index(5) < 5);
        }
    }

    #[test]
    fn test_default_repr_has_full_gene_count() {
        let cap = cap();
        let mut rng = XorShift64::new(1);
        let repr = cap.default_repr(&mut rng);
        assert_eq!(repr.weights.len(), cap.gene_count());
    }

    #[test]
    fn test_gene_count_matches_topology() {
        let cap = FeedForwardCapability {
            inputs: 3,
            hidden: 4,
            outputs: 2,
            ..cap()
        };
        assert_eq!(cap.gene_count(), 3 * 4 + 4 + 4 * 2 + 2);
    }

    #[test]
    fn test_crossover_picks_genes_from_parents() {
        let cap = cap();
        let a = FeedForwardRepr {
            weights: vec![1.0; cap.gene_count()],
        };
        let b = FeedForwardRepr {
            weights: vec![-1.0; cap.gene_count()],
        };
        let mut rng = XorShift64::new(9);
        let child = cap.crossover(&a, &b, &mut rng);
        assert_eq!(child.weights.len(), cap.gene_count());
        assert!(child
            .weights
            .iter()
            .all(|&w| (w - 1.0).abs() < f64::EPSILON || (w + 1.0).abs() < f64::EPSILON));
        // With ~900 genes, a uniform pick should draw from both parents.
        assert!(child.weights.iter().any(|&w| w > 0.0));
        assert!(child.weights.iter().any(|&w| w < 0.0));
    }

    #[test]
    fn test_mutate_changes_some_genes() {
        let cap = cap();
        let mut rng = XorShift64::new(3);
        let original = cap.default_repr(&mut rng);
        let mut mutated = original.clone();
        cap.mutate(&mut mutated, &mut rng);
        let changed = original
            .weights
            .iter()
            .zip(&mutated.weights)
            .filter(|(a, b)| (*a - *b).abs() > f64::EPSILON)
            .count();
        assert!(changed > 0, "mutation should perturb at least one gene");
        assert!(changed < original.weights.len(), "mutation rate is per-gene");
    }

    #[test]
    fn test_distance_zero_for_identical() {
        let cap = cap();
        let mut rng = XorShift64::new(5);
        let repr = cap.default_repr(&mut rng);
        assert!(cap.distance(&repr, &repr).abs() < f64::EPSILON);
    }

    #[test]
    fn test_distance_positive_for_different() {
        let cap = cap();
        let a = FeedForwardRepr {
            weights: vec![1.0; cap.gene_count()],
        };
        let b = FeedForwardRepr {
            weights: vec![-1.0; cap.gene_count()],
        };
        assert!((cap.distance(&a, &b) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_activate_output_count() {
        let cap = cap();
        let mut rng = XorShift64::new(11);
        let repr = cap.default_repr(&mut rng);
        let outputs = cap.activate(&repr, &[0.5; 11]);
        assert_eq!(outputs.len(), 5);
        assert!(outputs.iter().all(|o| o.is_finite()));
    }

    #[test]
    fn test_activate_deterministic() {
        let cap = cap();
        let mut rng = XorShift64::new(13);
        let repr = cap.default_repr(&mut rng);
        let inputs = [0.1, 0.2, 0.0, 0.4, 0.0, 0.0, 0.9, 1.0, 0.0, 0.0, 1.0];
        assert_eq!(cap.activate(&repr, &inputs), cap.activate(&repr, &inputs));
    }

    #[test]
    fn test_repr_serde_roundtrip() {
        let cap = cap();
        let mut rng = XorShift64::new(17);
        let repr = cap.default_repr(&mut rng);
        let json = serde_json::to_string(&repr).expect("test: serialize");
        let back: FeedForwardRepr = serde_json::from_str(&json).expect("test: deserialize");
        assert_eq!(repr.weights, back.weights);
    }

    #[test]
    fn test_genome_starts_unevaluated() {
        let g = Genome::new(0, FeedForwardRepr { weights: vec![] });
        assert!(g.fitness.is_none());
        assert_eq!(g.id, 0);
    }
}
