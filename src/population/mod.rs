//! # Population — steady-state genome lifecycle
//!
//! ## Responsibility
//! Everything between "an agent needs a genome" and "an agent reported a
//! death": the genome store with its authoritative id counter, tournament
//! breeding, culling, speciation bookkeeping, and the controller that
//! sequences those under concurrent churn.
//!
//! ## Architecture
//!
//! ```text
//! AgentRuntime ──get_genome / report_death──► PopulationController
//!                                                   │
//!                                      ┌────────────┴───────────┐
//!                                      ▼                        ▼
//!                               PopulationStore              Breeder
//!                          (genomes, next_id, species)  (tournament, cull-free)
//! ```
//!
//! ## Modules
//!
//! - [`store`] — `PopulationState`/`PopulationStore`: genome map, monotonic
//!   id counter, species assignment, cull pass
//! - [`breeder`] — tournament selection and offspring creation
//! - [`controller`] — `PopulationController`: atomic `get_genome` /
//!   `report_death` transitions, speciation refresh, cull trigger
//!
//! ## Guarantees
//!
//! - **Exclusivity**: an id is active on at most one agent, ever
//! - **Monotonic ids**: `next_id > max(id)` at all times; ids never reused
//! - **Live safety**: a cull pass never removes an active genome
//! - **Bounded**: population never exceeds the cull trigger immediately
//!   after a `get_genome` call

pub mod breeder;
pub mod controller;
pub mod store;

use thiserror::Error;

/// Errors specific to the population layer.
#[derive(Debug, Error)]
pub enum PopulationError {
    /// Internal lock was poisoned by a panicking task.
    #[error("population controller lock poisoned")]
    LockPoisoned,
}
