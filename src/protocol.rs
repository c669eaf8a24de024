//! # Wire protocol — environment message contract
//!
//! ## Responsibility
//! Serde types for the environment's WebSocket messages (handshake, TICK,
//! UPDATE, action commands), the sensor encoding from the raw vision grid
//! to the policy's 11-element input vector, and action decoding (argmax
//! over the 5 policy outputs).
//!
//! ## Guarantees
//! - Exact: serialized JSON matches the server contract byte for byte
//!   (field names, tag casing, direction casing)
//! - Lenient on input: missing handshake stats and absent vision fall back
//!   to documented defaults rather than failing the session
//!
//! ## NOT Responsible For
//! - Transport (see: `agent::session`)
//! - Fitness computation (see: `agent::session`)

use serde::{Deserialize, Serialize};

/// Number of layers in the vision grid (obstacles, scent, threat-size).
pub const VISION_LAYERS: usize = 3;
/// Vision grid side length (9×9, agent at the center).
pub const VISION_SIZE: usize = 9;
/// Center cell index of the vision grid.
pub const VISION_CENTER: usize = 4;
/// Policy input vector length: bias, energy, reserve, scent×4, wall×4.
pub const INPUT_COUNT: usize = 11;
/// Policy output vector length: move UP/DOWN/LEFT/RIGHT, stay.
pub const OUTPUT_COUNT: usize = 5;

/// Raw vision grid: `vision[layer][y][x]`. Layer 0 is obstacles, layer 1
/// the scent gradient, layer 2 threat size.
pub type Vision = Vec<Vec<Vec<f64>>>;

// ── Environment → agent ─────────────────────────────────────────────────

/// Default energy normalization ceiling when the handshake omits it.
fn default_energy_capacity() -> f64 {
    200.0
}

/// Default reserve normalization ceiling when the handshake omits it.
fn default_reserve_capacity() -> f64 {
    100.0
}

/// Per-genome normalization parameters delivered in the handshake.
///
/// Session-scoped only; never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhenotypeStats {
    /// Ceiling used to normalize the energy input.
    #[serde(default = "default_energy_capacity")]
    pub energy_capacity: f64,
    /// Ceiling used to normalize the reserve input.
    #[serde(default = "default_reserve_capacity")]
    pub reserve_capacity: f64,
}

impl Default for PhenotypeStats {
    fn default() -> Self {
        Self {
            energy_capacity: default_energy_capacity(),
            reserve_capacity: default_reserve_capacity(),
        }
    }
}

/// Handshake message, sent once per session before the first TICK.
#[derive(Debug, Clone, Deserialize)]
pub struct Welcome {
    /// Server-assigned session identifier.
    pub id: String,
    /// Normalization parameters for this agent's phenotype.
    #[serde(default)]
    pub phenotype_stats: PhenotypeStats,
}

/// A message from the environment during an episode.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// Per-tick observation; the agent must answer with an action command.
    #[serde(rename = "TICK")]
    Tick {
        /// Server tick counter.
        tick: u64,
        /// Vision grid; `None` means the agent is blind this tick.
        #[serde(default)]
        vision: Option<Vision>,
        /// Current energy.
        #[serde(default)]
        energy: f64,
        /// Current reserve ("stomach").
        #[serde(default)]
        reserve: f64,
    },
    /// State update delivered between ticks; `alive = false` ends the episode.
    #[serde(rename = "UPDATE")]
    Update {
        /// Whether the agent is still alive.
        alive: bool,
        /// Current energy.
        #[serde(default)]
        energy: f64,
    },
}

// ── Agent → environment ─────────────────────────────────────────────────

/// Movement direction. Ignored by the server when the action is `stay`,
/// but always serialized (the wire contract has no optional fields here).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// Move up.
    UP,
    /// Move down.
    DOWN,
    /// Move left.
    LEFT,
    /// Move right.
    RIGHT,
}

/// Action verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    /// Move one cell in `direction`.
    Move,
    /// Stay in place.
    Stay,
}

/// Command sent to the environment in response to a TICK.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionCommand {
    /// Action verb.
    pub action: ActionKind,
    /// Direction; ignored by the server for `stay`.
    pub direction: Direction,
}

/// Decode the policy's output vector into a wire command.
///
/// Argmax over the outputs, first occurrence winning ties:
/// 0=UP, 1=DOWN, 2=LEFT, 3=RIGHT, 4=stay.
pub fn choose_action(outputs: &[f64]) -> ActionCommand {
    let mut best = 0;
    for (i, &v) in outputs.iter().enumerate() {
        if v > outputs[best] {
            best = i;
        }
    }
    match best {
        0 => ActionCommand {
            action: ActionKind::Move,
            direction: Direction::UP,
        },
        1 => ActionCommand {
            action: ActionKind::Move,
            direction: Direction::DOWN,
        },
        2 => ActionCommand {
            action: ActionKind::Move,
            direction: Direction::LEFT,
        },
        3 => ActionCommand {
            action: ActionKind::Move,
            direction: Direction::RIGHT,
        },
        _ => ActionCommand {
            action: ActionKind::Stay,
            direction: Direction::UP,
        },
    }
}

/// Encode a raw observation into the policy's 11-element input vector.
///
/// Layout: `[bias, energy, reserve, scent U/D/L/R, wall U/D/L/R]`. Scent
/// and wall sensors read the four cells adjacent to the grid center
/// (layer 1 and layer 0 respectively). Energy and reserve are clamped to
/// their handshake capacities and normalized to `[0, 1]`.
///
/// A blind observation (no vision, or a malformed grid) encodes to all
/// zeros so a degraded sensor never kills the session.
pub fn encode_inputs(
    vision: Option<&Vision>,
    energy: f64,
    reserve: f64,
    stats: &PhenotypeStats,
) -> Vec<f64> {
    let Some(vision) = vision else {
        return vec![0.0; INPUT_COUNT];
    };

    let cell = |layer: usize, y: usize, x: usize| -> Option<f64> {
        vision.get(layer)?.get(y)?.get(x).copied()
    };

    let c = VISION_CENTER;
    let probe = [
        (c - 1, c), // up
        (c + 1, c), // down
        (c, c - 1), // left
        (c, c + 1), // right
    ];

    let mut walls = [0.0; 4];
    let mut scents = [0.0; 4];
    for (i, &(y, x)) in probe.iter().enumerate() {
        match (cell(0, y, x), cell(1, y, x)) {
            (Some(wall), Some(scent)) => {
                walls[i] = wall;
                scents[i] = scent;
            }
            // Malformed grid: treat the whole observation as blind.
            _ => return vec![0.0; INPUT_COUNT],
        }
    }

    let norm = |value: f64, capacity: f64| -> f64 {
        if capacity <= 0.0 {
            0.0
        } else {
            value.clamp(0.0, capacity) / capacity
        }
    };

    vec![
        1.0,
        norm(energy, stats.energy_capacity),
        norm(reserve, stats.reserve_capacity),
        scents[0],
        scents[1],
        scents[2],
        scents[3],
        walls[0],
        walls[1],
        walls[2],
        walls[3],
    ]
}
