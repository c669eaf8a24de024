//! # Agent layer — episodes against the remote environment
//!
//! ## Responsibility
//! Everything between a genome and the wire: opening a session, driving
//! the observe → activate → act loop, scoring the episode, and keeping a
//! fixed-size fleet of such episodes alive.
//!
//! ## Structure
//! - [`session`] — the [`session::Environment`] seam, the WebSocket
//!   implementation, and the episode runner
//! - [`runtime`] — the fleet: a bounded pool of episode tasks that is
//!   replenished on every death
//!
//! ## NOT Responsible For
//! - Breeding or selection (see: `population`)
//! - Persistence (see: `checkpoint`)

use thiserror::Error;

pub mod runtime;
pub mod session;

/// Errors raised by an agent session.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The initial connection could not be established.
    #[error("failed to connect to the environment: {0}")]
    Connect(#[source] tokio_tungstenite::tungstenite::Error),

    /// The server closed or broke the handshake before sending a welcome.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// The transport failed mid-episode.
    #[error("transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    /// An outgoing command could not be encoded.
    #[error("failed to encode action: {0}")]
    Encode(#[from] serde_json::Error),
}
