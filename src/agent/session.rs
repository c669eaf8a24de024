//! # Sessions — the environment seam and the episode loop
//!
//! ## Responsibility
//! The [`Environment`] trait that abstracts "somewhere an agent can live",
//! the production WebSocket implementation, and [`run_episode`], which
//! drives one genome from its first tick to its death and scores it.
//!
//! ## Guarantees
//! - One session, one genome, one episode: sessions are never reused
//! - Scoring is monotone in survival: every tick adds, and only positive
//!   energy deltas add (losses are already punished by death arriving
//!   sooner)
//! - A lost connection is a death with partial credit, not an error that
//!   propagates and stalls the fleet
//!
//! ## NOT Responsible For
//! - Fleet sizing and replenishment (see: `runtime`)

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::agent::AgentError;
use crate::config::RunConfig;
use crate::genome::GenomeCapability;
use crate::protocol::{choose_action, encode_inputs, ActionCommand, ServerMessage, Welcome};
use crate::stats::RunStats;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Somewhere an agent can live. Object-safe so the runtime can hold
/// `Arc<dyn Environment>` and tests can substitute a scripted one.
#[async_trait]
pub trait Environment: Send + Sync {
    /// Open one session: connect, complete the handshake, and return the
    /// welcome together with the live session.
    async fn open_session(&self) -> Result<(Welcome, Box<dyn EnvironmentSession>), AgentError>;
}

/// One live agent session. Dropped when the episode ends.
#[async_trait]
pub trait EnvironmentSession: Send {
    /// Receive the next message. `Ok(None)` means the server closed the
    /// session cleanly.
    async fn recv(&mut self) -> Result<Option<ServerMessage>, AgentError>;

    /// Send an action command in response to a tick.
    async fn send_action(&mut self, command: &ActionCommand) -> Result<(), AgentError>;
}

// ── WebSocket implementation ────────────────────────────────────────────

/// The production environment: a WebSocket endpoint speaking the ameba
/// server contract.
#[derive(Debug, Clone)]
pub struct WsEnvironment {
    url: String,
}

impl WsEnvironment {
    /// Create an environment for the given `ws://` or `wss://` URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl Environment for WsEnvironment {
    async fn open_session(&self) -> Result<(Welcome, Box<dyn EnvironmentSession>), AgentError> {
        let (stream, _response) = connect_async(self.url.as_str())
            .await
            .map_err(AgentError::Connect)?;
        let (write, read) = stream.split();
        let mut session = WsSession { write, read };

        // The handshake is the first text frame on the socket.
        let welcome = loop {
            match session.read.next().await {
                Some(Ok(Message::Text(text))) => {
                    break serde_json::from_str::<Welcome>(&text)
                        .map_err(|e| AgentError::Handshake(e.to_string()))?;
                }
                Some(Ok(Message::Close(_))) | None => {
                    return Err(AgentError::Handshake(
                        "connection closed before welcome".to_string(),
                    ));
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(AgentError::Handshake(e.to_string())),
            }
        };

        tracing::debug!(session_id = %welcome.id, "session established");
        Ok((welcome, Box::new(session)))
    }
}

struct WsSession {
    write: SplitSink<WsStream, Message>,
    read: SplitStream<WsStream>,
}

#[async_trait]
impl EnvironmentSession for WsSession {
    async fn recv(&mut self) -> Result<Option<ServerMessage>, AgentError> {
        loop {
            match self.read.next().await {
                Some(Ok(Message::Text(text))) => match serde_json::from_str(&text) {
                    Ok(msg) => return Ok(Some(msg)),
                    // Unknown message types are tolerated and skipped.
                    Err(e) => tracing::debug!(error = %e, "ignoring unrecognized message"),
                },
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(AgentError::Transport(e)),
            }
        }
    }

    async fn send_action(&mut self, command: &ActionCommand) -> Result<(), AgentError> {
        let json = serde_json::to_string(command)?;
        self.write.send(Message::Text(json.into())).await?;
        Ok(())
    }
}

// ── Episode loop ────────────────────────────────────────────────────────

/// What one finished episode amounted to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpisodeOutcome {
    /// Ticks survived.
    pub ticks: u64,
    /// Sum of positive energy deltas over the episode.
    pub energy_gained: f64,
    /// Final fitness: `tick_weight × ticks + energy_weight × energy_gained`.
    pub fitness: f64,
}

/// Drive one genome through one episode until death, disconnect, or the
/// tick ceiling, and score it.
///
/// Never fails: any mid-episode breakdown ends the episode with the
/// fitness earned so far.
pub async fn run_episode<C: GenomeCapability>(
    capability: &C,
    repr: &C::Repr,
    welcome: &Welcome,
    session: &mut dyn EnvironmentSession,
    config: &RunConfig,
    stats: &RunStats,
) -> EpisodeOutcome {
    let mut ticks = 0u64;
    let mut energy_gained = 0.0_f64;
    let mut last_energy: Option<f64> = None;

    loop {
        let msg = match session.recv().await {
            Ok(Some(msg)) => msg,
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(session_id = %welcome.id, error = %e, "session lost mid-episode");
                break;
            }
        };

        match msg {
            ServerMessage::Tick {
                tick,
                vision,
                energy,
                reserve,
            } => {
                ticks += 1;
                if let Some(prev) = last_energy {
                    if energy > prev {
                        energy_gained += energy - prev;
                    }
                }
                last_energy = Some(energy);

                let inputs =
                    encode_inputs(vision.as_ref(), energy, reserve, &welcome.phenotype_stats);
                let outputs = capability.activate(repr, &inputs);
                let command = choose_action(&outputs);
                stats.record_action(command.action, command.direction);

                if let Err(e) = session.send_action(&command).await {
                    tracing::debug!(session_id = %welcome.id, error = %e, "action send failed");
                    break;
                }
                if ticks >= config.max_ticks {
                    tracing::debug!(session_id = %welcome.id, tick, "tick ceiling reached");
                    break;
                }
            }
            ServerMessage::Update { alive, energy } => {
                if let Some(prev) = last_energy {
                    if energy > prev {
                        energy_gained += energy - prev;
                    }
                }
                last_energy = Some(energy);
                if !alive {
                    break;
                }
            }
        }
    }

    let fitness = config.tick_weight * ticks as f64 + config.energy_weight * energy_gained;
    EpisodeOutcome {
        ticks,
        energy_gained,
        fitness,
    }
}
