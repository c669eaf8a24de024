//! # AgentRuntime — the bounded episode fleet
//!
//! ## Responsibility
//! Keep exactly `target_pop_size` episode tasks alive. Each task checks
//! out a genome, lives one episode, reports the death, and exits; the
//! runtime immediately spawns a replacement into the freed slot.
//!
//! ## Guarantees
//! - Never more than `target_pop_size` concurrent episodes
//! - Every checked-out genome is reported dead exactly once, including
//!   when the session never produced a single tick (fitness 0)
//! - A failing server degrades to paced reconnect attempts, never a
//!   hot spin
//!
//! ## NOT Responsible For
//! - Scoring (see: `session::run_episode`)
//! - Selection and culling (see: `population::controller`)

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::agent::session::{run_episode, Environment};
use crate::config::RunConfig;
use crate::genome::GenomeCapability;
use crate::population::controller::PopulationController;
use crate::stats::RunStats;

/// Owns the episode fleet for one training run.
pub struct AgentRuntime<C: GenomeCapability> {
    controller: PopulationController<C>,
    environment: Arc<dyn Environment>,
    capability: Arc<C>,
    config: Arc<RunConfig>,
    stats: RunStats,
}

impl<C: GenomeCapability> AgentRuntime<C> {
    /// Assemble a runtime. The capability and config should be the same
    /// handles the controller was built with.
    pub fn new(
        controller: PopulationController<C>,
        environment: Arc<dyn Environment>,
        capability: Arc<C>,
        config: Arc<RunConfig>,
        stats: RunStats,
    ) -> Self {
        Self {
            controller,
            environment,
            capability,
            config,
            stats,
        }
    }

    /// Run the fleet until the shutdown signal fires.
    ///
    /// Initial spawns and refills are staggered by `spawn_stagger_ms` so
    /// neither a fresh run nor a mass die-off stampedes the server with
    /// simultaneous connections.
    pub async fn run(&self, mut shutdown_rx: watch::Receiver<bool>) {
        let mut fleet = JoinSet::new();
        let stagger = Duration::from_millis(self.config.spawn_stagger_ms);

        for slot in 0..self.config.target_pop_size {
            if slot > 0 && !stagger.is_zero() {
                tokio::time::sleep(stagger).await;
            }
            fleet.spawn(self.episode_task(slot));
        }
        tracing::info!(slots = self.config.target_pop_size, "fleet running");

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    tracing::info!("fleet shutting down");
                    break;
                }
                joined = fleet.join_next() => {
                    let Some(result) = joined else { break };
                    if let Err(e) = result {
                        tracing::error!(error = %e, "episode task aborted");
                    }
                    // Refills pace through the same stagger as the initial
                    // wave, so simultaneous deaths (a server dropping every
                    // session at once) do not reconnect in a burst.
                    if !stagger.is_zero() {
                        tokio::time::sleep(stagger).await;
                    }
                    fleet.spawn(self.episode_task(self.config.target_pop_size));
                }
            }
        }

        fleet.shutdown().await;
    }

    /// One slot's lifetime: checkout, episode, death report.
    fn episode_task(&self, slot: usize) -> impl std::future::Future<Output = ()> + Send + 'static {
        let controller = self.controller.clone();
        let environment = Arc::clone(&self.environment);
        let capability = Arc::clone(&self.capability);
        let config = Arc::clone(&self.config);
        let stats = self.stats.clone();
        // Failed slots re-enter through the same stagger pause as the
        // initial spawn wave, so a dead server is probed, not hammered.
        let retry_pause = Duration::from_millis(self.config.spawn_stagger_ms);

        async move {
            let genome = match controller.get_genome() {
                Ok(genome) => genome,
                Err(e) => {
                    tracing::error!(slot, error = %e, "genome checkout failed");
                    tokio::time::sleep(retry_pause).await;
                    return;
                }
            };

            let (welcome, mut session) = match environment.open_session().await {
                Ok(opened) => opened,
                Err(e) => {
                    tracing::warn!(slot, genome = genome.id, error = %e, "session setup failed");
                    stats.record_session_failure();
                    // A genome that never got a tick scores zero; holding
                    // it back would starve the gene pool when the server
                    // is flaky.
                    controller.report_death(genome.id, 0.0);
                    tokio::time::sleep(retry_pause).await;
                    return;
                }
            };

            let outcome = run_episode(
                capability.as_ref(),
                &genome.repr,
                &welcome,
                session.as_mut(),
                &config,
                &stats,
            )
            .await;

            tracing::info!(
                slot,
                genome = genome.id,
                session_id = %welcome.id,
                ticks = outcome.ticks,
                energy_gained = outcome.energy_gained,
                fitness = outcome.fitness,
                "episode finished"
            );
            stats.record_episode(outcome.fitness);
            controller.report_death(genome.id, outcome.fitness);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::session::EnvironmentSession;
    use crate::agent::AgentError;
    use crate::genome::FeedForwardCapability;
    use crate::protocol::{ActionCommand, ServerMessage, Welcome};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Environment whose agents survive a fixed tick count then die.
    struct MortalEnvironment {
        lifespan: u64,
        opened: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Environment for MortalEnvironment {
        async fn open_session(
            &self,
        ) -> Result<(Welcome, Box<dyn EnvironmentSession>), AgentError> {
            let n = self.opened.fetch_add(1, Ordering::SeqCst);
            let welcome = Welcome {
                id: format!("mock-{n}"),
                phenotype_stats: Default::default(),
            };
            Ok((
                welcome,
                Box::new(MortalSession {
                    remaining: self.lifespan,
                }),
            ))
        }
    }

    struct MortalSession {
        remaining: u64,
    }

    #[async_trait]
    impl EnvironmentSession for MortalSession {
        async fn recv(&mut self) -> Result<Option<ServerMessage>, AgentError> {
            if self.remaining > 0 {
                self.remaining -= 1;
                Ok(Some(ServerMessage::Tick {
                    tick: self.remaining,
                    vision: None,
                    energy: 10.0,
                    reserve: 0.0,
                }))
            } else {
                Ok(Some(ServerMessage::Update {
                    alive: false,
                    energy: 0.0,
                }))
            }
        }

        async fn send_action(&mut self, _command: &ActionCommand) -> Result<(), AgentError> {
            Ok(())
        }
    }

    /// Environment where every connection attempt fails.
    struct DownEnvironment;

    #[async_trait]
    impl Environment for DownEnvironment {
        async fn open_session(
            &self,
        ) -> Result<(Welcome, Box<dyn EnvironmentSession>), AgentError> {
            Err(AgentError::Handshake("server down".to_string()))
        }
    }

    fn test_config(target_pop_size: usize) -> Arc<RunConfig> {
        Arc::new(RunConfig {
            target_pop_size,
            spawn_stagger_ms: 0,
            ..RunConfig::default()
        })
    }

    fn build_runtime(
        environment: Arc<dyn Environment>,
        config: Arc<RunConfig>,
    ) -> (AgentRuntime<FeedForwardCapability>, RunStats) {
        let capability = Arc::new(FeedForwardCapability::default());
        let controller = PopulationController::new(Arc::clone(&capability), Arc::clone(&config));
        let stats = RunStats::new();
        let runtime = AgentRuntime::new(
            controller,
            environment,
            capability,
            config,
            stats.clone(),
        );
        (runtime, stats)
    }

    #[tokio::test]
    async fn test_fleet_evaluates_and_replenishes() {
        let opened = Arc::new(AtomicUsize::new(0));
        let environment = Arc::new(MortalEnvironment {
            lifespan: 2,
            opened: Arc::clone(&opened),
        });
        let config = test_config(3);
        let (runtime, stats) = build_runtime(environment, config);
        let controller = runtime.controller.clone();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let fleet = tokio::spawn(async move { runtime.run(shutdown_rx).await });
        tokio::time::sleep(Duration::from_millis(300)).await;
        shutdown_tx.send(true).expect("test: shutdown");
        fleet.await.expect("test: fleet join");

        let episodes = stats.sample().episodes;
        assert!(episodes >= 3, "expected replenishment, got {episodes} episodes");
        // Sessions open at shutdown never finish, so opened >= finished.
        assert!(opened.load(Ordering::SeqCst) as u64 >= episodes);

        let summary = controller.summary();
        assert!(summary.evaluated >= 1);
        assert!(
            summary.population <= 2 * 3,
            "population {} exceeded the cull bound",
            summary.population
        );
    }

    #[tokio::test]
    async fn test_active_episodes_never_exceed_target() {
        let opened = Arc::new(AtomicUsize::new(0));
        let environment = Arc::new(MortalEnvironment {
            lifespan: 5,
            opened,
        });
        let config = test_config(2);
        let (runtime, _) = build_runtime(environment, config);
        let controller = runtime.controller.clone();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let fleet = tokio::spawn(async move { runtime.run(shutdown_rx).await });
        for _ in 0..20 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let active = controller.active_count();
            assert!(active <= 2, "active {active} exceeded the fleet size");
        }
        shutdown_tx.send(true).expect("test: shutdown");
        fleet.await.expect("test: fleet join");
    }

    #[tokio::test]
    async fn test_refills_are_staggered_after_simultaneous_deaths() {
        // Sessions die on their first message, so every slot frees up at
        // once; the refill pacing is the only thing limiting reconnects.
        let opened = Arc::new(AtomicUsize::new(0));
        let environment = Arc::new(MortalEnvironment {
            lifespan: 0,
            opened: Arc::clone(&opened),
        });
        let config = Arc::new(RunConfig {
            target_pop_size: 2,
            spawn_stagger_ms: 40,
            ..RunConfig::default()
        });
        let (runtime, _) = build_runtime(environment, config);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let fleet = tokio::spawn(async move { runtime.run(shutdown_rx).await });
        tokio::time::sleep(Duration::from_millis(400)).await;
        shutdown_tx.send(true).expect("test: shutdown");
        fleet.await.expect("test: fleet join");

        let connects = opened.load(Ordering::SeqCst);
        assert!(connects >= 3, "expected refills, got {connects} connects");
        // 400ms at one refill per 40ms plus the initial wave; anything
        // well beyond that means refills reconnected back-to-back.
        assert!(connects <= 15, "{connects} connects in 400ms is a burst");
    }

    #[tokio::test]
    async fn test_unreachable_server_scores_zero_and_records_failures() {
        let config = test_config(1);
        let (runtime, stats) = build_runtime(Arc::new(DownEnvironment), config);
        let controller = runtime.controller.clone();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let fleet = tokio::spawn(async move { runtime.run(shutdown_rx).await });
        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown_tx.send(true).expect("test: shutdown");
        fleet.await.expect("test: fleet join");

        assert!(stats.sample().session_failures >= 1);
        let summary = controller.summary();
        assert!(summary.evaluated >= 1, "failed session must still score");
        assert_eq!(summary.best_fitness, Some(0.0));
    }
}
