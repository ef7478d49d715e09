//! The `config` module contains the [DriverConfig].

use crate::{BlockId, BlockSource, ChallengeEventSource, DisputeRegistry, MoveSubmitter, WatcherConfig};
use ethers::types::Address;
use rollup_validator_solvers::bisection::TraceProvider;
use std::sync::Arc;
use tokio::sync::{watch, Notify};

/// The default number of blocks the chain head driver walks back after a reorg.
pub const DEFAULT_REORG_WALKBACK: u64 = 10;

/// The validator's side of every dispute: who it signs as and the execution trace it believes.
#[derive(Clone)]
pub struct Participant {
    /// The address the validator's moves are sent from.
    pub identity: Address,
    /// The validator's own view of the execution trace.
    pub trace: Arc<dyn TraceProvider + Send + Sync>,
}

impl std::fmt::Debug for Participant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Participant")
            .field("identity", &self.identity)
            .field("trace_length", &self.trace.length())
            .finish()
    }
}

/// The [DriverConfig] struct contains the configuration for the [Driver](crate::Driver) implementations.
pub struct DriverConfig {
    /// The source of base chain blocks. This source is the validator's only view of the base
    /// chain clock.
    pub block_source: Arc<dyn BlockSource>,
    /// The feed of challenge creations and moves on the base chain.
    pub events: Arc<dyn ChallengeEventSource>,
    /// Sends the validator's moves to the base chain.
    pub moves: Arc<dyn MoveSubmitter>,
    /// The registry of all disputes the validator takes part in.
    pub registry: Arc<DisputeRegistry>,
    /// The validator's identity and trace.
    pub participant: Participant,
    /// The retry and buffering settings of the chain watcher.
    pub watcher: WatcherConfig,
    /// The number of blocks to walk back from the last good block after a reorg.
    pub reorg_walkback: u64,
    /// Publishes the latest canonical block seen by the chain head driver.
    heads: watch::Sender<Option<BlockId>>,
    /// Wakes the solver driver when a session changed.
    sessions_changed: Notify,
}

impl std::fmt::Debug for DriverConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverConfig")
            .field("registry", &self.registry)
            .field("participant", &self.participant)
            .field("watcher", &self.watcher)
            .field("reorg_walkback", &self.reorg_walkback)
            .finish_non_exhaustive()
    }
}

impl DriverConfig {
    /// Creates a new [DriverConfig] with the given configuration.
    pub fn new(
        block_source: Arc<dyn BlockSource>,
        events: Arc<dyn ChallengeEventSource>,
        moves: Arc<dyn MoveSubmitter>,
        registry: Arc<DisputeRegistry>,
        participant: Participant,
        watcher: WatcherConfig,
        reorg_walkback: u64,
    ) -> Self {
        let (heads, _) = watch::channel(None);
        Self {
            block_source,
            events,
            moves,
            registry,
            participant,
            watcher,
            reorg_walkback,
            heads,
            sessions_changed: Notify::new(),
        }
    }

    /// Returns a receiver that observes every canonical block the chain head driver reaches.
    pub fn subscribe_heads(&self) -> watch::Receiver<Option<BlockId>> {
        self.heads.subscribe()
    }

    /// Publishes a new canonical head.
    pub(crate) fn publish_head(&self, head: BlockId) {
        self.heads.send_replace(Some(head));
    }

    /// Signals that a session was created or moved.
    pub(crate) fn notify_sessions_changed(&self) {
        self.sessions_changed.notify_one();
    }

    /// Waits for the next [DriverConfig::notify_sessions_changed].
    pub(crate) async fn sessions_changed(&self) {
        self.sessions_changed.notified().await
    }
}
