//! The `driver` module contains implementations of the [Driver] trait.

use crate::{
    BlockId, BlockSource, ChainWatcher, ChallengeEvent, ChallengeEventKind, Driver, DriverConfig,
    WatchError,
};
use anyhow::Result;
use async_trait::async_trait;
use ethers::types::Address;
use rollup_validator_solvers::bisection::{
    BisectionSolver, ChallengeState, DisputeSolver, Response,
};
use std::{collections::HashMap, sync::Arc};

/// Defines a new [Driver] implementation whose loop is the async function `$inner`, taking the
/// shared [DriverConfig].
#[macro_export]
macro_rules! define_driver {
    ($name:ident, $inner:ident) => {
        #[doc = concat!("Variant of the [Driver] trait: [", stringify!($name), "]")]
        #[derive(Debug)]
        pub struct $name {
            /// The configuration for all of the drivers.
            pub config: Arc<DriverConfig>,
        }

        #[async_trait]
        impl Driver for $name {
            async fn start_loop(self) -> Result<()> {
                $inner(self.config).await
            }
        }

        impl $name {
            #[doc = concat!("Creates a new instance of the [", stringify!($name), "] driver.")]
            pub fn new(config: Arc<DriverConfig>) -> Self {
                Self { config }
            }
        }
    };
}

define_driver!(ChainHeadDriver, chain_head_loop);
define_driver!(ChallengeEventDriver, challenge_event_loop);
define_driver!(DisputeSolverDriver, dispute_solver_loop);

/// Follows the base chain from its current head and sweeps the dispute registry for
/// timeout-forfeits at every new block.
async fn chain_head_loop(config: Arc<DriverConfig>) -> Result<()> {
    let watcher = ChainWatcher::new(Arc::clone(&config.block_source), config.watcher);
    let mut start = watcher.current_block().await?;
    tracing::info!(target: "chain-head-driver", "Following the base chain from block {}", start.height);

    loop {
        let mut subscription = watcher.subscribe(start);
        let mut last_good = start;

        start = loop {
            match subscription.recv().await {
                Some(Ok(block)) => {
                    last_good = block;
                    config.publish_head(block);
                    sweep_expired(&config, block).await;
                }
                Some(Err(WatchError::ReorgDetected { height, .. })) => {
                    tracing::warn!(target: "chain-head-driver", "Reorg at block {}, walking back {} blocks", height, config.reorg_walkback);
                    // Give the node time to settle on the new branch.
                    tokio::time::sleep(config.watcher.retry_delay).await;
                    break resume_point(&config, &watcher, last_good).await;
                }
                Some(Err(e @ WatchError::RetriesExhausted { .. })) => {
                    tracing::warn!(target: "chain-head-driver", "{}, resubscribing from block {}", e, last_good.height);
                    break last_good;
                }
                None => {
                    tracing::info!(target: "chain-head-driver", "Block subscription closed, stopping");
                    return Ok(());
                }
            }
        };
        tracing::debug!(target: "chain-head-driver", "Resubscribing from block {}", start.height);
    }
}

/// Picks the block to resubscribe from after a reorg: the ancestor `reorg_walkback` blocks below
/// `last_good`, or the current head if the ancestor is unknown. Fetches are retried with the
/// watcher's schedule, and `last_good` itself is used once they are exhausted.
async fn resume_point(
    config: &DriverConfig,
    watcher: &ChainWatcher<dyn BlockSource>,
    last_good: BlockId,
) -> BlockId {
    let ancestor = last_good.height.saturating_sub(config.reorg_walkback);
    let attempts = config.watcher.max_fetch_attempts.max(1);

    for attempt in 1..=attempts {
        let fetched = match config.block_source.block_by_height(ancestor).await {
            Ok(Some(record)) => return record.id,
            Ok(None) => watcher.current_block().await,
            Err(e) => Err(e),
        };
        match fetched {
            Ok(head) => return head,
            Err(e) => {
                tracing::warn!(target: "chain-head-driver", "Error finding the walk-back block (attempt {}/{}): {}", attempt, attempts, e);
            }
        }
        if attempt < attempts {
            tokio::time::sleep(config.watcher.retry_delay).await;
        }
    }

    tracing::error!(target: "chain-head-driver", "Could not walk back from block {}, resubscribing from it", last_good.height);
    last_good
}

/// Resolves every dispute whose deadline has passed at `block`.
async fn sweep_expired(config: &DriverConfig, block: BlockId) {
    match config.registry.expire_all(block.height).await {
        Ok(resolved) => {
            for (handle, resolution) in resolved {
                tracing::info!(target: "dispute-registry", "Challenge {:?} timed out at block {}, {} wins", handle, block.height, resolution.winner);
            }
        }
        Err(e) => {
            // Soft failure, log the error and continue.
            tracing::error!(target: "dispute-registry", "Error sweeping expired challenges: {}", e);
        }
    }
}

/// Follows the challenge event feed: tracks the challenges the validator takes part in and
/// applies every move made in them to the local sessions.
async fn challenge_event_loop(config: Arc<DriverConfig>) -> Result<()> {
    tracing::info!(target: "challenge-event-driver", "Subscribing to challenge events...");
    loop {
        match config.events.subscribe().await {
            Ok(mut events) => {
                tracing::info!(target: "challenge-event-driver", "Subscribed to challenge events, beginning event loop.");
                while let Some(event) = events.recv().await {
                    handle_challenge_event(&config, event).await;
                }
                tracing::warn!(target: "challenge-event-driver", "Challenge event feed closed, resubscribing");
            }
            Err(e) => {
                // Soft failure, log the error and retry.
                tracing::error!(target: "challenge-event-driver", "Error subscribing to challenge events: {}", e);
            }
        }
        tokio::time::sleep(config.watcher.retry_delay).await;
    }
}

async fn handle_challenge_event(config: &DriverConfig, event: ChallengeEvent) {
    let ChallengeEvent {
        handle,
        height,
        kind,
    } = event;

    match kind {
        ChallengeEventKind::Created {
            asserter,
            challenger,
            challenge_type,
        } => {
            let identity = config.participant.identity;
            if asserter != identity && challenger != identity {
                tracing::trace!(target: "challenge-event-driver", "Ignoring challenge {:?} between {:?} and {:?}", handle, asserter, challenger);
                return;
            }
            tracing::debug!(target: "challenge-event-driver", "{:?} challenge {:?} created at block {}", challenge_type, handle, height);
            match config.registry.track_created(handle, height).await {
                Ok(true) => config.notify_sessions_changed(),
                Ok(false) => {}
                Err(e) => {
                    tracing::error!(target: "challenge-event-driver", "Error tracking challenge {:?}: {}", handle, e);
                }
            }
        }
        ChallengeEventKind::Moved(response) => {
            let state = match config.registry.session(handle).await {
                Ok(Some(state)) => state,
                Ok(None) => return,
                Err(e) => {
                    tracing::error!(target: "challenge-event-driver", "Error loading challenge {:?}: {}", handle, e);
                    return;
                }
            };
            // The contract only accepts moves from the party on turn.
            let caller = state.address_of(state.turn);
            match config.registry.apply(handle, caller, response, height).await {
                Ok(Some(resolution)) => {
                    tracing::info!(target: "challenge-event-driver", "Challenge {:?} resolved at block {}, {} wins", handle, height, resolution.winner);
                }
                Ok(None) => {
                    tracing::debug!(target: "challenge-event-driver", "Applied the {}'s move in challenge {:?}", state.turn, handle);
                }
                Err(e) => {
                    // Soft failure, log the error and continue.
                    tracing::warn!(target: "challenge-event-driver", "Move in challenge {:?} not applied: {}", handle, e);
                }
            }
            config.notify_sessions_changed();
        }
    }
}

/// Answers every live dispute in which it is the validator's turn, whenever the base chain
/// advances or a session changes.
async fn dispute_solver_loop(config: Arc<DriverConfig>) -> Result<()> {
    let mut heads = config.subscribe_heads();
    // The state each submitted move answered. A session is not answered twice in the same state.
    let mut answered = HashMap::new();
    tracing::info!(target: "dispute-solver-driver", "Solving disputes as {:?}", config.participant.identity);

    loop {
        let head = heads.borrow_and_update().map(|head| head.height);
        solve_live_sessions(&config, head, &mut answered).await;

        tokio::select! {
            changed = heads.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
            }
            _ = config.sessions_changed() => {}
        }
    }
}

async fn solve_live_sessions(
    config: &DriverConfig,
    head: Option<u64>,
    answered: &mut HashMap<Address, ChallengeState>,
) {
    let live = match config.registry.live_sessions().await {
        Ok(live) => live,
        Err(e) => {
            tracing::error!(target: "dispute-solver-driver", "Error listing live challenges: {}", e);
            return;
        }
    };
    answered.retain(|handle, _| live.iter().any(|state| state.handle == *handle));

    for state in live {
        let Some(role) = state.role_of(config.participant.identity) else {
            continue;
        };
        if state.turn != role || answered.get(&state.handle) == Some(&state) {
            continue;
        }
        if head.map_or(false, |height| height > state.deadline) {
            tracing::warn!(target: "dispute-solver-driver", "Missed the deadline of challenge {:?}", state.handle);
            continue;
        }

        let solver = BisectionSolver::new(role, Arc::clone(&config.participant.trace));
        let response = match solver.respond(&state) {
            Ok(Response::DoNothing) => continue,
            Ok(response) => response,
            Err(e) => {
                tracing::error!(target: "dispute-solver-driver", "Error solving challenge {:?}: {}", state.handle, e);
                continue;
            }
        };

        match config.moves.submit(state.handle, &response).await {
            Ok(()) => {
                tracing::info!(target: "dispute-solver-driver", "Answered challenge {:?} in round {}", state.handle, state.round);
                answered.insert(state.handle, state);
            }
            Err(e) => {
                // Soft failure, the move is retried on the next wake-up.
                tracing::error!(target: "dispute-solver-driver", "Error submitting move to challenge {:?}: {}", state.handle, e);
                answered.remove(&state.handle);
            }
        }
    }
}
