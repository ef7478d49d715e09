//! Async plumbing for the rollup validator: the base chain watcher, the challenge factory and
//! contracts, the persisted dispute registry and the driver loops run by the `rollup-validator`
//! binary.

use anyhow::Result;
use async_trait::async_trait;

mod types;
pub use types::*;

mod errors;
pub use errors::WatchError;

mod source;
pub use source::{record_from_block, BlockSource, ProviderBlockSource};

mod watcher;
pub use watcher::{
    BlockSubscription, ChainWatcher, WatcherConfig, DEFAULT_CHANNEL_CAPACITY,
    DEFAULT_MAX_FETCH_ATTEMPTS, DEFAULT_RETRY_DELAY,
};

mod auth;
pub use auth::{AuthGuard, TransactionAuth};

/// Contains the smart contract bindings used by the driver.
mod bindings;

mod transact;
pub use transact::{DEFAULT_POLL_INTERVAL, DEFAULT_RECEIPT_RETRIES};

mod factory;
pub use factory::{ChallengeFactory, ContractChallengeFactory, InMemoryChallengeFactory};

mod events;
pub use events::{
    challenge_event_filter, decode_challenge_event, ChallengeEvent, ChallengeEventKind,
    ChallengeEventSource, LogChallengeEvents,
};

mod moves;
pub use moves::{ContractMoveSubmitter, MoveSubmitter};

mod state;
pub use state::{FileSessionStore, MemorySessionStore, SessionStore};

mod registry;
pub use registry::{DisputeRegistry, DEFAULT_ORACLE_TIMEOUT};

mod config;
pub use config::{DriverConfig, Participant, DEFAULT_REORG_WALKBACK};

mod drivers;
pub use drivers::*;

#[cfg(test)]
pub(crate) mod test_utils;

/// The [Driver] trait defines the interface for all driver loops that are ran by the `rollup-validator` binary.
#[async_trait]
pub trait Driver {
    /// Starts the [Driver] loop.
    async fn start_loop(self) -> Result<()>;
}
