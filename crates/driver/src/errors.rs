//! Errors surfaced by the chain watcher.

use ethers::types::H256;
use thiserror::Error;

/// A [WatchError] terminates a block subscription. Transient fetch failures are retried inside
/// the watcher and never surface.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WatchError {
    /// The block fetched at `height` does not build on the previously emitted block. The caller
    /// must resubscribe from a known-good ancestor.
    #[error("reorg detected at height {height}: expected parent {expected_parent:?}, found {found_parent:?}")]
    ReorgDetected {
        height: u64,
        expected_parent: H256,
        found_parent: H256,
    },
    /// The block at `height` could not be fetched in `attempts` consecutive attempts.
    #[error("next header at height {height} not found after {attempts} attempts")]
    RetriesExhausted { height: u64, attempts: usize },
}
