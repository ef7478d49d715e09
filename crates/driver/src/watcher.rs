//! The watcher module contains the [ChainWatcher], which turns a [BlockSource] into a
//! reorg-aware, cancellable stream of canonical block identifiers.

use crate::{BlockId, BlockSource, MaybeBlockId, WatchError};
use anyhow::Result;
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};

/// The default delay between two fetch attempts at the same height.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(2);

/// The default number of consecutive failed fetches at one height before a subscription fails.
pub const DEFAULT_MAX_FETCH_ATTEMPTS: usize = 5;

/// The default number of block identifiers a subscription buffers ahead of its reader.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 100;

/// The [WatcherConfig] struct contains the retry and buffering settings of a [ChainWatcher].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatcherConfig {
    /// The delay between two fetch attempts at the same height.
    pub retry_delay: Duration,
    /// The number of consecutive failed fetches at one height before the subscription fails.
    pub max_fetch_attempts: usize,
    /// The capacity of the subscription channel.
    pub channel_capacity: usize,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            retry_delay: DEFAULT_RETRY_DELAY,
            max_fetch_attempts: DEFAULT_MAX_FETCH_ATTEMPTS,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// The [ChainWatcher] follows the base chain from a given block.
#[derive(Debug)]
pub struct ChainWatcher<S: ?Sized> {
    source: Arc<S>,
    config: WatcherConfig,
}

impl<S: BlockSource + ?Sized + 'static> ChainWatcher<S> {
    /// Creates a new [ChainWatcher] over `source`.
    pub fn new(source: Arc<S>, config: WatcherConfig) -> Self {
        Self { source, config }
    }

    /// Returns the identifier of the latest block known to the source.
    pub async fn current_block(&self) -> Result<BlockId> {
        Ok(self.source.latest_block().await?.id)
    }

    /// Subscribes to the chain starting at `start`.
    ///
    /// The subscription yields `start` first, then every following block in height order. It
    /// ends after a single [WatchError] if a reorg is detected or the next block cannot be
    /// fetched, and ends silently once cancelled or dropped.
    pub fn subscribe(&self, start: BlockId) -> BlockSubscription {
        let (sender, receiver) = mpsc::channel(self.config.channel_capacity.max(1));
        let (cancel, cancelled) = watch::channel(false);
        let handle = tokio::spawn(watch_chain(
            Arc::clone(&self.source),
            self.config,
            start,
            sender,
            cancelled,
        ));
        BlockSubscription {
            receiver,
            cancel,
            handle,
        }
    }
}

/// A live subscription created by [ChainWatcher::subscribe]. Dropping it cancels the background
/// task.
#[derive(Debug)]
pub struct BlockSubscription {
    receiver: mpsc::Receiver<MaybeBlockId>,
    cancel: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl BlockSubscription {
    /// Receives the next element, or `None` once the subscription has ended.
    pub async fn recv(&mut self) -> Option<MaybeBlockId> {
        self.receiver.recv().await
    }

    /// Stops the subscription. No element is produced after cancellation is observed.
    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }

    /// Returns whether the background task has exited.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for BlockSubscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Resolves once the subscription has been cancelled or its owner is gone.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    while !*cancel.borrow_and_update() {
        if cancel.changed().await.is_err() {
            return;
        }
    }
}

/// Sends `item` unless the subscription is cancelled first. Returns whether the item was
/// delivered.
async fn emit(
    sender: &mpsc::Sender<MaybeBlockId>,
    cancel: &mut watch::Receiver<bool>,
    item: MaybeBlockId,
) -> bool {
    tokio::select! {
        biased;
        _ = cancelled(cancel) => false,
        sent = sender.send(item) => sent.is_ok(),
    }
}

async fn watch_chain<S: BlockSource + ?Sized>(
    source: Arc<S>,
    config: WatcherConfig,
    start: BlockId,
    sender: mpsc::Sender<MaybeBlockId>,
    mut cancel: watch::Receiver<bool>,
) {
    if !emit(&sender, &mut cancel, Ok(start)).await {
        return;
    }

    let mut previous = start;
    loop {
        let height = previous.height + 1;
        let mut failures = 0;

        let record = loop {
            let fetched = tokio::select! {
                biased;
                _ = cancelled(&mut cancel) => return,
                fetched = source.block_by_height(height) => fetched,
            };
            match fetched {
                Ok(Some(record)) => break record,
                Ok(None) => {
                    tracing::trace!(target: "chain-watcher", "Block {} not found on attempt {}", height, failures);
                }
                Err(e) => {
                    tracing::warn!(target: "chain-watcher", "Failed to fetch block {} on attempt {}: {}", height, failures, e);
                }
            }

            if *cancel.borrow() {
                return;
            }

            failures += 1;
            if failures >= config.max_fetch_attempts {
                tracing::error!(target: "chain-watcher", "Next header not found after {} attempts", failures);
                emit(
                    &sender,
                    &mut cancel,
                    Err(WatchError::RetriesExhausted {
                        height,
                        attempts: failures,
                    }),
                )
                .await;
                return;
            }

            // The header was not found, wait before checking again.
            tokio::select! {
                biased;
                _ = cancelled(&mut cancel) => return,
                _ = tokio::time::sleep(config.retry_delay) => {}
            }
        };

        if record.parent_hash != previous.header_hash {
            tracing::warn!(target: "chain-watcher", "Reorg detected at block {}: parent {:?} does not match {:?}", height, record.parent_hash, previous.header_hash);
            emit(
                &sender,
                &mut cancel,
                Err(WatchError::ReorgDetected {
                    height,
                    expected_parent: previous.header_hash,
                    found_parent: record.parent_hash,
                }),
            )
            .await;
            return;
        }

        previous = record.id;
        if !emit(&sender, &mut cancel, Ok(previous)).await {
            return;
        }
    }
}
