//! Test utilities for the driver: a scripted [BlockSource] and simulated challenge contracts.

use crate::{
    BlockId, BlockRecord, BlockSource, ChallengeEvent, ChallengeEventKind, ChallengeEventSource,
    MoveSubmitter,
};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use ethers::types::{Address, H256};
use rollup_validator_solvers::bisection::{ChallengeType, Response};
use std::{
    collections::{HashMap, VecDeque},
    sync::Mutex,
};
use tokio::sync::mpsc::{self, error::TrySendError};

/// A failure served by the [ScriptedBlockSource] before the block at a height is returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Miss {
    /// The block is not known yet.
    NotFound,
    /// The transport failed.
    Transport,
}

/// A mock block source serving a fixed chain, with scripted misses per height.
#[derive(Debug, Default)]
pub(crate) struct ScriptedBlockSource {
    /// Maps block heights to block records.
    blocks: Mutex<HashMap<u64, BlockRecord>>,
    /// Maps block heights to the misses served before the block.
    misses: Mutex<HashMap<u64, VecDeque<Miss>>>,
    /// Maps block heights to the number of fetches at that height.
    fetches: Mutex<HashMap<u64, usize>>,
}

/// Returns the header hash used for the canonical block at `height`.
pub(crate) fn canonical_hash(height: u64) -> H256 {
    H256::from_low_u64_be(height.wrapping_add(1))
}

/// Returns the canonical [BlockId] at `height`.
pub(crate) fn canonical_id(height: u64) -> BlockId {
    BlockId {
        height,
        header_hash: canonical_hash(height),
    }
}

impl ScriptedBlockSource {
    /// Creates a source serving a correctly linked chain over `heights`.
    pub(crate) fn linked(heights: std::ops::RangeInclusive<u64>) -> Self {
        let source = Self::default();
        for height in heights {
            source.insert_block(BlockRecord {
                id: canonical_id(height),
                parent_hash: canonical_hash(height.wrapping_sub(1)),
            });
        }
        source
    }

    /// Inserts or replaces a block.
    pub(crate) fn insert_block(&self, record: BlockRecord) {
        self.blocks
            .lock()
            .unwrap()
            .insert(record.id.height, record);
    }

    /// Serves `misses` at `height` before the block.
    pub(crate) fn script_misses(&self, height: u64, misses: &[Miss]) {
        self.misses
            .lock()
            .unwrap()
            .entry(height)
            .or_default()
            .extend(misses.iter().copied());
    }

    /// Returns the number of fetches made at `height`.
    pub(crate) fn fetches(&self, height: u64) -> usize {
        self.fetches
            .lock()
            .unwrap()
            .get(&height)
            .copied()
            .unwrap_or_default()
    }
}

#[async_trait]
impl BlockSource for ScriptedBlockSource {
    async fn block_by_height(&self, height: u64) -> Result<Option<BlockRecord>> {
        *self.fetches.lock().unwrap().entry(height).or_default() += 1;

        let miss = self
            .misses
            .lock()
            .unwrap()
            .get_mut(&height)
            .and_then(|misses| misses.pop_front());
        match miss {
            Some(Miss::NotFound) => Ok(None),
            Some(Miss::Transport) => Err(anyhow!("connection reset")),
            None => Ok(self.blocks.lock().unwrap().get(&height).copied()),
        }
    }

    async fn latest_block(&self) -> Result<BlockRecord> {
        let blocks = self.blocks.lock().unwrap();
        blocks
            .keys()
            .max()
            .and_then(|height| blocks.get(height).copied())
            .ok_or(anyhow!("Block not found"))
    }
}

/// Simulated challenge contracts. Every submitted move is mined at the current height and
/// delivered to all subscribers as a [ChallengeEvent], unless the chain is silenced.
#[derive(Debug, Default)]
pub(crate) struct SimulatedChallenges {
    height: Mutex<u64>,
    subscribers: Mutex<Vec<mpsc::Sender<ChallengeEvent>>>,
    /// Every accepted submission, in order.
    submitted: Mutex<Vec<(Address, Response)>>,
    /// The number of submissions to fail before accepting again.
    failures: Mutex<usize>,
    silent: Mutex<bool>,
}

impl SimulatedChallenges {
    /// Creates a simulated chain at `height`.
    pub(crate) fn at_height(height: u64) -> Self {
        let chain = Self::default();
        *chain.height.lock().unwrap() = height;
        chain
    }

    /// Delivers `kind` from `handle` to every subscriber at the current height.
    pub(crate) fn emit(&self, handle: Address, kind: ChallengeEventKind) {
        let event = ChallengeEvent {
            handle,
            height: *self.height.lock().unwrap(),
            kind,
        };
        self.subscribers
            .lock()
            .unwrap()
            .retain(|subscriber| !matches!(subscriber.try_send(event.clone()), Err(TrySendError::Closed(_))));
    }

    /// Announces the creation of the challenge at `handle`.
    pub(crate) fn announce(&self, handle: Address, asserter: Address, challenger: Address) {
        self.emit(
            handle,
            ChallengeEventKind::Created {
                asserter,
                challenger,
                challenge_type: ChallengeType::Execution,
            },
        );
    }

    /// Fails the next `count` submissions.
    pub(crate) fn fail_submissions(&self, count: usize) {
        *self.failures.lock().unwrap() = count;
    }

    /// Accepts submissions without ever mining them.
    pub(crate) fn silence(&self) {
        *self.silent.lock().unwrap() = true;
    }

    /// Returns every accepted submission.
    pub(crate) fn submitted(&self) -> Vec<(Address, Response)> {
        self.submitted.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChallengeEventSource for SimulatedChallenges {
    async fn subscribe(&self) -> Result<mpsc::Receiver<ChallengeEvent>> {
        let (sender, receiver) = mpsc::channel(64);
        self.subscribers.lock().unwrap().push(sender);
        Ok(receiver)
    }
}

#[async_trait]
impl MoveSubmitter for SimulatedChallenges {
    async fn submit(&self, handle: Address, response: &Response) -> Result<()> {
        if *response == Response::DoNothing {
            return Ok(());
        }
        {
            let mut failures = self.failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(anyhow!("nonce too low"));
            }
        }

        self.submitted
            .lock()
            .unwrap()
            .push((handle, response.clone()));
        if !*self.silent.lock().unwrap() {
            self.emit(handle, ChallengeEventKind::Moved(response.clone()));
        }
        Ok(())
    }
}
