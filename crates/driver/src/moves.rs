//! The moves module contains the [MoveSubmitter] trait, which sends a participant's moves to the
//! challenge instance on the base chain.

use crate::{
    bindings::BisectionChallenge, transact::send_and_confirm, TransactionAuth,
    DEFAULT_POLL_INTERVAL, DEFAULT_RECEIPT_RETRIES,
};
use anyhow::Result;
use async_trait::async_trait;
use ethers::{
    providers::Middleware,
    types::{Address, U256},
};
use rollup_validator_solvers::bisection::{Hash, Response};
use std::{sync::Arc, time::Duration};

/// The [MoveSubmitter] trait submits moves to challenge instances.
#[async_trait]
pub trait MoveSubmitter: Send + Sync {
    /// Submits `response` to the challenge at `handle` and waits until it is included.
    /// [Response::DoNothing] submits nothing.
    async fn submit(&self, handle: Address, response: &Response) -> Result<()>;
}

/// A [MoveSubmitter] that calls the challenge contract from the identity guarded by `auth`.
#[derive(Debug)]
pub struct ContractMoveSubmitter<M> {
    client: Arc<M>,
    auth: Arc<TransactionAuth>,
    /// The number of receipt polls before giving up on a move.
    pub receipt_retries: usize,
    /// The delay between two receipt polls.
    pub poll_interval: Duration,
}

impl<M: Middleware> ContractMoveSubmitter<M> {
    /// Creates a new [ContractMoveSubmitter].
    pub fn new(client: Arc<M>, auth: Arc<TransactionAuth>) -> Self {
        Self {
            client,
            auth,
            receipt_retries: DEFAULT_RECEIPT_RETRIES,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Overrides the receipt polling schedule.
    pub fn with_receipt_polling(mut self, receipt_retries: usize, poll_interval: Duration) -> Self {
        self.receipt_retries = receipt_retries;
        self.poll_interval = poll_interval;
        self
    }
}

fn raw_hashes(hashes: &[Hash]) -> Vec<[u8; 32]> {
    hashes.iter().map(|hash| hash.0).collect()
}

#[async_trait]
impl<M: Middleware + 'static> MoveSubmitter for ContractMoveSubmitter<M> {
    async fn submit(&self, handle: Address, response: &Response) -> Result<()> {
        let contract = BisectionChallenge::new(handle, Arc::clone(&self.client));
        let (call, name) = match response {
            Response::DoNothing => return Ok(()),
            Response::Bisect {
                chain_hashes,
                chain_length,
            } => (
                contract.bisect(raw_hashes(chain_hashes), U256::from(*chain_length)),
                "bisect",
            ),
            Response::ChooseSegment {
                index,
                chain_hashes,
                chain_length,
            } => (
                contract.choose_segment(
                    U256::from(*index),
                    raw_hashes(chain_hashes),
                    U256::from(*chain_length),
                ),
                "chooseSegment",
            ),
            Response::OneStepProof {
                lower_hash_a,
                value,
            } => (
                contract.one_step_proof(lower_hash_a.0, value.0),
                "oneStepProof",
            ),
        };

        let receipt = send_and_confirm(
            call,
            &self.auth,
            self.receipt_retries,
            self.poll_interval,
            name,
        )
        .await?;
        tracing::info!(target: "move-submitter", "Submitted {} to challenge {:?} in block {:?}", name, handle, receipt.block_number);
        Ok(())
    }
}
