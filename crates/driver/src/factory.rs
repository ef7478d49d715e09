//! The factory module contains the [ChallengeFactory] trait, which creates the on-chain
//! counterpart of a dispute, and its contract and in-memory implementations.

use crate::{
    bindings::ChallengeFactoryContract, transact::send_and_confirm, TransactionAuth,
    DEFAULT_POLL_INTERVAL, DEFAULT_RECEIPT_RETRIES,
};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use ethers::{
    providers::Middleware,
    types::{Address, TransactionReceipt, H256, U256},
};
use rollup_validator_solvers::bisection::{ChallengeRecord, ChallengeType, Hash};
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::sync::Mutex;

/// The [ChallengeFactory] trait creates challenge instances on the base chain.
#[async_trait]
pub trait ChallengeFactory: Send + Sync {
    /// Creates a new challenge between `asserter` and `challenger`.
    ///
    /// ### Takes
    /// - `asserter`: The party that made the disputed claim.
    /// - `challenger`: The party disputing it.
    /// - `challenge_period_ticks`: The number of base chain ticks each party has per move.
    /// - `challenge_hash`: The commitment to the disputed claim.
    /// - `challenge_type`: The kind of claim under dispute.
    ///
    /// ### Returns
    /// - `Ok(Address)`: The handle of the created challenge.
    /// - `Err(anyhow::Error)`: The challenge was not created.
    async fn create_challenge(
        &self,
        asserter: Address,
        challenger: Address,
        challenge_period_ticks: u64,
        challenge_hash: Hash,
        challenge_type: ChallengeType,
    ) -> Result<Address>;

    /// Reads back the record of the challenge at `handle`, if the factory created it.
    async fn challenge(&self, handle: Address) -> Result<Option<ChallengeRecord>>;
}

/// A [ChallengeFactory] backed by the deployed factory contract.
#[derive(Debug)]
pub struct ContractChallengeFactory<M> {
    contract: ChallengeFactoryContract<M>,
    auth: Arc<TransactionAuth>,
    /// The number of receipt polls before giving up on a creation transaction.
    pub receipt_retries: usize,
    /// The delay between two receipt polls.
    pub poll_interval: Duration,
}

impl<M: Middleware> ContractChallengeFactory<M> {
    /// Creates a new [ContractChallengeFactory] for the factory deployed at `address`.
    /// Transactions are sent from the identity guarded by `auth`.
    pub fn new(address: Address, client: Arc<M>, auth: Arc<TransactionAuth>) -> Self {
        Self {
            contract: ChallengeFactoryContract::new(address, client),
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

#[async_trait]
impl<M: Middleware + 'static> ChallengeFactory for ContractChallengeFactory<M> {
    async fn create_challenge(
        &self,
        asserter: Address,
        challenger: Address,
        challenge_period_ticks: u64,
        challenge_hash: Hash,
        challenge_type: ChallengeType,
    ) -> Result<Address> {
        let call = self.contract.create_challenge(
            asserter,
            challenger,
            U256::from(challenge_period_ticks),
            challenge_hash.0,
            U256::from(challenge_type as u8),
        );
        let receipt = send_and_confirm(
            call,
            &self.auth,
            self.receipt_retries,
            self.poll_interval,
            "createChallenge",
        )
        .await?;

        let handle = handle_from_receipt(&receipt)?;
        tracing::info!(target: "challenge-factory", "Created {:?} challenge {:?} between {:?} and {:?}", challenge_type, handle, asserter, challenger);
        Ok(handle)
    }

    async fn challenge(&self, handle: Address) -> Result<Option<ChallengeRecord>> {
        let (period, asserter, challenger, challenge_hash, challenge_type) = self
            .contract
            .challenges(handle)
            .call()
            .await
            .map_err(|e| anyhow!("Failed to read challenge {:?}: {}", handle, e))?;
        if asserter.is_zero() && challenger.is_zero() {
            return Ok(None);
        }

        let challenge_type = u8::try_from(challenge_type)
            .map_err(|_| anyhow!("Unknown challenge type {}", challenge_type))?;
        Ok(Some(ChallengeRecord {
            challenge_period_ticks: u64::try_from(period)
                .map_err(|_| anyhow!("Challenge period {} out of range", period))?,
            asserter,
            challenger,
            challenge_hash: H256::from(challenge_hash),
            challenge_type: ChallengeType::try_from(challenge_type)?,
        }))
    }
}

/// Extracts the handle of a new challenge from its creation receipt: the address that emitted
/// the receipt's only log.
pub(crate) fn handle_from_receipt(receipt: &TransactionReceipt) -> Result<Address> {
    match receipt.logs.as_slice() {
        [log] => Ok(log.address),
        logs => Err(anyhow!(
            "Wrong receipt count: expected 1 log, found {}",
            logs.len()
        )),
    }
}

/// A [ChallengeFactory] that keeps its challenges in memory, handing out sequential handles.
#[derive(Debug)]
pub struct InMemoryChallengeFactory {
    auth: TransactionAuth,
    next_handle: Mutex<u64>,
    challenges: Mutex<HashMap<Address, ChallengeRecord>>,
}

impl Default for InMemoryChallengeFactory {
    fn default() -> Self {
        Self::new(Address::zero())
    }
}

impl InMemoryChallengeFactory {
    /// Creates a new [InMemoryChallengeFactory] acting on behalf of `from`.
    pub fn new(from: Address) -> Self {
        Self {
            auth: TransactionAuth::new(from),
            next_handle: Mutex::new(1),
            challenges: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the number of challenges created so far.
    pub async fn len(&self) -> usize {
        self.challenges.lock().await.len()
    }

    /// Returns whether no challenge has been created.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl ChallengeFactory for InMemoryChallengeFactory {
    async fn create_challenge(
        &self,
        asserter: Address,
        challenger: Address,
        challenge_period_ticks: u64,
        challenge_hash: Hash,
        challenge_type: ChallengeType,
    ) -> Result<Address> {
        let _guard = self.auth.acquire().await;

        let handle = {
            let mut next = self.next_handle.lock().await;
            let handle = Address::from_low_u64_be(*next);
            *next += 1;
            handle
        };
        self.challenges.lock().await.insert(
            handle,
            ChallengeRecord {
                challenge_period_ticks,
                asserter,
                challenger,
                challenge_hash,
                challenge_type,
            },
        );
        tracing::debug!(target: "challenge-factory", "Created {:?} challenge {:?} in memory", challenge_type, handle);
        Ok(handle)
    }

    async fn challenge(&self, handle: Address) -> Result<Option<ChallengeRecord>> {
        Ok(self.challenges.lock().await.get(&handle).copied())
    }
}
