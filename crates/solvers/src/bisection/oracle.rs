//! The oracle module holds the [ProofOracle] trait, the boundary to the execution engine that
//! checks a single execution step.

use super::Hash;
use anyhow::Result;
use async_trait::async_trait;
use ethers::{types::H256, utils::keccak256};

/// The [ProofOracle] trait recomputes exactly one execution step.
///
/// Implementations are shared between concurrent sessions and must be safe for concurrent use.
#[async_trait]
pub trait ProofOracle: Send + Sync {
    /// Recomputes the step starting from `lower_hash` and reports whether the resulting state
    /// hash equals `claimed_result`.
    ///
    /// ### Takes
    /// - `lower_hash`: The machine state hash before the step.
    /// - `claimed_result`: The claimed machine state hash after the step.
    ///
    /// ### Returns
    /// - `Ok(bool)`: Whether the step from `lower_hash` produces `claimed_result`.
    /// - `Err(anyhow::Error)`: The oracle could not evaluate the step.
    async fn verify_one_step_proof(&self, lower_hash: Hash, claimed_result: Hash) -> Result<bool>;
}

/// A [ProofOracle] for machines whose every step hashes the previous state,
/// `next = keccak256(previous)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeccakStepOracle;

impl KeccakStepOracle {
    /// Executes one step from `state`.
    pub fn step(state: Hash) -> Hash {
        H256::from(keccak256(state.as_bytes()))
    }
}

#[async_trait]
impl ProofOracle for KeccakStepOracle {
    async fn verify_one_step_proof(&self, lower_hash: Hash, claimed_result: Hash) -> Result<bool> {
        Ok(Self::step(lower_hash) == claimed_result)
    }
}
