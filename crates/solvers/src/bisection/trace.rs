//! The trace module contains the [TraceProvider] trait and a hash-chain implementation of it
//! used by local simulations of the bisection game.

use super::{Hash, KeccakStepOracle, SegmentClaim};
use anyhow::{anyhow, Result};
use ethers::{types::H256, utils::keccak256};
use std::sync::Arc;

/// The [TraceProvider] trait gives a participant its own view of the execution trace. The hash
/// returned for a step is always correct in the relative view of the participant.
pub trait TraceProvider {
    /// Returns the machine state hash after `step` steps of execution.
    fn hash_at(&self, step: u64) -> Result<Hash>;

    /// Returns the number of steps covered by the trace.
    fn length(&self) -> u64;

    /// Builds the claim this trace makes over `[start_step, end_step)`.
    fn claim(&self, start_step: u64, end_step: u64) -> Result<SegmentClaim> {
        Ok(SegmentClaim {
            start_step,
            end_step,
            start_hash: self.hash_at(start_step)?,
            end_hash: self.hash_at(end_step)?,
        })
    }
}

impl<T: TraceProvider + ?Sized> TraceProvider for Arc<T> {
    fn hash_at(&self, step: u64) -> Result<Hash> {
        (**self).hash_at(step)
    }

    fn length(&self) -> u64 {
        (**self).length()
    }
}

/// A trace in which every state is the [KeccakStepOracle] step of the one before it, optionally
/// corrupted at a single step.
#[derive(Debug, Clone)]
pub struct HashChainTrace {
    /// Machine state hashes, one per step boundary.
    trace: Arc<[Hash]>,
}

impl HashChainTrace {
    /// Builds an honest trace of `steps` steps starting at `genesis`.
    pub fn new(genesis: Hash, steps: u64) -> Self {
        Self::build(genesis, steps, None)
    }

    /// Builds a trace of `steps` steps starting at `genesis` whose transition into `fault_step`
    /// is wrong. Every later step follows correctly from the corrupted state.
    pub fn with_fault(genesis: Hash, steps: u64, fault_step: u64) -> Result<Self> {
        if fault_step == 0 || fault_step > steps {
            return Err(anyhow!(
                "Fault step {} outside of trace with {} steps",
                fault_step,
                steps
            ));
        }
        Ok(Self::build(genesis, steps, Some(fault_step)))
    }

    fn build(genesis: Hash, steps: u64, fault_step: Option<u64>) -> Self {
        let mut trace = Vec::with_capacity(steps as usize + 1);
        trace.push(genesis);
        let mut state = genesis;
        for step in 1..=steps {
            state = if Some(step) == fault_step {
                let mut preimage = state.as_bytes().to_vec();
                preimage.push(0xff);
                H256::from(keccak256(preimage))
            } else {
                KeccakStepOracle::step(state)
            };
            trace.push(state);
        }
        Self {
            trace: trace.into(),
        }
    }
}

impl TraceProvider for HashChainTrace {
    fn hash_at(&self, step: u64) -> Result<Hash> {
        self.trace
            .get(step as usize)
            .copied()
            .ok_or(anyhow!("Invalid trace index"))
    }

    fn length(&self) -> u64 {
        self.trace.len() as u64 - 1
    }
}
