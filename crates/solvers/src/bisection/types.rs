//! The types module contains all of the types relevant to the bisection challenge protocol.

use ethers::{
    abi::{self, Token},
    types::{Address, H256, U256},
    utils::keccak256,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The [Hash] type represents a commitment to a machine state at a given execution step.
pub type Hash = H256;

/// The default number of breakpoints produced by a full bisection (three sub-segments).
pub const DEFAULT_FANOUT: u64 = 4;

/// The default number of base chain ticks a party has to make its move.
pub const DEFAULT_CHALLENGE_PERIOD_TICKS: u64 = 100;

/// The two mutually distrusting roles in a dispute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    /// The party that made the disputed claim.
    Asserter,
    /// The party that disputes the claim.
    Challenger,
}

impl Role {
    /// Returns the opposing [Role].
    pub fn other(self) -> Self {
        match self {
            Role::Asserter => Role::Challenger,
            Role::Challenger => Role::Asserter,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Asserter => write!(f, "asserter"),
            Role::Challenger => write!(f, "challenger"),
        }
    }
}

/// The reason a dispute reached its terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResolutionReason {
    /// A one-step proof was submitted and checked by the proof oracle.
    OneStepProof,
    /// The party on turn failed to move before its deadline.
    TimeoutForfeit,
    /// A party gave up.
    Conceded,
}

/// The final outcome of a dispute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    /// The winning role.
    pub winner: Role,
    /// Why the dispute ended.
    pub reason: ResolutionReason,
}

/// The phase of a dispute. The party expected to act is tracked separately as the turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    /// The party on turn must subdivide the disputed segment.
    Bisecting,
    /// The party on turn must pick one of the sub-segments of the latest bisection.
    AwaitingSegmentChoice,
    /// The disputed segment spans a single step and awaits a one-step proof.
    OneStepPending,
    /// The dispute is over.
    Resolved(Resolution),
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Bisecting => write!(f, "bisecting"),
            Phase::AwaitingSegmentChoice => write!(f, "awaiting segment choice"),
            Phase::OneStepPending => write!(f, "one step pending"),
            Phase::Resolved(r) => write!(f, "resolved ({} won)", r.winner),
        }
    }
}

/// The [ChallengeType] enum defines the different kinds of challenges the challenge factory
/// contract can create.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ChallengeType {
    InboxTop = 0,
    Messages = 1,
    Execution = 2,
}

impl TryFrom<u8> for ChallengeType {
    type Error = anyhow::Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ChallengeType::InboxTop),
            1 => Ok(ChallengeType::Messages),
            2 => Ok(ChallengeType::Execution),
            _ => Err(anyhow::anyhow!("Invalid challenge type")),
        }
    }
}

/// The [ChallengeRecord] is what the challenge factory records for a challenge at creation time.
/// It never changes afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeRecord {
    /// The number of base chain ticks each party has to make a move.
    pub challenge_period_ticks: u64,
    /// The party that made the disputed claim.
    pub asserter: Address,
    /// The party disputing the claim.
    pub challenger: Address,
    /// The commitment to the disputed claim, see [SegmentClaim::commitment].
    pub challenge_hash: Hash,
    /// The kind of challenge.
    pub challenge_type: ChallengeType,
}

/// The asserter's claim over a range of execution steps that opens a dispute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentClaim {
    /// The first step of the range.
    pub start_step: u64,
    /// The step one past the last step of the range.
    pub end_step: u64,
    /// The machine state hash at `start_step`.
    pub start_hash: Hash,
    /// The claimed machine state hash at `end_step`.
    pub end_hash: Hash,
}

impl SegmentClaim {
    /// Returns the number of execution steps covered by the claim.
    pub fn length(&self) -> u64 {
        self.end_step.saturating_sub(self.start_step)
    }

    /// Returns the hash that the challenge factory records for this claim.
    pub fn commitment(&self) -> Hash {
        H256::from(keccak256(abi::encode(&[
            Token::Uint(U256::from(self.start_step)),
            Token::Uint(U256::from(self.end_step)),
            Token::FixedBytes(self.start_hash.as_bytes().to_vec()),
            Token::FixedBytes(self.end_hash.as_bytes().to_vec()),
        ])))
    }
}

/// A [Response] is an action taken by a participant in response to the current state of a
/// dispute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    /// Do nothing.
    DoNothing,
    /// Subdivide the disputed segment, committing to a hash at every breakpoint.
    Bisect {
        chain_hashes: Vec<Hash>,
        chain_length: u64,
    },
    /// Dispute one sub-segment of the latest bisection, re-presenting that bisection.
    ChooseSegment {
        index: usize,
        chain_hashes: Vec<Hash>,
        chain_length: u64,
    },
    /// Prove the single disputed step.
    OneStepProof { lower_hash_a: Hash, value: Hash },
}

/// Protocol constants that both roles must agree on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolParams {
    /// The number of breakpoints of a full bisection, both ends included.
    pub fanout: u64,
    /// The number of base chain ticks each party has to make a move.
    pub challenge_period_ticks: u64,
}

impl Default for ProtocolParams {
    fn default() -> Self {
        Self {
            fanout: DEFAULT_FANOUT,
            challenge_period_ticks: DEFAULT_CHALLENGE_PERIOD_TICKS,
        }
    }
}

impl ProtocolParams {
    /// Checks that the parameters allow a dispute to make progress and terminate.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.fanout < 3 {
            anyhow::bail!("fanout must be at least 3, got {}", self.fanout);
        }
        if self.challenge_period_ticks == 0 {
            anyhow::bail!("challenge period must be at least one tick");
        }
        Ok(())
    }
}
