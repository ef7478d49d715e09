//! Errors returned by dispute session operations.
//!
//! A rejected move never resolves the dispute by itself: the acting party may retry with a
//! corrected move before its deadline.

use super::{Phase, Role};
use ethers::types::Address;
use thiserror::Error;

/// A [DisputeError] describes why a dispute operation was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DisputeError {
    /// The hash count, chain length or hash values of a bisection do not match the committed
    /// claim.
    #[error("invalid bisection: {0}")]
    InvalidBisection(String),
    /// The chosen sub-segment does not exist in the latest bisection.
    #[error("segment index {index} out of range, bisection has {segments} segments")]
    IndexOutOfRange { index: usize, segments: usize },
    /// The move does not belong to the current phase, e.g. a replayed or duplicate move.
    #[error("stale move, session is {phase}")]
    StaleChallenge { phase: Phase },
    /// The move was submitted by the party that is not on turn.
    #[error("it is not the {caller}'s turn")]
    NotYourTurn { caller: Role },
    /// The caller is neither the asserter nor the challenger of the session.
    #[error("{0:?} is not a participant of this challenge")]
    UnknownParticipant(Address),
    /// The session has already been resolved.
    #[error("session already resolved")]
    SessionResolved,
    /// The opening claim does not match the challenge hash recorded by the factory.
    #[error("claim commitment does not match the recorded challenge hash")]
    ClaimMismatch,
    /// The session parameters cannot produce a terminating dispute.
    #[error("invalid session parameters: {0}")]
    InvalidParams(String),
    /// Persisted state does not describe a well-formed dispute.
    #[error("corrupt session state: {0}")]
    CorruptState(String),
    /// The proof oracle failed to answer.
    #[error("proof oracle failure: {0}")]
    Oracle(String),
}
