//! The session module holds the [DisputeSession], a participant's local, independently validated
//! copy of one bisection challenge.
//!
//! The session is an explicit state machine:
//!
//! ```text
//! Bisecting ──bisect──▶ AwaitingSegmentChoice ──choose_segment──▶ Bisecting
//!                                             └─choose_segment──▶ OneStepPending ──one_step_proof──▶ Resolved
//! ```
//!
//! Every live state carries a deadline. Once the base chain clock passes it, the party on turn
//! forfeits and the dispute resolves in favor of the other party.

use super::{
    segment::split_range, ChallengeRecord, DisputeError, Hash, Phase, ProofOracle,
    ProtocolParams, Resolution, ResolutionReason, Response, Role, SegmentClaim,
};
use ethers::types::Address;
use serde::{Deserialize, Serialize};

/// The persisted state of a single dispute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeState {
    /// The address of the on-chain challenge instance.
    pub handle: Address,
    /// The party that made the disputed claim.
    pub asserter: Address,
    /// The party disputing the claim.
    pub challenger: Address,
    /// The number of base chain ticks each party has to make a move.
    pub challenge_period_ticks: u64,
    /// The number of breakpoints of a full bisection, both ends included.
    pub fanout: u64,
    /// The first step of the disputed segment.
    pub start_step: u64,
    /// The step one past the last step of the disputed segment.
    pub end_step: u64,
    /// While bisecting, the committed start and end hashes of the segment. After a bisection,
    /// one hash per breakpoint.
    pub claimed_hashes: Vec<Hash>,
    /// The party expected to act next.
    pub turn: Role,
    /// The current phase.
    pub phase: Phase,
    /// The last base chain tick at which the party on turn may still act.
    pub deadline: u64,
    /// The number of completed bisection rounds.
    pub round: u64,
}

impl ChallengeState {
    /// Returns the number of steps in the disputed segment.
    pub fn segment_length(&self) -> u64 {
        self.end_step.saturating_sub(self.start_step)
    }

    /// Returns the breakpoints of a bisection of the disputed segment.
    pub fn breakpoints(&self) -> Vec<u64> {
        split_range(self.start_step, self.end_step, self.fanout)
    }

    /// Returns the committed claim over the disputed segment.
    pub fn committed_claim(&self) -> SegmentClaim {
        SegmentClaim {
            start_step: self.start_step,
            end_step: self.end_step,
            start_hash: self.claimed_hashes.first().copied().unwrap_or_default(),
            end_hash: self.claimed_hashes.last().copied().unwrap_or_default(),
        }
    }

    /// Returns the role `address` plays in this dispute, if any.
    pub fn role_of(&self, address: Address) -> Option<Role> {
        if address == self.asserter {
            Some(Role::Asserter)
        } else if address == self.challenger {
            Some(Role::Challenger)
        } else {
            None
        }
    }

    /// Returns the address playing `role`.
    pub fn address_of(&self, role: Role) -> Address {
        match role {
            Role::Asserter => self.asserter,
            Role::Challenger => self.challenger,
        }
    }

    /// Returns the [Resolution] of the dispute if it is over.
    pub fn resolution(&self) -> Option<Resolution> {
        match self.phase {
            Phase::Resolved(resolution) => Some(resolution),
            _ => None,
        }
    }
}

/// A [DisputeSession] drives one participant's view of a challenge. Operations take `&mut self`;
/// a session is never operated on concurrently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisputeSession {
    state: ChallengeState,
}

impl DisputeSession {
    /// Opens a session over a challenge the factory has just created.
    ///
    /// ### Takes
    /// - `handle`: The address of the created challenge.
    /// - `record`: The factory's record of the challenge.
    /// - `claim`: The asserter's claim, which must match `record.challenge_hash`.
    /// - `params`: The protocol parameters; only the fan-out is read, the challenge period comes
    ///   from the record.
    /// - `now`: The current base chain tick.
    ///
    /// ### Returns
    /// - `Ok(DisputeSession)`: A session with the asserter on turn.
    /// - `Err(DisputeError)`: The claim or parameters cannot open a dispute.
    pub fn open(
        handle: Address,
        record: &ChallengeRecord,
        claim: SegmentClaim,
        params: &ProtocolParams,
        now: u64,
    ) -> Result<Self, DisputeError> {
        if params.fanout < 3 {
            return Err(DisputeError::InvalidParams(format!(
                "fanout {} cannot narrow a segment",
                params.fanout
            )));
        }
        if record.challenge_period_ticks == 0 {
            return Err(DisputeError::InvalidParams(
                "challenge period of zero ticks".to_string(),
            ));
        }
        if claim.start_step >= claim.end_step {
            return Err(DisputeError::InvalidParams(format!(
                "empty segment [{}, {})",
                claim.start_step, claim.end_step
            )));
        }
        if claim.commitment() != record.challenge_hash {
            return Err(DisputeError::ClaimMismatch);
        }

        let phase = if claim.length() == 1 {
            Phase::OneStepPending
        } else {
            Phase::Bisecting
        };

        tracing::info!(target: "dispute-session", "Opened challenge {:?} over steps [{}, {})", handle, claim.start_step, claim.end_step);
        Ok(Self {
            state: ChallengeState {
                handle,
                asserter: record.asserter,
                challenger: record.challenger,
                challenge_period_ticks: record.challenge_period_ticks,
                fanout: params.fanout,
                start_step: claim.start_step,
                end_step: claim.end_step,
                claimed_hashes: vec![claim.start_hash, claim.end_hash],
                turn: Role::Asserter,
                phase,
                deadline: now.saturating_add(record.challenge_period_ticks),
                round: 0,
            },
        })
    }

    /// Resumes a session from persisted state.
    ///
    /// ### Returns
    /// - `Ok(DisputeSession)`: The state describes a well-formed dispute.
    /// - `Err(DisputeError::CorruptState)`: The segment is empty, the fan-out cannot narrow it,
    ///   or the claimed hashes do not fit the phase.
    pub fn from_state(state: ChallengeState) -> Result<Self, DisputeError> {
        if state.start_step >= state.end_step {
            return Err(DisputeError::CorruptState(format!(
                "empty segment [{}, {})",
                state.start_step, state.end_step
            )));
        }
        if state.fanout < 3 {
            return Err(DisputeError::CorruptState(format!(
                "fanout {} cannot narrow a segment",
                state.fanout
            )));
        }

        let expected = match state.phase {
            Phase::Bisecting => Some(2),
            Phase::AwaitingSegmentChoice => Some(state.breakpoints().len()),
            Phase::OneStepPending if state.segment_length() != 1 => {
                return Err(DisputeError::CorruptState(format!(
                    "one-step proof pending over {} steps",
                    state.segment_length()
                )));
            }
            Phase::OneStepPending => Some(2),
            // Resolved sessions only answer with their resolution.
            Phase::Resolved(_) => None,
        };
        match expected {
            Some(count) if state.claimed_hashes.len() != count => {
                Err(DisputeError::CorruptState(format!(
                    "{} claimed hashes while {}, expected {}",
                    state.claimed_hashes.len(),
                    state.phase,
                    count
                )))
            }
            _ => Ok(Self { state }),
        }
    }

    /// Returns the current state.
    pub fn state(&self) -> &ChallengeState {
        &self.state
    }

    /// Consumes the session, returning its state.
    pub fn into_state(self) -> ChallengeState {
        self.state
    }

    /// Returns the [Resolution] of the dispute if it is over.
    pub fn resolution(&self) -> Option<Resolution> {
        self.state.resolution()
    }

    /// Subdivides the disputed segment.
    ///
    /// `chain_hashes` must hold one hash per breakpoint of [ChallengeState::breakpoints], begin
    /// with the committed start hash and end with the committed end hash, and `chain_length` must
    /// equal the segment length.
    pub fn bisect(
        &mut self,
        caller: Address,
        chain_hashes: Vec<Hash>,
        chain_length: u64,
        now: u64,
    ) -> Result<(), DisputeError> {
        self.begin_move(caller, Phase::Bisecting, now)?;

        let length = self.state.segment_length();
        if chain_length != length {
            return Err(DisputeError::InvalidBisection(format!(
                "chain length {} does not match segment length {}",
                chain_length, length
            )));
        }
        let expected = self.state.breakpoints().len();
        if chain_hashes.len() != expected {
            return Err(DisputeError::InvalidBisection(format!(
                "expected {} hashes, got {}",
                expected,
                chain_hashes.len()
            )));
        }
        let claim = self.state.committed_claim();
        if chain_hashes.first() != Some(&claim.start_hash) {
            return Err(DisputeError::InvalidBisection(
                "first hash does not match the committed start".to_string(),
            ));
        }
        if chain_hashes.last() != Some(&claim.end_hash) {
            return Err(DisputeError::InvalidBisection(
                "last hash does not match the committed end".to_string(),
            ));
        }

        self.state.claimed_hashes = chain_hashes;
        self.state.phase = Phase::AwaitingSegmentChoice;
        self.pass_turn(now);
        tracing::debug!(target: "dispute-session", "Challenge {:?} bisected [{}, {}) into {} segments", self.state.handle, self.state.start_step, self.state.end_step, expected - 1);
        Ok(())
    }

    /// Narrows the disputed segment to sub-segment `index` of the latest bisection.
    ///
    /// `chain_hashes` and `chain_length` must re-present that bisection exactly.
    pub fn choose_segment(
        &mut self,
        caller: Address,
        index: usize,
        chain_hashes: &[Hash],
        chain_length: u64,
        now: u64,
    ) -> Result<(), DisputeError> {
        self.begin_move(caller, Phase::AwaitingSegmentChoice, now)?;

        if chain_length != self.state.segment_length()
            || chain_hashes != self.state.claimed_hashes.as_slice()
        {
            return Err(DisputeError::InvalidBisection(
                "segment choice does not match the recorded bisection".to_string(),
            ));
        }
        let points = self.state.breakpoints();
        let segments = points.len() - 1;
        if index >= segments {
            return Err(DisputeError::IndexOutOfRange { index, segments });
        }

        self.state.claimed_hashes = vec![chain_hashes[index], chain_hashes[index + 1]];
        self.state.start_step = points[index];
        self.state.end_step = points[index + 1];
        self.state.round += 1;
        self.state.phase = if self.state.segment_length() == 1 {
            Phase::OneStepPending
        } else {
            Phase::Bisecting
        };
        self.pass_turn(now);
        tracing::debug!(target: "dispute-session", "Challenge {:?} narrowed to [{}, {}) after round {}", self.state.handle, self.state.start_step, self.state.end_step, self.state.round);
        Ok(())
    }

    /// Proves the single disputed step and resolves the dispute.
    ///
    /// The claim holds iff `lower_hash_a` and `value` are the committed start and end hashes and
    /// the oracle confirms the step between them. The asserter wins if the claim holds, the
    /// challenger otherwise.
    pub async fn one_step_proof<O>(
        &mut self,
        caller: Address,
        lower_hash_a: Hash,
        value: Hash,
        oracle: &O,
        now: u64,
    ) -> Result<Resolution, DisputeError>
    where
        O: ProofOracle + ?Sized,
    {
        self.begin_move(caller, Phase::OneStepPending, now)?;

        let claim = self.state.committed_claim();
        let valid = if lower_hash_a != claim.start_hash || value != claim.end_hash {
            tracing::warn!(target: "dispute-session", "One-step proof for challenge {:?} does not match the committed step", self.state.handle);
            false
        } else {
            oracle
                .verify_one_step_proof(lower_hash_a, value)
                .await
                .map_err(|e| DisputeError::Oracle(e.to_string()))?
        };

        let winner = if valid {
            Role::Asserter
        } else {
            Role::Challenger
        };
        Ok(self.resolve(winner, ResolutionReason::OneStepProof))
    }

    /// Gives up the dispute on behalf of `caller`, regardless of whose turn it is.
    pub fn concede(&mut self, caller: Address, now: u64) -> Result<Resolution, DisputeError> {
        if self.expire(now).is_some() || self.resolution().is_some() {
            return Err(DisputeError::SessionResolved);
        }
        let role = self
            .state
            .role_of(caller)
            .ok_or(DisputeError::UnknownParticipant(caller))?;
        Ok(self.resolve(role.other(), ResolutionReason::Conceded))
    }

    /// Applies timeout-forfeit if the deadline has passed at `now`.
    ///
    /// ### Returns
    /// - `Some(Resolution)`: The session was resolved by this call.
    /// - `None`: The session is still live, or was already resolved.
    pub fn expire(&mut self, now: u64) -> Option<Resolution> {
        if self.resolution().is_some() || now <= self.state.deadline {
            return None;
        }
        tracing::info!(target: "dispute-session", "The {} of challenge {:?} missed its deadline at tick {}", self.state.turn, self.state.handle, self.state.deadline);
        let winner = self.state.turn.other();
        Some(self.resolve(winner, ResolutionReason::TimeoutForfeit))
    }

    /// Applies a [Response] produced by a solver or relayed from the counterpart.
    ///
    /// ### Returns
    /// - `Ok(Some(Resolution))`: The response resolved the dispute.
    /// - `Ok(None)`: The response was accepted and the dispute continues.
    /// - `Err(DisputeError)`: The response was rejected.
    pub async fn apply<O>(
        &mut self,
        caller: Address,
        response: Response,
        oracle: &O,
        now: u64,
    ) -> Result<Option<Resolution>, DisputeError>
    where
        O: ProofOracle + ?Sized,
    {
        match response {
            Response::DoNothing => Ok(None),
            Response::Bisect {
                chain_hashes,
                chain_length,
            } => self
                .bisect(caller, chain_hashes, chain_length, now)
                .map(|_| None),
            Response::ChooseSegment {
                index,
                chain_hashes,
                chain_length,
            } => self
                .choose_segment(caller, index, &chain_hashes, chain_length, now)
                .map(|_| None),
            Response::OneStepProof {
                lower_hash_a,
                value,
            } => self
                .one_step_proof(caller, lower_hash_a, value, oracle, now)
                .await
                .map(Some),
        }
    }

    /// Checks the preconditions shared by all moves and returns the caller's role.
    fn begin_move(
        &mut self,
        caller: Address,
        expected: Phase,
        now: u64,
    ) -> Result<Role, DisputeError> {
        if self.expire(now).is_some() || self.resolution().is_some() {
            return Err(DisputeError::SessionResolved);
        }
        let role = self
            .state
            .role_of(caller)
            .ok_or(DisputeError::UnknownParticipant(caller))?;
        if self.state.phase != expected {
            return Err(DisputeError::StaleChallenge {
                phase: self.state.phase,
            });
        }
        if role != self.state.turn {
            return Err(DisputeError::NotYourTurn { caller: role });
        }
        Ok(role)
    }

    fn pass_turn(&mut self, now: u64) {
        self.state.turn = self.state.turn.other();
        self.state.deadline = now.saturating_add(self.state.challenge_period_ticks);
    }

    fn resolve(&mut self, winner: Role, reason: ResolutionReason) -> Resolution {
        let resolution = Resolution { winner, reason };
        self.state.phase = Phase::Resolved(resolution);
        tracing::info!(target: "dispute-session", "Challenge {:?} resolved, {} won ({:?})", self.state.handle, winner, reason);
        resolution
    }
}
