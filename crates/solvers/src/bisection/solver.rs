//! The solver module holds the [DisputeSolver] trait and the [BisectionSolver], which decides a
//! participant's next move from its own view of the execution trace.

use super::{ChallengeState, Hash, Phase, Response, Role, SegmentClaim, TraceProvider};
use anyhow::Result;

/// The [DisputeSolver] trait defines the interface for the local decision logic of one
/// participant in a bisection challenge.
pub trait DisputeSolver {
    /// Respond to the current state of a dispute.
    ///
    /// ### Takes
    /// - `state`: The participant's local copy of the dispute.
    ///
    /// ### Returns
    /// - `Ok(Response)`: The response to the state.
    /// - `Err(anyhow::Error)`: An error occurred while determining the correct response.
    fn respond(&self, state: &ChallengeState) -> Result<Response>;

    /// Fetch the [Hash] at the given step. This hash is always true in the relative view of the
    /// participant.
    fn claim_at(&self, step: u64) -> Result<Hash>;

    /// Returns whether the participant disagrees with `claim`: it agrees with the start hash but
    /// not with the end hash.
    fn disputes(&self, claim: &SegmentClaim) -> Result<bool> {
        Ok(self.claim_at(claim.start_step)? == claim.start_hash
            && self.claim_at(claim.end_step)? != claim.end_hash)
    }
}

/// A [DisputeSolver] that plays one [Role] honestly according to its [TraceProvider].
#[derive(Debug, Clone)]
pub struct BisectionSolver<T> {
    /// The role played by this solver.
    pub role: Role,
    /// The participant's execution trace.
    pub trace: T,
}

impl<T: TraceProvider> BisectionSolver<T> {
    /// Creates a new [BisectionSolver].
    pub fn new(role: Role, trace: T) -> Self {
        Self { role, trace }
    }
}

impl<T: TraceProvider> DisputeSolver for BisectionSolver<T> {
    fn respond(&self, state: &ChallengeState) -> Result<Response> {
        if state.turn != self.role {
            return Ok(Response::DoNothing);
        }

        match (state.phase, self.role) {
            (Phase::Bisecting, Role::Asserter) => {
                let chain_hashes = state
                    .breakpoints()
                    .into_iter()
                    .map(|step| self.claim_at(step))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Response::Bisect {
                    chain_hashes,
                    chain_length: state.segment_length(),
                })
            }
            (Phase::AwaitingSegmentChoice, Role::Challenger) => {
                let points = state.breakpoints();
                for (index, (steps, hashes)) in points
                    .windows(2)
                    .zip(state.claimed_hashes.windows(2))
                    .enumerate()
                {
                    // Pick the first sub-segment we agree starts correctly but ends incorrectly.
                    if self.claim_at(steps[0])? == hashes[0] && self.claim_at(steps[1])? != hashes[1] {
                        return Ok(Response::ChooseSegment {
                            index,
                            chain_hashes: state.claimed_hashes.clone(),
                            chain_length: state.segment_length(),
                        });
                    }
                }
                tracing::warn!(target: "bisection-solver", "No disputable segment in challenge {:?}", state.handle);
                Ok(Response::DoNothing)
            }
            (Phase::OneStepPending, Role::Asserter) => {
                let claim = state.committed_claim();
                Ok(Response::OneStepProof {
                    lower_hash_a: claim.start_hash,
                    value: claim.end_hash,
                })
            }
            _ => Ok(Response::DoNothing),
        }
    }

    fn claim_at(&self, step: u64) -> Result<Hash> {
        self.trace.hash_at(step)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::bisection::{
        ChallengeRecord, ChallengeType, DisputeSession, HashChainTrace, KeccakStepOracle,
        ProtocolParams, Resolution, ResolutionReason,
    };
    use ethers::types::{Address, H256};

    /// Plays a dispute between two solvers until it resolves, returning the resolution and the
    /// number of bisection rounds.
    async fn play(
        asserter_trace: HashChainTrace,
        challenger_trace: HashChainTrace,
        steps: u64,
        fanout: u64,
    ) -> (Resolution, u64) {
        let (asserter, challenger) = (Address::repeat_byte(0xa5), Address::repeat_byte(0xc4));
        let claim = asserter_trace.claim(0, steps).unwrap();
        let record = ChallengeRecord {
            challenge_period_ticks: 5,
            asserter,
            challenger,
            challenge_hash: claim.commitment(),
            challenge_type: ChallengeType::Execution,
        };
        let params = ProtocolParams {
            fanout,
            challenge_period_ticks: 5,
        };
        let mut session =
            DisputeSession::open(Address::repeat_byte(1), &record, claim, &params, 0).unwrap();

        let asserter_solver = BisectionSolver::new(Role::Asserter, asserter_trace);
        let challenger_solver = BisectionSolver::new(Role::Challenger, challenger_trace);
        assert!(challenger_solver.disputes(&claim).unwrap());

        let mut bisections = 0;
        for now in 1.. {
            let (caller, response) = match session.state().turn {
                Role::Asserter => (asserter, asserter_solver.respond(session.state()).unwrap()),
                Role::Challenger => (
                    challenger,
                    challenger_solver.respond(session.state()).unwrap(),
                ),
            };
            if matches!(response, Response::Bisect { .. }) {
                bisections += 1;
            }
            if let Some(resolution) = session
                .apply(caller, response, &KeccakStepOracle, now)
                .await
                .unwrap()
            {
                return (resolution, bisections);
            }
        }
        unreachable!()
    }

    #[tokio::test]
    async fn faulty_asserter_loses() {
        let honest = HashChainTrace::new(H256::zero(), 27);
        let faulty = HashChainTrace::with_fault(H256::zero(), 27, 17).unwrap();

        let (resolution, rounds) = play(faulty, honest, 27, 4).await;
        assert_eq!(resolution.winner, Role::Challenger);
        assert_eq!(resolution.reason, ResolutionReason::OneStepProof);
        assert_eq!(rounds, 3);
    }

    #[tokio::test]
    async fn faulty_challenger_loses() {
        let honest = HashChainTrace::new(H256::zero(), 27);
        let faulty = HashChainTrace::with_fault(H256::zero(), 27, 5).unwrap();

        let (resolution, rounds) = play(honest, faulty, 27, 4).await;
        assert_eq!(resolution.winner, Role::Asserter);
        assert_eq!(resolution.reason, ResolutionReason::OneStepProof);
        assert_eq!(rounds, 3);
    }

    #[tokio::test]
    async fn rounds_match_logarithm_of_segment_length() {
        // 64 steps split in two every round.
        let honest = HashChainTrace::new(H256::zero(), 64);
        let faulty = HashChainTrace::with_fault(H256::zero(), 64, 64).unwrap();
        let (resolution, rounds) = play(faulty, honest, 64, 3).await;
        assert_eq!(resolution.winner, Role::Challenger);
        assert_eq!(rounds, 6);

        // 16 steps split in four every round.
        let honest = HashChainTrace::new(H256::zero(), 16);
        let faulty = HashChainTrace::with_fault(H256::zero(), 16, 1).unwrap();
        let (_, rounds) = play(faulty, honest, 16, 5).await;
        assert_eq!(rounds, 2);
    }

    #[test]
    fn solver_waits_for_its_turn() {
        let trace = HashChainTrace::new(H256::zero(), 10);
        let claim = trace.claim(0, 10).unwrap();
        let record = ChallengeRecord {
            challenge_period_ticks: 5,
            asserter: Address::repeat_byte(0xa5),
            challenger: Address::repeat_byte(0xc4),
            challenge_hash: claim.commitment(),
            challenge_type: ChallengeType::InboxTop,
        };
        let session = DisputeSession::open(
            Address::repeat_byte(1),
            &record,
            claim,
            &ProtocolParams::default(),
            0,
        )
        .unwrap();

        let challenger = BisectionSolver::new(Role::Challenger, trace.clone());
        assert_eq!(
            challenger.respond(session.state()).unwrap(),
            Response::DoNothing
        );
        // An honest challenger has nothing to dispute in an honest claim.
        assert!(!challenger.disputes(&claim).unwrap());

        let asserter = BisectionSolver::new(Role::Asserter, trace.clone());
        assert!(matches!(
            asserter.respond(session.state()).unwrap(),
            Response::Bisect { chain_length: 10, .. }
        ));
    }
}
