//! The registry module contains the [DisputeRegistry], which owns every dispute session the
//! validator takes part in and persists each one after every move.

use crate::{ChallengeFactory, SessionStore};
use anyhow::{anyhow, Result};
use ethers::types::Address;
use rollup_validator_solvers::bisection::{
    ChallengeRecord, ChallengeState, ChallengeType, DisputeError, DisputeSession, Hash,
    ProofOracle, ProtocolParams, Resolution, Response, SegmentClaim,
};
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::sync::{Mutex, RwLock};

/// The default bound on a single one-step proof verification.
pub const DEFAULT_ORACLE_TIMEOUT: Duration = Duration::from_secs(30);

/// The [DisputeRegistry] maps challenge handles to their sessions. Every operation loads the
/// session from the store, applies the operation and saves the result. Operations on the same
/// handle run one at a time; operations on different handles do not wait on each other.
pub struct DisputeRegistry {
    factory: Arc<dyn ChallengeFactory>,
    store: Arc<dyn SessionStore>,
    oracle: Arc<dyn ProofOracle>,
    params: ProtocolParams,
    oracle_timeout: Duration,
    /// One lock per challenge handle.
    locks: Mutex<HashMap<Address, Arc<Mutex<()>>>>,
    /// Claims the validator knows about, keyed by their commitment.
    claims: RwLock<HashMap<Hash, SegmentClaim>>,
}

impl std::fmt::Debug for DisputeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DisputeRegistry")
            .field("params", &self.params)
            .field("oracle_timeout", &self.oracle_timeout)
            .finish_non_exhaustive()
    }
}

impl DisputeRegistry {
    /// Creates a new [DisputeRegistry].
    pub fn new(
        factory: Arc<dyn ChallengeFactory>,
        store: Arc<dyn SessionStore>,
        oracle: Arc<dyn ProofOracle>,
        params: ProtocolParams,
    ) -> Result<Self> {
        params.validate()?;
        Ok(Self {
            factory,
            store,
            oracle,
            params,
            oracle_timeout: DEFAULT_ORACLE_TIMEOUT,
            locks: Mutex::new(HashMap::new()),
            claims: RwLock::new(HashMap::new()),
        })
    }

    /// Sets the bound on a single one-step proof verification.
    pub fn with_oracle_timeout(mut self, oracle_timeout: Duration) -> Self {
        self.oracle_timeout = oracle_timeout;
        self
    }

    /// Returns the protocol parameters used for new sessions.
    pub fn params(&self) -> &ProtocolParams {
        &self.params
    }

    /// Remembers `claim`, so that a challenge created over it can be tracked from the factory's
    /// `ChallengeCreated` event alone. Returns the claim's commitment.
    pub async fn register_claim(&self, claim: SegmentClaim) -> Hash {
        let commitment = claim.commitment();
        self.claims.write().await.insert(commitment, claim);
        commitment
    }

    /// Returns the registered claim with the given commitment, if any.
    pub async fn known_claim(&self, commitment: Hash) -> Option<SegmentClaim> {
        self.claims.read().await.get(&commitment).copied()
    }

    /// Creates a challenge over `claim` on the base chain and opens the asserter's session for it.
    ///
    /// The session is built from the submitted arguments, so a failing read-back of the
    /// factory's record cannot leave a created challenge untracked.
    ///
    /// ### Returns
    /// - `Ok(Address)`: The handle of the new challenge.
    /// - `Err(anyhow::Error)`: The challenge could not be created or persisted.
    pub async fn open(
        &self,
        asserter: Address,
        challenger: Address,
        claim: SegmentClaim,
        challenge_type: ChallengeType,
        now: u64,
    ) -> Result<Address> {
        if claim.length() == 0 {
            return Err(DisputeError::InvalidParams(format!(
                "empty segment [{}, {})",
                claim.start_step, claim.end_step
            ))
            .into());
        }
        let record = ChallengeRecord {
            challenge_period_ticks: self.params.challenge_period_ticks,
            asserter,
            challenger,
            challenge_hash: claim.commitment(),
            challenge_type,
        };
        self.register_claim(claim).await;

        let handle = self
            .factory
            .create_challenge(
                asserter,
                challenger,
                record.challenge_period_ticks,
                record.challenge_hash,
                challenge_type,
            )
            .await?;

        let lock = self.lock_of(handle).await;
        let _guard = lock.lock().await;

        let session = DisputeSession::open(handle, &record, claim, &self.params, now)?;
        self.store.save(session.state()).await?;
        tracing::info!(target: "dispute-registry", "Opened challenge {:?} against {:?}", handle, challenger);
        Ok(handle)
    }

    /// Starts tracking a challenge another party created, after checking `claim` against the
    /// factory's record. Tracking a known handle leaves its session untouched.
    pub async fn track(&self, handle: Address, claim: SegmentClaim, now: u64) -> Result<()> {
        let lock = self.lock_of(handle).await;
        let _guard = lock.lock().await;

        if self.store.load(handle).await?.is_some() {
            tracing::debug!(target: "dispute-registry", "Challenge {:?} is already tracked", handle);
            return Ok(());
        }
        let record = self
            .factory
            .challenge(handle)
            .await?
            .ok_or(anyhow!("Unknown challenge {:?}", handle))?;

        let session = DisputeSession::open(handle, &record, claim, &self.params, now)?;
        self.store.save(session.state()).await?;
        tracing::info!(target: "dispute-registry", "Tracking challenge {:?} opened by {:?}", handle, record.asserter);
        Ok(())
    }

    /// Starts tracking a challenge announced by the factory, looking its claim up among the
    /// registered claims.
    ///
    /// ### Returns
    /// - `Ok(true)`: The challenge is tracked.
    /// - `Ok(false)`: No registered claim matches the challenge hash.
    /// - `Err(anyhow::Error)`: The factory or the store failed, or the record is unusable.
    pub async fn track_created(&self, handle: Address, now: u64) -> Result<bool> {
        if self.store.load(handle).await?.is_some() {
            return Ok(true);
        }
        let record = self
            .factory
            .challenge(handle)
            .await?
            .ok_or(anyhow!("Unknown challenge {:?}", handle))?;
        let Some(claim) = self.known_claim(record.challenge_hash).await else {
            tracing::warn!(target: "dispute-registry", "No known claim for challenge {:?} with hash {:?}", handle, record.challenge_hash);
            return Ok(false);
        };
        self.track(handle, claim, now).await?;
        Ok(true)
    }

    /// Applies a move by `caller` to the challenge at `handle`.
    ///
    /// A rejected move fails with the [DisputeError] as the error source. Any timeout-forfeit
    /// observed on the way is persisted either way. An oracle that does not answer within the
    /// timeout fails the call and leaves the session as it was.
    pub async fn apply(
        &self,
        handle: Address,
        caller: Address,
        response: Response,
        now: u64,
    ) -> Result<Option<Resolution>> {
        let lock = self.lock_of(handle).await;
        let _guard = lock.lock().await;

        let mut session = self.session_of(handle).await?;
        let outcome = tokio::time::timeout(
            self.oracle_timeout,
            session.apply(caller, response, self.oracle.as_ref(), now),
        )
        .await
        .map_err(|_| {
            tracing::error!(target: "dispute-registry", "Oracle timed out for challenge {:?}", handle);
            anyhow!("Oracle timed out after {:?}", self.oracle_timeout)
        })?;

        self.store.save(session.state()).await?;
        match outcome {
            Ok(resolution) => Ok(resolution),
            Err(e) => {
                tracing::warn!(target: "dispute-registry", "Rejected move by {:?} in challenge {:?}: {}", caller, handle, e);
                Err(e.into())
            }
        }
    }

    /// Concedes the challenge at `handle` on behalf of `caller`.
    pub async fn concede(&self, handle: Address, caller: Address, now: u64) -> Result<Resolution> {
        let lock = self.lock_of(handle).await;
        let _guard = lock.lock().await;

        let mut session = self.session_of(handle).await?;
        let outcome = session.concede(caller, now);
        self.store.save(session.state()).await?;
        Ok(outcome?)
    }

    /// Applies timeout-forfeit to every live session whose deadline has passed at `now`.
    ///
    /// A session that cannot be loaded or saved is logged and skipped, as is a session busy with
    /// another operation. Skipped sessions are picked up by a later sweep.
    ///
    /// ### Returns
    /// - `Ok(Vec<(Address, Resolution)>)`: The sessions resolved by this sweep.
    /// - `Err(anyhow::Error)`: The store could not list its sessions.
    pub async fn expire_all(&self, now: u64) -> Result<Vec<(Address, Resolution)>> {
        let mut resolved = Vec::new();
        for handle in self.store.handles().await? {
            let lock = self.lock_of(handle).await;
            let Ok(_guard) = lock.try_lock() else {
                tracing::debug!(target: "dispute-registry", "Challenge {:?} is busy, skipping it in this sweep", handle);
                continue;
            };

            let state = match self.store.load(handle).await {
                Ok(Some(state)) => state,
                Ok(None) => continue,
                Err(e) => {
                    tracing::error!(target: "dispute-registry", "Error loading challenge {:?}: {}", handle, e);
                    continue;
                }
            };
            let mut session = match DisputeSession::from_state(state) {
                Ok(session) => session,
                Err(e) => {
                    tracing::error!(target: "dispute-registry", "Error resuming challenge {:?}: {}", handle, e);
                    continue;
                }
            };
            if let Some(resolution) = session.expire(now) {
                if let Err(e) = self.store.save(session.state()).await {
                    tracing::error!(target: "dispute-registry", "Error saving expired challenge {:?}: {}", handle, e);
                    continue;
                }
                resolved.push((handle, resolution));
            }
        }
        Ok(resolved)
    }

    /// Returns the state of the challenge at `handle`, if tracked.
    pub async fn session(&self, handle: Address) -> Result<Option<ChallengeState>> {
        self.store.load(handle).await
    }

    /// Returns the state of every tracked challenge that is not resolved yet. Sessions that
    /// cannot be loaded are logged and left out.
    pub async fn live_sessions(&self) -> Result<Vec<ChallengeState>> {
        let mut live = Vec::new();
        for handle in self.store.handles().await? {
            match self.store.load(handle).await {
                Ok(Some(state)) if state.resolution().is_none() => live.push(state),
                Ok(_) => {}
                Err(e) => {
                    tracing::error!(target: "dispute-registry", "Error loading challenge {:?}: {}", handle, e);
                }
            }
        }
        Ok(live)
    }

    /// Removes every resolved session from the store, returning how many were removed.
    pub async fn prune_resolved(&self) -> Result<usize> {
        let mut pruned = 0;
        for handle in self.store.handles().await? {
            let lock = self.lock_of(handle).await;
            let _guard = lock.lock().await;

            let resolved = self
                .store
                .load(handle)
                .await?
                .map_or(false, |state| state.resolution().is_some());
            if resolved {
                self.store.remove(handle).await?;
                self.locks.lock().await.remove(&handle);
                pruned += 1;
            }
        }
        tracing::debug!(target: "dispute-registry", "Pruned {} resolved challenges", pruned);
        Ok(pruned)
    }

    /// Returns the lock of the challenge at `handle`.
    async fn lock_of(&self, handle: Address) -> Arc<Mutex<()>> {
        Arc::clone(self.locks.lock().await.entry(handle).or_default())
    }

    async fn session_of(&self, handle: Address) -> Result<DisputeSession> {
        let state = self
            .store
            .load(handle)
            .await?
            .ok_or(anyhow!("Unknown challenge {:?}", handle))?;
        Ok(DisputeSession::from_state(state)?)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{FileSessionStore, InMemoryChallengeFactory, MemorySessionStore};
    use async_trait::async_trait;
    use ethers::types::H256;
    use rollup_validator_solvers::bisection::{
        BisectionSolver, DisputeError, DisputeSolver, Hash, HashChainTrace, KeccakStepOracle,
        Phase, ResolutionReason, Role, TraceProvider,
    };

    const ASSERTER: Address = Address::repeat_byte(0xa5);
    const CHALLENGER: Address = Address::repeat_byte(0xc4);

    fn registry(factory: Arc<InMemoryChallengeFactory>) -> DisputeRegistry {
        DisputeRegistry::new(
            factory,
            Arc::new(MemorySessionStore::default()),
            Arc::new(KeccakStepOracle),
            ProtocolParams {
                fanout: 4,
                challenge_period_ticks: 10,
            },
        )
        .unwrap()
    }

    fn dispute_error(e: &anyhow::Error) -> Option<&DisputeError> {
        e.downcast_ref::<DisputeError>()
    }

    #[tokio::test]
    async fn both_parties_play_to_resolution() {
        let factory = Arc::new(InMemoryChallengeFactory::default());
        let asserter_view = registry(Arc::clone(&factory));
        let challenger_view = registry(Arc::clone(&factory));

        let faulty = HashChainTrace::with_fault(H256::zero(), 27, 17).unwrap();
        let honest = HashChainTrace::new(H256::zero(), 27);
        let claim = faulty.claim(0, 27).unwrap();

        let handle = asserter_view
            .open(ASSERTER, CHALLENGER, claim, ChallengeType::Execution, 0)
            .await
            .unwrap();
        challenger_view.track(handle, claim, 0).await.unwrap();

        let asserter = BisectionSolver::new(Role::Asserter, faulty);
        let challenger = BisectionSolver::new(Role::Challenger, honest);

        let mut resolution = None;
        for now in 1..100 {
            let state = asserter_view.session(handle).await.unwrap().unwrap();
            let (caller, response) = match state.turn {
                Role::Asserter => (ASSERTER, asserter.respond(&state).unwrap()),
                Role::Challenger => (CHALLENGER, challenger.respond(&state).unwrap()),
            };
            // Each party validates the move against its own copy.
            let ours = asserter_view
                .apply(handle, caller, response.clone(), now)
                .await
                .unwrap();
            let theirs = challenger_view
                .apply(handle, caller, response, now)
                .await
                .unwrap();
            assert_eq!(ours, theirs);
            if ours.is_some() {
                resolution = ours;
                break;
            }
        }

        let resolution = resolution.unwrap();
        assert_eq!(resolution.winner, Role::Challenger);
        assert_eq!(resolution.reason, ResolutionReason::OneStepProof);
        assert_eq!(
            asserter_view.session(handle).await.unwrap(),
            challenger_view.session(handle).await.unwrap()
        );
    }

    #[tokio::test]
    async fn track_rejects_a_mismatching_claim() {
        let factory = Arc::new(InMemoryChallengeFactory::default());
        let asserter_view = registry(Arc::clone(&factory));
        let challenger_view = registry(Arc::clone(&factory));

        let trace = HashChainTrace::new(H256::zero(), 8);
        let handle = asserter_view
            .open(ASSERTER, CHALLENGER, trace.claim(0, 8).unwrap(), ChallengeType::Messages, 0)
            .await
            .unwrap();

        let err = challenger_view
            .track(handle, trace.claim(0, 7).unwrap(), 0)
            .await
            .unwrap_err();
        assert_eq!(dispute_error(&err), Some(&DisputeError::ClaimMismatch));
        assert!(challenger_view.session(handle).await.unwrap().is_none());

        let err = challenger_view
            .track(Address::repeat_byte(0x77), trace.claim(0, 8).unwrap(), 0)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Unknown challenge"));
    }

    #[tokio::test]
    async fn silent_party_forfeits_on_sweep() {
        let factory = Arc::new(InMemoryChallengeFactory::default());
        let registry = registry(factory);
        let trace = HashChainTrace::new(H256::zero(), 27);
        let handle = registry
            .open(ASSERTER, CHALLENGER, trace.claim(0, 27).unwrap(), ChallengeType::InboxTop, 5)
            .await
            .unwrap();

        // The deadline tick itself is still in time.
        assert!(registry.expire_all(15).await.unwrap().is_empty());
        let swept = registry.expire_all(16).await.unwrap();
        assert_eq!(swept.len(), 1);
        assert_eq!(swept[0].0, handle);
        assert_eq!(swept[0].1.winner, Role::Challenger);
        assert_eq!(swept[0].1.reason, ResolutionReason::TimeoutForfeit);

        // Already resolved sessions are not reported twice.
        assert!(registry.expire_all(17).await.unwrap().is_empty());

        let asserter = BisectionSolver::new(Role::Asserter, trace);
        let state = registry.session(handle).await.unwrap().unwrap();
        let late = Response::Bisect {
            chain_hashes: state
                .breakpoints()
                .into_iter()
                .map(|step| asserter.claim_at(step).unwrap())
                .collect(),
            chain_length: 27,
        };
        let err = registry.apply(handle, ASSERTER, late, 17).await.unwrap_err();
        assert_eq!(dispute_error(&err), Some(&DisputeError::SessionResolved));
    }

    #[tokio::test]
    async fn late_move_resolves_and_persists() {
        let registry = registry(Arc::new(InMemoryChallengeFactory::default()));
        let trace = HashChainTrace::new(H256::zero(), 4);
        let handle = registry
            .open(ASSERTER, CHALLENGER, trace.claim(0, 4).unwrap(), ChallengeType::Execution, 0)
            .await
            .unwrap();

        let err = registry
            .apply(
                handle,
                ASSERTER,
                Response::Bisect {
                    chain_hashes: vec![],
                    chain_length: 4,
                },
                11,
            )
            .await
            .unwrap_err();
        assert_eq!(dispute_error(&err), Some(&DisputeError::SessionResolved));

        let state = registry.session(handle).await.unwrap().unwrap();
        assert!(matches!(state.phase, Phase::Resolved(Resolution { winner: Role::Challenger, .. })));
    }

    #[tokio::test]
    async fn rejected_moves_leave_the_session_live() {
        let registry = registry(Arc::new(InMemoryChallengeFactory::default()));
        let trace = HashChainTrace::new(H256::zero(), 9);
        let handle = registry
            .open(ASSERTER, CHALLENGER, trace.claim(0, 9).unwrap(), ChallengeType::Execution, 0)
            .await
            .unwrap();

        let err = registry
            .apply(
                handle,
                CHALLENGER,
                Response::ChooseSegment {
                    index: 0,
                    chain_hashes: vec![],
                    chain_length: 9,
                },
                1,
            )
            .await
            .unwrap_err();
        assert!(matches!(
            dispute_error(&err),
            Some(DisputeError::StaleChallenge { phase: Phase::Bisecting })
        ));

        let err = registry
            .apply(handle, Address::repeat_byte(0x11), Response::DoNothing, 1)
            .await;
        // Doing nothing is always accepted.
        assert_eq!(err.unwrap(), None);

        let state = registry.session(handle).await.unwrap().unwrap();
        assert_eq!(state.phase, Phase::Bisecting);
        assert_eq!(state.turn, Role::Asserter);
    }

    #[tokio::test]
    async fn concede_and_prune() {
        let registry = registry(Arc::new(InMemoryChallengeFactory::default()));
        let trace = HashChainTrace::new(H256::zero(), 9);
        let conceded = registry
            .open(ASSERTER, CHALLENGER, trace.claim(0, 9).unwrap(), ChallengeType::Execution, 0)
            .await
            .unwrap();
        let live = registry
            .open(ASSERTER, CHALLENGER, trace.claim(0, 3).unwrap(), ChallengeType::Execution, 0)
            .await
            .unwrap();

        let resolution = registry.concede(conceded, CHALLENGER, 1).await.unwrap();
        assert_eq!(resolution.winner, Role::Asserter);
        assert_eq!(resolution.reason, ResolutionReason::Conceded);

        let live_states = registry.live_sessions().await.unwrap();
        assert_eq!(live_states.len(), 1);
        assert_eq!(live_states[0].handle, live);

        assert_eq!(registry.prune_resolved().await.unwrap(), 1);
        assert!(registry.session(conceded).await.unwrap().is_none());
        assert!(registry.session(live).await.unwrap().is_some());

        let err = registry.concede(conceded, CHALLENGER, 2).await.unwrap_err();
        assert!(err.to_string().contains("Unknown challenge"));
    }

    /// An oracle that answers long after any reasonable timeout.
    struct StalledOracle;

    #[async_trait]
    impl ProofOracle for StalledOracle {
        async fn verify_one_step_proof(&self, _: Hash, _: Hash) -> Result<bool> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(true)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn oracle_timeout_leaves_session_pending() {
        let registry = DisputeRegistry::new(
            Arc::new(InMemoryChallengeFactory::default()),
            Arc::new(MemorySessionStore::default()),
            Arc::new(StalledOracle),
            ProtocolParams {
                fanout: 4,
                challenge_period_ticks: 10,
            },
        )
        .unwrap()
        .with_oracle_timeout(Duration::from_secs(1));

        let trace = HashChainTrace::new(H256::zero(), 1);
        let claim = trace.claim(0, 1).unwrap();
        let handle = registry
            .open(ASSERTER, CHALLENGER, claim, ChallengeType::Execution, 0)
            .await
            .unwrap();

        let err = registry
            .apply(
                handle,
                ASSERTER,
                Response::OneStepProof {
                    lower_hash_a: claim.start_hash,
                    value: claim.end_hash,
                },
                1,
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Oracle timed out"));

        let state = registry.session(handle).await.unwrap().unwrap();
        assert_eq!(state.phase, Phase::OneStepPending);
        assert_eq!(state.turn, Role::Asserter);
    }

    #[test]
    fn invalid_params_are_rejected() {
        let result = DisputeRegistry::new(
            Arc::new(InMemoryChallengeFactory::default()),
            Arc::new(MemorySessionStore::default()),
            Arc::new(KeccakStepOracle),
            ProtocolParams {
                fanout: 2,
                challenge_period_ticks: 10,
            },
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn challenges_are_tracked_from_registered_claims() {
        let factory = Arc::new(InMemoryChallengeFactory::default());
        let asserter_view = registry(Arc::clone(&factory));
        let challenger_view = registry(Arc::clone(&factory));

        let claim = HashChainTrace::with_fault(H256::zero(), 16, 3)
            .unwrap()
            .claim(0, 16)
            .unwrap();
        let handle = asserter_view
            .open(ASSERTER, CHALLENGER, claim, ChallengeType::Execution, 0)
            .await
            .unwrap();
        // Opening a challenge registers its claim.
        assert_eq!(asserter_view.known_claim(claim.commitment()).await, Some(claim));
        assert!(asserter_view.track_created(handle, 1).await.unwrap());

        assert!(!challenger_view.track_created(handle, 1).await.unwrap());
        assert!(challenger_view.session(handle).await.unwrap().is_none());

        challenger_view.register_claim(claim).await;
        assert!(challenger_view.track_created(handle, 1).await.unwrap());
        let state = challenger_view.session(handle).await.unwrap().unwrap();
        assert_eq!(state.committed_claim(), claim);
        assert_eq!(state.deadline, 11);

        let err = challenger_view
            .track_created(Address::repeat_byte(0x77), 1)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Unknown challenge"));
    }

    #[tokio::test]
    async fn sweep_skips_unreadable_sessions() {
        let dir = std::env::temp_dir().join(format!(
            "rollup-validator-unreadable-sweep-{}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        let store = Arc::new(FileSessionStore::open(&dir).await.unwrap());
        let registry = DisputeRegistry::new(
            Arc::new(InMemoryChallengeFactory::default()),
            Arc::clone(&store) as Arc<dyn SessionStore>,
            Arc::new(KeccakStepOracle),
            ProtocolParams {
                fanout: 4,
                challenge_period_ticks: 10,
            },
        )
        .unwrap();

        let trace = HashChainTrace::new(H256::zero(), 27);
        let mut handles = Vec::new();
        for _ in 0..20 {
            let handle = registry
                .open(ASSERTER, CHALLENGER, trace.claim(0, 27).unwrap(), ChallengeType::Execution, 0)
                .await
                .unwrap();
            handles.push(handle);
        }

        // A file that is not JSON, and a JSON state whose segment is empty.
        std::fs::write(dir.join(format!("{:?}.json", Address::zero())), "garbage").unwrap();
        let mut inverted = registry.session(handles[0]).await.unwrap().unwrap();
        inverted.handle = Address::repeat_byte(0xee);
        inverted.start_step = 30;
        store.save(&inverted).await.unwrap();

        let swept = registry.expire_all(1000).await.unwrap();
        assert_eq!(swept.len(), 20);
        for handle in handles {
            let state = registry.session(handle).await.unwrap().unwrap();
            assert_eq!(
                state.resolution().map(|resolution| resolution.reason),
                Some(ResolutionReason::TimeoutForfeit)
            );
        }
        assert_eq!(registry.live_sessions().await.unwrap().len(), 1);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_does_not_wait_on_a_busy_session() {
        let registry = Arc::new(
            DisputeRegistry::new(
                Arc::new(InMemoryChallengeFactory::default()),
                Arc::new(MemorySessionStore::default()),
                Arc::new(StalledOracle),
                ProtocolParams {
                    fanout: 4,
                    challenge_period_ticks: 10,
                },
            )
            .unwrap(),
        );

        let trace = HashChainTrace::new(H256::zero(), 1);
        let claim = trace.claim(0, 1).unwrap();
        let proving = registry
            .open(ASSERTER, CHALLENGER, claim, ChallengeType::Execution, 0)
            .await
            .unwrap();
        let silent = registry
            .open(ASSERTER, CHALLENGER, claim, ChallengeType::Execution, 0)
            .await
            .unwrap();

        let prover = Arc::clone(&registry);
        let proof = tokio::spawn(async move {
            prover
                .apply(
                    proving,
                    ASSERTER,
                    Response::OneStepProof {
                        lower_hash_a: claim.start_hash,
                        value: claim.end_hash,
                    },
                    1,
                )
                .await
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!proof.is_finished());

        let swept = tokio::time::timeout(Duration::from_secs(1), registry.expire_all(20))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(swept.len(), 1);
        assert_eq!(swept[0].0, silent);
        proof.abort();
    }

    /// A factory that creates challenges but cannot read them back.
    #[derive(Default)]
    struct WriteOnlyFactory(InMemoryChallengeFactory);

    #[async_trait]
    impl ChallengeFactory for WriteOnlyFactory {
        async fn create_challenge(
            &self,
            asserter: Address,
            challenger: Address,
            challenge_period_ticks: u64,
            challenge_hash: Hash,
            challenge_type: ChallengeType,
        ) -> Result<Address> {
            self.0
                .create_challenge(asserter, challenger, challenge_period_ticks, challenge_hash, challenge_type)
                .await
        }

        async fn challenge(&self, _: Address) -> Result<Option<ChallengeRecord>> {
            Err(anyhow!("connection reset"))
        }
    }

    #[tokio::test]
    async fn open_does_not_read_the_record_back() {
        let registry = DisputeRegistry::new(
            Arc::new(WriteOnlyFactory::default()),
            Arc::new(MemorySessionStore::default()),
            Arc::new(KeccakStepOracle),
            ProtocolParams {
                fanout: 4,
                challenge_period_ticks: 10,
            },
        )
        .unwrap();

        let claim = HashChainTrace::new(H256::zero(), 9).claim(0, 9).unwrap();
        let handle = registry
            .open(ASSERTER, CHALLENGER, claim, ChallengeType::Messages, 3)
            .await
            .unwrap();
        let state = registry.session(handle).await.unwrap().unwrap();
        assert_eq!(state.committed_claim(), claim);
        assert_eq!(state.challenge_period_ticks, 10);
        assert_eq!(state.deadline, 13);

        let empty = SegmentClaim {
            end_step: 0,
            ..claim
        };
        let err = registry
            .open(ASSERTER, CHALLENGER, empty, ChallengeType::Messages, 3)
            .await
            .unwrap_err();
        assert!(matches!(dispute_error(&err), Some(DisputeError::InvalidParams(_))));
    }
}
