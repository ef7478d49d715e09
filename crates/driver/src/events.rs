//! The events module turns the logs of challenge instances into [ChallengeEvent]s: the creation
//! of a challenge and every move made in it.

use crate::bindings::{
    BisectedFilter, BisectionChallengeEvents, ChallengeCreatedFilter,
    OneStepProofSubmittedFilter, SegmentChosenFilter,
};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use ethers::{
    abi::RawLog,
    contract::{EthEvent, EthLogDecode},
    providers::{Middleware, PubsubClient, StreamExt},
    types::{Address, Filter, Log, H256, U256},
};
use rollup_validator_solvers::bisection::{ChallengeType, Hash, Response};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Something that happened in a challenge instance on the base chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeEvent {
    /// The address of the challenge instance that emitted the event.
    pub handle: Address,
    /// The height of the block that includes the event.
    pub height: u64,
    /// What happened.
    pub kind: ChallengeEventKind,
}

/// The kinds of [ChallengeEvent].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChallengeEventKind {
    /// A challenge instance was created.
    Created {
        asserter: Address,
        challenger: Address,
        challenge_type: ChallengeType,
    },
    /// The party on turn made a move.
    Moved(Response),
}

/// Returns the filter matching every event a challenge instance emits, from any address.
pub fn challenge_event_filter() -> Filter {
    Filter::new().topic0(vec![
        ChallengeCreatedFilter::signature(),
        BisectedFilter::signature(),
        SegmentChosenFilter::signature(),
        OneStepProofSubmittedFilter::signature(),
    ])
}

/// Decodes a challenge instance log.
///
/// ### Returns
/// - `Ok(Some(ChallengeEvent))`: The log is a mined challenge event.
/// - `Ok(None)`: The log is pending, was removed by a reorg, or is not a challenge event.
/// - `Err(anyhow::Error)`: The log carries a challenge event signature but does not decode.
pub fn decode_challenge_event(log: &Log) -> Result<Option<ChallengeEvent>> {
    let (Some(height), Some(signature)) = (log.block_number, log.topics.first()) else {
        return Ok(None);
    };
    if log.removed == Some(true) || !is_challenge_signature(signature) {
        return Ok(None);
    }

    let raw = RawLog {
        topics: log.topics.clone(),
        data: log.data.to_vec(),
    };
    let event = BisectionChallengeEvents::decode_log(&raw)
        .map_err(|e| anyhow!("Malformed challenge log from {:?}: {}", log.address, e))?;

    let kind = match event {
        BisectionChallengeEvents::ChallengeCreatedFilter(created) => ChallengeEventKind::Created {
            asserter: created.asserter,
            challenger: created.challenger,
            challenge_type: ChallengeType::try_from(created.challenge_type)?,
        },
        BisectionChallengeEvents::BisectedFilter(bisected) => {
            ChallengeEventKind::Moved(Response::Bisect {
                chain_hashes: hashes(bisected.chain_hashes),
                chain_length: to_u64(bisected.chain_length, "chain length")?,
            })
        }
        BisectionChallengeEvents::SegmentChosenFilter(chosen) => {
            ChallengeEventKind::Moved(Response::ChooseSegment {
                index: usize::try_from(to_u64(chosen.segment_index, "segment index")?)?,
                chain_hashes: hashes(chosen.chain_hashes),
                chain_length: to_u64(chosen.chain_length, "chain length")?,
            })
        }
        BisectionChallengeEvents::OneStepProofSubmittedFilter(proof) => {
            ChallengeEventKind::Moved(Response::OneStepProof {
                lower_hash_a: H256::from(proof.lower_hash_a),
                value: H256::from(proof.value),
            })
        }
    };

    Ok(Some(ChallengeEvent {
        handle: log.address,
        height: height.as_u64(),
        kind,
    }))
}

fn is_challenge_signature(signature: &H256) -> bool {
    [
        ChallengeCreatedFilter::signature(),
        BisectedFilter::signature(),
        SegmentChosenFilter::signature(),
        OneStepProofSubmittedFilter::signature(),
    ]
    .contains(signature)
}

fn hashes(raw: Vec<[u8; 32]>) -> Vec<Hash> {
    raw.into_iter().map(H256::from).collect()
}

fn to_u64(value: U256, name: &str) -> Result<u64> {
    u64::try_from(value).map_err(|_| anyhow!("{} {} out of range", name, value))
}

/// The [ChallengeEventSource] trait describes a feed of [ChallengeEvent]s.
#[async_trait]
pub trait ChallengeEventSource: Send + Sync {
    /// Subscribes to the events of every challenge instance. The receiver closes when the
    /// underlying feed ends; callers resubscribe.
    async fn subscribe(&self) -> Result<mpsc::Receiver<ChallengeEvent>>;
}

/// A [ChallengeEventSource] that subscribes to challenge logs over a pubsub [Middleware].
#[derive(Debug)]
pub struct LogChallengeEvents<M> {
    client: Arc<M>,
    capacity: usize,
}

impl<M> LogChallengeEvents<M> {
    /// Creates a new [LogChallengeEvents] buffering up to `capacity` undelivered events.
    pub fn new(client: Arc<M>, capacity: usize) -> Self {
        Self {
            client,
            capacity: capacity.max(1),
        }
    }
}

#[async_trait]
impl<M> ChallengeEventSource for LogChallengeEvents<M>
where
    M: Middleware + 'static,
    M::Provider: PubsubClient,
{
    async fn subscribe(&self) -> Result<mpsc::Receiver<ChallengeEvent>> {
        let (sender, receiver) = mpsc::channel(self.capacity);
        let client = Arc::clone(&self.client);

        tokio::spawn(async move {
            let filter = challenge_event_filter();
            let mut stream = match client.subscribe_logs(&filter).await {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::error!(target: "challenge-events", "Error subscribing to challenge logs: {}", e);
                    return;
                }
            };
            tracing::debug!(target: "challenge-events", "Subscribed to challenge logs");

            while let Some(log) = stream.next().await {
                match decode_challenge_event(&log) {
                    Ok(Some(event)) => {
                        if sender.send(event).await.is_err() {
                            return;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        // Soft failure, log the error and continue.
                        tracing::warn!(target: "challenge-events", "{}", e);
                    }
                }
            }
            tracing::warn!(target: "challenge-events", "Challenge log subscription ended");
        });

        Ok(receiver)
    }
}
