use anyhow::{anyhow, Result};
use clap::{ArgAction, Parser};
use ethers::{
    prelude::SignerMiddleware,
    providers::{Middleware, Provider, Ws},
    signers::{LocalWallet, Signer},
    types::{Address, H256},
};
use rollup_validator_driver::{
    BlockSource, ChainHeadDriver, ChallengeEventDriver, ContractChallengeFactory,
    ContractMoveSubmitter, DisputeRegistry, DisputeSolverDriver, Driver, DriverConfig,
    FileSessionStore, LogChallengeEvents, Participant, ProviderBlockSource, SessionStore,
    SignerMiddlewareWS, TransactionAuth, WatcherConfig, DEFAULT_CHANNEL_CAPACITY,
};
use rollup_validator_solvers::bisection::{
    ChallengeType, HashChainTrace, KeccakStepOracle, ProtocolParams, SegmentClaim, TraceProvider,
};
use std::{path::PathBuf, sync::Arc, time::Duration};
use tracing::Level;

/// Arguments for the `rollup-validator` binary.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Verbosity level (0-4)
    #[arg(long, short, help = "Verbosity level (0-4)", action = ArgAction::Count, env = "VERBOSITY")]
    v: u8,

    /// The Websocket RPC endpoint of the base chain.
    #[arg(
        long,
        short,
        help = "The Websocket RPC endpoint used to follow the base chain and send transactions.",
        env = "ROLLUP_VALIDATOR_WS"
    )]
    ws_endpoint: String,

    /// The address of the challenge factory contract.
    #[arg(
        long,
        short = 'f',
        help = "The address of the challenge factory contract.",
        env = "ROLLUP_VALIDATOR_CHALLENGE_FACTORY"
    )]
    challenge_factory: Address,

    /// The private key of the validator's signing identity.
    #[arg(
        long,
        short = 'k',
        help = "The private key used to sign challenge transactions.",
        env = "ROLLUP_VALIDATOR_PRIVATE_KEY"
    )]
    private_key: String,

    /// The directory the dispute sessions are persisted in.
    #[arg(
        long,
        default_value = "./sessions",
        help = "The directory the dispute sessions are persisted in.",
        env = "ROLLUP_VALIDATOR_SESSION_DIR"
    )]
    session_dir: PathBuf,

    /// The number of breakpoints of a full bisection, both ends included.
    #[arg(
        long,
        default_value_t = 4,
        help = "The number of breakpoints of a full bisection, both ends included.",
        env = "ROLLUP_VALIDATOR_FANOUT"
    )]
    fanout: u64,

    /// The number of base chain blocks each party has to make a move.
    #[arg(
        long,
        default_value_t = 100,
        help = "The number of base chain blocks each party has to make a move.",
        env = "ROLLUP_VALIDATOR_CHALLENGE_PERIOD"
    )]
    challenge_period_ticks: u64,

    /// The delay between two attempts at fetching the next block, in seconds.
    #[arg(
        long,
        default_value_t = 2,
        help = "The delay between two attempts at fetching the next block, in seconds.",
        env = "ROLLUP_VALIDATOR_RETRY_DELAY"
    )]
    retry_delay_secs: u64,

    /// The number of attempts at fetching the next block before resubscribing.
    #[arg(
        long,
        default_value_t = 5,
        help = "The number of attempts at fetching the next block before resubscribing.",
        env = "ROLLUP_VALIDATOR_MAX_FETCH_ATTEMPTS"
    )]
    max_fetch_attempts: usize,

    /// The number of blocks to walk back after a reorg.
    #[arg(
        long,
        default_value_t = 10,
        help = "The number of blocks to walk back after a reorg.",
        env = "ROLLUP_VALIDATOR_REORG_WALKBACK"
    )]
    reorg_walkback: u64,

    /// The bound on a single one-step proof verification, in seconds.
    #[arg(
        long,
        default_value_t = 30,
        help = "The bound on a single one-step proof verification, in seconds.",
        env = "ROLLUP_VALIDATOR_ORACLE_TIMEOUT"
    )]
    oracle_timeout_secs: u64,

    /// The machine state the validator's execution trace starts from.
    #[arg(
        long,
        default_value = "0x0000000000000000000000000000000000000000000000000000000000000000",
        help = "The machine state hash the validator's execution trace starts from.",
        env = "ROLLUP_VALIDATOR_TRACE_GENESIS"
    )]
    trace_genesis: H256,

    /// The number of steps of the validator's execution trace.
    #[arg(
        long,
        help = "The number of steps of the validator's execution trace.",
        env = "ROLLUP_VALIDATOR_TRACE_STEPS"
    )]
    trace_steps: u64,

    /// Corrupts the validator's own trace at this step, to exercise a dispute on a test network.
    #[arg(
        long,
        help = "Corrupts the validator's own trace at this step (test networks only).",
        env = "ROLLUP_VALIDATOR_FAULT_STEP"
    )]
    fault_step: Option<u64>,

    /// Claims made by other parties that the validator may be challenged over.
    #[arg(
        long = "claim",
        value_parser = parse_claim,
        help = "A claim made by another party, as START:END:START_HASH:END_HASH. May be repeated.",
        env = "ROLLUP_VALIDATOR_CLAIMS",
        value_delimiter = ','
    )]
    claims: Vec<SegmentClaim>,

    /// Opens a challenge over the validator's own trace against this party.
    #[arg(
        long,
        help = "Opens a challenge over the validator's own trace against this party.",
        env = "ROLLUP_VALIDATOR_CHALLENGE"
    )]
    challenge: Option<Address>,

    /// The type of the challenge opened with `--challenge`.
    #[arg(
        long,
        default_value_t = 2,
        help = "The type of the challenge opened with --challenge (0: messages, 1: inbox top, 2: execution).",
        env = "ROLLUP_VALIDATOR_CHALLENGE_TYPE"
    )]
    challenge_type: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse the command arguments
    let Args {
        v,
        ws_endpoint,
        challenge_factory,
        private_key,
        session_dir,
        fanout,
        challenge_period_ticks,
        retry_delay_secs,
        max_fetch_attempts,
        reorg_walkback,
        oracle_timeout_secs,
        trace_genesis,
        trace_steps,
        fault_step,
        claims,
        challenge,
        challenge_type,
    } = Args::parse();

    // Initialize the tracing subscriber
    init_tracing_subscriber(v)?;

    // Connect to the base chain and set up the signing identity.
    tracing::debug!(target: "rollup-validator-cli", "Connecting to websocket endpoint...");
    let provider = Provider::<Ws>::connect(ws_endpoint.clone()).await?;
    let chain_id = provider.get_chainid().await?.as_u64();
    let wallet = private_key.parse::<LocalWallet>()?.with_chain_id(chain_id);
    let auth = Arc::new(TransactionAuth::new(wallet.address()));
    let client: Arc<SignerMiddlewareWS> = Arc::new(SignerMiddleware::new(provider, wallet));
    tracing::info!(target: "rollup-validator-cli", "Websocket connected @ {}, signing as {:?}", ws_endpoint, auth.address());

    // Restore the persisted disputes.
    let store = Arc::new(FileSessionStore::open(&session_dir).await?);
    tracing::info!(target: "rollup-validator-cli", "Loaded {} disputes from {}", store.handles().await?.len(), session_dir.display());

    let params = ProtocolParams {
        fanout,
        challenge_period_ticks,
    };
    let factory = ContractChallengeFactory::new(challenge_factory, Arc::clone(&client), Arc::clone(&auth));
    let registry = DisputeRegistry::new(
        Arc::new(factory),
        store,
        Arc::new(KeccakStepOracle),
        params,
    )?
    .with_oracle_timeout(Duration::from_secs(oracle_timeout_secs));

    // Build the validator's own trace and register every claim it may be challenged over.
    let trace: Arc<dyn TraceProvider + Send + Sync> = match fault_step {
        Some(step) => Arc::new(HashChainTrace::with_fault(trace_genesis, trace_steps, step)?),
        None => Arc::new(HashChainTrace::new(trace_genesis, trace_steps)),
    };
    let own_claim = trace.claim(0, trace_steps)?;
    registry.register_claim(own_claim).await;
    for claim in claims {
        let commitment = registry.register_claim(claim).await;
        tracing::debug!(target: "rollup-validator-cli", "Registered claim over [{}, {}) with commitment {:?}", claim.start_step, claim.end_step, commitment);
    }

    let block_source = Arc::new(ProviderBlockSource::new(Arc::clone(&client)));
    let registry = Arc::new(registry);
    if let Some(challenger) = challenge {
        let now = block_source.latest_block().await?.id.height;
        let handle = registry
            .open(
                auth.address(),
                challenger,
                own_claim,
                ChallengeType::try_from(challenge_type)?,
                now,
            )
            .await?;
        tracing::info!(target: "rollup-validator-cli", "Opened challenge {:?} against {:?}", handle, challenger);
    }

    // Create the driver config.
    let driver_config = Arc::new(DriverConfig::new(
        block_source,
        Arc::new(LogChallengeEvents::new(Arc::clone(&client), DEFAULT_CHANNEL_CAPACITY)),
        Arc::new(ContractMoveSubmitter::new(Arc::clone(&client), Arc::clone(&auth))),
        registry,
        Participant {
            identity: auth.address(),
            trace,
        },
        WatcherConfig {
            retry_delay: Duration::from_secs(retry_delay_secs),
            max_fetch_attempts,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        },
        reorg_walkback,
    ));
    tracing::info!(target: "rollup-validator-cli", "Driver config created successfully.");

    // Start the driver loops.
    tokio::try_join!(
        ChainHeadDriver::new(Arc::clone(&driver_config)).start_loop(),
        ChallengeEventDriver::new(Arc::clone(&driver_config)).start_loop(),
        DisputeSolverDriver::new(driver_config).start_loop(),
    )?;

    Ok(())
}

/// Parses a claim given as `START:END:START_HASH:END_HASH`.
fn parse_claim(raw: &str) -> Result<SegmentClaim> {
    let parts = raw.split(':').collect::<Vec<_>>();
    let [start, end, start_hash, end_hash] = parts.as_slice() else {
        return Err(anyhow!("Expected START:END:START_HASH:END_HASH, got {}", raw));
    };
    Ok(SegmentClaim {
        start_step: start.parse()?,
        end_step: end.parse()?,
        start_hash: start_hash.parse()?,
        end_hash: end_hash.parse()?,
    })
}

/// Initializes the tracing subscriber
///
/// # Arguments
/// * `verbosity_level` - The verbosity level (0-4)
///
/// # Returns
/// * `Result<()>` - Ok if successful, Err otherwise.
fn init_tracing_subscriber(verbosity_level: u8) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(match verbosity_level {
            0 => Level::ERROR,
            1 => Level::WARN,
            2 => Level::INFO,
            3 => Level::DEBUG,
            _ => Level::TRACE,
        })
        .finish();
    tracing::subscriber::set_global_default(subscriber).map_err(|e| anyhow!(e))
}
