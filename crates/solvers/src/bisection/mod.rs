//! Data structures, types, and the solver implementation for the interactive bisection
//! challenge.

pub mod segment;
pub use segment::{rounds_to_one_step, segment_count, segment_lengths, split_range};

mod types;
pub use types::*;

mod errors;
pub use errors::DisputeError;

mod oracle;
pub use oracle::{KeccakStepOracle, ProofOracle};

mod session;
pub use session::{ChallengeState, DisputeSession};

mod trace;
pub use trace::{HashChainTrace, TraceProvider};

mod solver;
pub use solver::{BisectionSolver, DisputeSolver};
