//! Protocol logic for the rollup validator: the bisection challenge state machine, the segment
//! selector shared by both roles, and the solvers that decide a participant's moves.

pub mod bisection;
