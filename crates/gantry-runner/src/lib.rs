//! Job execution for Gantry: the sequential step loop, built-in control
//! actions, the shell-backed action runner, cache keys, and the release
//! gate.

pub mod cache;
pub mod executor;
pub mod release;
pub mod shell;

pub use executor::{Cancellation, ExecutorContext, run_job};
pub use release::{GateOutcome, GateState, ReleaseGate};
pub use shell::ShellRunner;
