//! Pipeline orchestration for Gantry: trigger evaluation, per-group
//! concurrency control, matrix expansion, and the scheduler that drives
//! a run from queued to terminal.

pub mod concurrency;
pub mod matrix;
pub mod scheduler;
pub mod triggers;

pub use concurrency::ConcurrencyGovernor;
pub use matrix::MatrixExpander;
pub use scheduler::{JobReport, RunReport, Scheduler};
pub use triggers::{TriggerEvaluator, TriggerEvent};
