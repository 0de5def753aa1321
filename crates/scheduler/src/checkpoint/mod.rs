//! Checkpoint plan calculation.
//!
//! Split into focused submodules:
//! - `calculator`: the all-running fast path and the partial-finish path
//! - `plan`: the immutable result of one attempt
//! - `status`: per job vertex running-subtask bitsets
//! - `scope`: which part of the job a plan covers
//! - `failure`: abort reasons

mod calculator;
mod failure;
mod plan;
mod scope;
mod status;
#[cfg(test)]
mod tests;

pub use self::calculator::CheckpointPlanCalculator;
pub use self::failure::{CheckpointError, CheckpointFailureReason};
pub use self::plan::{CheckpointPlan, TaskAttemptRef};
pub use self::scope::PlanScope;
pub use self::status::RunningStatus;
