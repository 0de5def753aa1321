//! Scheduling control plane of a running job.
//!
//! - `release`: when consumed BLOCKING partition groups may be discarded
//! - `failover`: which tasks restart after a failure
//! - `checkpoint`: which tasks a checkpoint triggers, waits for and commits to
//! - `executor`: the single-threaded control executor all of the above run on
//! - `job`: the per-job facade tying them together

pub mod checkpoint;
pub mod executor;
pub mod failover;
pub mod job;
pub mod metrics;
pub mod release;

pub use checkpoint::{
    CheckpointError, CheckpointFailureReason, CheckpointPlan, CheckpointPlanCalculator, PlanScope,
    TaskAttemptRef,
};
pub use executor::{ControlExecutor, Countdown, ExecutorError};
pub use failover::{
    AllPartitionsAvailable, FailoverStrategy, FailureCause, PartitionAvailabilityChecker,
    RestartAllFailoverStrategy, RestartPipelinedRegionFailoverStrategy, UnavailablePartitions,
};
pub use job::{ControlError, JobControl, JobState, ReleasablePartitionGroup};
pub use metrics::ControlMetrics;
pub use release::{
    NeverReleasePartitionGroups, PartitionGroupReleaseStrategy, RegionPartitionGroupReleaseStrategy,
};
