//! Failover strategies: which tasks restart after a task failure.

mod region;
mod restart_all;

use std::collections::{BTreeSet, HashSet};
use std::fmt;

use sluice_core::{ExecutionVertexId, FailoverStrategyKind, ResultPartitionId, SluiceError};
use sluice_graph::SchedulingTopology;

pub use self::region::RestartPipelinedRegionFailoverStrategy;
pub use self::restart_all::RestartAllFailoverStrategy;

/// Why a task failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureCause {
    /// The task itself failed.
    Task(String),
    /// The task could not consume `partition`; its producer may need to rerun.
    PartitionConsumption {
        partition: ResultPartitionId,
        message: String,
    },
}

impl FailureCause {
    /// The partition implicated by a data-consumption failure.
    pub fn failed_partition(&self) -> Option<&ResultPartitionId> {
        match self {
            FailureCause::Task(_) => None,
            FailureCause::PartitionConsumption { partition, .. } => Some(partition),
        }
    }
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureCause::Task(message) => write!(f, "task failure: {message}"),
            FailureCause::PartitionConsumption { partition, message } => {
                write!(f, "failed to consume {partition}: {message}")
            }
        }
    }
}

/// Tells whether a produced partition can still be read.
pub trait PartitionAvailabilityChecker: Send {
    fn is_available(&self, partition: &ResultPartitionId) -> bool;
}

/// Every partition is readable.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllPartitionsAvailable;

impl PartitionAvailabilityChecker for AllPartitionsAvailable {
    fn is_available(&self, _partition: &ResultPartitionId) -> bool {
        true
    }
}

/// Every partition except the listed ones is readable.
#[derive(Debug, Default, Clone)]
pub struct UnavailablePartitions(pub HashSet<ResultPartitionId>);

impl PartitionAvailabilityChecker for UnavailablePartitions {
    fn is_available(&self, partition: &ResultPartitionId) -> bool {
        !self.0.contains(partition)
    }
}

/// Computes the set of tasks to restart after a failure.
pub trait FailoverStrategy: Send {
    fn tasks_to_restart(
        &mut self,
        topology: &dyn SchedulingTopology,
        availability: &dyn PartitionAvailabilityChecker,
        failed: &ExecutionVertexId,
        cause: &FailureCause,
    ) -> Result<BTreeSet<ExecutionVertexId>, SluiceError>;
}

/// Create the strategy selected by configuration.
pub fn create_failover_strategy(kind: FailoverStrategyKind) -> Box<dyn FailoverStrategy> {
    match kind {
        FailoverStrategyKind::Region => Box::new(RestartPipelinedRegionFailoverStrategy::new()),
        FailoverStrategyKind::Full => Box::new(RestartAllFailoverStrategy),
    }
}
