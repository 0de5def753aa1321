use std::collections::BTreeSet;

use sluice_core::{ExecutionState, ExecutionVertexId, SluiceError};
use sluice_graph::SchedulingTopology;
use tracing::info;

use super::{FailoverStrategy, FailureCause, PartitionAvailabilityChecker};

/// Restarts every task that has been scheduled at least once.
#[derive(Debug, Default, Clone, Copy)]
pub struct RestartAllFailoverStrategy;

impl FailoverStrategy for RestartAllFailoverStrategy {
    fn tasks_to_restart(
        &mut self,
        topology: &dyn SchedulingTopology,
        _availability: &dyn PartitionAvailabilityChecker,
        failed: &ExecutionVertexId,
        _cause: &FailureCause,
    ) -> Result<BTreeSet<ExecutionVertexId>, SluiceError> {
        topology.vertex_index(failed)?;
        let restart: BTreeSet<ExecutionVertexId> = topology
            .regions()
            .iter()
            .flat_map(|region| region.vertices().iter())
            .map(|&v| topology.vertex_at(v))
            .filter(|v| v.state() != ExecutionState::Created)
            .map(|v| v.id())
            .collect();
        info!(failed = %failed, tasks = restart.len(), "Restarting all tasks");
        Ok(restart)
    }
}
