//! Partition group release strategies.
//!
//! A strategy is told when vertices finish or restart and answers which
//! consumed BLOCKING partition groups no consumer will read again.

mod region;

use sluice_core::{ExecutionVertexId, PartitionReleaseKind, SluiceError};
use sluice_graph::{GroupIndex, SchedulingTopology};

pub use self::region::RegionPartitionGroupReleaseStrategy;

/// Decides when consumed partition groups can be released.
pub trait PartitionGroupReleaseStrategy: Send {
    /// Record that `vertex` finished and return the groups that became releasable.
    fn vertex_finished(
        &mut self,
        topology: &dyn SchedulingTopology,
        vertex: &ExecutionVertexId,
    ) -> Result<Vec<GroupIndex>, SluiceError>;

    /// Record that `vertex` will run again.
    fn vertex_unfinished(
        &mut self,
        topology: &dyn SchedulingTopology,
        vertex: &ExecutionVertexId,
    ) -> Result<(), SluiceError>;

    /// Register vertices appended to `sibling`'s region by a rescale.
    fn vertices_added(
        &mut self,
        topology: &dyn SchedulingTopology,
        sibling: &ExecutionVertexId,
        added: &[ExecutionVertexId],
    ) -> Result<(), SluiceError>;
}

/// Keeps every partition until the job ends.
#[derive(Debug, Default, Clone, Copy)]
pub struct NeverReleasePartitionGroups;

impl PartitionGroupReleaseStrategy for NeverReleasePartitionGroups {
    fn vertex_finished(
        &mut self,
        _topology: &dyn SchedulingTopology,
        _vertex: &ExecutionVertexId,
    ) -> Result<Vec<GroupIndex>, SluiceError> {
        Ok(Vec::new())
    }

    fn vertex_unfinished(
        &mut self,
        _topology: &dyn SchedulingTopology,
        _vertex: &ExecutionVertexId,
    ) -> Result<(), SluiceError> {
        Ok(())
    }

    fn vertices_added(
        &mut self,
        _topology: &dyn SchedulingTopology,
        _sibling: &ExecutionVertexId,
        _added: &[ExecutionVertexId],
    ) -> Result<(), SluiceError> {
        Ok(())
    }
}

/// Create the strategy selected by configuration.
pub fn create_release_strategy(
    kind: PartitionReleaseKind,
    topology: &dyn SchedulingTopology,
) -> Box<dyn PartitionGroupReleaseStrategy> {
    match kind {
        PartitionReleaseKind::Region => Box::new(RegionPartitionGroupReleaseStrategy::new(topology)),
        PartitionReleaseKind::Never => Box::new(NeverReleasePartitionGroups),
    }
}
