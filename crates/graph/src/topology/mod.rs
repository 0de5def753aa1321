//! Execution topology: parallel tasks, their partitions, and pipelined regions.
//!
//! Everything is stored in flat vectors and addressed by dense indices handed
//! out at build time. Ids (`ExecutionVertexId`, `ResultPartitionId`) are only
//! used at the boundary and resolved once through the index maps.
//!
//! Split into focused submodules:
//! - `build`: construction from a [`JobGraph`], edge wiring, region computation
//! - `mutation`: the rescaling extension path ([`TopologyMutation`])

mod build;
mod mutation;

use std::collections::HashMap;

use serde::Serialize;
use sluice_core::{
    DistributionPattern, ExecutionState, ExecutionVertexId, IntermediateDataSetId, JobVertexId,
    ResultPartitionId, ResultPartitionType, SluiceError,
};

use crate::job_graph::{JobEdge, JobGraph};

pub use self::mutation::TopologyMutation;

macro_rules! dense_index {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
        pub struct $name(usize);

        impl $name {
            pub fn index(self) -> usize {
                self.0
            }
        }
    };
}

dense_index!(
    /// Position of an execution vertex in the topology.
    VertexIndex
);
dense_index!(
    /// Position of a result partition in the topology.
    PartitionIndex
);
dense_index!(
    /// Position of a consumed partition group in the topology.
    GroupIndex
);
dense_index!(
    /// Position of a consumer vertex group in the topology.
    ConsumerGroupIndex
);
dense_index!(
    /// Position of a pipelined region in the topology.
    RegionIndex
);

/// One execution attempt of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExecutionAttempt {
    pub attempt_number: u32,
    pub state: ExecutionState,
}

impl ExecutionAttempt {
    /// Finished in the checkpointing sense: the attempt reached a terminal state.
    pub fn is_finished(&self) -> bool {
        self.state.is_terminal()
    }
}

/// One parallel task instance.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionVertex {
    id: ExecutionVertexId,
    produced_partitions: Vec<PartitionIndex>,
    consumed_groups: Vec<GroupIndex>,
    attempt: Option<ExecutionAttempt>,
    attempts_started: u32,
}

impl ExecutionVertex {
    fn new(id: ExecutionVertexId) -> Self {
        Self {
            id,
            produced_partitions: Vec::new(),
            consumed_groups: Vec::new(),
            attempt: None,
            attempts_started: 0,
        }
    }

    pub fn id(&self) -> ExecutionVertexId {
        self.id
    }

    pub fn job_vertex_id(&self) -> JobVertexId {
        self.id.job_vertex_id
    }

    pub fn subtask_index(&self) -> u32 {
        self.id.subtask_index
    }

    /// State of the current attempt; CREATED when nothing was attached yet.
    pub fn state(&self) -> ExecutionState {
        self.attempt
            .map(|attempt| attempt.state)
            .unwrap_or(ExecutionState::Created)
    }

    pub fn current_attempt(&self) -> Option<&ExecutionAttempt> {
        self.attempt.as_ref()
    }

    pub fn produced_partitions(&self) -> &[PartitionIndex] {
        &self.produced_partitions
    }

    /// Consumed groups in input-edge order. Deployment descriptors rely on
    /// this order staying stable.
    pub fn consumed_partition_groups(&self) -> &[GroupIndex] {
        &self.consumed_groups
    }
}

/// A produced partition of an intermediate dataset.
#[derive(Debug, Clone, Serialize)]
pub struct ResultPartition {
    id: ResultPartitionId,
    result_type: ResultPartitionType,
    producer: VertexIndex,
    consumer_groups: Vec<ConsumerGroupIndex>,
}

impl ResultPartition {
    pub fn id(&self) -> ResultPartitionId {
        self.id
    }

    pub fn result_type(&self) -> ResultPartitionType {
        self.result_type
    }

    pub fn producer(&self) -> VertexIndex {
        self.producer
    }

    pub fn consumer_vertex_groups(&self) -> &[ConsumerGroupIndex] {
        &self.consumer_groups
    }
}

/// Partitions of one dataset that are read together by the same consumers.
#[derive(Debug, Clone, Serialize)]
pub struct ConsumedPartitionGroup {
    dataset_id: IntermediateDataSetId,
    result_type: ResultPartitionType,
    distribution_pattern: DistributionPattern,
    partitions: Vec<PartitionIndex>,
    consumer_group: ConsumerGroupIndex,
}

impl ConsumedPartitionGroup {
    pub fn dataset_id(&self) -> IntermediateDataSetId {
        self.dataset_id
    }

    pub fn result_type(&self) -> ResultPartitionType {
        self.result_type
    }

    pub fn distribution_pattern(&self) -> DistributionPattern {
        self.distribution_pattern
    }

    pub fn partitions(&self) -> &[PartitionIndex] {
        &self.partitions
    }

    /// The consumer vertex group that reads this group.
    pub fn consumer_vertex_group(&self) -> ConsumerGroupIndex {
        self.consumer_group
    }
}

/// Vertices consuming the same partition group.
#[derive(Debug, Clone, Serialize)]
pub struct ConsumerVertexGroup {
    vertices: Vec<VertexIndex>,
    partition_group: GroupIndex,
}

impl ConsumerVertexGroup {
    pub fn vertices(&self) -> &[VertexIndex] {
        &self.vertices
    }

    pub fn partition_group(&self) -> GroupIndex {
        self.partition_group
    }
}

/// Vertices connected by pipelined exchanges; restarted as a unit.
#[derive(Debug, Clone, Serialize)]
pub struct PipelinedRegion {
    index: RegionIndex,
    vertices: Vec<VertexIndex>,
    blocking_consumed_groups: Vec<GroupIndex>,
}

impl PipelinedRegion {
    pub fn index(&self) -> RegionIndex {
        self.index
    }

    pub fn vertices(&self) -> &[VertexIndex] {
        &self.vertices
    }

    pub fn contains(&self, vertex: VertexIndex) -> bool {
        self.vertices.contains(&vertex)
    }

    /// Blocking groups read by any vertex of the region, deduplicated.
    pub fn blocking_consumed_partition_groups(&self) -> &[GroupIndex] {
        &self.blocking_consumed_groups
    }
}

/// Per-operator view of the topology: its subtasks and inbound edges.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionJobVertex {
    id: JobVertexId,
    name: String,
    parallelism: u32,
    tasks: Vec<VertexIndex>,
    inputs: Vec<JobEdge>,
    co_location_group: Option<String>,
    snapshot_group: Option<String>,
}

impl ExecutionJobVertex {
    pub fn id(&self) -> JobVertexId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parallelism(&self) -> u32 {
        self.parallelism
    }

    /// Subtasks ordered by subtask index.
    pub fn tasks(&self) -> &[VertexIndex] {
        &self.tasks
    }

    pub fn inputs(&self) -> &[JobEdge] {
        &self.inputs
    }

    pub fn is_input_vertex(&self) -> bool {
        self.inputs.is_empty()
    }

    pub fn snapshot_group(&self) -> Option<&str> {
        self.snapshot_group.as_deref()
    }
}

/// Read access shared by the scheduling strategies.
///
/// Index-based accessors take indices that were handed out by the same
/// topology and therefore cannot miss. Id-based lookups return
/// [`SluiceError`] unknown-id variants, which signal a broken invariant.
pub trait SchedulingTopology {
    fn vertex_index(&self, id: &ExecutionVertexId) -> Result<VertexIndex, SluiceError>;
    fn vertex_at(&self, index: VertexIndex) -> &ExecutionVertex;
    fn partition_index(&self, id: &ResultPartitionId) -> Result<PartitionIndex, SluiceError>;
    fn partition_at(&self, index: PartitionIndex) -> &ResultPartition;
    fn partition_group(&self, index: GroupIndex) -> &ConsumedPartitionGroup;
    fn consumer_vertex_group(&self, index: ConsumerGroupIndex) -> &ConsumerVertexGroup;
    fn region_at(&self, index: RegionIndex) -> &PipelinedRegion;
    fn region_index_of(&self, vertex: VertexIndex) -> RegionIndex;
    fn regions(&self) -> &[PipelinedRegion];
    fn vertex_count(&self) -> usize;

    fn vertex(&self, id: &ExecutionVertexId) -> Result<&ExecutionVertex, SluiceError> {
        Ok(self.vertex_at(self.vertex_index(id)?))
    }

    fn result_partition(&self, id: &ResultPartitionId) -> Result<&ResultPartition, SluiceError> {
        Ok(self.partition_at(self.partition_index(id)?))
    }

    fn region_of_vertex(&self, id: &ExecutionVertexId) -> Result<&PipelinedRegion, SluiceError> {
        let vertex = self.vertex_index(id)?;
        Ok(self.region_at(self.region_index_of(vertex)))
    }
}

/// The scheduling view of a running job.
#[derive(Debug, Clone)]
pub struct ExecutionTopology {
    job_graph: JobGraph,
    /// Job vertices in topological order.
    job_vertices: Vec<ExecutionJobVertex>,
    job_vertex_pos: HashMap<JobVertexId, usize>,
    vertices: Vec<ExecutionVertex>,
    vertex_index: HashMap<ExecutionVertexId, VertexIndex>,
    partitions: Vec<ResultPartition>,
    partition_index: HashMap<ResultPartitionId, PartitionIndex>,
    groups: Vec<ConsumedPartitionGroup>,
    consumer_groups: Vec<ConsumerVertexGroup>,
    dataset_groups: HashMap<IntermediateDataSetId, Vec<GroupIndex>>,
    regions: Vec<PipelinedRegion>,
    region_of: Vec<RegionIndex>,
}

impl ExecutionTopology {
    pub fn job_graph(&self) -> &JobGraph {
        &self.job_graph
    }

    /// Job vertices in topological order.
    pub fn job_vertices(&self) -> &[ExecutionJobVertex] {
        &self.job_vertices
    }

    pub fn job_vertex(&self, id: &JobVertexId) -> Result<&ExecutionJobVertex, SluiceError> {
        self.job_vertex_position(id).map(|pos| &self.job_vertices[pos])
    }

    /// Position of a job vertex in [`Self::job_vertices`].
    pub fn job_vertex_position(&self, id: &JobVertexId) -> Result<usize, SluiceError> {
        self.job_vertex_pos
            .get(id)
            .copied()
            .ok_or(SluiceError::UnknownJobVertex(*id))
    }

    pub fn vertices(&self) -> &[ExecutionVertex] {
        &self.vertices
    }

    /// Ids of every vertex in a region, in index order.
    pub fn region_vertex_ids(&self, region: RegionIndex) -> Vec<ExecutionVertexId> {
        self.regions[region.index()]
            .vertices
            .iter()
            .map(|&v| self.vertices[v.index()].id)
            .collect()
    }

    /// Number of consumed partition groups ever created.
    pub fn partition_group_count(&self) -> usize {
        self.groups.len()
    }

    // ── Execution-state feed ──────────────────────────────────

    /// Attach a fresh execution attempt in CREATED state and return its number.
    pub fn attach_attempt(&mut self, id: &ExecutionVertexId) -> Result<u32, SluiceError> {
        let index = self.vertex_index(id)?;
        let vertex = &mut self.vertices[index.index()];
        let attempt_number = vertex.attempts_started;
        vertex.attempts_started += 1;
        vertex.attempt = Some(ExecutionAttempt {
            attempt_number,
            state: ExecutionState::Created,
        });
        Ok(attempt_number)
    }

    /// Move the current attempt to `state`, returning the previous state.
    pub fn transition(
        &mut self,
        id: &ExecutionVertexId,
        state: ExecutionState,
    ) -> Result<ExecutionState, SluiceError> {
        let index = self.vertex_index(id)?;
        let attempt = self.vertices[index.index()]
            .attempt
            .as_mut()
            .ok_or(SluiceError::NoExecutionAttempt(*id))?;
        let previous = attempt.state;
        attempt.state = state;
        Ok(previous)
    }
}

impl SchedulingTopology for ExecutionTopology {
    fn vertex_index(&self, id: &ExecutionVertexId) -> Result<VertexIndex, SluiceError> {
        self.vertex_index
            .get(id)
            .copied()
            .ok_or(SluiceError::UnknownVertex(*id))
    }

    fn vertex_at(&self, index: VertexIndex) -> &ExecutionVertex {
        &self.vertices[index.index()]
    }

    fn partition_index(&self, id: &ResultPartitionId) -> Result<PartitionIndex, SluiceError> {
        self.partition_index
            .get(id)
            .copied()
            .ok_or(SluiceError::UnknownPartition(*id))
    }

    fn partition_at(&self, index: PartitionIndex) -> &ResultPartition {
        &self.partitions[index.index()]
    }

    fn partition_group(&self, index: GroupIndex) -> &ConsumedPartitionGroup {
        &self.groups[index.index()]
    }

    fn consumer_vertex_group(&self, index: ConsumerGroupIndex) -> &ConsumerVertexGroup {
        &self.consumer_groups[index.index()]
    }

    fn region_at(&self, index: RegionIndex) -> &PipelinedRegion {
        &self.regions[index.index()]
    }

    fn region_index_of(&self, vertex: VertexIndex) -> RegionIndex {
        self.region_of[vertex.index()]
    }

    fn regions(&self) -> &[PipelinedRegion] {
        &self.regions
    }

    fn vertex_count(&self) -> usize {
        self.vertices.len()
    }
}
