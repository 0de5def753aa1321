//! Job graphs and the execution topology derived from them.
//!
//! A [`JobGraph`] describes operators and their edges. Expanding it with
//! [`ExecutionTopology::from_job_graph`] yields the parallel tasks, the
//! partitions between them and the pipelined regions used by scheduling.

pub mod definition;
pub mod job_graph;
mod regions;
pub mod topology;

pub use definition::{JobDefinition, LoadedJob};
pub use job_graph::{JobEdge, JobGraph, JobVertex};
pub use topology::{
    ConsumedPartitionGroup, ConsumerGroupIndex, ConsumerVertexGroup, ExecutionAttempt,
    ExecutionJobVertex, ExecutionTopology, ExecutionVertex, GroupIndex, PartitionIndex,
    PipelinedRegion, RegionIndex, ResultPartition, SchedulingTopology, TopologyMutation,
    VertexIndex,
};
