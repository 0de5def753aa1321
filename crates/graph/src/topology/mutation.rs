use sluice_core::{DistributionPattern, ExecutionVertexId, SluiceError};
use tracing::info;

use super::{ExecutionTopology, ExecutionVertex, SchedulingTopology, VertexIndex};
use crate::job_graph::JobEdge;

/// Grows a running topology while keeping every index consistent.
pub trait TopologyMutation {
    /// Append `additional` subtasks of `sibling`'s job vertex and place them
    /// in `sibling`'s pipelined region. Returns the ids of the new subtasks.
    ///
    /// Only operators whose inbound and outbound edges are all ALL_TO_ALL can
    /// be extended; anything else is rejected before the topology changes.
    fn extend_region(
        &mut self,
        sibling: &ExecutionVertexId,
        additional: u32,
    ) -> Result<Vec<ExecutionVertexId>, SluiceError>;
}

impl TopologyMutation for ExecutionTopology {
    fn extend_region(
        &mut self,
        sibling: &ExecutionVertexId,
        additional: u32,
    ) -> Result<Vec<ExecutionVertexId>, SluiceError> {
        let sibling_index = self.vertex_index(sibling)?;
        let job_vertex_id = sibling.job_vertex_id;
        let pos = *self
            .job_vertex_pos
            .get(&job_vertex_id)
            .ok_or(SluiceError::UnknownJobVertex(job_vertex_id))?;

        let outputs: Vec<JobEdge> = self
            .job_graph
            .outputs_of(&job_vertex_id)
            .into_iter()
            .cloned()
            .collect();
        let job_vertex = &self.job_vertices[pos];
        if let Some(edge) = job_vertex
            .inputs
            .iter()
            .chain(outputs.iter())
            .find(|edge| edge.distribution_pattern != DistributionPattern::AllToAll)
        {
            return Err(SluiceError::UnsupportedRescale(format!(
                "'{}' is connected POINTWISE through dataset {}",
                job_vertex.name, edge.source
            )));
        }
        if additional == 0 {
            return Ok(Vec::new());
        }

        let first_subtask = job_vertex.parallelism;
        let Some(new_parallelism) = first_subtask.checked_add(additional) else {
            return Err(SluiceError::UnsupportedRescale(format!(
                "'{}' cannot grow from {first_subtask} by {additional} subtasks",
                job_vertex.name
            )));
        };
        let new_vertices = self.append_vertices(sibling_index, pos, &outputs, additional);
        self.extend_region_membership(sibling_index, &new_vertices);

        self.job_vertices[pos].parallelism = new_parallelism;
        self.job_graph.set_parallelism(job_vertex_id, new_parallelism)?;

        info!(
            vertex = %self.job_vertices[pos].name,
            from = first_subtask,
            to = new_parallelism,
            region = self.region_index_of(sibling_index).index(),
            "Extended pipelined region"
        );
        Ok(new_vertices
            .iter()
            .map(|v| self.vertices[v.index()].id)
            .collect())
    }
}

impl ExecutionTopology {
    /// Create the new subtasks, join them to the sibling's consumer groups
    /// and add their partitions to each ALL_TO_ALL group downstream.
    fn append_vertices(
        &mut self,
        sibling: VertexIndex,
        job_vertex_pos: usize,
        outputs: &[JobEdge],
        additional: u32,
    ) -> Vec<VertexIndex> {
        let consumed = self.vertices[sibling.index()].consumed_groups.clone();
        let job_vertex_id = self.job_vertices[job_vertex_pos].id;
        let first_subtask = self.job_vertices[job_vertex_pos].parallelism;

        let mut added = Vec::with_capacity(additional as usize);
        for subtask in first_subtask..first_subtask + additional {
            let id = ExecutionVertexId::new(job_vertex_id, subtask);
            let index = VertexIndex(self.vertices.len());
            let mut vertex = ExecutionVertex::new(id);
            vertex.consumed_groups = consumed.clone();
            self.vertices.push(vertex);
            self.vertex_index.insert(id, index);
            self.job_vertices[job_vertex_pos].tasks.push(index);

            for group in &consumed {
                let consumer_group = self.groups[group.index()].consumer_group;
                self.consumer_groups[consumer_group.index()].vertices.push(index);
            }
            for edge in outputs {
                self.update_group_indices(index, edge, subtask);
            }
            added.push(index);
        }
        added
    }

    /// Register the partition of a new producer subtask with the dataset's
    /// single ALL_TO_ALL group.
    fn update_group_indices(&mut self, producer: VertexIndex, edge: &JobEdge, subtask: u32) {
        let partition = self.add_partition(producer, edge, subtask);
        let groups = self
            .dataset_groups
            .get(&edge.source)
            .cloned()
            .unwrap_or_default();
        for group in groups {
            let consumer_group = self.groups[group.index()].consumer_group;
            self.groups[group.index()].partitions.push(partition);
            self.partitions[partition.index()]
                .consumer_groups
                .push(consumer_group);
        }
    }

    fn extend_region_membership(&mut self, sibling: VertexIndex, added: &[VertexIndex]) {
        let region = self.region_of[sibling.index()];
        self.region_of.resize(self.vertices.len(), region);
        let members = &mut self.regions[region.index()].vertices;
        members.extend_from_slice(added);
        members.sort_unstable();
    }
}
