use std::collections::{HashMap, HashSet};

use sluice_core::{ExecutionVertexId, SluiceError};
use sluice_graph::{GroupIndex, RegionIndex, SchedulingTopology, VertexIndex};
use tracing::debug;

use super::PartitionGroupReleaseStrategy;

/// Unfinished vertices of one pipelined region.
#[derive(Debug, Default)]
struct PipelinedRegionExecutionView {
    unfinished: HashSet<VertexIndex>,
}

impl PipelinedRegionExecutionView {
    fn is_finished(&self) -> bool {
        self.unfinished.is_empty()
    }
}

/// Unfinished consumer regions of one BLOCKING partition group.
#[derive(Debug, Default)]
struct ConsumerRegionGroupExecutionView {
    regions: HashSet<RegionIndex>,
    unfinished: HashSet<RegionIndex>,
}

impl ConsumerRegionGroupExecutionView {
    fn add(&mut self, region: RegionIndex) {
        self.regions.insert(region);
        self.unfinished.insert(region);
    }

    fn region_finished(&mut self, region: RegionIndex) {
        self.unfinished.remove(&region);
    }

    fn region_unfinished(&mut self, region: RegionIndex) {
        if self.regions.contains(&region) {
            self.unfinished.insert(region);
        }
    }

    fn is_finished(&self) -> bool {
        self.unfinished.is_empty()
    }
}

/// Releases a consumed BLOCKING group once every region consuming it finished.
///
/// Assumes one consumer vertex group per partition group, which holds for
/// every topology built by `sluice-graph`.
#[derive(Debug)]
pub struct RegionPartitionGroupReleaseStrategy {
    region_views: Vec<PipelinedRegionExecutionView>,
    consumer_views: HashMap<GroupIndex, ConsumerRegionGroupExecutionView>,
}

impl RegionPartitionGroupReleaseStrategy {
    pub fn new(topology: &dyn SchedulingTopology) -> Self {
        let mut region_views = Vec::with_capacity(topology.regions().len());
        let mut consumer_views: HashMap<GroupIndex, ConsumerRegionGroupExecutionView> =
            HashMap::new();

        for region in topology.regions() {
            region_views.push(PipelinedRegionExecutionView {
                unfinished: region.vertices().iter().copied().collect(),
            });
            for group in region.blocking_consumed_partition_groups() {
                consumer_views.entry(*group).or_default().add(region.index());
            }
        }

        Self {
            region_views,
            consumer_views,
        }
    }

    fn region_of(
        &self,
        topology: &dyn SchedulingTopology,
        vertex: &ExecutionVertexId,
    ) -> Result<(VertexIndex, RegionIndex), SluiceError> {
        let index = topology.vertex_index(vertex)?;
        let region = topology.region_index_of(index);
        if region.index() >= self.region_views.len() {
            return Err(SluiceError::UnknownVertex(*vertex));
        }
        Ok((index, region))
    }

    fn region_unfinished(&mut self, topology: &dyn SchedulingTopology, region: RegionIndex) {
        for group in topology.region_at(region).blocking_consumed_partition_groups() {
            if let Some(view) = self.consumer_views.get_mut(group) {
                view.region_unfinished(region);
            }
        }
    }
}

impl PartitionGroupReleaseStrategy for RegionPartitionGroupReleaseStrategy {
    fn vertex_finished(
        &mut self,
        topology: &dyn SchedulingTopology,
        vertex: &ExecutionVertexId,
    ) -> Result<Vec<GroupIndex>, SluiceError> {
        let (index, region) = self.region_of(topology, vertex)?;
        let view = &mut self.region_views[region.index()];
        view.unfinished.remove(&index);
        if !view.is_finished() {
            return Ok(Vec::new());
        }

        let consumed = topology.region_at(region).blocking_consumed_partition_groups();
        for group in consumed {
            if let Some(view) = self.consumer_views.get_mut(group) {
                view.region_finished(region);
            }
        }

        let releasable: Vec<GroupIndex> = consumed
            .iter()
            .copied()
            .filter(|group| {
                self.consumer_views
                    .get(group)
                    .is_some_and(ConsumerRegionGroupExecutionView::is_finished)
            })
            .collect();
        debug!(
            region = region.index(),
            releasable = releasable.len(),
            "Pipelined region finished"
        );
        Ok(releasable)
    }

    fn vertex_unfinished(
        &mut self,
        topology: &dyn SchedulingTopology,
        vertex: &ExecutionVertexId,
    ) -> Result<(), SluiceError> {
        let (index, region) = self.region_of(topology, vertex)?;
        self.region_views[region.index()].unfinished.insert(index);
        self.region_unfinished(topology, region);
        Ok(())
    }

    fn vertices_added(
        &mut self,
        topology: &dyn SchedulingTopology,
        sibling: &ExecutionVertexId,
        added: &[ExecutionVertexId],
    ) -> Result<(), SluiceError> {
        let (_, region) = self.region_of(topology, sibling)?;
        for vertex in added {
            let index = topology.vertex_index(vertex)?;
            self.region_views[region.index()].unfinished.insert(index);
        }
        if !added.is_empty() {
            self.region_unfinished(topology, region);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use sluice_core::{DistributionPattern, JobVertexId, ResultPartitionType};
    use sluice_graph::{ExecutionTopology, JobGraph, TopologyMutation};

    use super::*;

    /// producer(2) =ALL_TO_ALL/BLOCKING=> consumer(2): one group, two consumer regions.
    fn blocking_shuffle() -> (ExecutionTopology, JobVertexId, JobVertexId) {
        let mut graph = JobGraph::new("batch");
        let producer = graph.add_vertex("producer", 2);
        let consumer = graph.add_vertex("consumer", 2);
        graph
            .connect(
                producer,
                consumer,
                DistributionPattern::AllToAll,
                ResultPartitionType::Blocking,
            )
            .unwrap();
        let topology = ExecutionTopology::from_job_graph(graph).unwrap();
        (topology, producer, consumer)
    }

    fn id(job_vertex: JobVertexId, subtask: u32) -> ExecutionVertexId {
        ExecutionVertexId::new(job_vertex, subtask)
    }

    #[test]
    fn group_released_only_after_all_consumer_regions_finish() {
        let (topology, producer, consumer) = blocking_shuffle();
        let mut strategy = RegionPartitionGroupReleaseStrategy::new(&topology);

        // Producers finishing releases nothing: they consume no blocking data.
        assert!(strategy.vertex_finished(&topology, &id(producer, 0)).unwrap().is_empty());
        assert!(strategy.vertex_finished(&topology, &id(producer, 1)).unwrap().is_empty());

        assert!(strategy.vertex_finished(&topology, &id(consumer, 0)).unwrap().is_empty());
        let released = strategy.vertex_finished(&topology, &id(consumer, 1)).unwrap();
        assert_eq!(released.len(), 1);
        assert_eq!(
            released[0],
            topology.vertex(&id(consumer, 1)).unwrap().consumed_partition_groups()[0]
        );
    }

    #[test]
    fn finishing_twice_does_not_double_count() {
        let (topology, _, consumer) = blocking_shuffle();
        let mut strategy = RegionPartitionGroupReleaseStrategy::new(&topology);

        strategy.vertex_finished(&topology, &id(consumer, 0)).unwrap();
        strategy.vertex_finished(&topology, &id(consumer, 0)).unwrap();
        assert!(strategy.consumer_views.values().all(|v| v.unfinished.len() == 1));
    }

    #[test]
    fn unfinishing_retracts_eligibility() {
        let (topology, _, consumer) = blocking_shuffle();
        let mut strategy = RegionPartitionGroupReleaseStrategy::new(&topology);

        strategy.vertex_finished(&topology, &id(consumer, 0)).unwrap();
        strategy.vertex_unfinished(&topology, &id(consumer, 0)).unwrap();
        assert!(strategy.vertex_finished(&topology, &id(consumer, 1)).unwrap().is_empty());
        assert_eq!(strategy.vertex_finished(&topology, &id(consumer, 0)).unwrap().len(), 1);
    }

    #[test]
    fn added_vertices_keep_region_unfinished() {
        let (mut topology, _, consumer) = blocking_shuffle();
        let mut strategy = RegionPartitionGroupReleaseStrategy::new(&topology);
        let sibling = id(consumer, 1);

        strategy.vertex_finished(&topology, &id(consumer, 0)).unwrap();
        let added = topology.extend_region(&sibling, 1).unwrap();
        strategy.vertices_added(&topology, &sibling, &added).unwrap();

        assert!(strategy.vertex_finished(&topology, &sibling).unwrap().is_empty());
        assert_eq!(strategy.vertex_finished(&topology, &added[0]).unwrap().len(), 1);
    }

    #[test]
    fn unknown_vertex_is_an_error() {
        let (topology, _, _) = blocking_shuffle();
        let mut strategy = RegionPartitionGroupReleaseStrategy::new(&topology);
        let err = strategy
            .vertex_finished(&topology, &id(JobVertexId::new(), 0))
            .unwrap_err();
        assert!(err.is_invariant_violation());
    }
}
