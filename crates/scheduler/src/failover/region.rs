use std::collections::{BTreeSet, HashSet, VecDeque};

use sluice_core::{ExecutionState, ExecutionVertexId, ResultPartitionId, SluiceError};
use sluice_graph::{ConsumerGroupIndex, GroupIndex, RegionIndex, SchedulingTopology};
use tracing::{debug, info};

use super::{FailoverStrategy, FailureCause, PartitionAvailabilityChecker};

/// Restarts the failed task's pipelined region plus every region needed to
/// make it consistent again: producers of lost inputs and all consumers.
#[derive(Debug, Default)]
pub struct RestartPipelinedRegionFailoverStrategy {
    /// Partitions reported lost by the failure being handled.
    failed_partitions: HashSet<ResultPartitionId>,
}

impl RestartPipelinedRegionFailoverStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    fn is_available(
        &self,
        availability: &dyn PartitionAvailabilityChecker,
        partition: &ResultPartitionId,
    ) -> bool {
        !self.failed_partitions.contains(partition) && availability.is_available(partition)
    }

    /// Breadth-first fixpoint over regions. Each region, consumed group and
    /// consumer vertex group is expanded at most once.
    fn regions_to_restart(
        &self,
        topology: &dyn SchedulingTopology,
        availability: &dyn PartitionAvailabilityChecker,
        failed_region: RegionIndex,
    ) -> Vec<RegionIndex> {
        let mut visited_regions = vec![false; topology.regions().len()];
        let mut visited_groups: HashSet<GroupIndex> = HashSet::new();
        let mut visited_consumers: HashSet<ConsumerGroupIndex> = HashSet::new();
        let mut to_restart = Vec::new();

        let mut queue = VecDeque::from([failed_region]);
        visited_regions[failed_region.index()] = true;

        while let Some(region) = queue.pop_front() {
            to_restart.push(region);
            let vertices = topology.region_at(region).vertices();

            // Producers of unavailable inputs have to run again.
            for &vertex in vertices {
                for &group in topology.vertex_at(vertex).consumed_partition_groups() {
                    if !visited_groups.insert(group) {
                        continue;
                    }
                    for &partition in topology.partition_group(group).partitions() {
                        let partition = topology.partition_at(partition);
                        if self.is_available(availability, &partition.id()) {
                            continue;
                        }
                        let producer_region = topology.region_index_of(partition.producer());
                        if !visited_regions[producer_region.index()] {
                            visited_regions[producer_region.index()] = true;
                            queue.push_back(producer_region);
                        }
                    }
                }
            }

            // Consumers of anything this region produces will see new data.
            for &vertex in vertices {
                for &partition in topology.vertex_at(vertex).produced_partitions() {
                    for &consumers in topology.partition_at(partition).consumer_vertex_groups() {
                        if !visited_consumers.insert(consumers) {
                            continue;
                        }
                        for &consumer in topology.consumer_vertex_group(consumers).vertices() {
                            let consumer_region = topology.region_index_of(consumer);
                            if !visited_regions[consumer_region.index()] {
                                visited_regions[consumer_region.index()] = true;
                                queue.push_back(consumer_region);
                            }
                        }
                    }
                }
            }
        }

        to_restart
    }
}

impl FailoverStrategy for RestartPipelinedRegionFailoverStrategy {
    fn tasks_to_restart(
        &mut self,
        topology: &dyn SchedulingTopology,
        availability: &dyn PartitionAvailabilityChecker,
        failed: &ExecutionVertexId,
        cause: &FailureCause,
    ) -> Result<BTreeSet<ExecutionVertexId>, SluiceError> {
        info!(failed = %failed, "Calculating tasks to restart");
        let failed_region = topology.region_index_of(topology.vertex_index(failed)?);

        let lost = cause.failed_partition().copied();
        if let Some(partition) = lost {
            topology.partition_index(&partition)?;
            self.failed_partitions.insert(partition);
        }

        let regions = self.regions_to_restart(topology, availability, failed_region);
        let restart: BTreeSet<ExecutionVertexId> = regions
            .iter()
            .flat_map(|&region| topology.region_at(region).vertices().iter())
            .map(|&v| topology.vertex_at(v))
            .filter(|v| v.state() != ExecutionState::Created)
            .map(|v| v.id())
            .collect();

        if let Some(partition) = lost {
            self.failed_partitions.remove(&partition);
        }

        debug!(regions = regions.len(), "Collected failover regions");
        info!(
            failed = %failed,
            tasks = restart.len(),
            "Tasks to restart to recover the failed task"
        );
        Ok(restart)
    }
}
