use std::collections::HashMap;
use std::time::Instant;

use sluice_core::{
    DistributionPattern, ExecutionVertexId, JobVertexId, ResultPartitionId, SluiceError,
};
use tracing::{debug, info};

use super::{
    ConsumedPartitionGroup, ConsumerGroupIndex, ConsumerVertexGroup, ExecutionJobVertex,
    ExecutionTopology, ExecutionVertex, GroupIndex, PartitionIndex, PipelinedRegion, RegionIndex,
    ResultPartition, VertexIndex,
};
use crate::job_graph::{JobEdge, JobGraph};
use crate::regions::{compute_regions, RegionEdge};

impl ExecutionTopology {
    /// Expand a job graph into its execution topology and pipelined regions.
    ///
    /// Fails when the graph is cyclic, has a zero parallelism, or places
    /// co-located subtasks in different regions.
    pub fn from_job_graph(job_graph: JobGraph) -> Result<Self, SluiceError> {
        let started = Instant::now();
        let order: Vec<JobVertexId> = job_graph
            .topologically_sorted()?
            .iter()
            .map(|vertex| vertex.id)
            .collect();

        let mut topology = Self {
            job_graph,
            job_vertices: Vec::with_capacity(order.len()),
            job_vertex_pos: HashMap::with_capacity(order.len()),
            vertices: Vec::new(),
            vertex_index: HashMap::new(),
            partitions: Vec::new(),
            partition_index: HashMap::new(),
            groups: Vec::new(),
            consumer_groups: Vec::new(),
            dataset_groups: HashMap::new(),
            regions: Vec::new(),
            region_of: Vec::new(),
        };

        for id in &order {
            topology.attach_job_vertex(id)?;
        }
        topology.compute_pipelined_regions();
        topology.ensure_co_located_vertices_in_same_region()?;

        info!(
            job = %topology.job_graph.name,
            job_vertices = topology.job_vertices.len(),
            vertices = topology.vertices.len(),
            partitions = topology.partitions.len(),
            regions = topology.regions.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Built execution topology"
        );
        Ok(topology)
    }

    // ── Vertices and wiring ───────────────────────────────────

    /// Create the subtasks of one job vertex, their produced partitions, and
    /// connect their inputs. Producers must already be attached.
    fn attach_job_vertex(&mut self, id: &JobVertexId) -> Result<(), SluiceError> {
        let job_vertex = self.job_graph.vertex(id)?.clone();
        let outputs: Vec<JobEdge> = self.job_graph.outputs_of(id).into_iter().cloned().collect();

        let mut tasks = Vec::with_capacity(job_vertex.parallelism as usize);
        for subtask in 0..job_vertex.parallelism {
            let vertex_id = ExecutionVertexId::new(job_vertex.id, subtask);
            let index = VertexIndex(self.vertices.len());
            self.vertices.push(ExecutionVertex::new(vertex_id));
            self.vertex_index.insert(vertex_id, index);
            tasks.push(index);

            for edge in &outputs {
                self.add_partition(index, edge, subtask);
            }
        }

        for edge in &job_vertex.inputs {
            self.connect_input(edge, &tasks)?;
        }

        debug!(
            vertex = %job_vertex.name,
            parallelism = job_vertex.parallelism,
            inputs = job_vertex.inputs.len(),
            "Attached job vertex"
        );

        self.job_vertex_pos.insert(job_vertex.id, self.job_vertices.len());
        self.job_vertices.push(ExecutionJobVertex {
            id: job_vertex.id,
            name: job_vertex.name,
            parallelism: job_vertex.parallelism,
            tasks,
            inputs: job_vertex.inputs,
            co_location_group: job_vertex.co_location_group,
            snapshot_group: job_vertex.snapshot_group,
        });
        Ok(())
    }

    pub(super) fn add_partition(
        &mut self,
        producer: VertexIndex,
        edge: &JobEdge,
        partition_num: u32,
    ) -> PartitionIndex {
        let id = ResultPartitionId::new(edge.source, partition_num);
        let index = PartitionIndex(self.partitions.len());
        self.partitions.push(ResultPartition {
            id,
            result_type: edge.result_type,
            producer,
            consumer_groups: Vec::new(),
        });
        self.partition_index.insert(id, index);
        self.vertices[producer.index()].produced_partitions.push(index);
        index
    }

    /// Wire one input edge into `consumers`.
    ///
    /// ALL_TO_ALL edges share a single group between every consumer. POINTWISE
    /// edges follow range wiring: with more producers than consumers each
    /// consumer reads a contiguous range of partitions, with fewer each
    /// partition feeds a contiguous range of consumers.
    fn connect_input(&mut self, edge: &JobEdge, consumers: &[VertexIndex]) -> Result<(), SluiceError> {
        let producer = self.job_vertex(&edge.producer)?;
        let partitions: Vec<PartitionIndex> = producer
            .tasks
            .iter()
            .filter_map(|&task| {
                self.vertices[task.index()]
                    .produced_partitions
                    .iter()
                    .copied()
                    .find(|&p| self.partitions[p.index()].id.dataset_id == edge.source)
            })
            .collect();
        if partitions.len() != producer.tasks.len() {
            return Err(SluiceError::InvalidJobGraph(format!(
                "dataset {} is missing partitions of producer '{}'",
                edge.source, producer.name
            )));
        }

        match edge.distribution_pattern {
            DistributionPattern::AllToAll => {
                self.add_group(edge, partitions, consumers.to_vec());
            }
            DistributionPattern::Pointwise => {
                let (sources, targets) = (partitions.len(), consumers.len());
                if sources == targets {
                    for (&partition, &consumer) in partitions.iter().zip(consumers) {
                        self.add_group(edge, vec![partition], vec![consumer]);
                    }
                } else if sources > targets {
                    for (i, &consumer) in consumers.iter().enumerate() {
                        let start = i * sources / targets;
                        let end = (i + 1) * sources / targets;
                        self.add_group(edge, partitions[start..end].to_vec(), vec![consumer]);
                    }
                } else {
                    for (p, &partition) in partitions.iter().enumerate() {
                        let start = (p * targets + sources - 1) / sources;
                        let end = ((p + 1) * targets + sources - 1) / sources;
                        self.add_group(edge, vec![partition], consumers[start..end].to_vec());
                    }
                }
            }
        }
        Ok(())
    }

    fn add_group(
        &mut self,
        edge: &JobEdge,
        partitions: Vec<PartitionIndex>,
        consumers: Vec<VertexIndex>,
    ) -> GroupIndex {
        let group = GroupIndex(self.groups.len());
        let consumer_group = ConsumerGroupIndex(self.consumer_groups.len());

        for partition in &partitions {
            self.partitions[partition.index()].consumer_groups.push(consumer_group);
        }
        for consumer in &consumers {
            self.vertices[consumer.index()].consumed_groups.push(group);
        }

        self.groups.push(ConsumedPartitionGroup {
            dataset_id: edge.source,
            result_type: edge.result_type,
            distribution_pattern: edge.distribution_pattern,
            partitions,
            consumer_group,
        });
        self.consumer_groups.push(ConsumerVertexGroup {
            vertices: consumers,
            partition_group: group,
        });
        self.dataset_groups.entry(edge.source).or_default().push(group);
        group
    }

    // ── Pipelined regions ─────────────────────────────────────

    /// Logical regions first; a logical region with an internal ALL_TO_ALL
    /// edge becomes a single scheduling region, any other is split further
    /// along its execution-level edges.
    fn compute_pipelined_regions(&mut self) {
        let logical_edges: Vec<RegionEdge> = self
            .job_vertices
            .iter()
            .enumerate()
            .flat_map(|(consumer, job_vertex)| {
                job_vertex.inputs.iter().map(move |edge| (consumer, edge))
            })
            .map(|(consumer, edge)| RegionEdge {
                producer: self.job_vertex_pos[&edge.producer],
                consumer,
                pipelined: edge.result_type.is_pipelined(),
            })
            .collect();

        let mut raw_regions: Vec<Vec<VertexIndex>> = Vec::new();
        for logical in compute_regions(self.job_vertices.len(), &logical_edges) {
            let tasks: Vec<VertexIndex> = logical
                .iter()
                .flat_map(|&pos| self.job_vertices[pos].tasks.iter().copied())
                .collect();

            if self.has_internal_all_to_all(&logical) {
                raw_regions.push(tasks);
                continue;
            }

            let local: HashMap<VertexIndex, usize> =
                tasks.iter().enumerate().map(|(i, &v)| (v, i)).collect();
            let mut edges = Vec::new();
            for (consumer, &task) in tasks.iter().enumerate() {
                for &group in &self.vertices[task.index()].consumed_groups {
                    let group = &self.groups[group.index()];
                    for partition in &group.partitions {
                        let producer = self.partitions[partition.index()].producer;
                        if let Some(&producer) = local.get(&producer) {
                            edges.push(RegionEdge {
                                producer,
                                consumer,
                                pipelined: group.result_type.is_pipelined(),
                            });
                        }
                    }
                }
            }
            for region in compute_regions(tasks.len(), &edges) {
                raw_regions.push(region.into_iter().map(|i| tasks[i]).collect());
            }
        }

        raw_regions.sort_by_key(|members| members.iter().min().copied());
        let mut region_of = vec![RegionIndex(0); self.vertices.len()];
        let mut regions = Vec::with_capacity(raw_regions.len());
        for (i, mut vertices) in raw_regions.into_iter().enumerate() {
            vertices.sort_unstable();
            let index = RegionIndex(i);
            for vertex in &vertices {
                region_of[vertex.index()] = index;
            }
            regions.push(PipelinedRegion {
                index,
                blocking_consumed_groups: self.blocking_groups_of(&vertices),
                vertices,
            });
        }
        self.region_of = region_of;
        self.regions = regions;
    }

    fn has_internal_all_to_all(&self, logical: &[usize]) -> bool {
        logical.iter().any(|&pos| {
            self.job_vertices[pos].inputs.iter().any(|edge| {
                edge.distribution_pattern == DistributionPattern::AllToAll
                    && logical.contains(&self.job_vertex_pos[&edge.producer])
            })
        })
    }

    pub(super) fn blocking_groups_of(&self, vertices: &[VertexIndex]) -> Vec<GroupIndex> {
        let mut groups: Vec<GroupIndex> = vertices
            .iter()
            .flat_map(|v| self.vertices[v.index()].consumed_groups.iter().copied())
            .filter(|g| self.groups[g.index()].result_type.is_blocking())
            .collect();
        groups.sort_unstable();
        groups.dedup();
        groups
    }

    /// Subtask `i` of every vertex in a co-location group must share a region.
    fn ensure_co_located_vertices_in_same_region(&self) -> Result<(), SluiceError> {
        let mut seen: HashMap<(&str, usize), RegionIndex> = HashMap::new();
        for job_vertex in &self.job_vertices {
            let Some(group) = job_vertex.co_location_group.as_deref() else {
                continue;
            };
            for (subtask, task) in job_vertex.tasks.iter().enumerate() {
                let region = self.region_of[task.index()];
                match seen.get(&(group, subtask)) {
                    Some(&existing) if existing != region => {
                        return Err(SluiceError::CoLocationViolation(format!(
                            "subtask {subtask} of co-location group '{group}' spans regions {} and {}",
                            existing.index(),
                            region.index()
                        )));
                    }
                    Some(_) => {}
                    None => {
                        seen.insert((group, subtask), region);
                    }
                }
            }
        }
        Ok(())
    }
}
