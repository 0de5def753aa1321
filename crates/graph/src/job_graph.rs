use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use sluice_core::{
    DistributionPattern, IntermediateDataSetId, JobVertexId, ResultPartitionType, SluiceError,
};

/// A logical operator with a fixed parallelism.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobVertex {
    pub id: JobVertexId,
    pub name: String,
    pub parallelism: u32,
    /// Inbound edges, in the order their partition groups are wired.
    pub inputs: Vec<JobEdge>,
    /// Datasets this vertex produces, one per outbound edge.
    pub produced_data_sets: Vec<IntermediateDataSetId>,
    /// Vertices sharing a group must keep subtask `i` in the same region.
    pub co_location_group: Option<String>,
    /// Checkpoint scope this vertex participates in.
    pub snapshot_group: Option<String>,
}

impl JobVertex {
    /// Vertices without inputs receive checkpoint barriers directly.
    pub fn is_input_vertex(&self) -> bool {
        self.inputs.is_empty()
    }
}

/// A connection from the dataset of `producer` into `target`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEdge {
    pub source: IntermediateDataSetId,
    pub producer: JobVertexId,
    pub target: JobVertexId,
    pub distribution_pattern: DistributionPattern,
    pub result_type: ResultPartitionType,
}

/// The immutable logical job graph that an execution topology is built from.
///
/// Every call to [`JobGraph::connect`] creates a fresh dataset, so each
/// dataset is consumed through exactly one edge.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobGraph {
    pub name: String,
    vertices: Vec<JobVertex>,
    #[serde(skip)]
    by_id: HashMap<JobVertexId, usize>,
}

impl JobGraph {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            vertices: Vec::new(),
            by_id: HashMap::new(),
        }
    }

    /// Add an operator and return its id.
    pub fn add_vertex(&mut self, name: impl Into<String>, parallelism: u32) -> JobVertexId {
        let id = JobVertexId::new();
        self.by_id.insert(id, self.vertices.len());
        self.vertices.push(JobVertex {
            id,
            name: name.into(),
            parallelism,
            inputs: Vec::new(),
            produced_data_sets: Vec::new(),
            co_location_group: None,
            snapshot_group: None,
        });
        id
    }

    /// Wire `producer` into `consumer` through a new dataset.
    pub fn connect(
        &mut self,
        producer: JobVertexId,
        consumer: JobVertexId,
        distribution_pattern: DistributionPattern,
        result_type: ResultPartitionType,
    ) -> Result<IntermediateDataSetId, SluiceError> {
        if producer == consumer {
            return Err(SluiceError::InvalidJobGraph(format!(
                "vertex {producer} cannot consume its own output"
            )));
        }
        let producer_pos = self.position(&producer)?;
        let consumer_pos = self.position(&consumer)?;

        let dataset = IntermediateDataSetId::new();
        self.vertices[producer_pos].produced_data_sets.push(dataset);
        self.vertices[consumer_pos].inputs.push(JobEdge {
            source: dataset,
            producer,
            target: consumer,
            distribution_pattern,
            result_type,
        });
        Ok(dataset)
    }

    pub fn set_co_location_group(
        &mut self,
        vertex: JobVertexId,
        group: impl Into<String>,
    ) -> Result<(), SluiceError> {
        let pos = self.position(&vertex)?;
        self.vertices[pos].co_location_group = Some(group.into());
        Ok(())
    }

    pub fn set_snapshot_group(
        &mut self,
        vertex: JobVertexId,
        group: impl Into<String>,
    ) -> Result<(), SluiceError> {
        let pos = self.position(&vertex)?;
        self.vertices[pos].snapshot_group = Some(group.into());
        Ok(())
    }

    pub(crate) fn set_parallelism(
        &mut self,
        vertex: JobVertexId,
        parallelism: u32,
    ) -> Result<(), SluiceError> {
        let pos = self.position(&vertex)?;
        self.vertices[pos].parallelism = parallelism;
        Ok(())
    }

    pub fn vertex(&self, id: &JobVertexId) -> Result<&JobVertex, SluiceError> {
        self.position(id).map(|pos| &self.vertices[pos])
    }

    /// Vertices in insertion order.
    pub fn vertices(&self) -> &[JobVertex] {
        &self.vertices
    }

    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// Vertex names are looked up linearly; they are only used by tooling.
    pub fn find_by_name(&self, name: &str) -> Option<&JobVertex> {
        self.vertices.iter().find(|v| v.name == name)
    }

    /// Edges leaving `id`, in dataset order.
    pub fn outputs_of(&self, id: &JobVertexId) -> Vec<&JobEdge> {
        self.vertices
            .iter()
            .flat_map(|v| v.inputs.iter())
            .filter(|edge| edge.producer == *id)
            .collect()
    }

    /// Topological sort using Kahn's algorithm.
    ///
    /// Ties are broken by insertion order so the result is deterministic.
    pub fn topologically_sorted(&self) -> Result<Vec<&JobVertex>, SluiceError> {
        self.validate()?;

        let mut in_degree: Vec<usize> = self.vertices.iter().map(|v| v.inputs.len()).collect();
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); self.vertices.len()];
        for (pos, vertex) in self.vertices.iter().enumerate() {
            for edge in &vertex.inputs {
                dependents[self.by_id[&edge.producer]].push(pos);
            }
        }

        let mut queue: VecDeque<usize> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, &deg)| deg == 0)
            .map(|(pos, _)| pos)
            .collect();

        let mut sorted = Vec::with_capacity(self.vertices.len());
        while let Some(pos) = queue.pop_front() {
            sorted.push(&self.vertices[pos]);
            for &dep in &dependents[pos] {
                in_degree[dep] -= 1;
                if in_degree[dep] == 0 {
                    queue.push_back(dep);
                }
            }
        }

        if sorted.len() != self.vertices.len() {
            let in_cycle: Vec<&str> = in_degree
                .iter()
                .enumerate()
                .filter(|(_, &deg)| deg > 0)
                .map(|(pos, _)| self.vertices[pos].name.as_str())
                .collect();
            return Err(SluiceError::InvalidJobGraph(format!(
                "cycle detected among vertices: {}",
                in_cycle.join(" -> ")
            )));
        }

        Ok(sorted)
    }

    /// True if `vertex` is reachable from `upstream` through one or more edges.
    pub fn is_downstream_of(&self, vertex: &JobVertexId, upstream: &JobVertexId) -> bool {
        self.reachable_from(std::iter::once(*upstream)).contains(vertex)
    }

    /// True if `vertex` lies outside `group` but is reachable from a member of it.
    pub fn is_downstream_of_snapshot_group(&self, vertex: &JobVertexId, group: &str) -> bool {
        let members: Vec<JobVertexId> = self
            .vertices
            .iter()
            .filter(|v| v.snapshot_group.as_deref() == Some(group))
            .map(|v| v.id)
            .collect();
        if members.contains(vertex) {
            return false;
        }
        self.reachable_from(members.into_iter()).contains(vertex)
    }

    /// True if `vertex` lies outside `group` and feeds a member of it directly.
    pub fn is_direct_upstream_of_snapshot_group(&self, vertex: &JobVertexId, group: &str) -> bool {
        let Ok(source) = self.vertex(vertex) else {
            return false;
        };
        if source.snapshot_group.as_deref() == Some(group) {
            return false;
        }
        self.vertices.iter().any(|v| {
            v.snapshot_group.as_deref() == Some(group)
                && v.inputs.iter().any(|edge| edge.producer == *vertex)
        })
    }

    fn reachable_from(&self, starts: impl Iterator<Item = JobVertexId>) -> HashSet<JobVertexId> {
        let mut consumers: HashMap<JobVertexId, Vec<JobVertexId>> = HashMap::new();
        for vertex in &self.vertices {
            for edge in &vertex.inputs {
                consumers.entry(edge.producer).or_default().push(vertex.id);
            }
        }

        let mut seen = HashSet::new();
        let mut queue: VecDeque<JobVertexId> = starts.collect();
        while let Some(current) = queue.pop_front() {
            for next in consumers.get(&current).into_iter().flatten() {
                if seen.insert(*next) {
                    queue.push_back(*next);
                }
            }
        }
        seen
    }

    fn position(&self, id: &JobVertexId) -> Result<usize, SluiceError> {
        self.by_id
            .get(id)
            .copied()
            .ok_or(SluiceError::UnknownJobVertex(*id))
    }

    /// Rebuild the id index after deserialization.
    pub fn reindex(&mut self) {
        self.by_id = self
            .vertices
            .iter()
            .enumerate()
            .map(|(pos, v)| (v.id, pos))
            .collect();
    }

    fn validate(&self) -> Result<(), SluiceError> {
        for vertex in &self.vertices {
            if vertex.parallelism == 0 {
                return Err(SluiceError::InvalidJobGraph(format!(
                    "vertex '{}' has parallelism 0",
                    vertex.name
                )));
            }
            for edge in &vertex.inputs {
                if !self.by_id.contains_key(&edge.producer) {
                    return Err(SluiceError::InvalidJobGraph(format!(
                        "vertex '{}' consumes from unknown vertex {}",
                        vertex.name, edge.producer
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain() -> (JobGraph, JobVertexId, JobVertexId, JobVertexId) {
        let mut graph = JobGraph::new("chain");
        let a = graph.add_vertex("a", 2);
        let b = graph.add_vertex("b", 2);
        let c = graph.add_vertex("c", 1);
        graph
            .connect(a, b, DistributionPattern::AllToAll, ResultPartitionType::Pipelined)
            .unwrap();
        graph
            .connect(b, c, DistributionPattern::Pointwise, ResultPartitionType::Blocking)
            .unwrap();
        (graph, a, b, c)
    }

    #[test]
    fn sorts_upstream_first() {
        let mut graph = JobGraph::new("diamond");
        let sink = graph.add_vertex("sink", 1);
        let left = graph.add_vertex("left", 1);
        let src = graph.add_vertex("src", 1);
        let right = graph.add_vertex("right", 1);
        for (from, to) in [(src, left), (src, right), (left, sink), (right, sink)] {
            graph
                .connect(from, to, DistributionPattern::Pointwise, ResultPartitionType::Pipelined)
                .unwrap();
        }

        let order: Vec<&str> = graph
            .topologically_sorted()
            .unwrap()
            .iter()
            .map(|v| v.name.as_str())
            .collect();
        assert_eq!(order, vec!["src", "left", "right", "sink"]);
    }

    #[test]
    fn detects_cycles() {
        let mut graph = JobGraph::new("loop");
        let a = graph.add_vertex("a", 1);
        let b = graph.add_vertex("b", 1);
        graph
            .connect(a, b, DistributionPattern::Pointwise, ResultPartitionType::Pipelined)
            .unwrap();
        graph
            .connect(b, a, DistributionPattern::Pointwise, ResultPartitionType::Pipelined)
            .unwrap();

        let err = graph.topologically_sorted().unwrap_err();
        assert!(matches!(err, SluiceError::InvalidJobGraph(msg) if msg.contains("cycle")));
    }

    #[test]
    fn rejects_self_loops_and_zero_parallelism() {
        let mut graph = JobGraph::new("bad");
        let a = graph.add_vertex("a", 0);
        assert!(graph
            .connect(a, a, DistributionPattern::Pointwise, ResultPartitionType::Pipelined)
            .is_err());
        assert!(graph.topologically_sorted().is_err());
    }

    #[test]
    fn downstream_reachability() {
        let (graph, a, b, c) = chain();
        assert!(graph.is_downstream_of(&c, &a));
        assert!(graph.is_downstream_of(&b, &a));
        assert!(!graph.is_downstream_of(&a, &c));
        assert!(!graph.is_downstream_of(&a, &a));
    }

    #[test]
    fn snapshot_group_neighbourhood() {
        let (mut graph, a, b, c) = chain();
        graph.set_snapshot_group(b, "g1").unwrap();

        assert!(graph.is_direct_upstream_of_snapshot_group(&a, "g1"));
        assert!(!graph.is_direct_upstream_of_snapshot_group(&b, "g1"));
        assert!(graph.is_downstream_of_snapshot_group(&c, "g1"));
        assert!(!graph.is_downstream_of_snapshot_group(&b, "g1"));
        assert!(!graph.is_downstream_of_snapshot_group(&a, "g1"));
    }

    #[test]
    fn serde_round_trip_keeps_lookups_after_reindex() {
        let (graph, a, _, _) = chain();
        let json = serde_json::to_string(&graph).unwrap();
        let mut restored: JobGraph = serde_json::from_str(&json).unwrap();
        assert!(restored.vertex(&a).is_err());
        restored.reindex();
        assert_eq!(restored.vertex(&a).unwrap().name, "a");
    }
}
