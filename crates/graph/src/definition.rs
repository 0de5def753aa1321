//! TOML job definitions.
//!
//! ```toml
//! name = "etl"
//! default_parallelism = 2
//!
//! [[vertices]]
//! name = "source"
//! parallelism = 4
//!
//! [[vertices]]
//! name = "sink"
//! co_location_group = "io"
//!
//! [[edges]]
//! from = "source"
//! to = "sink"
//! pattern = "ALL_TO_ALL"
//! result = "BLOCKING"
//!
//! [states]
//! source = "RUNNING"
//! "sink:0" = "FINISHED"
//! ```

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use sluice_core::{
    DistributionPattern, ExecutionState, ExecutionVertexId, JobVertexId, ResultPartitionType,
    SluiceError,
};

use crate::job_graph::JobGraph;
use crate::topology::{ExecutionTopology, SchedulingTopology};

// ── File layout ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDefinition {
    pub name: String,

    /// Parallelism for vertices that do not set one.
    #[serde(default = "default_parallelism")]
    pub default_parallelism: u32,

    #[serde(default)]
    pub vertices: Vec<VertexDefinition>,

    #[serde(default)]
    pub edges: Vec<EdgeDefinition>,

    /// Task states keyed by `vertex` (every subtask) or `vertex:subtask`.
    #[serde(default)]
    pub states: BTreeMap<String, ExecutionState>,
}

fn default_parallelism() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VertexDefinition {
    pub name: String,
    pub parallelism: Option<u32>,
    pub co_location_group: Option<String>,
    pub snapshot_group: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeDefinition {
    pub from: String,
    pub to: String,
    #[serde(default = "default_pattern")]
    pub pattern: DistributionPattern,
    #[serde(default = "default_result")]
    pub result: ResultPartitionType,
}

fn default_pattern() -> DistributionPattern {
    DistributionPattern::AllToAll
}

fn default_result() -> ResultPartitionType {
    ResultPartitionType::Pipelined
}

/// A job graph together with the name → id mapping of its vertices.
#[derive(Debug, Clone)]
pub struct LoadedJob {
    pub graph: JobGraph,
    pub vertex_ids: HashMap<String, JobVertexId>,
    pub states: BTreeMap<String, ExecutionState>,
}

// ── Loading ───────────────────────────────────────────────────

impl JobDefinition {
    /// Parse a definition from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, SluiceError> {
        Self::from_toml_with(toml_str, |key| std::env::var(key).ok())
    }

    /// Parse with an explicit override lookup instead of the process environment.
    pub fn from_toml_with<F>(toml_str: &str, lookup: F) -> Result<Self, SluiceError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut definition: Self = toml::from_str(toml_str)
            .map_err(|e| SluiceError::InvalidJobGraph(format!("failed to parse job file: {e}")))?;
        definition.apply_env_overrides(lookup)?;
        definition.validate()?;
        Ok(definition)
    }

    /// Load a definition from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SluiceError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| SluiceError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Convention: `SLUICE_DEFAULT_PARALLELISM` overrides `default_parallelism`.
    fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), SluiceError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("SLUICE_DEFAULT_PARALLELISM").filter(|v| !v.is_empty()) {
            self.default_parallelism = v.parse().map_err(|_| {
                SluiceError::Config(format!("invalid value '{v}' for SLUICE_DEFAULT_PARALLELISM"))
            })?;
        }
        Ok(())
    }

    // ── Validation ────────────────────────────────────────────

    pub fn validate(&self) -> Result<(), SluiceError> {
        self.validate_vertex_names()?;
        self.validate_parallelism()?;
        self.validate_edge_references()?;
        self.validate_state_keys()?;
        Ok(())
    }

    fn validate_vertex_names(&self) -> Result<(), SluiceError> {
        let mut seen = HashSet::new();
        for vertex in &self.vertices {
            if vertex.name.is_empty() || vertex.name.contains(':') {
                return Err(SluiceError::InvalidJobGraph(format!(
                    "invalid vertex name '{}'",
                    vertex.name
                )));
            }
            if !seen.insert(vertex.name.as_str()) {
                return Err(SluiceError::InvalidJobGraph(format!(
                    "duplicate vertex '{}'",
                    vertex.name
                )));
            }
        }
        Ok(())
    }

    fn validate_parallelism(&self) -> Result<(), SluiceError> {
        for vertex in &self.vertices {
            if self.parallelism_of(vertex) == 0 {
                return Err(SluiceError::InvalidJobGraph(format!(
                    "vertex '{}' has parallelism 0",
                    vertex.name
                )));
            }
        }
        Ok(())
    }

    fn validate_edge_references(&self) -> Result<(), SluiceError> {
        for edge in &self.edges {
            for end in [&edge.from, &edge.to] {
                if self.vertex(end).is_none() {
                    return Err(SluiceError::InvalidJobGraph(format!(
                        "edge {} -> {} references unknown vertex '{end}'",
                        edge.from, edge.to
                    )));
                }
            }
        }
        Ok(())
    }

    fn validate_state_keys(&self) -> Result<(), SluiceError> {
        for key in self.states.keys() {
            let (name, subtask) = split_task_key(key)?;
            let Some(vertex) = self.vertex(name) else {
                return Err(SluiceError::InvalidJobGraph(format!(
                    "state for unknown vertex '{name}'"
                )));
            };
            if let Some(subtask) = subtask {
                if subtask >= self.parallelism_of(vertex) {
                    return Err(SluiceError::InvalidJobGraph(format!(
                        "state for '{key}' but '{name}' has parallelism {}",
                        self.parallelism_of(vertex)
                    )));
                }
            }
        }
        Ok(())
    }

    fn vertex(&self, name: &str) -> Option<&VertexDefinition> {
        self.vertices.iter().find(|v| v.name == name)
    }

    fn parallelism_of(&self, vertex: &VertexDefinition) -> u32 {
        vertex.parallelism.unwrap_or(self.default_parallelism)
    }

    // ── Conversion ────────────────────────────────────────────

    /// Build the job graph. Edges are connected in file order, which fixes
    /// the input order of every consumer.
    pub fn into_job_graph(self) -> Result<LoadedJob, SluiceError> {
        let mut graph = JobGraph::new(self.name.clone());
        let mut vertex_ids = HashMap::with_capacity(self.vertices.len());

        for vertex in &self.vertices {
            let id = graph.add_vertex(vertex.name.clone(), self.parallelism_of(vertex));
            if let Some(group) = &vertex.co_location_group {
                graph.set_co_location_group(id, group.clone())?;
            }
            if let Some(group) = &vertex.snapshot_group {
                graph.set_snapshot_group(id, group.clone())?;
            }
            vertex_ids.insert(vertex.name.clone(), id);
        }

        for edge in &self.edges {
            let from = lookup_vertex(&vertex_ids, &edge.from)?;
            let to = lookup_vertex(&vertex_ids, &edge.to)?;
            graph.connect(from, to, edge.pattern, edge.result)?;
        }

        Ok(LoadedJob {
            graph,
            vertex_ids,
            states: self.states,
        })
    }
}

impl LoadedJob {
    /// Resolve `vertex:subtask` into an execution vertex id.
    pub fn task_id(&self, key: &str) -> Result<ExecutionVertexId, SluiceError> {
        let (name, subtask) = split_task_key(key)?;
        let job_vertex = lookup_vertex(&self.vertex_ids, name)?;
        Ok(ExecutionVertexId::new(job_vertex, subtask.unwrap_or(0)))
    }

    /// Attach an attempt to every task named in `[states]` and move it to its
    /// configured state. Tasks without an entry stay CREATED.
    pub fn apply_states(&self, topology: &mut ExecutionTopology) -> Result<usize, SluiceError> {
        let mut applied = 0;
        for (key, state) in &self.states {
            let (name, subtask) = split_task_key(key)?;
            let job_vertex = lookup_vertex(&self.vertex_ids, name)?;
            let tasks: Vec<ExecutionVertexId> = match subtask {
                Some(subtask) => vec![ExecutionVertexId::new(job_vertex, subtask)],
                None => {
                    let parallelism = topology.job_vertex(&job_vertex)?.parallelism();
                    (0..parallelism)
                        .map(|i| ExecutionVertexId::new(job_vertex, i))
                        .collect()
                }
            };
            for task in tasks {
                if topology.vertex(&task)?.current_attempt().is_none() {
                    topology.attach_attempt(&task)?;
                }
                topology.transition(&task, *state)?;
                applied += 1;
            }
        }
        Ok(applied)
    }
}

fn lookup_vertex(
    ids: &HashMap<String, JobVertexId>,
    name: &str,
) -> Result<JobVertexId, SluiceError> {
    ids.get(name)
        .copied()
        .ok_or_else(|| SluiceError::InvalidJobGraph(format!("unknown vertex '{name}'")))
}

/// Split `name` or `name:subtask`.
fn split_task_key(key: &str) -> Result<(&str, Option<u32>), SluiceError> {
    match key.split_once(':') {
        None => Ok((key, None)),
        Some((name, index)) => index
            .parse()
            .map(|i| (name, Some(i)))
            .map_err(|_| SluiceError::InvalidJobGraph(format!("invalid subtask in '{key}'"))),
    }
}
