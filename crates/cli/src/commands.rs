//! Subcommand implementations. Each returns a serializable report.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Serialize;
use sluice_core::{Config, ExecutionVertexId, JobVertexId, ResultPartitionId};
use sluice_graph::{ExecutionTopology, JobDefinition, LoadedJob, SchedulingTopology};
use sluice_scheduler::{CheckpointPlan, FailureCause, JobControl, PlanScope};
use tracing::info;

// ── Reports ───────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct RegionReport {
    pub index: usize,
    pub tasks: Vec<String>,
    pub blocking_inputs: usize,
}

#[derive(Debug, Serialize)]
pub struct RegionsReport {
    pub job: String,
    pub tasks: usize,
    pub regions: Vec<RegionReport>,
}

#[derive(Debug, Serialize)]
pub struct PlanReport {
    pub job: String,
    pub scope: String,
    pub trigger: Vec<String>,
    pub wait_for: Vec<String>,
    pub commit_to: Vec<String>,
    pub finished: Vec<String>,
    pub fully_finished: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct FailoverReport {
    pub job: String,
    pub failed: String,
    pub cause: String,
    pub restart: Vec<String>,
}

// ── Job loading ───────────────────────────────────────────────

/// A job file expanded into its topology, with `[states]` applied.
struct Job {
    loaded: LoadedJob,
    topology: ExecutionTopology,
    names: HashMap<JobVertexId, String>,
}

impl Job {
    fn load(path: &Path) -> Result<Self> {
        let definition = JobDefinition::from_file(path)
            .with_context(|| format!("failed to load job file {}", path.display()))?;
        let loaded = definition
            .into_job_graph()
            .context("failed to build job graph")?;
        let mut topology = ExecutionTopology::from_job_graph(loaded.graph.clone())
            .context("failed to build execution topology")?;
        let applied = loaded
            .apply_states(&mut topology)
            .context("failed to apply task states")?;
        info!(job = %loaded.graph.name, applied, "Loaded job");

        let names = loaded
            .vertex_ids
            .iter()
            .map(|(name, id)| (*id, name.clone()))
            .collect();
        Ok(Self {
            loaded,
            topology,
            names,
        })
    }

    fn name(&self) -> String {
        self.loaded.graph.name.clone()
    }

    /// Render a task the way job files name it.
    fn task_key(&self, id: &ExecutionVertexId) -> String {
        match self.names.get(&id.job_vertex_id) {
            Some(name) => format!("{name}:{}", id.subtask_index),
            None => id.to_string(),
        }
    }

    fn task_keys<'a>(&self, ids: impl IntoIterator<Item = &'a ExecutionVertexId>) -> Vec<String> {
        ids.into_iter().map(|id| self.task_key(id)).collect()
    }

    /// Parse `PRODUCER:SUBTASK[:OUTPUT]`, where OUTPUT picks the producer's
    /// outbound edge in file order.
    fn partition_id(&self, key: &str) -> Result<ResultPartitionId> {
        let parts: Vec<&str> = key.split(':').collect();
        let (producer, subtask, output) = match parts.as_slice() {
            [producer, subtask] => (*producer, *subtask, "0"),
            [producer, subtask, output] => (*producer, *subtask, *output),
            _ => bail!("invalid partition '{key}', expected PRODUCER:SUBTASK[:OUTPUT]"),
        };
        let subtask: u32 = subtask
            .parse()
            .with_context(|| format!("invalid subtask in '{key}'"))?;
        let output: usize = output
            .parse()
            .with_context(|| format!("invalid output index in '{key}'"))?;

        let vertex_id = self
            .loaded
            .vertex_ids
            .get(producer)
            .with_context(|| format!("unknown vertex '{producer}'"))?;
        let vertex = self.loaded.graph.vertex(vertex_id)?;
        let Some(dataset) = vertex.produced_data_sets.get(output) else {
            bail!("'{producer}' has {} outputs, no output {output}", vertex.produced_data_sets.len());
        };
        Ok(ResultPartitionId::new(*dataset, subtask))
    }
}

// ── Commands ──────────────────────────────────────────────────

pub fn regions(path: &Path) -> Result<RegionsReport> {
    let job = Job::load(path)?;
    let regions = job
        .topology
        .regions()
        .iter()
        .map(|region| RegionReport {
            index: region.index().index(),
            tasks: job.task_keys(&job.topology.region_vertex_ids(region.index())),
            blocking_inputs: region.blocking_consumed_partition_groups().len(),
        })
        .collect();
    Ok(RegionsReport {
        job: job.name(),
        tasks: job.topology.vertex_count(),
        regions,
    })
}

pub async fn plan(path: &Path, scope_group: Option<String>, config: &Config) -> Result<PlanReport> {
    let job = Job::load(path)?;
    let scope = scope_group.map(PlanScope::SnapshotGroup).unwrap_or_default();
    let control = JobControl::new(job.topology.clone(), config);

    let plan: CheckpointPlan = control
        .calculate_checkpoint_plan(scope.clone())
        .await
        .with_context(|| format!("checkpoint plan for {scope} aborted"))?;
    control.shutdown().await?;

    Ok(PlanReport {
        job: job.name(),
        scope: scope.to_string(),
        trigger: job.task_keys(plan.tasks_to_trigger().iter().map(|t| &t.vertex)),
        wait_for: job.task_keys(plan.tasks_to_wait_for().iter().map(|t| &t.vertex)),
        commit_to: job.task_keys(plan.tasks_to_commit_to()),
        finished: job.task_keys(plan.finished_tasks().iter().map(|t| &t.vertex)),
        fully_finished: plan
            .fully_finished_job_vertices()
            .iter()
            .map(|id| job.names.get(id).cloned().unwrap_or_else(|| id.to_string()))
            .collect(),
    })
}

pub async fn failover(
    path: &Path,
    vertex: &str,
    lost_partition: Option<&str>,
    config: &Config,
) -> Result<FailoverReport> {
    let job = Job::load(path)?;
    let failed = job
        .loaded
        .task_id(vertex)
        .with_context(|| format!("invalid task '{vertex}'"))?;
    let cause = match lost_partition {
        Some(key) => FailureCause::PartitionConsumption {
            partition: job.partition_id(key)?,
            message: "reported on the command line".to_string(),
        },
        None => FailureCause::Task("reported on the command line".to_string()),
    };
    let cause_text = cause.to_string();

    let control = JobControl::new(job.topology.clone(), config);
    let restart = control
        .handle_failure(failed, cause)
        .await
        .context("failover computation failed")?;
    control.shutdown().await?;

    let mut restart = job.task_keys(&restart);
    restart.sort();
    Ok(FailoverReport {
        job: job.name(),
        failed: job.task_key(&failed),
        cause: cause_text,
        restart,
    })
}
