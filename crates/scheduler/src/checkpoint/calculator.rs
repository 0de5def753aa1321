use std::time::Instant;

use sluice_core::config::CheckpointConfig;
use sluice_core::{DistributionPattern, ExecutionState};
use sluice_graph::{ExecutionTopology, JobEdge, SchedulingTopology, VertexIndex};
use tracing::{debug, warn};

use super::failure::{CheckpointError, CheckpointFailureReason};
use super::plan::{CheckpointPlan, TaskAttemptRef};
use super::scope::PlanScope;
use super::status::RunningStatus;

/// Job vertices a scope covers, by position in topological order.
struct ScopeTargets {
    /// Tasks that acknowledge and get committed to.
    waited: Vec<bool>,
    /// Tasks that receive the barrier when everything is running.
    triggered: Vec<bool>,
}

/// Computes which tasks a checkpoint attempt triggers, waits for and commits to.
#[derive(Debug, Clone, Copy)]
pub struct CheckpointPlanCalculator {
    allow_checkpoints_after_tasks_finished: bool,
}

impl CheckpointPlanCalculator {
    pub fn new(allow_checkpoints_after_tasks_finished: bool) -> Self {
        Self {
            allow_checkpoints_after_tasks_finished,
        }
    }

    pub fn from_config(config: &CheckpointConfig) -> Self {
        Self::new(config.allow_checkpoints_after_tasks_finished)
    }

    /// Plan one checkpoint attempt over the current attempt states.
    ///
    /// Fails without a partial plan when a required task is not running.
    pub fn calculate(
        &self,
        topology: &ExecutionTopology,
        scope: &PlanScope,
    ) -> Result<CheckpointPlan, CheckpointError> {
        let started = Instant::now();
        let result = self.plan(topology, scope);
        match &result {
            Ok(plan) => debug!(
                scope = %scope,
                trigger = plan.tasks_to_trigger().len(),
                wait_for = plan.tasks_to_wait_for().len(),
                finished = plan.finished_tasks().len(),
                elapsed_us = started.elapsed().as_micros() as u64,
                "Calculated checkpoint plan"
            ),
            Err(e) => warn!(scope = %scope, reason = ?e.reason, "Checkpoint plan aborted: {}", e.message),
        }
        result
    }

    fn plan(
        &self,
        topology: &ExecutionTopology,
        scope: &PlanScope,
    ) -> Result<CheckpointPlan, CheckpointError> {
        let targets = resolve_scope(topology, scope)?;

        let has_finished_tasks = match scope {
            PlanScope::SnapshotGroup(group) => {
                has_finished_task(topology, |pos| {
                    topology.job_vertices()[pos].snapshot_group() == Some(group.as_str())
                })
            }
            PlanScope::Job | PlanScope::Rescale { .. } => has_finished_task(topology, |_| true),
        };
        if has_finished_tasks && !self.allow_checkpoints_after_tasks_finished {
            return Err(CheckpointError::not_all_running(
                "some tasks of the job have already finished and checkpointing with finished tasks is not enabled",
            ));
        }

        check_all_tasks_initiated(topology)?;

        let plan = match (has_finished_tasks, scope) {
            (false, _) => self.with_all_tasks_running(topology, &targets)?,
            (true, PlanScope::SnapshotGroup(_)) => {
                self.after_tasks_finished(topology, Some(targets.waited.as_slice()))?
            }
            (true, PlanScope::Job | PlanScope::Rescale { .. }) => {
                self.after_tasks_finished(topology, None)?
            }
        };

        check_tasks_started(topology, plan.tasks_to_wait_for())?;
        Ok(plan)
    }

    // ── All tasks running ─────────────────────────────────────

    /// Trigger the scope's entry tasks; wait for and commit to every
    /// targeted task.
    fn with_all_tasks_running(
        &self,
        topology: &ExecutionTopology,
        targets: &ScopeTargets,
    ) -> Result<CheckpointPlan, CheckpointError> {
        let mut trigger = Vec::new();
        let mut wait_for = Vec::new();
        let mut commit_to = Vec::new();

        for (pos, job_vertex) in topology.job_vertices().iter().enumerate() {
            for &task in job_vertex.tasks() {
                if targets.triggered[pos] {
                    trigger.push(attempt_ref(topology, task)?);
                }
                if targets.waited[pos] {
                    let attempt = attempt_ref(topology, task)?;
                    wait_for.push(attempt);
                    commit_to.push(attempt.vertex);
                }
            }
        }

        Ok(CheckpointPlan::new(
            trigger,
            wait_for,
            commit_to,
            Vec::new(),
            Vec::new(),
            self.allow_checkpoints_after_tasks_finished,
        ))
    }

    // ── Some tasks finished ───────────────────────────────────

    /// Walk job vertices in topological order and trigger the running tasks
    /// that have no running predecessor.
    ///
    /// With `restrict`, only the marked job vertices are planned and every
    /// other vertex counts as not running.
    fn after_tasks_finished(
        &self,
        topology: &ExecutionTopology,
        restrict: Option<&[bool]>,
    ) -> Result<CheckpointPlan, CheckpointError> {
        let mut statuses = collect_running_status(topology);
        if let Some(in_scope) = restrict {
            for (status, keep) in statuses.iter_mut().zip(in_scope) {
                if !*keep {
                    status.clear();
                }
            }
        }

        let mut trigger = Vec::new();
        let mut wait_for = Vec::new();
        let mut commit_to = Vec::new();
        let mut finished = Vec::new();
        let mut fully_finished = Vec::new();

        for (pos, job_vertex) in topology.job_vertices().iter().enumerate() {
            if restrict.is_some_and(|in_scope| !in_scope[pos]) {
                continue;
            }
            let status = &statuses[pos];

            if status.none_running() {
                fully_finished.push(job_vertex.id());
                for &task in job_vertex.tasks() {
                    finished.push(attempt_ref(topology, task)?);
                }
                continue;
            }

            // Vertex-level shortcut: if some input is still fed by running
            // upstream tasks, barriers arrive through the data and none of
            // this vertex's tasks is triggered directly.
            let must_trigger =
                some_tasks_must_be_triggered(topology, &statuses, job_vertex.inputs())?;

            for (subtask, &task) in job_vertex.tasks().iter().enumerate() {
                let attempt = attempt_ref(topology, task)?;
                if !status.get(subtask) {
                    finished.push(attempt);
                    continue;
                }
                wait_for.push(attempt);
                commit_to.push(attempt.vertex);
                if must_trigger
                    && !has_running_precedent_tasks(topology, task, job_vertex.inputs(), &statuses)?
                {
                    trigger.push(attempt);
                }
            }
        }

        Ok(CheckpointPlan::new(
            trigger,
            wait_for,
            commit_to,
            finished,
            fully_finished,
            self.allow_checkpoints_after_tasks_finished,
        ))
    }
}

fn resolve_scope(
    topology: &ExecutionTopology,
    scope: &PlanScope,
) -> Result<ScopeTargets, CheckpointError> {
    let job_vertices = topology.job_vertices();
    let graph = topology.job_graph();

    match scope {
        PlanScope::Job => Ok(ScopeTargets {
            waited: vec![true; job_vertices.len()],
            triggered: job_vertices.iter().map(|v| v.is_input_vertex()).collect(),
        }),
        PlanScope::SnapshotGroup(group) => {
            if !job_vertices.iter().any(|v| v.snapshot_group() == Some(group.as_str())) {
                return Err(CheckpointError::new(
                    CheckpointFailureReason::InvalidScope,
                    format!("no vertex belongs to snapshot group '{group}'"),
                ));
            }
            let mut waited = Vec::with_capacity(job_vertices.len());
            let mut triggered = Vec::with_capacity(job_vertices.len());
            for vertex in job_vertices {
                let member = vertex.snapshot_group() == Some(group.as_str());
                let in_scope = member || graph.is_downstream_of_snapshot_group(&vertex.id(), group);
                waited.push(in_scope);
                triggered.push(
                    (member && vertex.is_input_vertex())
                        || (!in_scope && graph.is_direct_upstream_of_snapshot_group(&vertex.id(), group)),
                );
            }
            Ok(ScopeTargets { waited, triggered })
        }
        PlanScope::Rescale { rescaled, blocked } => {
            for id in std::iter::once(rescaled).chain(blocked) {
                if topology.job_vertex(id).is_err() {
                    return Err(CheckpointError::new(
                        CheckpointFailureReason::InvalidScope,
                        format!("rescale scope names unknown vertex {id}"),
                    ));
                }
            }
            let triggered: Vec<bool> = job_vertices.iter().map(|v| blocked.contains(&v.id())).collect();
            let waited = job_vertices
                .iter()
                .zip(&triggered)
                .map(|(v, &is_blocked)| {
                    v.id() == *rescaled || (!is_blocked && graph.is_downstream_of(&v.id(), rescaled))
                })
                .collect();
            Ok(ScopeTargets { waited, triggered })
        }
    }
}

/// Only FINISHED counts here; FAILED or CANCELED tasks must fail the
/// RUNNING check instead of being skipped by the partial-finish path.
fn has_finished_task(topology: &ExecutionTopology, include: impl Fn(usize) -> bool) -> bool {
    topology
        .job_vertices()
        .iter()
        .enumerate()
        .filter(|(pos, _)| include(*pos))
        .flat_map(|(_, job_vertex)| job_vertex.tasks())
        .any(|&task| topology.vertex_at(task).state() == ExecutionState::Finished)
}

/// One bitset per job vertex, in topological order.
fn collect_running_status(topology: &ExecutionTopology) -> Vec<RunningStatus> {
    topology
        .job_vertices()
        .iter()
        .map(|job_vertex| {
            let mut status = RunningStatus::new(job_vertex.tasks().len());
            for (subtask, &task) in job_vertex.tasks().iter().enumerate() {
                let running = topology
                    .vertex_at(task)
                    .current_attempt()
                    .is_some_and(|attempt| !attempt.is_finished());
                if running {
                    status.set(subtask);
                }
            }
            status
        })
        .collect()
}

/// False when any input edge still has an active upstream: some running
/// producer subtask on an ALL_TO_ALL edge, or every producer subtask running
/// on a POINTWISE edge.
fn some_tasks_must_be_triggered(
    topology: &ExecutionTopology,
    statuses: &[RunningStatus],
    inputs: &[JobEdge],
) -> Result<bool, CheckpointError> {
    for edge in inputs {
        let upstream = &statuses[topology.job_vertex_position(&edge.producer)?];
        let active = match edge.distribution_pattern {
            DistributionPattern::AllToAll => upstream.cardinality() > 0,
            DistributionPattern::Pointwise => upstream.all_running(),
        };
        if active {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Whether any immediate POINTWISE predecessor of `task` is still running.
/// Consumed group `i` belongs to input edge `i`.
fn has_running_precedent_tasks(
    topology: &ExecutionTopology,
    task: VertexIndex,
    inputs: &[JobEdge],
    statuses: &[RunningStatus],
) -> Result<bool, CheckpointError> {
    let vertex = topology.vertex_at(task);
    for (edge, &group) in inputs.iter().zip(vertex.consumed_partition_groups()) {
        if edge.distribution_pattern != DistributionPattern::Pointwise {
            continue;
        }
        for &partition in topology.partition_group(group).partitions() {
            let producer = topology.vertex_at(topology.partition_at(partition).producer());
            let pos = topology.job_vertex_position(&producer.job_vertex_id())?;
            if statuses[pos].get(producer.subtask_index() as usize) {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

fn task_name(topology: &ExecutionTopology, task: VertexIndex) -> String {
    let id = topology.vertex_at(task).id();
    match topology.job_vertex(&id.job_vertex_id) {
        Ok(job_vertex) => format!(
            "{} ({}/{})",
            job_vertex.name(),
            id.subtask_index + 1,
            job_vertex.parallelism()
        ),
        Err(_) => id.to_string(),
    }
}

fn attempt_ref(
    topology: &ExecutionTopology,
    task: VertexIndex,
) -> Result<TaskAttemptRef, CheckpointError> {
    let vertex = topology.vertex_at(task);
    vertex
        .current_attempt()
        .map(|attempt| TaskAttemptRef {
            vertex: vertex.id(),
            attempt_number: attempt.attempt_number,
        })
        .ok_or_else(|| {
            CheckpointError::not_all_running(format!(
                "task {} of job {} is not being executed at the moment. Aborting checkpoint.",
                task_name(topology, task),
                topology.job_graph().name
            ))
        })
}

/// Every task must carry an execution attempt before anything is planned.
fn check_all_tasks_initiated(topology: &ExecutionTopology) -> Result<(), CheckpointError> {
    for job_vertex in topology.job_vertices() {
        for &task in job_vertex.tasks() {
            attempt_ref(topology, task)?;
        }
    }
    Ok(())
}

/// Every task the plan waits for must be RUNNING.
fn check_tasks_started(
    topology: &ExecutionTopology,
    wait_for: &[TaskAttemptRef],
) -> Result<(), CheckpointError> {
    for attempt in wait_for {
        let task = topology.vertex_index(&attempt.vertex)?;
        if topology.vertex_at(task).state() != ExecutionState::Running {
            return Err(CheckpointError::not_all_running(format!(
                "Checkpoint triggering task {} of job {} is not being executed at the moment. Aborting checkpoint.",
                task_name(topology, task),
                topology.job_graph().name
            )));
        }
    }
    Ok(())
}
