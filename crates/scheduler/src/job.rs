//! Per-job control facade.
//!
//! [`JobControl`] owns the [`ControlExecutor`] and the [`JobState`] it
//! serializes: the execution topology plus the release strategy, failover
//! strategy and checkpoint plan calculator that read it. Every public method
//! submits one closure to the executor and awaits its reply.

use std::collections::{BTreeSet, HashMap};

use serde::Serialize;
use sluice_core::{
    Config, ExecutionState, ExecutionVertexId, IntermediateDataSetId, ResultPartitionId,
    SluiceError,
};
use sluice_graph::{ExecutionTopology, GroupIndex, SchedulingTopology, TopologyMutation};
use tracing::{debug, info};

use crate::checkpoint::{CheckpointError, CheckpointFailureReason, CheckpointPlan, CheckpointPlanCalculator, PlanScope};
use crate::executor::{ControlExecutor, Countdown, ExecutorError};
use crate::failover::{
    create_failover_strategy, AllPartitionsAvailable, FailoverStrategy, FailureCause,
    PartitionAvailabilityChecker,
};
use crate::metrics::ControlMetrics;
use crate::release::{create_release_strategy, PartitionGroupReleaseStrategy};

#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error(transparent)]
    Executor(#[from] ExecutorError),

    #[error(transparent)]
    Topology(#[from] SluiceError),
}

/// A consumed BLOCKING partition group no consumer will read again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReleasablePartitionGroup {
    pub group: usize,
    pub dataset_id: IntermediateDataSetId,
    pub partitions: Vec<ResultPartitionId>,
}

impl ReleasablePartitionGroup {
    fn from_group(topology: &dyn SchedulingTopology, group: GroupIndex) -> Self {
        let consumed = topology.partition_group(group);
        Self {
            group: group.index(),
            dataset_id: consumed.dataset_id(),
            partitions: consumed
                .partitions()
                .iter()
                .map(|&p| topology.partition_at(p).id())
                .collect(),
        }
    }
}

/// Everything the control executor owns for one job.
pub struct JobState {
    pub topology: ExecutionTopology,
    release: Box<dyn PartitionGroupReleaseStrategy>,
    failover: Box<dyn FailoverStrategy>,
    availability: Box<dyn PartitionAvailabilityChecker>,
    calculator: CheckpointPlanCalculator,
    metrics: ControlMetrics,
    /// New subtasks of a rescale that have not reported RUNNING yet.
    pending_rescales: HashMap<ExecutionVertexId, Countdown>,
}

impl JobState {
    pub fn new(
        topology: ExecutionTopology,
        config: &Config,
        availability: Box<dyn PartitionAvailabilityChecker>,
    ) -> Self {
        let release = create_release_strategy(config.scheduling.partition_release, &topology);
        Self {
            release,
            failover: create_failover_strategy(config.scheduling.failover_strategy),
            availability,
            calculator: CheckpointPlanCalculator::from_config(&config.checkpoint),
            metrics: ControlMetrics::default(),
            pending_rescales: HashMap::new(),
            topology,
        }
    }

    fn deploy(&mut self, id: &ExecutionVertexId) -> Result<u32, SluiceError> {
        let was_finished = self.topology.vertex(id)?.state() == ExecutionState::Finished;
        let attempt = self.topology.attach_attempt(id)?;
        if was_finished {
            self.release.vertex_unfinished(&self.topology, id)?;
        }
        debug!(vertex = %id, attempt, "Deployed new execution attempt");
        Ok(attempt)
    }

    fn update_execution_state(
        &mut self,
        id: &ExecutionVertexId,
        state: ExecutionState,
    ) -> Result<Vec<ReleasablePartitionGroup>, SluiceError> {
        let previous = self.topology.transition(id, state)?;
        let mut released = Vec::new();

        if state == ExecutionState::Finished && previous != ExecutionState::Finished {
            let groups = self.release.vertex_finished(&self.topology, id)?;
            released = groups
                .into_iter()
                .map(|group| ReleasablePartitionGroup::from_group(&self.topology, group))
                .collect();
            self.metrics.record_released(released.len());
        } else if previous == ExecutionState::Finished && state != ExecutionState::Finished {
            self.release.vertex_unfinished(&self.topology, id)?;
        }

        if state == ExecutionState::Running {
            if let Some(countdown) = self.pending_rescales.remove(id) {
                countdown.count_down();
            }
        }
        Ok(released)
    }

    fn handle_failure(
        &mut self,
        id: &ExecutionVertexId,
        cause: &FailureCause,
    ) -> Result<BTreeSet<ExecutionVertexId>, SluiceError> {
        let restart = self.failover.tasks_to_restart(
            &self.topology,
            self.availability.as_ref(),
            id,
            cause,
        )?;
        self.metrics.record_failover(restart.len());
        Ok(restart)
    }

    fn calculate_checkpoint_plan(
        &mut self,
        scope: &PlanScope,
    ) -> Result<CheckpointPlan, CheckpointError> {
        let result = self.calculator.calculate(&self.topology, scope);
        match &result {
            Ok(_) => self.metrics.record_plan(),
            Err(e) => self.metrics.record_plan_aborted(e.reason),
        }
        result
    }

    fn rescale(
        &mut self,
        sibling: &ExecutionVertexId,
        additional: u32,
    ) -> Result<(Vec<ExecutionVertexId>, Countdown), SluiceError> {
        let added = self.topology.extend_region(sibling, additional)?;
        self.release.vertices_added(&self.topology, sibling, &added)?;

        let countdown = Countdown::new(added.len());
        for id in &added {
            self.pending_rescales.insert(*id, countdown.clone());
        }
        Ok((added, countdown))
    }

    pub fn metrics(&self) -> &ControlMetrics {
        &self.metrics
    }
}

/// Async facade over one job's control executor.
pub struct JobControl {
    executor: ControlExecutor<JobState>,
}

impl JobControl {
    /// Start a control executor for `topology`. Must be called from within a
    /// Tokio runtime.
    pub fn new(topology: ExecutionTopology, config: &Config) -> Self {
        Self::with_availability_checker(topology, config, Box::new(AllPartitionsAvailable))
    }

    pub fn with_availability_checker(
        topology: ExecutionTopology,
        config: &Config,
        availability: Box<dyn PartitionAvailabilityChecker>,
    ) -> Self {
        info!(
            job = %topology.job_graph().name,
            tasks = topology.vertex_count(),
            regions = topology.regions().len(),
            "Starting job control"
        );
        let state = JobState::new(topology, config, availability);
        Self {
            executor: ControlExecutor::spawn(state, config.executor.queue_capacity),
        }
    }

    /// Attach a fresh execution attempt to `id`. Returns the attempt number.
    pub async fn deploy(&self, id: ExecutionVertexId) -> Result<u32, ControlError> {
        Ok(self.executor.submit(move |job| job.deploy(&id)).await??)
    }

    /// Apply a state change reported for `id`'s current attempt and return
    /// the partition groups that became releasable.
    pub async fn update_execution_state(
        &self,
        id: ExecutionVertexId,
        state: ExecutionState,
    ) -> Result<Vec<ReleasablePartitionGroup>, ControlError> {
        Ok(self
            .executor
            .submit(move |job| job.update_execution_state(&id, state))
            .await??)
    }

    /// Tasks to restart after `failed` failed with `cause`.
    pub async fn handle_failure(
        &self,
        failed: ExecutionVertexId,
        cause: FailureCause,
    ) -> Result<BTreeSet<ExecutionVertexId>, ControlError> {
        Ok(self
            .executor
            .submit(move |job| job.handle_failure(&failed, &cause))
            .await??)
    }

    pub async fn calculate_checkpoint_plan(
        &self,
        scope: PlanScope,
    ) -> Result<CheckpointPlan, CheckpointError> {
        self.executor
            .submit(move |job| job.calculate_checkpoint_plan(&scope))
            .await
            .map_err(|e| CheckpointError::new(CheckpointFailureReason::CoordinatorShutdown, e.to_string()))?
    }

    /// Add `additional` subtasks next to `sibling`. The returned countdown
    /// completes once every new subtask has reported RUNNING.
    pub async fn rescale(
        &self,
        sibling: ExecutionVertexId,
        additional: u32,
    ) -> Result<(Vec<ExecutionVertexId>, Countdown), ControlError> {
        Ok(self
            .executor
            .submit(move |job| job.rescale(&sibling, additional))
            .await??)
    }

    pub async fn metrics(&self) -> Result<ControlMetrics, ControlError> {
        Ok(self.executor.submit(|job| job.metrics.clone()).await?)
    }

    /// Run a read-only query against the job state.
    pub async fn inspect<F, R>(&self, f: F) -> Result<R, ControlError>
    where
        F: FnOnce(&JobState) -> R + Send + 'static,
        R: Send + 'static,
    {
        Ok(self.executor.submit(move |job| f(job)).await?)
    }

    pub async fn shutdown(self) -> Result<JobState, ControlError> {
        Ok(self.executor.shutdown().await?)
    }
}
