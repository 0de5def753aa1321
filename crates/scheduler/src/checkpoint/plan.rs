use serde::Serialize;
use sluice_core::{ExecutionVertexId, JobVertexId};

/// A task together with the attempt the plan was computed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct TaskAttemptRef {
    pub vertex: ExecutionVertexId,
    pub attempt_number: u32,
}

/// The tasks one checkpoint attempt involves. Never changes once built.
#[derive(Debug, Clone, Serialize)]
pub struct CheckpointPlan {
    tasks_to_trigger: Vec<TaskAttemptRef>,
    tasks_to_wait_for: Vec<TaskAttemptRef>,
    tasks_to_commit_to: Vec<ExecutionVertexId>,
    finished_tasks: Vec<TaskAttemptRef>,
    fully_finished_job_vertices: Vec<JobVertexId>,
    may_have_finished_tasks: bool,
}

impl CheckpointPlan {
    pub(crate) fn new(
        tasks_to_trigger: Vec<TaskAttemptRef>,
        tasks_to_wait_for: Vec<TaskAttemptRef>,
        tasks_to_commit_to: Vec<ExecutionVertexId>,
        finished_tasks: Vec<TaskAttemptRef>,
        fully_finished_job_vertices: Vec<JobVertexId>,
        may_have_finished_tasks: bool,
    ) -> Self {
        Self {
            tasks_to_trigger,
            tasks_to_wait_for,
            tasks_to_commit_to,
            finished_tasks,
            fully_finished_job_vertices,
            may_have_finished_tasks,
        }
    }

    /// Tasks that receive the barrier directly.
    pub fn tasks_to_trigger(&self) -> &[TaskAttemptRef] {
        &self.tasks_to_trigger
    }

    /// Tasks whose acknowledgement completes the checkpoint.
    pub fn tasks_to_wait_for(&self) -> &[TaskAttemptRef] {
        &self.tasks_to_wait_for
    }

    /// Tasks notified once the checkpoint completes.
    pub fn tasks_to_commit_to(&self) -> &[ExecutionVertexId] {
        &self.tasks_to_commit_to
    }

    pub fn finished_tasks(&self) -> &[TaskAttemptRef] {
        &self.finished_tasks
    }

    pub fn fully_finished_job_vertices(&self) -> &[JobVertexId] {
        &self.fully_finished_job_vertices
    }

    /// Whether checkpoints after finished tasks were enabled for this plan.
    pub fn may_have_finished_tasks(&self) -> bool {
        self.may_have_finished_tasks
    }

    pub fn is_triggered(&self, vertex: &ExecutionVertexId) -> bool {
        self.tasks_to_trigger.iter().any(|t| t.vertex == *vertex)
    }

    pub fn is_waited_for(&self, vertex: &ExecutionVertexId) -> bool {
        self.tasks_to_wait_for.iter().any(|t| t.vertex == *vertex)
    }

    pub fn is_finished(&self, vertex: &ExecutionVertexId) -> bool {
        self.finished_tasks.iter().any(|t| t.vertex == *vertex)
    }
}
