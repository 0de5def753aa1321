use std::collections::HashSet;

use sluice_core::{
    DistributionPattern, ExecutionState, ExecutionVertexId, JobVertexId, ResultPartitionType,
};
use sluice_graph::{ExecutionTopology, JobGraph};

use crate::checkpoint::{CheckpointFailureReason, CheckpointPlan, CheckpointPlanCalculator, PlanScope};

use DistributionPattern::{AllToAll, Pointwise};
use ExecutionState::{Deploying, Finished, Running};
use ResultPartitionType::Pipelined;

fn id(vertex: JobVertexId, subtask: u32) -> ExecutionVertexId {
    ExecutionVertexId::new(vertex, subtask)
}

/// Deploy every task and move it to `state`, then apply overrides.
fn deploy_all(
    topology: &mut ExecutionTopology,
    state: ExecutionState,
    overrides: &[(ExecutionVertexId, ExecutionState)],
) {
    let all: Vec<ExecutionVertexId> = topology.vertices().iter().map(|v| v.id()).collect();
    for task in all {
        topology.attach_attempt(&task).unwrap();
        topology.transition(&task, state).unwrap();
    }
    for (task, state) in overrides {
        topology.transition(task, *state).unwrap();
    }
}

fn vertices(tasks: impl IntoIterator<Item = ExecutionVertexId>) -> HashSet<ExecutionVertexId> {
    tasks.into_iter().collect()
}

fn triggered(plan: &CheckpointPlan) -> HashSet<ExecutionVertexId> {
    vertices(plan.tasks_to_trigger().iter().map(|t| t.vertex))
}

fn waited(plan: &CheckpointPlan) -> HashSet<ExecutionVertexId> {
    vertices(plan.tasks_to_wait_for().iter().map(|t| t.vertex))
}

fn finished(plan: &CheckpointPlan) -> HashSet<ExecutionVertexId> {
    vertices(plan.finished_tasks().iter().map(|t| t.vertex))
}

/// a(2) =ALL_TO_ALL=> b(2) -POINTWISE-> c(1)
fn three_stage() -> (ExecutionTopology, JobVertexId, JobVertexId, JobVertexId) {
    let mut graph = JobGraph::new("three-stage");
    let a = graph.add_vertex("a", 2);
    let b = graph.add_vertex("b", 2);
    let c = graph.add_vertex("c", 1);
    graph.connect(a, b, AllToAll, Pipelined).unwrap();
    graph.connect(b, c, Pointwise, Pipelined).unwrap();
    (ExecutionTopology::from_job_graph(graph).unwrap(), a, b, c)
}

#[test]
fn all_running_triggers_sources_and_waits_for_everything() {
    let mut graph = JobGraph::new("two-sources");
    let left = graph.add_vertex("left", 2);
    let right = graph.add_vertex("right", 1);
    let join = graph.add_vertex("join", 2);
    graph.connect(left, join, Pointwise, Pipelined).unwrap();
    graph.connect(right, join, AllToAll, Pipelined).unwrap();
    let mut topology = ExecutionTopology::from_job_graph(graph).unwrap();
    deploy_all(&mut topology, Running, &[]);

    let plan = CheckpointPlanCalculator::new(true)
        .calculate(&topology, &PlanScope::Job)
        .unwrap();

    assert_eq!(triggered(&plan), vertices([id(left, 0), id(left, 1), id(right, 0)]));
    assert_eq!(waited(&plan).len(), 5);
    assert_eq!(plan.tasks_to_commit_to().len(), 5);
    assert!(plan.finished_tasks().is_empty());
    assert!(plan.fully_finished_job_vertices().is_empty());
}

#[test]
fn partial_finish_triggers_first_running_tasks() {
    let (mut topology, a, b, c) = three_stage();
    deploy_all(
        &mut topology,
        Running,
        &[(id(a, 0), Finished), (id(a, 1), Finished), (id(b, 0), Finished)],
    );

    let plan = CheckpointPlanCalculator::new(true)
        .calculate(&topology, &PlanScope::Job)
        .unwrap();

    assert_eq!(triggered(&plan), vertices([id(b, 1)]));
    assert_eq!(waited(&plan), vertices([id(b, 1), id(c, 0)]));
    assert_eq!(finished(&plan), vertices([id(a, 0), id(a, 1), id(b, 0)]));
    assert_eq!(plan.fully_finished_job_vertices(), &[a]);
    assert!(!plan.is_triggered(&id(c, 0)));
    assert!(!plan.is_waited_for(&id(a, 0)));
    assert!(plan.may_have_finished_tasks());
}

#[test]
fn running_pointwise_predecessor_suppresses_trigger() {
    let mut graph = JobGraph::new("pointwise");
    let a = graph.add_vertex("a", 2);
    let b = graph.add_vertex("b", 2);
    graph.connect(a, b, Pointwise, Pipelined).unwrap();
    let mut topology = ExecutionTopology::from_job_graph(graph).unwrap();
    deploy_all(&mut topology, Running, &[(id(a, 0), Finished)]);

    let plan = CheckpointPlanCalculator::new(true)
        .calculate(&topology, &PlanScope::Job)
        .unwrap();

    // b0 lost its only producer, b1 still receives barriers from a1.
    assert_eq!(triggered(&plan), vertices([id(a, 1), id(b, 0)]));
    assert_eq!(waited(&plan), vertices([id(a, 1), id(b, 0), id(b, 1)]));
    assert!(plan.fully_finished_job_vertices().is_empty());
}

#[test]
fn running_all_to_all_upstream_blocks_vertex_trigger() {
    let (mut topology, a, b, c) = three_stage();
    deploy_all(&mut topology, Running, &[(id(a, 0), Finished), (id(b, 0), Finished)]);

    let plan = CheckpointPlanCalculator::new(true)
        .calculate(&topology, &PlanScope::Job)
        .unwrap();

    // a1 still feeds every b subtask, and b1 still feeds c0.
    assert_eq!(triggered(&plan), vertices([id(a, 1)]));
    assert_eq!(waited(&plan), vertices([id(a, 1), id(b, 1), id(c, 0)]));
}

#[test]
fn finished_tasks_abort_when_not_allowed() {
    let (mut topology, a, _, _) = three_stage();
    deploy_all(&mut topology, Running, &[(id(a, 0), Finished)]);

    let err = CheckpointPlanCalculator::new(false)
        .calculate(&topology, &PlanScope::Job)
        .unwrap_err();
    assert_eq!(err.reason, CheckpointFailureReason::NotAllRequiredTasksRunning);
    assert!(err.message.contains("already finished"));
}

#[test]
fn failed_task_is_not_treated_as_finished() {
    for allow_finished in [true, false] {
        let (mut topology, _, b, _) = three_stage();
        deploy_all(&mut topology, Running, &[(id(b, 1), ExecutionState::Failed)]);

        let err = CheckpointPlanCalculator::new(allow_finished)
            .calculate(&topology, &PlanScope::Job)
            .unwrap_err();
        assert_eq!(err.reason, CheckpointFailureReason::NotAllRequiredTasksRunning);
        assert!(!err.message.contains("already finished"));
        assert!(err.message.contains("b (2/2)"));
    }
}

#[test]
fn canceled_task_never_lands_in_finished_tasks() {
    let (mut topology, a, _, _) = three_stage();
    deploy_all(&mut topology, Running, &[(id(a, 1), ExecutionState::Canceled)]);

    let err = CheckpointPlanCalculator::new(true)
        .calculate(&topology, &PlanScope::Job)
        .unwrap_err();
    assert_eq!(err.reason, CheckpointFailureReason::NotAllRequiredTasksRunning);
    assert!(err.message.contains("a (2/2)"));
}

#[test]
fn missing_attempt_aborts() {
    let (mut topology, _, b, _) = three_stage();
    for task in topology.vertices().iter().map(|v| v.id()).collect::<Vec<_>>() {
        if task != id(b, 1) {
            topology.attach_attempt(&task).unwrap();
            topology.transition(&task, Running).unwrap();
        }
    }

    let err = CheckpointPlanCalculator::new(true)
        .calculate(&topology, &PlanScope::Job)
        .unwrap_err();
    assert_eq!(err.reason, CheckpointFailureReason::NotAllRequiredTasksRunning);
    assert!(err.message.contains("b (2/2)"));
}

#[test]
fn waiting_on_a_task_that_is_not_running_aborts() {
    let (mut topology, _, _, c) = three_stage();
    deploy_all(&mut topology, Running, &[(id(c, 0), Deploying)]);

    let err = CheckpointPlanCalculator::new(true)
        .calculate(&topology, &PlanScope::Job)
        .unwrap_err();
    assert_eq!(err.reason, CheckpointFailureReason::NotAllRequiredTasksRunning);
}

#[test]
fn plans_are_recomputed_per_attempt() {
    let (mut topology, a, b, _) = three_stage();
    deploy_all(&mut topology, Running, &[]);
    let calculator = CheckpointPlanCalculator::new(true);

    let first = calculator.calculate(&topology, &PlanScope::Job).unwrap();
    topology.transition(&id(a, 0), Finished).unwrap();
    topology.transition(&id(a, 1), Finished).unwrap();
    let second = calculator.calculate(&topology, &PlanScope::Job).unwrap();

    assert_eq!(triggered(&first), vertices([id(a, 0), id(a, 1)]));
    assert_eq!(triggered(&second), vertices([id(b, 0), id(b, 1)]));
}

// ── Scoped plans ──────────────────────────────────────────

/// src(1) -> grouped(2, group "g") -> sink(1), everything pipelined.
fn grouped() -> (ExecutionTopology, JobVertexId, JobVertexId, JobVertexId) {
    let mut graph = JobGraph::new("grouped");
    let src = graph.add_vertex("src", 1);
    let grouped = graph.add_vertex("grouped", 2);
    let sink = graph.add_vertex("sink", 1);
    graph.connect(src, grouped, AllToAll, Pipelined).unwrap();
    graph.connect(grouped, sink, AllToAll, Pipelined).unwrap();
    graph.set_snapshot_group(grouped, "g").unwrap();
    (ExecutionTopology::from_job_graph(graph).unwrap(), src, grouped, sink)
}

#[test]
fn snapshot_group_triggers_direct_upstream() {
    let (mut topology, src, grouped, sink) = grouped();
    deploy_all(&mut topology, Running, &[]);

    let plan = CheckpointPlanCalculator::new(true)
        .calculate(&topology, &PlanScope::SnapshotGroup("g".into()))
        .unwrap();

    assert_eq!(triggered(&plan), vertices([id(src, 0)]));
    assert_eq!(waited(&plan), vertices([id(grouped, 0), id(grouped, 1), id(sink, 0)]));
}

#[test]
fn snapshot_group_ignores_finished_tasks_outside_group() {
    let (mut topology, src, grouped, sink) = grouped();
    deploy_all(&mut topology, Running, &[(id(src, 0), Finished)]);

    // Only members of the group count towards the finished-task check.
    let plan = CheckpointPlanCalculator::new(false)
        .calculate(&topology, &PlanScope::SnapshotGroup("g".into()))
        .unwrap();
    assert_eq!(waited(&plan), vertices([id(grouped, 0), id(grouped, 1), id(sink, 0)]));
    assert!(plan.finished_tasks().is_empty());

    deploy_all(&mut topology, Running, &[]);
    topology.transition(&id(grouped, 0), Finished).unwrap();
    let plan = CheckpointPlanCalculator::new(true)
        .calculate(&topology, &PlanScope::SnapshotGroup("g".into()))
        .unwrap();
    // grouped1 is fed by src, which lies outside the scope: it is triggered.
    assert_eq!(triggered(&plan), vertices([id(grouped, 1)]));
    assert_eq!(waited(&plan), vertices([id(grouped, 1), id(sink, 0)]));
    assert_eq!(finished(&plan), vertices([id(grouped, 0)]));
    assert!(!plan.is_waited_for(&id(src, 0)));
}

#[test]
fn rescale_scope_waits_for_rescaled_and_downstream() {
    let (mut topology, src, grouped, sink) = grouped();
    deploy_all(&mut topology, Running, &[]);

    let scope = PlanScope::Rescale {
        rescaled: grouped,
        blocked: vec![src],
    };
    let plan = CheckpointPlanCalculator::new(true)
        .calculate(&topology, &scope)
        .unwrap();

    assert_eq!(triggered(&plan), vertices([id(src, 0)]));
    assert_eq!(waited(&plan), vertices([id(grouped, 0), id(grouped, 1), id(sink, 0)]));
}

#[test]
fn unknown_scope_is_rejected() {
    let (mut topology, _, _, _) = grouped();
    deploy_all(&mut topology, Running, &[]);
    let calculator = CheckpointPlanCalculator::new(true);

    let err = calculator
        .calculate(&topology, &PlanScope::SnapshotGroup("missing".into()))
        .unwrap_err();
    assert_eq!(err.reason, CheckpointFailureReason::InvalidScope);

    let err = calculator
        .calculate(
            &topology,
            &PlanScope::Rescale {
                rescaled: JobVertexId::new(),
                blocked: Vec::new(),
            },
        )
        .unwrap_err();
    assert_eq!(err.reason, CheckpointFailureReason::InvalidScope);
}
