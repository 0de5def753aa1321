//! End-to-end tests of the job control facade.
//!
//! Each test drives a job through its executor the way a scheduler would:
//! deploy, report state changes, fail tasks, plan checkpoints and rescale.

use std::time::Duration;

use sluice_core::{
    Config, DistributionPattern, ExecutionState, ExecutionVertexId, FailoverStrategyKind,
    JobVertexId, PartitionReleaseKind, ResultPartitionId, ResultPartitionType,
};
use sluice_graph::{ExecutionTopology, JobGraph};
use sluice_scheduler::{
    CheckpointFailureReason, ControlError, FailureCause, JobControl, PlanScope,
};

use DistributionPattern::{AllToAll, Pointwise};
use ExecutionState::{Failed, Finished, Running};
use ResultPartitionType::{Blocking, Pipelined};

const TIMEOUT: Duration = Duration::from_secs(5);

fn id(vertex: JobVertexId, subtask: u32) -> ExecutionVertexId {
    ExecutionVertexId::new(vertex, subtask)
}

async fn start_all(control: &JobControl, tasks: &[ExecutionVertexId]) {
    for task in tasks {
        control.deploy(*task).await.unwrap();
        control.update_execution_state(*task, Running).await.unwrap();
    }
}

#[tokio::test]
async fn blocking_groups_are_released_once_consumers_finish() {
    let mut graph = JobGraph::new("batch");
    let map = graph.add_vertex("map", 2);
    let reduce = graph.add_vertex("reduce", 1);
    let shuffle = graph.connect(map, reduce, AllToAll, Blocking).unwrap();
    let topology = ExecutionTopology::from_job_graph(graph).unwrap();
    let control = JobControl::new(topology, &Config::default());

    let tasks = [id(map, 0), id(map, 1), id(reduce, 0)];
    start_all(&control, &tasks).await;

    for task in &tasks[..2] {
        let released = control.update_execution_state(*task, Finished).await.unwrap();
        assert!(released.is_empty());
    }
    let released = control
        .update_execution_state(id(reduce, 0), Finished)
        .await
        .unwrap();
    assert_eq!(released.len(), 1);
    assert_eq!(released[0].dataset_id, shuffle);
    assert_eq!(
        released[0].partitions,
        vec![ResultPartitionId::new(shuffle, 0), ResultPartitionId::new(shuffle, 1)]
    );

    // Redeploying the consumer takes the group back until it finishes again.
    control.deploy(id(reduce, 0)).await.unwrap();
    control.update_execution_state(id(reduce, 0), Running).await.unwrap();
    let released = control
        .update_execution_state(id(reduce, 0), Finished)
        .await
        .unwrap();
    assert_eq!(released.len(), 1);

    let metrics = control.metrics().await.unwrap();
    assert_eq!(metrics.partition_groups_released, 2);
}

#[tokio::test]
async fn never_release_keeps_every_group() {
    let mut graph = JobGraph::new("batch");
    let map = graph.add_vertex("map", 1);
    let reduce = graph.add_vertex("reduce", 1);
    graph.connect(map, reduce, AllToAll, Blocking).unwrap();
    let topology = ExecutionTopology::from_job_graph(graph).unwrap();

    let mut config = Config::default();
    config.scheduling.partition_release = PartitionReleaseKind::Never;
    let control = JobControl::new(topology, &config);

    let tasks = [id(map, 0), id(reduce, 0)];
    start_all(&control, &tasks).await;
    for task in tasks {
        let released = control.update_execution_state(task, Finished).await.unwrap();
        assert!(released.is_empty());
    }
}

#[tokio::test]
async fn failover_strategy_follows_configuration() {
    let build = || {
        let mut graph = JobGraph::new("two-pipelines");
        let left = graph.add_vertex("left", 1);
        let right = graph.add_vertex("right", 1);
        let sink = graph.add_vertex("sink", 2);
        graph.connect(left, sink, Pointwise, Pipelined).unwrap();
        graph.connect(right, sink, Pointwise, Blocking).unwrap();
        (ExecutionTopology::from_job_graph(graph).unwrap(), left, right, sink)
    };

    let (topology, left, right, sink) = build();
    let control = JobControl::new(topology, &Config::default());
    let tasks = [id(left, 0), id(right, 0), id(sink, 0), id(sink, 1)];
    start_all(&control, &tasks).await;
    control.update_execution_state(id(left, 0), Failed).await.unwrap();

    let restart = control
        .handle_failure(id(left, 0), FailureCause::Task("oom".into()))
        .await
        .unwrap();
    assert!(restart.contains(&id(left, 0)));
    assert!(!restart.contains(&id(right, 0)));

    let (topology, left, ..) = build();
    let mut config = Config::default();
    config.scheduling.failover_strategy = FailoverStrategyKind::Full;
    let control = JobControl::new(topology, &config);
    let tasks: Vec<ExecutionVertexId> = control
        .inspect(|job| job.topology.vertices().iter().map(|v| v.id()).collect())
        .await
        .unwrap();
    start_all(&control, &tasks).await;

    let restart = control
        .handle_failure(id(left, 0), FailureCause::Task("oom".into()))
        .await
        .unwrap();
    assert_eq!(restart.len(), 4);

    let metrics = control.metrics().await.unwrap();
    assert_eq!(metrics.failovers_handled, 1);
    assert_eq!(metrics.tasks_restarted, 4);
}

#[tokio::test]
async fn checkpoint_plans_track_attempt_state() {
    let mut graph = JobGraph::new("stream");
    let source = graph.add_vertex("source", 2);
    let sink = graph.add_vertex("sink", 1);
    graph.connect(source, sink, AllToAll, Pipelined).unwrap();
    let topology = ExecutionTopology::from_job_graph(graph).unwrap();
    let control = JobControl::new(topology, &Config::default());

    // Nothing deployed yet.
    let err = control
        .calculate_checkpoint_plan(PlanScope::Job)
        .await
        .unwrap_err();
    assert_eq!(err.reason, CheckpointFailureReason::NotAllRequiredTasksRunning);

    start_all(&control, &[id(source, 0), id(source, 1), id(sink, 0)]).await;
    let plan = control
        .calculate_checkpoint_plan(PlanScope::Job)
        .await
        .unwrap();
    assert_eq!(plan.tasks_to_trigger().len(), 2);
    assert_eq!(plan.tasks_to_wait_for().len(), 3);

    let metrics = control.metrics().await.unwrap();
    assert_eq!(metrics.plans_computed, 1);
    assert_eq!(metrics.plans_aborted_total(), 1);
    assert!(metrics.last_plan_at.is_some());
}

#[tokio::test]
async fn rescale_completes_when_new_subtasks_run() {
    let mut graph = JobGraph::new("elastic");
    let source = graph.add_vertex("source", 1);
    let worker = graph.add_vertex("worker", 2);
    graph.connect(source, worker, AllToAll, Pipelined).unwrap();
    let topology = ExecutionTopology::from_job_graph(graph).unwrap();
    let control = JobControl::new(topology, &Config::default());
    start_all(&control, &[id(source, 0), id(worker, 0), id(worker, 1)]).await;

    let (added, countdown) = control.rescale(id(worker, 0), 2).await.unwrap();
    assert_eq!(added, vec![id(worker, 2), id(worker, 3)]);
    assert_eq!(countdown.remaining(), 2);

    start_all(&control, &added).await;
    tokio::time::timeout(TIMEOUT, countdown.wait()).await.unwrap();

    let plan = control
        .calculate_checkpoint_plan(PlanScope::Job)
        .await
        .unwrap();
    assert_eq!(plan.tasks_to_wait_for().len(), 5);

    let state = control.shutdown().await.unwrap();
    assert_eq!(state.topology.job_vertex(&worker).unwrap().parallelism(), 4);
}

#[tokio::test]
async fn pointwise_rescale_is_rejected() {
    let mut graph = JobGraph::new("rigid");
    let source = graph.add_vertex("source", 2);
    let worker = graph.add_vertex("worker", 2);
    graph.connect(source, worker, Pointwise, Pipelined).unwrap();
    let topology = ExecutionTopology::from_job_graph(graph).unwrap();
    let control = JobControl::new(topology, &Config::default());

    let err = control.rescale(id(worker, 0), 1).await.unwrap_err();
    assert!(matches!(err, ControlError::Topology(_)));
}

#[tokio::test]
async fn unknown_vertices_are_reported() {
    let mut graph = JobGraph::new("single");
    graph.add_vertex("only", 1);
    let topology = ExecutionTopology::from_job_graph(graph).unwrap();
    let control = JobControl::new(topology, &Config::default());

    let stranger = id(JobVertexId::new(), 0);
    let err = control.deploy(stranger).await.unwrap_err();
    assert!(matches!(err, ControlError::Topology(ref e) if e.is_invariant_violation()));

    let err = control
        .update_execution_state(stranger, Running)
        .await
        .unwrap_err();
    assert!(matches!(err, ControlError::Topology(_)));
}
