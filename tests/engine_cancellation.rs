mod common;

use std::time::Duration;

use common::*;

use reasonflow::engine::{EngineError, HumanDecision};
use reasonflow::executor::ExecutorRegistry;
use reasonflow::recovery::RecoveryPolicy;
use reasonflow::state::{BlockState, RunStatus};
use reasonflow::trace::TraceEvent;
use reasonflow::types::BlockType;

#[tokio::test]
async fn cancel_stops_a_block_in_flight() {
    let hang = HangingExecutor::default();
    let registry = ExecutorRegistry::new().register(BlockType::Reasoning, hang.clone());
    let engine = silent_engine(registry);

    let handle = engine.start(&linear()).expect("run should start");
    hang.started.notified().await;
    handle.cancel();
    let report = handle.wait().await.expect("run should terminate");

    assert_eq!(report.status, RunStatus::EarlyTerminated);
    assert_eq!(report.summary, "cancelled before completion");
    assert_eq!(count_kind(&report.trace, "early_termination"), 1);
    assert_eq!(
        report.trace.last().expect("trace not empty").event.kind(),
        "early_termination"
    );
    assert_eq!(count_kind(&report.trace, "execution_completed"), 0);
    assert_eq!(count_kind(&report.trace, "execution_failed"), 0);

    // No recovery and no further blocks; the walk just stops.
    assert!(recovery_strategies(&report.trace).is_empty());
    assert_eq!(started_blocks(&report.trace), ["goal", "work"]);
    assert_eq!(report.state.block_state("work"), BlockState::Running);
}

#[tokio::test]
async fn repeated_cancellation_is_idempotent() {
    let hang = HangingExecutor::default();
    let registry = ExecutorRegistry::new().register(BlockType::Reasoning, hang.clone());
    let engine = silent_engine(registry);

    let handle = engine.start(&linear()).expect("run should start");
    hang.started.notified().await;
    handle.cancel();
    handle.cancel();
    let report = handle.wait().await.expect("run should terminate");

    assert_eq!(report.status, RunStatus::EarlyTerminated);
    assert_eq!(count_kind(&report.trace, "early_termination"), 1);
}

#[tokio::test]
async fn cancelling_a_suspended_run_terminates_it() {
    let workflow = linear_with(|b| b.with_recovery(RecoveryPolicy::escalate()));
    let scripted = ScriptedExecutor::new(0.8).then_err("work", "needs review");
    let registry = ExecutorRegistry::new().register(BlockType::Reasoning, scripted);
    let engine = silent_engine(registry);

    let mut handle = engine.start(&workflow).expect("run should start");
    let mut events = handle.take_events().expect("first take gets the stream");
    loop {
        let record = events
            .next_timeout(Duration::from_secs(5))
            .await
            .expect("run should reach its escalation");
        if matches!(record.event, TraceEvent::Recovery(_)) {
            break;
        }
    }

    handle.cancel();
    let report = handle.wait().await.expect("run should terminate");

    assert_eq!(report.status, RunStatus::EarlyTerminated);
    assert_eq!(report.state.block_state("work"), BlockState::Escalated);
    assert_eq!(count_kind(&report.trace, "early_termination"), 1);
}

#[tokio::test]
async fn resume_fails_once_the_run_is_over() {
    let hang = HangingExecutor::default();
    let registry = ExecutorRegistry::new().register(BlockType::Reasoning, hang.clone());
    let engine = silent_engine(registry);

    let handle = engine.start(&linear()).expect("run should start");
    hang.started.notified().await;
    handle.cancel();
    tokio::time::timeout(Duration::from_secs(5), async {
        while !handle.is_finished() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("run should wind down");

    let err = handle
        .resume(HumanDecision::Approve)
        .expect_err("nothing left to resume");
    assert!(matches!(err, EngineError::RunNotActive { .. }));
}
