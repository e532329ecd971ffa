mod common;

use async_trait::async_trait;
use common::*;
use serde_json::json;

use reasonflow::evaluation::{
    CheckReport, CheckSpec, EvaluationCheck, HALLUCINATION_RISK_KEY,
};
use reasonflow::executor::{BlockResult, ExecutorRegistry};
use reasonflow::graph::properties::{BlockProperties, GatewayProperties};
use reasonflow::graph::WorkflowBuilder;
use reasonflow::state::{BlockState, RunStatus};
use reasonflow::trace::TraceEvent;
use reasonflow::types::BlockType;

#[tokio::test]
async fn linear_run_reaches_the_exit() {
    let registry =
        ExecutorRegistry::new().register(BlockType::Reasoning, StaticExecutor::new(0.9));
    let engine = silent_engine(registry);

    let report = engine.run(&linear()).await.expect("run should complete");

    assert!(report.succeeded());
    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.steps, 3);
    assert!(report.summary.contains("done"), "{}", report.summary);
    for block in ["goal", "work", "done"] {
        assert_eq!(report.state.block_state(block), BlockState::Done);
    }
    assert_eq!(report.state.completion_order, ["goal", "work", "done"]);
    let result = report.state.result("work").expect("work has a result");
    assert!((result.confidence - 0.9).abs() < 1e-9);
    assert!(report.state.errors.is_empty());

    assert_eq!(
        kinds(&report.trace),
        [
            "execution_started",
            "block_started",
            "block_completed",
            "block_started",
            "block_completed",
            "block_started",
            "block_completed",
            "execution_completed",
        ]
    );
}

#[tokio::test]
async fn a_goal_straight_to_an_exit_needs_no_executors() {
    let workflow = WorkflowBuilder::new("trivial")
        .goal("goal", "Start")
        .exit("done", "Done")
        .connect("goal", "done")
        .build();
    let engine = silent_engine(ExecutorRegistry::new());

    let report = engine.run(&workflow).await.expect("run should complete");
    assert!(report.succeeded());
    assert_eq!(report.steps, 2);
}

#[tokio::test]
async fn a_full_pipeline_routes_through_the_gateway() {
    let workflow = WorkflowBuilder::new("triage")
        .goal("goal", "Handle the request")
        .block_with("ctx", BlockType::Context, "Gather context", |b| b)
        .block_with("route", BlockType::Gateway, "Route", |b| {
            b.with_properties(BlockProperties::Gateway(GatewayProperties {
                confidence_threshold: 0.5,
                ..GatewayProperties::default()
            }))
        })
        .block_with("think", BlockType::Reasoning, "Reason it out", |b| b)
        .block_with("safety", BlockType::Fallback, "Safe answer", |b| b)
        .exit("done", "Done")
        .connect("goal", "ctx")
        .connect("ctx", "route")
        .connect("route", "think")
        .connect("route", "safety")
        .connect("think", "done")
        .connect("safety", "done")
        .build();

    let scripted = std::sync::Arc::new(
        ScriptedExecutor::new(0.9)
            .then_ok("ctx", BlockResult::new(json!("background"), 0.95))
            .then_ok(
                "route",
                BlockResult::new(json!("routing"), 0.8)
                    .with_branch_score("think", 0.8)
                    .with_branch_score("safety", 0.2)
                    .with_evidence("request is well-formed"),
            )
            .then_ok("think", BlockResult::new(json!("answer"), 0.8)),
    );
    let registry = ExecutorRegistry::new()
        .register(BlockType::Context, std::sync::Arc::clone(&scripted))
        .register(BlockType::Gateway, std::sync::Arc::clone(&scripted))
        .register(BlockType::Reasoning, std::sync::Arc::clone(&scripted))
        .register(BlockType::Fallback, std::sync::Arc::clone(&scripted));
    let engine = silent_engine(registry);

    let report = engine.run(&workflow).await.expect("run should complete");

    assert!(report.succeeded());
    assert_eq!(
        started_blocks(&report.trace),
        ["goal", "ctx", "route", "think", "done"]
    );
    assert_eq!(count_kind(&report.trace, "recovery"), 0);
    assert_eq!(count_kind(&report.trace, "arbitration"), 1);

    let decision = report
        .trace
        .iter()
        .find_map(|record| match &record.event {
            TraceEvent::Arbitration(event) => Some(event),
            _ => None,
        })
        .expect("the gateway arbitrated");
    let chosen = decision.chosen.as_ref().expect("a branch was chosen");
    assert_eq!(chosen.target_block_id, "think");
    assert!((chosen.score - 0.8).abs() < 1e-9);
    assert_eq!(decision.alternatives.len(), 1);
    assert_eq!(decision.alternatives[0].target_block_id, "safety");
    assert_eq!(decision.evidence, ["request is well-formed"]);

    let ctx = report.state.result("ctx").expect("ctx has a result");
    assert!((ctx.confidence - 0.95).abs() < 1e-9);
    let think = report.state.result("think").expect("think has a result");
    assert!((think.confidence - 0.8).abs() < 1e-9);
    assert!(report.state.result("safety").is_none());
    assert_eq!(scripted.call_count(), 3);
}

#[tokio::test]
async fn data_connections_carry_outputs_downstream() {
    let workflow = WorkflowBuilder::new("pipeline")
        .goal("goal", "Summarize")
        .block_with("produce", BlockType::Context, "Fetch", |b| b)
        .block_with("consume", BlockType::Reasoning, "Summarize", |b| b)
        .exit("done", "Done")
        .connect("goal", "produce")
        .connect("produce", "consume")
        .connect("consume", "done")
        .connect_data("produce", "consume")
        .build();

    let executor = std::sync::Arc::new(StaticExecutor::new(0.8));
    let registry = ExecutorRegistry::new()
        .register(BlockType::Context, std::sync::Arc::clone(&executor))
        .register(BlockType::Reasoning, executor);
    let engine = silent_engine(registry);

    let report = engine.run(&workflow).await.expect("run should complete");
    assert!(report.succeeded());

    let consumed = report.state.result("consume").expect("consume has a result");
    assert_eq!(consumed.output["inputs"]["data_input"]["from"], json!("produce"));
}

#[tokio::test]
async fn passing_checks_cap_confidence_by_their_weakest_score() {
    let workflow = linear_with(|b| {
        b.with_check(CheckSpec::CheckHallucinations { max_risk: 0.5 })
    });
    let scripted = ScriptedExecutor::new(0.8).then_ok(
        "work",
        BlockResult::new(json!("grounded answer"), 0.9)
            .with_metadata(HALLUCINATION_RISK_KEY, json!(0.4)),
    );
    let registry = ExecutorRegistry::new().register(BlockType::Reasoning, scripted);
    let engine = silent_engine(registry);

    let report = engine.run(&workflow).await.expect("run should complete");
    assert!(report.succeeded());

    // Risk 0.4 scores 0.6, below the executor's own 0.9.
    let result = report.state.result("work").expect("work has a result");
    assert!((result.confidence - 0.6).abs() < 1e-9, "{}", result.confidence);
    assert!(!result.is_degraded());

    assert_eq!(count_kind(&report.trace, "evaluation"), 1);
    let completed = report
        .trace
        .iter()
        .find_map(|record| match &record.event {
            TraceEvent::BlockCompleted {
                block_id,
                confidence,
                degraded,
                ..
            } if block_id == "work" => Some((*confidence, *degraded)),
            _ => None,
        })
        .expect("work completed");
    assert!((completed.0 - 0.6).abs() < 1e-9);
    assert!(!completed.1);
}

#[tokio::test]
async fn an_edgeless_human_verification_block_completes_the_run() {
    let workflow = WorkflowBuilder::new("approval")
        .goal("goal", "Draft")
        .block_with("verify", BlockType::HumanVerification, "Sign-off", |b| b)
        .connect("goal", "verify")
        .build();
    let registry =
        ExecutorRegistry::new().register(BlockType::HumanVerification, StaticExecutor::new(0.75));
    let engine = silent_engine(registry);

    let report = engine.run(&workflow).await.expect("run should complete");
    assert!(report.succeeded());
    assert_eq!(report.steps, 2);
    assert!(report.summary.contains("terminal"), "{}", report.summary);
    assert_eq!(report.state.block_state("verify"), BlockState::Done);
}

/// Fails any output that does not mention the product name.
struct BrandVoice;

#[async_trait]
impl EvaluationCheck for BrandVoice {
    fn name(&self) -> &str {
        "brand_voice"
    }

    async fn evaluate(&self, result: &BlockResult) -> CheckReport {
        match result.output.as_str() {
            Some(text) if text.contains("Reasonflow") => {
                CheckReport::pass(self.name(), 1.0, "on message")
            }
            _ => CheckReport::fail(self.name(), 0.0, "does not mention the product"),
        }
    }
}

#[tokio::test]
async fn custom_checks_run_under_their_registered_name() {
    let workflow = linear_with(|b| {
        b.with_check(CheckSpec::Custom {
            name: "brand_voice".to_string(),
        })
    });
    let scripted = ScriptedExecutor::new(0.8)
        .then_ok("work", BlockResult::new(json!("Reasonflow ships today"), 0.8));
    let registry = ExecutorRegistry::new().register(BlockType::Reasoning, scripted);
    let engine = silent_engine(registry).register_check(BrandVoice);

    let report = engine.run(&workflow).await.expect("run should complete");
    assert!(report.succeeded());

    let criteria: Vec<&str> = report
        .trace
        .iter()
        .filter_map(|record| match &record.event {
            TraceEvent::Evaluation(event) => Some(event.report.criteria.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(criteria, ["brand_voice"]);
}

#[tokio::test]
async fn printed_reports_carry_their_failure_digest() {
    let scripted = ScriptedExecutor::new(0.8).then_err("work", "boom");
    let registry = ExecutorRegistry::new().register(BlockType::Reasoning, scripted);
    let engine = silent_engine(registry);

    let report = engine.run(&linear()).await.expect("run should finish");
    assert_eq!(report.status, RunStatus::Failed);

    let printed = report.to_string();
    assert!(printed.contains(&report.summary), "{printed}");
    assert!(printed.contains("1. executor work (step"), "{printed}");
    assert!(printed.contains("boom"), "{printed}");

    // A clean run prints as the outcome line alone.
    let registry =
        ExecutorRegistry::new().register(BlockType::Reasoning, StaticExecutor::new(0.9));
    let report = silent_engine(registry)
        .run(&linear())
        .await
        .expect("run should complete");
    assert!(!report.to_string().contains('\n'));
}

#[tokio::test]
async fn reports_survive_a_serde_round_trip() {
    let registry =
        ExecutorRegistry::new().register(BlockType::Reasoning, StaticExecutor::new(0.9));
    let engine = silent_engine(registry);
    let report = engine.run(&linear()).await.expect("run should complete");

    let json = serde_json::to_string(&report).expect("report serializes");
    let parsed: reasonflow::engine::RunReport =
        serde_json::from_str(&json).expect("report parses");
    assert_eq!(parsed, report);
}
