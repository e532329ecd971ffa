//! The execution engine: a single-cursor walk over a validated workflow.
//!
//! [`Engine`] is the long-lived entry point. It owns the executor registry,
//! the custom-check registry, and the trace configuration; each call to
//! [`Engine::run`] or [`Engine::start`] validates the workflow, snapshots it,
//! and drives one run to a terminal [`RunReport`]. Runs never share state,
//! so one engine can host any number of them concurrently.
//!
//! # Walk Semantics
//!
//! A single cursor moves along execution connections, executing one block
//! per step. Goal and Exit blocks are handled natively. Gateway blocks fork
//! through [`arbitrate`](crate::arbitration::arbitrate). Every other type
//! dispatches to its registered [`BlockExecutor`]. Evaluation checks gate
//! each executed result, and failures of any kind resolve through the
//! block's recovery policy. The walk ends at a terminal block, on an
//! unrecovered failure, or when the run is cancelled.
//!
//! # Quick Start
//!
//! ```
//! use async_trait::async_trait;
//! use serde_json::json;
//!
//! use reasonflow::engine::{Engine, EngineConfig, TraceConfig};
//! use reasonflow::executor::{
//!     BlockExecutor, BlockResult, DataInputs, ExecutorContext, ExecutorError, ExecutorRegistry,
//! };
//! use reasonflow::graph::{Block, WorkflowBuilder};
//! use reasonflow::types::BlockType;
//!
//! struct Echo;
//!
//! #[async_trait]
//! impl BlockExecutor for Echo {
//!     async fn execute(
//!         &self,
//!         block: &Block,
//!         _inputs: &DataInputs,
//!         _ctx: ExecutorContext,
//!     ) -> Result<BlockResult, ExecutorError> {
//!         Ok(BlockResult::new(json!({ "from": block.id.clone() }), 0.9))
//!     }
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> miette::Result<()> {
//! let workflow = WorkflowBuilder::new("triage")
//!     .goal("goal", "Answer the question")
//!     .block_with("think", BlockType::Reasoning, "Think", |b| b)
//!     .exit("done", "Done")
//!     .connect("goal", "think")
//!     .connect("think", "done")
//!     .build();
//!
//! let executors = ExecutorRegistry::new().register(BlockType::Reasoning, Echo);
//! let engine = Engine::with_config(
//!     executors,
//!     EngineConfig::new().with_trace(TraceConfig::silent()),
//! );
//!
//! let report = engine.run(&workflow).await?;
//! assert!(report.succeeded());
//! # Ok(())
//! # }
//! ```

use std::sync::{Arc, Mutex};

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::instrument;
use uuid::Uuid;

use super::config::EngineConfig;
use super::report::{HumanDecision, RunHandle, RunReport};
use crate::arbitration::{
    self, ArbitrationAmbiguity, ArbitrationError, ArbitrationStrategy,
};
use crate::evaluation::{
    CheckSpec, EvaluationCheck, EvaluationFailure, EvaluationSuite, EvaluationVerdict,
};
use crate::executor::{
    BlockResult, DataInputs, ExecutorContext, ExecutorError, ExecutorRegistry,
};
use crate::graph::properties::BlockProperties;
use crate::graph::{validate, Block, Connection, ValidationReport, Workflow};
use crate::recovery::{self, RecoveryAction, RecoveryExhausted, RecoveryStrategy};
use crate::state::{BlockState, ErrorDetail, ExecutionError, ExecutionState, RunStatus};
use crate::trace::{
    ArbitrationEvent, EvaluationEvent, RecoveryEvent, TraceBus, TraceEvent, TraceRecord,
};
use crate::types::BlockType;

// ============================================================================
// Errors
// ============================================================================

/// Failure to accept, drive, or join a run.
///
/// Preflight problems (validation, missing executors, unknown checks) are
/// reported here before a single step executes. Failures *inside* a run are
/// not errors at this level: they resolve through recovery and, at worst,
/// end the run with [`RunStatus::Failed`](crate::state::RunStatus::Failed)
/// in its [`RunReport`].
#[derive(Debug, Error, Diagnostic)]
pub enum EngineError {
    /// The workflow is structurally invalid; the report lists every
    /// violation found.
    #[error("workflow failed validation with {} error(s)", report.len())]
    #[diagnostic(
        code(reasonflow::engine::validation_failed),
        help("run validate() and fix every reported violation")
    )]
    ValidationFailed { report: ValidationReport },

    /// A block's type has no registered executor.
    #[error("no executor registered for {block_type} block {block_id:?}")]
    #[diagnostic(
        code(reasonflow::engine::missing_executor),
        help("register an implementation with ExecutorRegistry::register")
    )]
    MissingExecutor {
        block_id: String,
        block_type: BlockType,
    },

    /// A block references a custom check the engine does not know.
    #[error("block {block_id:?} references unknown custom check {name:?}")]
    #[diagnostic(
        code(reasonflow::engine::unknown_check),
        help("register the check with Engine::register_check before running")
    )]
    UnknownCheck { block_id: String, name: String },

    /// A block escalated but the run has no channel a reviewer could
    /// answer on.
    #[error("block {block_id:?} escalated but no reviewer channel exists")]
    #[diagnostic(
        code(reasonflow::engine::unexpected_suspension),
        help("drive escalating workflows with Engine::start, which carries a decision channel")
    )]
    UnexpectedSuspension { block_id: String },

    /// The run already terminated; decisions can no longer reach it.
    #[error("run {run_id} is no longer active")]
    #[diagnostic(code(reasonflow::engine::run_not_active))]
    RunNotActive { run_id: Uuid },

    /// The spawned run task panicked or was aborted.
    #[error("run task failed to join")]
    #[diagnostic(code(reasonflow::engine::join))]
    Join(#[from] tokio::task::JoinError),
}

// ============================================================================
// Engine
// ============================================================================

/// Executes workflows.
///
/// Construction is cheap; the engine holds only registries and
/// configuration. See the [module docs](self) for the walk semantics.
pub struct Engine {
    executors: ExecutorRegistry,
    checks: FxHashMap<String, Arc<dyn EvaluationCheck>>,
    config: EngineConfig,
    /// Trace history handles per run, for replay after (or during) a run.
    histories: Mutex<FxHashMap<Uuid, Arc<Mutex<Vec<TraceRecord>>>>>,
}

impl Engine {
    /// An engine with the default configuration (stdout trace rendering).
    #[must_use]
    pub fn new(executors: ExecutorRegistry) -> Self {
        Self::with_config(executors, EngineConfig::default())
    }

    #[must_use]
    pub fn with_config(executors: ExecutorRegistry, config: EngineConfig) -> Self {
        Self {
            executors,
            checks: FxHashMap::default(),
            config,
            histories: Mutex::new(FxHashMap::default()),
        }
    }

    /// Registers a named check that workflows reference as
    /// `{"check": "custom", "name": ...}`.
    #[must_use]
    pub fn register_check(mut self, check: impl EvaluationCheck + 'static) -> Self {
        let check: Arc<dyn EvaluationCheck> = Arc::new(check);
        self.checks.insert(check.name().to_string(), check);
        self
    }

    /// Runs a workflow to completion on the current task.
    ///
    /// The walk starts at the first Goal block in declaration order. There
    /// is no reviewer channel here, so a block that escalates fails the
    /// call with [`EngineError::UnexpectedSuspension`]; drive workflows
    /// that escalate with [`Engine::start`] instead.
    #[instrument(skip(self, workflow), fields(workflow_id = %workflow.id), err)]
    pub async fn run(&self, workflow: &Workflow) -> Result<RunReport, EngineError> {
        let ctx = self.prepare(workflow)?;
        drive(ctx, None).await
    }

    /// Spawns a workflow run and returns a handle to it.
    ///
    /// The handle cancels the run, feeds reviewer decisions to escalated
    /// blocks, and exposes the live event stream. The stream is subscribed
    /// before the run starts, so its first consumer sees every record.
    #[instrument(skip(self, workflow), fields(workflow_id = %workflow.id), err)]
    pub fn start(&self, workflow: &Workflow) -> Result<RunHandle, EngineError> {
        let ctx = self.prepare(workflow)?;
        let run_id = ctx.bus.run_id();
        let cancel = ctx.cancel.clone();
        let events = ctx.bus.subscribe();
        let (decisions_tx, decisions_rx) = flume::unbounded();
        let join = tokio::spawn(drive(ctx, Some(decisions_rx)));
        Ok(RunHandle::new(run_id, cancel, decisions_tx, events, join))
    }

    /// Snapshot of a run's trace history so far, in emission order.
    ///
    /// Works while the run is still in flight and after it terminated.
    /// Returns `None` for run ids this engine never issued.
    #[must_use]
    pub fn trace_history(&self, run_id: Uuid) -> Option<Vec<TraceRecord>> {
        let histories = self.histories.lock().expect("run history registry poisoned");
        let handle = histories.get(&run_id)?;
        let history = handle.lock().expect("trace history poisoned");
        Some(history.clone())
    }

    /// Drops the retained trace history of a run.
    ///
    /// Histories are kept after termination so observers can replay a run
    /// whenever they get around to it; a long-lived engine reclaims that
    /// memory here once a run's report has been collected. Returns `false`
    /// for run ids this engine never issued (or already discarded).
    pub fn discard_history(&self, run_id: Uuid) -> bool {
        self.histories
            .lock()
            .expect("run history registry poisoned")
            .remove(&run_id)
            .is_some()
    }

    /// Preflight: validate, resolve registries, and assemble the run
    /// context. Nothing observable happens until the walk starts.
    fn prepare(&self, workflow: &Workflow) -> Result<RunContext, EngineError> {
        let report = validate(workflow);
        if !report.is_valid() {
            return Err(EngineError::ValidationFailed { report });
        }

        if let Some((block_id, block_type)) = self.executors.missing_for(workflow).first() {
            return Err(EngineError::MissingExecutor {
                block_id: (*block_id).to_string(),
                block_type: *block_type,
            });
        }

        for block in &workflow.blocks {
            for spec in &block.checks {
                if let CheckSpec::Custom { name } = spec {
                    if !self.checks.contains_key(name) {
                        return Err(EngineError::UnknownCheck {
                            block_id: block.id.clone(),
                            name: name.clone(),
                        });
                    }
                }
            }
        }

        let entry = workflow
            .blocks
            .iter()
            .find(|b| b.block_type == BlockType::Goal);
        let Some(entry) = entry else {
            // validate() reports MissingGoal before we can get here.
            return Err(EngineError::ValidationFailed { report });
        };
        let entry_block_id = entry.id.clone();

        let run_id = Uuid::new_v4();
        let bus = self.config.trace.build_trace_bus(run_id);
        if !self.config.trace.sinks().is_empty() {
            bus.start_sink_worker();
        }
        self.histories
            .lock()
            .expect("run history registry poisoned")
            .insert(run_id, bus.history_handle());

        Ok(RunContext {
            workflow: Arc::new(workflow.clone()),
            entry_block_id,
            executors: self.executors.clone(),
            checks: self.checks.clone(),
            bus,
            cancel: CancellationToken::new(),
        })
    }
}

/// Everything one run owns. The workflow is snapshotted at submission;
/// edits made to the caller's copy afterwards cannot affect the walk.
struct RunContext {
    workflow: Arc<Workflow>,
    entry_block_id: String,
    executors: ExecutorRegistry,
    checks: FxHashMap<String, Arc<dyn EvaluationCheck>>,
    bus: TraceBus,
    cancel: CancellationToken,
}

/// Drives one run from its entry block to a terminal report.
async fn drive(
    ctx: RunContext,
    decisions: Option<flume::Receiver<HumanDecision>>,
) -> Result<RunReport, EngineError> {
    let RunContext {
        workflow,
        entry_block_id,
        executors,
        checks,
        bus,
        cancel,
    } = ctx;

    let mut state = ExecutionState::new(bus.run_id(), workflow.id.clone());
    state.begin(&entry_block_id);
    bus.emit(TraceEvent::execution_started(&workflow.id, &entry_block_id));
    tracing::info!(
        target: "reasonflow::engine",
        run_id = %state.run_id,
        workflow = %workflow.id,
        entry = %entry_block_id,
        "run started"
    );

    let walk = Walk {
        workflow: workflow.as_ref(),
        executors: &executors,
        checks: &checks,
        bus: &bus,
        cancel: &cancel,
        decisions: decisions.as_ref(),
        state: &mut state,
    };
    let outcome = match walk.run().await {
        Ok(outcome) => outcome,
        Err(err) => {
            bus.stop_sink_worker().await;
            return Err(err);
        }
    };

    let (status, summary, closing) = match outcome {
        WalkOutcome::Completed { summary } => {
            let event = TraceEvent::execution_completed(&summary);
            (RunStatus::Completed, summary, event)
        }
        WalkOutcome::Failed { summary } => {
            let event = TraceEvent::execution_failed(&summary);
            (RunStatus::Failed, summary, event)
        }
        WalkOutcome::Cancelled => {
            let summary = "cancelled before completion".to_string();
            let event = TraceEvent::early_termination(&summary);
            (RunStatus::EarlyTerminated, summary, event)
        }
    };
    state.finish(status);
    bus.emit(closing);
    tracing::info!(
        target: "reasonflow::engine",
        run_id = %state.run_id,
        %status,
        steps = state.step,
        %summary,
        "run finished"
    );

    // Let the sink worker drain before the report is handed back.
    bus.stop_sink_worker().await;

    Ok(RunReport {
        run_id: state.run_id,
        workflow_id: state.workflow_id.clone(),
        status,
        summary,
        steps: state.step,
        state,
        trace: bus.history(),
    })
}

// ============================================================================
// The walk
// ============================================================================

/// How a walk ended, before it is folded into the report.
enum WalkOutcome {
    Completed { summary: String },
    Failed { summary: String },
    Cancelled,
}

/// One block failure on its way into recovery.
///
/// Evaluation and arbitration failures still carry the produced result, so
/// degrade and approval paths have something to accept; executor errors
/// carry nothing.
enum Failure {
    Executor(ExecutorError),
    Evaluation {
        failure: EvaluationFailure,
        result: BlockResult,
        /// Confidence the result would have carried had the checks passed.
        adjusted: f64,
    },
    Ambiguity {
        ambiguity: ArbitrationAmbiguity,
        result: BlockResult,
    },
}

impl Failure {
    fn has_result(&self) -> bool {
        matches!(self, Failure::Evaluation { .. } | Failure::Ambiguity { .. })
    }

    fn message(&self) -> String {
        match self {
            Failure::Executor(err) => err.to_string(),
            Failure::Evaluation { failure, .. } => failure.to_string(),
            Failure::Ambiguity { ambiguity, .. } => ambiguity.to_string(),
        }
    }
}

/// The cursor walk over one run. Borrows the run context; owns nothing.
struct Walk<'a> {
    workflow: &'a Workflow,
    executors: &'a ExecutorRegistry,
    checks: &'a FxHashMap<String, Arc<dyn EvaluationCheck>>,
    bus: &'a TraceBus,
    cancel: &'a CancellationToken,
    decisions: Option<&'a flume::Receiver<HumanDecision>>,
    state: &'a mut ExecutionState,
}

impl Walk<'_> {
    async fn run(mut self) -> Result<WalkOutcome, EngineError> {
        loop {
            if self.cancel.is_cancelled() {
                return Ok(WalkOutcome::Cancelled);
            }
            let Some(cursor) = self.state.cursor.clone() else {
                let summary = "cursor cleared while the run was still walking".to_string();
                self.state
                    .record_error(ExecutionError::engine(ErrorDetail::msg(summary.clone())));
                return Ok(WalkOutcome::Failed { summary });
            };
            let workflow = self.workflow;
            let Some(block) = workflow.block(&cursor) else {
                let summary = format!("cursor points at unknown block {cursor:?}");
                self.state
                    .record_error(ExecutionError::engine(ErrorDetail::msg(summary.clone())));
                return Ok(WalkOutcome::Failed { summary });
            };

            self.state.step += 1;
            let step = self.state.step;
            let span = tracing::info_span!(
                "step",
                step,
                block = %block.id,
                block_type = %block.block_type,
            );

            let flow = match block.block_type {
                BlockType::Goal | BlockType::Exit => {
                    span.in_scope(|| self.native_step(block, step))
                }
                BlockType::Gateway => span.in_scope(|| self.gateway_step(block, step)).await?,
                _ => span.in_scope(|| self.executor_step(block, step)).await?,
            };
            if let Some(outcome) = flow {
                return Ok(outcome);
            }
        }
    }

    /// Goal and Exit blocks: no executor, no checks, confidence 1.0.
    fn native_step(&mut self, block: &Block, step: u64) -> Option<WalkOutcome> {
        self.bus
            .emit(TraceEvent::block_started(&block.id, block.block_type, step));
        self.state.set_block_state(&block.id, BlockState::Done);
        self.state
            .record_result(&block.id, BlockResult::new(Value::Null, 1.0));
        self.bus
            .emit(TraceEvent::block_completed(&block.id, step, 1.0, false));
        if block.block_type == BlockType::Exit {
            return Some(WalkOutcome::Completed {
                summary: format!("reached exit {:?} after {step} step(s)", block.id),
            });
        }
        self.advance(block)
    }

    /// Any executor-backed, non-forking block.
    async fn executor_step(
        &mut self,
        block: &Block,
        step: u64,
    ) -> Result<Option<WalkOutcome>, EngineError> {
        self.bus
            .emit(TraceEvent::block_started(&block.id, block.block_type, step));
        self.state.set_block_state(&block.id, BlockState::Running);

        let Some(invoked) = self.invoke(block, step).await else {
            return Ok(Some(WalkOutcome::Cancelled));
        };
        let mut result = match invoked {
            Ok(result) => result,
            Err(err) => return self.recover(block, step, Failure::Executor(err)).await,
        };
        if let Err(err) = result.validate_confidence() {
            return self.recover(block, step, Failure::Executor(err)).await;
        }

        let verdict = self.evaluate(block, step, &result).await;
        let adjusted = verdict.adjusted_confidence(result.confidence);
        if verdict.failed() {
            let failure = Failure::Evaluation {
                failure: verdict.into_failure(&block.id),
                result,
                adjusted,
            };
            return self.recover(block, step, failure).await;
        }

        // Passing checks still cap confidence by the weakest score.
        result.confidence = adjusted;
        self.state.set_block_state(&block.id, BlockState::Done);
        self.state.record_result(&block.id, result);
        self.bus
            .emit(TraceEvent::block_completed(&block.id, step, adjusted, false));
        Ok(self.advance(block))
    }

    /// Gateway blocks: execute, then arbitrate over the outgoing branches.
    /// Gateways carry no evaluation checks; the confidence threshold is
    /// their quality gate.
    async fn gateway_step(
        &mut self,
        block: &Block,
        step: u64,
    ) -> Result<Option<WalkOutcome>, EngineError> {
        self.bus
            .emit(TraceEvent::block_started(&block.id, block.block_type, step));
        self.state.set_block_state(&block.id, BlockState::Running);

        let Some(invoked) = self.invoke(block, step).await else {
            return Ok(Some(WalkOutcome::Cancelled));
        };
        let result = match invoked {
            Ok(result) => result,
            Err(err) => return self.recover(block, step, Failure::Executor(err)).await,
        };
        if let Err(err) = result.validate_confidence() {
            return self.recover(block, step, Failure::Executor(err)).await;
        }

        let scores = result.branch_scores();
        let evidence = result.evidence();
        let workflow = self.workflow;
        let candidates: Vec<&Connection> =
            workflow.execution_connections_from(&block.id).collect();

        match arbitration::arbitrate(block, &candidates, &scores, evidence) {
            Ok(decision) => {
                let target = decision.chosen.target_block_id.clone();
                self.bus.emit(TraceEvent::Arbitration(
                    ArbitrationEvent::from_decision(step, &decision),
                ));
                let confidence = result.confidence;
                self.state.set_block_state(&block.id, BlockState::Done);
                self.state.record_result(&block.id, result);
                self.bus
                    .emit(TraceEvent::block_completed(&block.id, step, confidence, false));
                self.state.cursor = Some(target);
                Ok(None)
            }
            Err(ArbitrationError::Ambiguous(ambiguity)) => {
                let strategy = match &block.properties {
                    BlockProperties::Gateway(props) => props.strategy,
                    _ => ArbitrationStrategy::default(),
                };
                self.bus.emit(TraceEvent::Arbitration(ArbitrationEvent::ambiguous(
                    step, strategy, &ambiguity,
                )));
                self.recover(block, step, Failure::Ambiguity { ambiguity, result })
                    .await
            }
            Err(err @ ArbitrationError::NoCandidates { .. }) => {
                let summary = err.to_string();
                self.state.record_error(ExecutionError::arbitration(
                    &block.id,
                    ErrorDetail::msg(summary.clone()),
                ));
                self.state.set_block_state(&block.id, BlockState::Errored);
                self.bus
                    .emit(TraceEvent::block_error(&block.id, step, summary.clone()));
                Ok(Some(WalkOutcome::Failed { summary }))
            }
        }
    }

    /// Calls the block's executor, racing it against cancellation.
    /// `None` means the run was cancelled mid-call.
    async fn invoke(
        &self,
        block: &Block,
        step: u64,
    ) -> Option<Result<BlockResult, ExecutorError>> {
        let Some(executor) = self.executors.get(block.block_type) else {
            // Guarded at run start; kept as an error rather than a panic.
            return Some(Err(ExecutorError::Unsupported {
                block_type: block.block_type,
                block_id: block.id.clone(),
            }));
        };
        let inputs = resolve_data_inputs(self.workflow, self.state, &block.id);
        let ctx = ExecutorContext {
            run_id: self.state.run_id,
            block_id: block.id.clone(),
            step,
            cancel: self.cancel.clone(),
        };
        tokio::select! {
            _ = self.cancel.cancelled() => None,
            result = executor.execute(block, &inputs, ctx) => Some(result),
        }
    }

    /// Runs the block's checks and puts one evaluation event per report on
    /// the trace.
    async fn evaluate(
        &self,
        block: &Block,
        step: u64,
        result: &BlockResult,
    ) -> EvaluationVerdict {
        let mut checks = Vec::with_capacity(block.checks.len());
        for spec in &block.checks {
            match spec.instantiate() {
                Some(check) => checks.push(check),
                // Custom names were resolved against the registry at run
                // start.
                None => {
                    if let Some(check) = self.checks.get(spec.name()) {
                        checks.push(Arc::clone(check));
                    }
                }
            }
        }
        let verdict = EvaluationSuite::new(checks).run(result).await;
        for report in &verdict.reports {
            self.bus.emit(TraceEvent::Evaluation(EvaluationEvent::new(
                &block.id,
                step,
                report.clone(),
            )));
        }
        verdict
    }

    /// Resolves a failed block through its recovery policy.
    async fn recover(
        &mut self,
        block: &Block,
        step: u64,
        failure: Failure,
    ) -> Result<Option<WalkOutcome>, EngineError> {
        self.record_failure(block, step, &failure);
        self.state.set_block_state(&block.id, BlockState::Errored);

        let retries_used = self.state.retries_used(&block.id);
        let action = recovery::resolve(block.recovery.as_ref(), retries_used, failure.has_result());
        tracing::debug!(
            target: "reasonflow::engine",
            block = %block.id,
            ?action,
            "recovery resolved"
        );

        match action {
            RecoveryAction::RetryBlock { attempt, max } => {
                self.bus.emit(TraceEvent::Recovery(RecoveryEvent::retry(
                    &block.id, step, attempt, max,
                )));
                self.state.note_retry(&block.id);
                self.state.set_block_state(&block.id, BlockState::Retrying);
                // Cursor stays put; the next loop pass re-executes the block.
                Ok(None)
            }
            RecoveryAction::Reroute { target } => {
                self.bus.emit(TraceEvent::Recovery(RecoveryEvent::fallback(
                    &block.id, step, &target,
                )));
                if !self.workflow.has_block(&target) {
                    let summary = format!("fallback target {target:?} does not exist");
                    self.state
                        .record_error(ExecutionError::engine(ErrorDetail::msg(summary.clone())));
                    self.state.set_block_state(&block.id, BlockState::Aborted);
                    return Ok(Some(WalkOutcome::Failed { summary }));
                }
                self.state.cursor = Some(target);
                Ok(None)
            }
            RecoveryAction::AcceptDegraded => match failure {
                Failure::Evaluation {
                    result, adjusted, ..
                } => {
                    self.bus
                        .emit(TraceEvent::Recovery(RecoveryEvent::degrade(&block.id, step)));
                    self.accept_degraded(&block.id, step, result, adjusted);
                    Ok(self.advance(block))
                }
                Failure::Ambiguity { ambiguity, result } => {
                    self.bus
                        .emit(TraceEvent::Recovery(RecoveryEvent::degrade(&block.id, step)));
                    let confidence = result.confidence;
                    self.accept_degraded(&block.id, step, result, confidence);
                    // An ambiguity still names a best branch; a degraded
                    // gateway takes it.
                    self.state.cursor = Some(ambiguity.target_block_id);
                    Ok(None)
                }
                // resolve() never degrades a hard error.
                other @ Failure::Executor(_) => Ok(Some(self.abort(block, &other))),
            },
            RecoveryAction::Suspend => self.suspend(block, step, failure).await,
            RecoveryAction::Abort => Ok(Some(self.abort(block, &failure))),
        }
    }

    /// Parks the walk at an escalated block until a reviewer decides.
    async fn suspend(
        &mut self,
        block: &Block,
        step: u64,
        failure: Failure,
    ) -> Result<Option<WalkOutcome>, EngineError> {
        self.bus
            .emit(TraceEvent::Recovery(RecoveryEvent::escalate(&block.id, step)));
        self.state.set_block_state(&block.id, BlockState::Escalated);
        let Some(decisions) = self.decisions else {
            // run() has no decision channel; only start() hosts escalations.
            return Err(EngineError::UnexpectedSuspension {
                block_id: block.id.clone(),
            });
        };
        tracing::info!(
            target: "reasonflow::engine",
            block = %block.id,
            "run suspended pending human review"
        );

        let decision = tokio::select! {
            _ = self.cancel.cancelled() => return Ok(Some(WalkOutcome::Cancelled)),
            received = decisions.recv_async() => match received {
                Ok(decision) => decision,
                // Every handle is gone; nobody can resume this run.
                Err(_) => {
                    return Err(EngineError::UnexpectedSuspension {
                        block_id: block.id.clone(),
                    })
                }
            },
        };

        match decision {
            // The block stays Escalated on the record; the result (if any)
            // is accepted as-is and the walk moves on.
            HumanDecision::Approve => {
                tracing::info!(
                    target: "reasonflow::engine",
                    block = %block.id,
                    "reviewer approved"
                );
                match failure {
                    Failure::Evaluation {
                        mut result,
                        adjusted,
                        ..
                    } => {
                        result.confidence = adjusted;
                        self.state.record_result(&block.id, result);
                        self.bus
                            .emit(TraceEvent::block_completed(&block.id, step, adjusted, false));
                        Ok(self.advance(block))
                    }
                    Failure::Ambiguity { ambiguity, result } => {
                        let confidence = result.confidence;
                        self.state.record_result(&block.id, result);
                        self.bus.emit(TraceEvent::block_completed(
                            &block.id, step, confidence, false,
                        ));
                        self.state.cursor = Some(ambiguity.target_block_id);
                        Ok(None)
                    }
                    // Nothing to record; the reviewer waved the failure
                    // through.
                    Failure::Executor(_) => Ok(self.advance(block)),
                }
            }
            HumanDecision::Reject { reason } => {
                let attempt = self.state.retries_used(&block.id);
                self.state.record_error(ExecutionError::recovery(
                    &block.id,
                    attempt,
                    ErrorDetail::msg(format!("rejected by reviewer: {reason}")),
                ));
                self.state.set_block_state(&block.id, BlockState::Aborted);
                Ok(Some(WalkOutcome::Failed {
                    summary: format!("rejected at block {:?}: {reason}", block.id),
                }))
            }
        }
    }

    /// Records the failure in the state and, where appropriate, on the
    /// trace.
    fn record_failure(&mut self, block: &Block, step: u64, failure: &Failure) {
        match failure {
            Failure::Executor(err) => {
                self.state.record_error(ExecutionError::executor(
                    &block.id,
                    step,
                    ErrorDetail::msg(err.to_string()),
                ));
                self.bus
                    .emit(TraceEvent::block_error(&block.id, step, err.to_string()));
            }
            Failure::Evaluation { failure, .. } => {
                let check = failure
                    .failed_criteria()
                    .first()
                    .copied()
                    .unwrap_or("unknown")
                    .to_string();
                let detail = ErrorDetail::msg(failure.to_string())
                    .with_details(serde_json::to_value(&failure.reports).unwrap_or(Value::Null));
                self.state
                    .record_error(ExecutionError::evaluation(&block.id, check, detail));
                self.bus
                    .emit(TraceEvent::block_error(&block.id, step, failure.to_string()));
            }
            Failure::Ambiguity { ambiguity, .. } => {
                // The arbitration event with no chosen branch is already on
                // the trace; a block_error would double-report it.
                self.state.record_error(ExecutionError::arbitration(
                    &block.id,
                    ErrorDetail::msg(ambiguity.to_string()),
                ));
            }
        }
    }

    /// Accepts a failing result under the degrade policy.
    fn accept_degraded(
        &mut self,
        block_id: &str,
        step: u64,
        mut result: BlockResult,
        confidence: f64,
    ) {
        result.mark_degraded();
        result.confidence = confidence;
        self.state.set_block_state(block_id, BlockState::Degraded);
        self.state.record_result(block_id, result);
        self.bus
            .emit(TraceEvent::block_completed(block_id, step, confidence, true));
    }

    /// Ends the run over an unrecovered failure, with a summary that names
    /// the policy that gave up.
    fn abort(&mut self, block: &Block, failure: &Failure) -> WalkOutcome {
        let message = failure.message();
        let summary = match block.recovery.as_ref() {
            None => format!(
                "block {:?} failed with no recovery configured: {message}",
                block.id
            ),
            Some(policy) => match policy.strategy {
                RecoveryStrategy::Retry => {
                    let exhausted = RecoveryExhausted {
                        block_id: block.id.clone(),
                        max_retries: policy.max_retries,
                    };
                    let attempt = self.state.retries_used(&block.id);
                    let summary = exhausted.to_string();
                    self.state.record_error(ExecutionError::recovery(
                        &block.id,
                        attempt,
                        ErrorDetail::msg(summary.clone()),
                    ));
                    summary
                }
                RecoveryStrategy::Fail => {
                    format!("recovery policy failed block {:?}: {message}", block.id)
                }
                RecoveryStrategy::Degrade => {
                    format!("block {:?} had no result to degrade to: {message}", block.id)
                }
                RecoveryStrategy::Fallback => {
                    format!(
                        "block {:?} has a fallback policy with no target: {message}",
                        block.id
                    )
                }
                // resolve() maps escalate to suspension, never to abort.
                RecoveryStrategy::Escalate => {
                    format!("block {:?} failed: {message}", block.id)
                }
            },
        };
        self.state.set_block_state(&block.id, BlockState::Aborted);
        WalkOutcome::Failed { summary }
    }

    /// Moves the cursor along the block's first outbound execution
    /// connection.
    ///
    /// Edgeless terminal-type blocks complete the run. An edgeless block of
    /// any other type is a dead end validation cannot always rule out, and
    /// fails the run.
    fn advance(&mut self, block: &Block) -> Option<WalkOutcome> {
        let next = self
            .workflow
            .execution_connections_from(&block.id)
            .next()
            .map(|conn| conn.target_block_id.clone());
        match next {
            Some(target) => {
                self.state.cursor = Some(target);
                None
            }
            None if block.block_type.is_terminal() => Some(WalkOutcome::Completed {
                summary: format!(
                    "reached terminal block {:?} after {} step(s)",
                    block.id, self.state.step
                ),
            }),
            None => {
                let summary = format!(
                    "block {:?} has no outbound execution connection",
                    block.id
                );
                self.state
                    .record_error(ExecutionError::engine(ErrorDetail::msg(summary.clone())));
                Some(WalkOutcome::Failed { summary })
            }
        }
    }
}

/// Gathers a block's data inputs from already-completed sources.
///
/// Sources are applied in completion order, so when several connections
/// feed the same pin the most recently completed writer wins.
fn resolve_data_inputs(
    workflow: &Workflow,
    state: &ExecutionState,
    block_id: &str,
) -> DataInputs {
    let mut inputs = DataInputs::default();
    for source_id in &state.completion_order {
        let Some(result) = state.result(source_id) else {
            continue;
        };
        for conn in workflow.data_connections_into(block_id) {
            if conn.source_block_id == *source_id {
                inputs.insert(conn.target_pin.clone(), result.output.clone());
            }
        }
    }
    inputs
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use serde_json::json;

    use crate::engine::config::TraceConfig;
    use crate::graph::{ValidationError, WorkflowBuilder};

    struct Echo {
        confidence: f64,
    }

    #[async_trait]
    impl crate::executor::BlockExecutor for Echo {
        async fn execute(
            &self,
            block: &Block,
            inputs: &DataInputs,
            _ctx: ExecutorContext,
        ) -> Result<BlockResult, ExecutorError> {
            Ok(BlockResult::new(
                json!({ "from": block.id.clone(), "inputs_seen": inputs.len() }),
                self.confidence,
            ))
        }
    }

    fn silent_engine(executors: ExecutorRegistry) -> Engine {
        Engine::with_config(
            executors,
            EngineConfig::new().with_trace(TraceConfig::silent()),
        )
    }

    fn linear() -> Workflow {
        WorkflowBuilder::new("wf")
            .goal("goal", "Do the thing")
            .block_with("work", BlockType::Reasoning, "Work", |b| b)
            .exit("done", "Done")
            .connect("goal", "work")
            .connect("work", "done")
            .build()
    }

    #[tokio::test]
    async fn invalid_workflows_never_start() {
        let workflow = WorkflowBuilder::new("wf").exit("done", "Done").build();
        let engine = silent_engine(ExecutorRegistry::new());
        let err = engine.run(&workflow).await.unwrap_err();
        let EngineError::ValidationFailed { report } = err else {
            panic!("expected a validation failure, got {err:?}");
        };
        assert!(report.errors.contains(&ValidationError::MissingGoal));
    }

    #[tokio::test]
    async fn missing_executors_are_caught_before_any_step() {
        let engine = silent_engine(ExecutorRegistry::new());
        let err = engine.run(&linear()).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::MissingExecutor {
                block_id,
                block_type: BlockType::Reasoning,
            } if block_id == "work"
        ));
    }

    #[tokio::test]
    async fn unknown_custom_checks_are_caught_before_any_step() {
        let workflow = WorkflowBuilder::new("wf")
            .goal("goal", "Do the thing")
            .block_with("work", BlockType::Reasoning, "Work", |b| {
                b.with_check(CheckSpec::Custom {
                    name: "brand_voice".into(),
                })
            })
            .exit("done", "Done")
            .connect("goal", "work")
            .connect("work", "done")
            .build();
        let engine = silent_engine(
            ExecutorRegistry::new().register(BlockType::Reasoning, Echo { confidence: 0.9 }),
        );
        let err = engine.run(&workflow).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::UnknownCheck { name, .. } if name == "brand_voice"
        ));
    }

    #[test]
    fn data_inputs_take_the_latest_completion() {
        let workflow = WorkflowBuilder::new("wf")
            .goal("goal", "g")
            .block_with("a", BlockType::Context, "A", |b| b)
            .block_with("b", BlockType::Context, "B", |b| b)
            .block_with("c", BlockType::Reasoning, "C", |b| b)
            .exit("done", "Done")
            .connect_data("a", "c")
            .connect_data("b", "c")
            .build();
        let mut state = ExecutionState::new(Uuid::new_v4(), "wf");
        state.record_result("a", BlockResult::new(json!("first"), 0.9));
        state.record_result("b", BlockResult::new(json!("second"), 0.9));
        let inputs = resolve_data_inputs(&workflow, &state, "c");
        assert_eq!(inputs.get("data_input"), Some(&json!("second")));

        // A re-completion of "a" makes it the latest writer again.
        state.record_result("a", BlockResult::new(json!("third"), 0.9));
        let inputs = resolve_data_inputs(&workflow, &state, "c");
        assert_eq!(inputs.get("data_input"), Some(&json!("third")));
    }

    #[tokio::test]
    async fn straight_line_run_completes() {
        let engine = silent_engine(
            ExecutorRegistry::new().register(BlockType::Reasoning, Echo { confidence: 0.9 }),
        );
        let report = engine.run(&linear()).await.unwrap();
        assert!(report.succeeded());
        assert_eq!(report.steps, 3);
        assert_eq!(report.state.result("work").unwrap().confidence, 0.9);

        let kinds: Vec<&str> = report.trace.iter().map(|r| r.event.kind()).collect();
        assert_eq!(kinds.first().copied(), Some("execution_started"));
        assert_eq!(kinds.last().copied(), Some("execution_completed"));
    }

    #[tokio::test]
    async fn trace_history_remains_queryable_after_the_run() {
        let engine = silent_engine(
            ExecutorRegistry::new().register(BlockType::Reasoning, Echo { confidence: 0.9 }),
        );
        let report = engine.run(&linear()).await.unwrap();
        let replay = engine.trace_history(report.run_id).unwrap();
        assert_eq!(replay, report.trace);
        assert!(engine.trace_history(Uuid::new_v4()).is_none());
    }
}
