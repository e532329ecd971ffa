//! # Reasonflow: Confidence-Scored Reasoning Workflows
//!
//! Reasonflow executes reasoning workflows: directed graphs of typed logic
//! blocks walked by a single cursor, where every result carries a confidence
//! score, every fork is arbitrated and audited, and every failure resolves
//! through an explicit recovery policy.
//!
//! ## Core Concepts
//!
//! - **Blocks**: Typed logic nodes (goal, context, gateway, reasoning,
//!   fallback, trace, exit, human verification)
//! - **Dual-flow connections**: Execution edges route the cursor, data edges
//!   carry values between blocks
//! - **Executors**: Async implementations registered per block type that do
//!   the actual work and score their own output
//! - **Evaluation checks**: Declarative quality gates over each result
//! - **Recovery**: Per-block retry / fallback / degrade / escalate / fail
//!   policies
//! - **Trace**: An append-only, streamable event history for every run
//!
//! ## Quick Start
//!
//! ### Authoring a Workflow
//!
//! Workflows are plain values built with [`graph::WorkflowBuilder`] and
//! checked by [`graph::validate`], which reports every structural problem at
//! once:
//!
//! ```
//! use reasonflow::graph::{validate, WorkflowBuilder};
//! use reasonflow::recovery::RecoveryPolicy;
//! use reasonflow::types::BlockType;
//!
//! let workflow = WorkflowBuilder::new("support-triage")
//!     .goal("goal", "Answer the customer")
//!     .block_with("draft", BlockType::Reasoning, "Draft a reply", |b| {
//!         b.with_recovery(RecoveryPolicy::retry(2).with_fallback_target("canned"))
//!     })
//!     .block_with("canned", BlockType::Fallback, "Canned reply", |b| b)
//!     .exit("done", "Send")
//!     .connect("goal", "draft")
//!     .connect("draft", "done")
//!     .connect("canned", "done")
//!     .build();
//!
//! let report = validate(&workflow);
//! assert!(report.is_valid(), "{report}");
//! ```
//!
//! ### Executing It
//!
//! The engine needs one [`executor::BlockExecutor`] per executable block
//! type. Executors return a [`executor::BlockResult`]: a JSON output plus
//! the confidence the engine threads through the rest of the run.
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
//! struct Drafter;
//!
//! #[async_trait]
//! impl BlockExecutor for Drafter {
//!     async fn execute(
//!         &self,
//!         block: &Block,
//!         inputs: &DataInputs,
//!         _ctx: ExecutorContext,
//!     ) -> Result<BlockResult, ExecutorError> {
//!         let context = inputs.get("data_input").cloned().unwrap_or(json!(null));
//!         Ok(BlockResult::new(
//!             json!({ "reply": "…", "context": context, "block": block.id.clone() }),
//!             0.87,
//!         ))
//!     }
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> miette::Result<()> {
//! reasonflow::telemetry::init_tracing();
//!
//! let workflow = WorkflowBuilder::new("reply")
//!     .goal("goal", "Answer the customer")
//!     .block_with("draft", BlockType::Reasoning, "Draft", |b| b)
//!     .exit("done", "Send")
//!     .connect("goal", "draft")
//!     .connect("draft", "done")
//!     .build();
//!
//! let executors = ExecutorRegistry::new().register(BlockType::Reasoning, Drafter);
//! let engine = Engine::with_config(
//!     executors,
//!     EngineConfig::new().with_trace(TraceConfig::silent()),
//! );
//!
//! let report = engine.run(&workflow).await?;
//! assert!(report.succeeded());
//! assert_eq!(report.state.result("draft").unwrap().confidence, 0.87);
//! # Ok(())
//! # }
//! ```
//!
//! ### Observing a Run
//!
//! [`Engine::start`](engine::Engine::start) returns a
//! [`RunHandle`](engine::RunHandle) whose event stream delivers
//! [`trace::TraceRecord`]s live; the same records stay queryable afterwards
//! through the report or
//! [`Engine::trace_history`](engine::Engine::trace_history). Escalated
//! blocks park the run until the handle feeds it a
//! [`HumanDecision`](engine::HumanDecision).
//!
//! ## Error Handling
//!
//! Fallible APIs return typed errors implementing
//! [`miette::Diagnostic`], so callers get error codes and help text along
//! with the message:
//!
//! ```
//! use reasonflow::graph::{validate, WorkflowBuilder};
//!
//! // A workflow with no goal block fails validation.
//! let workflow = WorkflowBuilder::new("broken").exit("done", "Done").build();
//! let report = validate(&workflow);
//! assert!(!report.is_valid());
//! assert!(report.to_string().contains("no goal block"));
//! ```
//!
//! ## Module Guide
//!
//! - [`types`] - The closed set of block types
//! - [`graph`] - Workflow model, builder, persistence, validation
//! - [`executor`] - The executor trait, results, and the registry
//! - [`evaluation`] - Built-in and custom quality checks
//! - [`arbitration`] - Gateway branch selection
//! - [`recovery`] - Failure policies and their resolution
//! - [`state`] - Per-run execution state and error records
//! - [`trace`] - Event history, live streaming, and sinks
//! - [`engine`] - The execution engine and run handles
//! - [`telemetry`] - Trace formatting and `tracing` setup

pub mod arbitration;
pub mod engine;
pub mod evaluation;
pub mod executor;
pub mod graph;
pub mod recovery;
pub mod state;
pub mod telemetry;
pub mod trace;
pub mod types;
