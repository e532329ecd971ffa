//! Workflow execution: the engine, its configuration, and run handles.
//!
//! This module turns a validated [`Workflow`](crate::graph::Workflow) into a
//! finished [`RunReport`]. It hosts the single-cursor walk, routes failures
//! through recovery, and wires every run to its own trace bus so the full
//! event history travels with the result.
//!
//! # Architecture
//!
//! Execution is split across a few cooperating pieces:
//!
//! - **[`Engine`]** - Long-lived entry point holding the executor and check
//!   registries
//! - **[`EngineConfig`] / [`TraceConfig`]** - Construction-time knobs,
//!   including where trace records are rendered
//! - **[`RunHandle`]** - Control surface for a spawned run: cancellation,
//!   reviewer decisions, live events
//! - **[`RunReport`]** - Terminal summary with the final state and the full
//!   trace
//!
//! # Usage Example
//!
//! ```rust,no_run
//! use reasonflow::engine::{Engine, HumanDecision};
//! use reasonflow::executor::ExecutorRegistry;
//! # async fn example(workflow: reasonflow::graph::Workflow) -> miette::Result<()> {
//!
//! let engine = Engine::new(ExecutorRegistry::new());
//! let handle = engine.start(&workflow)?;
//!
//! // React to escalations while the run is in flight.
//! handle.resume(HumanDecision::Approve)?;
//! let report = handle.wait().await?;
//! println!("{}: {}", report.status, report.summary);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod report;
pub mod runner;

pub use config::{EngineConfig, SinkConfig, TraceConfig};
pub use report::{HumanDecision, RunHandle, RunReport};
pub use runner::{Engine, EngineError};
