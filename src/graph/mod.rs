//! The authored workflow model: blocks, connections, properties, validation.
//!
//! This module owns everything a collaborator (authoring UI, template
//! importer) touches: the [`Workflow`] value type with its [`Block`]s and
//! [`Connection`]s, the typed per-block configuration in
//! [`properties`](crate::graph::properties), the fluent [`WorkflowBuilder`],
//! and the structural [`validate`] pass. Nothing here executes anything;
//! the engine consumes these values read-only.
//!
//! # Core Concepts
//!
//! - **Blocks**: typed logic nodes ([`BlockType`](crate::types::BlockType) is
//!   a closed set of eight kinds)
//! - **Connections**: dual-flow wiring (execution edges carry the control
//!   token, data edges carry values)
//! - **Typed properties**: per-type configuration records in memory, a flat
//!   JSON map at the persistence boundary
//! - **Validation**: a pure pass that reports *all* structural problems at
//!   once, never just the first
//!
//! # Quick Start
//!
//! ```
//! use reasonflow::graph::{WorkflowBuilder, validate};
//! use reasonflow::graph::properties::BlockProperties;
//!
//! let workflow = WorkflowBuilder::new("triage")
//!     .goal("goal", "Classify the request")
//!     .block_with("classify", reasonflow::types::BlockType::Reasoning, "Classify", |b| b)
//!     .exit("done", "Done")
//!     .connect("goal", "classify")
//!     .connect("classify", "done")
//!     .build();
//!
//! let report = validate(&workflow);
//! assert!(report.is_valid(), "{report}");
//!
//! // Round-trip through the persisted JSON form
//! let json = workflow.to_json().unwrap();
//! let restored = reasonflow::graph::Workflow::from_json(&json).unwrap();
//! assert_eq!(restored.blocks.len(), 3);
//! # let _ = BlockProperties::default_for(reasonflow::types::BlockType::Goal);
//! ```

mod block;
mod builder;
mod connection;
pub mod properties;
mod validator;
mod workflow;

pub use block::{Block, Position};
pub use builder::WorkflowBuilder;
pub use connection::Connection;
pub use validator::{Endpoint, ValidationError, ValidationReport, validate};
pub use workflow::{Workflow, WorkflowEditError, WorkflowMetadata, WorkflowParseError};
