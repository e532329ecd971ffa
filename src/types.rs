//! Core types for the reasonflow workflow model.
//!
//! This module defines the fundamental vocabulary used throughout the crate
//! for identifying logic blocks and connection flows in reasoning workflows.
//! These are the core domain concepts that define what a workflow *is*.
//!
//! For the authored graph structures built from these types, see
//! [`crate::graph`]; for runtime execution types (run status, block states),
//! see [`crate::state`].
//!
//! # Key Types
//!
//! - [`BlockType`]: the closed set of logic-block kinds a workflow may contain
//! - [`ConnectionKind`]: distinguishes the control/execution flow from the
//!   parallel data flow
//!
//! # Examples
//!
//! ```rust
//! use reasonflow::types::{BlockType, ConnectionKind};
//!
//! let gateway = BlockType::Gateway;
//! assert_eq!(gateway.as_str(), "gateway");
//! assert!(gateway.is_gateway());
//!
//! // Wire-form round-trip
//! let parsed: BlockType = "human_verification".parse().unwrap();
//! assert_eq!(parsed, BlockType::HumanVerification);
//!
//! assert_ne!(ConnectionKind::Execution, ConnectionKind::Data);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use miette::Diagnostic;
use thiserror::Error;

/// Default pin name for a block's inbound execution connection.
pub const EXECUTION_INPUT_PIN: &str = "input";
/// Default pin name for a block's outbound execution connection.
pub const EXECUTION_OUTPUT_PIN: &str = "output";
/// Default pin name for a block's inbound data connection.
pub const DATA_INPUT_PIN: &str = "data_input";
/// Default pin name for a block's outbound data connection.
pub const DATA_OUTPUT_PIN: &str = "data_output";

/// Identifies the kind of a logic block within a reasoning workflow.
///
/// `BlockType` is a closed set: every consumer matches exhaustively and no
/// silent default arm exists anywhere in the crate. Adding a variant is a
/// deliberate, compiler-enforced change to every match site.
///
/// # Persistence
///
/// The wire form is the snake_case name (`"goal"`, `"human_verification"`,
/// ...) used by both serde and [`FromStr`]/[`Display`].
///
/// # Examples
///
/// ```rust
/// use reasonflow::types::BlockType;
///
/// let ty = BlockType::Reasoning;
/// assert_eq!(ty.to_string(), "reasoning");
/// assert_eq!("reasoning".parse::<BlockType>().unwrap(), ty);
/// assert!(ty.requires_executor());
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockType {
    /// Entry point of a workflow.
    ///
    /// Goal blocks have no inbound execution connection and are completed
    /// natively by the engine without an executor call.
    Goal,

    /// Supplies grounding context to downstream blocks.
    Context,

    /// Branch point: selects exactly one outbound execution edge per
    /// evaluation based on confidence-scored alternatives.
    Gateway,

    /// Performs a reasoning step (the actual work is delegated to the
    /// registered executor).
    Reasoning,

    /// Alternate-path block reached when a primary path degrades or fails.
    Fallback,

    /// Emits an observability record into the data flow.
    Trace,

    /// Terminal block that completes the run.
    ///
    /// Exit blocks have no outbound execution connection and are completed
    /// natively by the engine without an executor call.
    Exit,

    /// Checkpoint requiring an external human decision before the walk
    /// continues.
    HumanVerification,
}

/// All block types, in a fixed order. Handy for registries and tests.
pub const ALL_BLOCK_TYPES: [BlockType; 8] = [
    BlockType::Goal,
    BlockType::Context,
    BlockType::Gateway,
    BlockType::Reasoning,
    BlockType::Fallback,
    BlockType::Trace,
    BlockType::Exit,
    BlockType::HumanVerification,
];

impl BlockType {
    /// The snake_case wire form of this block type.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockType::Goal => "goal",
            BlockType::Context => "context",
            BlockType::Gateway => "gateway",
            BlockType::Reasoning => "reasoning",
            BlockType::Fallback => "fallback",
            BlockType::Trace => "trace",
            BlockType::Exit => "exit",
            BlockType::HumanVerification => "human_verification",
        }
    }

    /// Returns `true` if this is a [`Goal`](Self::Goal) block.
    #[must_use]
    pub fn is_goal(&self) -> bool {
        matches!(self, Self::Goal)
    }

    /// Returns `true` if this is an [`Exit`](Self::Exit) block.
    #[must_use]
    pub fn is_exit(&self) -> bool {
        matches!(self, Self::Exit)
    }

    /// Returns `true` if this is a [`Gateway`](Self::Gateway) block.
    #[must_use]
    pub fn is_gateway(&self) -> bool {
        matches!(self, Self::Gateway)
    }

    /// Returns `true` if a run may legally end at this block.
    ///
    /// Exit completes a run; Human-Verification may terminate a path while
    /// waiting for an external decision, so the validator accepts either as
    /// a reachability target.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Exit | Self::HumanVerification)
    }

    /// Returns `true` if the engine invokes a registered executor for this
    /// block type.
    ///
    /// Goal and Exit are handled natively by the engine and never reach an
    /// executor.
    #[must_use]
    pub fn requires_executor(&self) -> bool {
        match self {
            BlockType::Goal | BlockType::Exit => false,
            BlockType::Context
            | BlockType::Gateway
            | BlockType::Reasoning
            | BlockType::Fallback
            | BlockType::Trace
            | BlockType::HumanVerification => true,
        }
    }
}

impl fmt::Display for BlockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error produced when a string is not one of the eight block type names.
#[derive(Debug, Clone, Error, Diagnostic, PartialEq, Eq)]
#[error("unknown block type: {found:?}")]
#[diagnostic(
    code(reasonflow::types::unknown_block_type),
    help("expected one of: goal, context, gateway, reasoning, fallback, trace, exit, human_verification")
)]
pub struct UnknownBlockType {
    /// The rejected input string.
    pub found: String,
}

impl FromStr for BlockType {
    type Err = UnknownBlockType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "goal" => Ok(BlockType::Goal),
            "context" => Ok(BlockType::Context),
            "gateway" => Ok(BlockType::Gateway),
            "reasoning" => Ok(BlockType::Reasoning),
            "fallback" => Ok(BlockType::Fallback),
            "trace" => Ok(BlockType::Trace),
            "exit" => Ok(BlockType::Exit),
            "human_verification" => Ok(BlockType::HumanVerification),
            other => Err(UnknownBlockType {
                found: other.to_string(),
            }),
        }
    }
}

/// Distinguishes the two wiring flows of a workflow graph.
///
/// Execution connections carry the single control-flow token and determine
/// traversal order; data connections carry computed values between blocks
/// independent of control order. The validator treats the two very
/// differently: cycles are illegal on the execution subgraph only, and the
/// Goal/Exit degree rules apply to execution connections only.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionKind {
    /// Control-flow edge: the execution token travels along these.
    Execution,

    /// Data-flow edge: computed values travel along these, read
    /// opportunistically by whichever block's data-input pin they feed.
    Data,
}

impl ConnectionKind {
    /// Returns `true` for execution (control-flow) connections.
    #[must_use]
    pub fn is_execution(&self) -> bool {
        matches!(self, Self::Execution)
    }

    /// Returns `true` for data-flow connections.
    #[must_use]
    pub fn is_data(&self) -> bool {
        matches!(self, Self::Data)
    }
}

impl fmt::Display for ConnectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Execution => f.write_str("execution"),
            Self::Data => f.write_str("data"),
        }
    }
}
