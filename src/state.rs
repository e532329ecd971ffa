//! Per-run execution state.
//!
//! Each run exclusively owns one [`ExecutionState`]: the cursor position,
//! per-block states and results, retry counters, and the error records
//! accumulated along the way. Nothing here is shared between runs; the
//! engine archives the state into the terminal [`RunReport`]
//! (`crate::engine::RunReport`) when the run ends.
//!
//! # Core Types
//!
//! - [`RunStatus`]: the run-level lifecycle
//! - [`BlockState`]: the per-block lifecycle
//! - [`ExecutionState`]: the owned state of one run
//! - [`ExecutionError`]: one recorded failure, with scope and cause chain

use std::fmt;

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::executor::BlockResult;

/// Lifecycle of a run.
///
/// `NotStarted -> Running -> {Completed, Failed, EarlyTerminated}`.
/// Cancellation lands in its own terminal state so reports can tell an
/// operator stop from a genuine failure.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    NotStarted,
    Running,
    Completed,
    Failed,
    EarlyTerminated,
}

impl RunStatus {
    /// Whether the run has reached a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::EarlyTerminated
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::NotStarted => "not_started",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::EarlyTerminated => "early_terminated",
        };
        f.write_str(s)
    }
}

/// Lifecycle of a single block within a run.
///
/// `Pending -> Running -> {Done, Errored}`; an errored block moves to
/// `Retrying`, `Escalated`, `Degraded`, or `Aborted` depending on recovery,
/// and a retrying block goes back to `Running`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockState {
    #[default]
    Pending,
    Running,
    Done,
    Errored,
    Retrying,
    Escalated,
    Degraded,
    Aborted,
}

impl BlockState {
    /// Whether the block has finished for good in this run.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            BlockState::Done | BlockState::Degraded | BlockState::Aborted
        )
    }
}

impl fmt::Display for BlockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BlockState::Pending => "pending",
            BlockState::Running => "running",
            BlockState::Done => "done",
            BlockState::Errored => "errored",
            BlockState::Retrying => "retrying",
            BlockState::Escalated => "escalated",
            BlockState::Degraded => "degraded",
            BlockState::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// The complete, exclusively owned state of one run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionState {
    pub run_id: Uuid,
    pub workflow_id: String,
    pub status: RunStatus,
    /// Block the walk is currently at; `None` once the run ends.
    pub cursor: Option<String>,
    /// Steps executed so far (a retry is a new step).
    pub step: u64,
    #[serde(default)]
    pub block_states: FxHashMap<String, BlockState>,
    /// Latest accepted result per block.
    #[serde(default)]
    pub results: FxHashMap<String, BlockResult>,
    /// Block ids in completion order; re-completions append again, so the
    /// last occurrence wins when resolving data inputs.
    #[serde(default)]
    pub completion_order: Vec<String>,
    /// Re-executions performed per block.
    #[serde(default)]
    pub retries: FxHashMap<String, u32>,
    #[serde(default)]
    pub errors: Vec<ExecutionError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl ExecutionState {
    /// Fresh state for a run that has not started walking yet.
    #[must_use]
    pub fn new(run_id: Uuid, workflow_id: impl Into<String>) -> Self {
        Self {
            run_id,
            workflow_id: workflow_id.into(),
            status: RunStatus::NotStarted,
            cursor: None,
            step: 0,
            block_states: FxHashMap::default(),
            results: FxHashMap::default(),
            completion_order: Vec::new(),
            retries: FxHashMap::default(),
            errors: Vec::new(),
            started_at: None,
            finished_at: None,
        }
    }

    /// Transitions to `Running` with the cursor at the entry block.
    pub fn begin(&mut self, entry_block_id: impl Into<String>) {
        self.status = RunStatus::Running;
        self.cursor = Some(entry_block_id.into());
        self.started_at = Some(Utc::now());
    }

    /// Current state of a block; blocks never touched are `Pending`.
    #[must_use]
    pub fn block_state(&self, block_id: &str) -> BlockState {
        self.block_states
            .get(block_id)
            .copied()
            .unwrap_or_default()
    }

    pub fn set_block_state(&mut self, block_id: impl Into<String>, state: BlockState) {
        self.block_states.insert(block_id.into(), state);
    }

    /// Stores a block's accepted result and appends to the completion order.
    pub fn record_result(&mut self, block_id: impl Into<String>, result: BlockResult) {
        let block_id = block_id.into();
        self.completion_order.push(block_id.clone());
        self.results.insert(block_id, result);
    }

    /// Latest accepted result for a block, if any.
    #[must_use]
    pub fn result(&self, block_id: &str) -> Option<&BlockResult> {
        self.results.get(block_id)
    }

    pub fn record_error(&mut self, error: ExecutionError) {
        self.errors.push(error);
    }

    /// Re-executions already performed for a block.
    #[must_use]
    pub fn retries_used(&self, block_id: &str) -> u32 {
        self.retries.get(block_id).copied().unwrap_or(0)
    }

    /// Counts one more re-execution for a block.
    pub fn note_retry(&mut self, block_id: impl Into<String>) {
        *self.retries.entry(block_id.into()).or_default() += 1;
    }

    /// Ends the run: terminal status, cursor cleared, finish stamped.
    pub fn finish(&mut self, status: RunStatus) {
        debug_assert!(status.is_terminal());
        self.status = status;
        self.cursor = None;
        self.finished_at = Some(Utc::now());
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// One recorded failure, timestamped and scoped to where it happened.
///
/// Errors accumulate in [`ExecutionState::errors`] and survive into the
/// terminal run report; they are the explainability record, not the control
/// flow (recovery decides what actually happens next).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionError {
    #[serde(default = "chrono::Utc::now")]
    pub when: DateTime<Utc>,
    #[serde(default)]
    pub scope: ErrorScope,
    #[serde(default)]
    pub error: ErrorDetail,
}

impl ExecutionError {
    /// An executor failure at a block.
    pub fn executor(block_id: impl Into<String>, step: u64, error: ErrorDetail) -> Self {
        Self {
            when: Utc::now(),
            scope: ErrorScope::Executor {
                block_id: block_id.into(),
                step,
            },
            error,
        }
    }

    /// An evaluation-check failure at a block.
    pub fn evaluation(block_id: impl Into<String>, check: impl Into<String>, error: ErrorDetail) -> Self {
        Self {
            when: Utc::now(),
            scope: ErrorScope::Evaluation {
                block_id: block_id.into(),
                check: check.into(),
            },
            error,
        }
    }

    /// A gateway arbitration failure.
    pub fn arbitration(block_id: impl Into<String>, error: ErrorDetail) -> Self {
        Self {
            when: Utc::now(),
            scope: ErrorScope::Arbitration {
                block_id: block_id.into(),
            },
            error,
        }
    }

    /// A failure during a recovery attempt.
    pub fn recovery(block_id: impl Into<String>, attempt: u32, error: ErrorDetail) -> Self {
        Self {
            when: Utc::now(),
            scope: ErrorScope::Recovery {
                block_id: block_id.into(),
                attempt,
            },
            error,
        }
    }

    /// A run-level engine failure not tied to one block.
    pub fn engine(error: ErrorDetail) -> Self {
        Self {
            when: Utc::now(),
            scope: ErrorScope::Engine,
            error,
        }
    }
}

/// Where in the pipeline an error was recorded.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum ErrorScope {
    Executor {
        block_id: String,
        step: u64,
    },
    Evaluation {
        block_id: String,
        check: String,
    },
    Arbitration {
        block_id: String,
    },
    Recovery {
        block_id: String,
        attempt: u32,
    },
    #[default]
    Engine,
}

impl fmt::Display for ErrorScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorScope::Executor { block_id, step } => {
                write!(f, "executor {block_id} (step {step})")
            }
            ErrorScope::Evaluation { block_id, check } => {
                write!(f, "evaluation {block_id}/{check}")
            }
            ErrorScope::Arbitration { block_id } => write!(f, "arbitration {block_id}"),
            ErrorScope::Recovery { block_id, attempt } => {
                write!(f, "recovery {block_id} (attempt {attempt})")
            }
            ErrorScope::Engine => f.write_str("engine"),
        }
    }
}

/// Message plus optional cause chain and structured details.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<Box<ErrorDetail>>,
    #[serde(default)]
    pub details: Value,
}

impl Default for ErrorDetail {
    fn default() -> Self {
        ErrorDetail {
            message: String::new(),
            cause: None,
            details: Value::Null,
        }
    }
}

impl fmt::Display for ErrorDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ErrorDetail {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause.as_ref().map(|c| c as &dyn std::error::Error)
    }
}

impl ErrorDetail {
    pub fn msg(message: impl Into<String>) -> Self {
        ErrorDetail {
            message: message.into(),
            cause: None,
            details: Value::Null,
        }
    }

    #[must_use]
    pub fn with_cause(mut self, cause: ErrorDetail) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    #[must_use]
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }
}
