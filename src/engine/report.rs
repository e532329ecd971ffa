//! Run-level outputs: the terminal report and the live handle.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::runner::EngineError;
use crate::state::{ExecutionState, RunStatus};
use crate::telemetry::{ColorMode, PlainFormatter, TraceFormatter};
use crate::trace::{TraceRecord, TraceStream};

/// Verdict fed back into a run suspended at an escalated block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum HumanDecision {
    /// Accept the block's work; the walk continues past it.
    Approve,
    /// Reject it; the run fails.
    Reject { reason: String },
}

/// Terminal summary of one run.
///
/// Everything needed to explain the outcome travels together: a one-line
/// summary, the archived [`ExecutionState`] (accumulated errors included)
/// and the full ordered event trace.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub run_id: Uuid,
    pub workflow_id: String,
    pub status: RunStatus,
    /// One line describing how the run ended.
    pub summary: String,
    /// Steps executed, retries included.
    pub steps: u64,
    pub state: ExecutionState,
    pub trace: Vec<TraceRecord>,
}

impl RunReport {
    /// `true` when the run reached an exit block.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.status == RunStatus::Completed
    }
}

/// One line for the outcome, then the accumulated failures with their cause
/// chains (nothing more for a clean run). The long-form audit trail stays in
/// [`trace`](RunReport::trace).
impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "run {} ({}) {}: {}",
            self.run_id, self.workflow_id, self.status, self.summary
        )?;
        if self.state.errors.is_empty() {
            return Ok(());
        }
        let digest =
            PlainFormatter::with_color(ColorMode::Never).format_failures(&self.state.errors);
        write!(f, "\n{}", digest.trim_end())
    }
}

/// Handle to a run spawned with [`Engine::start`](super::Engine::start).
///
/// Dropping the handle detaches the run; it keeps executing. Use
/// [`cancel`](Self::cancel) to stop it and [`wait`](Self::wait) to collect
/// the terminal [`RunReport`].
pub struct RunHandle {
    run_id: Uuid,
    cancel: CancellationToken,
    decisions: flume::Sender<HumanDecision>,
    events: Option<TraceStream>,
    join: JoinHandle<Result<RunReport, EngineError>>,
}

impl RunHandle {
    pub(super) fn new(
        run_id: Uuid,
        cancel: CancellationToken,
        decisions: flume::Sender<HumanDecision>,
        events: TraceStream,
        join: JoinHandle<Result<RunReport, EngineError>>,
    ) -> Self {
        Self {
            run_id,
            cancel,
            decisions,
            events: Some(events),
            join,
        }
    }

    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Requests termination. The run emits a single `EarlyTermination`
    /// event and ends as `EarlyTerminated`; recovery is never consulted.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Takes the live event stream. Subsequent calls return `None`; the
    /// feed was subscribed before the run started, so no records are
    /// missed by the first caller.
    pub fn take_events(&mut self) -> Option<TraceStream> {
        self.events.take()
    }

    /// Feeds a decision to a run suspended at an escalated block.
    ///
    /// Decisions sent while the run is not suspended are consumed at the
    /// next suspension point. Fails once the run has terminated.
    pub fn resume(&self, decision: HumanDecision) -> Result<(), EngineError> {
        self.decisions
            .send(decision)
            .map_err(|_| EngineError::RunNotActive {
                run_id: self.run_id,
            })
    }

    /// Whether the run has terminated.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Waits for the run to terminate and returns its report.
    pub async fn wait(self) -> Result<RunReport, EngineError> {
        self.join.await?
    }
}
