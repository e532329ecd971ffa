//! Event types emitted while a workflow runs.
//!
//! Every observable state change in a run produces exactly one
//! [`TraceEvent`], stamped into a [`TraceRecord`] by the bus. The set is
//! closed: executors and checks contribute *payloads* (scores, reports,
//! evidence) but never invent event kinds of their own.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::arbitration::{ArbitrationAmbiguity, ArbitrationDecision, ArbitrationStrategy, BranchScore};
use crate::evaluation::CheckReport;
use crate::recovery::RecoveryStrategy;
use crate::types::BlockType;

/// A single entry in a run's trace.
///
/// Records are appended in emission order and never mutated afterwards, so
/// replaying a stored trace reproduces exactly what a live subscriber saw.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceRecord {
    /// When the bus accepted the event.
    #[serde(default = "chrono::Utc::now")]
    pub timestamp: DateTime<Utc>,
    /// The run this record belongs to.
    pub run_id: Uuid,
    pub event: TraceEvent,
}

impl TraceRecord {
    #[must_use]
    pub fn new(run_id: Uuid, event: TraceEvent) -> Self {
        Self {
            timestamp: Utc::now(),
            run_id,
            event,
        }
    }
}

impl fmt::Display for TraceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}",
            self.timestamp.format("%H:%M:%S%.3f"),
            self.event
        )
    }
}

/// Everything a run can report about itself.
///
/// Serialized form is internally tagged:
///
/// ```json
/// {"type": "block_completed", "blockId": "draft", "step": 3,
///  "confidence": 0.82, "degraded": false}
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TraceEvent {
    /// The run left `NotStarted`; the cursor sits on the entry block.
    #[serde(rename_all = "camelCase")]
    ExecutionStarted {
        workflow_id: String,
        entry_block_id: String,
    },
    /// The cursor reached a block and its executor was invoked.
    #[serde(rename_all = "camelCase")]
    BlockStarted {
        block_id: String,
        block_type: BlockType,
        step: u64,
    },
    /// An executor returned a result that survived evaluation.
    #[serde(rename_all = "camelCase")]
    BlockCompleted {
        block_id: String,
        step: u64,
        confidence: f64,
        degraded: bool,
    },
    /// An executor failed or its result was rejected.
    #[serde(rename_all = "camelCase")]
    BlockError {
        block_id: String,
        step: u64,
        message: String,
    },
    /// A gateway chose (or failed to choose) among its branches.
    Arbitration(ArbitrationEvent),
    /// A block's configured checks ran against its result.
    Evaluation(EvaluationEvent),
    /// A recovery strategy was applied after a failure.
    Recovery(RecoveryEvent),
    /// The run stopped before reaching a terminal block.
    #[serde(rename_all = "camelCase")]
    EarlyTermination { reason: String },
    /// The cursor reached an exit block.
    #[serde(rename_all = "camelCase")]
    ExecutionCompleted { summary: String },
    /// The run ended without reaching a terminal block.
    #[serde(rename_all = "camelCase")]
    ExecutionFailed { summary: String },
}

impl TraceEvent {
    pub fn execution_started(
        workflow_id: impl Into<String>,
        entry_block_id: impl Into<String>,
    ) -> Self {
        TraceEvent::ExecutionStarted {
            workflow_id: workflow_id.into(),
            entry_block_id: entry_block_id.into(),
        }
    }

    pub fn block_started(block_id: impl Into<String>, block_type: BlockType, step: u64) -> Self {
        TraceEvent::BlockStarted {
            block_id: block_id.into(),
            block_type,
            step,
        }
    }

    pub fn block_completed(
        block_id: impl Into<String>,
        step: u64,
        confidence: f64,
        degraded: bool,
    ) -> Self {
        TraceEvent::BlockCompleted {
            block_id: block_id.into(),
            step,
            confidence,
            degraded,
        }
    }

    pub fn block_error(block_id: impl Into<String>, step: u64, message: impl Into<String>) -> Self {
        TraceEvent::BlockError {
            block_id: block_id.into(),
            step,
            message: message.into(),
        }
    }

    pub fn early_termination(reason: impl Into<String>) -> Self {
        TraceEvent::EarlyTermination {
            reason: reason.into(),
        }
    }

    pub fn execution_completed(summary: impl Into<String>) -> Self {
        TraceEvent::ExecutionCompleted {
            summary: summary.into(),
        }
    }

    pub fn execution_failed(summary: impl Into<String>) -> Self {
        TraceEvent::ExecutionFailed {
            summary: summary.into(),
        }
    }

    /// The snake_case label this event serializes under.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            TraceEvent::ExecutionStarted { .. } => "execution_started",
            TraceEvent::BlockStarted { .. } => "block_started",
            TraceEvent::BlockCompleted { .. } => "block_completed",
            TraceEvent::BlockError { .. } => "block_error",
            TraceEvent::Arbitration(_) => "arbitration",
            TraceEvent::Evaluation(_) => "evaluation",
            TraceEvent::Recovery(_) => "recovery",
            TraceEvent::EarlyTermination { .. } => "early_termination",
            TraceEvent::ExecutionCompleted { .. } => "execution_completed",
            TraceEvent::ExecutionFailed { .. } => "execution_failed",
        }
    }

    /// The block this event concerns, when it concerns one.
    #[must_use]
    pub fn block_id(&self) -> Option<&str> {
        match self {
            TraceEvent::BlockStarted { block_id, .. }
            | TraceEvent::BlockCompleted { block_id, .. }
            | TraceEvent::BlockError { block_id, .. } => Some(block_id),
            TraceEvent::Arbitration(event) => Some(&event.block_id),
            TraceEvent::Evaluation(event) => Some(&event.block_id),
            TraceEvent::Recovery(event) => Some(&event.block_id),
            TraceEvent::ExecutionStarted { .. }
            | TraceEvent::EarlyTermination { .. }
            | TraceEvent::ExecutionCompleted { .. }
            | TraceEvent::ExecutionFailed { .. } => None,
        }
    }
}

impl From<ArbitrationEvent> for TraceEvent {
    fn from(event: ArbitrationEvent) -> Self {
        TraceEvent::Arbitration(event)
    }
}

impl From<EvaluationEvent> for TraceEvent {
    fn from(event: EvaluationEvent) -> Self {
        TraceEvent::Evaluation(event)
    }
}

impl From<RecoveryEvent> for TraceEvent {
    fn from(event: RecoveryEvent) -> Self {
        TraceEvent::Recovery(event)
    }
}

impl fmt::Display for TraceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceEvent::ExecutionStarted {
                workflow_id,
                entry_block_id,
            } => write!(f, "workflow {workflow_id} starting at {entry_block_id}"),
            TraceEvent::BlockStarted {
                block_id,
                block_type,
                step,
            } => write!(f, "[{block_id}@{step}] started ({block_type})"),
            TraceEvent::BlockCompleted {
                block_id,
                step,
                confidence,
                degraded,
            } => {
                write!(f, "[{block_id}@{step}] completed, confidence {confidence:.3}")?;
                if *degraded {
                    f.write_str(" (degraded)")?;
                }
                Ok(())
            }
            TraceEvent::BlockError {
                block_id,
                step,
                message,
            } => write!(f, "[{block_id}@{step}] error: {message}"),
            TraceEvent::Arbitration(event) => event.fmt(f),
            TraceEvent::Evaluation(event) => event.fmt(f),
            TraceEvent::Recovery(event) => event.fmt(f),
            TraceEvent::EarlyTermination { reason } => {
                write!(f, "terminated early: {reason}")
            }
            TraceEvent::ExecutionCompleted { summary } => write!(f, "completed: {summary}"),
            TraceEvent::ExecutionFailed { summary } => write!(f, "failed: {summary}"),
        }
    }
}

/// Audit record of one gateway decision.
///
/// Always carries the full candidate list, even when only one branch was
/// scored or no branch cleared the threshold, so a stored trace answers
/// "what else could the run have done here".
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArbitrationEvent {
    pub block_id: String,
    pub step: u64,
    pub strategy: ArbitrationStrategy,
    /// The winning branch, or `None` when no branch cleared the threshold.
    pub chosen: Option<BranchScore>,
    /// Every other scored branch, in declaration order.
    pub alternatives: Vec<BranchScore>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evidence: Vec<String>,
}

impl ArbitrationEvent {
    #[must_use]
    pub fn from_decision(step: u64, decision: &ArbitrationDecision) -> Self {
        Self {
            block_id: decision.block_id.clone(),
            step,
            strategy: decision.strategy,
            chosen: Some(decision.chosen.clone()),
            alternatives: decision.alternatives.clone(),
            evidence: decision.evidence.clone(),
        }
    }

    #[must_use]
    pub fn ambiguous(
        step: u64,
        strategy: ArbitrationStrategy,
        ambiguity: &ArbitrationAmbiguity,
    ) -> Self {
        Self {
            block_id: ambiguity.block_id.clone(),
            step,
            strategy,
            chosen: None,
            alternatives: ambiguity.candidates.clone(),
            evidence: Vec::new(),
        }
    }
}

impl fmt::Display for ArbitrationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.chosen {
            Some(winner) => write!(
                f,
                "[{}@{}] arbitration chose {} ({:.3}, {} alternative(s))",
                self.block_id,
                self.step,
                winner.target_block_id,
                winner.score,
                self.alternatives.len()
            ),
            None => write!(
                f,
                "[{}@{}] arbitration found no branch above threshold ({} candidate(s))",
                self.block_id,
                self.step,
                self.alternatives.len()
            ),
        }
    }
}

/// Audit record of one check against a block result.
///
/// A block with several checks appends one of these per check, in
/// declaration order, so the trace shows each verdict individually.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationEvent {
    pub block_id: String,
    pub step: u64,
    #[serde(flatten)]
    pub report: CheckReport,
}

impl EvaluationEvent {
    #[must_use]
    pub fn new(block_id: impl Into<String>, step: u64, report: CheckReport) -> Self {
        Self {
            block_id: block_id.into(),
            step,
            report,
        }
    }
}

impl fmt::Display for EvaluationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}@{}] check {} {}",
            self.block_id, self.step, self.report.criteria, self.report.outcome
        )?;
        if let Some(score) = self.report.score {
            write!(f, " ({score:.3})")?;
        }
        Ok(())
    }
}

/// Audit record of one recovery step.
///
/// Retries emit one of these per attempt; the other strategies emit exactly
/// one. An unconfigured failure or exhausted retry budget aborts the run
/// without a recovery event of its own.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryEvent {
    pub block_id: String,
    pub step: u64,
    pub strategy: RecoveryStrategy,
    /// 1-based attempt counter, set for retries only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
    /// Where the cursor goes next, set for fallback reroutes only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    pub details: String,
}

impl RecoveryEvent {
    #[must_use]
    pub fn retry(block_id: impl Into<String>, step: u64, attempt: u32, max_attempts: u32) -> Self {
        Self {
            block_id: block_id.into(),
            step,
            strategy: RecoveryStrategy::Retry,
            attempt: Some(attempt),
            max_attempts: Some(max_attempts),
            target: None,
            details: format!("retrying, attempt {attempt} of {max_attempts}"),
        }
    }

    #[must_use]
    pub fn fallback(block_id: impl Into<String>, step: u64, target: impl Into<String>) -> Self {
        let target = target.into();
        Self {
            block_id: block_id.into(),
            step,
            strategy: RecoveryStrategy::Fallback,
            attempt: None,
            max_attempts: None,
            details: format!("rerouting to {target}"),
            target: Some(target),
        }
    }

    #[must_use]
    pub fn degrade(block_id: impl Into<String>, step: u64) -> Self {
        Self {
            block_id: block_id.into(),
            step,
            strategy: RecoveryStrategy::Degrade,
            attempt: None,
            max_attempts: None,
            target: None,
            details: "accepting degraded result".to_string(),
        }
    }

    #[must_use]
    pub fn escalate(block_id: impl Into<String>, step: u64) -> Self {
        Self {
            block_id: block_id.into(),
            step,
            strategy: RecoveryStrategy::Escalate,
            attempt: None,
            max_attempts: None,
            target: None,
            details: "suspended for human review".to_string(),
        }
    }
}

impl fmt::Display for RecoveryEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}@{}] recovery ({}): {}",
            self.block_id, self.step, self.strategy, self.details
        )
    }
}
