//! Failure recovery: what the engine does after a block goes wrong.
//!
//! A block fails in one of two ways: its executor returns an error (no
//! result exists), or its evaluation checks fail (a result exists but is
//! unacceptable). Either way the engine resolves the block's
//! [`RecoveryPolicy`] into a [`RecoveryAction`] with [`resolve`], a pure
//! lookup with no hidden state. A block with no policy configured aborts the
//! run; recovery is always opt-in per block.
//!
//! Retry counting is explicit: `max_retries = 3` means exactly three
//! re-executions after the initial failure, then exhaustion.

use std::fmt;
use std::str::FromStr;

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::graph::properties::DEFAULT_MAX_RETRIES;

/// How a block recovers from failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStrategy {
    /// Re-run the same block, up to `max_retries` times.
    Retry,
    /// Jump the cursor to a designated fallback block.
    Fallback,
    /// Keep the (check-failing) result, marked degraded, and continue.
    Degrade,
    /// Suspend the run and hand the block to a human.
    Escalate,
    /// Abort the run.
    Fail,
}

impl RecoveryStrategy {
    /// Canonical lowercase name, matching the persisted form.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryStrategy::Retry => "retry",
            RecoveryStrategy::Fallback => "fallback",
            RecoveryStrategy::Degrade => "degrade",
            RecoveryStrategy::Escalate => "escalate",
            RecoveryStrategy::Fail => "fail",
        }
    }
}

impl fmt::Display for RecoveryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for strings that name no known recovery strategy.
#[derive(Clone, Debug, Error, Diagnostic, PartialEq, Eq)]
#[error("unknown recovery strategy {found:?}")]
#[diagnostic(
    code(reasonflow::recovery::unknown_strategy),
    help("expected one of: retry, fallback, degrade, escalate, fail")
)]
pub struct UnknownRecoveryStrategy {
    pub found: String,
}

impl FromStr for RecoveryStrategy {
    type Err = UnknownRecoveryStrategy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "retry" => Ok(RecoveryStrategy::Retry),
            "fallback" => Ok(RecoveryStrategy::Fallback),
            "degrade" => Ok(RecoveryStrategy::Degrade),
            "escalate" => Ok(RecoveryStrategy::Escalate),
            "fail" => Ok(RecoveryStrategy::Fail),
            other => Err(UnknownRecoveryStrategy {
                found: other.to_string(),
            }),
        }
    }
}

/// Per-block recovery configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryPolicy {
    pub strategy: RecoveryStrategy,
    /// Only meaningful for [`RecoveryStrategy::Retry`].
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Required for [`RecoveryStrategy::Fallback`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_target: Option<String>,
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

impl RecoveryPolicy {
    /// Retry up to `max_retries` times.
    #[must_use]
    pub fn retry(max_retries: u32) -> Self {
        Self {
            strategy: RecoveryStrategy::Retry,
            max_retries,
            fallback_target: None,
        }
    }

    /// Reroute to `target` on failure.
    #[must_use]
    pub fn fallback(target: impl Into<String>) -> Self {
        Self {
            strategy: RecoveryStrategy::Fallback,
            max_retries: DEFAULT_MAX_RETRIES,
            fallback_target: Some(target.into()),
        }
    }

    /// Accept the degraded result and continue.
    #[must_use]
    pub fn degrade() -> Self {
        Self {
            strategy: RecoveryStrategy::Degrade,
            max_retries: DEFAULT_MAX_RETRIES,
            fallback_target: None,
        }
    }

    /// Suspend for human review on failure.
    #[must_use]
    pub fn escalate() -> Self {
        Self {
            strategy: RecoveryStrategy::Escalate,
            max_retries: DEFAULT_MAX_RETRIES,
            fallback_target: None,
        }
    }

    /// Abort the run on failure, explicitly.
    #[must_use]
    pub fn fail() -> Self {
        Self {
            strategy: RecoveryStrategy::Fail,
            max_retries: DEFAULT_MAX_RETRIES,
            fallback_target: None,
        }
    }

    /// Sets the fallback target. Consulted by the fallback strategy and by
    /// retry policies after exhaustion.
    #[must_use]
    pub fn with_fallback_target(mut self, target: impl Into<String>) -> Self {
        self.fallback_target = Some(target.into());
        self
    }
}

/// What the engine does next for a failed block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Re-run the block; `attempt` is 1-based.
    RetryBlock { attempt: u32, max: u32 },
    /// Move the cursor to `target` instead of the failed block's successor.
    Reroute { target: String },
    /// Keep the failing result, marked degraded, and continue downstream.
    AcceptDegraded,
    /// Suspend the run pending a human decision.
    Suspend,
    /// Fail the run, preserving the original error.
    Abort,
}

/// Resolves a block's policy into the next action. Pure: same inputs, same
/// action.
///
/// `retries_used` counts re-executions already performed for this block in
/// this run. `has_result` distinguishes check failures (a result exists,
/// degradation is possible) from executor errors (nothing to degrade to).
#[must_use]
pub fn resolve(
    policy: Option<&RecoveryPolicy>,
    retries_used: u32,
    has_result: bool,
) -> RecoveryAction {
    let Some(policy) = policy else {
        return RecoveryAction::Abort;
    };
    match policy.strategy {
        RecoveryStrategy::Retry => {
            if retries_used < policy.max_retries {
                RecoveryAction::RetryBlock {
                    attempt: retries_used + 1,
                    max: policy.max_retries,
                }
            } else if let Some(target) = &policy.fallback_target {
                // Exhausted retries re-route instead of aborting when a
                // fallback target is also configured.
                RecoveryAction::Reroute {
                    target: target.clone(),
                }
            } else {
                RecoveryAction::Abort
            }
        }
        RecoveryStrategy::Fallback => match &policy.fallback_target {
            Some(target) => RecoveryAction::Reroute {
                target: target.clone(),
            },
            // Validation requires a target; a policy without one aborts.
            None => RecoveryAction::Abort,
        },
        RecoveryStrategy::Degrade => {
            if has_result {
                RecoveryAction::AcceptDegraded
            } else {
                RecoveryAction::Abort
            }
        }
        RecoveryStrategy::Escalate => RecoveryAction::Suspend,
        RecoveryStrategy::Fail => RecoveryAction::Abort,
    }
}

/// Raised when a retry policy runs out of attempts.
#[derive(Clone, Debug, Error, Diagnostic, PartialEq, Eq)]
#[error("block {block_id:?} exhausted its {max_retries} retry attempt(s)")]
#[diagnostic(
    code(reasonflow::recovery::exhausted),
    help("raise maxRetries or configure a fallback target")
)]
pub struct RecoveryExhausted {
    pub block_id: String,
    pub max_retries: u32,
}
