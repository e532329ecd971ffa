//! Evaluation gates: post-execution quality checks on block results.
//!
//! After a block's executor returns, the engine runs the block's configured
//! checks against the [`BlockResult`]. Each check produces a [`CheckReport`]
//! with a pass/warn/fail outcome and, when a signal was available, a score
//! in `0.0..=1.0`. A single failing check routes the block into recovery;
//! otherwise the minimum check score caps the confidence that flows
//! downstream.
//!
//! Checks never mutate the result and never short-circuit: every configured
//! check runs so the trace shows the full picture.
//!
//! Built-in checks read well-known metadata keys that executors attach to
//! their results ([`HALLUCINATION_RISK_KEY`], [`TOXICITY_KEY`],
//! [`CITATIONS_KEY`]). A missing signal is a warn, not a failure: the check
//! could not run, which is worth surfacing but not worth aborting over.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::join_all;
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::executor::BlockResult;

/// Metadata key for the executor-reported hallucination risk, `0.0..=1.0`.
pub const HALLUCINATION_RISK_KEY: &str = "hallucination_risk";
/// Metadata key for the executor-reported toxicity score, `0.0..=1.0`.
pub const TOXICITY_KEY: &str = "toxicity";
/// Metadata key for the citations array attached to a result.
pub const CITATIONS_KEY: &str = "citations";

/// Default ceiling for [`CheckSpec::CheckHallucinations`].
pub const DEFAULT_MAX_HALLUCINATION_RISK: f64 = 0.5;
/// Default ceiling for [`CheckSpec::ToxicityFilter`].
pub const DEFAULT_MAX_TOXICITY: f64 = 0.3;

fn default_max_risk() -> f64 {
    DEFAULT_MAX_HALLUCINATION_RISK
}

fn default_max_toxicity() -> f64 {
    DEFAULT_MAX_TOXICITY
}

fn default_true() -> bool {
    true
}

/// The shape a block's output is expected to have.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    /// Any non-null value.
    #[default]
    NonNull,
    /// A JSON string.
    Text,
    /// A JSON object.
    Object,
    /// A JSON array.
    Array,
}

impl OutputFormat {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::NonNull => "non_null",
            OutputFormat::Text => "text",
            OutputFormat::Object => "object",
            OutputFormat::Array => "array",
        }
    }

    /// Whether `value` satisfies this format.
    #[must_use]
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            OutputFormat::NonNull => !value.is_null(),
            OutputFormat::Text => value.is_string(),
            OutputFormat::Object => value.is_object(),
            OutputFormat::Array => value.is_array(),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declarative configuration of one evaluation check, as persisted in a
/// block's `checks` array.
///
/// The JSON form is tagged by `"check"`:
///
/// ```json
/// {"check": "validate_format", "expect": "object"}
/// {"check": "check_hallucinations", "maxRisk": 0.4}
/// {"check": "verify_citations", "required": true}
/// {"check": "toxicity_filter", "maxScore": 0.2}
/// {"check": "custom", "name": "brand_voice"}
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "check", rename_all = "snake_case")]
pub enum CheckSpec {
    /// The output must have a given JSON shape.
    #[serde(rename_all = "camelCase")]
    ValidateFormat {
        #[serde(default)]
        expect: OutputFormat,
    },
    /// The reported hallucination risk must stay at or below a ceiling.
    #[serde(rename_all = "camelCase")]
    CheckHallucinations {
        #[serde(default = "default_max_risk")]
        max_risk: f64,
    },
    /// The result must carry at least one citation.
    #[serde(rename_all = "camelCase")]
    VerifyCitations {
        #[serde(default = "default_true")]
        required: bool,
    },
    /// The reported toxicity score must stay at or below a ceiling.
    #[serde(rename_all = "camelCase")]
    ToxicityFilter {
        #[serde(default = "default_max_toxicity")]
        max_score: f64,
    },
    /// A check registered on the engine by name.
    #[serde(rename_all = "camelCase")]
    Custom { name: String },
}

impl CheckSpec {
    /// The criteria name this spec reports under.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            CheckSpec::ValidateFormat { .. } => "validate_format",
            CheckSpec::CheckHallucinations { .. } => "check_hallucinations",
            CheckSpec::VerifyCitations { .. } => "verify_citations",
            CheckSpec::ToxicityFilter { .. } => "toxicity_filter",
            CheckSpec::Custom { name } => name,
        }
    }

    /// Instantiates the built-in check this spec configures.
    ///
    /// Returns `None` for [`CheckSpec::Custom`]; those resolve through the
    /// engine's check registry instead.
    #[must_use]
    pub fn instantiate(&self) -> Option<Arc<dyn EvaluationCheck>> {
        match self {
            CheckSpec::ValidateFormat { expect } => Some(Arc::new(ValidateFormat { expect: *expect })),
            CheckSpec::CheckHallucinations { max_risk } => Some(Arc::new(CheckHallucinations {
                max_risk: *max_risk,
            })),
            CheckSpec::VerifyCitations { required } => Some(Arc::new(VerifyCitations {
                required: *required,
            })),
            CheckSpec::ToxicityFilter { max_score } => Some(Arc::new(ToxicityFilter {
                max_score: *max_score,
            })),
            CheckSpec::Custom { .. } => None,
        }
    }
}

/// Outcome of a single check.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckOutcome {
    Pass,
    Warn,
    Fail,
}

impl CheckOutcome {
    #[must_use]
    pub fn is_fail(&self) -> bool {
        matches!(self, CheckOutcome::Fail)
    }
}

impl fmt::Display for CheckOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckOutcome::Pass => f.write_str("pass"),
            CheckOutcome::Warn => f.write_str("warn"),
            CheckOutcome::Fail => f.write_str("fail"),
        }
    }
}

/// One check's verdict on a block result.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckReport {
    /// Which check produced this report.
    pub criteria: String,
    pub outcome: CheckOutcome,
    /// Quality score in `0.0..=1.0`; absent when the signal was missing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    /// Human-readable explanation for the trace.
    pub details: String,
}

impl CheckReport {
    #[must_use]
    pub fn pass(criteria: impl Into<String>, score: f64, details: impl Into<String>) -> Self {
        Self {
            criteria: criteria.into(),
            outcome: CheckOutcome::Pass,
            score: Some(score),
            details: details.into(),
        }
    }

    #[must_use]
    pub fn warn(criteria: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            criteria: criteria.into(),
            outcome: CheckOutcome::Warn,
            score: None,
            details: details.into(),
        }
    }

    #[must_use]
    pub fn fail(criteria: impl Into<String>, score: f64, details: impl Into<String>) -> Self {
        Self {
            criteria: criteria.into(),
            outcome: CheckOutcome::Fail,
            score: Some(score),
            details: details.into(),
        }
    }
}

/// A quality check over a block result.
///
/// Implementations must be pure with respect to the result: inspect, never
/// mutate. Custom checks registered on the engine implement this trait.
#[async_trait]
pub trait EvaluationCheck: Send + Sync {
    /// Criteria name, used in reports and trace events.
    fn name(&self) -> &str;

    /// Evaluates the result. A check that cannot run reports a warn instead
    /// of erroring.
    async fn evaluate(&self, result: &BlockResult) -> CheckReport;
}

/// Built-in: output shape check.
#[derive(Clone, Copy, Debug)]
pub struct ValidateFormat {
    pub expect: OutputFormat,
}

#[async_trait]
impl EvaluationCheck for ValidateFormat {
    fn name(&self) -> &str {
        "validate_format"
    }

    async fn evaluate(&self, result: &BlockResult) -> CheckReport {
        if self.expect.matches(&result.output) {
            CheckReport::pass(self.name(), 1.0, format!("output is {}", self.expect))
        } else {
            CheckReport::fail(
                self.name(),
                0.0,
                format!("expected {} output, got {}", self.expect, json_kind(&result.output)),
            )
        }
    }
}

/// Built-in: hallucination risk ceiling.
#[derive(Clone, Copy, Debug)]
pub struct CheckHallucinations {
    pub max_risk: f64,
}

#[async_trait]
impl EvaluationCheck for CheckHallucinations {
    fn name(&self) -> &str {
        "check_hallucinations"
    }

    async fn evaluate(&self, result: &BlockResult) -> CheckReport {
        let Some(risk) = result.metadata.get(HALLUCINATION_RISK_KEY).and_then(Value::as_f64)
        else {
            return CheckReport::warn(self.name(), "no hallucination risk signal reported");
        };
        let score = (1.0 - risk).clamp(0.0, 1.0);
        if risk <= self.max_risk {
            CheckReport::pass(
                self.name(),
                score,
                format!("risk {risk:.3} within ceiling {:.3}", self.max_risk),
            )
        } else {
            CheckReport::fail(
                self.name(),
                score,
                format!("risk {risk:.3} exceeds ceiling {:.3}", self.max_risk),
            )
        }
    }
}

/// Built-in: citation presence check.
#[derive(Clone, Copy, Debug)]
pub struct VerifyCitations {
    pub required: bool,
}

#[async_trait]
impl EvaluationCheck for VerifyCitations {
    fn name(&self) -> &str {
        "verify_citations"
    }

    async fn evaluate(&self, result: &BlockResult) -> CheckReport {
        let count = result
            .metadata
            .get(CITATIONS_KEY)
            .and_then(Value::as_array)
            .map_or(0, Vec::len);
        if count > 0 {
            CheckReport::pass(self.name(), 1.0, format!("{count} citation(s) attached"))
        } else if self.required {
            CheckReport::fail(self.name(), 0.0, "no citations attached")
        } else {
            CheckReport::warn(self.name(), "citations optional, none attached")
        }
    }
}

/// Built-in: toxicity ceiling.
#[derive(Clone, Copy, Debug)]
pub struct ToxicityFilter {
    pub max_score: f64,
}

#[async_trait]
impl EvaluationCheck for ToxicityFilter {
    fn name(&self) -> &str {
        "toxicity_filter"
    }

    async fn evaluate(&self, result: &BlockResult) -> CheckReport {
        let Some(toxicity) = result.metadata.get(TOXICITY_KEY).and_then(Value::as_f64) else {
            return CheckReport::warn(self.name(), "no toxicity signal reported");
        };
        let score = (1.0 - toxicity).clamp(0.0, 1.0);
        if toxicity <= self.max_score {
            CheckReport::pass(
                self.name(),
                score,
                format!("toxicity {toxicity:.3} within ceiling {:.3}", self.max_score),
            )
        } else {
            CheckReport::fail(
                self.name(),
                score,
                format!("toxicity {toxicity:.3} exceeds ceiling {:.3}", self.max_score),
            )
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// All checks configured for one block, run as a unit.
#[derive(Clone, Default)]
pub struct EvaluationSuite {
    checks: Vec<Arc<dyn EvaluationCheck>>,
}

impl EvaluationSuite {
    #[must_use]
    pub fn new(checks: Vec<Arc<dyn EvaluationCheck>>) -> Self {
        Self { checks }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.checks.len()
    }

    /// Runs every check concurrently and collects the reports in the order
    /// the checks were configured.
    pub async fn run(&self, result: &BlockResult) -> EvaluationVerdict {
        let reports = join_all(self.checks.iter().map(|c| c.evaluate(result))).await;
        EvaluationVerdict { reports }
    }
}

/// The combined outcome of a block's evaluation suite.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationVerdict {
    pub reports: Vec<CheckReport>,
}

impl EvaluationVerdict {
    /// `true` when any check failed. A failed verdict routes the block into
    /// recovery.
    #[must_use]
    pub fn failed(&self) -> bool {
        self.reports.iter().any(|r| r.outcome.is_fail())
    }

    /// Reports with a failing outcome.
    pub fn failures(&self) -> impl Iterator<Item = &CheckReport> {
        self.reports.iter().filter(|r| r.outcome.is_fail())
    }

    /// Caps `base` (the executor's confidence) by the minimum check score.
    /// Warn reports carry no score and do not participate.
    #[must_use]
    pub fn adjusted_confidence(&self, base: f64) -> f64 {
        self.reports
            .iter()
            .filter_map(|r| r.score)
            .fold(base, f64::min)
    }

    /// Turns a failed verdict into an error value for the run record.
    #[must_use]
    pub fn into_failure(self, block_id: impl Into<String>) -> EvaluationFailure {
        let failed = self.failures().count();
        EvaluationFailure {
            block_id: block_id.into(),
            failed,
            total: self.reports.len(),
            reports: self.reports,
        }
    }
}

/// Raised when one or more checks failed for a block.
#[derive(Clone, Debug, Error, Diagnostic, PartialEq)]
#[error("block {block_id:?} failed {failed} of {total} evaluation check(s)")]
#[diagnostic(
    code(reasonflow::evaluation::checks_failed),
    help("inspect the failing reports; recovery decides what happens next")
)]
pub struct EvaluationFailure {
    pub block_id: String,
    pub failed: usize,
    pub total: usize,
    pub reports: Vec<CheckReport>,
}

impl EvaluationFailure {
    /// Names of the failing checks, for compact log lines.
    #[must_use]
    pub fn failed_criteria(&self) -> Vec<&str> {
        self.reports
            .iter()
            .filter(|r| r.outcome.is_fail())
            .map(|r| r.criteria.as_str())
            .collect()
    }
}
