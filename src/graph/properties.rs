//! Typed per-block configuration, with a flat JSON map at the boundary.
//!
//! Authored workflows persist block configuration as a single `properties`
//! map per block. In memory that map becomes [`BlockProperties`], a tagged
//! union per [`BlockType`], so a typo'd key or a string where a number
//! belongs surfaces at load time instead of mid-run. The shared
//! `checks` and `recoveryStrategy`/`maxRetries`/`fallbackTarget` keys ride in
//! the same map and are split out by the conversion functions here.
//!
//! Unknown keys are ignored on load (forward compatibility) and known keys
//! are re-emitted on save, so an in-memory workflow round-trips exactly.
//!
//! # Examples
//!
//! ```
//! use reasonflow::graph::properties::{BlockProperties, GatewayProperties};
//! use reasonflow::types::BlockType;
//! use serde_json::{Map, json};
//!
//! let mut map = Map::new();
//! map.insert("confidenceThreshold".into(), json!(0.5));
//! map.insert("strategy".into(), json!("hybrid"));
//!
//! let props = BlockProperties::from_map(BlockType::Gateway, &map).unwrap();
//! match &props {
//!     BlockProperties::Gateway(g) => assert_eq!(g.confidence_threshold, 0.5),
//!     other => panic!("unexpected: {other:?}"),
//! }
//! assert_eq!(props.to_map()["strategy"], json!("hybrid"));
//! ```

use miette::Diagnostic;
use serde_json::{Map, Value, json};
use thiserror::Error;

use crate::arbitration::ArbitrationStrategy;
use crate::evaluation::CheckSpec;
use crate::recovery::{RecoveryPolicy, RecoveryStrategy};
use crate::types::BlockType;

/// Confidence threshold applied when a Gateway does not configure its own.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.7;

/// Retry budget applied when a `retry` policy omits `maxRetries`.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Iteration cap applied when a Reasoning block omits `maxIterations`.
pub const DEFAULT_MAX_ITERATIONS: u32 = 3;

/// Error converting between the flat properties map and the typed forms.
#[derive(Debug, Clone, Error, Diagnostic, PartialEq)]
pub enum PropertyError {
    /// A known key held a value of the wrong JSON type.
    #[error("property {key:?} expected {expected}, got {found}")]
    #[diagnostic(code(reasonflow::properties::invalid_type))]
    InvalidType {
        key: String,
        expected: &'static str,
        found: String,
    },

    /// A known numeric key held a value outside its legal range.
    #[error("property {key:?} out of range: {value} (expected {range})")]
    #[diagnostic(
        code(reasonflow::properties::out_of_range),
        help("confidence-style values must be finite and within [0, 1]")
    )]
    OutOfRange {
        key: String,
        value: f64,
        range: &'static str,
    },

    /// A known string key held an unrecognized enumeration value.
    #[error("property {key:?} has invalid value {value:?}: {reason}")]
    #[diagnostic(code(reasonflow::properties::invalid_value))]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    /// A key required by another property's value is missing.
    #[error("property {key:?} is required {when}")]
    #[diagnostic(code(reasonflow::properties::missing))]
    Missing { key: String, when: &'static str },

    /// The `checks` list failed to deserialize.
    #[error("malformed checks list: {reason}")]
    #[diagnostic(
        code(reasonflow::properties::checks),
        help("each entry needs a \"check\" tag naming a built-in or \"custom\"")
    )]
    Checks { reason: String },
}

/// How a Reasoning block approaches its work. Carried through to the
/// executor untouched; the engine never interprets it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningPattern {
    /// Linear step-by-step derivation.
    #[default]
    ChainOfThought,
    /// Branching exploration with per-branch viability, synthesized at the
    /// end.
    TreeOfThought,
    /// Structured decomposition of a question into findings.
    Analysis,
    /// Option weighing that ends in a committed choice.
    Decision,
}

impl ReasoningPattern {
    /// The snake_case wire form.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasoningPattern::ChainOfThought => "chain_of_thought",
            ReasoningPattern::TreeOfThought => "tree_of_thought",
            ReasoningPattern::Analysis => "analysis",
            ReasoningPattern::Decision => "decision",
        }
    }

    fn parse(key: &str, s: &str) -> Result<Self, PropertyError> {
        match s {
            "chain_of_thought" => Ok(ReasoningPattern::ChainOfThought),
            "tree_of_thought" => Ok(ReasoningPattern::TreeOfThought),
            "analysis" => Ok(ReasoningPattern::Analysis),
            "decision" => Ok(ReasoningPattern::Decision),
            other => Err(PropertyError::InvalidValue {
                key: key.to_string(),
                value: other.to_string(),
                reason: "expected chain_of_thought, tree_of_thought, analysis, or decision"
                    .to_string(),
            }),
        }
    }
}

impl std::fmt::Display for ReasoningPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Goal block configuration.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GoalProperties {
    /// Free-text statement of what the workflow is for.
    pub description: Option<String>,
}

/// Context block configuration.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ContextProperties {
    /// Where the context comes from (document id, collection name, ...).
    pub source: Option<String>,
    /// Optional narrowing hint passed to the executor.
    pub scope: Option<String>,
}

/// Gateway block configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct GatewayProperties {
    /// Minimum winning score; below this, arbitration hands off to Recovery
    /// instead of guessing.
    pub confidence_threshold: f64,
    /// How candidate scores are produced (by the Gateway's executor).
    pub strategy: ArbitrationStrategy,
}

impl Default for GatewayProperties {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            strategy: ArbitrationStrategy::RuleBased,
        }
    }
}

/// Reasoning block configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct ReasoningProperties {
    /// Reasoning approach requested from the executor.
    pub pattern: ReasoningPattern,
    /// Iteration cap for iterative patterns (data-flow feedback loops).
    pub max_iterations: u32,
}

impl Default for ReasoningProperties {
    fn default() -> Self {
        Self {
            pattern: ReasoningPattern::default(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }
}

/// Fallback block configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct FallbackProperties {
    /// How many times the fallback work itself may be re-attempted.
    pub retry_count: u32,
    /// Block id to escalate to when the fallback also fails.
    pub escalation_path: Option<String>,
}

impl Default for FallbackProperties {
    fn default() -> Self {
        Self {
            retry_count: 1,
            escalation_path: None,
        }
    }
}

/// Trace block configuration.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TraceProperties {
    /// Free-text annotation recorded alongside the trace output.
    pub note: Option<String>,
}

/// Human-Verification block configuration.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct HumanVerificationProperties {
    /// Question surfaced to the reviewer at the checkpoint.
    pub prompt: Option<String>,
}

/// Typed block configuration: one variant per [`BlockType`].
///
/// The variant always agrees with the owning block's type; conversions go
/// through [`from_map`](Self::from_map) / [`to_map`](Self::to_map) at the
/// serialization boundary.
#[derive(Clone, Debug, PartialEq)]
pub enum BlockProperties {
    Goal(GoalProperties),
    Context(ContextProperties),
    Gateway(GatewayProperties),
    Reasoning(ReasoningProperties),
    Fallback(FallbackProperties),
    Trace(TraceProperties),
    Exit,
    HumanVerification(HumanVerificationProperties),
}

impl BlockProperties {
    /// Default configuration for a block of the given type.
    #[must_use]
    pub fn default_for(block_type: BlockType) -> Self {
        match block_type {
            BlockType::Goal => BlockProperties::Goal(GoalProperties::default()),
            BlockType::Context => BlockProperties::Context(ContextProperties::default()),
            BlockType::Gateway => BlockProperties::Gateway(GatewayProperties::default()),
            BlockType::Reasoning => BlockProperties::Reasoning(ReasoningProperties::default()),
            BlockType::Fallback => BlockProperties::Fallback(FallbackProperties::default()),
            BlockType::Trace => BlockProperties::Trace(TraceProperties::default()),
            BlockType::Exit => BlockProperties::Exit,
            BlockType::HumanVerification => {
                BlockProperties::HumanVerification(HumanVerificationProperties::default())
            }
        }
    }

    /// The block type this configuration belongs to.
    #[must_use]
    pub fn block_type(&self) -> BlockType {
        match self {
            BlockProperties::Goal(_) => BlockType::Goal,
            BlockProperties::Context(_) => BlockType::Context,
            BlockProperties::Gateway(_) => BlockType::Gateway,
            BlockProperties::Reasoning(_) => BlockType::Reasoning,
            BlockProperties::Fallback(_) => BlockType::Fallback,
            BlockProperties::Trace(_) => BlockType::Trace,
            BlockProperties::Exit => BlockType::Exit,
            BlockProperties::HumanVerification(_) => BlockType::HumanVerification,
        }
    }

    /// Parses the type-specific keys of a flat properties map.
    ///
    /// Missing keys take their documented defaults; unknown keys are
    /// ignored. Wrong-typed or out-of-range known keys are errors.
    pub fn from_map(block_type: BlockType, map: &Map<String, Value>) -> Result<Self, PropertyError> {
        match block_type {
            BlockType::Goal => Ok(BlockProperties::Goal(GoalProperties {
                description: opt_string(map, "description")?,
            })),
            BlockType::Context => Ok(BlockProperties::Context(ContextProperties {
                source: opt_string(map, "source")?,
                scope: opt_string(map, "scope")?,
            })),
            BlockType::Gateway => {
                let confidence_threshold = match opt_f64(map, "confidenceThreshold")? {
                    Some(v) => unit_range("confidenceThreshold", v)?,
                    None => DEFAULT_CONFIDENCE_THRESHOLD,
                };
                let strategy = match opt_string(map, "strategy")? {
                    Some(s) => s.parse::<ArbitrationStrategy>().map_err(|e| {
                        PropertyError::InvalidValue {
                            key: "strategy".to_string(),
                            value: s,
                            reason: e.to_string(),
                        }
                    })?,
                    None => ArbitrationStrategy::RuleBased,
                };
                Ok(BlockProperties::Gateway(GatewayProperties {
                    confidence_threshold,
                    strategy,
                }))
            }
            BlockType::Reasoning => {
                let pattern = match opt_string(map, "pattern")? {
                    Some(s) => ReasoningPattern::parse("pattern", &s)?,
                    None => ReasoningPattern::default(),
                };
                let max_iterations =
                    opt_u32(map, "maxIterations")?.unwrap_or(DEFAULT_MAX_ITERATIONS);
                Ok(BlockProperties::Reasoning(ReasoningProperties {
                    pattern,
                    max_iterations,
                }))
            }
            BlockType::Fallback => Ok(BlockProperties::Fallback(FallbackProperties {
                retry_count: opt_u32(map, "retryCount")?.unwrap_or(1),
                escalation_path: opt_string(map, "escalationPath")?,
            })),
            BlockType::Trace => Ok(BlockProperties::Trace(TraceProperties {
                note: opt_string(map, "note")?,
            })),
            BlockType::Exit => Ok(BlockProperties::Exit),
            BlockType::HumanVerification => Ok(BlockProperties::HumanVerification(
                HumanVerificationProperties {
                    prompt: opt_string(map, "prompt")?,
                },
            )),
        }
    }

    /// Emits the type-specific keys back into a flat map.
    #[must_use]
    pub fn to_map(&self) -> Map<String, Value> {
        let mut map = Map::new();
        match self {
            BlockProperties::Goal(p) => {
                if let Some(d) = &p.description {
                    map.insert("description".to_string(), json!(d));
                }
            }
            BlockProperties::Context(p) => {
                if let Some(s) = &p.source {
                    map.insert("source".to_string(), json!(s));
                }
                if let Some(s) = &p.scope {
                    map.insert("scope".to_string(), json!(s));
                }
            }
            BlockProperties::Gateway(p) => {
                map.insert(
                    "confidenceThreshold".to_string(),
                    json!(p.confidence_threshold),
                );
                map.insert("strategy".to_string(), json!(p.strategy.as_str()));
            }
            BlockProperties::Reasoning(p) => {
                map.insert("pattern".to_string(), json!(p.pattern.as_str()));
                map.insert("maxIterations".to_string(), json!(p.max_iterations));
            }
            BlockProperties::Fallback(p) => {
                map.insert("retryCount".to_string(), json!(p.retry_count));
                if let Some(path) = &p.escalation_path {
                    map.insert("escalationPath".to_string(), json!(path));
                }
            }
            BlockProperties::Trace(p) => {
                if let Some(n) = &p.note {
                    map.insert("note".to_string(), json!(n));
                }
            }
            BlockProperties::Exit => {}
            BlockProperties::HumanVerification(p) => {
                if let Some(prompt) = &p.prompt {
                    map.insert("prompt".to_string(), json!(prompt));
                }
            }
        }
        map
    }
}

/// Parses the shared `checks` key of a flat properties map.
pub fn checks_from_map(map: &Map<String, Value>) -> Result<Vec<CheckSpec>, PropertyError> {
    match map.get("checks") {
        None => Ok(Vec::new()),
        Some(value) => serde_json::from_value::<Vec<CheckSpec>>(value.clone()).map_err(|e| {
            PropertyError::Checks {
                reason: e.to_string(),
            }
        }),
    }
}

/// Parses the shared recovery keys (`recoveryStrategy`, `maxRetries`,
/// `fallbackTarget`) of a flat properties map.
///
/// Returns `Ok(None)` when no `recoveryStrategy` is present: recovery has
/// no implicit default.
pub fn recovery_from_map(map: &Map<String, Value>) -> Result<Option<RecoveryPolicy>, PropertyError> {
    let Some(strategy_str) = opt_string(map, "recoveryStrategy")? else {
        return Ok(None);
    };
    let strategy =
        strategy_str
            .parse::<RecoveryStrategy>()
            .map_err(|e| PropertyError::InvalidValue {
                key: "recoveryStrategy".to_string(),
                value: strategy_str.clone(),
                reason: e.to_string(),
            })?;
    let max_retries = opt_u32(map, "maxRetries")?.unwrap_or(DEFAULT_MAX_RETRIES);
    let fallback_target = opt_string(map, "fallbackTarget")?;
    if strategy == RecoveryStrategy::Fallback && fallback_target.is_none() {
        return Err(PropertyError::Missing {
            key: "fallbackTarget".to_string(),
            when: "when recoveryStrategy is \"fallback\"",
        });
    }
    Ok(Some(RecoveryPolicy {
        strategy,
        max_retries,
        fallback_target,
    }))
}

/// Emits the shared `checks` and recovery keys into a flat map.
pub fn extend_map_with_shared(
    map: &mut Map<String, Value>,
    checks: &[CheckSpec],
    recovery: Option<&RecoveryPolicy>,
) {
    if !checks.is_empty() {
        // CheckSpec serialization is infallible: plain enums and numbers.
        map.insert(
            "checks".to_string(),
            serde_json::to_value(checks).unwrap_or(Value::Null),
        );
    }
    if let Some(policy) = recovery {
        map.insert(
            "recoveryStrategy".to_string(),
            json!(policy.strategy.as_str()),
        );
        if policy.strategy == RecoveryStrategy::Retry {
            map.insert("maxRetries".to_string(), json!(policy.max_retries));
        }
        if let Some(target) = &policy.fallback_target {
            map.insert("fallbackTarget".to_string(), json!(target));
        }
    }
}

fn opt_string(map: &Map<String, Value>, key: &str) -> Result<Option<String>, PropertyError> {
    match map.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(PropertyError::InvalidType {
            key: key.to_string(),
            expected: "string",
            found: json_type_name(other).to_string(),
        }),
    }
}

fn opt_f64(map: &Map<String, Value>, key: &str) -> Result<Option<f64>, PropertyError> {
    match map.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => Ok(n.as_f64()),
        Some(other) => Err(PropertyError::InvalidType {
            key: key.to_string(),
            expected: "number",
            found: json_type_name(other).to_string(),
        }),
    }
}

fn opt_u32(map: &Map<String, Value>, key: &str) -> Result<Option<u32>, PropertyError> {
    match map.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => match n.as_u64().and_then(|v| u32::try_from(v).ok()) {
            Some(v) => Ok(Some(v)),
            None => Err(PropertyError::OutOfRange {
                key: key.to_string(),
                value: n.as_f64().unwrap_or(f64::NAN),
                range: "a non-negative integer",
            }),
        },
        Some(other) => Err(PropertyError::InvalidType {
            key: key.to_string(),
            expected: "integer",
            found: json_type_name(other).to_string(),
        }),
    }
}

fn unit_range(key: &str, value: f64) -> Result<f64, PropertyError> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(PropertyError::OutOfRange {
            key: key.to_string(),
            value,
            range: "[0, 1]",
        })
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn gateway_defaults_apply() {
        let props = BlockProperties::from_map(BlockType::Gateway, &Map::new()).unwrap();
        let BlockProperties::Gateway(g) = props else {
            panic!("wrong variant");
        };
        assert_eq!(g.confidence_threshold, DEFAULT_CONFIDENCE_THRESHOLD);
        assert_eq!(g.strategy, ArbitrationStrategy::RuleBased);
    }

    #[test]
    fn gateway_threshold_out_of_range_is_rejected() {
        let m = map(&[("confidenceThreshold", json!(1.5))]);
        let err = BlockProperties::from_map(BlockType::Gateway, &m).unwrap_err();
        assert!(matches!(err, PropertyError::OutOfRange { .. }), "{err}");
    }

    #[test]
    fn gateway_threshold_wrong_type_is_rejected() {
        let m = map(&[("confidenceThreshold", json!("high"))]);
        let err = BlockProperties::from_map(BlockType::Gateway, &m).unwrap_err();
        assert!(matches!(err, PropertyError::InvalidType { .. }), "{err}");
    }

    #[test]
    fn reasoning_round_trips_through_map() {
        let m = map(&[
            ("pattern", json!("tree_of_thought")),
            ("maxIterations", json!(5)),
        ]);
        let props = BlockProperties::from_map(BlockType::Reasoning, &m).unwrap();
        let out = props.to_map();
        assert_eq!(out["pattern"], json!("tree_of_thought"));
        assert_eq!(out["maxIterations"], json!(5));
        assert_eq!(BlockProperties::from_map(BlockType::Reasoning, &out).unwrap(), props);
    }

    #[test]
    fn unknown_pattern_is_an_error() {
        let m = map(&[("pattern", json!("socratic"))]);
        let err = BlockProperties::from_map(BlockType::Reasoning, &m).unwrap_err();
        assert!(matches!(err, PropertyError::InvalidValue { .. }), "{err}");
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let m = map(&[("futureKnob", json!({"nested": true}))]);
        let props = BlockProperties::from_map(BlockType::Context, &m).unwrap();
        assert_eq!(
            props,
            BlockProperties::Context(ContextProperties::default())
        );
    }

    #[test]
    fn recovery_absent_means_none() {
        assert_eq!(recovery_from_map(&Map::new()).unwrap(), None);
    }

    #[test]
    fn recovery_retry_defaults_max_retries() {
        let m = map(&[("recoveryStrategy", json!("retry"))]);
        let policy = recovery_from_map(&m).unwrap().unwrap();
        assert_eq!(policy.strategy, RecoveryStrategy::Retry);
        assert_eq!(policy.max_retries, DEFAULT_MAX_RETRIES);
    }

    #[test]
    fn recovery_fallback_requires_target() {
        let m = map(&[("recoveryStrategy", json!("fallback"))]);
        let err = recovery_from_map(&m).unwrap_err();
        assert!(matches!(err, PropertyError::Missing { .. }), "{err}");

        let m = map(&[
            ("recoveryStrategy", json!("fallback")),
            ("fallbackTarget", json!("blk-7")),
        ]);
        let policy = recovery_from_map(&m).unwrap().unwrap();
        assert_eq!(policy.fallback_target.as_deref(), Some("blk-7"));
    }

    #[test]
    fn checks_parse_and_reject_malformed_entries() {
        let m = map(&[(
            "checks",
            json!([
                {"check": "validate_format", "expect": "text"},
                {"check": "toxicity_filter", "maxScore": 0.2},
            ]),
        )]);
        let checks = checks_from_map(&m).unwrap();
        assert_eq!(checks.len(), 2);

        let bad = map(&[("checks", json!([{"kind": "nope"}]))]);
        let err = checks_from_map(&bad).unwrap_err();
        assert!(matches!(err, PropertyError::Checks { .. }), "{err}");
    }

    #[test]
    fn shared_keys_round_trip() {
        let checks = vec![CheckSpec::VerifyCitations { required: true }];
        let policy = RecoveryPolicy::retry(2).with_fallback_target("alt");
        let mut m = Map::new();
        extend_map_with_shared(&mut m, &checks, Some(&policy));

        assert_eq!(checks_from_map(&m).unwrap(), checks);
        assert_eq!(recovery_from_map(&m).unwrap(), Some(policy));
    }

    #[test]
    fn every_type_has_a_default_configuration() {
        for ty in crate::types::ALL_BLOCK_TYPES {
            assert_eq!(BlockProperties::default_for(ty).block_type(), ty);
        }
    }
}
