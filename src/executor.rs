//! Block execution framework: the seam between the engine and real work.
//!
//! The engine never computes anything itself. Every non-native block is
//! handed to a [`BlockExecutor`] registered for its [`BlockType`]; the
//! executor performs the actual LLM call, tool invocation, or retrieval and
//! reports back a [`BlockResult`] with a confidence score. Goal and Exit
//! blocks are handled natively by the engine and never reach an executor.

use std::sync::Arc;

use async_trait::async_trait;
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::graph::{Block, Workflow};
use crate::types::BlockType;

// ============================================================================
// Core Trait
// ============================================================================

/// Values delivered over inbound data connections, keyed by target pin name.
pub type DataInputs = FxHashMap<String, Value>;

/// Executes the work of one block type.
///
/// Implementations should be stateless with respect to the run: everything
/// they need arrives through the block definition, the resolved data inputs,
/// and the [`ExecutorContext`]. The same executor instance serves every
/// block of its type across concurrent runs.
///
/// # Contract
///
/// - `confidence` on the returned result must lie in `0.0..=1.0`; the engine
///   rejects violations with [`ExecutorError::ConfidenceOutOfRange`] and
///   routes them through recovery like any other failure.
/// - Gateway executors report per-branch scores via
///   [`BlockResult::with_branch_score`]; arbitration consumes them.
/// - Long-running work should watch `ctx.cancel` and bail out with
///   [`ExecutorError::Cancelled`] when the run is being torn down.
///
/// # Examples
///
/// ```
/// use async_trait::async_trait;
/// use reasonflow::executor::{
///     BlockExecutor, BlockResult, DataInputs, ExecutorContext, ExecutorError,
/// };
/// use reasonflow::graph::Block;
/// use serde_json::json;
///
/// struct EchoExecutor;
///
/// #[async_trait]
/// impl BlockExecutor for EchoExecutor {
///     async fn execute(
///         &self,
///         block: &Block,
///         inputs: &DataInputs,
///         _ctx: ExecutorContext,
///     ) -> Result<BlockResult, ExecutorError> {
///         let input = inputs.get("data_input").cloned().unwrap_or(json!(null));
///         Ok(BlockResult::new(json!({"echoed": input, "from": block.id}), 1.0))
///     }
/// }
/// ```
#[async_trait]
pub trait BlockExecutor: Send + Sync {
    /// Performs the block's work and reports a scored result.
    async fn execute(
        &self,
        block: &Block,
        inputs: &DataInputs,
        ctx: ExecutorContext,
    ) -> Result<BlockResult, ExecutorError>;
}

/// Delegation, so one shared executor instance can be registered for
/// several block types.
#[async_trait]
impl<T: BlockExecutor + ?Sized> BlockExecutor for Arc<T> {
    async fn execute(
        &self,
        block: &Block,
        inputs: &DataInputs,
        ctx: ExecutorContext,
    ) -> Result<BlockResult, ExecutorError> {
        (**self).execute(block, inputs, ctx).await
    }
}

// ============================================================================
// Execution Context
// ============================================================================

/// Per-invocation context handed to an executor.
#[derive(Clone, Debug)]
pub struct ExecutorContext {
    /// The run this invocation belongs to.
    pub run_id: Uuid,
    /// The block being executed.
    pub block_id: String,
    /// Engine step counter at the time of the call.
    pub step: u64,
    /// Run-scoped cancellation token; executors should abort their own I/O
    /// when it fires.
    pub cancel: CancellationToken,
}

impl ExecutorContext {
    /// Whether the run has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

// ============================================================================
// Results
// ============================================================================

/// Metadata key under which gateway executors report per-branch scores
/// (an object mapping target block id to a number).
pub const BRANCH_SCORES_KEY: &str = "branch_scores";
/// Metadata key for the evidence strings behind a result (an array).
pub const EVIDENCE_KEY: &str = "evidence";
/// Metadata key the engine sets when a result was accepted degraded.
pub const DEGRADED_KEY: &str = "degraded";

/// The scored outcome of one block execution.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockResult {
    /// The produced value; flows to downstream blocks over data connections.
    pub output: Value,
    /// Self-assessed confidence in `0.0..=1.0`. Evaluation may cap it before
    /// it reaches downstream blocks.
    pub confidence: f64,
    /// Free-form side channel: branch scores, evidence, quality signals.
    #[serde(default, skip_serializing_if = "FxHashMap::is_empty")]
    pub metadata: FxHashMap<String, Value>,
}

impl BlockResult {
    #[must_use]
    pub fn new(output: impl Into<Value>, confidence: f64) -> Self {
        Self {
            output: output.into(),
            confidence,
            metadata: FxHashMap::default(),
        }
    }

    /// Attaches a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Records a branch score for gateway arbitration.
    #[must_use]
    pub fn with_branch_score(mut self, target_block_id: impl Into<String>, score: f64) -> Self {
        let scores = self
            .metadata
            .entry(BRANCH_SCORES_KEY.to_string())
            .or_insert_with(|| json!({}));
        if let Value::Object(map) = scores {
            map.insert(target_block_id.into(), json!(score));
        }
        self
    }

    /// Appends one evidence line.
    #[must_use]
    pub fn with_evidence(mut self, line: impl Into<String>) -> Self {
        let evidence = self
            .metadata
            .entry(EVIDENCE_KEY.to_string())
            .or_insert_with(|| json!([]));
        if let Value::Array(lines) = evidence {
            lines.push(json!(line.into()));
        }
        self
    }

    /// The branch scores reported for arbitration. Non-numeric entries are
    /// skipped.
    #[must_use]
    pub fn branch_scores(&self) -> FxHashMap<String, f64> {
        self.metadata
            .get(BRANCH_SCORES_KEY)
            .and_then(Value::as_object)
            .map(|map| {
                map.iter()
                    .filter_map(|(k, v)| v.as_f64().map(|s| (k.clone(), s)))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The evidence lines attached to this result.
    #[must_use]
    pub fn evidence(&self) -> Vec<String> {
        self.metadata
            .get(EVIDENCE_KEY)
            .and_then(Value::as_array)
            .map(|lines| {
                lines
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Marks this result as accepted under a degrade recovery.
    pub fn mark_degraded(&mut self) {
        self.metadata.insert(DEGRADED_KEY.to_string(), json!(true));
    }

    /// Whether this result was accepted degraded.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.metadata
            .get(DEGRADED_KEY)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Enforces the confidence contract.
    pub fn validate_confidence(&self) -> Result<(), ExecutorError> {
        if self.confidence.is_finite() && (0.0..=1.0).contains(&self.confidence) {
            Ok(())
        } else {
            Err(ExecutorError::ConfidenceOutOfRange {
                value: self.confidence,
            })
        }
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// Failure of a block's external work.
///
/// Executor errors are opaque to the engine: it does not interpret them
/// beyond recording and offering them to recovery. All variants are
/// retryable in principle.
#[derive(Debug, Error, Diagnostic)]
pub enum ExecutorError {
    /// The executor cannot handle this block.
    #[error("no executor support for {block_type} block {block_id:?}")]
    #[diagnostic(code(reasonflow::executor::unsupported))]
    Unsupported {
        block_type: BlockType,
        block_id: String,
    },

    /// The work exceeded the executor's own deadline.
    #[error("execution timed out after {waited_ms} ms")]
    #[diagnostic(
        code(reasonflow::executor::timeout),
        help("timeouts are owned by the executor; the engine imposes none")
    )]
    Timeout { waited_ms: u64 },

    /// External provider or service failure.
    #[error("provider error ({provider}): {message}")]
    #[diagnostic(code(reasonflow::executor::provider))]
    Provider { provider: String, message: String },

    /// The result violated the confidence contract.
    #[error("confidence {value} outside 0.0..=1.0")]
    #[diagnostic(
        code(reasonflow::executor::confidence_out_of_range),
        help("executors must self-assess within the unit interval")
    )]
    ConfidenceOutOfRange { value: f64 },

    /// The run was cancelled while the executor was in flight.
    #[error("execution cancelled")]
    #[diagnostic(code(reasonflow::executor::cancelled))]
    Cancelled,

    /// JSON handling failure inside the executor.
    #[error(transparent)]
    #[diagnostic(code(reasonflow::executor::serde_json))]
    Serde(#[from] serde_json::Error),

    /// Anything else.
    #[error("{0}")]
    #[diagnostic(code(reasonflow::executor::other))]
    Other(String),
}

// ============================================================================
// Registry
// ============================================================================

/// Maps block types to their executor implementations.
///
/// One implementation per type. Goal and Exit are native to the engine;
/// attempts to register them are ignored with a warning, mirroring how the
/// walk itself never dispatches them.
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    executors: FxHashMap<BlockType, Arc<dyn BlockExecutor>>,
}

impl ExecutorRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an executor for a block type, replacing any previous one.
    #[must_use]
    pub fn register(
        mut self,
        block_type: BlockType,
        executor: impl BlockExecutor + 'static,
    ) -> Self {
        if !block_type.requires_executor() {
            tracing::warn!(
                %block_type,
                "ignoring executor registration for natively handled block type"
            );
            return self;
        }
        self.executors.insert(block_type, Arc::new(executor));
        self
    }

    /// Looks up the executor for a block type.
    #[must_use]
    pub fn get(&self, block_type: BlockType) -> Option<Arc<dyn BlockExecutor>> {
        self.executors.get(&block_type).cloned()
    }

    /// Block ids in `workflow` whose type has no registered executor.
    /// Natively handled types never appear.
    #[must_use]
    pub fn missing_for<'a>(&self, workflow: &'a Workflow) -> Vec<(&'a str, BlockType)> {
        workflow
            .blocks
            .iter()
            .filter(|b| b.block_type.requires_executor() && !self.executors.contains_key(&b.block_type))
            .map(|b| (b.id.as_str(), b.block_type))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticExecutor {
        confidence: f64,
    }

    #[async_trait]
    impl BlockExecutor for StaticExecutor {
        async fn execute(
            &self,
            block: &Block,
            _inputs: &DataInputs,
            _ctx: ExecutorContext,
        ) -> Result<BlockResult, ExecutorError> {
            Ok(BlockResult::new(json!({"block": block.id}), self.confidence))
        }
    }

    fn ctx() -> ExecutorContext {
        ExecutorContext {
            run_id: Uuid::new_v4(),
            block_id: "blk".to_string(),
            step: 1,
            cancel: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn registry_dispatches_by_block_type() {
        let registry = ExecutorRegistry::new()
            .register(BlockType::Reasoning, StaticExecutor { confidence: 0.8 });
        let executor = registry.get(BlockType::Reasoning).unwrap();
        let block = Block::new("blk", BlockType::Reasoning, "Blk");
        let result = executor
            .execute(&block, &DataInputs::default(), ctx())
            .await
            .unwrap();
        assert_eq!(result.output["block"], json!("blk"));
        assert!(registry.get(BlockType::Context).is_none());
    }

    #[tokio::test]
    async fn native_types_cannot_be_registered() {
        let registry = ExecutorRegistry::new()
            .register(BlockType::Goal, StaticExecutor { confidence: 1.0 })
            .register(BlockType::Exit, StaticExecutor { confidence: 1.0 });
        assert!(registry.get(BlockType::Goal).is_none());
        assert!(registry.get(BlockType::Exit).is_none());
    }

    #[test]
    fn missing_for_reports_unregistered_types_only() {
        let mut workflow = Workflow::new("wf");
        workflow.blocks = vec![
            Block::new("goal", BlockType::Goal, "Goal"),
            Block::new("think", BlockType::Reasoning, "Think"),
            Block::new("gate", BlockType::Gateway, "Gate"),
            Block::new("done", BlockType::Exit, "Done"),
        ];
        let registry = ExecutorRegistry::new()
            .register(BlockType::Reasoning, StaticExecutor { confidence: 0.9 });
        let missing = registry.missing_for(&workflow);
        assert_eq!(missing, vec![("gate", BlockType::Gateway)]);
    }

    #[test]
    fn branch_scores_round_trip_through_metadata() {
        let result = BlockResult::new(json!(null), 0.9)
            .with_branch_score("left", 0.7)
            .with_branch_score("right", 0.4);
        let scores = result.branch_scores();
        assert_eq!(scores.get("left"), Some(&0.7));
        assert_eq!(scores.get("right"), Some(&0.4));
    }

    #[test]
    fn evidence_lines_accumulate_in_order() {
        let result = BlockResult::new(json!("x"), 0.5)
            .with_evidence("rule 12 matched")
            .with_evidence("customer is premium");
        assert_eq!(
            result.evidence(),
            vec!["rule 12 matched".to_string(), "customer is premium".to_string()]
        );
    }

    #[test]
    fn confidence_contract_rejects_out_of_range_values() {
        assert!(BlockResult::new(json!(1), 0.0).validate_confidence().is_ok());
        assert!(BlockResult::new(json!(1), 1.0).validate_confidence().is_ok());
        for bad in [-0.1, 1.2, f64::NAN, f64::INFINITY] {
            let err = BlockResult::new(json!(1), bad).validate_confidence().unwrap_err();
            assert!(matches!(err, ExecutorError::ConfidenceOutOfRange { .. }));
        }
    }

    #[test]
    fn degraded_flag_is_sticky() {
        let mut result = BlockResult::new(json!("partial"), 0.2);
        assert!(!result.is_degraded());
        result.mark_degraded();
        assert!(result.is_degraded());
    }
}
