use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use serde_json::json;
use tokio::sync::Notify;

use reasonflow::executor::{
    BlockExecutor, BlockResult, DataInputs, ExecutorContext, ExecutorError,
};
use reasonflow::graph::Block;

/// Succeeds every call with a fixed confidence, echoing the block id and
/// whatever data inputs arrived.
pub struct StaticExecutor {
    pub confidence: f64,
}

impl StaticExecutor {
    #[allow(dead_code)]
    pub fn new(confidence: f64) -> Self {
        Self { confidence }
    }
}

#[async_trait]
impl BlockExecutor for StaticExecutor {
    async fn execute(
        &self,
        block: &Block,
        inputs: &DataInputs,
        _ctx: ExecutorContext,
    ) -> Result<BlockResult, ExecutorError> {
        Ok(BlockResult::new(
            json!({ "from": block.id.clone(), "inputs": inputs.clone() }),
            self.confidence,
        ))
    }
}

type Script = Result<BlockResult, String>;

/// Plays back a queue of outcomes per block id and counts invocations.
///
/// Blocks with no (or an exhausted) script succeed with the default
/// confidence, so "fail twice, then recover" is two queued errors. Shared
/// across block types by registering an `Arc` of it.
#[derive(Default)]
pub struct ScriptedExecutor {
    scripts: Mutex<FxHashMap<String, VecDeque<Script>>>,
    default_confidence: f64,
    calls: AtomicU32,
}

impl ScriptedExecutor {
    pub fn new(default_confidence: f64) -> Self {
        Self {
            scripts: Mutex::new(FxHashMap::default()),
            default_confidence,
            calls: AtomicU32::new(0),
        }
    }

    /// Queues a successful result for the block's next execution.
    #[allow(dead_code)]
    pub fn then_ok(self, block_id: &str, result: BlockResult) -> Self {
        self.push(block_id, Ok(result));
        self
    }

    /// Queues an executor error for the block's next execution.
    #[allow(dead_code)]
    pub fn then_err(self, block_id: &str, message: &str) -> Self {
        self.push(block_id, Err(message.to_string()));
        self
    }

    fn push(&self, block_id: &str, script: Script) {
        self.scripts
            .lock()
            .unwrap()
            .entry(block_id.to_string())
            .or_default()
            .push_back(script);
    }

    /// Total executions across all blocks.
    #[allow(dead_code)]
    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BlockExecutor for ScriptedExecutor {
    async fn execute(
        &self,
        block: &Block,
        _inputs: &DataInputs,
        _ctx: ExecutorContext,
    ) -> Result<BlockResult, ExecutorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&block.id)
            .and_then(VecDeque::pop_front);
        match next {
            Some(Ok(result)) => Ok(result),
            Some(Err(message)) => Err(ExecutorError::Provider {
                provider: "scripted".to_string(),
                message,
            }),
            None => Ok(BlockResult::new(
                json!({ "from": block.id.clone() }),
                self.default_confidence,
            )),
        }
    }
}

/// Signals that it started, then never returns. Lets tests cancel a run
/// while a block is provably in flight.
#[derive(Clone, Default)]
pub struct HangingExecutor {
    pub started: Arc<Notify>,
}

#[async_trait]
impl BlockExecutor for HangingExecutor {
    async fn execute(
        &self,
        _block: &Block,
        _inputs: &DataInputs,
        _ctx: ExecutorContext,
    ) -> Result<BlockResult, ExecutorError> {
        self.started.notify_one();
        std::future::pending().await
    }
}
