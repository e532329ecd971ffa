use reasonflow::engine::{Engine, EngineConfig, TraceConfig};
use reasonflow::executor::ExecutorRegistry;
use reasonflow::recovery::RecoveryStrategy;
use reasonflow::trace::{TraceEvent, TraceRecord};

/// An engine that emits no console output, so test logs stay readable.
#[allow(dead_code)]
pub fn silent_engine(executors: ExecutorRegistry) -> Engine {
    Engine::with_config(
        executors,
        EngineConfig::new().with_trace(TraceConfig::silent()),
    )
}

/// The event kinds of a trace, in emission order.
#[allow(dead_code)]
pub fn kinds(trace: &[TraceRecord]) -> Vec<&'static str> {
    trace.iter().map(|record| record.event.kind()).collect()
}

#[allow(dead_code)]
pub fn count_kind(trace: &[TraceRecord], kind: &str) -> usize {
    trace
        .iter()
        .filter(|record| record.event.kind() == kind)
        .count()
}

/// The strategy of every recovery event on the trace, in order.
#[allow(dead_code)]
pub fn recovery_strategies(trace: &[TraceRecord]) -> Vec<RecoveryStrategy> {
    trace
        .iter()
        .filter_map(|record| match &record.event {
            TraceEvent::Recovery(event) => Some(event.strategy),
            _ => None,
        })
        .collect()
}

/// Block ids of `block_started` events, in order. Handy for asserting the
/// path the cursor actually took.
#[allow(dead_code)]
pub fn started_blocks(trace: &[TraceRecord]) -> Vec<String> {
    trace
        .iter()
        .filter_map(|record| match &record.event {
            TraceEvent::BlockStarted { block_id, .. } => Some(block_id.clone()),
            _ => None,
        })
        .collect()
}
