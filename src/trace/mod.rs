//! Run-trace utilities providing history, fan-out, and sink APIs.
//!
//! The module is organised around a per-run [`TraceBus`] that stamps
//! [`TraceEvent`]s into [`TraceRecord`]s, keeps the append-only history,
//! feeds live [`TraceStream`] subscribers, and forwards to [`TraceSink`]s.

pub mod bus;
pub mod event;
pub mod sink;
pub mod stream;

pub use bus::{TraceBus, DEFAULT_TRACE_CAPACITY};
pub use event::{ArbitrationEvent, EvaluationEvent, RecoveryEvent, TraceEvent, TraceRecord};
pub use sink::{MemorySink, StdOutSink, TraceSink};
pub use stream::TraceStream;
