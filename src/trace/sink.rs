//! Where the sink worker delivers records.
//!
//! A [`TraceSink`] is the blocking end of the trace pipeline: the
//! [`TraceBus`](super::TraceBus) worker hands it each record in emission
//! order, off the engine's hot path. Live async consumers do not implement
//! this trait; they subscribe for a [`TraceStream`](super::TraceStream)
//! instead.

use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use super::event::TraceRecord;
use crate::telemetry::{PlainFormatter, TraceFormatter};

/// A destination for delivered trace records.
///
/// Implementations may block; the sink worker runs them off the async
/// executor's critical path. An error from `deliver` is logged by the
/// worker and does not stop delivery to other sinks.
pub trait TraceSink: Send + Sync {
    fn deliver(&mut self, record: &TraceRecord) -> io::Result<()>;
}

/// Prints each record as one formatted line on stdout.
///
/// The formatter decides the rendering; the default [`PlainFormatter`]
/// colors lines by event kind when stdout feeds a terminal session.
pub struct StdOutSink<F: TraceFormatter = PlainFormatter> {
    formatter: F,
}

impl Default for StdOutSink {
    fn default() -> Self {
        Self {
            formatter: PlainFormatter::new(),
        }
    }
}

impl<F: TraceFormatter> StdOutSink<F> {
    pub fn with_formatter(formatter: F) -> Self {
        Self { formatter }
    }
}

impl<F: TraceFormatter> TraceSink for StdOutSink<F> {
    fn deliver(&mut self, record: &TraceRecord) -> io::Result<()> {
        let line = self.formatter.format_record(record);
        let mut out = io::stdout().lock();
        out.write_all(line.as_bytes())?;
        out.flush()
    }
}

/// Collects delivered records in memory.
///
/// Clones share the buffer, so a test can keep one handle and give the
/// other to the bus, then assert on [`snapshot`](Self::snapshot) after the
/// worker drains.
#[derive(Clone, Default)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<TraceRecord>>>,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything delivered so far, in delivery order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<TraceRecord> {
        self.records.lock().unwrap().clone()
    }

    /// Empties the shared buffer.
    pub fn clear(&self) {
        self.records.lock().unwrap().clear();
    }
}

impl TraceSink for MemorySink {
    fn deliver(&mut self, record: &TraceRecord) -> io::Result<()> {
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::TraceEvent;
    use uuid::Uuid;

    #[test]
    fn memory_sink_clones_share_one_buffer() {
        let sink = MemorySink::new();
        let mut handle = sink.clone();

        let record = TraceRecord::new(Uuid::new_v4(), TraceEvent::execution_completed("done"));
        handle.deliver(&record).unwrap();

        assert_eq!(sink.snapshot().len(), 1);
        sink.clear();
        assert!(handle.snapshot().is_empty());
    }
}
