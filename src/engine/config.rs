//! Engine construction knobs.
//!
//! Configuration is plain data passed in at construction time. There are no
//! globals and no environment lookups: an [`Engine`](super::Engine) built
//! from a config behaves the same wherever it runs.

use uuid::Uuid;

use crate::trace::{DEFAULT_TRACE_CAPACITY, MemorySink, StdOutSink, TraceBus};

/// Which sink implementations a run's trace bus drives.
///
/// Sinks configured here are attached to every run the engine starts. Live
/// async consumers do not need a sink at all; they read the
/// [`TraceStream`](crate::trace::TraceStream) from the run handle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SinkConfig {
    /// Render each record to stdout.
    StdOut,
    /// Buffer records in memory.
    Memory,
}

/// Per-run trace delivery settings.
#[derive(Clone, Debug)]
pub struct TraceConfig {
    /// Broadcast buffer size for live subscribers. Slow subscribers lose
    /// live-tail records beyond this window; the history is unaffected.
    pub buffer_capacity: usize,
    /// Sinks attached to every run.
    pub sinks: Vec<SinkConfig>,
}

impl TraceConfig {
    #[must_use]
    pub fn new(buffer_capacity: usize, sinks: Vec<SinkConfig>) -> Self {
        Self {
            buffer_capacity: if buffer_capacity == 0 {
                DEFAULT_TRACE_CAPACITY
            } else {
                buffer_capacity
            },
            sinks,
        }
    }

    /// Stdout rendering only, with the default buffer.
    #[must_use]
    pub fn with_stdout_only() -> Self {
        Self::new(DEFAULT_TRACE_CAPACITY, vec![SinkConfig::StdOut])
    }

    /// No sinks at all. History and live subscriptions still work.
    #[must_use]
    pub fn silent() -> Self {
        Self::new(DEFAULT_TRACE_CAPACITY, Vec::new())
    }

    /// Adds a sink, ignoring duplicates.
    #[must_use]
    pub fn add_sink(mut self, sink: SinkConfig) -> Self {
        if !self.sinks.contains(&sink) {
            self.sinks.push(sink);
        }
        self
    }

    #[must_use]
    pub fn buffer_capacity(&self) -> usize {
        self.buffer_capacity
    }

    #[must_use]
    pub fn sinks(&self) -> &[SinkConfig] {
        &self.sinks
    }

    /// Materializes a bus for one run with the configured sinks attached.
    pub(crate) fn build_trace_bus(&self, run_id: Uuid) -> TraceBus {
        let bus = TraceBus::new(run_id, self.buffer_capacity);
        for sink in &self.sinks {
            match sink {
                SinkConfig::StdOut => bus.add_sink(StdOutSink::default()),
                SinkConfig::Memory => bus.add_sink(MemorySink::default()),
            }
        }
        bus
    }
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self::with_stdout_only()
    }
}

/// Everything an [`Engine`](super::Engine) needs beyond its executors.
#[derive(Clone, Debug, Default)]
pub struct EngineConfig {
    pub trace: TraceConfig,
}

impl EngineConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_trace(mut self, trace: TraceConfig) -> Self {
        self.trace = trace;
        self
    }
}
