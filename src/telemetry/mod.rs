//! Human-readable output for trace records and run failures.
//!
//! Printing sinks go through a [`TraceFormatter`]; the bundled
//! [`PlainFormatter`] writes one line per record and colors it by what the
//! record *means* — trouble red, recovery yellow, decisions cyan, run
//! lifecycle green — so the exceptional lines stand out in a scrolling
//! trace. The same formatter digests a run's accumulated
//! [`ExecutionError`]s for the failure section of a printed
//! [`RunReport`](crate::engine::RunReport).
//!
//! [`init_tracing`] installs the crate's default `tracing` subscriber for
//! binaries and demos that want engine logs alongside the trace.

use std::fmt::Write as _;
use std::io::IsTerminal;

use tracing_error::ErrorLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use crate::state::ExecutionError;
use crate::trace::{TraceEvent, TraceRecord};

const RED: &str = "\x1b[31m";
const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const RESET: &str = "\x1b[0m";

/// When ANSI escapes are emitted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ColorMode {
    /// Color only when stderr is attached to a terminal.
    #[default]
    Auto,
    /// Always emit escapes, TTY or not.
    Always,
    /// Plain text, for logs and files.
    Never,
}

impl ColorMode {
    /// Resolves the mode to a concrete yes/no (`Auto` probes the TTY).
    #[must_use]
    pub fn enabled(self) -> bool {
        match self {
            ColorMode::Auto => std::io::stderr().is_terminal(),
            ColorMode::Always => true,
            ColorMode::Never => false,
        }
    }
}

/// Renders trace output for printing sinks and report display.
pub trait TraceFormatter: Send + Sync {
    /// One printable line for a record, newline included.
    fn format_record(&self, record: &TraceRecord) -> String;

    /// A multi-line digest of a run's accumulated failures, cause chains
    /// and structured details included. Empty input renders empty.
    fn format_failures(&self, errors: &[ExecutionError]) -> String;
}

/// The color a record's line gets, keyed by what the event signifies.
fn tone(event: &TraceEvent) -> Option<&'static str> {
    match event {
        TraceEvent::ExecutionStarted { .. } | TraceEvent::ExecutionCompleted { .. } => Some(GREEN),
        TraceEvent::Arbitration(_) | TraceEvent::Evaluation(_) => Some(CYAN),
        TraceEvent::Recovery(_) => Some(YELLOW),
        TraceEvent::BlockError { .. }
        | TraceEvent::ExecutionFailed { .. }
        | TraceEvent::EarlyTermination { .. } => Some(RED),
        TraceEvent::BlockStarted { .. } | TraceEvent::BlockCompleted { .. } => None,
    }
}

/// Default line formatter.
///
/// ```
/// use reasonflow::telemetry::{ColorMode, PlainFormatter, TraceFormatter};
/// use reasonflow::trace::{TraceEvent, TraceRecord};
///
/// let formatter = PlainFormatter::with_color(ColorMode::Never);
/// let record = TraceRecord::new(uuid::Uuid::new_v4(), TraceEvent::execution_completed("done"));
/// let line = formatter.format_record(&record);
/// assert!(line.ends_with('\n'));
/// ```
pub struct PlainFormatter {
    color: ColorMode,
}

impl PlainFormatter {
    /// Auto-detecting formatter: colored on a terminal, plain elsewhere.
    #[must_use]
    pub fn new() -> Self {
        Self {
            color: ColorMode::Auto,
        }
    }

    /// Formatter with a fixed color decision.
    #[must_use]
    pub fn with_color(color: ColorMode) -> Self {
        Self { color }
    }

    fn paint(&self, code: Option<&str>, text: &str) -> String {
        match code {
            Some(code) if self.color.enabled() => format!("{code}{text}{RESET}"),
            _ => text.to_string(),
        }
    }
}

impl Default for PlainFormatter {
    fn default() -> Self {
        Self::new()
    }
}

impl TraceFormatter for PlainFormatter {
    fn format_record(&self, record: &TraceRecord) -> String {
        let mut line = self.paint(tone(&record.event), &record.to_string());
        line.push('\n');
        line
    }

    fn format_failures(&self, errors: &[ExecutionError]) -> String {
        let mut out = String::new();
        for (index, entry) in errors.iter().enumerate() {
            let heading = format!(
                "{}. {} at {}",
                index + 1,
                entry.scope,
                entry.when.format("%H:%M:%S%.3f"),
            );
            let _ = writeln!(out, "{}", self.paint(Some(RED), &heading));
            let _ = writeln!(out, "   {}", entry.error.message);
            let mut link = entry.error.cause.as_deref();
            let mut depth = 1;
            while let Some(cause) = link {
                let _ = writeln!(out, "   {}caused by: {}", "  ".repeat(depth), cause.message);
                link = cause.cause.as_deref();
                depth += 1;
            }
            if !entry.error.details.is_null() {
                let _ = writeln!(out, "   details: {}", entry.error.details);
            }
        }
        out
    }
}

/// Install the crate's default `tracing` subscriber.
///
/// Respects `RUST_LOG` when set, otherwise logs errors only. Repeated calls
/// are no-ops, so demos and tests can call it unconditionally.
pub fn init_tracing() {
    let fmt_layer = fmt::layer()
        .with_target(false)
        .with_file(false)
        .with_line_number(false);

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("error,reasonflow=error"))
        .expect("default filter directive is valid");

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .with(ErrorLayer::default())
        .try_init();
}
