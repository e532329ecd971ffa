//! Connections: the dual-flow wiring between blocks.

use serde::{Deserialize, Serialize};

use crate::types::{
    ConnectionKind, DATA_INPUT_PIN, DATA_OUTPUT_PIN, EXECUTION_INPUT_PIN, EXECUTION_OUTPUT_PIN,
};

/// A directed edge between two blocks, on either the execution flow or the
/// data flow.
///
/// Pins are named per block: `input`/`output` for execution connections,
/// `data_input`/`data_output` for data connections. Authoring UIs may use
/// richer pin names (e.g. `data_input:context`) to address multiple inputs on
/// one block; the engine resolves data values per target pin name.
///
/// # Examples
///
/// ```
/// use reasonflow::graph::Connection;
///
/// let exec = Connection::execution("c1", "goal", "classify");
/// assert!(exec.kind.is_execution());
/// assert_eq!(exec.source_pin, "output");
///
/// let data = Connection::data("c2", "context", "classify");
/// assert_eq!(data.target_pin, "data_input");
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    /// Unique connection id within the workflow.
    pub id: String,
    /// Id of the block this connection leaves.
    pub source_block_id: String,
    /// Id of the block this connection enters.
    pub target_block_id: String,
    /// Pin name on the source block.
    pub source_pin: String,
    /// Pin name on the target block.
    pub target_pin: String,
    /// Which flow this connection belongs to.
    pub kind: ConnectionKind,
}

impl Connection {
    /// Creates an execution-flow connection with the default pins.
    #[must_use]
    pub fn execution(
        id: impl Into<String>,
        source: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            source_block_id: source.into(),
            target_block_id: target.into(),
            source_pin: EXECUTION_OUTPUT_PIN.to_string(),
            target_pin: EXECUTION_INPUT_PIN.to_string(),
            kind: ConnectionKind::Execution,
        }
    }

    /// Creates a data-flow connection with the default pins.
    #[must_use]
    pub fn data(
        id: impl Into<String>,
        source: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            source_block_id: source.into(),
            target_block_id: target.into(),
            source_pin: DATA_OUTPUT_PIN.to_string(),
            target_pin: DATA_INPUT_PIN.to_string(),
            kind: ConnectionKind::Data,
        }
    }

    /// Overrides the pin names (builder style).
    #[must_use]
    pub fn with_pins(mut self, source_pin: impl Into<String>, target_pin: impl Into<String>) -> Self {
        self.source_pin = source_pin.into();
        self.target_pin = target_pin.into();
        self
    }

    /// Returns `true` if either endpoint references the given block id.
    #[must_use]
    pub fn touches(&self, block_id: &str) -> bool {
        self.source_block_id == block_id || self.target_block_id == block_id
    }
}
