//! Workflows: the owned collection of blocks and connections, plus the JSON
//! interchange format and the pure editing operations exposed to authoring
//! UIs.

use std::path::Path;

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use chrono::{DateTime, Utc};

use crate::graph::block::Block;
use crate::graph::connection::Connection;
use crate::graph::properties::PropertyError;
use crate::graph::validator::{ValidationReport, validate};

/// Descriptive metadata persisted with a workflow.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowMetadata {
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Longer description shown in template galleries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Author-managed version string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl WorkflowMetadata {
    /// Metadata with only the display name set.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// A reasoning workflow: blocks, connections, metadata.
///
/// `Workflow` is a value type: the engine snapshots it at run start and all
/// editing operations return new values. The persisted representation is a
/// JSON document with top-level `id`, `blocks`, `connections`, `metadata`.
///
/// # Examples
///
/// ```
/// use reasonflow::graph::Workflow;
///
/// let json = r#"{
///     "id": "wf-1",
///     "blocks": [
///         {"id": "g", "type": "goal", "label": "Start"},
///         {"id": "e", "type": "exit", "label": "Done"}
///     ],
///     "connections": [
///         {"id": "c1", "sourceBlockId": "g", "targetBlockId": "e",
///          "sourcePin": "output", "targetPin": "input", "kind": "execution"}
///     ],
///     "metadata": {"name": "Minimal"}
/// }"#;
///
/// let workflow = Workflow::from_json(json).unwrap();
/// assert!(workflow.validate().is_valid());
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    /// Unique workflow id.
    pub id: String,
    /// All blocks, ids unique (enforced by validation).
    #[serde(default)]
    pub blocks: Vec<Block>,
    /// All connections, in declaration order. Declaration order is load-
    /// bearing: arbitration breaks ties by it.
    #[serde(default)]
    pub connections: Vec<Connection>,
    /// Descriptive metadata.
    #[serde(default)]
    pub metadata: WorkflowMetadata,
}

/// Error loading a workflow from its persisted JSON form.
#[derive(Debug, Error, Diagnostic)]
pub enum WorkflowParseError {
    /// The document is not valid JSON or violates the schema (including
    /// typed-property conversion failures, which name the offending block).
    #[error("failed to parse workflow document: {source}")]
    #[diagnostic(
        code(reasonflow::workflow::parse),
        help("the document needs top-level id, blocks, connections, metadata")
    )]
    Json {
        #[from]
        source: serde_json::Error,
    },

    /// The file could not be read.
    #[error("failed to read workflow file {path:?}")]
    #[diagnostic(code(reasonflow::workflow::io))]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Error from a pure editing operation.
#[derive(Debug, Error, Diagnostic)]
pub enum WorkflowEditError {
    /// The addressed block does not exist.
    #[error("no block with id {block_id:?} in workflow {workflow_id:?}")]
    #[diagnostic(code(reasonflow::workflow::unknown_block))]
    UnknownBlock {
        workflow_id: String,
        block_id: String,
    },

    /// The replacement properties failed typed conversion.
    #[error("invalid properties for block {block_id:?}")]
    #[diagnostic(code(reasonflow::workflow::invalid_properties))]
    Properties {
        block_id: String,
        #[source]
        #[diagnostic_source]
        source: PropertyError,
    },
}

impl Workflow {
    /// Creates an empty workflow with the given id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            blocks: Vec::new(),
            connections: Vec::new(),
            metadata: WorkflowMetadata::default(),
        }
    }

    /// Looks up a block by id.
    #[must_use]
    pub fn block(&self, block_id: &str) -> Option<&Block> {
        self.blocks.iter().find(|b| b.id == block_id)
    }

    /// Returns `true` if a block with this id exists.
    #[must_use]
    pub fn has_block(&self, block_id: &str) -> bool {
        self.block(block_id).is_some()
    }

    /// Outbound execution connections of a block, in declaration order.
    pub fn execution_connections_from<'a>(
        &'a self,
        block_id: &'a str,
    ) -> impl Iterator<Item = &'a Connection> + 'a {
        self.connections
            .iter()
            .filter(move |c| c.kind.is_execution() && c.source_block_id == block_id)
    }

    /// Inbound data connections of a block, in declaration order.
    pub fn data_connections_into<'a>(
        &'a self,
        block_id: &'a str,
    ) -> impl Iterator<Item = &'a Connection> + 'a {
        self.connections
            .iter()
            .filter(move |c| c.kind.is_data() && c.target_block_id == block_id)
    }

    /// Runs structural validation. Pure; collects every violation.
    #[must_use]
    pub fn validate(&self) -> ValidationReport {
        validate(self)
    }

    /// Parses a workflow from its persisted JSON document.
    pub fn from_json(json: &str) -> Result<Self, WorkflowParseError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads and parses a workflow document from disk.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, WorkflowParseError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| WorkflowParseError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&contents)
    }

    /// Serializes to the compact persisted JSON document.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Serializes to pretty-printed JSON, the template/export form.
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Returns a new workflow with one block's properties replaced by the
    /// given flat map (re-typed on the way in). The receiver is untouched.
    pub fn update_block_properties(
        &self,
        block_id: &str,
        properties: &Map<String, Value>,
    ) -> Result<Workflow, WorkflowEditError> {
        let Some(index) = self.blocks.iter().position(|b| b.id == block_id) else {
            return Err(WorkflowEditError::UnknownBlock {
                workflow_id: self.id.clone(),
                block_id: block_id.to_string(),
            });
        };
        let updated_block = self.blocks[index]
            .with_properties_map(properties)
            .map_err(|source| WorkflowEditError::Properties {
                block_id: block_id.to_string(),
                source,
            })?;
        let mut updated = self.clone();
        updated.blocks[index] = updated_block;
        Ok(updated)
    }

    /// Returns a new workflow without the given block and without any
    /// connection touching it. The receiver is untouched.
    pub fn remove_block(&self, block_id: &str) -> Result<Workflow, WorkflowEditError> {
        if !self.has_block(block_id) {
            return Err(WorkflowEditError::UnknownBlock {
                workflow_id: self.id.clone(),
                block_id: block_id.to_string(),
            });
        }
        let mut updated = self.clone();
        updated.blocks.retain(|b| b.id != block_id);
        updated.connections.retain(|c| !c.touches(block_id));
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BlockType;
    use serde_json::json;

    fn two_block_workflow() -> Workflow {
        let mut wf = Workflow::new("wf");
        wf.blocks.push(Block::new("g", BlockType::Goal, "Start"));
        wf.blocks.push(Block::new("e", BlockType::Exit, "Done"));
        wf.connections.push(Connection::execution("c1", "g", "e"));
        wf
    }

    #[test]
    fn lookup_helpers() {
        let wf = two_block_workflow();
        assert!(wf.has_block("g"));
        assert!(!wf.has_block("missing"));
        assert_eq!(wf.execution_connections_from("g").count(), 1);
        assert_eq!(wf.data_connections_into("e").count(), 0);
    }

    #[test]
    fn update_block_properties_is_pure() {
        let wf = two_block_workflow();
        let mut props = Map::new();
        props.insert("description".to_string(), json!("revised"));
        let updated = wf.update_block_properties("g", &props).unwrap();

        let BlockProperties::Goal(g) = &updated.block("g").unwrap().properties else {
            panic!("wrong variant");
        };
        assert_eq!(g.description.as_deref(), Some("revised"));

        // Receiver untouched.
        let BlockProperties::Goal(orig) = &wf.block("g").unwrap().properties else {
            panic!("wrong variant");
        };
        assert_eq!(orig.description, None);
    }

    use crate::graph::properties::BlockProperties;

    #[test]
    fn update_unknown_block_errors() {
        let wf = two_block_workflow();
        let err = wf
            .update_block_properties("nope", &Map::new())
            .unwrap_err();
        assert!(matches!(err, WorkflowEditError::UnknownBlock { .. }), "{err}");
    }

    #[test]
    fn remove_block_drops_its_connections() {
        let wf = two_block_workflow();
        let updated = wf.remove_block("e").unwrap();
        assert_eq!(updated.blocks.len(), 1);
        assert!(updated.connections.is_empty());
        // Receiver untouched.
        assert_eq!(wf.blocks.len(), 2);
        assert_eq!(wf.connections.len(), 1);
    }

    #[test]
    fn json_round_trip_is_structurally_identical() {
        let wf = two_block_workflow();
        let json = wf.to_json().unwrap();
        let back = Workflow::from_json(&json).unwrap();
        assert_eq!(back, wf);
    }
}
