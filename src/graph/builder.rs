//! Fluent construction of [`Workflow`] values.
//!
//! [`WorkflowBuilder`] is the programmatic counterpart of the authoring UI:
//! it assembles blocks and connections in declaration order and hands back a
//! plain [`Workflow`]. The builder performs no validation; run
//! [`validate`](crate::graph::validate) on the result, exactly as the engine
//! does before a run.

use chrono::Utc;

use crate::graph::block::Block;
use crate::graph::connection::Connection;
use crate::graph::properties::{BlockProperties, GoalProperties};
use crate::graph::workflow::{Workflow, WorkflowMetadata};
use crate::types::BlockType;

/// Builder for constructing workflows with a fluent API.
///
/// Blocks and connections keep their declaration order; that order is
/// meaningful downstream (gateway tie-breaks pick the first declared edge).
///
/// # Examples
///
/// ```
/// use reasonflow::graph::WorkflowBuilder;
/// use reasonflow::types::BlockType;
///
/// let workflow = WorkflowBuilder::new("support-triage")
///     .goal("goal", "Route the ticket to the right queue")
///     .block_with("classify", BlockType::Reasoning, "Classify ticket", |b| b)
///     .exit("done", "Routed")
///     .connect("goal", "classify")
///     .connect("classify", "done")
///     .build();
///
/// assert_eq!(workflow.blocks.len(), 3);
/// assert_eq!(workflow.connections.len(), 2);
/// ```
pub struct WorkflowBuilder {
    /// Workflow identifier carried into the built value.
    pub id: String,
    /// Blocks in declaration order.
    pub blocks: Vec<Block>,
    /// Connections in declaration order.
    pub connections: Vec<Connection>,
    /// Metadata for the built workflow; `name` defaults to the id.
    pub metadata: WorkflowMetadata,
}

impl WorkflowBuilder {
    /// Creates an empty builder for a workflow with the given id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            metadata: WorkflowMetadata::new(&id),
            id,
            blocks: Vec::new(),
            connections: Vec::new(),
        }
    }

    /// Sets the human-readable workflow name (defaults to the id).
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.metadata.name = name.into();
        self
    }

    /// Sets the workflow description.
    #[must_use]
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.metadata.description = Some(description.into());
        self
    }

    /// Sets the workflow version string.
    #[must_use]
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.metadata.version = Some(version.into());
        self
    }

    /// Adds a prebuilt block.
    ///
    /// Duplicate ids are kept (and warned about) so that validation can
    /// report them; the builder never silently drops author input.
    #[must_use]
    pub fn block(mut self, block: Block) -> Self {
        if self.blocks.iter().any(|b| b.id == block.id) {
            tracing::warn!(block_id = %block.id, "duplicate block id added to builder");
        }
        self.blocks.push(block);
        self
    }

    /// Adds a block of the given type, configured through a closure.
    ///
    /// The closure receives a freshly constructed [`Block`] with default
    /// properties for its type and may refine it with the `Block` builder
    /// methods (`with_properties`, `with_check`, `with_recovery`, ...).
    #[must_use]
    pub fn block_with(
        self,
        id: impl Into<String>,
        block_type: BlockType,
        label: impl Into<String>,
        configure: impl FnOnce(Block) -> Block,
    ) -> Self {
        self.block(configure(Block::new(id, block_type, label)))
    }

    /// Adds a Goal block. The description doubles as its label.
    #[must_use]
    pub fn goal(self, id: impl Into<String>, description: impl Into<String>) -> Self {
        let description = description.into();
        let block = Block::new(id, BlockType::Goal, description.clone()).with_properties(
            BlockProperties::Goal(GoalProperties {
                description: Some(description),
            }),
        );
        self.block(block)
    }

    /// Adds an Exit block.
    #[must_use]
    pub fn exit(self, id: impl Into<String>, label: impl Into<String>) -> Self {
        self.block(Block::new(id, BlockType::Exit, label))
    }

    /// Adds an execution connection between two blocks, using the default
    /// pins and a derived id of the form `"source->target"`.
    #[must_use]
    pub fn connect(self, source: impl Into<String>, target: impl Into<String>) -> Self {
        let (source, target) = (source.into(), target.into());
        let id = format!("{source}->{target}");
        self.connect_via(Connection::execution(id, source, target))
    }

    /// Adds a data connection between two blocks, using the default pins and
    /// a derived id of the form `"data:source->target"`.
    #[must_use]
    pub fn connect_data(self, source: impl Into<String>, target: impl Into<String>) -> Self {
        let (source, target) = (source.into(), target.into());
        let id = format!("data:{source}->{target}");
        self.connect_via(Connection::data(id, source, target))
    }

    /// Adds a fully specified connection (custom pins, explicit id).
    #[must_use]
    pub fn connect_via(mut self, connection: Connection) -> Self {
        self.connections.push(connection);
        self
    }

    /// Finalizes the workflow, stamping `created_at`/`updated_at`.
    #[must_use]
    pub fn build(mut self) -> Workflow {
        let now = Utc::now();
        self.metadata.created_at.get_or_insert(now);
        self.metadata.updated_at = Some(now);
        Workflow {
            id: self.id,
            blocks: self.blocks,
            connections: self.connections,
            metadata: self.metadata,
        }
    }
}
