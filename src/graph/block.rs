//! Blocks: the typed nodes of a reasoning workflow.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::evaluation::CheckSpec;
use crate::graph::properties::{
    self, BlockProperties, PropertyError, checks_from_map, recovery_from_map,
};
use crate::recovery::RecoveryPolicy;
use crate::types::BlockType;

/// Canvas coordinates of a block.
///
/// Purely presentational; persisted with the graph so authoring round-trips,
/// never read by the engine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    #[must_use]
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// A logic block: one typed node of the workflow graph.
///
/// In memory the configuration is fully typed ([`BlockProperties`] plus the
/// shared [`CheckSpec`] list and [`RecoveryPolicy`]); in the persisted JSON
/// all of it collapses into the single flat `properties` map alongside `id`,
/// `type`, `label`, `position`, and `toolIds`.
///
/// # Examples
///
/// ```
/// use reasonflow::graph::Block;
/// use reasonflow::types::BlockType;
/// use reasonflow::recovery::RecoveryPolicy;
///
/// let block = Block::new("step-1", BlockType::Reasoning, "Draft an answer")
///     .with_recovery(RecoveryPolicy::retry(2));
/// assert_eq!(block.block_type, BlockType::Reasoning);
///
/// let json = serde_json::to_value(&block).unwrap();
/// assert_eq!(json["type"], "reasoning");
/// assert_eq!(json["properties"]["recoveryStrategy"], "retry");
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct Block {
    /// Unique id within the workflow.
    pub id: String,
    /// Which of the eight logic-block kinds this is.
    pub block_type: BlockType,
    /// Human-readable label shown on the canvas.
    pub label: String,
    /// Canvas coordinates (presentational only).
    pub position: Position,
    /// Type-specific configuration.
    pub properties: BlockProperties,
    /// Evaluation gates run against this block's result.
    pub checks: Vec<CheckSpec>,
    /// What to do when this block fails; `None` means fail outright.
    pub recovery: Option<RecoveryPolicy>,
    /// Ids of external tools the executor may use. Opaque to the engine.
    pub tool_ids: Vec<String>,
}

impl Block {
    /// Creates a block with default configuration for its type.
    #[must_use]
    pub fn new(id: impl Into<String>, block_type: BlockType, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            block_type,
            label: label.into(),
            position: Position::default(),
            properties: BlockProperties::default_for(block_type),
            checks: Vec::new(),
            recovery: None,
            tool_ids: Vec::new(),
        }
    }

    /// Sets the canvas position.
    #[must_use]
    pub fn with_position(mut self, x: f64, y: f64) -> Self {
        self.position = Position::new(x, y);
        self
    }

    /// Replaces the typed configuration.
    ///
    /// The configuration's variant must agree with `block_type`; mismatches
    /// are a programming error caught in debug builds.
    #[must_use]
    pub fn with_properties(mut self, properties: BlockProperties) -> Self {
        debug_assert_eq!(
            properties.block_type(),
            self.block_type,
            "properties variant must match the block type"
        );
        self.properties = properties;
        self
    }

    /// Adds an evaluation gate.
    #[must_use]
    pub fn with_check(mut self, check: CheckSpec) -> Self {
        self.checks.push(check);
        self
    }

    /// Sets the recovery policy.
    #[must_use]
    pub fn with_recovery(mut self, policy: RecoveryPolicy) -> Self {
        self.recovery = Some(policy);
        self
    }

    /// Adds a tool id.
    #[must_use]
    pub fn with_tool(mut self, tool_id: impl Into<String>) -> Self {
        self.tool_ids.push(tool_id.into());
        self
    }

    /// The flat properties map this block persists as.
    #[must_use]
    pub fn properties_map(&self) -> Map<String, Value> {
        let mut map = self.properties.to_map();
        properties::extend_map_with_shared(&mut map, &self.checks, self.recovery.as_ref());
        map
    }

    /// Rebuilds the typed configuration from a flat properties map,
    /// returning the updated block. Used by the pure CRUD operations.
    pub fn with_properties_map(&self, map: &Map<String, Value>) -> Result<Self, PropertyError> {
        let mut updated = self.clone();
        updated.properties = BlockProperties::from_map(self.block_type, map)?;
        updated.checks = checks_from_map(map)?;
        updated.recovery = recovery_from_map(map)?;
        Ok(updated)
    }
}

/// Wire form of a [`Block`]: the persisted JSON shape with the flat
/// properties map.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawBlock {
    id: String,
    #[serde(rename = "type")]
    block_type: BlockType,
    #[serde(default)]
    label: String,
    #[serde(default)]
    position: Position,
    #[serde(default)]
    properties: Map<String, Value>,
    #[serde(default)]
    tool_ids: Vec<String>,
}

impl Serialize for Block {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let raw = RawBlock {
            id: self.id.clone(),
            block_type: self.block_type,
            label: self.label.clone(),
            position: self.position,
            properties: self.properties_map(),
            tool_ids: self.tool_ids.clone(),
        };
        raw.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Block {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = RawBlock::deserialize(deserializer)?;
        let context = |e: PropertyError| D::Error::custom(format!("block {:?}: {e}", raw.id));
        let properties =
            BlockProperties::from_map(raw.block_type, &raw.properties).map_err(context)?;
        let checks = checks_from_map(&raw.properties).map_err(context)?;
        let recovery = recovery_from_map(&raw.properties).map_err(context)?;
        Ok(Block {
            id: raw.id,
            block_type: raw.block_type,
            label: raw.label,
            position: raw.position,
            properties,
            checks,
            recovery,
            tool_ids: raw.tool_ids,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::properties::GatewayProperties;
    use serde_json::json;

    #[test]
    fn block_serializes_to_flat_properties_map() {
        let block = Block::new("g1", BlockType::Gateway, "Route")
            .with_position(120.0, 48.5)
            .with_properties(BlockProperties::Gateway(GatewayProperties {
                confidence_threshold: 0.5,
                strategy: crate::arbitration::ArbitrationStrategy::Hybrid,
            }))
            .with_tool("search");

        let json = serde_json::to_value(&block).unwrap();
        assert_eq!(json["type"], "gateway");
        assert_eq!(json["position"]["x"], 120.0);
        assert_eq!(json["properties"]["confidenceThreshold"], 0.5);
        assert_eq!(json["properties"]["strategy"], "hybrid");
        assert_eq!(json["toolIds"], json!(["search"]));
    }

    #[test]
    fn block_round_trips() {
        let block = Block::new("r1", BlockType::Reasoning, "Think")
            .with_check(CheckSpec::VerifyCitations { required: false })
            .with_recovery(RecoveryPolicy::retry(3));
        let json = serde_json::to_string(&block).unwrap();
        let back: Block = serde_json::from_str(&json).unwrap();
        assert_eq!(back, block);
    }

    #[test]
    fn deserialize_names_the_offending_block() {
        let raw = json!({
            "id": "g1",
            "type": "gateway",
            "label": "Route",
            "properties": {"confidenceThreshold": "not a number"}
        });
        let err = serde_json::from_value::<Block>(raw).unwrap_err();
        assert!(err.to_string().contains("g1"), "{err}");
    }

    #[test]
    fn missing_optional_fields_default() {
        let raw = json!({"id": "x", "type": "exit"});
        let block: Block = serde_json::from_value(raw).unwrap();
        assert_eq!(block.label, "");
        assert_eq!(block.position, Position::default());
        assert!(block.checks.is_empty());
        assert!(block.recovery.is_none());
    }

    #[test]
    fn properties_map_rebuild_replaces_config() {
        let block = Block::new("g", BlockType::Gateway, "Route");
        let mut map = Map::new();
        map.insert("confidenceThreshold".to_string(), json!(0.25));
        let updated = block.with_properties_map(&map).unwrap();
        let BlockProperties::Gateway(g) = &updated.properties else {
            panic!("wrong variant");
        };
        assert_eq!(g.confidence_threshold, 0.25);
        // Original untouched.
        let BlockProperties::Gateway(orig) = &block.properties else {
            panic!("wrong variant");
        };
        assert_eq!(
            orig.confidence_threshold,
            crate::graph::properties::DEFAULT_CONFIDENCE_THRESHOLD
        );
    }
}
