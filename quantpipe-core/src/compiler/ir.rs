use crate::types::{NodeId, OutputSchema, RuntimeKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// IR format version understood by the executor.
pub const IR_VERSION: &str = "1.0";

/// One fully resolved node in the compiled pipeline.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CompiledNode {
    pub id: NodeId,
    #[serde(rename = "type")]
    pub node_type: String,
    pub runtime: RuntimeKind,
    pub dependencies: Vec<NodeId>,
    /// Validated parameters with defaults applied.
    pub parameters: serde_json::Map<String, serde_json::Value>,
    /// Schema of the primary (first) input, if the node takes any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<OutputSchema>,
    pub output_schema: OutputSchema,
    /// Per-node annotations (e.g. the worker entrypoint of a custom node).
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeType {
    Data,
    Control,
}

/// One dependency edge in the compiled pipeline.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IrEdge {
    pub from: NodeId,
    pub to: NodeId,
    #[serde(rename = "type")]
    pub edge_type: EdgeType,
    /// Output tag of the producing node ("dataframe", ...), for data edges.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_type: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IrMetadata {
    pub compiled_at: DateTime<Utc>,
    pub compiler: String,
    pub total_nodes: usize,
    /// Always false — a cyclic pipeline never compiles.
    pub has_circular_dependencies: bool,
}

/// The validated, linearized pipeline handed from the compiler to the
/// executor. `execution_order` is a topological sort of `nodes`; every
/// id in any `dependencies` is defined in `nodes`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PipelineIr {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub version: String,
    pub metadata: IrMetadata,
    pub nodes: Vec<CompiledNode>,
    pub dependencies: Vec<IrEdge>,
    pub execution_order: Vec<NodeId>,
    /// SHA-256 over the compile-time-independent parts of the IR.
    /// Recompiling identical input yields an identical hash.
    pub content_hash: [u8; 32],
}

impl PipelineIr {
    pub fn node(&self, id: &str) -> Option<&CompiledNode> {
        self.nodes.iter().find(|n| n.id == id)
    }
}
