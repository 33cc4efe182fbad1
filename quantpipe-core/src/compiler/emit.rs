use super::contracts::ContractOutcome;
use super::ir::{CompiledNode, EdgeType, IrEdge, IrMetadata, PipelineIr, IR_VERSION};
use super::schema::is_builtin_type;
use crate::registry::NodeRegistry;
use crate::types::{NodeDecl, OutputSchema, RuntimeKind};
use chrono::Utc;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// Assemble the final IR from the outputs of the compile passes.
///
/// Nodes keep their declaration order; `execution_order` carries the
/// topological schedule. Only called once every pass ran clean.
pub fn emit(
    pipeline_id: &str,
    name: Option<String>,
    description: Option<String>,
    nodes: &[NodeDecl],
    order: &[String],
    normalized_params: &HashMap<String, serde_json::Map<String, serde_json::Value>>,
    contracts: &ContractOutcome,
    registry: &dyn NodeRegistry,
) -> PipelineIr {
    let mut compiled = Vec::with_capacity(nodes.len());
    let mut edges = Vec::new();

    for node in nodes {
        let (runtime, metadata) = resolve_runtime(node, registry);

        for dep in &node.depends_on {
            edges.push(IrEdge {
                from: dep.clone(),
                to: node.id.clone(),
                edge_type: EdgeType::Data,
                data_type: contracts
                    .output_schemas
                    .get(dep)
                    .map(|s| s.tag().to_string()),
            });
        }

        compiled.push(CompiledNode {
            id: node.id.clone(),
            node_type: node.node_type.clone(),
            runtime,
            dependencies: node.depends_on.clone(),
            parameters: normalized_params.get(&node.id).cloned().unwrap_or_default(),
            input_schema: contracts.input_schemas.get(&node.id).cloned(),
            output_schema: contracts
                .output_schemas
                .get(&node.id)
                .cloned()
                .unwrap_or(OutputSchema::Null),
            metadata,
        });
    }

    let content_hash = content_hash(pipeline_id, &compiled, &edges, order);

    PipelineIr {
        id: pipeline_id.to_string(),
        name,
        description,
        version: IR_VERSION.to_string(),
        metadata: IrMetadata {
            compiled_at: Utc::now(),
            compiler: format!("quantpipe-core {}", env!("CARGO_PKG_VERSION")),
            total_nodes: compiled.len(),
            has_circular_dependencies: false,
        },
        nodes: compiled,
        dependencies: edges,
        execution_order: order.to_vec(),
        content_hash,
    }
}

/// Built-in node types run in-process; custom types carry their own
/// runtime and worker entrypoint from the registry.
fn resolve_runtime(
    node: &NodeDecl,
    registry: &dyn NodeRegistry,
) -> (RuntimeKind, serde_json::Map<String, serde_json::Value>) {
    let mut metadata = serde_json::Map::new();
    if is_builtin_type(&node.node_type) {
        return (RuntimeKind::Builtin, metadata);
    }
    match registry.info(&node.node_type) {
        Some(info) => {
            if let Some(entrypoint) = &info.entrypoint {
                metadata.insert("entrypoint".to_string(), serde_json::json!(entrypoint));
            }
            (info.runtime, metadata)
        }
        None => (RuntimeKind::Builtin, metadata),
    }
}

/// SHA-256 over the compile-time-independent parts of the IR. Two
/// compilations of the same source differ only in `compiled_at`, so
/// their hashes are equal.
fn content_hash(
    pipeline_id: &str,
    nodes: &[CompiledNode],
    edges: &[IrEdge],
    order: &[String],
) -> [u8; 32] {
    #[derive(Serialize)]
    struct Hashable<'a> {
        id: &'a str,
        version: &'a str,
        nodes: &'a [CompiledNode],
        dependencies: &'a [IrEdge],
        execution_order: &'a [String],
    }

    let bytes = serde_json::to_vec(&Hashable {
        id: pipeline_id,
        version: IR_VERSION,
        nodes,
        dependencies: edges,
        execution_order: order,
    })
    .unwrap_or_default();

    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    hasher.finalize().into()
}
