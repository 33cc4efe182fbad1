//! The compile pipeline: parse → parameter validation → dependency
//! analysis → contract checking → IR emission.
//!
//! Parse errors are terminal; every later pass accumulates, so one
//! `compile()` call reports as many distinct problems as it can find.

pub mod analyzer;
pub mod contracts;
pub mod emit;
pub mod ir;
pub mod parser;
pub mod schema;

pub use ir::{CompiledNode, EdgeType, IrEdge, IrMetadata, PipelineIr, IR_VERSION};

use crate::error::CompileError;
use crate::registry::NodeRegistry;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// What `compile()` hands back to the caller.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CompilationResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline: Option<PipelineIr>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<CompileError>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl CompilationResult {
    fn failure(errors: Vec<CompileError>, warnings: Vec<String>) -> Self {
        CompilationResult {
            success: false,
            pipeline: None,
            errors,
            warnings,
        }
    }

    /// All errors joined into one line, for surfacing as a run error.
    pub fn error_summary(&self) -> String {
        self.errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Compile a pipeline description into executable IR.
pub fn compile(pipeline_id: &str, text: &str, registry: &dyn NodeRegistry) -> CompilationResult {
    let parsed = match parser::parse_pipeline(text) {
        Ok(p) => p,
        Err(e) => return CompilationResult::failure(vec![e], Vec::new()),
    };

    let mut errors = Vec::new();
    let warnings = parsed.warnings.clone();

    if parsed.nodes.is_empty() {
        errors.push(CompileError::semantic("pipeline contains no nodes"));
        return CompilationResult::failure(errors, warnings);
    }

    // Resolve every non-built-in type through the registry.
    let non_builtin: Vec<String> = parsed
        .nodes
        .iter()
        .filter(|n| !schema::is_builtin_type(&n.node_type))
        .map(|n| n.node_type.clone())
        .collect();
    let check = registry.validate_references(&non_builtin);
    for missing in &check.missing {
        errors.push(CompileError::semantic(format!(
            "unknown node type '{}'",
            missing
        )));
    }
    let unknown_types: HashSet<&String> = check.missing.iter().collect();

    // Per-node parameter validation. Nodes of unknown type are marked
    // failed so the contract pass records them as Null without piling
    // on secondary diagnostics.
    let mut failed: HashSet<String> = HashSet::new();
    let mut normalized: HashMap<String, serde_json::Map<String, serde_json::Value>> =
        HashMap::new();
    for node in &parsed.nodes {
        if unknown_types.contains(&node.node_type) {
            failed.insert(node.id.clone());
            continue;
        }
        let param_schema = schema::builtin_param_schema(&node.node_type)
            .or_else(|| registry.info(&node.node_type).map(|i| i.param_schema));
        if let Some(param_schema) = param_schema {
            let (params, param_errors) = schema::validate_params(node, &param_schema);
            if !param_errors.is_empty() {
                failed.insert(node.id.clone());
            }
            errors.extend(param_errors);
            normalized.insert(node.id.clone(), params);
        } else {
            failed.insert(node.id.clone());
        }
    }

    let analysis = analyzer::analyze(&parsed.nodes);
    errors.extend(analysis.errors.clone());

    // Contract checking needs a valid execution order.
    let contract_outcome = if analysis.errors.is_empty() {
        let outcome = contracts::check(
            &parsed.nodes,
            &analysis.order,
            &normalized,
            registry,
            &failed,
        );
        errors.extend(outcome.errors.clone());
        Some(outcome)
    } else {
        None
    };

    if !errors.is_empty() {
        return CompilationResult::failure(errors, warnings);
    }

    let contract_outcome = match contract_outcome {
        Some(o) => o,
        None => return CompilationResult::failure(errors, warnings),
    };

    let ir = emit::emit(
        pipeline_id,
        parsed.name,
        parsed.description,
        &parsed.nodes,
        &analysis.order,
        &normalized,
        &contract_outcome,
        registry,
    );

    CompilationResult {
        success: true,
        pipeline: Some(ir),
        errors: Vec::new(),
        warnings,
    }
}
