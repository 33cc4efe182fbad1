use crate::compiler::schema::ParamSchema;
use crate::types::{OutputSchema, RuntimeKind};
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::RwLock;

/// Metadata for one registered custom node type.
///
/// The core never loads custom node code — only this metadata. The
/// `entrypoint` is the worker script the sandbox hands to the node's
/// host runtime.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeTypeInfo {
    pub name: String,
    /// Host runtime, per node — one registry may mix Python and
    /// JavaScript nodes.
    pub runtime: RuntimeKind,
    #[serde(default)]
    pub param_schema: ParamSchema,
    /// `None` (or `Null`) marks a source node that takes no input.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<OutputSchema>,
    pub output_schema: OutputSchema,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<String>,
}

/// Outcome of checking a set of type references against the registry.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReferenceCheck {
    pub valid: bool,
    pub missing: Vec<String>,
}

/// Lookup interface the compiler and the custom-node runner share.
pub trait NodeRegistry: Send + Sync {
    fn is_custom(&self, node_type: &str) -> bool;

    fn info(&self, node_type: &str) -> Option<NodeTypeInfo>;

    /// Check that every referenced type is known; reports the missing
    /// ones in deterministic order.
    fn validate_references(&self, types: &[String]) -> ReferenceCheck {
        let mut missing: Vec<String> = types
            .iter()
            .filter(|t| !self.is_custom(t))
            .cloned()
            .collect();
        missing.sort();
        missing.dedup();
        ReferenceCheck {
            valid: missing.is_empty(),
            missing,
        }
    }
}

/// In-memory registry. Iteration and reference checks are deterministic
/// because the store is a `BTreeMap`.
pub struct MemoryNodeRegistry {
    inner: RwLock<BTreeMap<String, NodeTypeInfo>>,
}

impl MemoryNodeRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn register(&self, info: NodeTypeInfo) -> Result<()> {
        let mut inner = self.inner.write().map_err(|e| anyhow!("lock: {}", e))?;
        if inner.contains_key(&info.name) {
            return Err(anyhow!("node type already registered: {}", info.name));
        }
        inner.insert(info.name.clone(), info);
        Ok(())
    }

    pub fn list_types(&self) -> Vec<String> {
        self.inner
            .read()
            .map(|inner| inner.keys().cloned().collect())
            .unwrap_or_default()
    }
}

impl Default for MemoryNodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeRegistry for MemoryNodeRegistry {
    fn is_custom(&self, node_type: &str) -> bool {
        self.inner
            .read()
            .map(|inner| inner.contains_key(node_type))
            .unwrap_or(false)
    }

    fn info(&self, node_type: &str) -> Option<NodeTypeInfo> {
        self.inner
            .read()
            .ok()
            .and_then(|inner| inner.get(node_type).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(name: &str, runtime: RuntimeKind) -> NodeTypeInfo {
        NodeTypeInfo {
            name: name.to_string(),
            runtime,
            param_schema: ParamSchema::default(),
            input_schema: None,
            output_schema: OutputSchema::Null,
            entrypoint: Some(format!("{}.py", name.to_lowercase())),
        }
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = MemoryNodeRegistry::new();
        registry.register(sample("Normalize", RuntimeKind::Python)).unwrap();

        assert!(registry.is_custom("Normalize"));
        assert!(!registry.is_custom("DataLoader"));

        let info = registry.info("Normalize").unwrap();
        assert_eq!(info.runtime, RuntimeKind::Python);
        assert!(registry.info("Nope").is_none());
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let registry = MemoryNodeRegistry::new();
        registry.register(sample("X", RuntimeKind::Python)).unwrap();
        let err = registry.register(sample("X", RuntimeKind::Javascript)).unwrap_err();
        assert!(err.to_string().contains("already registered"));
    }

    #[test]
    fn test_validate_references_reports_missing() {
        let registry = MemoryNodeRegistry::new();
        registry.register(sample("Known", RuntimeKind::Python)).unwrap();

        let check = registry.validate_references(&[
            "Known".to_string(),
            "FooBar".to_string(),
            "FooBar".to_string(),
        ]);
        assert!(!check.valid);
        assert_eq!(check.missing, vec!["FooBar"]);

        let check = registry.validate_references(&["Known".to_string()]);
        assert!(check.valid);
        assert!(check.missing.is_empty());
    }

    #[test]
    fn test_mixed_runtimes_per_node() {
        let registry = MemoryNodeRegistry::new();
        registry.register(sample("PyNode", RuntimeKind::Python)).unwrap();
        registry.register(sample("JsNode", RuntimeKind::Javascript)).unwrap();

        assert_eq!(registry.info("PyNode").unwrap().runtime, RuntimeKind::Python);
        assert_eq!(
            registry.info("JsNode").unwrap().runtime,
            RuntimeKind::Javascript
        );
        assert_eq!(registry.list_types(), vec!["JsNode", "PyNode"]);
    }
}
