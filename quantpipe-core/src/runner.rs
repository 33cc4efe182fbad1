use crate::compiler::CompiledNode;
use crate::config::SandboxConfig;
use crate::registry::NodeRegistry;
use crate::runner_builtin::BuiltinRunner;
use crate::runner_custom::CustomNodeRunner;
use crate::sandbox::{SandboxRunner, WorkerLauncher};
use crate::types::{ExecutionContext, ExecutionResult, RuntimeKind};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

/// A strategy for executing one node. Runners never retry and never
/// panic across the boundary — every failure comes back as a result
/// with `success = false`.
#[async_trait]
pub trait NodeRunner: Send + Sync {
    fn name(&self) -> &'static str;

    fn can_handle(&self, node: &CompiledNode) -> bool;

    async fn execute(
        &self,
        node: &CompiledNode,
        inputs: &BTreeMap<String, serde_json::Value>,
        ctx: &ExecutionContext,
    ) -> ExecutionResult;

    /// Terminate every worker this runner has in flight for the run.
    /// Runners without worker state keep the default no-op.
    async fn cancel(&self, _run_id: Uuid) {}
}

/// Ordered runner list; the first runner whose `can_handle` accepts the
/// node wins.
pub struct RunnerDispatcher {
    runners: Vec<Arc<dyn NodeRunner>>,
}

impl RunnerDispatcher {
    pub fn new(runners: Vec<Arc<dyn NodeRunner>>) -> Self {
        Self { runners }
    }

    /// The standard dispatch order: custom nodes, then the Python and
    /// JavaScript sandboxes, then the in-process built-ins.
    pub fn standard(registry: Arc<dyn NodeRegistry>, config: &SandboxConfig) -> Self {
        Self::new(vec![
            Arc::new(CustomNodeRunner::new(registry, config.clone())),
            Arc::new(SandboxRunner::new(
                RuntimeKind::Python,
                Arc::new(WorkerLauncher::new(config.clone())),
            )),
            Arc::new(SandboxRunner::new(
                RuntimeKind::Javascript,
                Arc::new(WorkerLauncher::new(config.clone())),
            )),
            Arc::new(BuiltinRunner::new()),
        ])
    }

    pub fn select(&self, node: &CompiledNode) -> Option<&Arc<dyn NodeRunner>> {
        self.runners.iter().find(|r| r.can_handle(node))
    }

    /// Broadcast cancellation to every runner that keeps worker state.
    pub async fn cancel_all(&self, run_id: Uuid) {
        for runner in &self.runners {
            runner.cancel(run_id).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::MemoryNodeRegistry;
    use crate::types::OutputSchema;

    fn compiled(node_type: &str, runtime: RuntimeKind) -> CompiledNode {
        CompiledNode {
            id: "n1".to_string(),
            node_type: node_type.to_string(),
            runtime,
            dependencies: vec![],
            parameters: serde_json::Map::new(),
            input_schema: None,
            output_schema: OutputSchema::Null,
            metadata: serde_json::Map::new(),
        }
    }

    #[test]
    fn test_dispatch_order_builtin_fallback() {
        let registry = Arc::new(MemoryNodeRegistry::new());
        let dispatcher = RunnerDispatcher::standard(registry, &SandboxConfig::default());

        let node = compiled("DataLoader", RuntimeKind::Builtin);
        let runner = dispatcher.select(&node).expect("runner");
        assert_eq!(runner.name(), "builtin");
    }

    #[test]
    fn test_dispatch_custom_wins_over_sandbox() {
        use crate::registry::NodeTypeInfo;
        let registry = Arc::new(MemoryNodeRegistry::new());
        registry
            .register(NodeTypeInfo {
                name: "MyNode".to_string(),
                runtime: RuntimeKind::Python,
                param_schema: Default::default(),
                input_schema: None,
                output_schema: OutputSchema::Null,
                entrypoint: Some("my_node.py".to_string()),
            })
            .unwrap();
        let dispatcher = RunnerDispatcher::standard(registry, &SandboxConfig::default());

        // A custom type with a sandbox runtime goes to the custom runner,
        // not the plain Python sandbox.
        let node = compiled("MyNode", RuntimeKind::Python);
        assert_eq!(dispatcher.select(&node).unwrap().name(), "custom");
    }

    #[test]
    fn test_dispatch_sandbox_by_runtime() {
        let registry = Arc::new(MemoryNodeRegistry::new());
        let dispatcher = RunnerDispatcher::standard(registry, &SandboxConfig::default());

        let node = compiled("SomeWorker", RuntimeKind::Javascript);
        assert_eq!(dispatcher.select(&node).unwrap().name(), "javascript-sandbox");

        let node = compiled("SomeWorker", RuntimeKind::Python);
        assert_eq!(dispatcher.select(&node).unwrap().name(), "python-sandbox");
    }

    #[test]
    fn test_no_runner_for_wasm() {
        let registry = Arc::new(MemoryNodeRegistry::new());
        let dispatcher = RunnerDispatcher::standard(registry, &SandboxConfig::default());
        let node = compiled("Future", RuntimeKind::Wasm);
        assert!(dispatcher.select(&node).is_none());
    }
}
