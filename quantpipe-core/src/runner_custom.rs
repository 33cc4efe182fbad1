use crate::compiler::CompiledNode;
use crate::config::SandboxConfig;
use crate::registry::NodeRegistry;
use crate::runner::NodeRunner;
use crate::sandbox::WorkerLauncher;
use crate::types::{ExecutionContext, ExecutionResult};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

/// Runs user-registered node types in a sandboxed worker. The registry
/// supplies the host runtime and entrypoint per node type; the actual
/// isolation is the shared worker launcher.
pub struct CustomNodeRunner {
    registry: Arc<dyn NodeRegistry>,
    config: SandboxConfig,
    launcher: Arc<WorkerLauncher>,
}

impl CustomNodeRunner {
    pub fn new(registry: Arc<dyn NodeRegistry>, config: SandboxConfig) -> Self {
        let launcher = Arc::new(WorkerLauncher::new(config.clone()));
        Self {
            registry,
            config,
            launcher,
        }
    }
}

#[async_trait]
impl NodeRunner for CustomNodeRunner {
    fn name(&self) -> &'static str {
        "custom"
    }

    fn can_handle(&self, node: &CompiledNode) -> bool {
        self.registry.is_custom(&node.node_type)
    }

    async fn execute(
        &self,
        node: &CompiledNode,
        inputs: &BTreeMap<String, serde_json::Value>,
        ctx: &ExecutionContext,
    ) -> ExecutionResult {
        let Some(info) = self.registry.info(&node.node_type) else {
            return ExecutionResult::failure(
                &node.id,
                format!("custom node type '{}' is not registered", node.node_type),
                0,
            );
        };

        // Prefer the entrypoint baked into the IR; fall back to the
        // registry's current metadata.
        let entrypoint = node
            .metadata
            .get("entrypoint")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .or(info.entrypoint);
        let Some(entrypoint) = entrypoint else {
            return ExecutionResult::failure(
                &node.id,
                format!("custom node type '{}' has no worker entrypoint", node.node_type),
                0,
            );
        };

        let Some(interpreter) = self.config.interpreter_for(info.runtime) else {
            return ExecutionResult::failure(
                &node.id,
                format!(
                    "custom node type '{}' declares unsupported runtime '{}'",
                    node.node_type, info.runtime
                ),
                0,
            );
        };

        let mut command: Vec<String> = interpreter.to_vec();
        command.push(entrypoint);
        self.launcher.run_worker(node, &command, inputs, ctx).await
    }

    async fn cancel(&self, run_id: Uuid) {
        self.launcher.cancel(run_id).await;
    }
}
