use crate::compiler::{self, CompilationResult};
use crate::config::EngineConfig;
use crate::error::ExecError;
use crate::events::RunEvent;
use crate::registry::NodeRegistry;
use crate::runner::RunnerDispatcher;
use crate::runs::{RunStatus, RunStore};
use crate::types::*;
use anyhow::Result;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// PipelineEngine is the top-level facade that wires together the
/// compiler, the runner dispatcher, and the run store. External callers
/// (CLI, API handlers) delegate to this.
pub struct PipelineEngine {
    run_store: Arc<dyn RunStore>,
    registry: Arc<dyn NodeRegistry>,
    dispatcher: RunnerDispatcher,
    config: EngineConfig,
}

impl PipelineEngine {
    /// Engine with the standard runner set (custom → python sandbox →
    /// javascript sandbox → builtin).
    pub fn new(
        run_store: Arc<dyn RunStore>,
        registry: Arc<dyn NodeRegistry>,
        config: EngineConfig,
    ) -> Self {
        let dispatcher = RunnerDispatcher::standard(registry.clone(), &config.sandbox);
        Self {
            run_store,
            registry,
            dispatcher,
            config,
        }
    }

    /// Engine with a caller-supplied runner list. Used by tests and by
    /// embedders that bring their own runners.
    pub fn with_dispatcher(
        run_store: Arc<dyn RunStore>,
        registry: Arc<dyn NodeRegistry>,
        dispatcher: RunnerDispatcher,
        config: EngineConfig,
    ) -> Self {
        Self {
            run_store,
            registry,
            dispatcher,
            config,
        }
    }

    /// Compile a pipeline description without executing it.
    pub fn compile(&self, pipeline_id: &str, text: &str) -> CompilationResult {
        compiler::compile(pipeline_id, text, self.registry.as_ref())
    }

    /// Compile and execute a pipeline, walking nodes in topological
    /// order. Fail-fast: the first node failure stops the run. The
    /// cancellation flag is checked before every node dispatch.
    pub async fn execute(&self, pipeline_id: &str, text: &str) -> PipelineExecutionResult {
        let run_id = Uuid::now_v7();
        let started = Instant::now();

        let _ = self.run_store.mark_active(run_id, pipeline_id).await;

        let mut compiled = self.compile(pipeline_id, text);
        let ir = match compiled.pipeline.take().filter(|_| compiled.success) {
            Some(ir) => ir,
            None => {
                let error = compiled.error_summary();
                tracing::warn!(%run_id, pipeline_id, %error, "compilation failed");
                let _ = self
                    .run_store
                    .append_event(
                        run_id,
                        &RunEvent::RunFailed {
                            at: now_ms(),
                            error: error.clone(),
                        },
                    )
                    .await;
                let _ = self.run_store.unregister(run_id).await;
                return PipelineExecutionResult {
                    run_id,
                    success: false,
                    results: BTreeMap::new(),
                    final_outputs: BTreeMap::new(),
                    total_execution_time_ms: elapsed_ms(started),
                    error: Some(error),
                    cancelled: false,
                };
            }
        };

        tracing::info!(%run_id, pipeline_id, nodes = ir.metadata.total_nodes, "run started");
        let _ = self
            .run_store
            .append_event(
                run_id,
                &RunEvent::RunStarted {
                    run_id,
                    pipeline_id: pipeline_id.to_string(),
                    total_nodes: ir.metadata.total_nodes,
                },
            )
            .await;

        let ctx = ExecutionContext {
            run_id,
            pipeline_id: pipeline_id.to_string(),
            working_dir: self.config.runs_root.join(run_id.to_string()),
            datasets: self.config.datasets.clone(),
        };
        if let Err(e) = tokio::fs::create_dir_all(&ctx.working_dir).await {
            return self
                .finish_internal(
                    run_id,
                    started,
                    BTreeMap::new(),
                    BTreeMap::new(),
                    format!("failed to create run directory: {}", e),
                )
                .await;
        }

        let mut results: BTreeMap<NodeId, ExecutionResult> = BTreeMap::new();
        let mut final_outputs: BTreeMap<NodeId, serde_json::Value> = BTreeMap::new();

        for node_id in &ir.execution_order {
            match self.run_store.is_cancelled(run_id).await {
                Ok(true) => {
                    return self
                        .finish_cancelled(run_id, started, results, final_outputs)
                        .await
                }
                Ok(false) => {}
                Err(e) => {
                    return self
                        .finish_internal(
                            run_id,
                            started,
                            results,
                            final_outputs,
                            format!("run store failure: {}", e),
                        )
                        .await
                }
            }

            // Anything wrong from here to dispatch is a compiler or
            // engine bug, not a node failure.
            let node = match ir.node(node_id) {
                Some(n) => n,
                None => {
                    return self
                        .finish_internal(
                            run_id,
                            started,
                            results,
                            final_outputs,
                            format!("execution order references unknown node '{}'", node_id),
                        )
                        .await
                }
            };

            let mut inputs = BTreeMap::new();
            for dep in &node.dependencies {
                match final_outputs.get(dep) {
                    Some(output) => {
                        inputs.insert(dep.clone(), output.clone());
                    }
                    None => {
                        return self
                            .finish_internal(
                                run_id,
                                started,
                                results,
                                final_outputs,
                                format!(
                                    "missing output for dependency '{}' of node '{}'",
                                    dep, node_id
                                ),
                            )
                            .await
                    }
                }
            }

            let Some(runner) = self.dispatcher.select(node) else {
                return self
                    .finish_internal(
                        run_id,
                        started,
                        results,
                        final_outputs,
                        format!(
                            "no runner accepts node '{}' (type '{}', runtime '{}')",
                            node_id, node.node_type, node.runtime
                        ),
                    )
                    .await;
            };

            tracing::info!(%run_id, node_id = %node.id, runner = runner.name(), "node started");
            let _ = self
                .run_store
                .append_event(
                    run_id,
                    &RunEvent::NodeStarted {
                        node_id: node.id.clone(),
                        runtime: node.runtime,
                    },
                )
                .await;

            let result = runner.execute(node, &inputs, &ctx).await;

            if result.success {
                let _ = self
                    .run_store
                    .append_event(
                        run_id,
                        &RunEvent::NodeCompleted {
                            node_id: node.id.clone(),
                            execution_time_ms: result.execution_time_ms,
                        },
                    )
                    .await;
                final_outputs.insert(
                    node_id.clone(),
                    result.output.clone().unwrap_or(serde_json::Value::Null),
                );
                results.insert(node_id.clone(), result);
            } else {
                let message = result
                    .error
                    .clone()
                    .unwrap_or_else(|| "unknown error".to_string());
                tracing::warn!(%run_id, node_id = %node.id, error = %message, "node failed");
                let _ = self
                    .run_store
                    .append_event(
                        run_id,
                        &RunEvent::NodeFailed {
                            node_id: node.id.clone(),
                            error: message.clone(),
                        },
                    )
                    .await;
                results.insert(node_id.clone(), result);

                // A worker killed by cancellation reports "cancelled";
                // surface that as a cancelled run, not a node failure.
                let was_cancelled = message == ExecError::Cancelled.to_string()
                    || self.run_store.is_cancelled(run_id).await.unwrap_or(false);
                if was_cancelled {
                    return self
                        .finish_cancelled(run_id, started, results, final_outputs)
                        .await;
                }

                let error = ExecError::NodeFailed {
                    node_id: node_id.clone(),
                    message,
                }
                .to_string();
                let _ = self
                    .run_store
                    .append_event(
                        run_id,
                        &RunEvent::RunFailed {
                            at: now_ms(),
                            error: error.clone(),
                        },
                    )
                    .await;
                let _ = self.run_store.unregister(run_id).await;
                return PipelineExecutionResult {
                    run_id,
                    success: false,
                    results,
                    final_outputs,
                    total_execution_time_ms: elapsed_ms(started),
                    error: Some(error),
                    cancelled: false,
                };
            }
        }

        let total = elapsed_ms(started);
        tracing::info!(%run_id, total_execution_time_ms = total, "run completed");
        let _ = self
            .run_store
            .append_event(
                run_id,
                &RunEvent::RunCompleted {
                    at: now_ms(),
                    total_execution_time_ms: total,
                },
            )
            .await;
        let _ = self.run_store.unregister(run_id).await;

        PipelineExecutionResult {
            run_id,
            success: true,
            results,
            final_outputs,
            total_execution_time_ms: total,
            error: None,
            cancelled: false,
        }
    }

    /// Cancel a run: set the flag and signal every runner with workers
    /// in flight. Idempotent; false when the run is unknown.
    pub async fn cancel(&self, run_id: Uuid) -> bool {
        let known = self.run_store.mark_cancelled(run_id).await.unwrap_or(false);
        if known {
            tracing::info!(%run_id, "cancelling run");
            self.dispatcher.cancel_all(run_id).await;
            let _ = self
                .run_store
                .append_event(run_id, &RunEvent::RunCancelled { at: now_ms() })
                .await;
        }
        known
    }

    pub async fn run_status(&self, run_id: Uuid) -> Result<Option<RunStatus>> {
        self.run_store.status(run_id).await
    }

    pub async fn run_events(&self, run_id: Uuid) -> Result<Vec<(u64, RunEvent)>> {
        self.run_store.read_events(run_id).await
    }

    async fn finish_cancelled(
        &self,
        run_id: Uuid,
        started: Instant,
        results: BTreeMap<NodeId, ExecutionResult>,
        final_outputs: BTreeMap<NodeId, serde_json::Value>,
    ) -> PipelineExecutionResult {
        tracing::info!(%run_id, completed_nodes = results.len(), "run cancelled");
        PipelineExecutionResult {
            run_id,
            success: false,
            results,
            final_outputs,
            total_execution_time_ms: elapsed_ms(started),
            error: None,
            cancelled: true,
        }
    }

    async fn finish_internal(
        &self,
        run_id: Uuid,
        started: Instant,
        results: BTreeMap<NodeId, ExecutionResult>,
        final_outputs: BTreeMap<NodeId, serde_json::Value>,
        message: String,
    ) -> PipelineExecutionResult {
        let error = ExecError::Internal(message).to_string();
        tracing::error!(%run_id, %error, "run aborted");
        let _ = self
            .run_store
            .append_event(
                run_id,
                &RunEvent::RunFailed {
                    at: now_ms(),
                    error: error.clone(),
                },
            )
            .await;
        let _ = self.run_store.unregister(run_id).await;
        PipelineExecutionResult {
            run_id,
            success: false,
            results,
            final_outputs,
            total_execution_time_ms: elapsed_ms(started),
            error: Some(error),
            cancelled: false,
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
