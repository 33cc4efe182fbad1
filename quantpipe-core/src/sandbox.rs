//! Isolated subprocess execution for node workers.
//!
//! One worker per node invocation: inputs are written to
//! `<working_dir>/<node_id>/input.json`, the worker is launched with the
//! input path as argv[1] and the output path as argv[2], and its exit
//! status plus `output.json` decide the result. Workers are tracked per
//! run so cancellation can terminate them mid-flight.

use crate::compiler::CompiledNode;
use crate::config::SandboxConfig;
use crate::runner::NodeRunner;
use crate::types::{
    ExecutionContext, ExecutionResult, LogEntry, RuntimeKind, WorkerContext, WorkerInput,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::{Mutex, Notify};
use uuid::Uuid;

/// How a worker invocation ended.
enum WorkerExit {
    Completed(std::process::ExitStatus),
    TimedOut,
    Cancelled,
    WaitFailed(String),
}

/// One in-flight worker, registered for cancellation.
struct WorkerSlot {
    node_id: String,
    cancel: Notify,
    cancelled: AtomicBool,
}

/// Spawns and supervises sandboxed workers. Stateless across
/// invocations except for the run → workers table, which is the single
/// source of truth for cancellation.
pub struct WorkerLauncher {
    config: SandboxConfig,
    workers: Mutex<HashMap<Uuid, Vec<Arc<WorkerSlot>>>>,
}

impl WorkerLauncher {
    pub fn new(config: SandboxConfig) -> Self {
        Self {
            config,
            workers: Mutex::new(HashMap::new()),
        }
    }

    /// Terminate every worker tagged with the run. Idempotent.
    pub async fn cancel(&self, run_id: Uuid) {
        let workers = self.workers.lock().await;
        if let Some(slots) = workers.get(&run_id) {
            for slot in slots {
                tracing::info!(%run_id, node_id = %slot.node_id, "terminating worker");
                slot.cancelled.store(true, Ordering::SeqCst);
                slot.cancel.notify_one();
            }
        }
    }

    /// Run one worker through its whole lifecycle and translate the
    /// outcome into an `ExecutionResult`.
    pub async fn run_worker(
        &self,
        node: &CompiledNode,
        command: &[String],
        inputs: &BTreeMap<String, serde_json::Value>,
        ctx: &ExecutionContext,
    ) -> ExecutionResult {
        let started = Instant::now();
        if command.is_empty() {
            return ExecutionResult::failure(&node.id, "empty worker command", 0);
        }
        let node_dir = ctx.working_dir.join(&node.id);
        let input_path = node_dir.join("input.json");
        let output_path = node_dir.join("output.json");

        if let Err(e) = tokio::fs::create_dir_all(&node_dir).await {
            return ExecutionResult::failure(
                &node.id,
                format!("failed to create worker directory: {}", e),
                elapsed_ms(started),
            );
        }

        let worker_input = WorkerInput {
            node_type: node.node_type.clone(),
            params: node.parameters.clone(),
            inputs: inputs.clone(),
            context: WorkerContext::from_context(ctx),
        };
        let payload = match serde_json::to_vec_pretty(&worker_input) {
            Ok(p) => p,
            Err(e) => {
                return ExecutionResult::failure(
                    &node.id,
                    format!("failed to encode worker input: {}", e),
                    elapsed_ms(started),
                )
            }
        };
        if let Err(e) = tokio::fs::write(&input_path, payload).await {
            return ExecutionResult::failure(
                &node.id,
                format!("failed to write worker input: {}", e),
                elapsed_ms(started),
            );
        }

        let mut cmd = self.build_command(command, &node_dir, &input_path, &output_path, ctx);
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        // Register before spawning so a concurrent cancel cannot slip
        // between the two.
        let slot = Arc::new(WorkerSlot {
            node_id: node.id.clone(),
            cancel: Notify::new(),
            cancelled: AtomicBool::new(false),
        });
        self.workers
            .lock()
            .await
            .entry(ctx.run_id)
            .or_default()
            .push(slot.clone());

        let result = self
            .supervise(node, cmd, &output_path, &slot, started)
            .await;

        self.release(ctx.run_id, &slot).await;
        let _ = tokio::fs::remove_dir_all(&node_dir).await;
        result
    }

    async fn supervise(
        &self,
        node: &CompiledNode,
        mut cmd: Command,
        output_path: &Path,
        slot: &Arc<WorkerSlot>,
        started: Instant,
    ) -> ExecutionResult {
        let mut child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => {
                return ExecutionResult::failure(
                    &node.id,
                    format!("failed to spawn worker: {}", e),
                    elapsed_ms(started),
                )
            }
        };

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let max_bytes = self.config.max_output_bytes;
        let stdout_task = tokio::spawn(read_lines(stdout, max_bytes));
        let stderr_task = tokio::spawn(read_lines(stderr, max_bytes));

        let wall = Duration::from_secs(self.config.wall_clock_secs);
        let exit = if slot.cancelled.load(Ordering::SeqCst) {
            WorkerExit::Cancelled
        } else {
            tokio::select! {
                waited = tokio::time::timeout(wall, child.wait()) => match waited {
                    Ok(Ok(status)) => WorkerExit::Completed(status),
                    Ok(Err(e)) => WorkerExit::WaitFailed(e.to_string()),
                    Err(_) => WorkerExit::TimedOut,
                },
                _ = slot.cancel.notified() => WorkerExit::Cancelled,
            }
        };
        if matches!(exit, WorkerExit::TimedOut | WorkerExit::Cancelled) {
            let _ = child.kill().await;
        }

        let stdout_lines = stdout_task.await.unwrap_or_default();
        let stderr_lines = stderr_task.await.unwrap_or_default();

        let mut logs: Vec<String> = Vec::with_capacity(stdout_lines.len() + stderr_lines.len());
        logs.extend(stdout_lines.iter().cloned());
        logs.extend(stderr_lines.iter().cloned());
        let structured_logs: Vec<LogEntry> = logs
            .iter()
            .map(|line| LogEntry::from_worker_line(&node.id, line))
            .collect();

        let mut result = match exit {
            WorkerExit::Cancelled => {
                ExecutionResult::failure(&node.id, "cancelled", elapsed_ms(started))
            }
            WorkerExit::TimedOut => {
                tracing::warn!(node_id = %node.id, "worker exceeded wall-clock cap");
                ExecutionResult::failure(&node.id, "timeout", elapsed_ms(started))
            }
            WorkerExit::WaitFailed(e) => ExecutionResult::failure(
                &node.id,
                format!("failed to wait for worker: {}", e),
                elapsed_ms(started),
            ),
            WorkerExit::Completed(status) if status.success() => {
                match tokio::fs::read(output_path).await {
                    Ok(bytes) => match serde_json::from_slice(&bytes) {
                        Ok(output) => ExecutionResult::success(&node.id, output, elapsed_ms(started)),
                        Err(e) => ExecutionResult::failure(
                            &node.id,
                            format!("invalid output document: {}", e),
                            elapsed_ms(started),
                        ),
                    },
                    Err(_) => ExecutionResult::failure(
                        &node.id,
                        "no output produced",
                        elapsed_ms(started),
                    ),
                }
            }
            WorkerExit::Completed(status) => {
                let detail = if stderr_lines.is_empty() {
                    format!("worker exited with {}", status)
                } else {
                    stderr_lines.join("\n")
                };
                ExecutionResult::failure(&node.id, detail, elapsed_ms(started))
            }
        };

        result.logs = logs;
        result.structured_logs = structured_logs;
        result
    }

    /// Drop a finished worker from the cancellation table.
    async fn release(&self, run_id: Uuid, slot: &Arc<WorkerSlot>) {
        let mut workers = self.workers.lock().await;
        if let Some(slots) = workers.get_mut(&run_id) {
            slots.retain(|s| !Arc::ptr_eq(s, slot));
            if slots.is_empty() {
                workers.remove(&run_id);
            }
        }
    }

    /// Assemble the worker command line, wrapping it in the configured
    /// container runtime when isolation is on.
    fn build_command(
        &self,
        command: &[String],
        node_dir: &Path,
        input_path: &Path,
        output_path: &Path,
        ctx: &ExecutionContext,
    ) -> Command {
        match &self.config.container_image {
            Some(image) => {
                let mut cmd = Command::new(&self.config.container_runtime);
                cmd.arg("run")
                    .arg("--rm")
                    .arg("--network=none")
                    .arg(format!("--memory={}m", self.config.memory_limit_mib))
                    .arg(format!("--cpus={}", self.config.cpu_cores))
                    .arg("--read-only")
                    .arg("--user")
                    .arg("65534:65534")
                    .arg("--security-opt")
                    .arg("no-new-privileges")
                    .arg("-v")
                    .arg(format!("{}:{}:rw", node_dir.display(), node_dir.display()));
                for path in ctx.datasets.values() {
                    cmd.arg("-v")
                        .arg(format!("{}:{}:ro", path.display(), path.display()));
                }
                cmd.arg(image);
                cmd.args(command);
                cmd.arg(input_path).arg(output_path);
                cmd
            }
            None => {
                let mut cmd = Command::new(&command[0]);
                cmd.args(&command[1..]);
                cmd.arg(input_path).arg(output_path);
                cmd.current_dir(node_dir);
                cmd
            }
        }
    }
}

/// Collect a pipe into lines, stopping once the byte budget is spent.
async fn read_lines(
    pipe: Option<impl tokio::io::AsyncRead + Unpin>,
    max_bytes: usize,
) -> Vec<String> {
    let mut lines = Vec::new();
    let Some(pipe) = pipe else {
        return lines;
    };
    let mut reader = BufReader::new(pipe).lines();
    let mut budget = max_bytes;
    while let Ok(Some(line)) = reader.next_line().await {
        if line.len() > budget {
            lines.push(format!("[output truncated at {} bytes]", max_bytes));
            break;
        }
        budget -= line.len();
        lines.push(line);
    }
    lines
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

/// Runner for nodes compiled to one of the sandboxed host runtimes.
pub struct SandboxRunner {
    runtime: RuntimeKind,
    launcher: Arc<WorkerLauncher>,
}

impl SandboxRunner {
    pub fn new(runtime: RuntimeKind, launcher: Arc<WorkerLauncher>) -> Self {
        Self { runtime, launcher }
    }

    fn entrypoint(node: &CompiledNode) -> Option<PathBuf> {
        node.metadata
            .get("entrypoint")
            .and_then(|v| v.as_str())
            .map(PathBuf::from)
    }
}

#[async_trait]
impl NodeRunner for SandboxRunner {
    fn name(&self) -> &'static str {
        match self.runtime {
            RuntimeKind::Python => "python-sandbox",
            RuntimeKind::Javascript => "javascript-sandbox",
            _ => "sandbox",
        }
    }

    fn can_handle(&self, node: &CompiledNode) -> bool {
        node.runtime == self.runtime
    }

    async fn execute(
        &self,
        node: &CompiledNode,
        inputs: &BTreeMap<String, serde_json::Value>,
        ctx: &ExecutionContext,
    ) -> ExecutionResult {
        let Some(entrypoint) = Self::entrypoint(node) else {
            return ExecutionResult::failure(
                &node.id,
                format!("no worker entrypoint for node type '{}'", node.node_type),
                0,
            );
        };
        let Some(interpreter) = self.launcher.config.interpreter_for(self.runtime) else {
            return ExecutionResult::failure(
                &node.id,
                format!("runtime '{}' has no interpreter", self.runtime),
                0,
            );
        };

        let mut command: Vec<String> = interpreter.to_vec();
        command.push(entrypoint.display().to_string());
        self.launcher.run_worker(node, &command, inputs, ctx).await
    }

    async fn cancel(&self, run_id: Uuid) {
        self.launcher.cancel(run_id).await;
    }
}
