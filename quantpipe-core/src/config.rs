use crate::types::RuntimeKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Resource and command configuration for sandboxed workers.
///
/// When `container_image` is set, workers are wrapped in
/// `<container_runtime> run` with network disabled, the memory/CPU caps
/// applied, a read-only root, a non-root user, and no-new-privileges —
/// only the node's working directory is writable. Without an image the
/// worker runs as a bare interpreter subprocess under the wall-clock cap
/// alone (trusted/dev mode).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SandboxConfig {
    pub memory_limit_mib: u64,
    pub wall_clock_secs: u64,
    pub cpu_cores: u32,
    pub container_runtime: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_image: Option<String>,
    /// Interpreter command for Python workers, e.g. `["python3"]`.
    pub python_cmd: Vec<String>,
    /// Interpreter command for JavaScript workers, e.g. `["node"]`.
    pub node_cmd: Vec<String>,
    pub max_output_bytes: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            memory_limit_mib: 512,
            wall_clock_secs: 30,
            cpu_cores: 1,
            container_runtime: "docker".to_string(),
            container_image: None,
            python_cmd: vec!["python3".to_string()],
            node_cmd: vec!["node".to_string()],
            max_output_bytes: 1024 * 1024,
        }
    }
}

impl SandboxConfig {
    /// The interpreter command for a sandboxed host runtime. `None` for
    /// runtimes that have no subprocess interpreter.
    pub fn interpreter_for(&self, runtime: RuntimeKind) -> Option<&[String]> {
        match runtime {
            RuntimeKind::Python => Some(&self.python_cmd),
            RuntimeKind::Javascript => Some(&self.node_cmd),
            RuntimeKind::Builtin | RuntimeKind::Wasm => None,
        }
    }
}

/// Engine-wide configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Per-run working directories are created under here.
    pub runs_root: PathBuf,
    /// Logical dataset name → path. Read-only, shared across runs.
    pub datasets: BTreeMap<String, PathBuf>,
    pub sandbox: SandboxConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            runs_root: std::env::temp_dir().join("quantpipe").join("runs"),
            datasets: BTreeMap::new(),
            sandbox: SandboxConfig::default(),
        }
    }
}
