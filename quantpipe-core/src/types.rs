use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use uuid::Uuid;

// ─── Scalar aliases ───────────────────────────────────────────

/// Node identifier within one pipeline.
pub type NodeId = String;

/// Epoch milliseconds (UTC).
pub type Timestamp = i64;

/// Current wall-clock time in epoch milliseconds.
pub fn now_ms() -> Timestamp {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as Timestamp
}

// ─── Runtime kinds ────────────────────────────────────────────

/// Which execution environment a node type runs in.
///
/// `Python` and `Javascript` are the two sandboxed host runtimes; `Wasm`
/// is reserved in the wire format for future isolated execution.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeKind {
    Builtin,
    Python,
    Javascript,
    Wasm,
}

impl std::fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuntimeKind::Builtin => write!(f, "builtin"),
            RuntimeKind::Python => write!(f, "python"),
            RuntimeKind::Javascript => write!(f, "javascript"),
            RuntimeKind::Wasm => write!(f, "wasm"),
        }
    }
}

// ─── Parsed nodes ─────────────────────────────────────────────

/// One node declaration as parsed from the pipeline description.
///
/// Created by the parser, consumed by the compile passes, dropped once
/// the IR is emitted.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeDecl {
    pub id: NodeId,
    pub node_type: String,
    pub depends_on: Vec<NodeId>,
    pub params: serde_json::Map<String, serde_json::Value>,
    /// Source position, when the document format surfaced one.
    pub line: Option<usize>,
    pub column: Option<usize>,
}

// ─── Output schemas ───────────────────────────────────────────

/// The shape of a node's output, inferred by the contract checker.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutputSchema {
    /// Tabular data: named columns plus required-column assertions.
    /// `extra` carries per-node annotations such as `indicator_column`
    /// or `signal_column`.
    Dataframe {
        columns: Vec<String>,
        required_columns: Vec<String>,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        extra: BTreeMap<String, serde_json::Value>,
    },
    BacktestResults {
        metrics: Vec<String>,
        trade_log: bool,
    },
    /// Source nodes taking no input, and the recorded schema of nodes
    /// whose contract check failed.
    Null,
}

impl OutputSchema {
    pub fn is_dataframe(&self) -> bool {
        matches!(self, OutputSchema::Dataframe { .. })
    }

    /// The signal column this dataframe carries, if any: either the
    /// `signal_column` annotation or a literal `signal` column.
    pub fn signal_column(&self) -> Option<&str> {
        match self {
            OutputSchema::Dataframe { columns, extra, .. } => extra
                .get("signal_column")
                .and_then(|v| v.as_str())
                .or_else(|| columns.iter().find(|c| c.as_str() == "signal").map(|c| c.as_str())),
            _ => None,
        }
    }

    /// Short tag for diagnostics ("dataframe", "backtest_results", "null").
    pub fn tag(&self) -> &'static str {
        match self {
            OutputSchema::Dataframe { .. } => "dataframe",
            OutputSchema::BacktestResults { .. } => "backtest_results",
            OutputSchema::Null => "null",
        }
    }
}

// ─── Execution context ────────────────────────────────────────

/// Per-run state handed to runners. Owned exclusively by the engine for
/// the duration of a run; runners get a shared read-only view. The
/// cancellation flag lives in the run store, keyed by `run_id`.
#[derive(Clone, Debug)]
pub struct ExecutionContext {
    pub run_id: Uuid,
    pub pipeline_id: String,
    pub working_dir: PathBuf,
    /// Logical dataset name → path on disk (read-only, shared).
    pub datasets: BTreeMap<String, PathBuf>,
}

// ─── Log entries ──────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
    Debug,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogSource {
    /// Emitted by the engine or a runner.
    System,
    /// Emitted by the node's own code (worker stdout/stderr).
    Node,
}

/// One structured log line attributed to a node.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: Timestamp,
    pub node_id: NodeId,
    pub level: LogLevel,
    pub message: String,
    pub source: LogSource,
}

impl LogEntry {
    /// Classify a raw worker output line by its level prefix.
    ///
    /// Lines starting with `[INFO] `, `[WARN] `, `[ERROR] ` or `[DEBUG] `
    /// map to the corresponding level with the prefix stripped; anything
    /// else is `info` verbatim.
    pub fn from_worker_line(node_id: &str, line: &str) -> Self {
        let (level, message) = if let Some(rest) = line.strip_prefix("[INFO] ") {
            (LogLevel::Info, rest)
        } else if let Some(rest) = line.strip_prefix("[WARN] ") {
            (LogLevel::Warn, rest)
        } else if let Some(rest) = line.strip_prefix("[ERROR] ") {
            (LogLevel::Error, rest)
        } else if let Some(rest) = line.strip_prefix("[DEBUG] ") {
            (LogLevel::Debug, rest)
        } else {
            (LogLevel::Info, line)
        };
        LogEntry {
            timestamp: now_ms(),
            node_id: node_id.to_string(),
            level,
            message: message.to_string(),
            source: LogSource::Node,
        }
    }

    pub fn system(node_id: &str, level: LogLevel, message: impl Into<String>) -> Self {
        LogEntry {
            timestamp: now_ms(),
            node_id: node_id.to_string(),
            level,
            message: message.into(),
            source: LogSource::System,
        }
    }
}

// ─── Execution results ────────────────────────────────────────

/// Outcome of running a single node.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub node_id: NodeId,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Raw worker output lines, stdout before stderr, each stream in
    /// emission order.
    pub logs: Vec<String>,
    pub structured_logs: Vec<LogEntry>,
    pub execution_time_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peak_memory_bytes: Option<u64>,
}

impl ExecutionResult {
    pub fn success(node_id: &str, output: serde_json::Value, elapsed_ms: u64) -> Self {
        ExecutionResult {
            node_id: node_id.to_string(),
            success: true,
            output: Some(output),
            error: None,
            logs: Vec::new(),
            structured_logs: Vec::new(),
            execution_time_ms: elapsed_ms,
            peak_memory_bytes: None,
        }
    }

    pub fn failure(node_id: &str, error: impl Into<String>, elapsed_ms: u64) -> Self {
        ExecutionResult {
            node_id: node_id.to_string(),
            success: false,
            output: None,
            error: Some(error.into()),
            logs: Vec::new(),
            structured_logs: Vec::new(),
            execution_time_ms: elapsed_ms,
            peak_memory_bytes: None,
        }
    }
}

/// Outcome of a whole pipeline run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PipelineExecutionResult {
    pub run_id: Uuid,
    pub success: bool,
    pub results: BTreeMap<NodeId, ExecutionResult>,
    pub final_outputs: BTreeMap<NodeId, serde_json::Value>,
    pub total_execution_time_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub cancelled: bool,
}

// ─── Sandbox worker wire types ────────────────────────────────

/// Written to `<working_dir>/<node_id>/input.json` before a worker is
/// launched. The worker receives the input path as argv[1] and the
/// expected output path as argv[2].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkerInput {
    pub node_type: String,
    pub params: serde_json::Map<String, serde_json::Value>,
    /// Dependency node id → that node's output.
    pub inputs: BTreeMap<NodeId, serde_json::Value>,
    pub context: WorkerContext,
}

/// The read-only slice of the execution context a worker may see.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkerContext {
    pub run_id: String,
    pub pipeline_id: String,
    pub datasets: BTreeMap<String, String>,
}

impl WorkerContext {
    pub fn from_context(ctx: &ExecutionContext) -> Self {
        WorkerContext {
            run_id: ctx.run_id.to_string(),
            pipeline_id: ctx.pipeline_id.clone(),
            datasets: ctx
                .datasets
                .iter()
                .map(|(name, path)| (name.clone(), path.display().to_string()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_line_level_prefixes() {
        let e = LogEntry::from_worker_line("n1", "[ERROR] disk on fire");
        assert_eq!(e.level, LogLevel::Error);
        assert_eq!(e.message, "disk on fire");
        assert_eq!(e.source, LogSource::Node);

        let e = LogEntry::from_worker_line("n1", "[WARN] low memory");
        assert_eq!(e.level, LogLevel::Warn);

        let e = LogEntry::from_worker_line("n1", "[DEBUG] tick");
        assert_eq!(e.level, LogLevel::Debug);

        // No prefix: info, line kept verbatim
        let e = LogEntry::from_worker_line("n1", "plain output");
        assert_eq!(e.level, LogLevel::Info);
        assert_eq!(e.message, "plain output");

        // Prefix without trailing space is not a prefix
        let e = LogEntry::from_worker_line("n1", "[ERROR]no-space");
        assert_eq!(e.level, LogLevel::Info);
        assert_eq!(e.message, "[ERROR]no-space");
    }

    #[test]
    fn test_signal_column_lookup() {
        let annotated = OutputSchema::Dataframe {
            columns: vec!["close".into(), "cross".into()],
            required_columns: vec![],
            extra: BTreeMap::from([("signal_column".to_string(), serde_json::json!("cross"))]),
        };
        assert_eq!(annotated.signal_column(), Some("cross"));

        let literal = OutputSchema::Dataframe {
            columns: vec!["close".into(), "signal".into()],
            required_columns: vec![],
            extra: BTreeMap::new(),
        };
        assert_eq!(literal.signal_column(), Some("signal"));

        let bare = OutputSchema::Dataframe {
            columns: vec!["close".into()],
            required_columns: vec![],
            extra: BTreeMap::new(),
        };
        assert_eq!(bare.signal_column(), None);
        assert_eq!(OutputSchema::Null.signal_column(), None);
    }

    #[test]
    fn test_runtime_kind_serialization() {
        assert_eq!(
            serde_json::to_string(&RuntimeKind::Javascript).unwrap(),
            "\"javascript\""
        );
        let rt: RuntimeKind = serde_json::from_str("\"builtin\"").unwrap();
        assert_eq!(rt, RuntimeKind::Builtin);
    }
}
