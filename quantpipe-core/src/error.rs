use serde::{Deserialize, Serialize};

// ─── Compile-side errors ──────────────────────────────────────

/// Which compile pass detected the problem.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompileErrorKind {
    Syntax,
    Semantic,
    Schema,
    Contract,
}

impl std::fmt::Display for CompileErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompileErrorKind::Syntax => write!(f, "syntax"),
            CompileErrorKind::Semantic => write!(f, "semantic"),
            CompileErrorKind::Schema => write!(f, "schema"),
            CompileErrorKind::Contract => write!(f, "contract"),
        }
    }
}

/// One compile diagnostic. All passes after the parser accumulate these
/// instead of stopping at the first problem.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CompileError {
    pub kind: CompileErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<usize>,
}

impl CompileError {
    pub fn new(kind: CompileErrorKind, message: impl Into<String>) -> Self {
        CompileError {
            kind,
            message: message.into(),
            node: None,
            field: None,
            line: None,
            column: None,
        }
    }

    pub fn syntax(message: impl Into<String>) -> Self {
        Self::new(CompileErrorKind::Syntax, message)
    }

    pub fn semantic(message: impl Into<String>) -> Self {
        Self::new(CompileErrorKind::Semantic, message)
    }

    pub fn schema(message: impl Into<String>) -> Self {
        Self::new(CompileErrorKind::Schema, message)
    }

    pub fn contract(message: impl Into<String>) -> Self {
        Self::new(CompileErrorKind::Contract, message)
    }

    pub fn on_node(mut self, node: &str) -> Self {
        self.node = Some(node.to_string());
        self
    }

    pub fn on_field(mut self, field: &str) -> Self {
        self.field = Some(field.to_string());
        self
    }

    pub fn at(mut self, line: usize, column: usize) -> Self {
        self.line = Some(line);
        self.column = Some(column);
        self
    }
}

impl std::fmt::Display for CompileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]", self.kind)?;
        if let Some(node) = &self.node {
            write!(f, " node '{}'", node)?;
        }
        if let Some(field) = &self.field {
            write!(f, " field '{}'", field)?;
        }
        write!(f, ": {}", self.message)?;
        if let Some(line) = self.line {
            write!(f, " (line {}", line)?;
            if let Some(col) = self.column {
                write!(f, ", column {}", col)?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

// ─── Execute-side errors ──────────────────────────────────────

/// Errors surfaced by the executor. None of these are retried; a node
/// failure halts the pipeline, cancellation ends it gracefully.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ExecError {
    #[error("node '{node_id}' failed: {message}")]
    NodeFailed { node_id: String, message: String },

    #[error("timeout")]
    Timeout,

    #[error("cancelled")]
    Cancelled,

    /// A bug in the engine itself, never a node's fault.
    #[error("internal: {0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_error_display() {
        let err = CompileError::schema("must be a positive number")
            .on_node("fast")
            .on_field("period");
        let s = err.to_string();
        assert!(s.contains("[schema]"));
        assert!(s.contains("node 'fast'"));
        assert!(s.contains("field 'period'"));
        assert!(s.contains("positive number"));
    }

    #[test]
    fn test_compile_error_location() {
        let err = CompileError::syntax("unexpected token").at(4, 7);
        let s = err.to_string();
        assert!(s.contains("line 4"));
        assert!(s.contains("column 7"));
    }

    #[test]
    fn test_exec_error_messages() {
        assert_eq!(ExecError::Timeout.to_string(), "timeout");
        assert_eq!(ExecError::Cancelled.to_string(), "cancelled");
        assert!(ExecError::Internal("bad state".into())
            .to_string()
            .starts_with("internal:"));
        let err = ExecError::NodeFailed {
            node_id: "bt".into(),
            message: "boom".into(),
        };
        assert!(err.to_string().contains("'bt'"));
    }
}
