use crate::types::{NodeId, RuntimeKind, Timestamp};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Run lifecycle events — the audit trail the status API reads.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum RunEvent {
    RunStarted {
        run_id: Uuid,
        pipeline_id: String,
        total_nodes: usize,
    },
    NodeStarted {
        node_id: NodeId,
        runtime: RuntimeKind,
    },
    NodeCompleted {
        node_id: NodeId,
        execution_time_ms: u64,
    },
    NodeFailed {
        node_id: NodeId,
        error: String,
    },
    RunCancelled {
        at: Timestamp,
    },
    RunCompleted {
        at: Timestamp,
        total_execution_time_ms: u64,
    },
    RunFailed {
        at: Timestamp,
        error: String,
    },
}
