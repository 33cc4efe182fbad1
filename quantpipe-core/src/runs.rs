use crate::events::RunEvent;
use crate::types::Timestamp;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Active,
    Cancelled,
}

/// What a status query sees for a tracked run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunStatus {
    pub run_id: Uuid,
    pub pipeline_id: String,
    pub state: RunState,
    pub started_at: Timestamp,
}

impl RunStatus {
    pub fn cancelled(&self) -> bool {
        self.state == RunState::Cancelled
    }
}

/// Tracks active runs for cancellation and status queries. Must tolerate
/// unbounded concurrent access — every pipeline execution holds a handle.
#[async_trait]
pub trait RunStore: Send + Sync {
    async fn mark_active(&self, run_id: Uuid, pipeline_id: &str) -> Result<()>;

    /// Idempotent. Returns false when the run is unknown.
    async fn mark_cancelled(&self, run_id: Uuid) -> Result<bool>;

    async fn is_cancelled(&self, run_id: Uuid) -> Result<bool>;

    /// Forget a run that completed normally. Cancelled runs stay
    /// queryable so a late status poll still sees the cancellation.
    async fn unregister(&self, run_id: Uuid) -> Result<()>;

    async fn status(&self, run_id: Uuid) -> Result<Option<RunStatus>>;

    // ── Event log (append-only) ──

    /// Append an event and return its sequence number.
    async fn append_event(&self, run_id: Uuid, event: &RunEvent) -> Result<u64>;

    async fn read_events(&self, run_id: Uuid) -> Result<Vec<(u64, RunEvent)>>;
}
