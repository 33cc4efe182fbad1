use crate::events::RunEvent;
use crate::runs::{RunState, RunStatus, RunStore};
use crate::types::now_ms;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

struct Inner {
    runs: HashMap<Uuid, RunStatus>,
    events: HashMap<Uuid, Vec<(u64, RunEvent)>>,
    event_seq: HashMap<Uuid, u64>,
}

/// In-memory implementation of `RunStore`, a mutex-guarded map. The
/// default for tests and single-process deployments.
pub struct MemoryRunStore {
    inner: RwLock<Inner>,
}

impl MemoryRunStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                runs: HashMap::new(),
                events: HashMap::new(),
                event_seq: HashMap::new(),
            }),
        }
    }

    /// Runs currently marked active. Lets a process shutting down
    /// cancel everything it started.
    pub async fn active_runs(&self) -> Vec<Uuid> {
        let r = self.inner.read().await;
        r.runs
            .values()
            .filter(|s| s.state == RunState::Active)
            .map(|s| s.run_id)
            .collect()
    }
}

impl Default for MemoryRunStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RunStore for MemoryRunStore {
    async fn mark_active(&self, run_id: Uuid, pipeline_id: &str) -> Result<()> {
        let mut w = self.inner.write().await;
        w.runs.insert(
            run_id,
            RunStatus {
                run_id,
                pipeline_id: pipeline_id.to_string(),
                state: RunState::Active,
                started_at: now_ms(),
            },
        );
        Ok(())
    }

    async fn mark_cancelled(&self, run_id: Uuid) -> Result<bool> {
        let mut w = self.inner.write().await;
        match w.runs.get_mut(&run_id) {
            Some(status) => {
                status.state = RunState::Cancelled;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn is_cancelled(&self, run_id: Uuid) -> Result<bool> {
        let r = self.inner.read().await;
        Ok(r.runs
            .get(&run_id)
            .map(|s| s.state == RunState::Cancelled)
            .unwrap_or(false))
    }

    async fn unregister(&self, run_id: Uuid) -> Result<()> {
        let mut w = self.inner.write().await;
        w.runs.remove(&run_id);
        Ok(())
    }

    async fn status(&self, run_id: Uuid) -> Result<Option<RunStatus>> {
        let r = self.inner.read().await;
        Ok(r.runs.get(&run_id).cloned())
    }

    async fn append_event(&self, run_id: Uuid, event: &RunEvent) -> Result<u64> {
        let mut w = self.inner.write().await;
        let seq = w.event_seq.entry(run_id).or_insert(0);
        *seq += 1;
        let current = *seq;
        w.events
            .entry(run_id)
            .or_default()
            .push((current, event.clone()));
        Ok(current)
    }

    async fn read_events(&self, run_id: Uuid) -> Result<Vec<(u64, RunEvent)>> {
        let r = self.inner.read().await;
        Ok(r.events.get(&run_id).cloned().unwrap_or_default())
    }
}
