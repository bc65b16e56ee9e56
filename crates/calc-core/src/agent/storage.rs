//! Concurrent in-memory storage for agent snapshots.
//!
//! Guarded by a single `RwLock` rather than sharded per-agent locks -- the
//! agent count is small (bounded by `CALC_COMPUTING_POWER`) and reads vastly
//! outnumber writes, so contention is not a concern. Accessors return owned
//! copies so callers never hold a reference into the lock.

use std::collections::HashMap;

use tokio::sync::RwLock;

use super::types::{AgentSnapshot, AgentStatus};

#[derive(Debug, Default)]
pub struct AgentStorage {
    agents: RwLock<HashMap<String, AgentSnapshot>>,
}

impl AgentStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add(&self, snapshot: AgentSnapshot) {
        self.agents
            .write()
            .await
            .insert(snapshot.id.clone(), snapshot);
    }

    pub async fn get_by_id(&self, id: &str) -> Option<AgentSnapshot> {
        self.agents.read().await.get(id).cloned()
    }

    /// Every agent currently online with spare capacity, cheapest-loaded
    /// first so the dispatcher naturally load-balances.
    pub async fn get_available(&self) -> Vec<AgentSnapshot> {
        let agents = self.agents.read().await;
        let mut available: Vec<AgentSnapshot> = agents
            .values()
            .filter(|a| a.has_capacity())
            .cloned()
            .collect();
        available.sort_by_key(|a| a.current_load);
        available
    }

    pub async fn list(&self) -> Vec<AgentSnapshot> {
        self.agents.read().await.values().cloned().collect()
    }

    pub async fn update_status(&self, id: &str, status: AgentStatus) {
        if let Some(agent) = self.agents.write().await.get_mut(id) {
            agent.status = status;
        }
    }

    /// Adjust `current_load` by `delta` (positive on assignment, negative on
    /// completion) and bump the lifetime counters on completion.
    pub async fn update_stats(&self, id: &str, load_delta: i64, completed: bool, failed: bool) {
        if let Some(agent) = self.agents.write().await.get_mut(id) {
            if load_delta != 0 {
                agent.current_load = (agent.current_load as i64 + load_delta).max(0) as usize;
            }
            if completed || failed {
                agent.total_ops += 1;
            }
            if completed {
                agent.completed_ops += 1;
            }
            if failed {
                agent.failed_ops += 1;
            }
        }
    }

    pub async fn remove(&self, id: &str) -> Option<AgentSnapshot> {
        self.agents.write().await.remove(id)
    }
}
