//! Types shared between the agent pool, its storage, and individual workers.

use calc_db::models::OperationKind;

/// Runtime status of a single agent. Not persisted -- agents are recreated on
/// every pool start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentStatus {
    Online,
    Busy,
    Offline,
}

/// A point-in-time snapshot of an agent's state. Returned by storage/pool
/// accessors as a value copy so callers cannot mutate shared state through
/// it.
#[derive(Debug, Clone)]
pub struct AgentSnapshot {
    pub id: String,
    pub status: AgentStatus,
    pub current_load: usize,
    pub max_capacity: usize,
    pub total_ops: u64,
    pub completed_ops: u64,
    pub failed_ops: u64,
}

impl AgentSnapshot {
    pub fn new(id: impl Into<String>, max_capacity: usize) -> Self {
        Self {
            id: id.into(),
            status: AgentStatus::Online,
            current_load: 0,
            max_capacity,
            total_ops: 0,
            completed_ops: 0,
            failed_ops: 0,
        }
    }

    pub fn has_capacity(&self) -> bool {
        self.status == AgentStatus::Online && self.current_load < self.max_capacity
    }
}

/// One unit of work handed to a worker's inbox.
#[derive(Debug)]
pub struct AgentJob {
    pub operation_id: uuid::Uuid,
    pub calculation_id: uuid::Uuid,
    pub operation_kind: OperationKind,
    pub operand1: String,
    pub operand2: String,
}
