//! The agent pool: a fixed set of concurrent workers that execute
//! operations handed to them by the dispatcher.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use tokio::sync::RwLock;
use tokio::time::timeout;

use calc_db::models::OperationKind;

use crate::error::OrchestratorError;

use super::executor::Executor;
use super::storage::AgentStorage;
use super::types::{AgentJob, AgentSnapshot, AgentStatus};
use super::worker::{WorkerHandle, spawn_worker};

const INBOX_SUBMIT_TIMEOUT: Duration = Duration::from_millis(100);
const SUPERVISOR_INTERVAL: Duration = Duration::from_millis(500);
const STOP_GRACE: Duration = Duration::from_secs(5);
const WORKER_CAPACITY: usize = 1;

pub struct AgentPool {
    db: PgPool,
    executor: Arc<dyn Executor>,
    storage: Arc<AgentStorage>,
    workers: RwLock<HashMap<String, WorkerHandle>>,
    supervisor: RwLock<Option<tokio::task::JoinHandle<()>>>,
    running: RwLock<bool>,
}

impl AgentPool {
    pub fn new(db: PgPool, executor: Arc<dyn Executor>) -> Self {
        Self {
            db,
            executor,
            storage: Arc::new(AgentStorage::new()),
            workers: RwLock::new(HashMap::new()),
            supervisor: RwLock::new(None),
            running: RwLock::new(false),
        }
    }

    pub fn storage(&self) -> Arc<AgentStorage> {
        self.storage.clone()
    }

    /// Spin up `computing_power` workers. Re-entrant: a no-op if already
    /// running.
    pub async fn start(&self, computing_power: usize) {
        if *self.running.read().await {
            return;
        }

        let suffix = uuid::Uuid::new_v4().simple().to_string()[..8].to_owned();
        let mut workers = self.workers.write().await;
        for i in 0..computing_power {
            let id = format!("agent-{suffix}-{i}");
            let handle = spawn_worker(
                id.clone(),
                WORKER_CAPACITY,
                self.db.clone(),
                self.executor.clone(),
                self.storage.clone(),
            );
            self.storage
                .add(AgentSnapshot::new(id.clone(), WORKER_CAPACITY))
                .await;
            workers.insert(id, handle);
        }
        drop(workers);

        *self.running.write().await = true;
        self.spawn_supervisor().await;
        tracing::info!(count = computing_power, "agent pool started");
    }

    fn spawn_supervisor_task(storage: Arc<AgentStorage>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SUPERVISOR_INTERVAL);
            loop {
                ticker.tick().await;
                // Snapshots are already kept current by worker updates; this
                // tick exists so future health checks (stalled workers, lost
                // heartbeats) have a natural place to live.
                let _ = storage.list().await;
            }
        })
    }

    async fn spawn_supervisor(&self) {
        let handle = Self::spawn_supervisor_task(self.storage.clone());
        *self.supervisor.write().await = Some(handle);
    }

    /// Signal every worker to quit, wait up to 5s for them to exit, and
    /// clear storage. Re-entrant: a no-op if not running.
    pub async fn stop(&self) {
        if !*self.running.read().await {
            return;
        }

        if let Some(supervisor) = self.supervisor.write().await.take() {
            supervisor.abort();
        }

        let mut workers = self.workers.write().await;
        for (_, handle) in workers.iter() {
            handle.cancel.cancel();
        }
        for (id, handle) in workers.drain() {
            if timeout(STOP_GRACE, handle.join).await.is_err() {
                tracing::warn!(agent_id = id, "worker did not exit within grace period");
            }
            self.storage.remove(&id).await;
        }

        *self.running.write().await = false;
        tracing::info!("agent pool stopped");
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    /// The least-loaded online agent with spare capacity. `op_kind` is
    /// accepted for parity with a future kind-specialized routing scheme;
    /// every agent can execute every kind today.
    pub async fn get_available_agent(
        &self,
        _op_kind: OperationKind,
    ) -> Result<AgentSnapshot, OrchestratorError> {
        if !self.is_running().await {
            return Err(OrchestratorError::PoolNotRunning);
        }

        self.storage
            .get_available()
            .await
            .into_iter()
            .next()
            .ok_or_else(|| OrchestratorError::NoAgentAvailable(format!("{_op_kind}")))
    }

    /// Hand a job to the named agent's inbox, waiting up to 100ms for
    /// admission.
    pub async fn assign_operation(
        &self,
        agent_id: &str,
        job: AgentJob,
    ) -> Result<(), OrchestratorError> {
        let workers = self.workers.read().await;
        let handle = workers
            .get(agent_id)
            .ok_or_else(|| OrchestratorError::AgentNotFound(agent_id.to_owned()))?;

        let snapshot = self
            .storage
            .get_by_id(agent_id)
            .await
            .ok_or_else(|| OrchestratorError::AgentNotFound(agent_id.to_owned()))?;
        if snapshot.status != AgentStatus::Online {
            return Err(OrchestratorError::AgentNotRunning(agent_id.to_owned()));
        }
        if snapshot.current_load >= snapshot.max_capacity {
            return Err(OrchestratorError::AgentAtCapacity(agent_id.to_owned()));
        }

        match timeout(INBOX_SUBMIT_TIMEOUT, handle.inbox.send(job)).await {
            Ok(Ok(())) => {
                self.storage.update_stats(agent_id, 1, false, false).await;
                Ok(())
            }
            Ok(Err(_)) => Err(OrchestratorError::AgentNotRunning(agent_id.to_owned())),
            Err(_) => Err(OrchestratorError::QueueFull),
        }
    }

    pub async fn list_agents(&self) -> Vec<AgentSnapshot> {
        self.storage.list().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::executor::{LatencyTable, LocalExecutor};

    fn fast_executor() -> Arc<dyn Executor> {
        Arc::new(LocalExecutor::new(LatencyTable {
            add: Duration::from_millis(1),
            sub: Duration::from_millis(1),
            mul: Duration::from_millis(1),
            div: Duration::from_millis(1),
        }))
    }

    // These tests exercise pool bookkeeping without a database; any test
    // that would dequeue a job into `worker.rs` (which needs a PgPool)
    // belongs in the integration suite instead.

    #[tokio::test]
    async fn start_is_idempotent() {
        let pool = AgentPool {
            db: PgPool::connect_lazy("postgres://localhost/ignored").unwrap(),
            executor: fast_executor(),
            storage: Arc::new(AgentStorage::new()),
            workers: RwLock::new(HashMap::new()),
            supervisor: RwLock::new(None),
            running: RwLock::new(false),
        };
        pool.start(2).await;
        let first_count = pool.list_agents().await.len();
        pool.start(2).await;
        assert_eq!(pool.list_agents().await.len(), first_count);
        pool.stop().await;
    }

    #[tokio::test]
    async fn get_available_agent_fails_when_not_running() {
        let pool = AgentPool {
            db: PgPool::connect_lazy("postgres://localhost/ignored").unwrap(),
            executor: fast_executor(),
            storage: Arc::new(AgentStorage::new()),
            workers: RwLock::new(HashMap::new()),
            supervisor: RwLock::new(None),
            running: RwLock::new(false),
        };
        let err = pool
            .get_available_agent(OperationKind::Add)
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::PoolNotRunning));
    }

    #[tokio::test]
    async fn assign_operation_fails_for_unknown_agent() {
        let pool = AgentPool {
            db: PgPool::connect_lazy("postgres://localhost/ignored").unwrap(),
            executor: fast_executor(),
            storage: Arc::new(AgentStorage::new()),
            workers: RwLock::new(HashMap::new()),
            supervisor: RwLock::new(None),
            running: RwLock::new(false),
        };
        pool.start(1).await;
        let job = AgentJob {
            operation_id: uuid::Uuid::new_v4(),
            calculation_id: uuid::Uuid::new_v4(),
            operation_kind: OperationKind::Add,
            operand1: "1".into(),
            operand2: "2".into(),
        };
        let err = pool
            .assign_operation("does-not-exist", job)
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::AgentNotFound(_)));
        pool.stop().await;
    }
}
