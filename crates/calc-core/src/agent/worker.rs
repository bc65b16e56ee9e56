//! The per-worker task loop.
//!
//! Each worker owns a bounded inbox and processes jobs one at a time:
//! resolve any `ref:` operands against the operation repository, hand the
//! resolved operands to the configured [`Executor`], and persist the
//! outcome. Concurrency across the pool comes from running several of these
//! loops side by side, not from within a single worker.

use std::sync::Arc;
use std::time::Instant;

use sqlx::PgPool;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use calc_db::models::{Operation, OperationStatus};
use calc_db::queries::operations;

use crate::error::OrchestratorError;

use super::executor::Executor;
use super::storage::AgentStorage;
use super::types::{AgentJob, AgentStatus};

pub struct WorkerHandle {
    #[allow(dead_code)]
    pub id: String,
    #[allow(dead_code)]
    pub capacity: usize,
    pub inbox: mpsc::Sender<AgentJob>,
    pub cancel: CancellationToken,
    pub join: tokio::task::JoinHandle<()>,
}

/// Spawn a worker's processing loop and return a handle to it. The worker
/// registers its own snapshot in `storage` before entering the loop.
pub fn spawn_worker(
    id: String,
    capacity: usize,
    db: PgPool,
    executor: Arc<dyn Executor>,
    storage: Arc<AgentStorage>,
) -> WorkerHandle {
    let (tx, rx) = mpsc::channel(capacity * 2);
    let cancel = CancellationToken::new();

    let worker_id = id.clone();
    let worker_cancel = cancel.clone();
    let join = tokio::spawn(async move {
        run_worker(worker_id, rx, db, executor, storage, worker_cancel).await;
    });

    WorkerHandle {
        id,
        capacity,
        inbox: tx,
        cancel,
        join,
    }
}

async fn run_worker(
    id: String,
    mut inbox: mpsc::Receiver<AgentJob>,
    db: PgPool,
    executor: Arc<dyn Executor>,
    storage: Arc<AgentStorage>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!(agent_id = %id, "worker shutting down");
                break;
            }
            job = inbox.recv() => {
                let Some(job) = job else {
                    tracing::info!(agent_id = %id, "worker inbox closed");
                    break;
                };
                process_job(&id, job, &db, executor.as_ref(), &storage, &cancel).await;
            }
        }
    }
    storage.update_status(&id, AgentStatus::Offline).await;
}

async fn process_job(
    agent_id: &str,
    job: AgentJob,
    db: &PgPool,
    executor: &dyn Executor,
    storage: &AgentStorage,
    cancel: &CancellationToken,
) {
    let started = Instant::now();
    let outcome = tokio::select! {
        _ = cancel.cancelled() => Err(OrchestratorError::ContextCanceled),
        result = execute_job(&job, db, executor) => result,
    };

    if matches!(
        outcome,
        Err(OrchestratorError::RefNotFound(_)) | Err(OrchestratorError::RefNotCompleted(_))
    ) {
        // The dependency this operation reads from isn't done yet. Put it
        // back in the queue instead of failing it -- the dispatcher's next
        // assignment tick will re-fetch and retry it once the dependency
        // completes, per the DAG's retry-on-miss scheduling.
        if let Err(err) = operations::reset_to_pending(db, job.operation_id).await {
            tracing::error!(agent_id, operation_id = %job.operation_id, error = %err, "failed to reset operation to pending");
        }
        storage.update_stats(agent_id, -1, false, false).await;
        return;
    }

    let elapsed_ms = started.elapsed().as_millis() as i64;

    let (status, result, error_message) = match outcome {
        Ok(value) => (OperationStatus::Completed, value, String::new()),
        Err(err) => (OperationStatus::Error, String::new(), err.to_string()),
    };

    let failed = status == OperationStatus::Error;
    if let Err(err) = operations::update_status(
        db,
        job.operation_id,
        status,
        &result,
        &error_message,
        elapsed_ms,
    )
    .await
    {
        tracing::error!(agent_id, operation_id = %job.operation_id, error = %err, "failed to persist operation outcome");
    }

    storage.update_stats(agent_id, -1, !failed, failed).await;

    if let Err(err) = crate::usecase::update_calculation_status(db, job.calculation_id).await {
        tracing::warn!(agent_id, calculation_id = %job.calculation_id, error = %err, "failed to reconcile calculation after operation finished");
    }
}

async fn execute_job(
    job: &AgentJob,
    db: &PgPool,
    executor: &dyn Executor,
) -> Result<String, OrchestratorError> {
    let operand1 = resolve_operand(&job.operand1, db).await?;
    let operand2 = resolve_operand(&job.operand2, db).await?;
    executor
        .execute(job.operation_kind, &operand1, &operand2)
        .await
}

/// Resolve a `ref:<uuid>` operand to its referenced operation's result, or
/// pass a plain numeric operand through unchanged.
async fn resolve_operand(operand: &str, db: &PgPool) -> Result<String, OrchestratorError> {
    let Some(ref_id) = operand.strip_prefix(Operation::REF_PREFIX) else {
        return Ok(operand.to_owned());
    };

    let ref_id: uuid::Uuid = ref_id
        .parse()
        .map_err(|_| OrchestratorError::InvalidOperand(operand.to_owned()))?;

    let referenced = operations::find_by_id(db, ref_id)
        .await
        .map_err(OrchestratorError::Internal)?
        .ok_or(OrchestratorError::RefNotFound(ref_id))?;

    if referenced.status != OperationStatus::Completed {
        return Err(OrchestratorError::RefNotCompleted(ref_id));
    }

    Ok(referenced.result)
}
