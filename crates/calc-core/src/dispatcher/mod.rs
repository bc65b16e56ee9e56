//! The dispatcher: a background task that assigns pending operations to
//! agents and periodically reconciles calculation statuses.

use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use sqlx::PgPool;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use calc_db::models::{Operation, OperationStatus};
use calc_db::queries::operations;

use crate::agent::{AgentJob, AgentPool};
use crate::error::OrchestratorError;
use crate::usecase;

const ASSIGNMENT_INTERVAL: Duration = Duration::from_millis(100);
const RECONCILE_INTERVAL: Duration = Duration::from_secs(5);
const MAX_ASSIGN_ATTEMPTS: u32 = 3;
const ASSIGN_BASE_DELAY: Duration = Duration::from_millis(50);

pub struct Dispatcher {
    pool: PgPool,
    agents: Arc<AgentPool>,
    computing_power: usize,
}

impl Dispatcher {
    pub fn new(pool: PgPool, agents: Arc<AgentPool>, computing_power: usize) -> Self {
        Self {
            pool,
            agents,
            computing_power,
        }
    }

    /// Spawn the dispatcher's background task. The returned handle completes
    /// once `cancel` is triggered and the current tick finishes.
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move { self.run(cancel).await })
    }

    async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let semaphore = Arc::new(Semaphore::new(self.computing_power));
        let mut assign_ticker = tokio::time::interval(ASSIGNMENT_INTERVAL);
        let mut reconcile_ticker = tokio::time::interval(RECONCILE_INTERVAL);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("dispatcher shutting down");
                    break;
                }
                _ = assign_ticker.tick() => {
                    self.assignment_tick(&semaphore).await;
                }
                _ = reconcile_ticker.tick() => {
                    self.reconciliation_tick().await;
                }
            }
        }
    }

    async fn assignment_tick(&self, semaphore: &Arc<Semaphore>) {
        let pending =
            match operations::get_pending_operations(&self.pool, self.computing_power as i64).await
            {
                Ok(ops) => ops,
                Err(err) => {
                    tracing::error!(error = %err, "failed to fetch pending operations");
                    return;
                }
            };

        for op in pending {
            let Ok(permit) = semaphore.clone().try_acquire_owned() else {
                break;
            };
            let pool = self.pool.clone();
            let agents = self.agents.clone();
            tokio::spawn(async move {
                let _permit = permit;
                let calc_id = op.calculation_id;
                let outcome = std::panic::AssertUnwindSafe(assign_with_retry(&pool, &agents, &op))
                    .catch_unwind()
                    .await;

                match outcome {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => {
                        tracing::warn!(operation_id = %op.id, error = %err, "failed to assign operation");
                        let message = format!("failed to assign operation to agent: {err}");
                        let _ = operations::update_status(
                            &pool,
                            op.id,
                            OperationStatus::Error,
                            "",
                            &message,
                            0,
                        )
                        .await;
                    }
                    Err(panic) => {
                        let message = format!("panic: {}", panic_message(&panic));
                        tracing::error!(operation_id = %op.id, %message, "assignment task panicked");
                        let _ = operations::update_status(
                            &pool,
                            op.id,
                            OperationStatus::Error,
                            "",
                            &message,
                            0,
                        )
                        .await;
                    }
                }

                if let Err(err) = usecase::update_calculation_status(&pool, calc_id).await {
                    tracing::warn!(calculation_id = %calc_id, error = %err, "failed to reconcile calculation after assignment");
                }
            });
        }
    }

    async fn reconciliation_tick(&self) {
        let calc_ids = match operations::non_terminal_calculation_ids(&self.pool).await {
            Ok(ids) => ids,
            Err(err) => {
                tracing::error!(error = %err, "failed to fetch calculations for reconciliation");
                return;
            }
        };

        for calc_id in calc_ids {
            if let Err(err) = usecase::update_calculation_status(&self.pool, calc_id).await {
                tracing::warn!(calculation_id = %calc_id, error = %err, "reconciliation failed");
            }
        }
    }
}

async fn assign_with_retry(
    pool: &PgPool,
    agents: &AgentPool,
    op: &Operation,
) -> Result<(), OrchestratorError> {
    let mut attempt = 0;
    loop {
        match try_assign_once(pool, agents, op).await {
            Ok(()) => return Ok(()),
            Err(err) if !err.is_retryable() => return Err(err),
            Err(err) => {
                attempt += 1;
                if attempt >= MAX_ASSIGN_ATTEMPTS {
                    return Err(err);
                }
                tokio::time::sleep(ASSIGN_BASE_DELAY * 2u32.pow(attempt - 1)).await;
            }
        }
    }
}

async fn try_assign_once(
    pool: &PgPool,
    agents: &AgentPool,
    op: &Operation,
) -> Result<(), OrchestratorError> {
    let agent = agents.get_available_agent(op.operation_type).await?;

    if let Err(err) =
        operations::update_status(pool, op.id, OperationStatus::InProgress, "", "", 0).await
    {
        tracing::warn!(operation_id = %op.id, error = %err, "failed to mark operation in-progress before assignment");
    }

    let job = AgentJob {
        operation_id: op.id,
        calculation_id: op.calculation_id,
        operation_kind: op.operation_type,
        operand1: op.operand1.clone(),
        operand2: op.operand2.clone(),
    };
    agents.assign_operation(&agent.id, job).await
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_message_extracts_string_payload() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("boom".to_string());
        assert_eq!(panic_message(payload.as_ref()), "boom");
    }
}
