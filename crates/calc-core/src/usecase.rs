//! The calculation use-case: the entry point the HTTP surface calls into.

use std::time::Duration;

use chrono::Utc;
use sqlx::PgPool;
use tokio::time::timeout;
use uuid::Uuid;

use calc_db::models::{Calculation, CalculationStatus};
use calc_db::queries::{calculations, operations};

use crate::aggregator;
use crate::error::OrchestratorError;
use crate::expression;
use crate::retry::{message_is_transient, retry_with_backoff};

const VALIDATE_DEADLINE: Duration = Duration::from_secs(5);
const PERSIST_DEADLINE: Duration = Duration::from_secs(10);
const PARSE_DEADLINE: Duration = Duration::from_secs(30);
const STATUS_RETRY_ATTEMPTS: u32 = 3;
const STATUS_RETRY_BASE_DELAY: Duration = Duration::from_millis(50);

/// Submit a new expression for evaluation.
///
/// Validation and persistence failures that occur *before* a calculation row
/// exists are returned as errors. Once a row exists, every further failure
/// (parse error, too-many-operations, batch-insert failure) is recorded onto
/// that row as a terminal `ERROR` status and returned as `Ok` -- the caller
/// submitted a request that was accepted, just one that could not complete.
pub async fn calculate_expression(
    pool: &PgPool,
    user_id: Uuid,
    expression_text: &str,
) -> Result<Calculation, OrchestratorError> {
    if user_id.is_nil() {
        return Err(OrchestratorError::InvalidUserId);
    }
    let trimmed = expression_text.trim();
    if trimmed.is_empty() {
        return Err(OrchestratorError::InvalidExpression(
            "expression is empty".to_owned(),
        ));
    }

    timeout(VALIDATE_DEADLINE, async { expression::validate(trimmed) })
        .await
        .map_err(|_| OrchestratorError::DeadlineExceeded)?
        .map_err(|e| OrchestratorError::InvalidExpression(e.to_string()))?;

    let now = Utc::now();
    let fresh = Calculation {
        id: Uuid::new_v4(),
        user_id,
        expression: trimmed.to_owned(),
        result: String::new(),
        status: CalculationStatus::Pending,
        error_message: String::new(),
        created_at: now,
        updated_at: now,
    };
    let calc = timeout(
        PERSIST_DEADLINE,
        calculations::insert_calculation(pool, &fresh),
    )
    .await
    .map_err(|_| OrchestratorError::DeadlineExceeded)?
    .map_err(OrchestratorError::Internal)?;

    let parsed = timeout(PARSE_DEADLINE, async { expression::parse(trimmed) }).await;
    let mut ops = match parsed {
        Err(_) => return Ok(fail_calculation(pool, calc, "parse deadline exceeded").await),
        Ok(Err(err)) => return Ok(fail_calculation(pool, calc, &err.to_string()).await),
        Ok(Ok(ops)) => ops,
    };

    if ops.len() > expression::MAX_OPERATIONS {
        return Ok(
            fail_calculation(pool, calc, "Expression too complex, too many operations").await,
        );
    }

    expression::set_calculation_id(&mut ops, calc.id);
    if let Err(err) = operations::insert_batch(pool, &ops).await {
        tracing::warn!(calculation_id = %calc.id, error = %err, "failed to persist operations");
        return Ok(fail_calculation(pool, calc, "Failed to create operations").await);
    }

    if let Err(err) =
        calculations::update_status(pool, calc.id, CalculationStatus::InProgress, "", "").await
    {
        tracing::warn!(calculation_id = %calc.id, error = %err, "failed to mark calculation in progress");
    }

    match calculations::find_by_id(pool, calc.id).await {
        Ok(Some(row)) => Ok(row),
        _ => {
            let mut fallback = calc;
            fallback.status = CalculationStatus::InProgress;
            Ok(fallback)
        }
    }
}

/// Mark a calculation `ERROR` with `message`, best-effort, and return the
/// (locally mutated) row regardless of whether the write succeeded.
async fn fail_calculation(pool: &PgPool, mut calc: Calculation, message: &str) -> Calculation {
    if let Err(err) =
        calculations::update_status(pool, calc.id, CalculationStatus::Error, "", message).await
    {
        tracing::warn!(calculation_id = %calc.id, error = %err, "failed to persist calculation failure");
    }
    calc.status = CalculationStatus::Error;
    calc.error_message = message.to_owned();
    calc
}

/// Fetch a calculation owned by `user_id`, opportunistically re-deriving its
/// status from its operations before returning.
pub async fn get_calculation(
    pool: &PgPool,
    calc_id: Uuid,
    user_id: Uuid,
) -> Result<Calculation, OrchestratorError> {
    let mut row = calculations::find_by_id(pool, calc_id)
        .await
        .map_err(OrchestratorError::Internal)?
        .ok_or(OrchestratorError::CalculationNotFound(calc_id))?;

    if row.user_id != user_id {
        return Err(OrchestratorError::Unauthorized(calc_id));
    }

    match operations::find_by_calculation_id(pool, calc_id).await {
        Ok(ops) if !ops.is_empty() && !row.status.is_terminal() => {
            let agg = aggregator::aggregate(&ops);
            if agg.status != row.status {
                if let Err(err) = calculations::update_status(
                    pool,
                    calc_id,
                    agg.status,
                    &agg.result,
                    &agg.error_message,
                )
                .await
                {
                    tracing::warn!(calculation_id = %calc_id, error = %err, "failed to persist reconciled status");
                }
                row.status = agg.status;
                row.result = agg.result;
                row.error_message = agg.error_message;
            }
        }
        Ok(_) => {}
        Err(err) => {
            tracing::warn!(calculation_id = %calc_id, error = %err, "failed to fetch operations for enrichment");
        }
    }

    Ok(row)
}

/// List every calculation owned by `user_id`, newest first.
pub async fn list_calculations(
    pool: &PgPool,
    user_id: Uuid,
) -> Result<Vec<Calculation>, OrchestratorError> {
    if user_id.is_nil() {
        return Err(OrchestratorError::InvalidUserId);
    }
    calculations::find_by_user_id(pool, user_id)
        .await
        .map_err(OrchestratorError::Internal)
}

/// Re-derive and persist a calculation's status from its operations, with
/// retry-on-transient-failure for both the read and the write.
pub async fn update_calculation_status(
    pool: &PgPool,
    calc_id: Uuid,
) -> Result<(), OrchestratorError> {
    let ops = retry_with_backoff(
        STATUS_RETRY_ATTEMPTS,
        STATUS_RETRY_BASE_DELAY,
        |e: &anyhow::Error| message_is_transient(&e.to_string()),
        || async { operations::find_by_calculation_id(pool, calc_id).await },
    )
    .await
    .map_err(OrchestratorError::Internal)?;

    let agg = aggregator::aggregate(&ops);

    retry_with_backoff(
        STATUS_RETRY_ATTEMPTS,
        STATUS_RETRY_BASE_DELAY,
        |e: &anyhow::Error| message_is_transient(&e.to_string()),
        || calculations::update_status(pool, calc_id, agg.status, &agg.result, &agg.error_message),
    )
    .await
    .map_err(OrchestratorError::Internal)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nil_user_id_is_rejected_synchronously() {
        assert!(Uuid::nil().is_nil());
    }
}
