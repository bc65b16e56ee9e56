//! Database query functions for the `operations` table.

use anyhow::{Context, Result, bail};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{Operation, OperationStatus};

/// Insert a single operation row.
pub async fn insert(pool: &PgPool, op: &Operation) -> Result<Operation> {
    sqlx::query_as::<_, Operation>(
        "INSERT INTO operations \
         (id, calculation_id, operation_type, operand1, operand2, result, status, error_message, processing_time_ms, agent_id, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
         RETURNING *",
    )
    .bind(op.id)
    .bind(op.calculation_id)
    .bind(op.operation_type)
    .bind(&op.operand1)
    .bind(&op.operand2)
    .bind(&op.result)
    .bind(op.status)
    .bind(&op.error_message)
    .bind(op.processing_time_ms)
    .bind(&op.agent_id)
    .bind(op.created_at)
    .fetch_one(pool)
    .await
    .context("failed to insert operation")
}

/// Insert a batch of operations inside a single transaction. Either all rows
/// are inserted or none are -- a failure partway through rolls the whole
/// batch back.
pub async fn insert_batch(pool: &PgPool, ops: &[Operation]) -> Result<Vec<Operation>> {
    let mut tx = pool.begin().await.context("failed to begin transaction")?;
    let mut inserted = Vec::with_capacity(ops.len());

    for op in ops {
        let row = sqlx::query_as::<_, Operation>(
            "INSERT INTO operations \
             (id, calculation_id, operation_type, operand1, operand2, result, status, error_message, processing_time_ms, agent_id, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
             RETURNING *",
        )
        .bind(op.id)
        .bind(op.calculation_id)
        .bind(op.operation_type)
        .bind(&op.operand1)
        .bind(&op.operand2)
        .bind(&op.result)
        .bind(op.status)
        .bind(&op.error_message)
        .bind(op.processing_time_ms)
        .bind(&op.agent_id)
        .bind(op.created_at)
        .fetch_one(&mut *tx)
        .await
        .with_context(|| format!("failed to insert operation {}", op.id))?;

        inserted.push(row);
    }

    tx.commit()
        .await
        .context("failed to commit operation batch")?;
    Ok(inserted)
}

/// Fetch an operation by id.
pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Operation>> {
    sqlx::query_as::<_, Operation>("SELECT * FROM operations WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch operation")
}

/// List all operations belonging to a calculation, in insertion order.
pub async fn find_by_calculation_id(pool: &PgPool, calculation_id: Uuid) -> Result<Vec<Operation>> {
    sqlx::query_as::<_, Operation>(
        "SELECT * FROM operations WHERE calculation_id = $1 ORDER BY created_at ASC",
    )
    .bind(calculation_id)
    .fetch_all(pool)
    .await
    .context("failed to list operations for calculation")
}

/// Fetch up to `limit` operations currently pending assignment, stable-ordered
/// by creation time so the oldest work is assigned first.
pub async fn get_pending_operations(pool: &PgPool, limit: i64) -> Result<Vec<Operation>> {
    sqlx::query_as::<_, Operation>(
        "SELECT * FROM operations \
         WHERE status = 'pending' \
         ORDER BY created_at ASC \
         LIMIT $1",
    )
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("failed to fetch pending operations")
}

/// Targeted status update.
pub async fn update_status(
    pool: &PgPool,
    id: Uuid,
    status: OperationStatus,
    result: &str,
    error_message: &str,
    processing_time_ms: i64,
) -> Result<()> {
    let outcome = sqlx::query(
        "UPDATE operations \
         SET status = $2, result = $3, error_message = $4, processing_time_ms = $5 \
         WHERE id = $1",
    )
    .bind(id)
    .bind(status)
    .bind(result)
    .bind(error_message)
    .bind(processing_time_ms)
    .execute(pool)
    .await
    .context("failed to update operation status")?;

    if outcome.rows_affected() == 0 {
        bail!("operation {id} not found");
    }
    Ok(())
}

/// Put an operation back in `pending` and clear its agent assignment. Used
/// when a worker finds one of its operands isn't ready yet, so the next
/// assignment tick retries it instead of failing it permanently.
pub async fn reset_to_pending(pool: &PgPool, id: Uuid) -> Result<()> {
    let outcome = sqlx::query(
        "UPDATE operations \
         SET status = 'pending', agent_id = '' \
         WHERE id = $1",
    )
    .bind(id)
    .execute(pool)
    .await
    .context("failed to reset operation to pending")?;

    if outcome.rows_affected() == 0 {
        bail!("operation {id} not found");
    }
    Ok(())
}

/// Distinct calculation ids with at least one operation still pending or
/// in progress -- the set of calculations the dispatcher's reconciliation
/// tick needs to re-derive.
pub async fn non_terminal_calculation_ids(pool: &PgPool) -> Result<Vec<Uuid>> {
    let rows: Vec<(Uuid,)> = sqlx::query_as(
        "SELECT DISTINCT calculation_id FROM operations \
         WHERE status IN ('pending', 'in_progress')",
    )
    .fetch_all(pool)
    .await
    .context("failed to list calculations with outstanding operations")?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// Compare-and-set: assign an agent to a pending operation, transitioning it
/// to `in_progress`. Fails with a descriptive error (not found in the
/// affected-rows sense) when the row is not currently `pending` -- the caller
/// uses this to detect "someone else already claimed this operation".
pub async fn assign_agent(pool: &PgPool, id: Uuid, agent_id: &str) -> Result<()> {
    let outcome = sqlx::query(
        "UPDATE operations \
         SET status = 'in_progress', agent_id = $2 \
         WHERE id = $1 AND status = 'pending'",
    )
    .bind(id)
    .bind(agent_id)
    .execute(pool)
    .await
    .context("failed to assign agent to operation")?;

    if outcome.rows_affected() == 0 {
        bail!("operation {id} is not in pending status");
    }
    Ok(())
}
