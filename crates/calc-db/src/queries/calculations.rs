//! Database query functions for the `calculations` table.

use anyhow::{Context, Result, bail};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::Calculation;

/// Insert a new calculation row. `id`, `created_at`, and `updated_at` are
/// assigned by the caller before this is invoked so the returned row's
/// identifier is known up front.
pub async fn insert_calculation(pool: &PgPool, calc: &Calculation) -> Result<Calculation> {
    sqlx::query_as::<_, Calculation>(
        "INSERT INTO calculations (id, user_id, expression, result, status, error_message, created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
         RETURNING *",
    )
    .bind(calc.id)
    .bind(calc.user_id)
    .bind(&calc.expression)
    .bind(&calc.result)
    .bind(calc.status)
    .bind(&calc.error_message)
    .bind(calc.created_at)
    .bind(calc.updated_at)
    .fetch_one(pool)
    .await
    .context("failed to insert calculation")
}

/// Fetch a calculation by id. Returns `None` if it does not exist.
pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Calculation>> {
    sqlx::query_as::<_, Calculation>("SELECT * FROM calculations WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch calculation")
}

/// List all calculations owned by a user, newest first.
pub async fn find_by_user_id(pool: &PgPool, user_id: Uuid) -> Result<Vec<Calculation>> {
    sqlx::query_as::<_, Calculation>(
        "SELECT * FROM calculations WHERE user_id = $1 ORDER BY created_at DESC",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await
    .context("failed to list calculations for user")
}

/// Replace a calculation's mutable fields (expression is immutable).
pub async fn update(pool: &PgPool, calc: &Calculation) -> Result<()> {
    let result = sqlx::query(
        "UPDATE calculations \
         SET result = $2, status = $3, error_message = $4, updated_at = now() \
         WHERE id = $1",
    )
    .bind(calc.id)
    .bind(&calc.result)
    .bind(calc.status)
    .bind(&calc.error_message)
    .execute(pool)
    .await
    .context("failed to update calculation")?;

    if result.rows_affected() == 0 {
        bail!("calculation {} not found", calc.id);
    }
    Ok(())
}

/// Targeted status transition, touching `updated_at`.
pub async fn update_status(
    pool: &PgPool,
    id: Uuid,
    status: crate::models::CalculationStatus,
    result: &str,
    error_message: &str,
) -> Result<()> {
    let outcome = sqlx::query(
        "UPDATE calculations \
         SET status = $2, result = $3, error_message = $4, updated_at = now() \
         WHERE id = $1",
    )
    .bind(id)
    .bind(status)
    .bind(result)
    .bind(error_message)
    .execute(pool)
    .await
    .context("failed to update calculation status")?;

    if outcome.rows_affected() == 0 {
        bail!("calculation {id} not found");
    }
    Ok(())
}

/// Delete a calculation row (cascades to its operations).
pub async fn delete(pool: &PgPool, id: Uuid) -> Result<()> {
    let outcome = sqlx::query("DELETE FROM calculations WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await
        .context("failed to delete calculation")?;

    if outcome.rows_affected() == 0 {
        bail!("calculation {id} not found");
    }
    Ok(())
}
