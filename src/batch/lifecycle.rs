//! Batch lifecycle state machine.
//!
//! `draft → active → completed`, with `cancelled` reachable from `draft`
//! and `active`. The guarded `UPDATE ... WHERE status = ?` predicate is
//! the sole concurrency control: of two racing transitions, exactly one
//! matches the predicate and the other surfaces `NotFoundError` — the
//! same answer an absent id or a foreign tenant gets, so cross-tenant
//! existence never leaks.

use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use sqlx::SqlitePool;
use tracing::info;
use uuid::Uuid;

use crate::audit::{self, actions, AuditEvent};
use crate::error::{conflict_on_unique, AppError};
use crate::types::{Batch, BatchStatus, BatchWithProgress, EntityRef, RecipeStep};

/// Context every mutating operation runs under.
#[derive(Debug, Clone)]
pub struct RequestScope {
    pub tenant_id: String,
    pub performed_by: String,
    pub ip_address: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateBatchRequest {
    pub batch_number: String,
    pub product_name: String,
    pub batch_size: f64,
    pub recipe_id: Option<String>,
}

const PROGRESS_SELECT: &str = "SELECT b.*,
        (SELECT COUNT(*) FROM batch_steps bs WHERE bs.batch_id = b.id) AS total_steps,
        (SELECT COUNT(*) FROM batch_steps bs WHERE bs.batch_id = b.id AND bs.status = 'completed') AS completed_steps
   FROM batches b";

/// Create a batch in `draft`, materializing steps from the recipe when
/// one is attached. Everything — batch row, copied steps, audit entry —
/// commits atomically or not at all.
pub async fn create_batch(
    pool: &SqlitePool,
    scope: &RequestScope,
    req: CreateBatchRequest,
) -> Result<Batch, AppError> {
    if req.batch_number.trim().is_empty() || req.product_name.trim().is_empty() {
        return Err(AppError::Validation(
            "batch_number and product_name are required".into(),
        ));
    }

    let mut tx = pool.begin().await?;

    // A recipe reference must resolve inside the caller's tenant.
    let recipe_steps: Vec<RecipeStep> = match &req.recipe_id {
        Some(recipe_id) => {
            let owned: Option<(String,)> =
                sqlx::query_as("SELECT id FROM recipes WHERE id = ? AND tenant_id = ?")
                    .bind(recipe_id)
                    .bind(&scope.tenant_id)
                    .fetch_optional(&mut *tx)
                    .await?;
            if owned.is_none() {
                return Err(AppError::Validation("Unknown recipe".into()));
            }
            sqlx::query_as(
                "SELECT * FROM recipe_steps WHERE recipe_id = ? ORDER BY step_number",
            )
            .bind(recipe_id)
            .fetch_all(&mut *tx)
            .await?
        }
        None => Vec::new(),
    };

    let now = Utc::now();
    let batch = Batch {
        id: Uuid::new_v4().to_string(),
        tenant_id: scope.tenant_id.clone(),
        batch_number: req.batch_number.trim().to_string(),
        product_name: req.product_name,
        batch_size: req.batch_size,
        status: BatchStatus::Draft,
        recipe_id: req.recipe_id,
        created_by: scope.performed_by.clone(),
        created_at: now,
        started_at: None,
        completed_at: None,
        updated_at: now,
    };

    sqlx::query(
        "INSERT INTO batches (id, tenant_id, batch_number, product_name, batch_size, status, recipe_id, created_by, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&batch.id)
    .bind(&batch.tenant_id)
    .bind(&batch.batch_number)
    .bind(&batch.product_name)
    .bind(batch.batch_size)
    .bind(batch.status)
    .bind(&batch.recipe_id)
    .bind(&batch.created_by)
    .bind(batch.created_at)
    .bind(batch.updated_at)
    .execute(&mut *tx)
    .await
    .map_err(|e| conflict_on_unique(e, "Batch number already exists"))?;

    // Copy every definitional field; run-time fields start empty.
    for step in &recipe_steps {
        sqlx::query(
            "INSERT INTO batch_steps (id, tenant_id, batch_id, step_number, description, instructions, step_type, expected_value, unit, requires_signature, status)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'pending')",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&scope.tenant_id)
        .bind(&batch.id)
        .bind(step.step_number)
        .bind(&step.description)
        .bind(&step.instructions)
        .bind(step.step_type)
        .bind(step.expected_value)
        .bind(&step.unit)
        .bind(step.requires_signature)
        .execute(&mut *tx)
        .await?;
    }

    audit::log_event(
        &mut *tx,
        AuditEvent::new(&scope.tenant_id, actions::BATCH_CREATED)
            .entity(EntityRef::Batch(batch.id.clone()))
            .batch(&batch.id)
            .performed_by(&scope.performed_by)
            .ip(scope.ip_address.clone())
            .details(json!({
                "batch_number": batch.batch_number,
                "step_count": recipe_steps.len(),
            })),
    )
    .await?;

    tx.commit().await?;
    info!(batch = %batch.batch_number, steps = recipe_steps.len(), "batch created");
    Ok(batch)
}

/// Start a draft batch.
pub async fn start_batch(
    pool: &SqlitePool,
    scope: &RequestScope,
    batch_id: &str,
) -> Result<Batch, AppError> {
    transition_batch(
        pool,
        scope,
        batch_id,
        &[BatchStatus::Draft],
        "UPDATE batches SET status = 'active', started_at = ?1, updated_at = ?2",
        actions::BATCH_STARTED,
        "Batch not found or already started",
        None,
    )
    .await
}

/// Complete an active batch. Pending steps do not block completion;
/// the caller-side confirmation is advisory only.
pub async fn complete_batch(
    pool: &SqlitePool,
    scope: &RequestScope,
    batch_id: &str,
) -> Result<Batch, AppError> {
    transition_batch(
        pool,
        scope,
        batch_id,
        &[BatchStatus::Active],
        "UPDATE batches SET status = 'completed', completed_at = ?1, updated_at = ?2",
        actions::BATCH_COMPLETED,
        "Batch not found or not active",
        None,
    )
    .await
}

/// Cancel a draft or active batch. Cancellation is a status, never a
/// deletion; the record and its audit trail remain.
pub async fn cancel_batch(
    pool: &SqlitePool,
    scope: &RequestScope,
    batch_id: &str,
    reason: Option<String>,
) -> Result<Batch, AppError> {
    let reason = reason.unwrap_or_else(|| "No reason provided".to_string());
    transition_batch(
        pool,
        scope,
        batch_id,
        &[BatchStatus::Draft, BatchStatus::Active],
        "UPDATE batches SET status = 'cancelled', updated_at = ?2",
        actions::BATCH_CANCELLED,
        "Batch not found or already completed",
        Some(json!({ "reason": reason })),
    )
    .await
}

/// Shared guarded-update transition. The `update_sql` fragment uses
/// numbered parameters `?1`/`?2` for timestamps; id and tenant bind as
/// `?3`/`?4`, and the legal source statuses are inlined into the guard.
#[allow(clippy::too_many_arguments)]
async fn transition_batch(
    pool: &SqlitePool,
    scope: &RequestScope,
    batch_id: &str,
    from: &[BatchStatus],
    update_sql: &str,
    action: &str,
    not_found_message: &str,
    extra_details: Option<serde_json::Value>,
) -> Result<Batch, AppError> {
    let now = Utc::now();
    let status_guards = from
        .iter()
        .map(|s| format!("'{}'", s.as_str()))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "{update_sql} WHERE id = ?3 AND tenant_id = ?4 AND status IN ({status_guards}) RETURNING *"
    );

    let mut tx = pool.begin().await?;
    let batch: Option<Batch> = sqlx::query_as(&sql)
        .bind(now)
        .bind(now)
        .bind(batch_id)
        .bind(&scope.tenant_id)
        .fetch_optional(&mut *tx)
        .await?;
    let batch = batch.ok_or_else(|| AppError::NotFound(not_found_message.to_string()))?;

    let mut details = json!({ "batch_number": batch.batch_number });
    if let Some(extra) = extra_details {
        if let (Some(obj), Some(extra_obj)) = (details.as_object_mut(), extra.as_object()) {
            for (k, v) in extra_obj {
                obj.insert(k.clone(), v.clone());
            }
        }
    }

    audit::log_event(
        &mut *tx,
        AuditEvent::new(&scope.tenant_id, action)
            .entity(EntityRef::Batch(batch.id.clone()))
            .batch(&batch.id)
            .performed_by(&scope.performed_by)
            .ip(scope.ip_address.clone())
            .details(details),
    )
    .await?;

    tx.commit().await?;
    info!(batch = %batch.batch_number, action, "batch transition");
    Ok(batch)
}

/// List all batches for the tenant, newest first, with step progress.
pub async fn list_batches(
    pool: &SqlitePool,
    tenant_id: &str,
) -> Result<Vec<BatchWithProgress>, AppError> {
    let sql = format!("{PROGRESS_SELECT} WHERE b.tenant_id = ? ORDER BY b.created_at DESC");
    Ok(sqlx::query_as(&sql).bind(tenant_id).fetch_all(pool).await?)
}

/// Fetch one batch with step progress.
pub async fn get_batch(
    pool: &SqlitePool,
    tenant_id: &str,
    batch_id: &str,
) -> Result<BatchWithProgress, AppError> {
    let sql = format!("{PROGRESS_SELECT} WHERE b.id = ? AND b.tenant_id = ?");
    sqlx::query_as(&sql)
        .bind(batch_id)
        .bind(tenant_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Batch not found".into()))
}
