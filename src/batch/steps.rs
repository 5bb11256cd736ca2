//! Step execution state machine.
//!
//! `pending → in_progress → completed|skipped`, with the direct edges
//! `pending → completed` and `pending → skipped` (no forced pass through
//! `in_progress`). The transition table is explicit and total: every
//! `(current, requested)` pair maps to either the new state or a typed
//! rejection, and terminal steps admit nothing further.

use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use sqlx::SqlitePool;
use tracing::info;

use crate::audit::{self, actions, AuditEvent};
use crate::batch::lifecycle::RequestScope;
use crate::error::AppError;
use crate::types::{BatchStep, StepStatus};

/// Total transition table for step statuses.
///
/// Monotonic by design: a completed or skipped step cannot be reopened
/// through this path, and re-requesting the current status is rejected
/// rather than silently accepted. Corrections are an administrative
/// concern, not a runtime transition.
pub fn transition(current: StepStatus, requested: StepStatus) -> Result<StepStatus, AppError> {
    use StepStatus::*;
    match (current, requested) {
        (Pending, InProgress) | (Pending, Completed) | (Pending, Skipped) => Ok(requested),
        (InProgress, Completed) | (InProgress, Skipped) => Ok(requested),
        (current, requested) if current == requested => Err(AppError::InvalidState(format!(
            "Step is already {}",
            current.as_str()
        ))),
        (current, _) if current.is_terminal() => Err(AppError::InvalidState(format!(
            "Step is already {} and cannot change status",
            current.as_str()
        ))),
        (current, requested) => Err(AppError::InvalidState(format!(
            "Cannot move step from {} to {}",
            current.as_str(),
            requested.as_str()
        ))),
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateStepRequest {
    pub status: StepStatus,
    pub notes: Option<String>,
    pub actual_value: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SignStepRequest {
    pub signature_data: String,
    pub notes: Option<String>,
    pub actual_value: Option<f64>,
}

/// Steps of a batch in execution order.
pub async fn list_steps(
    pool: &SqlitePool,
    tenant_id: &str,
    batch_id: &str,
) -> Result<Vec<BatchStep>, AppError> {
    Ok(sqlx::query_as(
        "SELECT * FROM batch_steps WHERE batch_id = ? AND tenant_id = ? ORDER BY step_number",
    )
    .bind(batch_id)
    .bind(tenant_id)
    .fetch_all(pool)
    .await?)
}

async fn fetch_step(
    tx: &mut sqlx::SqliteConnection,
    tenant_id: &str,
    batch_id: &str,
    step_id: &str,
) -> Result<BatchStep, AppError> {
    sqlx::query_as("SELECT * FROM batch_steps WHERE id = ? AND batch_id = ? AND tenant_id = ?")
        .bind(step_id)
        .bind(batch_id)
        .bind(tenant_id)
        .fetch_optional(tx)
        .await?
        .ok_or_else(|| AppError::NotFound("Step not found".into()))
}

/// Move a step through the transition table without a signature.
///
/// `notes` and `actual_value` are merge-updates: an omitted value leaves
/// the prior one untouched. `in_progress` stamps `started_at` if unset;
/// `completed`/`skipped` stamp `completed_at`. Completing a step that
/// was defined `requires_signature` is rejected here — that path must go
/// through [`sign_step`].
pub async fn update_step(
    pool: &SqlitePool,
    scope: &RequestScope,
    batch_id: &str,
    step_id: &str,
    req: UpdateStepRequest,
) -> Result<BatchStep, AppError> {
    let mut tx = pool.begin().await?;
    let current = fetch_step(&mut tx, &scope.tenant_id, batch_id, step_id).await?;
    let next = transition(current.status, req.status)?;
    if next == StepStatus::Completed && current.requires_signature {
        return Err(AppError::Validation(
            "Step requires an electronic signature to complete".into(),
        ));
    }

    let now = Utc::now();
    let step: BatchStep = sqlx::query_as(
        "UPDATE batch_steps
            SET status = ?1,
                performed_by = ?2,
                notes = COALESCE(?3, notes),
                actual_value = COALESCE(?4, actual_value),
                started_at = CASE WHEN ?1 = 'in_progress' AND started_at IS NULL THEN ?5 ELSE started_at END,
                completed_at = CASE WHEN ?1 IN ('completed', 'skipped') THEN ?5 ELSE completed_at END
          WHERE id = ?6 AND batch_id = ?7 AND tenant_id = ?8
          RETURNING *",
    )
    .bind(next)
    .bind(&scope.performed_by)
    .bind(&req.notes)
    .bind(req.actual_value)
    .bind(now)
    .bind(step_id)
    .bind(batch_id)
    .bind(&scope.tenant_id)
    .fetch_one(&mut *tx)
    .await?;

    audit::log_event(
        &mut *tx,
        AuditEvent::new(&scope.tenant_id, audit::step_action(next))
            .entity(crate::types::EntityRef::Batch(batch_id.to_string()))
            .batch(batch_id)
            .step(step_id)
            .performed_by(&scope.performed_by)
            .ip(scope.ip_address.clone())
            .details(json!({
                "step_number": step.step_number,
                "description": step.description,
                "actual_value": step.actual_value,
            })),
    )
    .await?;

    tx.commit().await?;
    info!(step = step.step_number, status = next.as_str(), "step updated");
    Ok(step)
}

/// Complete a step with an electronic signature.
///
/// The signature payload is opaque to the core (a data-URI image in
/// practice). Subject to the same transition table: only a pending or
/// in-progress step can be signed.
pub async fn sign_step(
    pool: &SqlitePool,
    scope: &RequestScope,
    batch_id: &str,
    step_id: &str,
    req: SignStepRequest,
) -> Result<BatchStep, AppError> {
    if req.signature_data.trim().is_empty() {
        return Err(AppError::Validation("signature_data is required".into()));
    }

    let mut tx = pool.begin().await?;
    let current = fetch_step(&mut tx, &scope.tenant_id, batch_id, step_id).await?;
    transition(current.status, StepStatus::Completed)?;

    let now = Utc::now();
    let step: BatchStep = sqlx::query_as(
        "UPDATE batch_steps
            SET status = 'completed',
                performed_by = ?1,
                signature_data = ?2,
                notes = COALESCE(?3, notes),
                actual_value = COALESCE(?4, actual_value),
                started_at = COALESCE(started_at, ?5),
                completed_at = ?5
          WHERE id = ?6 AND batch_id = ?7 AND tenant_id = ?8
          RETURNING *",
    )
    .bind(&scope.performed_by)
    .bind(&req.signature_data)
    .bind(&req.notes)
    .bind(req.actual_value)
    .bind(now)
    .bind(step_id)
    .bind(batch_id)
    .bind(&scope.tenant_id)
    .fetch_one(&mut *tx)
    .await?;

    audit::log_event(
        &mut *tx,
        AuditEvent::new(&scope.tenant_id, actions::BATCH_STEP_SIGNED)
            .entity(crate::types::EntityRef::Batch(batch_id.to_string()))
            .batch(batch_id)
            .step(step_id)
            .performed_by(&scope.performed_by)
            .ip(scope.ip_address.clone())
            .details(json!({
                "step_number": step.step_number,
                "description": step.description,
                "actual_value": step.actual_value,
            })),
    )
    .await?;

    tx.commit().await?;
    info!(step = step.step_number, "step signed");
    Ok(step)
}
