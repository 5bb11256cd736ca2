//! Batch, step, and report endpoints.

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::Value;

use crate::api::extract::RequestContext;
use crate::api::handlers::ok;
use crate::api::AppState;
use crate::audit::{self, AuditQuery};
use crate::auth::policy::Operation;
use crate::batch::lifecycle::{self, CreateBatchRequest};
use crate::batch::steps::{self, SignStepRequest, UpdateStepRequest};
use crate::error::AppError;
use crate::report;

pub async fn list(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Result<Json<Value>, AppError> {
    ctx.require(Operation::BatchRead)?;
    Ok(ok(lifecycle::list_batches(&state.pool, &ctx.tenant.id).await?))
}

pub async fn create(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(req): Json<CreateBatchRequest>,
) -> Result<impl IntoResponse, AppError> {
    ctx.require(Operation::BatchWrite)?;
    let batch = lifecycle::create_batch(&state.pool, &ctx.scope(), req).await?;
    Ok((StatusCode::CREATED, ok(batch)))
}

pub async fn get(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(batch_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    ctx.require(Operation::BatchRead)?;
    Ok(ok(lifecycle::get_batch(&state.pool, &ctx.tenant.id, &batch_id).await?))
}

pub async fn start(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(batch_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    ctx.require(Operation::BatchManage)?;
    Ok(ok(lifecycle::start_batch(&state.pool, &ctx.scope(), &batch_id).await?))
}

pub async fn complete(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(batch_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    ctx.require(Operation::BatchManage)?;
    Ok(ok(lifecycle::complete_batch(&state.pool, &ctx.scope(), &batch_id).await?))
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelRequest {
    pub reason: Option<String>,
}

pub async fn cancel(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(batch_id): Path<String>,
    body: Option<Json<CancelRequest>>,
) -> Result<Json<Value>, AppError> {
    ctx.require(Operation::BatchManage)?;
    let reason = body.and_then(|Json(req)| req.reason);
    Ok(ok(lifecycle::cancel_batch(&state.pool, &ctx.scope(), &batch_id, reason).await?))
}

pub async fn list_steps(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(batch_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    ctx.require(Operation::BatchRead)?;
    Ok(ok(steps::list_steps(&state.pool, &ctx.tenant.id, &batch_id).await?))
}

pub async fn update_step(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path((batch_id, step_id)): Path<(String, String)>,
    Json(req): Json<UpdateStepRequest>,
) -> Result<Json<Value>, AppError> {
    ctx.require(Operation::BatchWrite)?;
    Ok(ok(
        steps::update_step(&state.pool, &ctx.scope(), &batch_id, &step_id, req).await?,
    ))
}

pub async fn sign_step(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path((batch_id, step_id)): Path<(String, String)>,
    Json(req): Json<SignStepRequest>,
) -> Result<Json<Value>, AppError> {
    ctx.require(Operation::BatchWrite)?;
    Ok(ok(
        steps::sign_step(&state.pool, &ctx.scope(), &batch_id, &step_id, req).await?,
    ))
}

/// Full audit trail of one batch, newest first.
pub async fn batch_audit(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(batch_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    ctx.require(Operation::AuditRead)?;
    let query = AuditQuery {
        batch_id: Some(batch_id),
        limit: Some(audit::MAX_PAGE_SIZE),
        ..Default::default()
    };
    Ok(ok(audit::list_events(&state.pool, &ctx.tenant.id, &query).await?))
}

pub async fn generate_report(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(batch_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    ctx.require(Operation::BatchManage)?;
    let storage_dir = std::path::Path::new(&state.config.reports.storage_dir);
    Ok(ok(
        report::generate_report(&state.pool, &ctx.scope(), storage_dir, &batch_id).await?,
    ))
}

/// Stream back the most recent generated report.
pub async fn download_report(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(batch_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    ctx.require(Operation::BatchRead)?;
    let record = report::latest_report(&state.pool, &ctx.tenant.id, &batch_id)
        .await?
        .ok_or_else(|| AppError::NotFound("No report has been generated for this batch".into()))?;
    let bytes = tokio::fs::read(&record.file_path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            AppError::NotFound("Report file is no longer available".into())
        } else {
            AppError::Internal(e.into())
        }
    })?;
    let file_name = std::path::Path::new(&record.file_path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "batch-record.pdf".to_string());
    Ok((
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{file_name}\""),
            ),
        ],
        bytes,
    ))
}
