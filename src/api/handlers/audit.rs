//! Tenant-wide audit trail endpoint.

use axum::extract::{Query, State};
use axum::Json;
use serde_json::Value;

use crate::api::extract::RequestContext;
use crate::api::handlers::ok;
use crate::api::AppState;
use crate::audit::{self, AuditQuery};
use crate::auth::policy::Operation;
use crate::error::AppError;

pub async fn list(
    State(state): State<AppState>,
    ctx: RequestContext,
    Query(query): Query<AuditQuery>,
) -> Result<Json<Value>, AppError> {
    ctx.require(Operation::AuditRead)?;
    Ok(ok(audit::list_events(&state.pool, &ctx.tenant.id, &query).await?))
}
