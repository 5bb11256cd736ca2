//! Equipment integration endpoints, backed by the OPC-UA simulator.
//!
//! Each endpoint evaluates the simulator at the current instant; nothing
//! is cached, nothing is mutated.

use axum::extract::State;
use axum::Json;
use chrono::Utc;
use serde_json::Value;

use crate::api::extract::RequestContext;
use crate::api::handlers::ok;
use crate::api::AppState;
use crate::auth::policy::Operation;
use crate::error::AppError;
use crate::opcua;

pub async fn status(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Result<Json<Value>, AppError> {
    ctx.require(Operation::IntegrationsRead)?;
    Ok(ok(opcua::snapshot(&state.simulator, Utc::now()).server))
}

pub async fn readings(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Result<Json<Value>, AppError> {
    ctx.require(Operation::IntegrationsRead)?;
    Ok(ok(opcua::compute_readings(&state.simulator, Utc::now())))
}

pub async fn equipment(ctx: RequestContext) -> Result<Json<Value>, AppError> {
    ctx.require(Operation::IntegrationsRead)?;
    Ok(ok(opcua::equipment()))
}

pub async fn alarms(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Result<Json<Value>, AppError> {
    ctx.require(Operation::IntegrationsRead)?;
    Ok(ok(opcua::alarms(&state.simulator, Utc::now())))
}
