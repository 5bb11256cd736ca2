//! Tenant information endpoint.

use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::api::extract::RequestContext;
use crate::api::handlers::ok;
use crate::api::AppState;
use crate::auth::policy::Operation;
use crate::error::AppError;

/// Tenant identity plus its settings blobs. A tenant with no settings
/// row reads as empty objects.
pub async fn info(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Result<Json<Value>, AppError> {
    ctx.require(Operation::TenantRead)?;
    let settings: Option<(String, String, String)> = sqlx::query_as(
        "SELECT branding, feature_flags, compliance FROM tenant_settings WHERE tenant_id = ?",
    )
    .bind(&ctx.tenant.id)
    .fetch_optional(&state.pool)
    .await?;

    let (branding, feature_flags, compliance) = match settings {
        Some((b, f, c)) => (parse(&b), parse(&f), parse(&c)),
        None => (json!({}), json!({}), json!({})),
    };
    Ok(ok(json!({
        "tenant": ctx.tenant,
        "settings": {
            "branding": branding,
            "feature_flags": feature_flags,
            "compliance": compliance,
        },
    })))
}

fn parse(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| json!({}))
}
