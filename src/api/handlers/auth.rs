//! Login, logout, and caller introspection.

use axum::extract::State;
use axum::http::header::SET_COOKIE;
use axum::response::{AppendHeaders, IntoResponse};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::api::extract::RequestContext;
use crate::api::handlers::ok;
use crate::api::AppState;
use crate::audit::{self, actions, AuditEvent};
use crate::auth::{password, session};
use crate::error::AppError;
use crate::types::{EntityRef, Role};

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub tenant: String,
    pub email: String,
    pub password: String,
}

/// Resolve tenant slug + credentials to a session cookie. Unknown
/// tenant, unknown email, and wrong password all produce the same
/// `AuthError`; the failure detail goes to the audit trail only.
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let tenant: Option<(String,)> =
        sqlx::query_as("SELECT id FROM tenants WHERE slug = ? AND is_active = 1")
            .bind(&req.tenant)
            .fetch_optional(&state.pool)
            .await?;
    let Some((tenant_id,)) = tenant else {
        return Err(AppError::Auth("Invalid credentials".into()));
    };

    let user: Option<(String, String, String, Role)> = sqlx::query_as(
        "SELECT id, password_hash, password_salt, role
         FROM users WHERE tenant_id = ? AND email = ? AND is_active = 1",
    )
    .bind(&tenant_id)
    .bind(&req.email)
    .fetch_optional(&state.pool)
    .await?;

    let user_id = match user {
        Some((id, hash, salt, _)) if password::verify_password(&req.password, &salt, &hash) => id,
        _ => {
            audit::log_event_pool(
                &state.pool,
                AuditEvent::new(&tenant_id, actions::AUTH_LOGIN_FAILED)
                    .details(json!({ "email": req.email })),
            )
            .await?;
            return Err(AppError::Auth("Invalid credentials".into()));
        }
    };

    let ttl = state.config.auth.session_ttl_hours;
    let new_session = session::create(&state.pool, &tenant_id, &user_id, ttl).await?;
    let (current, tenant) = session::authenticate(&state.pool, &new_session.id).await?;

    audit::log_event_pool(
        &state.pool,
        AuditEvent::new(&tenant_id, actions::AUTH_LOGIN)
            .entity(EntityRef::Session(user_id.clone()))
            .performed_by(&current.full_name),
    )
    .await?;

    let cookie = session::issue_cookie(&state.config.auth.cookie_name, &new_session.id, ttl);
    Ok((
        AppendHeaders([(SET_COOKIE, cookie)]),
        ok(json!({ "token": new_session.id, "user": current, "tenant": tenant })),
    ))
}

pub async fn logout(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Result<impl IntoResponse, AppError> {
    session::revoke(&state.pool, &ctx.token).await?;
    audit::log_event_pool(
        &state.pool,
        AuditEvent::new(&ctx.tenant.id, actions::AUTH_LOGOUT)
            .entity(EntityRef::Session(ctx.user.id.clone()))
            .performed_by(&ctx.user.full_name)
            .ip(ctx.ip_address.clone()),
    )
    .await?;
    let cookie = session::clear_cookie(&state.config.auth.cookie_name);
    Ok((AppendHeaders([(SET_COOKIE, cookie)]), ok(json!({}))))
}

pub async fn me(ctx: RequestContext) -> Json<serde_json::Value> {
    ok(json!({ "user": ctx.user, "tenant": ctx.tenant }))
}
