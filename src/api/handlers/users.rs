//! User management endpoints. Admin only, the roster included.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::api::extract::RequestContext;
use crate::api::handlers::ok;
use crate::api::AppState;
use crate::audit::{self, actions, AuditEvent};
use crate::auth::password;
use crate::auth::policy::Operation;
use crate::error::{conflict_on_unique, AppError};
use crate::types::{EntityRef, Role, UserAccount};

const USER_COLUMNS: &str = "id, email, full_name, role, is_active, created_at";

pub async fn list(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Result<Json<Value>, AppError> {
    ctx.require(Operation::UserManage)?;
    let users: Vec<UserAccount> = sqlx::query_as(&format!(
        "SELECT {USER_COLUMNS} FROM users WHERE tenant_id = ? ORDER BY full_name"
    ))
    .bind(&ctx.tenant.id)
    .fetch_all(&state.pool)
    .await?;
    Ok(ok(users))
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub email: String,
    pub password: String,
    pub full_name: String,
    pub role: Role,
}

pub async fn create(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(req): Json<CreateUserRequest>,
) -> Result<impl IntoResponse, AppError> {
    ctx.require(Operation::UserManage)?;
    if req.email.trim().is_empty() || req.full_name.trim().is_empty() {
        return Err(AppError::Validation("email and full_name are required".into()));
    }
    if req.password.len() < 8 {
        return Err(AppError::Validation(
            "Password must be at least 8 characters".into(),
        ));
    }

    let salt = password::new_salt();
    let hash = password::hash_password(&req.password, &salt);
    let id = uuid::Uuid::new_v4().to_string();
    let now = chrono::Utc::now();

    let mut tx = state.pool.begin().await?;
    let user: UserAccount = sqlx::query_as(&format!(
        "INSERT INTO users (id, tenant_id, email, password_hash, password_salt, full_name, role, is_active, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, 1, ?, ?)
         RETURNING {USER_COLUMNS}"
    ))
    .bind(&id)
    .bind(&ctx.tenant.id)
    .bind(req.email.trim())
    .bind(&hash)
    .bind(&salt)
    .bind(req.full_name.trim())
    .bind(req.role)
    .bind(now)
    .bind(now)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| conflict_on_unique(e, "A user with this email already exists"))?;

    audit::log_event(
        &mut *tx,
        AuditEvent::new(&ctx.tenant.id, actions::USER_CREATED)
            .entity(EntityRef::User(user.id.clone()))
            .performed_by(&ctx.user.full_name)
            .ip(ctx.ip_address.clone())
            .details(json!({ "email": user.email, "role": user.role })),
    )
    .await?;
    tx.commit().await?;
    Ok((StatusCode::CREATED, ok(user)))
}

#[derive(Debug, Deserialize)]
pub struct UpdateUserRequest {
    pub full_name: Option<String>,
    pub role: Option<Role>,
    pub password: Option<String>,
}

pub async fn update(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(user_id): Path<String>,
    Json(req): Json<UpdateUserRequest>,
) -> Result<Json<Value>, AppError> {
    ctx.require(Operation::UserManage)?;
    if user_id == ctx.user.id && req.role.is_some() {
        return Err(AppError::Validation("Cannot change your own role".into()));
    }
    let (hash, salt) = match &req.password {
        Some(p) if p.len() < 8 => {
            return Err(AppError::Validation(
                "Password must be at least 8 characters".into(),
            ))
        }
        Some(p) => {
            let salt = password::new_salt();
            (Some(password::hash_password(p, &salt)), Some(salt))
        }
        None => (None, None),
    };

    let mut tx = state.pool.begin().await?;
    let user: UserAccount = sqlx::query_as(&format!(
        "UPDATE users
            SET full_name = COALESCE(?1, full_name),
                role = COALESCE(?2, role),
                password_hash = COALESCE(?3, password_hash),
                password_salt = COALESCE(?4, password_salt),
                updated_at = ?5
          WHERE id = ?6 AND tenant_id = ?7
          RETURNING {USER_COLUMNS}"
    ))
    .bind(&req.full_name)
    .bind(req.role)
    .bind(&hash)
    .bind(&salt)
    .bind(chrono::Utc::now())
    .bind(&user_id)
    .bind(&ctx.tenant.id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| AppError::NotFound("User not found".into()))?;

    // Field names only; an audit row must never carry credential or
    // profile values.
    let mut changed = Vec::new();
    if req.full_name.is_some() {
        changed.push("full_name");
    }
    if req.role.is_some() {
        changed.push("role");
    }
    if req.password.is_some() {
        changed.push("password");
    }
    audit::log_event(
        &mut *tx,
        AuditEvent::new(&ctx.tenant.id, actions::USER_UPDATED)
            .entity(EntityRef::User(user.id.clone()))
            .performed_by(&ctx.user.full_name)
            .ip(ctx.ip_address.clone())
            .details(json!({ "changed": changed })),
    )
    .await?;
    tx.commit().await?;
    Ok(ok(user))
}

/// Soft delete: the account is deactivated, never removed, so its name
/// keeps resolving in historical audit entries.
pub async fn deactivate(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(user_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    ctx.require(Operation::UserManage)?;
    if user_id == ctx.user.id {
        return Err(AppError::Validation(
            "Cannot deactivate your own account".into(),
        ));
    }

    let mut tx = state.pool.begin().await?;
    let user: UserAccount = sqlx::query_as(&format!(
        "UPDATE users SET is_active = 0, updated_at = ?
          WHERE id = ? AND tenant_id = ? AND is_active = 1
          RETURNING {USER_COLUMNS}"
    ))
    .bind(chrono::Utc::now())
    .bind(&user_id)
    .bind(&ctx.tenant.id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| AppError::NotFound("User not found".into()))?;

    // Active sessions die with the account.
    sqlx::query("DELETE FROM sessions WHERE user_id = ?")
        .bind(&user_id)
        .execute(&mut *tx)
        .await?;

    audit::log_event(
        &mut *tx,
        AuditEvent::new(&ctx.tenant.id, actions::USER_DEACTIVATED)
            .entity(EntityRef::User(user.id.clone()))
            .performed_by(&ctx.user.full_name)
            .ip(ctx.ip_address.clone())
            .details(json!({ "email": user.email })),
    )
    .await?;
    tx.commit().await?;
    Ok(ok(user))
}
