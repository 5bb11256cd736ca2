//! DB-backed sessions.
//!
//! A session row is the server-side counterpart of the HttpOnly cookie:
//! the cookie carries only the opaque token, the row binds it to a user
//! and tenant with an expiry. Expired or dangling tokens authenticate as
//! nothing.

use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::AppError;
use crate::types::{CurrentUser, Role, TenantContext};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Session {
    pub id: String,
    pub tenant_id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Issue a new session for `user_id` under `tenant_id`.
pub async fn create(
    pool: &SqlitePool,
    tenant_id: &str,
    user_id: &str,
    ttl_hours: i64,
) -> Result<Session, AppError> {
    let now = Utc::now();
    let session = Session {
        id: Uuid::new_v4().to_string(),
        tenant_id: tenant_id.to_string(),
        user_id: user_id.to_string(),
        created_at: now,
        expires_at: now + Duration::hours(ttl_hours),
    };
    sqlx::query(
        "INSERT INTO sessions (id, tenant_id, user_id, created_at, expires_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&session.id)
    .bind(&session.tenant_id)
    .bind(&session.user_id)
    .bind(session.created_at)
    .bind(session.expires_at)
    .execute(pool)
    .await?;
    Ok(session)
}

/// Resolve a token to `{user, tenant}`.
///
/// Fails `AuthError` on unknown/expired tokens and on deactivated users
/// or tenants; callers cannot distinguish which, by design.
pub async fn authenticate(
    pool: &SqlitePool,
    token: &str,
) -> Result<(CurrentUser, TenantContext), AppError> {
    let row: Option<(String, String, String, Role, String, String, String, DateTime<Utc>)> =
        sqlx::query_as(
            "SELECT u.id, u.email, u.full_name, u.role, t.id, t.slug, t.name, s.expires_at
             FROM sessions s
             JOIN users u ON u.id = s.user_id AND u.is_active = 1
             JOIN tenants t ON t.id = s.tenant_id AND t.is_active = 1
             WHERE s.id = ?",
        )
        .bind(token)
        .fetch_optional(pool)
        .await?;

    let (user_id, email, full_name, role, tenant_id, slug, tenant_name, expires_at) =
        row.ok_or_else(|| AppError::Auth("Invalid or expired session".into()))?;
    if expires_at <= Utc::now() {
        return Err(AppError::Auth("Invalid or expired session".into()));
    }
    Ok((
        CurrentUser {
            id: user_id,
            email,
            full_name,
            role,
        },
        TenantContext {
            id: tenant_id,
            slug,
            name: tenant_name,
        },
    ))
}

/// Delete a session; unknown tokens are a no-op.
pub async fn revoke(pool: &SqlitePool, token: &str) -> Result<(), AppError> {
    sqlx::query("DELETE FROM sessions WHERE id = ?")
        .bind(token)
        .execute(pool)
        .await?;
    Ok(())
}

/// `Set-Cookie` value issuing the session cookie.
pub fn issue_cookie(name: &str, token: &str, ttl_hours: i64) -> String {
    format!(
        "{name}={token}; HttpOnly; SameSite=Lax; Path=/; Max-Age={}",
        ttl_hours * 3600
    )
}

/// `Set-Cookie` value clearing the session cookie.
pub fn clear_cookie(name: &str) -> String {
    format!("{name}=; HttpOnly; SameSite=Lax; Path=/; Max-Age=0")
}

/// Extract the session token from a `Cookie` header value.
pub fn token_from_cookie_header(header: &str, cookie_name: &str) -> Option<String> {
    header.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        (name == cookie_name).then(|| value.to_string())
    })
}
