//! Request authentication extractor.
//!
//! `RequestContext` resolves the caller once per request, from either
//! the session cookie or an `Authorization: Bearer` header. Tenant scope
//! comes exclusively from the session row; no request parameter can
//! steer it.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::api::AppState;
use crate::auth::policy::{self, Operation};
use crate::auth::session;
use crate::batch::lifecycle::RequestScope;
use crate::error::AppError;
use crate::types::{CurrentUser, TenantContext};

pub struct RequestContext {
    pub user: CurrentUser,
    pub tenant: TenantContext,
    /// Raw session token, kept so logout can revoke it.
    pub token: String,
    pub ip_address: Option<String>,
}

impl RequestContext {
    /// Scope handed to the domain modules.
    pub fn scope(&self) -> RequestScope {
        RequestScope {
            tenant_id: self.tenant.id.clone(),
            performed_by: self.user.full_name.clone(),
            ip_address: self.ip_address.clone(),
        }
    }

    /// Enforce the role policy for `operation`.
    pub fn require(&self, operation: Operation) -> Result<(), AppError> {
        if policy::allowed(self.user.role, operation) {
            Ok(())
        } else {
            Err(AppError::Permission)
        }
    }
}

/// Pull the session token out of the request headers: bearer token
/// first, session cookie second.
pub fn token_from_parts(parts: &Parts, cookie_name: &str) -> Option<String> {
    if let Some(value) = parts
        .headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    {
        if let Some(token) = value.strip_prefix("Bearer ") {
            return Some(token.trim().to_string());
        }
    }
    parts
        .headers
        .get(axum::http::header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .and_then(|header| session::token_from_cookie_header(header, cookie_name))
}

fn client_ip(parts: &Parts) -> Option<String> {
    parts
        .headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[async_trait]
impl FromRequestParts<AppState> for RequestContext {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = token_from_parts(parts, &state.config.auth.cookie_name)
            .ok_or_else(|| AppError::Auth("Authentication required".into()))?;
        let (user, tenant) = session::authenticate(&state.pool, &token).await?;
        Ok(RequestContext {
            user,
            tenant,
            token,
            ip_address: client_ip(parts),
        })
    }
}
