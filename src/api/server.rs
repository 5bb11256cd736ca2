//! HTTP server assembly.
//!
//! Builds the axum router for the `/api/v1` surface, wires the shared
//! state, and serves it on the configured listener.

use std::sync::Arc;

use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::Utc;
use serde_json::json;
use sqlx::SqlitePool;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::api::{handlers, AppState};
use crate::config::Config;
use crate::opcua::SimulatorState;

pub struct Server {
    config: Config,
    state: AppState,
}

impl Server {
    pub fn new(config: Config, pool: SqlitePool) -> Self {
        let state = AppState {
            pool,
            config: Arc::new(config.clone()),
            simulator: Arc::new(SimulatorState::new(Utc::now())),
        };
        Self { config, state }
    }

    /// Bind the configured listener and serve until shutdown.
    pub async fn start(self) -> anyhow::Result<()> {
        let app = router(self.state.clone());
        let addr = format!("{}:{}", self.config.api.host, self.config.api.port);
        info!("API server listening on {}", addr);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        axum::serve(listener, app).await?;
        Ok(())
    }
}

/// Assemble the full router. Separate from [`Server::start`] so tests
/// can drive it without a socket.
pub fn router(state: AppState) -> Router {
    let origin: HeaderValue = state
        .config
        .cors
        .allowed_origin
        .parse()
        .unwrap_or_else(|_| HeaderValue::from_static("http://localhost:5173"));
    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    let api = Router::new()
        .route("/auth/login", post(handlers::auth::login))
        .route("/auth/logout", post(handlers::auth::logout))
        .route("/auth/me", get(handlers::auth::me))
        .route("/batches", get(handlers::batches::list).post(handlers::batches::create))
        .route("/batches/:id", get(handlers::batches::get))
        .route("/batches/:id/start", post(handlers::batches::start))
        .route("/batches/:id/complete", post(handlers::batches::complete))
        .route("/batches/:id/cancel", post(handlers::batches::cancel))
        .route("/batches/:id/steps", get(handlers::batches::list_steps))
        .route("/batches/:id/steps/:step_id", put(handlers::batches::update_step))
        .route("/batches/:id/steps/:step_id/sign", post(handlers::batches::sign_step))
        .route("/batches/:id/audit", get(handlers::batches::batch_audit))
        .route("/batches/:id/report", post(handlers::batches::generate_report))
        .route("/batches/:id/report/download", get(handlers::batches::download_report))
        .route("/recipes", get(handlers::recipes::list).post(handlers::recipes::create))
        .route("/recipes/import", post(handlers::recipes::import))
        .route(
            "/recipes/:id",
            get(handlers::recipes::get)
                .put(handlers::recipes::update)
                .delete(handlers::recipes::delete),
        )
        .route("/recipes/:id/export", get(handlers::recipes::export))
        .route("/recipes/:id/export/xml", get(handlers::recipes::export_xml))
        .route("/audit", get(handlers::audit::list))
        .route("/integrations/status", get(handlers::integrations::status))
        .route("/integrations/readings", get(handlers::integrations::readings))
        .route("/integrations/equipment", get(handlers::integrations::equipment))
        .route("/integrations/alarms", get(handlers::integrations::alarms))
        .route("/tenant/settings", get(handlers::tenant::info))
        .route("/users", get(handlers::users::list).post(handlers::users::create))
        .route(
            "/users/:id",
            put(handlers::users::update).delete(handlers::users::deactivate),
        );

    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", api)
        .fallback(not_found)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn not_found() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "success": false, "error": "Not found", "code": "NOT_FOUND" })),
    )
}
