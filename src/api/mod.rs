//! HTTP surface of the EBR service.
//!
//! Handlers are thin: they authenticate, check the role policy, call
//! into the domain modules, and shape the JSON response. No business
//! rule lives here.

pub mod extract;
pub mod handlers;
pub mod server;

use std::sync::Arc;

use sqlx::SqlitePool;

use crate::config::Config;
use crate::opcua::SimulatorState;

/// Shared application state injected into every handler.
#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub config: Arc<Config>,
    pub simulator: Arc<SimulatorState>,
}
