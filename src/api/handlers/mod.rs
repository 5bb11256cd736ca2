//! Route handlers, grouped by resource.

pub mod audit;
pub mod auth;
pub mod batches;
pub mod integrations;
pub mod recipes;
pub mod tenant;
pub mod users;

use axum::Json;
use serde::Serialize;
use serde_json::{json, Value};

/// Success envelope; the error side is shaped by `AppError`.
pub fn ok<T: Serialize>(data: T) -> Json<Value> {
    Json(json!({ "success": true, "data": data }))
}
