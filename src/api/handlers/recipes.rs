//! Recipe endpoints, including the JSON and XML export surfaces.

use axum::extract::{Path, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::Value;

use crate::api::extract::RequestContext;
use crate::api::handlers::ok;
use crate::api::AppState;
use crate::auth::policy::Operation;
use crate::error::AppError;
use crate::recipe::{self, CreateRecipeRequest, RecipeExport, UpdateRecipeRequest};

pub async fn list(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Result<Json<Value>, AppError> {
    ctx.require(Operation::RecipeRead)?;
    Ok(ok(recipe::list_recipes(&state.pool, &ctx.tenant.id).await?))
}

pub async fn get(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(recipe_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    ctx.require(Operation::RecipeRead)?;
    Ok(ok(recipe::get_recipe(&state.pool, &ctx.tenant.id, &recipe_id).await?))
}

pub async fn create(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(req): Json<CreateRecipeRequest>,
) -> Result<Json<Value>, AppError> {
    ctx.require(Operation::RecipeEdit)?;
    Ok(ok(recipe::create_recipe(&state.pool, &ctx.scope(), req).await?))
}

pub async fn update(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(recipe_id): Path<String>,
    Json(req): Json<UpdateRecipeRequest>,
) -> Result<Json<Value>, AppError> {
    ctx.require(Operation::RecipeEdit)?;
    Ok(ok(
        recipe::update_recipe(&state.pool, &ctx.scope(), &recipe_id, req).await?,
    ))
}

pub async fn delete(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(recipe_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    ctx.require(Operation::RecipeEdit)?;
    recipe::delete_recipe(&state.pool, &ctx.scope(), &recipe_id).await?;
    Ok(ok(serde_json::json!({})))
}

pub async fn export(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(recipe_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    ctx.require(Operation::RecipeRead)?;
    Ok(ok(
        recipe::export_recipe(&state.pool, &ctx.tenant.id, &recipe_id).await?,
    ))
}

pub async fn export_xml(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(recipe_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    ctx.require(Operation::RecipeRead)?;
    let xml = recipe::export_recipe_xml(&state.pool, &ctx.tenant.id, &recipe_id).await?;
    Ok(([(header::CONTENT_TYPE, "application/xml")], xml))
}

pub async fn import(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(envelope): Json<RecipeExport>,
) -> Result<Json<Value>, AppError> {
    ctx.require(Operation::RecipeEdit)?;
    Ok(ok(recipe::import_recipe(&state.pool, &ctx.scope(), envelope).await?))
}
