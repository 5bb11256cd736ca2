//! Recipe store: versioned procedure templates and their steps.
//!
//! Steps are replaced wholesale on update rather than diffed; a recipe
//! edit never touches batches already materialized from it. Deleting a
//! recipe that batches reference is refused so the provenance of every
//! batch record stays resolvable.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::SqlitePool;
use tracing::info;
use uuid::Uuid;

use crate::audit::{self, actions, AuditEvent};
use crate::batch::lifecycle::RequestScope;
use crate::error::AppError;
use crate::types::{EntityRef, Recipe, RecipeStep, StepType};

/// Recipe plus its ordered steps, as returned by the get endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct RecipeWithSteps {
    #[serde(flatten)]
    pub recipe: Recipe,
    pub steps: Vec<RecipeStep>,
}

/// List-view row: recipe columns plus a step count.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct RecipeSummary {
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub recipe: Recipe,
    pub step_count: i64,
}

/// Step definition as submitted by the editor. `step_number` is assigned
/// from array position, so clients cannot create gaps or duplicates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipeStepInput {
    pub description: String,
    pub instructions: Option<String>,
    pub step_type: StepType,
    pub expected_value: Option<f64>,
    pub unit: Option<String>,
    #[serde(default)]
    pub requires_signature: bool,
    pub duration_minutes: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateRecipeRequest {
    pub name: String,
    pub product_name: String,
    pub version: String,
    pub description: Option<String>,
    #[serde(default)]
    pub steps: Vec<RecipeStepInput>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateRecipeRequest {
    pub name: Option<String>,
    pub product_name: Option<String>,
    pub version: Option<String>,
    pub description: Option<String>,
    /// `None` leaves the existing steps alone; `Some` replaces them all.
    pub steps: Option<Vec<RecipeStepInput>>,
}

pub async fn list_recipes(
    pool: &SqlitePool,
    tenant_id: &str,
) -> Result<Vec<RecipeSummary>, AppError> {
    Ok(sqlx::query_as(
        "SELECT r.*,
                (SELECT COUNT(*) FROM recipe_steps rs WHERE rs.recipe_id = r.id) AS step_count
           FROM recipes r
          WHERE r.tenant_id = ?
          ORDER BY r.name, r.version",
    )
    .bind(tenant_id)
    .fetch_all(pool)
    .await?)
}

pub async fn get_recipe(
    pool: &SqlitePool,
    tenant_id: &str,
    recipe_id: &str,
) -> Result<RecipeWithSteps, AppError> {
    let recipe: Recipe = sqlx::query_as("SELECT * FROM recipes WHERE id = ? AND tenant_id = ?")
        .bind(recipe_id)
        .bind(tenant_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Recipe not found".into()))?;
    let steps = sqlx::query_as(
        "SELECT * FROM recipe_steps WHERE recipe_id = ? ORDER BY step_number",
    )
    .bind(recipe_id)
    .fetch_all(pool)
    .await?;
    Ok(RecipeWithSteps { recipe, steps })
}

pub async fn create_recipe(
    pool: &SqlitePool,
    scope: &RequestScope,
    req: CreateRecipeRequest,
) -> Result<RecipeWithSteps, AppError> {
    let mut tx = pool.begin().await?;
    let full = insert_recipe(&mut tx, scope, req).await?;

    audit::log_event(
        &mut *tx,
        AuditEvent::new(&scope.tenant_id, actions::RECIPE_CREATED)
            .entity(EntityRef::Recipe(full.recipe.id.clone()))
            .performed_by(&scope.performed_by)
            .ip(scope.ip_address.clone())
            .details(json!({
                "name": full.recipe.name,
                "version": full.recipe.version,
                "step_count": full.steps.len(),
            })),
    )
    .await?;

    tx.commit().await?;
    info!(recipe = %full.recipe.name, version = %full.recipe.version, "recipe created");
    Ok(full)
}

/// Shared insert path for create and import. Runs on the caller's
/// transaction so the recipe, its steps, and the caller's audit row
/// commit together or not at all.
async fn insert_recipe(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    scope: &RequestScope,
    req: CreateRecipeRequest,
) -> Result<RecipeWithSteps, AppError> {
    validate_header(&req.name, &req.product_name, &req.version)?;
    validate_steps(&req.steps)?;

    let now = Utc::now();
    let recipe = Recipe {
        id: Uuid::new_v4().to_string(),
        tenant_id: scope.tenant_id.clone(),
        name: req.name.trim().to_string(),
        product_name: req.product_name.trim().to_string(),
        version: req.version.trim().to_string(),
        description: req.description,
        created_by: scope.performed_by.clone(),
        created_at: now,
        updated_at: now,
    };
    sqlx::query(
        "INSERT INTO recipes (id, tenant_id, name, product_name, version, description, created_by, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&recipe.id)
    .bind(&recipe.tenant_id)
    .bind(&recipe.name)
    .bind(&recipe.product_name)
    .bind(&recipe.version)
    .bind(&recipe.description)
    .bind(&recipe.created_by)
    .bind(recipe.created_at)
    .bind(recipe.updated_at)
    .execute(&mut **tx)
    .await?;

    let steps = insert_steps(tx, &recipe.id, &req.steps).await?;
    Ok(RecipeWithSteps { recipe, steps })
}

pub async fn update_recipe(
    pool: &SqlitePool,
    scope: &RequestScope,
    recipe_id: &str,
    req: UpdateRecipeRequest,
) -> Result<RecipeWithSteps, AppError> {
    if let Some(steps) = &req.steps {
        validate_steps(steps)?;
    }

    let mut tx = pool.begin().await?;
    let recipe: Recipe = sqlx::query_as(
        "UPDATE recipes
            SET name = COALESCE(?1, name),
                product_name = COALESCE(?2, product_name),
                version = COALESCE(?3, version),
                description = COALESCE(?4, description),
                updated_at = ?5
          WHERE id = ?6 AND tenant_id = ?7
          RETURNING *",
    )
    .bind(&req.name)
    .bind(&req.product_name)
    .bind(&req.version)
    .bind(&req.description)
    .bind(Utc::now())
    .bind(recipe_id)
    .bind(&scope.tenant_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| AppError::NotFound("Recipe not found".into()))?;

    let steps = match &req.steps {
        Some(inputs) => {
            sqlx::query("DELETE FROM recipe_steps WHERE recipe_id = ?")
                .bind(recipe_id)
                .execute(&mut *tx)
                .await?;
            insert_steps(&mut tx, recipe_id, inputs).await?
        }
        None => {
            sqlx::query_as("SELECT * FROM recipe_steps WHERE recipe_id = ? ORDER BY step_number")
                .bind(recipe_id)
                .fetch_all(&mut *tx)
                .await?
        }
    };

    audit::log_event(
        &mut *tx,
        AuditEvent::new(&scope.tenant_id, actions::RECIPE_UPDATED)
            .entity(EntityRef::Recipe(recipe.id.clone()))
            .performed_by(&scope.performed_by)
            .ip(scope.ip_address.clone())
            .details(json!({
                "name": recipe.name,
                "version": recipe.version,
                "steps_replaced": req.steps.is_some(),
            })),
    )
    .await?;

    tx.commit().await?;
    Ok(RecipeWithSteps { recipe, steps })
}

/// Delete a recipe and its steps. Refused while any batch references the
/// recipe, so historical batch records keep a resolvable template.
pub async fn delete_recipe(
    pool: &SqlitePool,
    scope: &RequestScope,
    recipe_id: &str,
) -> Result<(), AppError> {
    let mut tx = pool.begin().await?;
    let recipe: Recipe = sqlx::query_as("SELECT * FROM recipes WHERE id = ? AND tenant_id = ?")
        .bind(recipe_id)
        .bind(&scope.tenant_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound("Recipe not found".into()))?;

    let referencing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM batches WHERE recipe_id = ?")
        .bind(recipe_id)
        .fetch_one(&mut *tx)
        .await?;
    if referencing > 0 {
        return Err(AppError::Conflict(
            "Recipe is referenced by existing batches".into(),
        ));
    }

    sqlx::query("DELETE FROM recipe_steps WHERE recipe_id = ?")
        .bind(recipe_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM recipes WHERE id = ?")
        .bind(recipe_id)
        .execute(&mut *tx)
        .await?;

    audit::log_event(
        &mut *tx,
        AuditEvent::new(&scope.tenant_id, actions::RECIPE_DELETED)
            .entity(EntityRef::Recipe(recipe.id.clone()))
            .performed_by(&scope.performed_by)
            .ip(scope.ip_address.clone())
            .details(json!({ "name": recipe.name, "version": recipe.version })),
    )
    .await?;

    tx.commit().await?;
    info!(recipe = %recipe.name, "recipe deleted");
    Ok(())
}

/// Portable JSON envelope for moving recipes between tenants or
/// installations. Identifiers and tenant scope are deliberately absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipeExport {
    pub format: String,
    pub exported_at: chrono::DateTime<Utc>,
    pub name: String,
    pub product_name: String,
    pub version: String,
    pub description: Option<String>,
    pub steps: Vec<RecipeStepInput>,
}

pub const EXPORT_FORMAT: &str = "ebr-recipe";

pub async fn export_recipe(
    pool: &SqlitePool,
    tenant_id: &str,
    recipe_id: &str,
) -> Result<RecipeExport, AppError> {
    let full = get_recipe(pool, tenant_id, recipe_id).await?;
    Ok(RecipeExport {
        format: EXPORT_FORMAT.to_string(),
        exported_at: Utc::now(),
        name: full.recipe.name,
        product_name: full.recipe.product_name,
        version: full.recipe.version,
        description: full.recipe.description,
        steps: full
            .steps
            .into_iter()
            .map(|s| RecipeStepInput {
                description: s.description,
                instructions: s.instructions,
                step_type: s.step_type,
                expected_value: s.expected_value,
                unit: s.unit,
                requires_signature: s.requires_signature,
                duration_minutes: s.duration_minutes,
            })
            .collect(),
    })
}

/// Import a previously exported envelope as a new recipe owned by the
/// caller's tenant. One transaction, one `recipe.imported` audit row;
/// an import never reads as a plain creation.
pub async fn import_recipe(
    pool: &SqlitePool,
    scope: &RequestScope,
    envelope: RecipeExport,
) -> Result<RecipeWithSteps, AppError> {
    if envelope.format != EXPORT_FORMAT {
        return Err(AppError::Validation(format!(
            "Unsupported export format '{}'",
            envelope.format
        )));
    }

    let mut tx = pool.begin().await?;
    let full = insert_recipe(
        &mut tx,
        scope,
        CreateRecipeRequest {
            name: envelope.name,
            product_name: envelope.product_name,
            version: envelope.version,
            description: envelope.description,
            steps: envelope.steps,
        },
    )
    .await?;

    audit::log_event(
        &mut *tx,
        AuditEvent::new(&scope.tenant_id, actions::RECIPE_IMPORTED)
            .entity(EntityRef::Recipe(full.recipe.id.clone()))
            .performed_by(&scope.performed_by)
            .ip(scope.ip_address.clone())
            .details(json!({
                "name": full.recipe.name,
                "version": full.recipe.version,
                "step_count": full.steps.len(),
            })),
    )
    .await?;

    tx.commit().await?;
    info!(recipe = %full.recipe.name, "recipe imported");
    Ok(full)
}

/// Render a recipe as a standalone XML document for systems that cannot
/// consume the JSON envelope.
pub async fn export_recipe_xml(
    pool: &SqlitePool,
    tenant_id: &str,
    recipe_id: &str,
) -> Result<String, AppError> {
    let full = get_recipe(pool, tenant_id, recipe_id).await?;
    let mut xml = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    xml.push_str("<recipe>\n");
    xml.push_str(&format!("  <name>{}</name>\n", xml_escape(&full.recipe.name)));
    xml.push_str(&format!(
        "  <productName>{}</productName>\n",
        xml_escape(&full.recipe.product_name)
    ));
    xml.push_str(&format!(
        "  <version>{}</version>\n",
        xml_escape(&full.recipe.version)
    ));
    if let Some(description) = &full.recipe.description {
        xml.push_str(&format!(
            "  <description>{}</description>\n",
            xml_escape(description)
        ));
    }
    xml.push_str("  <steps>\n");
    for step in &full.steps {
        xml.push_str(&format!("    <step number=\"{}\">\n", step.step_number));
        xml.push_str(&format!(
            "      <description>{}</description>\n",
            xml_escape(&step.description)
        ));
        if let Some(instructions) = &step.instructions {
            xml.push_str(&format!(
                "      <instructions>{}</instructions>\n",
                xml_escape(instructions)
            ));
        }
        xml.push_str(&format!("      <type>{}</type>\n", step.step_type.as_str()));
        if let Some(expected) = step.expected_value {
            let unit = step.unit.as_deref().unwrap_or("");
            xml.push_str(&format!(
                "      <expectedValue unit=\"{}\">{}</expectedValue>\n",
                xml_escape(unit),
                expected
            ));
        }
        xml.push_str(&format!(
            "      <requiresSignature>{}</requiresSignature>\n",
            step.requires_signature
        ));
        xml.push_str("    </step>\n");
    }
    xml.push_str("  </steps>\n");
    xml.push_str("</recipe>\n");
    Ok(xml)
}

fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

fn validate_header(name: &str, product_name: &str, version: &str) -> Result<(), AppError> {
    if name.trim().is_empty() || product_name.trim().is_empty() || version.trim().is_empty() {
        return Err(AppError::Validation(
            "name, product_name and version are required".into(),
        ));
    }
    Ok(())
}

fn validate_steps(steps: &[RecipeStepInput]) -> Result<(), AppError> {
    for (i, step) in steps.iter().enumerate() {
        if step.description.trim().is_empty() {
            return Err(AppError::Validation(format!(
                "Step {} has an empty description",
                i + 1
            )));
        }
    }
    Ok(())
}

async fn insert_steps(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    recipe_id: &str,
    inputs: &[RecipeStepInput],
) -> Result<Vec<RecipeStep>, AppError> {
    let mut steps = Vec::with_capacity(inputs.len());
    for (i, input) in inputs.iter().enumerate() {
        let step = RecipeStep {
            id: Uuid::new_v4().to_string(),
            recipe_id: recipe_id.to_string(),
            step_number: i as i64 + 1,
            description: input.description.trim().to_string(),
            instructions: input.instructions.clone(),
            step_type: input.step_type,
            expected_value: input.expected_value,
            unit: input.unit.clone(),
            requires_signature: input.requires_signature,
            duration_minutes: input.duration_minutes,
        };
        sqlx::query(
            "INSERT INTO recipe_steps (id, recipe_id, step_number, description, instructions, step_type, expected_value, unit, requires_signature, duration_minutes)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&step.id)
        .bind(&step.recipe_id)
        .bind(step.step_number)
        .bind(&step.description)
        .bind(&step.instructions)
        .bind(step.step_type)
        .bind(step.expected_value)
        .bind(&step.unit)
        .bind(step.requires_signature)
        .bind(step.duration_minutes)
        .execute(&mut **tx)
        .await?;
        steps.push(step);
    }
    Ok(steps)
}
